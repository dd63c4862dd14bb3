//! CLI entry point for slogic-capture
//!
//! Runs bulk-streaming acquisitions against the simulated SLogic device and
//! prints the device model tables.
//!
//! # Usage
//!
//! Capture one million samples on 8 channels at 40 MHz:
//! ```bash
//! slogic-capture capture --channels 8 --samplerate 40000000 --samples 1000000
//! ```
//!
//! List what a model supports:
//! ```bash
//! slogic-capture list --model lite8
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use daq_driver_slogic::config::SlogicConfig;
use daq_driver_slogic::logging;
use daq_driver_slogic::model::{mhz, DeviceSettings, ModelKind, PatternMode};
use daq_driver_slogic::runner::spawn_acquisition;
use daq_driver_slogic::simulator::{SimConfig, SimulatedDevice};
use daq_driver_slogic::{Acquisition, ChannelSink, StreamPacket};

#[derive(Parser)]
#[command(name = "slogic-capture")]
#[command(about = "Bulk-streaming capture for SLogic logic analyzers", long_about = None)]
struct Cli {
    /// Configuration file (TOML); SLOGIC_* environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Model {
    Lite8,
    Basic16U3,
}

impl From<Model> for ModelKind {
    fn from(model: Model) -> Self {
        match model {
            Model::Lite8 => ModelKind::Lite8,
            Model::Basic16U3 => ModelKind::Basic16U3,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Link {
    /// Fill requests as soon as they are polled
    Instant,
    /// Fill requests at the sample data rate
    Realistic,
    /// Instant delivery with random short reads
    Chaos,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one acquisition and print a summary
    Capture {
        /// Device model
        #[arg(long, value_enum)]
        model: Option<Model>,

        /// Sample rate in Hz
        #[arg(long)]
        samplerate: Option<u64>,

        /// Channel width (2, 4, 8 or 16)
        #[arg(long)]
        channels: Option<u32>,

        /// Number of samples to acquire
        #[arg(long)]
        samples: Option<u64>,

        /// Maximum number of outstanding bulk requests
        #[arg(long)]
        pool: Option<usize>,

        /// Count bytes without forwarding them
        #[arg(long)]
        test_speed: bool,

        /// Simulated link behaviour
        #[arg(long, value_enum, default_value = "realistic")]
        link: Link,
    },

    /// Print supported sample rates and channel widths
    List {
        /// Device model
        #[arg(long, value_enum, default_value = "basic16-u3")]
        model: Model,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SlogicConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SlogicConfig::from_env().context("Failed to load config from environment")?,
    };

    match cli.command {
        Commands::Capture {
            model,
            samplerate,
            channels,
            samples,
            pool,
            test_speed,
            link,
        } => {
            let mut config = config;
            if let Some(model) = model {
                config.device.model = model.into();
            }
            if samplerate.is_some() {
                config.device.samplerate = samplerate;
            }
            if channels.is_some() {
                config.device.channels = channels;
            }
            if let Some(samples) = samples {
                config.device.limit_samples = samples;
            }
            if let Some(pool) = pool {
                config.acquisition.pool_capacity = pool;
            }
            if test_speed {
                config.device.pattern_mode = PatternMode::TestMaxSpeed;
            }
            capture(config, link).await
        }
        Commands::List { model } => {
            list(model.into());
            Ok(())
        }
    }
}

async fn capture(config: SlogicConfig, link: Link) -> Result<()> {
    config.validate()?;
    logging::init_from_config(&config.logging)?;

    let settings = config.device.settings();
    let params = settings.snapshot();
    let sim = match link {
        Link::Instant => SimConfig::instant(),
        Link::Realistic => SimConfig::realistic(params.bytes_per_ms()),
        Link::Chaos => SimConfig::chaos(0.05, None),
    };

    println!(
        "{}: {} samples, {} ch @ {} MHz",
        settings.model().name,
        params.limit_samples,
        params.channels,
        params.samplerate as f64 / mhz(1) as f64
    );

    let (sink, mut rx) = ChannelSink::channel(256);
    let acquisition = Acquisition::new(
        SimulatedDevice::new(sim),
        sink,
        settings,
        config.acquisition,
    );
    let running = spawn_acquisition(acquisition);

    let consumer = tokio::spawn(async move {
        let mut chunks = 0u64;
        let mut bytes = 0u64;
        while let Some(packet) = rx.recv().await {
            match packet {
                StreamPacket::Logic(chunk) => {
                    chunks += 1;
                    bytes += chunk.data.len() as u64;
                }
                StreamPacket::End => break,
                StreamPacket::Header(_) | StreamPacket::FrameBegin => {}
            }
        }
        (chunks, bytes)
    });

    let summary = running.wait().await.context("Acquisition failed")?;
    let (chunks, bytes) = consumer.await.context("Consumer task failed")?;

    println!(
        "Received {}/{} bytes in {} transfers ({:.1} ms, {:.2} MB/s)",
        summary.bytes_received,
        summary.bytes_needed,
        summary.requests_completed,
        summary.elapsed.as_secs_f64() * 1000.0,
        summary.average_mbps
    );
    println!("Consumer got {} bytes in {} chunks", bytes, chunks);
    if !summary.is_complete() {
        println!("Stream ended early");
    }
    Ok(())
}

fn list(kind: ModelKind) {
    let model = kind.model();
    println!("{}", model.name);
    println!(
        "  max: {} MHz, {} channels",
        model.max_samplerate / mhz(1),
        model.max_channels
    );

    let mut settings = DeviceSettings::new(model);
    for &width in DeviceSettings::new(model).channel_widths() {
        settings.set_channels(width);
        let rates: Vec<String> = settings
            .samplerates()
            .iter()
            .map(|r| format!("{}", r / mhz(1)))
            .collect();
        println!("  {:>2} ch: {} MHz", width, rates.join(", "));
    }
}
