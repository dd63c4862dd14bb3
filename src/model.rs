//! Device models and acquisition settings.
//!
//! The SLogic family shares one USB protocol but differs in how much
//! bandwidth the front end can move. Bandwidth here is the product of sample
//! rate and channel count, so narrowing the channel width raises the highest
//! usable sample rate and vice versa.
//!
//! [`DeviceSettings`] holds the three values the streaming engine sizes
//! itself from (sample rate, channel width, requested sample count) and
//! enforces the model limits the same way the hardware does: an unsupported
//! or out-of-range request is wrapped to the current limit instead of being
//! rejected.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Megahertz helper.
pub const fn mhz(n: u64) -> u64 {
    n * 1_000_000
}

/// Static description of an SLogic hardware variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlogicModel {
    /// Marketing name
    pub name: &'static str,
    /// Highest sample rate in Hz (at the narrowest channel width)
    pub max_samplerate: u64,
    /// Widest channel count
    pub max_channels: u32,
    /// Rate × channels ceiling
    pub max_bandwidth: u64,
}

/// SLogic Lite 8: 8 channels, USB 2.0.
pub const SLOGIC_LITE_8: SlogicModel = SlogicModel {
    name: "SLogic Lite 8",
    max_samplerate: mhz(160),
    max_channels: 8,
    max_bandwidth: mhz(320),
};

/// SLogic Basic 16 U3: 16 channels, USB 3.0.
pub const SLOGIC_BASIC_16_U3: SlogicModel = SlogicModel {
    name: "SLogic Basic 16 U3",
    max_samplerate: mhz(1600),
    max_channels: 16,
    max_bandwidth: mhz(3200),
};

/// Model selector used by configuration files and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// [`SLOGIC_LITE_8`]
    Lite8,
    /// [`SLOGIC_BASIC_16_U3`]
    #[default]
    Basic16U3,
}

impl ModelKind {
    /// Resolve to the static model table entry.
    pub fn model(self) -> &'static SlogicModel {
        match self {
            Self::Lite8 => &SLOGIC_LITE_8,
            Self::Basic16U3 => &SLOGIC_BASIC_16_U3,
        }
    }
}

/// Sample rates the firmware accepts, ascending.
pub const SAMPLERATES: &[u64] = &[
    mhz(1),
    mhz(2),
    mhz(4),
    mhz(5),
    mhz(8),
    mhz(10),
    mhz(16),
    mhz(20),
    mhz(32),
    // Lite 8: x8ch, x4ch, x2ch
    mhz(40),
    mhz(80),
    mhz(160),
    // Basic 16 U3: x16ch, x8ch, x4ch, x2ch
    mhz(200),
    mhz(400),
    mhz(800),
    mhz(1600),
];

/// Channel widths the firmware accepts, ascending.
pub const CHANNEL_WIDTHS: &[u32] = &[2, 4, 8, 16];

/// How delivered payload is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternMode {
    /// Forward every received byte to the consumer
    #[default]
    Normal,
    /// Measure link throughput only; received bytes are counted but not forwarded
    TestMaxSpeed,
}

/// Read-only snapshot of the settings taken when an acquisition starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionParams {
    /// Requested number of samples
    pub limit_samples: u64,
    /// Active channel width
    pub channels: u32,
    /// Sample rate in Hz
    pub samplerate: u64,
    /// Forwarding behaviour
    pub pattern_mode: PatternMode,
}

impl AcquisitionParams {
    /// Total payload the acquisition must collect.
    pub fn bytes_needed(&self) -> u64 {
        self.limit_samples * u64::from(self.channels) / 8
    }

    /// Bytes the device produces per millisecond.
    pub fn bytes_per_ms(&self) -> u64 {
        self.samplerate * u64::from(self.channels) / 8 / 1000
    }
}

/// Mutable per-device settings with model-limit negotiation.
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    model: &'static SlogicModel,
    samplerate: u64,
    channels: u32,
    limit_samplerate: u64,
    limit_channels: u32,
    limit_samples: u64,
    pattern_mode: PatternMode,
}

impl DeviceSettings {
    /// Settings at the widest channel count and the rate that width allows.
    pub fn new(model: &'static SlogicModel) -> Self {
        let limit_channels = model.max_channels;
        let limit_samplerate = model.max_bandwidth / u64::from(limit_channels);
        Self {
            model,
            samplerate: limit_samplerate,
            channels: limit_channels,
            limit_samplerate,
            limit_channels,
            limit_samples: 0,
            pattern_mode: PatternMode::Normal,
        }
    }

    /// The hardware variant these settings belong to.
    pub fn model(&self) -> &'static SlogicModel {
        self.model
    }

    /// Current sample rate in Hz.
    pub fn samplerate(&self) -> u64 {
        self.samplerate
    }

    /// Current channel width.
    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Requested sample count.
    pub fn limit_samples(&self) -> u64 {
        self.limit_samples
    }

    /// Highest sample rate allowed at the current channel width.
    pub fn limit_samplerate(&self) -> u64 {
        self.limit_samplerate
    }

    /// Widest channel count allowed at the current sample rate.
    pub fn limit_channels(&self) -> u32 {
        self.limit_channels
    }

    /// Current forwarding mode.
    pub fn pattern_mode(&self) -> PatternMode {
        self.pattern_mode
    }

    /// Set the sample rate, wrapping unsupported values to the current limit.
    ///
    /// Returns the rate actually applied.
    pub fn set_samplerate(&mut self, rate: u64) -> u64 {
        if rate > self.limit_samplerate || !SAMPLERATES.contains(&rate) {
            warn!(
                requested = rate,
                applied = self.limit_samplerate,
                "Sample rate out of range or unsupported, wrapping to limit"
            );
            self.samplerate = self.limit_samplerate;
        } else {
            self.samplerate = rate;
        }

        self.limit_channels = u32::try_from(self.model.max_bandwidth / self.samplerate)
            .unwrap_or(u32::MAX)
            .min(self.model.max_channels);

        debug!(
            samplerate = self.samplerate,
            limit_channels = self.limit_channels,
            "Applied sample rate"
        );
        self.samplerate
    }

    /// Set the channel width, wrapping unsupported values to the current limit.
    ///
    /// Returns the width actually applied.
    pub fn set_channels(&mut self, channels: u32) -> u32 {
        if channels > self.limit_channels || !CHANNEL_WIDTHS.contains(&channels) {
            warn!(
                requested = channels,
                applied = self.limit_channels,
                "Channel width out of range or unsupported, wrapping to limit"
            );
            self.channels = self.limit_channels;
        } else {
            self.channels = channels;
        }

        self.limit_samplerate =
            (self.model.max_bandwidth / u64::from(self.channels)).min(self.model.max_samplerate);

        debug!(
            channels = self.channels,
            limit_samplerate = self.limit_samplerate,
            "Applied channel width"
        );
        self.channels
    }

    /// Set the number of samples to acquire.
    pub fn set_limit_samples(&mut self, samples: u64) {
        self.limit_samples = samples;
    }

    /// Select whether received data is forwarded.
    pub fn set_pattern_mode(&mut self, mode: PatternMode) {
        self.pattern_mode = mode;
    }

    /// Sample rates selectable at the current channel width.
    pub fn samplerates(&self) -> &'static [u64] {
        let end = SAMPLERATES
            .iter()
            .position(|&r| r == self.limit_samplerate)
            .map_or(SAMPLERATES.len(), |i| i + 1);
        &SAMPLERATES[..end]
    }

    /// Channel widths selectable at the current sample rate.
    pub fn channel_widths(&self) -> &'static [u32] {
        let end = CHANNEL_WIDTHS
            .iter()
            .position(|&c| c == self.limit_channels)
            .map_or(CHANNEL_WIDTHS.len(), |i| i + 1);
        &CHANNEL_WIDTHS[..end]
    }

    /// Snapshot the values the streaming engine reads at start.
    pub fn snapshot(&self) -> AcquisitionParams {
        AcquisitionParams {
            limit_samples: self.limit_samples,
            channels: self.channels,
            samplerate: self.samplerate,
            pattern_mode: self.pattern_mode,
        }
    }
}
