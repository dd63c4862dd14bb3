//! # SLogic bulk-streaming acquisition driver
//!
//! Streams logic-analyzer samples from a Sipeed SLogic device over a USB
//! bulk-IN endpoint. At start the driver probes the largest transfer size the
//! host accepts, keeps a bounded pool of asynchronous requests in flight,
//! forwards every received chunk to a consumer and tears the stream down
//! once enough bytes have arrived, the link faults, or a stop is requested.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: The `Acquisition` engine, its start sequence and `StopHandle`.
//! - **`probe`**: Empirical transfer-size discovery (`LinkProbe`).
//! - **`pool`**: Fixed-capacity slot arena and pool filling.
//! - **`completion`**: Per-request completion handling.
//! - **`controller`**: Periodic tick, stall teardown and `TickOutcome`.
//! - **`session`**: Per-acquisition counters and throughput statistics.
//! - **`transfer`**: The `AsyncBulkReader`, `RemoteControl` and `BufferAllocator` seams.
//! - **`sink`**: Consumer framing (`AcquisitionSink`) and the channel-backed `ChannelSink`.
//! - **`runner`**: Drives an acquisition on the tokio runtime.
//! - **`model`**: Device models, sample-rate and channel negotiation.
//! - **`simulator`**: Hardware-free device for tests and the capture tool.
//! - **`config`**, **`logging`**, **`error`**: Ambient infrastructure.
//!
//! ## Example
//!
//! ```no_run
//! use daq_driver_slogic::config::SlogicConfig;
//! use daq_driver_slogic::runner::spawn_acquisition;
//! use daq_driver_slogic::simulator::{SimConfig, SimulatedDevice};
//! use daq_driver_slogic::{Acquisition, ChannelSink, StreamPacket};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SlogicConfig::default();
//! let (sink, mut rx) = ChannelSink::channel(64);
//! let device = SimulatedDevice::new(SimConfig::instant());
//! let acquisition = Acquisition::new(device, sink, config.device.settings(), config.acquisition);
//!
//! let running = spawn_acquisition(acquisition);
//! // The sender lives in the task until it is joined, so stop at the end marker
//! while let Some(packet) = rx.recv().await {
//!     if packet == StreamPacket::End {
//!         break;
//!     }
//!     println!("{:?}", packet);
//! }
//! let summary = running.wait().await?;
//! println!("{} / {} bytes", summary.bytes_received, summary.bytes_needed);
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod completion;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod model;
pub mod pool;
pub mod probe;
pub mod runner;
pub mod session;
pub mod simulator;
pub mod sink;
pub mod transfer;

pub use acquisition::{Acquisition, StopHandle};
pub use config::SlogicConfig;
pub use controller::TickOutcome;
pub use error::{Result, SlogicError, SubmitError};
pub use model::{AcquisitionParams, DeviceSettings, ModelKind, PatternMode};
pub use probe::{LinkPlan, LinkProbe};
pub use session::{AcquisitionState, SessionStats, SessionSummary};
pub use sink::{AcquisitionSink, ChannelSink, LogicChunk, NullSink, StreamPacket};
pub use transfer::{
    AsyncBulkReader, BufferAllocator, Completion, HeapAllocator, RemoteControl, RequestHandle,
    TransferStatus,
};
