//! Hardware-free SLogic device.
//!
//! Provides an [`AsyncBulkReader`](crate::transfer::AsyncBulkReader) +
//! [`RemoteControl`](crate::transfer::RemoteControl) implementation for tests
//! and for running the capture tool without hardware:
//!
//! - **mode**: Delivery modes (Instant, Realistic, Chaos)
//! - **faults**: Scripted link faults and submission limits
//! - **rng**: Seeded random number generator for chaos mode
//! - **pattern**: Payload written into delivered buffers
//! - **allocator**: Buffer allocator with a size ceiling
//! - **device**: The simulated device and its inspection handle

pub mod allocator;
pub mod device;
pub mod faults;
pub mod mode;
pub mod pattern;
pub mod rng;

pub use allocator::LimitedAllocator;
pub use device::{SimConfig, SimulatedDevice, SimulatorHandle, SimulatorStats};
pub use faults::FaultScenario;
pub use mode::MockMode;
pub use pattern::Pattern;
pub use rng::MockRng;
