//! Shared fixtures for acquisition integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use daq_driver_slogic::config::AcquisitionConfig;
use daq_driver_slogic::model::{mhz, DeviceSettings, SLOGIC_BASIC_16_U3};
use daq_driver_slogic::simulator::{LimitedAllocator, SimConfig, SimulatedDevice, SimulatorHandle};
use daq_driver_slogic::{Acquisition, AcquisitionParams, AcquisitionSink};
use parking_lot::Mutex;

/// 1 MiB at 4 MHz × 8 channels.
pub const NEEDED: u64 = 1_048_576;

/// Payload accepted by the probe when allocations above 256 KiB fail.
pub const PAYLOAD: usize = 131_072;

/// Framing and data calls seen by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start(AcquisitionParams),
    Frame,
    Data(Vec<u8>),
    End,
}

/// Sink recording every call, shareable with the test body.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn ends(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| **e == Event::End)
            .count()
    }

    pub fn data_chunks(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, Event::Data(_)))
            .count()
    }

    pub fn data(&self) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Data(d) => Some(d.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl AcquisitionSink for RecordingSink {
    fn stream_start(&mut self, params: &AcquisitionParams) {
        self.events.lock().push(Event::Start(*params));
    }

    fn frame_start(&mut self) {
        self.events.lock().push(Event::Frame);
    }

    fn submit_raw_data(&mut self, data: &[u8]) {
        self.events.lock().push(Event::Data(data.to_vec()));
    }

    fn stream_end(&mut self) {
        self.events.lock().push(Event::End);
    }
}

pub fn settings(samples: u64) -> DeviceSettings {
    let mut settings = DeviceSettings::new(&SLOGIC_BASIC_16_U3);
    settings.set_channels(8);
    settings.set_samplerate(mhz(4));
    settings.set_limit_samples(samples);
    settings
}

pub fn engine_config(pool_capacity: usize) -> AcquisitionConfig {
    AcquisitionConfig {
        pool_capacity,
        ..Default::default()
    }
}

pub struct Rig {
    pub acquisition: Acquisition<SimulatedDevice, RecordingSink>,
    pub sim: SimulatorHandle,
    pub sink: RecordingSink,
    pub allocator: LimitedAllocator,
}

/// Engine on a simulated device whose allocator refuses buffers above 256 KiB.
pub fn rig(sim: SimConfig, samples: u64, pool_capacity: usize) -> Rig {
    rig_with(sim, samples, engine_config(pool_capacity))
}

pub fn rig_with(sim: SimConfig, samples: u64, config: AcquisitionConfig) -> Rig {
    let device = SimulatedDevice::new(sim);
    let handle = device.handle();
    let sink = RecordingSink::default();
    let allocator = LimitedAllocator::new(262_144);
    let acquisition = Acquisition::with_allocator(
        device,
        sink.clone(),
        settings(samples),
        config,
        Box::new(allocator.clone()),
    );
    Rig {
        acquisition,
        sim: handle,
        sink,
        allocator,
    }
}
