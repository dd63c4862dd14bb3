//! End-to-end tests driving acquisitions through the tokio runner.

mod common;

use std::time::Duration;

use bytes::BytesMut;
use common::{engine_config, settings, NEEDED};
use daq_driver_slogic::model::PatternMode;
use daq_driver_slogic::runner::spawn_acquisition;
use daq_driver_slogic::simulator::pattern::is_ramp;
use daq_driver_slogic::simulator::{FaultScenario, SimConfig, SimulatedDevice};
use daq_driver_slogic::{Acquisition, AcquisitionState, ChannelSink, StreamPacket};
use tokio::sync::mpsc;

async fn collect(rx: &mut mpsc::Receiver<StreamPacket>) -> Vec<StreamPacket> {
    let mut packets = Vec::new();
    while let Some(packet) = rx.recv().await {
        let end = packet == StreamPacket::End;
        packets.push(packet);
        if end {
            break;
        }
    }
    packets
}

#[tokio::test(start_paused = true)]
async fn test_full_capture_delivers_ordered_stream() {
    let device = SimulatedDevice::new(SimConfig::instant());
    let sim = device.handle();
    let (sink, mut rx) = ChannelSink::channel(64);
    let acquisition = Acquisition::new(device, sink, settings(NEEDED), engine_config(4));

    let running = spawn_acquisition(acquisition);
    let packets = collect(&mut rx).await;
    let finished = running.join().await.unwrap();
    let summary = finished.outcome.unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.bytes_received, NEEDED);
    assert_eq!(finished.acquisition.state(), AcquisitionState::Idle);

    assert!(matches!(packets.first(), Some(StreamPacket::Header(_))));
    assert_eq!(packets.get(1), Some(&StreamPacket::FrameBegin));
    assert_eq!(packets.last(), Some(&StreamPacket::End));

    let mut stream = BytesMut::new();
    for packet in &packets {
        if let StreamPacket::Logic(chunk) = packet {
            assert_eq!(chunk.unit_size, 1);
            stream.extend_from_slice(&chunk.data);
        }
    }
    assert_eq!(stream.len() as u64, NEEDED);
    assert!(is_ramp(&stream, 0));
    assert_eq!(finished.acquisition.sink().dropped_chunks(), 0);
    assert!(sim.stats().peak_in_flight <= 4);
    assert_eq!(sim.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_realistic_link_completes() {
    // 4 MHz × 8 channels = 4000 bytes/ms, matching the simulated link
    let device = SimulatedDevice::new(SimConfig::realistic(4000));
    let (sink, mut rx) = ChannelSink::channel(64);
    let acquisition = Acquisition::new(device, sink, settings(NEEDED), engine_config(4));

    let running = spawn_acquisition(acquisition);
    let packets = collect(&mut rx).await;
    let summary = running.wait().await.unwrap();

    assert!(summary.is_complete());
    assert!(summary.elapsed >= Duration::from_millis(250));
    assert_eq!(packets.last(), Some(&StreamPacket::End));
}

#[tokio::test(start_paused = true)]
async fn test_stop_handle_ends_running_capture() {
    let device = SimulatedDevice::new(SimConfig::instant());
    let sim = device.handle();
    sim.set_held(true);
    let (sink, mut rx) = ChannelSink::channel(64);
    let acquisition = Acquisition::new(device, sink, settings(NEEDED), engine_config(4));

    let running = spawn_acquisition(acquisition);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!running.is_finished());

    running.stop();
    let summary = running.wait().await.unwrap();
    assert_eq!(summary.bytes_received, 0);
    assert!(!summary.is_complete());

    let packets = collect(&mut rx).await;
    assert_eq!(
        packets
            .iter()
            .filter(|p| **p == StreamPacket::End)
            .count(),
        1
    );
    assert_eq!(sim.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_is_reported() {
    let device =
        SimulatedDevice::new(SimConfig::instant().with_fault(FaultScenario::RemoteStartFails));
    let (sink, _rx) = ChannelSink::channel(8);
    let acquisition = Acquisition::new(device, sink, settings(NEEDED), engine_config(4));

    let err = spawn_acquisition(acquisition).wait().await.unwrap_err();
    assert!(err.is_remote_command());
}

#[tokio::test(start_paused = true)]
async fn test_speed_mode_counts_without_forwarding() {
    let mut settings = settings(NEEDED);
    settings.set_pattern_mode(PatternMode::TestMaxSpeed);
    let device = SimulatedDevice::new(SimConfig::instant());
    let (sink, mut rx) = ChannelSink::channel(64);
    let acquisition = Acquisition::new(device, sink, settings, engine_config(4));

    let running = spawn_acquisition(acquisition);
    let packets = collect(&mut rx).await;
    let summary = running.wait().await.unwrap();

    assert!(summary.is_complete());
    assert!(!packets
        .iter()
        .any(|p| matches!(p, StreamPacket::Logic(_))));
}

#[tokio::test(start_paused = true)]
async fn test_stop_right_after_spawn_is_honoured() {
    let device = SimulatedDevice::new(SimConfig::instant());
    let sim = device.handle();
    let (sink, mut rx) = ChannelSink::channel(64);
    let acquisition = Acquisition::new(device, sink, settings(NEEDED), engine_config(4));

    let running = spawn_acquisition(acquisition);
    let stop = running.stop_handle();
    running.stop();

    let summary = running.wait().await.unwrap();
    assert_eq!(summary.bytes_received, 0);
    // Armed but never started, then released
    assert_eq!(sim.stats().remote_starts, 0);
    assert_eq!(sim.in_flight(), 0);
    assert!(!stop.is_requested());

    let packets = collect(&mut rx).await;
    assert_eq!(packets.last(), Some(&StreamPacket::End));
    assert!(!packets
        .iter()
        .any(|p| matches!(p, StreamPacket::Logic(_))));
}

#[tokio::test(start_paused = true)]
async fn test_long_capture_at_link_rate() {
    // 8 MiB at exactly the sample data rate: 32 payloads of 65.536 ms each,
    // observed on 33 ms ticks
    let needed = 8 * NEEDED;
    let device = SimulatedDevice::new(SimConfig::realistic(4000));
    let sim = device.handle();
    let (sink, mut rx) = ChannelSink::channel(64);
    let acquisition = Acquisition::new(device, sink, settings(needed), engine_config(4));

    let running = spawn_acquisition(acquisition);
    let packets = collect(&mut rx).await;
    let finished = running.join().await.unwrap();
    let summary = finished.outcome.unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.bytes_received, needed);
    assert_eq!(summary.requests_completed, 32);
    assert!(summary.elapsed >= Duration::from_micros(32 * 65_536));

    let stats = finished.acquisition.stats();
    assert_eq!(stats.duration_ms, 66);
    assert_eq!(stats.payload_bytes, 262_144);

    let mut stream = BytesMut::new();
    for packet in &packets {
        if let StreamPacket::Logic(chunk) = packet {
            stream.extend_from_slice(&chunk.data);
        }
    }
    assert_eq!(stream.len() as u64, needed);
    assert!(is_ramp(&stream, 0));
    assert_eq!(sim.in_flight(), 0);
}
