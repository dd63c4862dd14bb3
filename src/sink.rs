//! Consumer side of the acquisition.
//!
//! The engine frames every acquisition as `stream_start → frame_start →
//! data… → stream_end`, each framing call made at most once. Data calls are
//! fire-and-forget: a sink must never block the engine.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::model::AcquisitionParams;

/// Receives framing notifications and payload from the engine.
pub trait AcquisitionSink {
    /// A new acquisition begins with these parameters.
    fn stream_start(&mut self, params: &AcquisitionParams);

    /// The single logic frame of this acquisition begins.
    fn frame_start(&mut self);

    /// Freshly received payload, in completion order.
    fn submit_raw_data(&mut self, data: &[u8]);

    /// The acquisition is over; no further calls follow.
    fn stream_end(&mut self);
}

/// One chunk of logic samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicChunk {
    /// Bytes per sample group (channels / 8, at least 1)
    pub unit_size: u16,
    /// Raw sample bytes
    pub data: Bytes,
}

/// Message delivered to a [`ChannelSink`] consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPacket {
    /// Acquisition parameters, sent once at start
    Header(AcquisitionParams),
    /// Start of the logic frame
    FrameBegin,
    /// Payload chunk
    Logic(LogicChunk),
    /// End of stream
    End,
}

/// Sink forwarding packets over a bounded tokio channel.
///
/// One slot of channel capacity is always kept free for [`StreamPacket::End`]:
/// payload that would take it is dropped and counted instead, so a lagging
/// consumer loses data but never misses the end of the stream.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<StreamPacket>,
    unit_size: u16,
    dropped_chunks: u64,
    dropped_bytes: u64,
}

impl ChannelSink {
    /// Create a sink and the receiving half.
    ///
    /// `capacity` is clamped to at least 2 so the reserved end slot leaves
    /// room for data.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamPacket>) {
        let (tx, rx) = mpsc::channel(capacity.max(2));
        (
            Self {
                tx,
                unit_size: 1,
                dropped_chunks: 0,
                dropped_bytes: 0,
            },
            rx,
        )
    }

    /// Payload chunks dropped because the consumer lagged.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks
    }

    /// Payload bytes dropped because the consumer lagged.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    fn send_control(&self, packet: StreamPacket) {
        if let Err(e) = self.tx.try_send(packet) {
            debug!(error = %e, "Consumer not accepting control packet");
        }
    }
}

impl AcquisitionSink for ChannelSink {
    fn stream_start(&mut self, params: &AcquisitionParams) {
        self.unit_size = u16::try_from(params.channels.div_ceil(8))
            .unwrap_or(u16::MAX)
            .max(1);
        self.dropped_chunks = 0;
        self.dropped_bytes = 0;
        self.send_control(StreamPacket::Header(*params));
    }

    fn frame_start(&mut self) {
        self.send_control(StreamPacket::FrameBegin);
    }

    fn submit_raw_data(&mut self, data: &[u8]) {
        if self.tx.is_closed() {
            return;
        }
        if self.tx.capacity() <= 1 {
            self.dropped_chunks += 1;
            self.dropped_bytes += data.len() as u64;
            return;
        }
        let chunk = LogicChunk {
            unit_size: self.unit_size,
            data: Bytes::copy_from_slice(data),
        };
        if self.tx.try_send(StreamPacket::Logic(chunk)).is_err() {
            self.dropped_chunks += 1;
            self.dropped_bytes += data.len() as u64;
        }
    }

    fn stream_end(&mut self) {
        if self.dropped_chunks > 0 {
            warn!(
                chunks = self.dropped_chunks,
                bytes = self.dropped_bytes,
                "Consumer lagged, payload dropped"
            );
        }
        self.send_control(StreamPacket::End);
    }
}

/// Sink that discards everything. Useful for throughput measurements.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl AcquisitionSink for NullSink {
    fn stream_start(&mut self, _params: &AcquisitionParams) {}
    fn frame_start(&mut self) {}
    fn submit_raw_data(&mut self, _data: &[u8]) {}
    fn stream_end(&mut self) {}
}
