use crate::controller::StreamInfo;
use crate::error::Result;
use crate::frame::EncodedFrame;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Supplies frames to emitters
#[async_trait]
pub trait FrameProvider: Send + Sync {
    /// Next frame if one is due, without waiting for one
    async fn next_frame(&self) -> Option<EncodedFrame>;

    async fn stream_info(&self) -> Result<StreamInfo>;

    /// Next due frame together with the stream state it was produced under.
    ///
    /// Providers that can swap sources should override this so the frame and
    /// its info come from the same source.
    async fn next_delivery(&self) -> Result<Option<DeliveredFrame>> {
        let Some(frame) = self.next_frame().await else {
            return Ok(None);
        };
        let info = self.stream_info().await?;
        Ok(Some(DeliveredFrame { frame, info }))
    }
}

/// Transport end of an emitter (WebSocket, MJPEG response, peer connection...)
#[async_trait]
pub trait FrameSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send_frame(&self, frame: &EncodedFrame, info: &StreamInfo) -> Result<()>;

    /// A closed sink stops its emitter
    fn is_closed(&self) -> bool {
        false
    }
}

/// A frame together with the stream state it was produced under
#[derive(Debug, Clone)]
pub struct DeliveredFrame {
    pub frame: EncodedFrame,
    pub info: StreamInfo,
}

/// Fans frames out to any number of subscribers
pub struct BroadcastSink {
    name: String,
    sender: broadcast::Sender<DeliveredFrame>,
    dropped: AtomicU64,
}

impl BroadcastSink {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            sender,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveredFrame> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Frames sent while nobody was subscribed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl FrameSink for BroadcastSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_frame(&self, frame: &EncodedFrame, info: &StreamInfo) -> Result<()> {
        let delivered = DeliveredFrame {
            frame: frame.clone(),
            info: info.clone(),
        };

        match self.sender.send(delivered) {
            Ok(receivers) => trace!("Frame {} sent to {} subscribers", frame.sequence, receivers),
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("No subscribers on '{}', frame {} dropped", self.name, frame.sequence);
            }
        }
        Ok(())
    }
}

/// Logs delivered frames; used by the CLI when no transport is attached
pub struct LoggingSink {
    name: String,
    log_every: u64,
    count: AtomicU64,
}

impl LoggingSink {
    pub fn new(name: impl Into<String>, log_every: u64) -> Self {
        Self {
            name: name.into(),
            log_every: log_every.max(1),
            count: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl FrameSink for LoggingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_frame(&self, frame: &EncodedFrame, info: &StreamInfo) -> Result<()> {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.log_every == 0 {
            info!(
                "[{}] frame #{} ({}x{}, {}, {} bytes, {:?} mode)",
                self.name,
                frame.sequence,
                frame.width,
                frame.height,
                frame.quality,
                frame.len(),
                info.control_mode
            );
        } else {
            debug!("[{}] frame #{} ({} bytes)", self.name, frame.sequence, frame.len());
        }
        Ok(())
    }
}
