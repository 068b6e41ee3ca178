use super::sink::FrameProvider;
use crate::frame::EncodedFrame;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Multipart boundary used by [`mjpeg_part`]
pub const MJPEG_BOUNDARY: &str = "FRAME";

/// Frames of the provider as an async stream, for pull-style transports
pub fn frame_stream(
    provider: Arc<dyn FrameProvider>,
    idle_backoff: Duration,
    token: CancellationToken,
) -> impl Stream<Item = EncodedFrame> + Send {
    async_stream::stream! {
        loop {
            if token.is_cancelled() {
                break;
            }

            match provider.next_frame().await {
                Some(frame) => yield frame,
                None => {
                    trace!("No frame due, backing off {:?}", idle_backoff);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(idle_backoff) => {}
                    }
                }
            }
        }
    }
}

/// One `multipart/x-mixed-replace` part carrying a JPEG frame
pub fn mjpeg_part(frame: &EncodedFrame) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nX-Frame-ID: {}\r\nX-Quality: {}\r\nX-Timestamp: {}\r\n\r\n",
        MJPEG_BOUNDARY,
        frame.len(),
        frame.sequence,
        frame.quality,
        frame
            .timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
    );

    let mut part = Vec::with_capacity(header.len() + frame.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(&frame.data);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

/// [`frame_stream`] rendered as MJPEG multipart body chunks
pub fn mjpeg_stream(
    provider: Arc<dyn FrameProvider>,
    idle_backoff: Duration,
    token: CancellationToken,
) -> impl Stream<Item = Bytes> + Send {
    frame_stream(provider, idle_backoff, token).map(|frame| mjpeg_part(&frame))
}
