use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_core::Stream;
use futures_util::stream::unfold;
use tokio::sync::mpsc::{self, Sender};
use tokio_util::sync::CancellationToken;

pub use fungen_types::{FrameError, FrameResult, GrayFrame};

pub type FrameStream = Pin<Box<dyn Stream<Item = FrameResult<GrayFrame>> + Send>>;

pub type DynFrameSource = Arc<dyn FrameSource>;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VideoMetadata {
    pub duration: Option<Duration>,
    pub fps: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub total_frames: Option<u64>,
}

impl VideoMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duration_and_fps(duration: Duration, fps: f64) -> Self {
        Self {
            duration: Some(duration),
            fps: Some(fps),
            ..Default::default()
        }
    }

    pub fn duration_ms(&self) -> Option<f64> {
        self.duration.map(|d| d.as_secs_f64() * 1000.0)
    }

    pub fn calculate_total_frames(&self) -> Option<u64> {
        if let Some(total) = self.total_frames {
            return Some(total);
        }

        if let (Some(duration), Some(fps)) = (self.duration, self.fps) {
            let seconds = duration.as_secs_f64();
            let total = (seconds * fps).round();
            if total.is_finite() && total >= 0.0 {
                return Some(total as u64);
            }
        }

        None
    }

    pub fn aspect_ratio(&self) -> Option<f64> {
        match (self.width, self.height) {
            (Some(width), Some(height)) if height > 0 => Some(width as f64 / height as f64),
            _ => None,
        }
    }
}

/// An opened video that can be streamed window by window.
///
/// Each call to [`FrameSource::stream_frames`] starts one long-lived decode
/// for the requested window; frames carry their absolute index.
pub trait FrameSource: Send + Sync + 'static {
    fn backend(&self) -> &'static str;

    fn metadata(&self) -> VideoMetadata {
        VideoMetadata::default()
    }

    fn stream_frames(&self, start_frame: u64, count: u64, cancel: CancellationToken)
    -> FrameStream;
}

pub fn spawn_stream_from_channel(
    capacity: usize,
    task: impl FnOnce(Sender<FrameResult<GrayFrame>>) + Send + 'static,
) -> FrameStream {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::task::spawn_blocking(move || task(tx));
    let stream = unfold(rx, |mut receiver| async {
        receiver.recv().await.map(|item| (item, receiver))
    });
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[test]
    fn total_frames_falls_back_to_duration() {
        let metadata = VideoMetadata::with_duration_and_fps(Duration::from_secs(10), 29.97);
        assert_eq!(metadata.calculate_total_frames(), Some(300));

        let explicit = VideoMetadata {
            total_frames: Some(42),
            ..metadata
        };
        assert_eq!(explicit.calculate_total_frames(), Some(42));
        assert_eq!(VideoMetadata::new().calculate_total_frames(), None);
    }

    #[test]
    fn aspect_ratio_requires_dimensions() {
        let metadata = VideoMetadata {
            width: Some(3840),
            height: Some(1920),
            ..Default::default()
        };
        assert_eq!(metadata.aspect_ratio(), Some(2.0));
        assert_eq!(VideoMetadata::new().aspect_ratio(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn spawn_stream_from_channel_pushes_values() {
        let mut stream = spawn_stream_from_channel(2, move |tx| {
            let frame = GrayFrame::from_owned(2, 2, 2, None, vec![1, 2, 3, 4])
                .unwrap()
                .with_frame_index(Some(5));
            tx.blocking_send(Ok(frame)).unwrap();
        });
        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!(frame.data(), &[1, 2, 3, 4]);
        assert_eq!(frame.frame_index(), Some(5));
        assert!(stream.next().await.is_none());
    }
}
