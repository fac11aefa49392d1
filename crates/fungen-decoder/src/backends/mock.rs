use std::f64::consts::TAU;
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

use crate::core::{
    DynFrameSource, FrameResult, FrameSource, FrameStream, GrayFrame, VideoMetadata,
    spawn_stream_from_channel,
};

const BACKEND_NAME: &str = "mock";

/// Synthetic source whose textured content slides vertically in a sine wave.
#[derive(Debug, Clone)]
pub struct MockSource {
    width: u32,
    height: u32,
    frame_count: u64,
    fps: f64,
    amplitude: f64,
    period_frames: f64,
    frame_interval: Duration,
    channel_capacity: usize,
}

impl MockSource {
    const DEFAULT_CHANNEL_CAPACITY: usize = 8;

    pub fn new(channel_capacity: Option<usize>) -> Self {
        Self {
            width: 320,
            height: 180,
            frame_count: 300,
            fps: 30.0,
            amplitude: 6.0,
            period_frames: 30.0,
            frame_interval: Duration::ZERO,
            channel_capacity: channel_capacity
                .unwrap_or(Self::DEFAULT_CHANNEL_CAPACITY)
                .max(1),
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_frame_count(mut self, frame_count: u64) -> Self {
        self.frame_count = frame_count;
        self
    }

    pub fn with_motion(mut self, amplitude: f64, period_frames: f64) -> Self {
        self.amplitude = amplitude;
        self.period_frames = period_frames.max(1.0);
        self
    }

    /// Vertical content offset in pixels for a frame.
    pub fn offset_for(&self, index: u64) -> i64 {
        let phase = TAU * index as f64 / self.period_frames;
        (self.amplitude * phase.sin()).round() as i64
    }

    fn render(&self, index: u64) -> FrameResult<GrayFrame> {
        let stride = self.width as usize;
        let offset = self.offset_for(index);
        let mut buffer = vec![0u8; stride * self.height as usize];
        for (row, chunk) in buffer.chunks_mut(stride).enumerate() {
            let source_row = row as i64 - offset;
            for (col, pixel) in chunk.iter_mut().enumerate() {
                *pixel = texture(col as i64, source_row);
            }
        }
        let timestamp = Some(Duration::from_secs_f64(index as f64 / self.fps));
        GrayFrame::from_owned(self.width, self.height, stride, timestamp, buffer)
            .map(|frame| frame.with_frame_index(Some(index)))
    }

    fn emit_frames(
        &self,
        start_frame: u64,
        count: u64,
        cancel: CancellationToken,
        tx: Sender<FrameResult<GrayFrame>>,
    ) {
        let end = start_frame.saturating_add(count).min(self.frame_count);
        for index in start_frame..end {
            if cancel.is_cancelled() || tx.is_closed() {
                break;
            }
            if tx.blocking_send(self.render(index)).is_err() {
                break;
            }
            if !self.frame_interval.is_zero() {
                thread::sleep(self.frame_interval);
            }
        }
    }
}

impl FrameSource for MockSource {
    fn backend(&self) -> &'static str {
        BACKEND_NAME
    }

    fn metadata(&self) -> VideoMetadata {
        VideoMetadata {
            duration: Some(Duration::from_secs_f64(self.frame_count as f64 / self.fps)),
            fps: Some(self.fps),
            width: Some(self.width),
            height: Some(self.height),
            total_frames: Some(self.frame_count),
        }
    }

    fn stream_frames(
        &self,
        start_frame: u64,
        count: u64,
        cancel: CancellationToken,
    ) -> FrameStream {
        let source = self.clone();
        let capacity = source.channel_capacity;
        spawn_stream_from_channel(capacity, move |tx| {
            source.emit_frames(start_frame, count, cancel, tx);
        })
    }
}

fn texture(x: i64, y: i64) -> u8 {
    let mut h = (x as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (y as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    h ^= h >> 29;
    h = h.wrapping_mul(0x1656_67B1_9E37_79F9);
    h ^= h >> 32;
    (h & 0xFF) as u8
}

pub fn boxed_mock(channel_capacity: Option<usize>) -> FrameResult<DynFrameSource> {
    Ok(std::sync::Arc::new(MockSource::new(channel_capacity)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test(flavor = "multi_thread")]
    async fn mock_source_streams_requested_window() {
        let source = MockSource::new(None);
        let metadata = source.metadata();
        assert_eq!(metadata.total_frames, Some(300));
        assert_eq!(metadata.fps, Some(30.0));

        let mut stream = source.stream_frames(10, 3, CancellationToken::new());
        let mut indices = Vec::new();
        while let Some(frame) = stream.next().await {
            let frame = frame.unwrap();
            assert_eq!(frame.width(), 320);
            assert_eq!(frame.data().len(), 320 * 180);
            indices.push(frame.frame_index().unwrap());
        }
        assert_eq!(indices, vec![10, 11, 12]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mock_source_stops_at_end_of_video() {
        let source = MockSource::new(Some(2)).with_frame_count(5);
        let stream = source.stream_frames(3, 10, CancellationToken::new());
        let frames: Vec<_> = stream.collect().await;
        assert_eq!(frames.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_token_ends_stream() {
        let source = MockSource::new(None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let frames: Vec<_> = source.stream_frames(0, 100, cancel).collect().await;
        assert!(frames.is_empty());
    }

    #[test]
    fn content_shifts_by_offset() {
        let source = MockSource::new(None).with_motion(4.0, 8.0);
        let first = source.render(0).unwrap();
        let second = source.render(2).unwrap();
        let shift = source.offset_for(2) - source.offset_for(0);
        assert_eq!(shift, 4);
        assert_eq!(second.row(10), first.row(6));
    }
}
