#![cfg(feature = "backend-ffmpeg")]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ffmpeg::util::error::{EAGAIN, EWOULDBLOCK};
use ffmpeg_next as ffmpeg;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{
    DynFrameSource, FrameError, FrameResult, FrameSource, FrameStream, GrayFrame, VideoMetadata,
    spawn_stream_from_channel,
};

const BACKEND_NAME: &str = "ffmpeg";
const AV_TIME_BASE: f64 = 1_000_000.0;

pub struct FfmpegSource {
    input: PathBuf,
    metadata: VideoMetadata,
    channel_capacity: usize,
}

enum Flow {
    Continue,
    Stop,
}

fn backend_err(err: impl ToString) -> FrameError {
    FrameError::backend_failure(BACKEND_NAME, err.to_string())
}

impl FfmpegSource {
    pub fn open<P: AsRef<Path>>(path: P, channel_capacity: Option<usize>) -> FrameResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("input file {} does not exist", path.display()),
            )));
        }
        ffmpeg::init().map_err(backend_err)?;
        let metadata = probe_metadata(path)?;
        tracing::debug!(
            path = %path.display(),
            fps = ?metadata.fps,
            total_frames = ?metadata.total_frames,
            "opened ffmpeg source"
        );
        Ok(Self {
            input: path.to_path_buf(),
            metadata,
            channel_capacity: channel_capacity.unwrap_or(8).max(1),
        })
    }

    fn decode_window(
        &self,
        start_frame: u64,
        count: u64,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<FrameResult<GrayFrame>>,
    ) -> FrameResult<()> {
        let fps = self.metadata.fps.filter(|fps| *fps > 0.0).unwrap_or(30.0);
        let end_frame = start_frame.saturating_add(count);

        let mut ictx = ffmpeg::format::input(&self.input).map_err(backend_err)?;
        let input_stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| backend_err("no video stream found"))?;
        let stream_index = input_stream.index();
        let time_base = input_stream.time_base();

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(backend_err)?;
        let mut decoder = context.decoder().video().map_err(backend_err)?;

        if start_frame > 0 {
            let target = (start_frame as f64 / fps * AV_TIME_BASE) as i64;
            ictx.seek(target, ..target).map_err(backend_err)?;
        }

        let mut scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::pixel::Pixel::GRAY8,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::FAST_BILINEAR,
        )
        .map_err(backend_err)?;

        let mut decoded = ffmpeg::util::frame::Video::empty();
        let mut converted = ffmpeg::util::frame::Video::empty();

        let mut drain = |decoder: &mut ffmpeg::decoder::Video| -> FrameResult<Flow> {
            loop {
                if cancel.is_cancelled() {
                    return Ok(Flow::Stop);
                }
                match decoder.receive_frame(&mut decoded) {
                    Ok(_) => {
                        let index = decoded
                            .pts()
                            .map(|pts| (pts as f64 * f64::from(time_base) * fps).round() as u64)
                            .unwrap_or(start_frame);
                        if index < start_frame {
                            continue;
                        }
                        if index >= end_frame {
                            return Ok(Flow::Stop);
                        }
                        scaler.run(&decoded, &mut converted).map_err(backend_err)?;
                        converted.set_pts(decoded.pts());
                        let frame = frame_from_converted(&converted, time_base)?
                            .with_frame_index(Some(index));
                        if tx.blocking_send(Ok(frame)).is_err() {
                            return Ok(Flow::Stop);
                        }
                    }
                    Err(err) => {
                        if is_retryable_error(&err) || matches!(err, ffmpeg::Error::Eof) {
                            return Ok(Flow::Continue);
                        }
                        return Err(backend_err(err));
                    }
                }
            }
        };

        for (stream, packet) in ictx.packets() {
            if stream.index() != stream_index {
                continue;
            }
            if let Err(err) = decoder.send_packet(&packet) {
                if !is_retryable_error(&err) {
                    return Err(backend_err(err));
                }
            }
            if let Flow::Stop = drain(&mut decoder)? {
                return Ok(());
            }
        }

        decoder.send_eof().map_err(backend_err)?;
        drain(&mut decoder)?;
        Ok(())
    }
}

impl FrameSource for FfmpegSource {
    fn backend(&self) -> &'static str {
        BACKEND_NAME
    }

    fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn stream_frames(
        &self,
        start_frame: u64,
        count: u64,
        cancel: CancellationToken,
    ) -> FrameStream {
        let input = self.input.clone();
        let metadata = self.metadata;
        let capacity = self.channel_capacity;
        spawn_stream_from_channel(capacity, move |tx| {
            let source = FfmpegSource {
                input,
                metadata,
                channel_capacity: capacity,
            };
            if let Err(err) = source.decode_window(start_frame, count, &cancel, &tx) {
                let _ = tx.blocking_send(Err(err));
            }
        })
    }
}

fn probe_metadata(path: &Path) -> FrameResult<VideoMetadata> {
    let ictx = ffmpeg::format::input(&path).map_err(backend_err)?;
    let stream = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| backend_err("no video stream found"))?;

    let rate = f64::from(stream.avg_frame_rate());
    let fps = (rate.is_finite() && rate > 0.0).then_some(rate);
    let duration = (ictx.duration() > 0)
        .then(|| Duration::from_secs_f64(ictx.duration() as f64 / AV_TIME_BASE));
    let total_frames = (stream.frames() > 0).then(|| stream.frames() as u64);

    let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .map_err(backend_err)?;
    let decoder = context.decoder().video().map_err(backend_err)?;

    let metadata = VideoMetadata {
        duration,
        fps,
        width: Some(decoder.width()),
        height: Some(decoder.height()),
        total_frames,
    };
    Ok(VideoMetadata {
        total_frames: metadata.calculate_total_frames(),
        ..metadata
    })
}

fn frame_from_converted(
    frame: &ffmpeg::util::frame::Video,
    time_base: ffmpeg::Rational,
) -> FrameResult<GrayFrame> {
    let plane = frame.data(0);
    let stride = frame.stride(0);
    let width = frame.width();
    let height = frame.height();
    let mut buffer = Vec::with_capacity(stride * height as usize);
    for row in 0..height as usize {
        let offset = row * stride;
        buffer.extend_from_slice(&plane[offset..offset + stride]);
    }
    let timestamp = frame.pts().map(|pts| {
        let seconds = pts as f64 * f64::from(time_base);
        Duration::from_secs_f64(seconds.max(0.0))
    });
    GrayFrame::from_owned(width, height, stride, timestamp, buffer)
}

fn is_retryable_error(error: &ffmpeg::Error) -> bool {
    matches!(
        error,
        ffmpeg::Error::Other { errno }
            if *errno == EAGAIN || *errno == EWOULDBLOCK
    )
}

pub fn boxed_ffmpeg<P: AsRef<Path>>(
    path: P,
    channel_capacity: Option<usize>,
) -> FrameResult<DynFrameSource> {
    Ok(Arc::new(FfmpegSource::open(path, channel_capacity)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_returns_error() {
        let result = FfmpegSource::open("/tmp/nonexistent-fungen-input.mp4", None);
        assert!(matches!(result, Err(FrameError::Io(_))));
    }
}
