pub mod backends;
pub mod config;
pub mod core;

pub use config::{Backend, Configuration};
pub use core::{
    DynFrameSource, FrameError, FrameResult, FrameSource, FrameStream, GrayFrame, VideoMetadata,
    spawn_stream_from_channel,
};
