use std::env;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;

#[cfg(feature = "backend-ffmpeg")]
use std::sync::OnceLock;

use crate::core::{DynFrameSource, FrameError, FrameResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Mock,
    Ffmpeg,
}

impl FromStr for Backend {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Backend::Mock),
            "ffmpeg" => Ok(Backend::Ffmpeg),
            other => Err(FrameError::configuration(format!(
                "unknown backend '{other}'"
            ))),
        }
    }
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Mock => "mock",
            Backend::Ffmpeg => "ffmpeg",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn compiled_backends() -> Vec<Backend> {
    let mut backends = Vec::new();
    #[cfg(feature = "backend-ffmpeg")]
    {
        if ffmpeg_runtime_available() {
            backends.push(Backend::Ffmpeg);
        }
    }
    if mock_enabled() {
        backends.push(Backend::Mock);
    }
    backends
}

/// Synthetic frames are only offered when built with `backend-mock`.
fn mock_enabled() -> bool {
    cfg!(feature = "backend-mock")
}

#[cfg(feature = "backend-ffmpeg")]
fn ffmpeg_runtime_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| match ffmpeg_next::init() {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "ffmpeg backend disabled: failed to initialize libraries");
            false
        }
    })
}

#[derive(Debug, Clone)]
pub struct Configuration {
    pub backend: Backend,
    pub input: Option<PathBuf>,
    pub channel_capacity: Option<NonZeroUsize>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            backend: Backend::Ffmpeg,
            input: None,
            channel_capacity: None,
        }
    }
}

impl Configuration {
    pub fn from_env() -> FrameResult<Self> {
        let mut config = Configuration::default();
        if let Ok(backend) = env::var("FUNGEN_BACKEND") {
            config.backend = Backend::from_str(&backend)?;
        }
        if let Ok(path) = env::var("FUNGEN_INPUT") {
            config.input = Some(PathBuf::from(path));
        }
        if let Ok(capacity) = env::var("FUNGEN_CHANNEL_CAPACITY") {
            let parsed: usize = capacity.parse().map_err(|_| {
                FrameError::configuration(format!(
                    "failed to parse FUNGEN_CHANNEL_CAPACITY='{capacity}' as a positive integer"
                ))
            })?;
            let Some(value) = NonZeroUsize::new(parsed) else {
                return Err(FrameError::configuration(
                    "FUNGEN_CHANNEL_CAPACITY must be greater than zero",
                ));
            };
            config.channel_capacity = Some(value);
        }
        Ok(config)
    }

    pub fn available_backends() -> Vec<Backend> {
        compiled_backends()
    }

    /// Opens the configured input, returning a source that can be streamed repeatedly.
    pub fn create_provider(&self) -> FrameResult<DynFrameSource> {
        let channel_capacity = self.channel_capacity.map(NonZeroUsize::get);

        match self.backend {
            Backend::Mock => {
                if !mock_enabled() {
                    return Err(FrameError::unsupported("mock"));
                }
                crate::backends::mock::boxed_mock(channel_capacity)
            }
            Backend::Ffmpeg => {
                #[cfg(feature = "backend-ffmpeg")]
                {
                    let path = self.input.clone().ok_or_else(|| {
                        FrameError::configuration("FFmpeg backend requires an input path")
                    })?;
                    crate::backends::ffmpeg::boxed_ffmpeg(path, channel_capacity)
                }
                #[cfg(not(feature = "backend-ffmpeg"))]
                {
                    Err(FrameError::unsupported("ffmpeg"))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_round_trip() {
        for backend in [Backend::Mock, Backend::Ffmpeg] {
            assert_eq!(Backend::from_str(backend.as_str()).unwrap(), backend);
        }
        assert_eq!(Backend::from_str("MOCK").unwrap(), Backend::Mock);
        assert!(matches!(
            Backend::from_str("vlc"),
            Err(FrameError::Configuration { .. })
        ));
    }

    #[test]
    fn default_backend_decodes_real_video() {
        assert_eq!(Configuration::default().backend, Backend::Ffmpeg);
    }

    #[cfg(not(feature = "backend-mock"))]
    #[test]
    fn mock_is_rejected_unless_enabled() {
        assert!(!Configuration::available_backends().contains(&Backend::Mock));
        let config = Configuration {
            backend: Backend::Mock,
            input: Some(PathBuf::from("/missing/video.mp4")),
            channel_capacity: None,
        };
        assert!(matches!(
            config.create_provider(),
            Err(FrameError::Unsupported { backend: "mock" })
        ));
    }

    #[cfg(feature = "backend-mock")]
    #[test]
    fn mock_provider_opens_without_input() {
        let config = Configuration {
            backend: Backend::Mock,
            input: None,
            channel_capacity: NonZeroUsize::new(2),
        };
        let source = config.create_provider().unwrap();
        assert_eq!(source.backend(), "mock");
    }

    #[cfg(not(feature = "backend-ffmpeg"))]
    #[test]
    fn ffmpeg_is_unsupported_without_feature() {
        let config = Configuration {
            backend: Backend::Ffmpeg,
            input: Some(PathBuf::from("video.mp4")),
            channel_capacity: None,
        };
        assert!(matches!(
            config.create_provider(),
            Err(FrameError::Unsupported { backend: "ffmpeg" })
        ));
    }
}
