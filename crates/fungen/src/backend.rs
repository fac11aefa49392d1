use std::num::NonZeroUsize;
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use fungen_decoder::{Backend, Configuration, DynFrameSource, FrameError};
use tracing::{info, warn};

use crate::settings::EffectiveSettings;

/// Decoder selection resolved from settings and the environment.
#[derive(Clone, Debug)]
pub struct DecoderPlan {
    pub config: Configuration,
    /// A backend named explicitly is never swapped for another.
    pub backend_locked: bool,
}

impl DecoderPlan {
    pub fn from_settings(settings: &EffectiveSettings, input: &Path) -> Result<Self, FrameError> {
        let env_backend_present = std::env::var("FUNGEN_BACKEND").is_ok();
        let mut config = Configuration::from_env()?;
        let mut backend_locked = env_backend_present;
        if let Some(name) = settings.backend.as_deref() {
            config.backend = parse_backend(name)?;
            backend_locked = true;
        }
        if let Some(capacity) = settings.channel_capacity.and_then(NonZeroUsize::new) {
            config.channel_capacity = Some(capacity);
        }
        config.input = Some(input.to_path_buf());
        Ok(Self {
            config,
            backend_locked,
        })
    }
}

/// Opens the input, falling back through the other compiled decoders when
/// the preferred one cannot open it and the choice was not locked. The
/// synthetic mock backend is never a fallback target.
pub fn open_source(plan: &DecoderPlan) -> Result<DynFrameSource, FrameError> {
    let available = Configuration::available_backends();
    if available.is_empty() {
        return Err(FrameError::configuration(
            "no decoding backend available; rebuild with a backend feature such as \"backend-ffmpeg\"",
        ));
    }
    if !available.contains(&plan.config.backend) {
        return Err(FrameError::unsupported(plan.config.backend.as_str()));
    }

    let mut attempt_config = plan.config.clone();
    let mut tried = Vec::new();

    loop {
        if !tried.contains(&attempt_config.backend) {
            tried.push(attempt_config.backend);
        }

        let started = Instant::now();
        let result = attempt_config.create_provider().and_then(|source| {
            if source.metadata().calculate_total_frames().is_none() {
                return Err(FrameError::backend_failure(
                    source.backend(),
                    "video frame count could not be determined",
                ));
            }
            Ok(source)
        });
        match result {
            Ok(source) => {
                info!(
                    backend = attempt_config.backend.as_str(),
                    elapsed = ?started.elapsed(),
                    "initialized decoder backend"
                );
                return Ok(source);
            }
            Err(err) => {
                warn!(
                    backend = attempt_config.backend.as_str(),
                    elapsed = ?started.elapsed(),
                    "decoder backend failed to initialize: {err}"
                );
                if !plan.backend_locked
                    && let Some(next_backend) = select_next_backend(&available, &tried)
                {
                    warn!(
                        "backend {failed} failed to initialize ({err}); trying {next}",
                        failed = attempt_config.backend.as_str(),
                        next = next_backend.as_str()
                    );
                    attempt_config.backend = next_backend;
                    continue;
                }
                return Err(err);
            }
        }
    }
}

pub fn display_available_backends() {
    let names: Vec<&'static str> = Configuration::available_backends()
        .iter()
        .map(Backend::as_str)
        .collect();
    if names.is_empty() {
        println!("available backends: (none compiled)");
    } else {
        println!("available backends: {}", names.join(", "));
    }
}

pub fn parse_backend(value: &str) -> Result<Backend, FrameError> {
    Backend::from_str(value)
}

fn select_next_backend(available: &[Backend], tried: &[Backend]) -> Option<Backend> {
    available
        .iter()
        .copied()
        .find(|backend| *backend != Backend::Mock && !tried.contains(backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_never_lands_on_mock() {
        let available = [Backend::Ffmpeg, Backend::Mock];
        assert_eq!(select_next_backend(&available, &[]), Some(Backend::Ffmpeg));
        assert_eq!(select_next_backend(&available, &[Backend::Ffmpeg]), None);
    }

    #[test]
    fn missing_video_fails_to_open_with_default_settings() {
        let settings = EffectiveSettings::default();
        let plan =
            DecoderPlan::from_settings(&settings, Path::new("/definitely/missing/real_video.mp4"))
                .unwrap();
        assert_eq!(plan.config.backend, Backend::Ffmpeg);
        assert!(open_source(&plan).is_err());
    }

    #[test]
    fn explicit_mock_backend_is_locked() {
        let settings = EffectiveSettings {
            backend: Some("mock".to_string()),
            ..EffectiveSettings::default()
        };
        let plan = DecoderPlan::from_settings(&settings, Path::new("clip.mp4")).unwrap();
        assert!(plan.backend_locked);
        assert_eq!(plan.config.backend, Backend::Mock);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let settings = EffectiveSettings {
            backend: Some("vlc".to_string()),
            ..EffectiveSettings::default()
        };
        assert!(DecoderPlan::from_settings(&settings, Path::new("clip.mp4")).is_err());
    }
}
