use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

/// Lifecycle of the full analysis pipeline.
#[derive(Debug, Clone, Default)]
pub enum PipelineRunState {
    #[default]
    Idle,
    Running {
        stage: u8,
        cancel: CancellationToken,
    },
    /// Abort was requested; the thread has not unwound yet.
    Aborting { cancel: CancellationToken },
}

impl PipelineRunState {
    /// `0` idle, `1..=3` running that stage, `-1` aborting.
    pub fn stage_code(&self) -> i8 {
        match self {
            PipelineRunState::Idle => 0,
            PipelineRunState::Running { stage, .. } => *stage as i8,
            PipelineRunState::Aborting { .. } => -1,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, PipelineRunState::Idle)
    }

    pub fn cancel_token(&self) -> Option<&CancellationToken> {
        match self {
            PipelineRunState::Idle => None,
            PipelineRunState::Running { cancel, .. } | PipelineRunState::Aborting { cancel } => {
                Some(cancel)
            }
        }
    }
}

/// Run state shared between the owning thread and the pipeline thread.
#[derive(Debug, Clone, Default)]
pub struct SharedRunState(Arc<Mutex<PipelineRunState>>);

impl SharedRunState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PipelineRunState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> PipelineRunState {
        self.lock().clone()
    }

    pub fn stage_code(&self) -> i8 {
        self.lock().stage_code()
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_active()
    }

    /// Moves `Idle` to `Running { stage: 1 }`. Returns `false` if a run is alive.
    pub fn try_start(&self, cancel: CancellationToken) -> bool {
        let mut state = self.lock();
        if state.is_active() {
            return false;
        }
        *state = PipelineRunState::Running { stage: 1, cancel };
        true
    }

    /// Advances a running pipeline. An aborting pipeline stays aborting.
    pub fn set_stage(&self, next: u8) {
        let mut state = self.lock();
        if let PipelineRunState::Running { stage, .. } = &mut *state {
            *stage = next;
        }
    }

    /// Cancels the run and marks it aborting. Returns `false` when idle.
    pub fn abort(&self) -> bool {
        let mut state = self.lock();
        let cancel = match &*state {
            PipelineRunState::Idle => return false,
            PipelineRunState::Running { cancel, .. } | PipelineRunState::Aborting { cancel } => {
                cancel.clone()
            }
        };
        cancel.cancel();
        *state = PipelineRunState::Aborting { cancel };
        true
    }

    pub fn finish(&self) {
        *self.lock() = PipelineRunState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_run_lifecycle() {
        let state = SharedRunState::new();
        assert_eq!(state.stage_code(), 0);
        assert!(!state.abort());

        let cancel = CancellationToken::new();
        assert!(state.try_start(cancel.clone()));
        assert!(!state.try_start(CancellationToken::new()));
        state.set_stage(2);
        assert_eq!(state.stage_code(), 2);

        assert!(state.abort());
        assert!(cancel.is_cancelled());
        assert_eq!(state.stage_code(), -1);
        state.set_stage(3);
        assert_eq!(state.stage_code(), -1);

        state.finish();
        assert!(!state.is_active());
    }
}
