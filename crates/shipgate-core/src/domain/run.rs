//! Pipeline run identity and the run state machine.
//!
//! ```text
//! INIT -> CREDENTIALED -> BUILT -> SCANNED -> PUBLISHED -> DONE
//!                                         \-> BLOCKED   -> DONE
//! any non-terminal state -> ABORTED
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::credential::RegistryScope;

/// Unique identifier for one pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        RunId(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stage of the run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStage {
    Init,
    Credentialed,
    Built,
    Scanned,
    Published,
    Blocked,
    Done,
    Aborted,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Init => "INIT",
            RunStage::Credentialed => "CREDENTIALED",
            RunStage::Built => "BUILT",
            RunStage::Scanned => "SCANNED",
            RunStage::Published => "PUBLISHED",
            RunStage::Blocked => "BLOCKED",
            RunStage::Done => "DONE",
            RunStage::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStage::Done | RunStage::Aborted)
    }

    /// Whether `self -> to` is an edge of the state machine.
    pub fn can_transition(&self, to: RunStage) -> bool {
        use RunStage::*;
        match (*self, to) {
            (Init, Credentialed)
            | (Credentialed, Built)
            | (Built, Scanned)
            | (Scanned, Published)
            | (Scanned, Blocked)
            | (Published, Done)
            | (Blocked, Done) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status surfaced to callers.
///
/// `Blocked` and `Aborted` are both failures; they stay distinct so a policy
/// block is never confused with an infrastructure failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Blocked,
    Aborted,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Blocked => "blocked",
            RunOutcome::Aborted => "aborted",
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, RunOutcome::Success)
    }

    /// Process exit code for the outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::Blocked => 1,
            RunOutcome::Aborted => 2,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Illegal state machine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("illegal transition {from} -> {to}")]
    Illegal { from: RunStage, to: RunStage },

    #[error("run already terminal at {stage}")]
    AlreadyTerminal { stage: RunStage },
}

/// One recorded edge of the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: RunStage,
    pub to: RunStage,
    pub at: DateTime<Utc>,
}

/// One execution of the pipeline. Mutated only by the orchestrator and
/// immutable once terminal.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub run_id: RunId,
    pub source_revision: String,
    pub target: RegistryScope,
    pub region: Option<String>,
    pub started_at: DateTime<Utc>,
    stage: RunStage,
    outcome: Option<RunOutcome>,
    finished_at: Option<DateTime<Utc>>,
    history: Vec<StageTransition>,
}

impl PipelineRun {
    pub fn new(
        source_revision: impl Into<String>,
        target: RegistryScope,
        region: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: RunId::new(),
            source_revision: source_revision.into(),
            target,
            region,
            started_at,
            stage: RunStage::Init,
            outcome: None,
            finished_at: None,
            history: Vec::new(),
        }
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    /// Terminal status, `None` while the run is in flight.
    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn history(&self) -> &[StageTransition] {
        &self.history
    }

    /// Move to a non-terminal stage.
    pub fn advance(&mut self, to: RunStage, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if to.is_terminal() {
            return Err(TransitionError::Illegal {
                from: self.stage,
                to,
            });
        }
        self.transition(to, at)
    }

    /// Close a run that reached `PUBLISHED` or `BLOCKED`.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<RunOutcome, TransitionError> {
        let outcome = match self.stage {
            RunStage::Published => RunOutcome::Success,
            RunStage::Blocked => RunOutcome::Blocked,
            other => {
                return Err(TransitionError::Illegal {
                    from: other,
                    to: RunStage::Done,
                })
            }
        };
        self.transition(RunStage::Done, at)?;
        self.outcome = Some(outcome);
        self.finished_at = Some(at);
        Ok(outcome)
    }

    /// Enter the absorbing `ABORTED` state. Returns the last stage reached.
    pub fn abort(&mut self, at: DateTime<Utc>) -> Result<RunStage, TransitionError> {
        let last = self.stage;
        self.transition(RunStage::Aborted, at)?;
        self.outcome = Some(RunOutcome::Aborted);
        self.finished_at = Some(at);
        Ok(last)
    }

    fn transition(&mut self, to: RunStage, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.stage.is_terminal() {
            return Err(TransitionError::AlreadyTerminal { stage: self.stage });
        }
        if !self.stage.can_transition(to) {
            return Err(TransitionError::Illegal {
                from: self.stage,
                to,
            });
        }
        self.history.push(StageTransition {
            from: self.stage,
            to,
            at,
        });
        self.stage = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_run() -> PipelineRun {
        PipelineRun::new(
            "abc123",
            RegistryScope::new("registry.example.com", "app"),
            Some("eu-west-1".into()),
            Utc::now(),
        )
    }

    #[test]
    fn happy_path_publishes() {
        let mut run = new_run();
        let now = Utc::now();
        for stage in [
            RunStage::Credentialed,
            RunStage::Built,
            RunStage::Scanned,
            RunStage::Published,
        ] {
            run.advance(stage, now).expect("advance");
        }
        assert_eq!(run.outcome(), None);
        assert_eq!(run.complete(now).unwrap(), RunOutcome::Success);
        assert_eq!(run.stage(), RunStage::Done);
        assert_eq!(run.history().len(), 5);
    }

    #[test]
    fn blocked_path_completes_as_blocked() {
        let mut run = new_run();
        let now = Utc::now();
        for stage in [
            RunStage::Credentialed,
            RunStage::Built,
            RunStage::Scanned,
            RunStage::Blocked,
        ] {
            run.advance(stage, now).unwrap();
        }
        assert_eq!(run.complete(now).unwrap(), RunOutcome::Blocked);
        assert!(run.outcome().unwrap().is_failure());
    }

    #[test]
    fn cannot_skip_stages() {
        let mut run = new_run();
        let err = run.advance(RunStage::Built, Utc::now()).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Illegal {
                from: RunStage::Init,
                to: RunStage::Built
            }
        );
    }

    #[test]
    fn cannot_complete_before_decision() {
        let mut run = new_run();
        run.advance(RunStage::Credentialed, Utc::now()).unwrap();
        assert!(run.complete(Utc::now()).is_err());
    }

    #[test]
    fn abort_is_absorbing() {
        let mut run = new_run();
        let now = Utc::now();
        run.advance(RunStage::Credentialed, now).unwrap();
        assert_eq!(run.abort(now).unwrap(), RunStage::Credentialed);
        assert_eq!(run.outcome(), Some(RunOutcome::Aborted));

        assert!(matches!(
            run.advance(RunStage::Built, now),
            Err(TransitionError::AlreadyTerminal { .. })
        ));
        assert!(run.abort(now).is_err());
        assert_eq!(run.outcome(), Some(RunOutcome::Aborted));
    }

    #[test]
    fn done_run_is_immutable() {
        let mut run = new_run();
        let now = Utc::now();
        for stage in [
            RunStage::Credentialed,
            RunStage::Built,
            RunStage::Scanned,
            RunStage::Blocked,
        ] {
            run.advance(stage, now).unwrap();
        }
        run.complete(now).unwrap();
        assert!(run.abort(now).is_err());
        assert_eq!(run.outcome(), Some(RunOutcome::Blocked));
    }

    #[test]
    fn advance_refuses_terminal_targets() {
        let mut run = new_run();
        assert!(run.advance(RunStage::Aborted, Utc::now()).is_err());
        assert!(run.advance(RunStage::Done, Utc::now()).is_err());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(RunOutcome::Success.exit_code(), 0);
        assert_eq!(RunOutcome::Blocked.exit_code(), 1);
        assert_eq!(RunOutcome::Aborted.exit_code(), 2);
    }
}
