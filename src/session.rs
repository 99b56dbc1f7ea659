//! Trim sessions: the public entry point of the engine.
//!
//! A session validates its request, runs the remux pipeline and reports
//! through a [`TrimObserver`]: any number of progress values, then exactly one
//! terminal success or error. [`spawn_trim`] runs a session on a blocking
//! worker and delivers the same notifications as [`TrimEvent`]s.

use crate::error::{ErrorKind, Result, TrimError};
use crate::pipeline::{self, PipelineListener, Stage, TrimOptions, TrimOutcome, TrimRange};
use serde::Serialize;
use std::any::Any;
use std::fs::File;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Source, destination and window of one trim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub start_micros: i64,
    pub end_micros: i64,
}

impl TrimRequest {
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        start_micros: i64,
        end_micros: i64,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            start_micros,
            end_micros,
        }
    }

    pub fn range(&self) -> TrimRange {
        TrimRange::new(self.start_micros, self.end_micros)
    }

    /// Check every precondition that can be checked without opening the
    /// source as a container.
    pub fn validate(&self) -> Result<()> {
        if is_blank(&self.input) {
            return Err(TrimError::invalid_input("input path is blank"));
        }
        if is_blank(&self.output) {
            return Err(TrimError::invalid_input("output path is blank"));
        }

        let meta = std::fs::metadata(&self.input).map_err(|e| {
            TrimError::invalid_input(format!("input {} does not exist: {}", self.input.display(), e))
        })?;
        if !meta.is_file() {
            return Err(TrimError::invalid_input(format!(
                "input {} is not a regular file",
                self.input.display()
            )));
        }
        File::open(&self.input).map_err(|e| {
            TrimError::invalid_input(format!("input {} is not readable: {}", self.input.display(), e))
        })?;
        // Creating the output truncates it while the source is still read.
        if let (Ok(input), Ok(output)) = (self.input.canonicalize(), self.output.canonicalize()) {
            if input == output {
                return Err(TrimError::invalid_input(format!(
                    "output {} is the input file",
                    self.output.display()
                )));
            }
        }

        if self.start_micros < 0 {
            return Err(TrimError::invalid_input(format!(
                "start {}us is negative",
                self.start_micros
            )));
        }
        if self.end_micros <= self.start_micros {
            return Err(TrimError::invalid_input(format!(
                "end {}us must be after start {}us",
                self.end_micros, self.start_micros
            )));
        }
        Ok(())
    }
}

fn is_blank(path: &Path) -> bool {
    path.to_string_lossy().trim().is_empty()
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    Validating,
    Resolving,
    Muxing,
    Finalizing,
    Completed,
    Failed(ErrorKind),
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed(_))
    }

    /// Whether `next` directly follows this state.
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Validating, Resolving)
            | (Resolving, Muxing)
            | (Muxing, Finalizing)
            | (Finalizing, Completed) => true,
            (from, Failed(_)) => !from.is_terminal(),
            _ => false,
        }
    }

    fn advance(&mut self, next: SessionState) -> Result<()> {
        if !self.can_transition(next) {
            return Err(TrimError::Internal(format!(
                "illegal session transition {:?} -> {:?}",
                self, next
            )));
        }
        tracing::trace!(from = ?self, to = ?next, "Session transition");
        *self = next;
        Ok(())
    }
}

/// Terminal failure as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TrimFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&TrimError> for TrimFailure {
    fn from(err: &TrimError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<TrimError> for TrimFailure {
    fn from(err: TrimError) -> Self {
        Self::from(&err)
    }
}

/// Receives the notifications of one session.
pub trait TrimObserver {
    /// Progress in `[0, 1]`, non-decreasing.
    fn on_progress(&mut self, _ratio: f32) {}

    fn on_success(&mut self, outcome: TrimOutcome);

    fn on_error(&mut self, failure: TrimFailure);
}

/// One trim operation, run at most once.
#[derive(Debug)]
pub struct TrimSession {
    request: TrimRequest,
    options: TrimOptions,
    state: SessionState,
}

impl TrimSession {
    pub fn new(request: TrimRequest, options: TrimOptions) -> Self {
        Self {
            request,
            options,
            state: SessionState::Validating,
        }
    }

    /// Run `request` with default options on the current thread.
    pub fn trim<O: TrimObserver + ?Sized>(request: TrimRequest, observer: &mut O) {
        Self::new(request, TrimOptions::default()).run(observer)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion, blocking the current thread.
    ///
    /// Exactly one of [`TrimObserver::on_success`] and
    /// [`TrimObserver::on_error`] is called. Running a session a second time
    /// reports an internal error and leaves its state unchanged.
    pub fn run<O: TrimObserver + ?Sized>(&mut self, observer: &mut O) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute(&mut *observer)))
            .unwrap_or_else(|payload| {
                Err(TrimError::Internal(format!(
                    "trim worker panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        let result = result.and_then(|outcome| {
            self.state.advance(SessionState::Completed)?;
            Ok(outcome)
        });

        match result {
            Ok(outcome) => {
                tracing::debug!(output = %outcome.output_path.display(), "Session completed");
                observer.on_success(outcome);
            }
            Err(err) => {
                tracing::error!(
                    input = %self.request.input.display(),
                    kind = %err.kind(),
                    "Trim failed: {}",
                    err
                );
                if !self.state.is_terminal() {
                    self.state = SessionState::Failed(err.kind());
                }
                observer.on_error(TrimFailure::from(&err));
            }
        }
    }

    fn execute<O: TrimObserver + ?Sized>(&mut self, observer: &mut O) -> Result<TrimOutcome> {
        if self.state != SessionState::Validating {
            return Err(TrimError::Internal(format!(
                "session already ran (state {:?})",
                self.state
            )));
        }
        self.request.validate()?;

        tracing::debug!(
            input = %self.request.input.display(),
            output = %self.request.output.display(),
            start_micros = self.request.start_micros,
            end_micros = self.request.end_micros,
            "Starting trim"
        );

        let mut listener = SessionListener {
            state: &mut self.state,
            observer,
            fault: None,
        };
        let outcome = pipeline::remux_file(
            &self.request.input,
            &self.request.output,
            self.request.range(),
            &self.options,
            &mut listener,
        )?;

        match listener.fault.take() {
            Some(fault) => Err(fault),
            None => Ok(outcome),
        }
    }
}

/// Bridges pipeline stages onto the session state and forwards progress.
struct SessionListener<'a, O: ?Sized> {
    state: &'a mut SessionState,
    observer: &'a mut O,
    fault: Option<TrimError>,
}

impl<O: TrimObserver + ?Sized> PipelineListener for SessionListener<'_, O> {
    fn on_stage(&mut self, stage: Stage) {
        let next = match stage {
            Stage::Resolving => SessionState::Resolving,
            Stage::Muxing => SessionState::Muxing,
            Stage::Finalizing => SessionState::Finalizing,
        };
        if let Err(e) = self.state.advance(next) {
            self.fault.get_or_insert(e);
        }
    }

    fn on_progress(&mut self, ratio: f32) {
        self.observer.on_progress(ratio);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Notification delivered by [`spawn_trim`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TrimEvent {
    Progress(f32),
    Success(TrimOutcome),
    Error(TrimFailure),
}

impl TrimEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TrimEvent::Progress(_))
    }
}

struct ChannelObserver {
    tx: mpsc::UnboundedSender<TrimEvent>,
}

impl TrimObserver for ChannelObserver {
    fn on_progress(&mut self, ratio: f32) {
        let _ = self.tx.send(TrimEvent::Progress(ratio));
    }

    fn on_success(&mut self, outcome: TrimOutcome) {
        let _ = self.tx.send(TrimEvent::Success(outcome));
    }

    fn on_error(&mut self, failure: TrimFailure) {
        let _ = self.tx.send(TrimEvent::Error(failure));
    }
}

/// Receiving end of a spawned trim.
#[derive(Debug)]
pub struct TrimHandle {
    events: mpsc::UnboundedReceiver<TrimEvent>,
}

impl TrimHandle {
    /// Next notification; `None` once the terminal event has been taken.
    pub async fn next_event(&mut self) -> Option<TrimEvent> {
        self.events.recv().await
    }

    /// Wait for the terminal event, discarding progress.
    pub async fn wait(self) -> std::result::Result<TrimOutcome, TrimFailure> {
        self.wait_with_progress(|_| {}).await
    }

    /// Wait for the terminal event, passing progress to `on_progress`.
    pub async fn wait_with_progress(
        mut self,
        mut on_progress: impl FnMut(f32),
    ) -> std::result::Result<TrimOutcome, TrimFailure> {
        while let Some(event) = self.events.recv().await {
            match event {
                TrimEvent::Progress(ratio) => on_progress(ratio),
                TrimEvent::Success(outcome) => return Ok(outcome),
                TrimEvent::Error(failure) => return Err(failure),
            }
        }
        Err(TrimFailure {
            kind: ErrorKind::Internal,
            message: "trim worker exited without a result".to_string(),
        })
    }
}

/// Run a trim on Tokio's blocking pool.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_trim(request: TrimRequest, options: TrimOptions) -> TrimHandle {
    let (tx, rx) = mpsc::unbounded_channel();

    let worker_tx = tx.clone();
    let worker = tokio::task::spawn_blocking(move || {
        let mut observer = ChannelObserver { tx: worker_tx };
        TrimSession::new(request, options).run(&mut observer);
    });

    tokio::spawn(async move {
        if let Err(e) = worker.await {
            tracing::error!("Trim worker did not complete: {}", e);
            let _ = tx.send(TrimEvent::Error(TrimFailure {
                kind: ErrorKind::Internal,
                message: format!("trim worker did not complete: {}", e),
            }));
        }
    });

    TrimHandle { events: rx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        progress: Vec<f32>,
        successes: Vec<TrimOutcome>,
        errors: Vec<TrimFailure>,
    }

    impl TrimObserver for Recorder {
        fn on_progress(&mut self, ratio: f32) {
            self.progress.push(ratio);
        }

        fn on_success(&mut self, outcome: TrimOutcome) {
            self.successes.push(outcome);
        }

        fn on_error(&mut self, failure: TrimFailure) {
            self.errors.push(failure);
        }
    }

    fn input_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("in.mp4");
        std::fs::write(&path, b"not really an mp4").unwrap();
        path
    }

    fn validation_error(request: TrimRequest) -> String {
        match request.validate() {
            Err(TrimError::InvalidInput(msg)) => msg,
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn request_validation() {
        let dir = TempDir::new().unwrap();
        let input = input_file(&dir);
        let output = dir.path().join("out.mp4");

        assert!(TrimRequest::new(&input, &output, 0, 1).validate().is_ok());
        assert!(validation_error(TrimRequest::new("  ", &output, 0, 1)).contains("input"));
        assert!(validation_error(TrimRequest::new(&input, "", 0, 1)).contains("output"));
        assert!(
            validation_error(TrimRequest::new(dir.path().join("nope.mp4"), &output, 0, 1))
                .contains("does not exist")
        );
        assert!(
            validation_error(TrimRequest::new(dir.path(), &output, 0, 1))
                .contains("not a regular file")
        );
        assert!(validation_error(TrimRequest::new(&input, &output, -1, 1)).contains("negative"));
        assert!(validation_error(TrimRequest::new(&input, &output, 5, 5)).contains("after start"));
        assert!(validation_error(TrimRequest::new(&input, &output, 5, 2)).contains("after start"));
    }

    #[test]
    fn output_must_differ_from_input() {
        let dir = TempDir::new().unwrap();
        let input = input_file(&dir);
        let same = dir.path().join(".").join("in.mp4");

        assert!(validation_error(TrimRequest::new(&input, &same, 0, 1)).contains("is the input"));
        assert!(validation_error(TrimRequest::new(&input, &input, 0, 1)).contains("is the input"));
        assert_eq!(std::fs::read(&input).unwrap(), b"not really an mp4");
    }

    #[test]
    fn transitions_are_linear() {
        use SessionState::*;
        assert!(Validating.can_transition(Resolving));
        assert!(Finalizing.can_transition(Completed));
        assert!(!Validating.can_transition(Muxing));
        assert!(!Muxing.can_transition(Resolving));
        assert!(Muxing.can_transition(Failed(ErrorKind::Io)));
        assert!(!Completed.can_transition(Failed(ErrorKind::Io)));
        assert!(!Failed(ErrorKind::Io).can_transition(Failed(ErrorKind::Internal)));

        let mut state = Completed;
        assert!(matches!(
            state.advance(Resolving),
            Err(TrimError::Internal(_))
        ));
        assert_eq!(state, Completed);
    }

    #[test]
    fn invalid_request_fails_once() {
        let dir = TempDir::new().unwrap();
        let input = input_file(&dir);
        let mut session = TrimSession::new(
            TrimRequest::new(&input, dir.path().join("out.mp4"), 3, 1),
            TrimOptions::default(),
        );
        let mut recorder = Recorder::default();
        session.run(&mut recorder);

        assert!(recorder.successes.is_empty());
        assert_eq!(recorder.errors.len(), 1);
        assert_eq!(recorder.errors[0].kind, ErrorKind::InvalidInput);
        assert_eq!(session.state(), SessionState::Failed(ErrorKind::InvalidInput));
        assert!(!dir.path().join("out.mp4").exists());
    }

    #[test]
    fn unparseable_source_is_extractor_failure() {
        let dir = TempDir::new().unwrap();
        let input = input_file(&dir);
        let mut recorder = Recorder::default();
        TrimSession::trim(
            TrimRequest::new(&input, dir.path().join("out.mp4"), 0, 1_000_000),
            &mut recorder,
        );
        assert_eq!(recorder.errors.len(), 1);
        assert_eq!(recorder.errors[0].kind, ErrorKind::ExtractorInit);
        assert!(recorder.progress.is_empty());
    }

    #[test]
    fn second_run_is_internal_error() {
        let dir = TempDir::new().unwrap();
        let input = input_file(&dir);
        let mut session = TrimSession::new(
            TrimRequest::new(&input, dir.path().join("out.mp4"), -1, 1),
            TrimOptions::default(),
        );
        let mut recorder = Recorder::default();
        session.run(&mut recorder);
        session.run(&mut recorder);

        assert_eq!(recorder.errors.len(), 2);
        assert_eq!(recorder.errors[1].kind, ErrorKind::Internal);
        assert_eq!(session.state(), SessionState::Failed(ErrorKind::InvalidInput));
    }

    #[test]
    fn panic_payloads() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&42u32), "unknown panic");
    }

    #[test]
    fn failure_display() {
        let failure = TrimFailure::from(TrimError::NoVideoTrack);
        assert_eq!(failure.kind, ErrorKind::NoVideoTrack);
        assert_eq!(
            failure.to_string(),
            "no video track: No video track found in source"
        );
    }

    #[tokio::test]
    async fn spawned_invalid_request_yields_one_error() {
        let mut handle = spawn_trim(
            TrimRequest::new("", "out.mp4", 0, 1),
            TrimOptions::default(),
        );
        let first = handle.next_event().await.unwrap();
        assert!(first.is_terminal());
        assert!(matches!(
            first,
            TrimEvent::Error(TrimFailure {
                kind: ErrorKind::InvalidInput,
                ..
            })
        ));
        assert!(handle.next_event().await.is_none());
    }
}
