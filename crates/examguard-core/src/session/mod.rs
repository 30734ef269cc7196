//! Assessment session orchestration.
//!
//! An [`AssessmentSession`] wires the guards, the escalator, the snapshot
//! sampler and the backend together for one assessment attempt, and owns the
//! final submission.
//!
//! # Lifecycle
//!
//! 1. [`SessionBuilder::start`] attaches the visibility, fullscreen and input
//!    guards, starts the sampler, and (optionally) asks for fullscreen.
//! 2. Violations feed one [`WarningEscalator`]. When it escalates, the session
//!    claims the finalize latch on the spot and spawns the automatic pipeline
//!    on the runtime it was started on. A later `end()` cannot cancel it.
//! 3. [`AssessmentSession::finalize`] succeeds at most once: best-effort
//!    analysis, identity lookup, report submission, then navigation to the exit
//!    route. A failed attempt is re-run by the next `finalize` or by
//!    [`AssessmentSession::retry_finalize`], without touching the escalation
//!    state.
//! 4. Every subscription and the sampler timer live in one [`Teardown`],
//!    released on successful submission, [`AssessmentSession::exit`],
//!    [`AssessmentSession::end`] and drop.
//!
//! # Example
//!
//! ```rust,ignore
//! let session = AssessmentSession::builder(SessionContext::new(42))
//!     .document(document)
//!     .backend(Arc::clone(&api) as Arc<dyn AssessmentBackend>)
//!     .sink(Arc::new(CollectorLogger::new(api, Handle::current())))
//!     .navigator(navigator)
//!     .start()?;
//!
//! session.draft().set_code("print('hello')");
//! session.finalize(FinalizeTrigger::Manual).await?;
//! ```

mod finalize;
mod submission;
mod teardown;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

pub use finalize::{
    FinalizeError, FinalizeLatch, FinalizeOutcome, FinalizeStatus, FinalizeStep, FinalizeTrigger,
};
pub use submission::{DEFAULT_LANGUAGE, DraftSnapshot, SubmissionDraft};
pub use teardown::Teardown;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::{
    AssessmentBackend, BackendError, CodeAnalysis, ExecutionResult, ReportRequest,
};
use crate::camera::{FrameSource, NoCamera};
use crate::config::{FinalizeConfig, MonitorConfig};
use crate::dom::{Document, SurfaceId};
use crate::escalation::{
    DEFAULT_MAX_WARNINGS, EscalationCallback, EscalationError, EscalationState, WarningEscalator,
};
use crate::guard::{
    FullscreenGuard, InputGuard, ViolationReporter, VisibilityWatcher, request_fullscreen_on,
};
use crate::sampler::{DEFAULT_SNAPSHOT_INTERVAL, SnapshotSampler};
use crate::telemetry::EventSink;

/// Default per-step finalize timeout.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(15);

/// Default route the candidate leaves through.
pub const DEFAULT_EXIT_ROUTE: &str = "/dashboard/candidate";

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while starting a session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// A required collaborator was not supplied to the builder.
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// The warning threshold is invalid.
    #[error(transparent)]
    Escalation(#[from] EscalationError),

    /// No tokio runtime was supplied and none is current.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
}

// =============================================================================
// Collaborators
// =============================================================================

/// Moves the candidate out of the assessment UI.
pub trait Navigator: Send + Sync {
    /// Navigates to `route`.
    fn navigate(&self, route: &str);
}

/// Immutable per-attempt parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    /// Assessment being taken.
    pub assessment_id: i64,
    /// Violations tolerated before auto-submit.
    pub max_warnings: u32,
}

impl SessionContext {
    /// Context with the default threshold.
    #[must_use]
    pub const fn new(assessment_id: i64) -> Self {
        Self {
            assessment_id,
            max_warnings: DEFAULT_MAX_WARNINGS,
        }
    }

    /// Overrides the threshold.
    #[must_use]
    pub const fn with_max_warnings(mut self, max_warnings: u32) -> Self {
        self.max_warnings = max_warnings;
        self
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Collects collaborators and settings for [`AssessmentSession`].
#[must_use]
pub struct SessionBuilder {
    context: SessionContext,
    document: Option<Arc<dyn Document>>,
    backend: Option<Arc<dyn AssessmentBackend>>,
    sink: Option<Arc<dyn EventSink>>,
    navigator: Option<Arc<dyn Navigator>>,
    camera: Arc<dyn FrameSource>,
    draft: Arc<SubmissionDraft>,
    editor_surface: SurfaceId,
    fullscreen_target: SurfaceId,
    snapshot_interval: Duration,
    request_fullscreen_on_start: bool,
    step_timeout: Duration,
    exit_route: String,
    runtime: Option<Handle>,
}

impl SessionBuilder {
    fn new(context: SessionContext) -> Self {
        Self {
            context,
            document: None,
            backend: None,
            sink: None,
            navigator: None,
            camera: Arc::new(NoCamera),
            draft: Arc::new(SubmissionDraft::new()),
            editor_surface: SurfaceId::new("editor"),
            fullscreen_target: SurfaceId::new("page"),
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            request_fullscreen_on_start: true,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            exit_route: DEFAULT_EXIT_ROUTE.to_string(),
            runtime: None,
        }
    }

    /// Host document to monitor. Required.
    pub fn document(mut self, document: Arc<dyn Document>) -> Self {
        self.document = Some(document);
        self
    }

    /// Execute/analyze/identity/report collaborator. Required.
    pub fn backend(mut self, backend: Arc<dyn AssessmentBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Telemetry sink. Required.
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Exit navigation. Required.
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Webcam. Defaults to [`NoCamera`].
    pub fn camera(mut self, camera: Arc<dyn FrameSource>) -> Self {
        self.camera = camera;
        self
    }

    /// Shares an existing draft with the host.
    pub fn draft(mut self, draft: Arc<SubmissionDraft>) -> Self {
        self.draft = draft;
        self
    }

    /// Surface whose clipboard and context menu are blocked.
    pub fn editor_surface(mut self, surface: SurfaceId) -> Self {
        self.editor_surface = surface;
        self
    }

    /// Element put in fullscreen.
    pub fn fullscreen_target(mut self, target: SurfaceId) -> Self {
        self.fullscreen_target = target;
        self
    }

    /// Applies the `[monitor]` section, including `max_warnings`.
    pub fn monitor(mut self, config: &MonitorConfig) -> Self {
        self.context.max_warnings = config.max_warnings;
        self.snapshot_interval = config.snapshot_interval();
        self.request_fullscreen_on_start = config.request_fullscreen_on_start;
        self
    }

    /// Applies the `[finalize]` section.
    pub fn finalize(mut self, config: &FinalizeConfig) -> Self {
        self.step_timeout = config.step_timeout();
        self.exit_route.clone_from(&config.exit_route);
        self
    }

    /// Runtime for the sampler and finalize tasks. Defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Attaches everything and starts monitoring.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if a required collaborator is missing, the
    /// threshold is zero, or no runtime is available.
    pub fn start(self) -> Result<AssessmentSession, SessionError> {
        let document = self
            .document
            .ok_or(SessionError::MissingCollaborator("document"))?;
        let backend = self
            .backend
            .ok_or(SessionError::MissingCollaborator("backend"))?;
        let sink = self.sink.ok_or(SessionError::MissingCollaborator("sink"))?;
        let navigator = self
            .navigator
            .ok_or(SessionError::MissingCollaborator("navigator"))?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| SessionError::NoRuntime(e.to_string()))?,
        };
        let escalator = WarningEscalator::new(self.context.max_warnings)?;

        let context = self.context;
        let draft = self.draft;
        let camera = self.camera;
        let editor_surface = self.editor_surface;
        let snapshot_interval = self.snapshot_interval;
        let step_timeout = self.step_timeout;
        let exit_route = self.exit_route;
        let task_runtime = runtime.clone();

        let inner = Arc::new_cyclic(|weak: &Weak<SessionInner>| {
            let escalator = Arc::new(
                escalator.with_callback(auto_submit(weak.clone(), task_runtime.clone())),
            );
            let reporter = ViolationReporter::new(
                Some(context.assessment_id),
                Arc::clone(&sink),
                Arc::clone(&escalator),
                Arc::clone(draft.journal()),
            );

            let visibility = VisibilityWatcher::attach(&document, reporter.clone());
            let fullscreen = FullscreenGuard::attach(&document, reporter.clone());
            let compliance = fullscreen.compliance();
            let input = InputGuard::attach(&document, editor_surface, reporter);
            let sampler = SnapshotSampler::new(Some(context.assessment_id), camera, sink)
                .with_interval(snapshot_interval)
                .spawn(&task_runtime);

            SessionInner {
                context,
                document: Arc::downgrade(&document),
                backend,
                navigator,
                draft,
                escalator,
                compliance,
                latch: FinalizeLatch::new(),
                last_error: Mutex::new(None),
                teardown: Mutex::new(Some(Teardown::new(
                    visibility, fullscreen, input, sampler,
                ))),
                ended: AtomicBool::new(false),
                navigated: AtomicBool::new(false),
                step_timeout,
                exit_route,
            }
        });

        info!(
            assessment_id = context.assessment_id,
            max_warnings = context.max_warnings,
            "assessment session started"
        );

        if self.request_fullscreen_on_start {
            let document = Arc::downgrade(&document);
            let target = self.fullscreen_target;
            runtime.spawn(async move {
                request_fullscreen_on(&document, &target).await;
            });
        }

        Ok(AssessmentSession { inner })
    }
}

fn auto_submit(session: Weak<SessionInner>, runtime: Handle) -> EscalationCallback {
    Box::new(move |state: EscalationState| {
        let Some(session) = session.upgrade() else {
            return;
        };
        // Claimed here so a later end() cannot cancel the committed submit.
        if !session.latch.try_begin() {
            debug!(
                assessment_id = session.context.assessment_id,
                status = %session.latch.status(),
                "escalated while finalize already handled"
            );
            return;
        }
        info!(
            assessment_id = session.context.assessment_id,
            warning_count = state.warning_count,
            "auto-submitting assessment"
        );
        runtime.spawn(async move {
            // Failures are recorded on the session for a manual retry.
            let _ = session.run(FinalizeTrigger::Automatic).await;
        });
    })
}

// =============================================================================
// Session
// =============================================================================

/// One monitored assessment attempt.
///
/// Dropping the session releases every subscription and stops the sampler.
pub struct AssessmentSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    context: SessionContext,
    document: Weak<dyn Document>,
    backend: Arc<dyn AssessmentBackend>,
    navigator: Arc<dyn Navigator>,
    draft: Arc<SubmissionDraft>,
    escalator: Arc<WarningEscalator>,
    compliance: watch::Receiver<bool>,
    latch: FinalizeLatch,
    last_error: Mutex<Option<FinalizeError>>,
    teardown: Mutex<Option<Teardown>>,
    ended: AtomicBool,
    navigated: AtomicBool,
    step_timeout: Duration,
    exit_route: String,
}

impl AssessmentSession {
    /// Starts building a session for `context`.
    pub fn builder(context: SessionContext) -> SessionBuilder {
        SessionBuilder::new(context)
    }

    /// Assessment being taken.
    #[must_use]
    pub fn assessment_id(&self) -> i64 {
        self.inner.context.assessment_id
    }

    /// Warning count and escalation flag.
    #[must_use]
    pub fn escalation(&self) -> EscalationState {
        self.inner.escalator.state()
    }

    /// Configured warning threshold.
    #[must_use]
    pub fn max_warnings(&self) -> u32 {
        self.inner.escalator.max_warnings()
    }

    /// Whether the fullscreen policy is currently satisfied.
    #[must_use]
    pub fn is_fullscreen_compliant(&self) -> bool {
        *self.inner.compliance.borrow()
    }

    /// Observes fullscreen compliance, for driving the blocking overlay.
    #[must_use]
    pub fn fullscreen_compliance(&self) -> watch::Receiver<bool> {
        self.inner.compliance.clone()
    }

    /// Asks the host to re-enter fullscreen on the configured target.
    pub async fn request_fullscreen(&self, target: &SurfaceId) {
        request_fullscreen_on(&self.inner.document, target).await;
    }

    /// The live submission.
    #[must_use]
    pub fn draft(&self) -> &Arc<SubmissionDraft> {
        &self.inner.draft
    }

    /// Whether subscriptions and the sampler are still held.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.lock_teardown().is_some()
    }

    /// Finalize latch state.
    #[must_use]
    pub fn finalize_status(&self) -> FinalizeStatus {
        self.inner.latch.status()
    }

    /// Error of the most recent failed finalize attempt, cleared on success.
    #[must_use]
    pub fn last_finalize_error(&self) -> Option<FinalizeError> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs the current draft in the external sandbox.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged.
    pub async fn run_code(&self) -> Result<ExecutionResult, BackendError> {
        let submission = self.inner.draft.to_code_submission(self.assessment_id());
        self.inner.backend.execute_code(&submission).await
    }

    /// Analyzes the current draft.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged.
    pub async fn analyze(&self) -> Result<CodeAnalysis, BackendError> {
        let submission = self.inner.draft.to_code_submission(self.assessment_id());
        self.inner.backend.analyze_code(&submission).await
    }

    /// Submits the assessment, at most once.
    ///
    /// The first caller runs the pipeline; anyone arriving while it runs or
    /// after it completed gets [`FinalizeOutcome::AlreadyHandled`]. If the
    /// previous attempt failed, this call re-runs the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`FinalizeError`] if a required step fails or times out, or if
    /// the session ended before anything was submitted.
    pub async fn finalize(
        &self,
        trigger: FinalizeTrigger,
    ) -> Result<FinalizeOutcome, FinalizeError> {
        self.inner.finalize(trigger).await
    }

    /// Re-runs a failed finalize pipeline. Escalation state is not touched.
    ///
    /// # Errors
    ///
    /// Returns [`FinalizeError::NothingToRetry`] if finalize never ran, or the
    /// new failure.
    pub async fn retry_finalize(&self) -> Result<FinalizeOutcome, FinalizeError> {
        self.inner.retry_finalize().await
    }

    /// Waits until a started finalize pipeline completes or fails.
    ///
    /// Never returns while the latch is `Idle`.
    pub async fn wait_finalized(&self) -> FinalizeStatus {
        let mut status = self.inner.latch.subscribe();
        let settled = status.wait_for(|status| status.is_settled()).await;
        settled.map_or_else(|_| self.inner.latch.status(), |status| *status)
    }

    /// Leaves without submitting: releases everything and navigates out.
    pub fn exit(&self) {
        info!(assessment_id = self.assessment_id(), "candidate left the assessment");
        self.inner.end();
        self.inner.navigate_once();
    }

    /// Releases every subscription and the sampler. Idempotent.
    pub fn end(&self) {
        self.inner.end();
    }
}

impl Drop for AssessmentSession {
    fn drop(&mut self) {
        self.inner.end();
    }
}

impl std::fmt::Debug for AssessmentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssessmentSession")
            .field("context", &self.inner.context)
            .field("escalation", &self.escalation())
            .field("finalize", &self.finalize_status())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl SessionInner {
    async fn finalize(&self, trigger: FinalizeTrigger) -> Result<FinalizeOutcome, FinalizeError> {
        if self.ended.load(Ordering::Acquire) && self.latch.status() == FinalizeStatus::Idle {
            return Err(FinalizeError::SessionEnded);
        }
        if self.latch.try_begin() {
            return self.run(trigger).await;
        }
        match self.latch.try_retry() {
            Ok(()) => {
                info!(
                    assessment_id = self.context.assessment_id,
                    %trigger,
                    "resubmitting after failed finalize"
                );
                self.run(trigger).await
            },
            Err(status) => {
                debug!(
                    assessment_id = self.context.assessment_id,
                    %trigger,
                    %status,
                    "finalize already handled"
                );
                Ok(FinalizeOutcome::AlreadyHandled)
            },
        }
    }

    async fn retry_finalize(&self) -> Result<FinalizeOutcome, FinalizeError> {
        match self.latch.try_retry() {
            Ok(()) => self.run(FinalizeTrigger::Manual).await,
            Err(FinalizeStatus::Idle) => Err(FinalizeError::NothingToRetry),
            Err(_) => Ok(FinalizeOutcome::AlreadyHandled),
        }
    }

    async fn run(&self, trigger: FinalizeTrigger) -> Result<FinalizeOutcome, FinalizeError> {
        let assessment_id = self.context.assessment_id;
        info!(assessment_id, %trigger, "finalizing assessment");

        match self.submit().await {
            Ok(candidate_id) => {
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
                self.release();
                self.navigate_once();
                self.latch.complete();
                info!(assessment_id, candidate_id, %trigger, "assessment submitted");
                Ok(FinalizeOutcome::Submitted {
                    candidate_id,
                    trigger,
                })
            },
            Err(e) => {
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(e.clone());
                self.latch.fail();
                warn!(assessment_id, %trigger, error = %e, "assessment submission failed");
                Err(e)
            },
        }
    }

    /// Analysis (best effort), identity, report. Returns the candidate id.
    async fn submit(&self) -> Result<i64, FinalizeError> {
        let submission = self.draft.to_code_submission(self.context.assessment_id);
        match self
            .step(FinalizeStep::Analyze, self.backend.analyze_code(&submission))
            .await
        {
            Ok(analysis) => debug!(
                score = analysis.score,
                complexity = %analysis.complexity,
                "final analysis complete"
            ),
            Err(e) => warn!(error = %e, "final analysis failed, submitting anyway"),
        }

        let user = self
            .step(FinalizeStep::Identity, self.backend.current_user())
            .await?;

        let draft = self.draft.snapshot();
        let report = ReportRequest {
            candidate_id: user.id,
            assessment_id: self.context.assessment_id,
            code_snapshot: draft.code,
            browser_logs: draft.browser_logs,
            audio_transcript: draft.transcript,
        };
        self.step(FinalizeStep::Report, self.backend.generate_report(&report))
            .await?;
        Ok(user.id)
    }

    async fn step<T>(
        &self,
        step: FinalizeStep,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, FinalizeError> {
        match tokio::time::timeout(self.step_timeout, call).await {
            Ok(result) => result.map_err(|source| FinalizeError::Backend { step, source }),
            Err(_) => Err(FinalizeError::Timeout {
                step,
                after: self.step_timeout,
            }),
        }
    }

    fn end(&self) {
        self.ended.store(true, Ordering::Release);
        self.release();
    }

    fn release(&self) {
        let teardown = self.lock_teardown().take();
        if let Some(teardown) = teardown {
            teardown.release();
            debug!(assessment_id = self.context.assessment_id, "session torn down");
        }
    }

    fn navigate_once(&self) {
        if self
            .navigated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!(route = %self.exit_route, "leaving assessment");
            self.navigator.navigate(&self.exit_route);
        }
    }

    fn lock_teardown(&self) -> std::sync::MutexGuard<'_, Option<Teardown>> {
        self.teardown.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::backend::{CodeSubmission, CurrentUser};
    use crate::dom::{SimulatedDocument, Topic};
    use crate::telemetry::MemorySink;

    #[derive(Default)]
    struct StubBackend {
        reports: Mutex<Vec<ReportRequest>>,
        fail_identity: AtomicBool,
    }

    #[async_trait]
    impl AssessmentBackend for StubBackend {
        async fn execute_code(
            &self,
            submission: &CodeSubmission,
        ) -> Result<ExecutionResult, BackendError> {
            Ok(ExecutionResult {
                stdout: format!("ran {} bytes", submission.code.len()),
                stderr: String::new(),
            })
        }

        async fn analyze_code(
            &self,
            _submission: &CodeSubmission,
        ) -> Result<CodeAnalysis, BackendError> {
            Err(BackendError::Network("analysis offline".to_string()))
        }

        async fn current_user(&self) -> Result<CurrentUser, BackendError> {
            if self.fail_identity.load(Ordering::SeqCst) {
                return Err(BackendError::Unauthorized);
            }
            Ok(CurrentUser {
                id: 77,
                profile: serde_json::Map::new(),
            })
        }

        async fn generate_report(&self, report: &ReportRequest) -> Result<(), BackendError> {
            self.reports.lock().unwrap().push(report.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingNavigator {
        visits: AtomicUsize,
    }

    impl Navigator for CountingNavigator {
        fn navigate(&self, _route: &str) {
            self.visits.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        document: Arc<SimulatedDocument>,
        backend: Arc<StubBackend>,
        navigator: Arc<CountingNavigator>,
        sink: Arc<MemorySink>,
        session: AssessmentSession,
    }

    fn start(max_warnings: u32) -> Fixture {
        let document = Arc::new(SimulatedDocument::in_fullscreen());
        let backend = Arc::new(StubBackend::default());
        let navigator = Arc::new(CountingNavigator::default());
        let sink = Arc::new(MemorySink::new());
        let session = AssessmentSession::builder(
            SessionContext::new(5).with_max_warnings(max_warnings),
        )
        .document(Arc::clone(&document) as Arc<dyn Document>)
        .backend(Arc::clone(&backend) as Arc<dyn AssessmentBackend>)
        .sink(Arc::clone(&sink) as Arc<dyn EventSink>)
        .navigator(Arc::clone(&navigator) as Arc<dyn Navigator>)
        .start()
        .unwrap();
        Fixture {
            document,
            backend,
            navigator,
            sink,
            session,
        }
    }

    #[tokio::test]
    async fn test_missing_collaborator_rejected() {
        let err = AssessmentSession::builder(SessionContext::new(1))
            .start()
            .unwrap_err();
        assert!(matches!(err, SessionError::MissingCollaborator("document")));
    }

    #[tokio::test]
    async fn test_zero_threshold_rejected() {
        let document: Arc<dyn Document> = Arc::new(SimulatedDocument::new());
        let err = AssessmentSession::builder(SessionContext::new(1).with_max_warnings(0))
            .document(document)
            .backend(Arc::new(StubBackend::default()))
            .sink(Arc::new(MemorySink::new()))
            .navigator(Arc::new(CountingNavigator::default()))
            .start()
            .unwrap_err();
        assert!(matches!(err, SessionError::Escalation(_)));
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let document: Arc<dyn Document> = Arc::new(SimulatedDocument::new());
        let err = AssessmentSession::builder(SessionContext::new(1))
            .document(document)
            .backend(Arc::new(StubBackend::default()))
            .sink(Arc::new(MemorySink::new()))
            .navigator(Arc::new(CountingNavigator::default()))
            .start()
            .unwrap_err();
        assert!(matches!(err, SessionError::NoRuntime(_)));
    }

    #[tokio::test]
    async fn test_manual_finalize_submits_journal_and_navigates() {
        let fx = start(10);
        fx.session.draft().set_code("print(42)");
        fx.document.hide();
        fx.document.show();

        let outcome = fx.session.finalize(FinalizeTrigger::Manual).await.unwrap();

        assert_eq!(
            outcome,
            FinalizeOutcome::Submitted {
                candidate_id: 77,
                trigger: FinalizeTrigger::Manual,
            }
        );
        let reports = fx.backend.reports.lock().unwrap().clone();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].assessment_id, 5);
        assert_eq!(reports[0].code_snapshot, "print(42)");
        assert_eq!(reports[0].browser_logs.len(), 1);
        assert_eq!(reports[0].browser_logs[0].event, "TAB_SWITCH");
        assert_eq!(fx.navigator.visits.load(Ordering::SeqCst), 1);
        assert_eq!(fx.session.finalize_status(), FinalizeStatus::Completed);
        assert!(!fx.session.is_active());
    }

    #[tokio::test]
    async fn test_second_finalize_is_already_handled() {
        let fx = start(10);

        fx.session.finalize(FinalizeTrigger::Manual).await.unwrap();
        let second = fx.session.finalize(FinalizeTrigger::Manual).await.unwrap();

        assert_eq!(second, FinalizeOutcome::AlreadyHandled);
        assert_eq!(fx.backend.reports.lock().unwrap().len(), 1);
        assert_eq!(fx.navigator.visits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_escalation_triggers_automatic_finalize() {
        let fx = start(2);

        fx.document.hide();
        fx.document.show();
        fx.document.hide();

        assert_eq!(fx.session.wait_finalized().await, FinalizeStatus::Completed);
        assert!(fx.session.escalation().auto_submitted);
        assert_eq!(fx.backend.reports.lock().unwrap().len(), 1);
        assert_eq!(fx.sink.len(), 2);
    }

    #[tokio::test]
    async fn test_identity_failure_then_retry() {
        let fx = start(10);
        fx.backend.fail_identity.store(true, Ordering::SeqCst);

        let err = fx
            .session
            .finalize(FinalizeTrigger::Manual)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FinalizeError::Backend {
                step: FinalizeStep::Identity,
                source: BackendError::Unauthorized,
            }
        );
        assert_eq!(fx.session.finalize_status(), FinalizeStatus::Failed);
        assert_eq!(fx.session.last_finalize_error(), Some(err));
        assert!(fx.session.is_active());
        assert_eq!(fx.navigator.visits.load(Ordering::SeqCst), 0);

        fx.backend.fail_identity.store(false, Ordering::SeqCst);
        let outcome = fx.session.retry_finalize().await.unwrap();

        assert!(matches!(outcome, FinalizeOutcome::Submitted { .. }));
        assert!(fx.session.last_finalize_error().is_none());
        assert_eq!(fx.navigator.visits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_end_right_after_escalation_still_submits() {
        let fx = start(1);

        fx.document.hide();
        assert_eq!(fx.session.finalize_status(), FinalizeStatus::Running);
        fx.session.end();

        assert_eq!(fx.session.wait_finalized().await, FinalizeStatus::Completed);
        assert_eq!(fx.backend.reports.lock().unwrap().len(), 1);
        assert_eq!(fx.navigator.visits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_right_after_escalation_still_submits() {
        let fx = start(1);
        let backend = Arc::clone(&fx.backend);
        let navigator = Arc::clone(&fx.navigator);

        fx.document.hide();
        drop(fx);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.reports.lock().unwrap().len(), 1);
        assert_eq!(navigator.visits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_manual_submit_after_failed_auto_submit() {
        let fx = start(1);
        fx.backend.fail_identity.store(true, Ordering::SeqCst);

        fx.document.hide();
        assert_eq!(fx.session.wait_finalized().await, FinalizeStatus::Failed);
        assert_eq!(fx.navigator.visits.load(Ordering::SeqCst), 0);

        fx.backend.fail_identity.store(false, Ordering::SeqCst);
        let outcome = fx.session.finalize(FinalizeTrigger::Manual).await.unwrap();

        assert_eq!(
            outcome,
            FinalizeOutcome::Submitted {
                candidate_id: 77,
                trigger: FinalizeTrigger::Manual,
            }
        );
        assert_eq!(fx.backend.reports.lock().unwrap().len(), 1);
        assert_eq!(fx.navigator.visits.load(Ordering::SeqCst), 1);
        assert_eq!(fx.session.finalize_status(), FinalizeStatus::Completed);
        assert_eq!(fx.session.escalation().warning_count, 1);
    }

    #[tokio::test]
    async fn test_retry_before_finalize_is_rejected() {
        let fx = start(10);
        assert_eq!(
            fx.session.retry_finalize().await.unwrap_err(),
            FinalizeError::NothingToRetry
        );
    }

    #[tokio::test]
    async fn test_exit_releases_and_blocks_finalize() {
        let fx = start(10);
        assert!(fx.document.signals().listener_count(Topic::Visibility) > 0);

        fx.session.exit();

        assert!(!fx.session.is_active());
        assert_eq!(fx.document.signals().listener_count(Topic::Visibility), 0);
        assert_eq!(fx.document.signals().listener_count(Topic::Input), 0);
        assert_eq!(fx.navigator.visits.load(Ordering::SeqCst), 1);
        assert_eq!(
            fx.session.finalize(FinalizeTrigger::Manual).await.unwrap_err(),
            FinalizeError::SessionEnded
        );
    }

    #[tokio::test]
    async fn test_drop_releases_listeners() {
        let fx = start(10);
        let document = Arc::clone(&fx.document);
        drop(fx);

        assert_eq!(document.signals().listener_count(Topic::Fullscreen), 0);
    }

    #[tokio::test]
    async fn test_run_code_uses_draft() {
        let fx = start(10);
        fx.session.draft().set_code("abc");

        let result = fx.session.run_code().await.unwrap();

        assert_eq!(result.stdout, "ran 3 bytes");
    }
}
