//! `examguard replay`: drive a monitored session from a signal script.
//!
//! The script is JSON lines, one step per line. Each step waits `after_ms`
//! milliseconds and then applies one signal to a simulated document:
//!
//! ```text
//! {"after_ms": 0,    "signal": "type", "code": "print(1)"}
//! {"after_ms": 500,  "signal": "hide"}
//! {"after_ms": 2000, "signal": "show"}
//! {"after_ms": 100,  "signal": "paste"}
//! {"after_ms": 100,  "signal": "context_menu", "target": "editor"}
//! {"after_ms": 100,  "signal": "run"}
//! {"after_ms": 100,  "signal": "submit"}
//! {"after_ms": 100,  "signal": "retry"}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. With `--offline` the
//! session talks to an in-process backend instead of the configured API.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::Args;
use examguard_core::ProctorConfig;
use examguard_core::backend::{
    AssessmentBackend, BackendError, CodeAnalysis, CodeSubmission, CurrentUser, ExecutionResult,
    HttpApi, ReportRequest,
};
use examguard_core::camera::{Frame, FrameSource, NoCamera, StillImage};
use examguard_core::dom::{ClipboardOp, Document, SimulatedDocument, SurfaceId};
use examguard_core::session::{
    AssessmentSession, FinalizeStatus, FinalizeTrigger, Navigator, SessionContext,
    SubmissionDraft,
};
use examguard_core::telemetry::{CollectorLogger, CollectorTransport, EventSink, MemorySink};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Surface clipboard steps target when none is given.
const DEFAULT_TARGET: &str = "editor";

/// Arguments for `examguard replay`.
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSON-lines signal script
    pub script: PathBuf,

    /// Assessment id reported with every event
    #[arg(long, default_value_t = 1)]
    pub assessment_id: i64,

    /// Image file served as the webcam frame
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Language of the submitted code
    #[arg(long, default_value = "python")]
    pub language: String,

    /// Use an in-process backend instead of the configured API
    #[arg(long)]
    pub offline: bool,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

// =============================================================================
// Script
// =============================================================================

/// One script line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScriptStep {
    /// Delay before the signal, in milliseconds.
    #[serde(default)]
    pub after_ms: u64,

    /// What happens.
    #[serde(flatten)]
    pub action: Action,
}

/// Signals a script can send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Action {
    /// Page becomes hidden.
    Hide,
    /// Page becomes visible.
    Show,
    /// Fullscreen is left.
    ExitFullscreen,
    /// Fullscreen is entered by the host.
    EnterFullscreen,
    /// The candidate clicks "re-enter fullscreen".
    RequestFullscreen,
    /// Copy shortcut.
    Copy {
        /// Surface the shortcut was aimed at.
        #[serde(default)]
        target: Option<String>,
    },
    /// Cut shortcut.
    Cut {
        /// Surface the shortcut was aimed at.
        #[serde(default)]
        target: Option<String>,
    },
    /// Paste shortcut.
    Paste {
        /// Surface the shortcut was aimed at.
        #[serde(default)]
        target: Option<String>,
    },
    /// Right click.
    ContextMenu {
        /// Surface that was clicked.
        #[serde(default)]
        target: Option<String>,
    },
    /// The candidate's code changes.
    Type {
        /// New code.
        code: String,
    },
    /// The candidate runs the code.
    Run,
    /// Manual submit. Re-runs a failed submission.
    Submit,
    /// Explicit retry of a failed submission.
    Retry,
}

/// Parses a JSON-lines script.
///
/// # Errors
///
/// Returns an error naming the first malformed line.
pub fn parse_script(content: &str) -> Result<Vec<ScriptStep>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| format!("invalid step on line {}", index + 1))
        })
        .collect()
}

// =============================================================================
// Collaborators
// =============================================================================

/// Remembers where the session sent the candidate.
#[derive(Debug, Default)]
struct RecordingNavigator {
    route: Mutex<Option<String>>,
}

impl RecordingNavigator {
    fn route(&self) -> Option<String> {
        self.route
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: &str) {
        info!(route, "navigating away from assessment");
        *self.route.lock().unwrap_or_else(PoisonError::into_inner) = Some(route.to_string());
    }
}

/// In-process backend for `--offline` runs.
#[derive(Debug, Default)]
struct OfflineBackend {
    reports: Mutex<Vec<ReportRequest>>,
}

impl OfflineBackend {
    fn report_count(&self) -> usize {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl AssessmentBackend for OfflineBackend {
    async fn execute_code(
        &self,
        submission: &CodeSubmission,
    ) -> Result<ExecutionResult, BackendError> {
        Ok(ExecutionResult {
            stdout: format!("[offline] {} bytes of {}", submission.code.len(), submission.language),
            stderr: String::new(),
        })
    }

    async fn analyze_code(&self, submission: &CodeSubmission) -> Result<CodeAnalysis, BackendError> {
        Ok(CodeAnalysis {
            issues: Vec::new(),
            complexity: "unknown".to_string(),
            score: 0.0,
            language: submission.language.clone(),
            lines: u64::try_from(submission.code.lines().count()).unwrap_or(u64::MAX),
        })
    }

    async fn current_user(&self) -> Result<CurrentUser, BackendError> {
        Ok(CurrentUser {
            id: 0,
            profile: serde_json::Map::new(),
        })
    }

    async fn generate_report(&self, report: &ReportRequest) -> Result<(), BackendError> {
        debug!(
            browser_logs = report.browser_logs.len(),
            code_bytes = report.code_snapshot.len(),
            "offline report accepted"
        );
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
        Ok(())
    }
}

// =============================================================================
// Summary
// =============================================================================

/// Outcome of a replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    /// Assessment id used.
    pub assessment_id: i64,
    /// Steps applied.
    pub steps: usize,
    /// Violations counted.
    pub warning_count: u32,
    /// Threshold.
    pub max_warnings: u32,
    /// Whether the threshold was crossed.
    pub auto_submitted: bool,
    /// Fullscreen compliance at the end of the script.
    pub fullscreen_compliant: bool,
    /// Finalize latch state.
    pub finalize_status: String,
    /// Last finalize error, if the latch is `Failed`.
    pub finalize_error: Option<String>,
    /// Route the candidate was sent to.
    pub exited_to: Option<String>,
    /// Events seen by the in-process sink (offline runs only).
    pub events_recorded: Option<usize>,
    /// Reports accepted by the in-process backend (offline runs only).
    pub reports_filed: Option<usize>,
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Assessment:  {}", self.assessment_id)?;
        writeln!(f, "Steps:       {}", self.steps)?;
        writeln!(f, "Warnings:    {}/{}", self.warning_count, self.max_warnings)?;
        writeln!(f, "Escalated:   {}", if self.auto_submitted { "yes" } else { "no" })?;
        writeln!(
            f,
            "Fullscreen:  {}",
            if self.fullscreen_compliant { "compliant" } else { "blocked" }
        )?;
        write!(f, "Finalize:    {}", self.finalize_status)?;
        if let Some(error) = &self.finalize_error {
            write!(f, " ({error})")?;
        }
        if let Some(route) = &self.exited_to {
            write!(f, "\nExited to:   {route}")?;
        }
        if let Some(events) = self.events_recorded {
            write!(f, "\nEvents:      {events}")?;
        }
        if let Some(reports) = self.reports_filed {
            write!(f, "\nReports:     {reports}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Command
// =============================================================================

/// Runs `examguard replay`.
pub fn run(config: &ProctorConfig, args: &ReplayArgs) -> Result<()> {
    let content = std::fs::read_to_string(&args.script)
        .with_context(|| format!("failed to read script {}", args.script.display()))?;
    let steps = parse_script(&content)?;
    let camera = load_camera(args.snapshot.as_deref())?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let summary = rt.block_on(replay(config, args, camera, &steps))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{summary}");
    }
    Ok(())
}

fn load_camera(snapshot: Option<&Path>) -> Result<Arc<dyn FrameSource>> {
    let Some(path) = snapshot else {
        return Ok(Arc::new(NoCamera));
    };
    let frame = Frame::from_file(path)
        .with_context(|| format!("failed to read snapshot image {}", path.display()))?;
    Ok(Arc::new(StillImage::new(frame)))
}

/// Applies `steps` to a fresh session and reports the end state.
pub async fn replay(
    config: &ProctorConfig,
    args: &ReplayArgs,
    camera: Arc<dyn FrameSource>,
    steps: &[ScriptStep],
) -> Result<ReplaySummary> {
    let runtime = Handle::current();
    let document = Arc::new(SimulatedDocument::new());
    let navigator = Arc::new(RecordingNavigator::default());
    let offline = args
        .offline
        .then(|| (Arc::new(OfflineBackend::default()), Arc::new(MemorySink::new())));

    let (backend, sink): (Arc<dyn AssessmentBackend>, Arc<dyn EventSink>) = match &offline {
        Some((backend, memory)) => (
            Arc::clone(backend) as Arc<dyn AssessmentBackend>,
            Arc::clone(memory) as Arc<dyn EventSink>,
        ),
        None => {
            let api = Arc::new(HttpApi::new(&config.api).context("invalid API configuration")?);
            let logger = CollectorLogger::new(
                Arc::clone(&api) as Arc<dyn CollectorTransport>,
                runtime.clone(),
            )
            .with_delivery_timeout(config.api.telemetry_timeout());
            (
                api as Arc<dyn AssessmentBackend>,
                Arc::new(logger) as Arc<dyn EventSink>,
            )
        },
    };

    let session = AssessmentSession::builder(SessionContext::new(args.assessment_id))
        .document(Arc::clone(&document) as Arc<dyn Document>)
        .backend(backend)
        .sink(sink)
        .navigator(Arc::clone(&navigator) as Arc<dyn Navigator>)
        .camera(camera)
        .draft(Arc::new(SubmissionDraft::with_language(args.language.clone())))
        .monitor(&config.monitor)
        .finalize(&config.finalize)
        .runtime(runtime)
        .start()
        .context("failed to start session")?;

    // Let the start-up fullscreen request land before the first step.
    tokio::task::yield_now().await;

    let page = SurfaceId::new("page");
    for (index, step) in steps.iter().enumerate() {
        if step.after_ms > 0 {
            tokio::time::sleep(Duration::from_millis(step.after_ms)).await;
        }
        debug!(step = index + 1, action = ?step.action, "applying step");
        apply(&session, &document, &page, &step.action).await;
    }

    if session.finalize_status() == FinalizeStatus::Running {
        let limit = config.finalize.step_timeout() * 4;
        if tokio::time::timeout(limit, session.wait_finalized())
            .await
            .is_err()
        {
            bail!("finalize did not settle within {limit:?}");
        }
    }

    let escalation = session.escalation();
    let summary = ReplaySummary {
        assessment_id: args.assessment_id,
        steps: steps.len(),
        warning_count: escalation.warning_count,
        max_warnings: session.max_warnings(),
        auto_submitted: escalation.auto_submitted,
        fullscreen_compliant: session.is_fullscreen_compliant(),
        finalize_status: session.finalize_status().to_string(),
        finalize_error: session.last_finalize_error().map(|e| e.to_string()),
        exited_to: navigator.route(),
        events_recorded: offline.as_ref().map(|(_, sink)| sink.len()),
        reports_filed: offline.as_ref().map(|(backend, _)| backend.report_count()),
    };
    session.end();
    Ok(summary)
}

async fn apply(
    session: &AssessmentSession,
    document: &SimulatedDocument,
    page: &SurfaceId,
    action: &Action,
) {
    match action {
        Action::Hide => {
            document.hide();
        },
        Action::Show => {
            document.show();
        },
        Action::ExitFullscreen => {
            document.exit_fullscreen();
        },
        Action::EnterFullscreen => {
            document.enter_fullscreen();
        },
        Action::RequestFullscreen => session.request_fullscreen(page).await,
        Action::Copy { target } => clipboard(document, ClipboardOp::Copy, target.as_deref()),
        Action::Cut { target } => clipboard(document, ClipboardOp::Cut, target.as_deref()),
        Action::Paste { target } => clipboard(document, ClipboardOp::Paste, target.as_deref()),
        Action::ContextMenu { target } => {
            let surface = SurfaceId::new(target.as_deref().unwrap_or(DEFAULT_TARGET));
            let outcome = document.context_menu(&surface);
            debug!(surface = %surface, blocked = outcome.default_prevented, "context menu");
        },
        Action::Type { code } => session.draft().set_code(code.clone()),
        Action::Run => match session.run_code().await {
            Ok(result) => info!(stdout = %result.stdout, stderr = %result.stderr, "code ran"),
            Err(e) => warn!(error = %e, "code run failed"),
        },
        Action::Submit => match session.finalize(FinalizeTrigger::Manual).await {
            Ok(outcome) => info!(?outcome, "manual submit"),
            Err(e) => warn!(error = %e, "manual submit failed"),
        },
        Action::Retry => match session.retry_finalize().await {
            Ok(outcome) => info!(?outcome, "submission retried"),
            Err(e) => warn!(error = %e, "submission retry failed"),
        },
    }
}

fn clipboard(document: &SimulatedDocument, op: ClipboardOp, target: Option<&str>) {
    let surface = SurfaceId::new(target.unwrap_or(DEFAULT_TARGET));
    let outcome = document.clipboard(op, &surface);
    debug!(surface = %surface, ?op, blocked = outcome.default_prevented, "clipboard");
}
