#![allow(clippy::doc_markdown)]

//! examguard-core - browser exam integrity monitoring.
//!
//! This library watches a candidate's browser during a timed assessment,
//! records integrity violations, streams them to a proctor collector, and
//! auto-submits the attempt once too many violations have been observed.
//!
//! # Architecture
//!
//! ```text
//! Document signals ──► guards ──► ViolationReporter ──► EventJournal
//!                                        │          └──► EventSink (collector)
//!                                        ▼
//!                                 WarningEscalator ──(threshold)──► finalize()
//!
//! SnapshotSampler ──(own clock)──► EventSink
//! ```
//!
//! # Modules
//!
//! - [`dom`]: host document abstraction, signal bus and a simulated document
//! - [`event`]: event taxonomy, wire records and the session journal
//! - [`escalation`]: warning counter with a one-shot escalation latch
//! - [`guard`]: visibility, fullscreen and input guards
//! - [`telemetry`]: fire-and-forget event sinks
//! - [`camera`]: frame sources for webcam snapshots
//! - [`sampler`]: periodic snapshot task
//! - [`backend`]: execute/analyze/identity/report collaborators and the HTTP client
//! - [`session`]: orchestration, finalize latch and teardown
//! - [`config`]: TOML configuration
//!
//! # Runtime Requirements
//!
//! Sessions spawn the sampler, telemetry deliveries and automatic finalize on
//! a tokio runtime. [`session::SessionBuilder::start`] uses the current
//! runtime unless one is supplied explicitly.

pub mod backend;
pub mod camera;
pub mod config;
pub mod dom;
pub mod escalation;
pub mod event;
pub mod guard;
pub mod sampler;
pub mod session;
pub mod telemetry;

pub use config::ProctorConfig;
pub use escalation::{EscalationState, WarningEscalator};
pub use event::{EventKind, ViolationEvent};
pub use session::{AssessmentSession, FinalizeOutcome, FinalizeTrigger, SessionContext};
