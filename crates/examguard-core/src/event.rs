//! Proctor event model.
//!
//! A [`ViolationEvent`] is created the instant a triggering browser signal
//! fires and is never mutated afterwards. It is consumed by the telemetry sink
//! and, for violation kinds, by the warning escalator.
//!
//! The wire form shipped to the collector is [`ProctorLogRecord`]; the
//! client-side journal attached to the final report is a list of
//! [`BrowserLogEntry`] values kept in an [`EventJournal`].

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// EventKind
// =============================================================================

/// Closed set of proctor event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// The document became hidden (tab or window switch).
    TabSwitch,
    /// A copy was attempted on the monitored surface.
    CopyAttempt,
    /// A cut was attempted on the monitored surface.
    CutAttempt,
    /// A paste was attempted on the monitored surface.
    PasteAttempt,
    /// The context menu was requested on the monitored surface.
    ContextMenu,
    /// The document left fullscreen.
    FullscreenExit,
    /// Periodic camera still. Audit trail only, never a violation.
    WebcamSnapshot,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::TabSwitch,
        Self::CopyAttempt,
        Self::CutAttempt,
        Self::PasteAttempt,
        Self::ContextMenu,
        Self::FullscreenExit,
        Self::WebcamSnapshot,
    ];

    /// Returns the collector wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TabSwitch => "TAB_SWITCH",
            Self::CopyAttempt => "COPY_ATTEMPT",
            Self::CutAttempt => "CUT_ATTEMPT",
            Self::PasteAttempt => "PASTE_ATTEMPT",
            Self::ContextMenu => "CONTEXT_MENU",
            Self::FullscreenExit => "FULLSCREEN_EXIT",
            Self::WebcamSnapshot => "WEBCAM_SNAPSHOT",
        }
    }

    /// Whether this kind counts towards escalation.
    #[must_use]
    pub const fn is_violation(&self) -> bool {
        !matches!(self, Self::WebcamSnapshot)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ViolationEvent
// =============================================================================

/// Immutable record of a single proctor observation.
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationEvent {
    kind: EventKind,
    assessment_id: Option<i64>,
    occurred_at: DateTime<Utc>,
    payload: Option<serde_json::Value>,
}

impl ViolationEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn now(kind: EventKind, assessment_id: Option<i64>) -> Self {
        Self::at(kind, assessment_id, Utc::now())
    }

    /// Creates an event with an explicit timestamp.
    #[must_use]
    pub fn at(kind: EventKind, assessment_id: Option<i64>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            assessment_id,
            occurred_at,
            payload: None,
        }
    }

    /// Attaches an opaque payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Returns the event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Returns the assessment this event belongs to, if known.
    #[must_use]
    pub const fn assessment_id(&self) -> Option<i64> {
        self.assessment_id
    }

    /// Returns when the triggering signal fired.
    #[must_use]
    pub const fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Returns the payload, if any.
    #[must_use]
    pub const fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    /// Builds the collector wire record.
    #[must_use]
    pub fn to_record(&self) -> ProctorLogRecord {
        ProctorLogRecord {
            kind: self.kind,
            assessment_id: self.assessment_id,
            payload: self.payload.clone(),
            occurred_at: self.occurred_at,
        }
    }
}

/// Body of `POST /proctor/log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProctorLogRecord {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Assessment id, omitted when unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_id: Option<i64>,
    /// Opaque payload, omitted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Client-side timestamp. The collector assigns its own for ordering.
    pub occurred_at: DateTime<Utc>,
}

// =============================================================================
// Client-side journal
// =============================================================================

/// One line of the client-side event log shipped with the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserLogEntry {
    /// Event kind wire name.
    pub event: String,
    /// RFC 3339 timestamp.
    pub time: String,
}

impl From<&ViolationEvent> for BrowserLogEntry {
    fn from(event: &ViolationEvent) -> Self {
        Self {
            event: event.kind().as_str().to_string(),
            time: event
                .occurred_at()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Append-only journal of the events observed in one session.
#[derive(Debug, Default)]
pub struct EventJournal {
    entries: Mutex<Vec<BrowserLogEntry>>,
}

impl EventJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn record(&self, event: &ViolationEvent) {
        let entry = BrowserLogEntry::from(event);
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(entry);
    }

    /// Returns a copy of all entries in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BrowserLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_kind_wire_names_match_serde() {
        for kind in EventKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::Value::String(kind.as_str().to_string()));
        }
    }

    #[test]
    fn test_snapshot_is_not_a_violation() {
        assert!(!EventKind::WebcamSnapshot.is_violation());
        assert_eq!(EventKind::ALL.iter().filter(|k| k.is_violation()).count(), 6);
    }

    #[test]
    fn test_record_omits_absent_fields() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let record = ViolationEvent::at(EventKind::TabSwitch, None, at).to_record();
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["type"], "TAB_SWITCH");
        assert!(json.get("assessmentId").is_none());
        assert!(json.get("payload").is_none());
        assert!(json.get("occurredAt").is_some());
    }

    #[test]
    fn test_record_carries_assessment_and_payload() {
        let event = ViolationEvent::now(EventKind::WebcamSnapshot, Some(42))
            .with_payload(serde_json::json!({ "imageBase64": "data:image/jpeg;base64,AA==" }));
        let json = serde_json::to_value(event.to_record()).unwrap();

        assert_eq!(json["assessmentId"], 42);
        assert_eq!(json["payload"]["imageBase64"], "data:image/jpeg;base64,AA==");
    }

    #[test]
    fn test_journal_preserves_order() {
        let journal = EventJournal::new();
        assert!(journal.is_empty());

        journal.record(&ViolationEvent::now(EventKind::CopyAttempt, Some(1)));
        journal.record(&ViolationEvent::now(EventKind::TabSwitch, Some(1)));

        let entries = journal.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, "COPY_ATTEMPT");
        assert_eq!(entries[1].event, "TAB_SWITCH");
        assert!(entries[0].time.ends_with('Z'));
    }
}
