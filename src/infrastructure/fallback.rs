//! Fallback event log.
//!
//! When the project director's LLM selection fails all attempts and the safe
//! default team is substituted, the event is appended to a JSONL file so the
//! degradation is visible after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackEvent {
    pub session_id: Uuid,
    pub stage: String,
    pub reason: String,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl FallbackEvent {
    pub fn new(session_id: Uuid, stage: impl Into<String>, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            session_id,
            stage: stage.into(),
            reason: reason.into(),
            attempts,
            timestamp: Utc::now(),
        }
    }
}

/// Appends fallback events to `<dir>/fallback_events.jsonl`. With no
/// directory configured the recorder only logs.
pub struct FallbackRecorder {
    dir: Option<PathBuf>,
}

impl FallbackRecorder {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn record(&self, event: &FallbackEvent) {
        warn!(
            session = %event.session_id,
            stage = %event.stage,
            attempts = event.attempts,
            reason = %event.reason,
            "fallback substitution"
        );
        let Some(dir) = &self.dir else { return };
        let result = std::fs::create_dir_all(dir).and_then(|()| {
            let line = serde_json::to_string(event).unwrap_or_default();
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("fallback_events.jsonl"))
                .and_then(|mut f| writeln!(f, "{line}"))
        });
        if let Err(e) = result {
            warn!(dir = %dir.display(), error = %e, "fallback event not persisted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_appended_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FallbackRecorder::new(Some(dir.path().join("fallback_events")));
        let session = Uuid::new_v4();

        recorder.record(&FallbackEvent::new(session, "project_director", "no V4 role", 3));
        recorder.record(&FallbackEvent::new(session, "project_director", "parse failure", 3));

        let content =
            std::fs::read_to_string(dir.path().join("fallback_events/fallback_events.jsonl"))
                .unwrap();
        assert_eq!(content.lines().count(), 2);
        let event: FallbackEvent = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(event.session_id, session);
        assert_eq!(event.attempts, 3);
    }

    #[test]
    fn test_disabled_recorder_is_noop() {
        FallbackRecorder::disabled().record(&FallbackEvent::new(
            Uuid::new_v4(),
            "project_director",
            "x",
            1,
        ));
    }
}
