use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only JSONL journal of job and gallery activity for one session.
///
/// Every line carries `event`, `session_id` and `ts`; the caller payload is
/// merged underneath those keys and cannot override them. Credentials never
/// reach this writer: callers pass `GenerationJob::summary()`.
#[derive(Debug, Clone)]
pub struct EventJournal {
    inner: Arc<JournalInner>,
}

#[derive(Debug)]
struct JournalInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventJournal {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(JournalInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn record(&self, event: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut row = payload;
        row.insert("event".to_string(), Value::String(event.to_string()));
        row.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        row.insert("ts".to_string(), Value::String(now_utc_iso()));

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(&row)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event journal lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(Value::Object(row))
    }

    /// Reads back every well-formed line; torn or foreign lines are skipped.
    pub fn read_all(path: &Path) -> Vec<EventPayload> {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        raw.lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|value| value.as_object().cloned())
            .collect()
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn record_writes_one_compact_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("journal.jsonl");
        let journal = EventJournal::new(&path, "session-1");

        let mut payload = EventPayload::new();
        payload.insert("job_id".to_string(), Value::String("job-1".to_string()));
        let written = journal.record("job_queued", payload)?;

        let content = fs::read_to_string(&path)?;
        let parsed: Value = serde_json::from_str(content.lines().next().unwrap_or(""))?;
        assert_eq!(parsed, written);
        assert_eq!(parsed["event"], Value::String("job_queued".to_string()));
        assert_eq!(parsed["session_id"], Value::String("session-1".to_string()));
        DateTime::parse_from_rfc3339(parsed["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn reserved_keys_win_over_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let journal = EventJournal::new(temp.path().join("journal.jsonl"), "session-1");
        let mut payload = EventPayload::new();
        payload.insert("event".to_string(), Value::String("spoofed".to_string()));
        let written = journal.record("job_failed", payload)?;
        assert_eq!(written["event"], Value::String("job_failed".to_string()));
        Ok(())
    }

    #[test]
    fn read_all_skips_garbage_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("journal.jsonl");
        let journal = EventJournal::new(&path, "s");
        journal.record("one", EventPayload::new())?;
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(b"{torn\n")?;
        journal.record("two", EventPayload::new())?;

        let rows = EventJournal::read_all(&path);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["event"], Value::String("two".to_string()));
        Ok(())
    }
}
