use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::image_data::ImagePayload;

pub type EventPayload = Map<String, Value>;

/// Append-only structured log, one compact JSON object per line.
///
/// Every event carries `type`, `log_id` and `ts`; the caller payload is
/// merged last and may override them. A writer built with [`EventWriter::disabled`]
/// still builds and returns events but writes nothing.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: Option<PathBuf>,
    log_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, log_id: impl Into<String>) -> Self {
        Self::build(Some(path.into()), log_id.into())
    }

    pub fn disabled(log_id: impl Into<String>) -> Self {
        Self::build(None, log_id.into())
    }

    fn build(path: Option<PathBuf>, log_id: String) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path,
                log_id,
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn log_id(&self) -> &str {
        &self.inner.log_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "log_id".to_string(),
            Value::String(self.inner.log_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        let Some(path) = self.inner.path.as_ref() else {
            return Ok(Value::Object(event));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

/// Loggable summary of an image: never the bytes themselves.
pub fn image_fields(prefix: &str, image: &ImagePayload) -> EventPayload {
    let mut fields = Map::new();
    fields.insert(format!("{prefix}_sha256"), Value::String(image.digest()));
    fields.insert(format!("{prefix}_bytes"), Value::Number(image.len().into()));
    fields.insert(
        format!("{prefix}_mime"),
        Value::String(image.mime_type().to_string()),
    );
    fields
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
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let writer = EventWriter::new(&path, "nanoedit-1");

        let mut payload = EventPayload::new();
        payload.insert("session_id".to_string(), Value::String("s-1".to_string()));
        let emitted = writer.emit("session_started", payload)?;

        let content = fs::read_to_string(&path)?;
        let parsed: Value = serde_json::from_str(content.lines().next().unwrap_or(""))?;
        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], "session_started");
        assert_eq!(parsed["log_id"], "nanoedit-1");
        assert_eq!(parsed["session_id"], "s-1");
        DateTime::parse_from_rfc3339(parsed["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn emit_appends_one_line_per_event() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "nanoedit-1");

        writer.emit("edit_requested", EventPayload::new())?;
        writer.clone().emit("edit_failed", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let types: Vec<String> = content
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(types, vec!["edit_requested", "edit_failed"]);
        Ok(())
    }

    #[test]
    fn disabled_writer_returns_event_without_a_file() -> anyhow::Result<()> {
        let writer = EventWriter::disabled("quiet");
        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), Value::String("override".to_string()));

        let emitted = writer.emit("session_reset", payload)?;
        assert!(writer.path().is_none());
        assert_eq!(emitted["type"], "override");
        assert_eq!(emitted["log_id"], "quiet");
        Ok(())
    }

    #[test]
    fn image_fields_summarize_without_bytes() {
        let image = ImagePayload::new(vec![1u8, 2, 3], "image/png");
        let fields = image_fields("current", &image);
        assert_eq!(fields["current_bytes"], 3);
        assert_eq!(fields["current_mime"], "image/png");
        assert_eq!(fields["current_sha256"], Value::String(image.digest()));
    }
}
