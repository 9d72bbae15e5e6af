use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

// Opt-in JSONL event log: one object per line, `ts_ms` + `event` plus
// whatever fields the call site formats. Counters accumulate per event name
// and stay retrievable so tests can assert on them without parsing the file.
#[derive(Clone)]
pub(crate) struct DebugLogger {
    inner: Arc<Mutex<DebugState>>,
}

struct DebugState {
    writer: BufWriter<File>,
    counters: HashMap<String, u64>,
}

impl DebugLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(DebugState {
                writer: BufWriter::new(file),
                counters: HashMap::new(),
            })),
        })
    }

    // `fields` is pre-formatted JSON body text ("\"key\":value,...");
    // the logger wraps it with the timestamp and event name.
    pub fn log_event(&self, event: &str, fields: &str) {
        let line = if fields.is_empty() {
            format!("{{\"ts_ms\":{},\"event\":\"{}\"}}", now_ms(), json_escape(event))
        } else {
            format!(
                "{{\"ts_ms\":{},\"event\":\"{}\",{}}}",
                now_ms(),
                json_escape(event),
                fields
            )
        };
        if let Ok(mut state) = self.inner.lock() {
            let entry = state.counters.entry(event.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            let _ = writeln!(state.writer, "{line}");
        }
    }

    #[allow(dead_code)]
    pub fn counter(&self, event: &str) -> u64 {
        self.inner
            .lock()
            .map(|state| state.counters.get(event).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

pub(crate) fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

pub(crate) fn json_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}
