use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::debug::json_escape;

// Opt-in JSONL span log for the hot stages (png_decode, deflate, layout,
// serialize). Each span logs its elapsed microseconds as it closes; totals
// aggregate per name and are written as summary lines when the logger drops.
#[derive(Clone)]
pub(crate) struct PerfLogger {
    inner: Arc<Mutex<PerfState>>,
}

struct PerfState {
    writer: BufWriter<File>,
    span_totals: HashMap<String, u64>,
    span_counts: HashMap<String, u64>,
    count_totals: HashMap<String, u64>,
}

impl PerfLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(PerfState {
                writer: BufWriter::new(file),
                span_totals: HashMap::new(),
                span_counts: HashMap::new(),
                count_totals: HashMap::new(),
            })),
        })
    }

    pub fn log_span_us(&self, name: &str, us: u64) {
        let json = format!(
            "{{\"type\":\"perf.span\",\"name\":\"{}\",\"unit\":\"us\",\"us\":{}}}",
            json_escape(name),
            us
        );
        if let Ok(mut state) = self.inner.lock() {
            let total = state.span_totals.entry(name.to_string()).or_insert(0);
            *total = total.saturating_add(us);
            let count = state.span_counts.entry(name.to_string()).or_insert(0);
            *count = count.saturating_add(1);
            let _ = writeln!(state.writer, "{json}");
        }
    }

    pub fn log_counts(&self, name: &str, counts: &[(&str, u64)]) {
        let mut out = format!(
            "{{\"type\":\"perf.counts\",\"name\":\"{}\",\"counts\":{{",
            json_escape(name)
        );
        for (idx, (key, value)) in counts.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            out.push_str(&format!("\"{}\":{}", json_escape(key), value));
        }
        out.push_str("}}");
        if let Ok(mut state) = self.inner.lock() {
            for (key, value) in counts {
                let full_key = format!("{name}.{key}");
                let entry = state.count_totals.entry(full_key).or_insert(0);
                *entry = entry.saturating_add(*value);
            }
            let _ = writeln!(state.writer, "{out}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

impl Drop for PerfState {
    fn drop(&mut self) {
        let mut spans: Vec<(&String, &u64)> = self.span_totals.iter().collect();
        spans.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (name, us) in spans {
            let count = *self.span_counts.get(name).unwrap_or(&1);
            let avg = if count == 0 { 0 } else { us / count };
            let _ = writeln!(
                self.writer,
                "{{\"type\":\"perf.summary\",\"name\":\"{}\",\"unit\":\"us\",\"agg\":\"sum\",\"us\":{},\"count\":{},\"avg_us\":{}}}",
                json_escape(name),
                us,
                count,
                avg
            );
        }

        let mut counts: Vec<(&String, &u64)> = self.count_totals.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (name, value) in counts {
            let _ = writeln!(
                self.writer,
                "{{\"type\":\"perf.summary.count\",\"name\":\"{}\",\"value\":{}}}",
                json_escape(name),
                value
            );
        }
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("clinicpad_perf_{}_{}.jsonl", std::process::id(), name))
    }

    #[test]
    fn spans_log_and_summarize_on_drop() {
        let path = temp_log("spans");
        {
            let logger = PerfLogger::new(&path).expect("create log");
            logger.log_span_us("png_decode", 120);
            logger.log_span_us("png_decode", 80);
            logger.log_span_us("serialize", 40);
            logger.log_counts("deflate", &[("chunks", 3)]);
        }
        let text = std::fs::read_to_string(&path).expect("read log");
        assert_eq!(
            text.lines()
                .filter(|l| l.contains("\"type\":\"perf.span\""))
                .count(),
            3
        );
        assert!(text.contains(
            "{\"type\":\"perf.summary\",\"name\":\"png_decode\",\"unit\":\"us\",\"agg\":\"sum\",\"us\":200,\"count\":2,\"avg_us\":100}"
        ));
        assert!(text.contains("\"name\":\"deflate.chunks\",\"value\":3"));
        let _ = std::fs::remove_file(&path);
    }
}
