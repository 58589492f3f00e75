use camino::Utf8Path;
use chrono::Local;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;

/// Characters written since the last flush that trigger the next flush
const FLUSH_THRESHOLD: usize = 1000;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %I:%M %p";

struct Sink {
    writer: BufWriter<Box<dyn Write + Send>>,
    unflushed: usize,
}

/// Plain-text log of one indexing run.
///
/// Lines look like `2024-05-01 03:15 PM - message`. Every line is also mirrored to
/// `tracing`. A log without a file (or whose file could not be opened) only mirrors.
pub struct RunLog {
    sink: Mutex<Option<Sink>>,
}

impl RunLog {
    /// Open `path` for writing, truncating it. Failure to open disables the file sink.
    pub fn open(path: Option<&Utf8Path>) -> Self {
        let Some(path) = path else {
            return Self::disabled();
        };
        match File::create(path) {
            Ok(file) => Self::to_writer(file),
            Err(e) => {
                tracing::warn!("Failed to open index log {}: {}", path, e);
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self {
            sink: Mutex::new(None),
        }
    }

    pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
        let writer: Box<dyn Write + Send> = Box::new(writer);
        Self {
            sink: Mutex::new(Some(Sink {
                writer: BufWriter::new(writer),
                unflushed: 0,
            })),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().is_some()
    }

    pub fn log(&self, message: &str) {
        tracing::info!(target: "addon_indexer::run_log", "{}", message);
        self.write_line(message);
    }

    pub fn log_warning(&self, message: &str, detail: Option<&str>) {
        tracing::warn!(target: "addon_indexer::run_log", "{}", message);
        let mut sink = self.lock();
        append(&mut sink, &format!("[WARNING] {}", message));
        if let Some(detail) = detail {
            append(&mut sink, detail);
        }
    }

    pub fn log_error(&self, message: &str, detail: Option<&str>) {
        match detail {
            Some(detail) => {
                tracing::error!(target: "addon_indexer::run_log", "{}: {}", message, detail)
            }
            None => tracing::error!(target: "addon_indexer::run_log", "{}", message),
        }
        let mut sink = self.lock();
        append(&mut sink, &format!("[ERROR] {}", message));
        if let Some(detail) = detail {
            append(&mut sink, detail);
        }
    }

    /// Flush and drop the file. Later lines are only mirrored to `tracing`.
    pub fn close(&self) {
        if let Some(mut sink) = self.lock().take() {
            if let Err(e) = sink.writer.flush() {
                tracing::warn!("Failed to flush index log: {}", e);
            }
        }
    }

    fn write_line(&self, message: &str) {
        append(&mut self.lock(), message);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Sink>> {
        self.sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn append(sink: &mut Option<Sink>, message: &str) {
    let Some(sink) = sink.as_mut() else {
        return;
    };
    let timestamp = Local::now().format(TIMESTAMP_FORMAT);
    if let Err(e) = writeln!(sink.writer, "{} - {}", timestamp, message) {
        tracing::debug!("Failed to write index log line: {}", e);
        return;
    }
    sink.unflushed += message.len() + 1;
    if sink.unflushed >= FLUSH_THRESHOLD {
        if let Err(e) = sink.writer.flush() {
            tracing::debug!("Failed to flush index log: {}", e);
        }
        sink.unflushed = 0;
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_lines_are_timestamped_and_prefixed() {
        let dir = TempDir::new().unwrap();
        let path = camino::Utf8PathBuf::try_from(dir.path().join("index.log")).unwrap();

        let log = RunLog::open(Some(&path));
        assert!(log.is_enabled());
        log.log("[BEGIN LOAD ADDONS]");
        log.log_warning("careful", None);
        log.log_error("broken", Some("cause: io"));
        log.close();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with(" - [BEGIN LOAD ADDONS]"));
        assert!(lines[1].ends_with(" - [WARNING] careful"));
        assert!(lines[2].ends_with(" - [ERROR] broken"));
        assert!(lines[3].ends_with(" - cause: io"));

        // "2024-05-01 03:15 PM - "
        let stamp = &lines[0][..19];
        assert!(stamp.ends_with("AM") || stamp.ends_with("PM"), "{stamp}");
    }

    #[test]
    fn test_unopenable_file_disables_sink() {
        let log = RunLog::open(Some(Utf8Path::new("/no/such/dir/index.log")));
        assert!(!log.is_enabled());
        log.log("ignored");
    }

    #[test]
    fn test_buffer_flushed_past_threshold() {
        let dir = TempDir::new().unwrap();
        let path = camino::Utf8PathBuf::try_from(dir.path().join("index.log")).unwrap();
        let log = RunLog::open(Some(&path));

        log.log(&"x".repeat(FLUSH_THRESHOLD));

        // Still open, but the line has reached the file
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains(&"x".repeat(FLUSH_THRESHOLD)));
    }
}
