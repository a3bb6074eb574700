// Activity history — append-only, timestamped log shared by all handlers

use parking_lot::Mutex;
use std::fmt::Display;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use tracing::warn;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Append-only history sink.
///
/// Entries look like:
///
/// ```text
/// ===> clipboard-text [2024-05-01 12:00:00]
/// hello world
/// ```
///
/// Writers are serialized by an internal mutex, so one `History` can be
/// shared by every handler.
pub struct History {
    target: Mutex<Box<dyn Write + Send>>,
}

impl History {
    /// Open (or create) `path` for appending, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_writer(file))
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            target: Mutex::new(Box::new(writer)),
        }
    }

    /// History that discards every entry.
    pub fn sink() -> Self {
        Self::from_writer(io::sink())
    }

    /// Append one entry. Write failures are logged, never returned.
    pub fn write(&self, name: &str, message: impl Display) {
        let now = chrono::Local::now().format(TIME_FORMAT);
        let entry = format!("===> {} [{}]\n{}\n", name, now, message);

        let mut target = self.target.lock();
        if let Err(e) = target
            .write_all(entry.as_bytes())
            .and_then(|_| target.flush())
        {
            warn!("write history file error: {}", e);
        }
    }
}

impl std::fmt::Debug for History {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("History").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_entries_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history");

        let history = History::open(&path).unwrap();
        history.write("clipboard-text", "first");
        history.write("clipboard-image", format_args!("{} size of image", "1.0KiB"));
        drop(history);

        // Reopening must not truncate.
        History::open(&path).unwrap().write("clipboard-text", "third");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("===> clipboard-text ["));
        assert_eq!(lines[1], "first");
        assert!(lines[2].starts_with("===> clipboard-image ["));
        assert_eq!(lines[3], "1.0KiB size of image");
        assert_eq!(lines[5], "third");
    }

    #[test]
    fn test_concurrent_writers_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        let history = Arc::new(History::open(&path).unwrap());

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let history = Arc::clone(&history);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        history.write("writer", format!("{}-{}", i, j));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 8 * 25 * 2);
        for pair in lines.chunks(2) {
            assert!(pair[0].starts_with("===> writer ["));
            assert!(pair[1].contains('-'));
        }
    }

    #[test]
    fn test_sink_accepts_writes() {
        History::sink().write("anything", "ignored");
    }
}
