//! Append-only JSONL file sink.
//!
//! Several processes may share one log file, so every record is written
//! with `O_APPEND` and flushed before the lock is released.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

/// Shared handle to an append-mode log file.
#[derive(Clone)]
pub struct AppendWriter {
    file: Arc<Mutex<BufWriter<File>>>,
}

impl AppendWriter {
    /// Open (or create) `path`, creating missing parent directories.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            file: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl Write for AppendWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.file.lock();
        let written = file.write(buf)?;
        file.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for AppendWriter {
    type Writer = AppendWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_across_handles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messageq.jsonl");

        let mut first = AppendWriter::open(&path).unwrap();
        first.write_all(b"one\n").unwrap();
        let mut second = AppendWriter::open(&path).unwrap();
        second.write_all(b"two\n").unwrap();
        first.write_all(b"three\n").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "one\ntwo\nthree\n");
    }

    #[test]
    fn creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deeply").join("nested").join("log.jsonl");

        assert!(AppendWriter::open(&path).is_ok());
        assert!(path.exists());
    }
}
