//! Session transcript
//!
//! Appends every command line and every response to a file with a local
//! timestamp, so a bench session can be replayed or compared later.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct Transcript {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl Transcript {
    /// Open `path` for appending and mark the start of a session
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open transcript file: {}", path.display()))?;

        let mut transcript = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        };
        transcript.record('#', "session start")?;
        Ok(transcript)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Line typed by the operator
    pub fn input(&mut self, line: &str) -> Result<()> {
        self.record('>', line)
    }

    /// Line printed back
    pub fn output(&mut self, line: &str) -> Result<()> {
        self.record('<', line)
    }

    fn record(&mut self, marker: char, line: &str) -> Result<()> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        writeln!(self.writer, "[{}] {} {}", timestamp, marker, line)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_transcript_records_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.log");

        let mut transcript = Transcript::create(&path).unwrap();
        transcript.input("write 3 4").unwrap();
        transcript.output("c = 12 (0000000c)").unwrap();
        assert_eq!(transcript.path(), path.as_path());

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("# session start"));
        assert!(lines[1].ends_with("> write 3 4"));
        assert!(lines[2].ends_with("< c = 12 (0000000c)"));
        assert!(lines[1].starts_with('['));
    }

    #[test]
    fn test_transcript_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.log");

        Transcript::create(&path).unwrap().input("sum").unwrap();
        Transcript::create(&path).unwrap().input("read").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 4);
    }

    #[test]
    fn test_transcript_bad_path() {
        let result = Transcript::create(Path::new("/nonexistent/dir/session.log"));
        assert!(result.is_err());
    }
}
