//! Append-Only Event Stream
//!
//! Owns the `<project>.events/` directory layout and the JSONL stream
//! at `events/events.jsonl`: one UTF-8 JSON object per line, LF
//! terminated, never rewritten.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::CoreResult;

use super::EventEnvelope;

/// Result of reading the stream, tolerating corrupted lines.
#[derive(Debug)]
pub struct ReadResult {
    /// Successfully parsed envelopes, in file order.
    pub envelopes: Vec<EventEnvelope>,
    /// Lines that failed to parse (line number, error message).
    pub errors: Vec<(usize, String)>,
}

/// The project's append-only event stream.
pub struct EventLog {
    root: PathBuf,
}

impl EventLog {
    /// Creates a handle over `<project>.events/`, building the directory
    /// layout if needed (`events/`, reserved `snapshots/`).
    pub fn open<P: AsRef<Path>>(root: P) -> CoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("events"))?;
        std::fs::create_dir_all(root.join("snapshots"))?;
        Ok(Self { root })
    }

    /// The sidecar directory this log lives under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the JSONL stream.
    pub fn stream_path(&self) -> PathBuf {
        self.root.join("events").join("events.jsonl")
    }

    /// Path of the read-model database kept beside the stream.
    pub fn readmodel_path(&self) -> PathBuf {
        self.root.join("readmodels.sqlite")
    }

    /// Appends one envelope as one line.
    pub fn append(&self, envelope: &EventEnvelope) -> CoreResult<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.stream_path())?;
        let mut writer = BufWriter::new(file);
        let json = serde_json::to_string(envelope)?;
        writeln!(writer, "{json}")?;
        writer.flush()?;
        Ok(())
    }

    /// Reads the whole stream, collecting parse failures per line
    /// instead of aborting.
    pub fn read_all(&self) -> CoreResult<ReadResult> {
        let path = self.stream_path();
        if !path.exists() {
            return Ok(ReadResult {
                envelopes: vec![],
                errors: vec![],
            });
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut envelopes = Vec::new();
        let mut errors = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line_number = index + 1;
            match line {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<EventEnvelope>(trimmed) {
                        Ok(env) => envelopes.push(env),
                        Err(e) => errors.push((line_number, format!("JSON parse error: {e}"))),
                    }
                }
                Err(e) => errors.push((line_number, format!("IO error: {e}"))),
            }
        }

        Ok(ReadResult { envelopes, errors })
    }

    /// Number of non-empty lines in the stream.
    pub fn count(&self) -> CoreResult<usize> {
        let path = self.stream_path();
        if !path.exists() {
            return Ok(0);
        }
        let reader = BufReader::new(File::open(&path)?);
        Ok(reader
            .lines()
            .map_while(Result::ok)
            .filter(|l| !l.trim().is_empty())
            .count())
    }

    /// The last envelope, if any.
    pub fn last(&self) -> CoreResult<Option<EventEnvelope>> {
        Ok(self.read_all()?.envelopes.pop())
    }
}
