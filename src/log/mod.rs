//! Structured execution log: one JSON line per event.
//!
//! Every deeppentest run writes a `.jsonl` file capturing what happened
//! against the target: session lifecycle, each command sent and how its
//! output ended, credential and sub-shell recovery, task progress and plan
//! rewrites. Each line is a self-contained JSON object with an RFC 3339
//! timestamp, so an engagement can be audited or replayed afterwards.

use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// One line of the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LogEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum LogEvent {
    SessionOpened { transport: String, target: String },
    SessionClosed { transport: String },
    /// A command was written to the shell.
    CommandSent { command: String },
    /// A command was refused before sending.
    CommandRefused { command: String, token: String },
    /// A receive call ended.
    OutputReceived {
        state: String,
        bytes: usize,
        ambiguous_polls: u32,
    },
    /// The credential after a password prompt was rejected and resent.
    CredentialRetry { command: String },
    /// A command landed in a file-transfer prompt and was re-issued.
    SubShellRecovery { command: String },
    TaskStarted { sequence: usize, instruction: String },
    TaskFinished {
        sequence: usize,
        success: bool,
        commands: usize,
    },
    PlanWritten { plan_id: String, tasks: usize },
    PlanMerged {
        plan_id: String,
        retained: usize,
        proposed: usize,
    },
    RunCompleted { summary: String },
    RunFailed { reason: String },
}

/// Append-only audit file for one run.
pub struct ExecutionLog {
    out: Mutex<LineWriter<File>>,
    path: PathBuf,
}

impl ExecutionLog {
    /// Open `path` for appending, creating it and its directory as needed.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
        }
        let file = File::options()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open execution log {}", path.display()))?;
        Ok(Self {
            out: Mutex::new(LineWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Append one timestamped event.
    pub fn log(&self, event: LogEvent) -> Result<()> {
        let mut line = serde_json::to_vec(&LogEntry {
            timestamp: Utc::now(),
            event,
        })
        .context("cannot encode log entry")?;
        line.push(b'\n');
        trace!(entry = %String::from_utf8_lossy(&line).trim_end(), "execution log");

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(&line)
            .with_context(|| format!("cannot append to {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Log to an optional execution log; a write failure is only a warning.
///
/// The session layer reports its own errors and must not fail a command
/// because the audit file is unwritable.
pub fn record(log: Option<&ExecutionLog>, event: LogEvent) {
    if let Some(log) = log
        && let Err(e) = log.log(event)
    {
        warn!(path = %log.path().display(), error = %e, "failed to write execution log");
    }
}
