//! Shell transports.
//!
//! A transport knows how to open one interactive shell and hand back a
//! [`ShellChannel`]: a byte pipe the session automaton writes commands into
//! and polls output from. The automaton never learns whether the shell is a
//! remote ssh login or a local pseudo-terminal.
//!
//! The local transport runs the shell inside a PTY, with a reader thread
//! copying PTY output into an `mpsc` channel so polling never blocks. The
//! ssh transport gets the same behaviour from a non-blocking ssh channel.

pub mod local;
#[cfg(test)]
pub mod scripted;
pub mod ssh;

use std::io::{Read, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use thiserror::Error;
use tracing::{debug, info};

/// Failures of the session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn {program}: {detail}")]
    Spawn { program: String, detail: String },
    #[error("session I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("ssh protocol error: {0}")]
    Ssh(#[from] ssh2::Error),
    #[error("session channel is closed")]
    Closed,
    #[error("authentication failed for {username}@{host}")]
    AuthenticationFailed { username: String, host: String },
    #[error("no shell prompt from {host} within {secs}s")]
    ConnectTimeout { host: String, secs: u64 },
}

/// One open interactive shell.
pub trait ShellChannel: Send {
    /// Write raw bytes to the shell's input.
    fn send(&mut self, data: &[u8]) -> Result<(), SessionError>;

    /// Next chunk of output if one is ready. Never blocks.
    ///
    /// Returns [`SessionError::Closed`] once the shell has exited and all
    /// buffered output has been drained.
    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, SessionError>;

    /// Tear the shell down. Safe to call more than once.
    fn close(&mut self) -> Result<(), SessionError>;
}

/// Opens shells for the session manager.
pub trait Connector: Send + Sync {
    /// Human-readable transport name for logs ("ssh", "local").
    fn name(&self) -> &str;

    /// Where the shell lives, for logs.
    fn target(&self) -> String;

    fn connect(&self) -> Result<Box<dyn ShellChannel>, SessionError>;
}

/// Configuration for spawning a shell process in a PTY.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Environment variables to set (key, value pairs).
    pub env: Vec<(String, String)>,
}

fn default_pty_size() -> PtySize {
    PtySize {
        rows: 50,
        cols: 200,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// A shell process running in a pseudo-terminal.
pub struct PtyChannel {
    writer: Box<dyn Write + Send>,
    output: Receiver<Vec<u8>>,
    child: Box<dyn Child + Send + Sync>,
    // Dropping the master hangs up the PTY; keep it for the channel's lifetime.
    _master: Box<dyn MasterPty + Send>,
    closed: bool,
}

impl PtyChannel {
    pub fn spawn(config: &SpawnConfig) -> Result<Self, SessionError> {
        let spawn_error = |detail: String| SessionError::Spawn {
            program: config.program.clone(),
            detail,
        };

        let pair = native_pty_system()
            .openpty(default_pty_size())
            .map_err(|e| spawn_error(format!("failed to open PTY: {e:#}")))?;

        let mut cmd = CommandBuilder::new(&config.program);
        for arg in &config.args {
            cmd.arg(arg);
        }
        for (key, val) in &config.env {
            cmd.env(key, val);
        }

        info!(program = %config.program, args = ?config.args, "spawning shell in PTY");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_error(format!("{e:#}")))?;

        // Only the master side is used from here on.
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_error(format!("failed to clone PTY reader: {e:#}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_error(format!("failed to take PTY writer: {e:#}")))?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("PTY read error (process likely exited): {e}");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            writer,
            output: rx,
            child,
            _master: pair.master,
            closed: false,
        })
    }
}

impl ShellChannel for PtyChannel {
    fn send(&mut self, data: &[u8]) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        match self.output.try_recv() {
            Ok(chunk) => Ok(Some(chunk)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SessionError::Closed),
        }
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.child.try_wait()?.is_none() {
            self.child.kill()?;
            let _ = self.child.wait();
        }
        debug!("PTY shell closed");
        Ok(())
    }
}

impl Drop for PtyChannel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn drain_until(channel: &mut PtyChannel, needle: &str) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            match channel.try_recv() {
                Ok(Some(chunk)) => seen.extend(chunk),
                Ok(None) => thread::sleep(Duration::from_millis(10)),
                Err(_) => break,
            }
            if String::from_utf8_lossy(&seen).contains(needle) {
                break;
            }
        }
        String::from_utf8_lossy(&seen).into_owned()
    }

    #[test]
    fn pty_channel_captures_output_then_reports_closed() {
        let mut channel = PtyChannel::spawn(&SpawnConfig {
            program: "printf".to_string(),
            args: vec!["hello from the pty\\n".to_string()],
            env: vec![],
        })
        .unwrap();

        let out = drain_until(&mut channel, "hello from the pty");
        assert!(out.contains("hello from the pty"), "got: {out:?}");

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut closed = false;
        while Instant::now() < deadline {
            match channel.try_recv() {
                Err(SessionError::Closed) => {
                    closed = true;
                    break;
                }
                _ => thread::sleep(Duration::from_millis(10)),
            }
        }
        assert!(closed, "reader should disconnect after the process exits");
        channel.close().unwrap();
        channel.close().unwrap();
    }

    #[test]
    fn spawn_reports_missing_program() {
        let result = PtyChannel::spawn(&SpawnConfig {
            program: "definitely-not-a-real-shell-binary".to_string(),
            args: vec![],
            env: vec![],
        });
        assert!(matches!(result, Err(SessionError::Spawn { .. })));
    }

    #[test]
    fn send_after_close_is_rejected() {
        let mut channel = PtyChannel::spawn(&SpawnConfig {
            program: "cat".to_string(),
            args: vec![],
            env: vec![],
        })
        .unwrap();
        channel.send(b"echo-me\n").unwrap();
        assert!(drain_until(&mut channel, "echo-me").contains("echo-me"));
        channel.close().unwrap();
        assert!(matches!(channel.send(b"x\n"), Err(SessionError::Closed)));
    }
}
