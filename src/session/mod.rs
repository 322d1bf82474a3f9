//! The session automaton: one persistent interactive shell driven by text
//! heuristics.
//!
//! `execute_command` writes a line, then polls until [`crate::detector`]
//! decides the remote program has handed control back or the deadline
//! passes. Confirmation prompts are answered with `yes` once. Output of
//! known noisy tools goes through the cleaner registry before it is
//! returned.
//!
//! Only one command may be in flight at a time; [`manager::SessionManager`]
//! serialises access.

pub mod manager;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cleaner::CleanerRegistry;
use crate::config::SessionConfig;
use crate::decode::{OutputDecoder, complete_prefix_len};
use crate::detector::{PromptDetector, ReceiveConfig, ReceiveState};
use crate::log::{ExecutionLog, LogEvent, record};
use crate::prompt::{CONFIRMATION, last_line, strip_ansi};
use crate::transport::{SessionError, ShellChannel};

/// Returned in place of output when a command hits the denylist.
pub const REFUSAL: &str = "Command not allowed: network tunneling tools are restricted";

const INTERRUPT: &[u8] = b"\x03";

/// Timing and safety knobs for one automaton.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub command_timeout: Duration,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub max_ambiguous_polls: u32,
    pub forbidden_commands: Vec<String>,
    pub setup_commands: Vec<String>,
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            command_timeout: config.command_timeout(),
            poll_interval: config.poll_interval(),
            settle_delay: config.settle_delay(),
            max_ambiguous_polls: config.max_ambiguous_polls,
            forbidden_commands: config.forbidden_commands.clone(),
            setup_commands: config.setup_commands.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// What one `receive` call collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub output: String,
    /// `PromptDetected` or `TimedOut`.
    pub state: ReceiveState,
    /// Ambiguous polls counted before the final one.
    pub ambiguous_polls: u32,
}

fn state_label(state: ReceiveState) -> &'static str {
    match state {
        ReceiveState::Reading { .. } => "reading",
        ReceiveState::PromptDetected => "prompt_detected",
        ReceiveState::TimedOut => "timed_out",
    }
}

pub struct SessionAutomaton {
    channel: Box<dyn ShellChannel>,
    settings: SessionSettings,
    decoder: OutputDecoder,
    cleaners: CleanerRegistry,
    // Bytes of a UTF-8 sequence split across reads.
    pending: Vec<u8>,
    log: Option<Arc<ExecutionLog>>,
}

impl SessionAutomaton {
    /// Wrap an open channel and run the banner-suppression setup commands.
    /// Failures during setup are logged and ignored.
    pub fn new(
        channel: Box<dyn ShellChannel>,
        settings: SessionSettings,
        log: Option<Arc<ExecutionLog>>,
    ) -> Self {
        let mut automaton = Self {
            channel,
            settings,
            decoder: OutputDecoder::default(),
            cleaners: CleanerRegistry::default(),
            pending: Vec::new(),
            log,
        };
        for cmd in automaton.settings.setup_commands.clone() {
            if let Err(e) = automaton.execute_command(&cmd) {
                warn!(command = %cmd, error = %e, "shell setup command failed");
            }
        }
        automaton
    }

    /// The denylisted token in `cmd`, if any.
    fn forbidden_token<'a>(&self, cmd: &'a str) -> Option<&'a str> {
        cmd.split_whitespace().find(|token| {
            self.settings
                .forbidden_commands
                .iter()
                .any(|forbidden| forbidden == token)
        })
    }

    /// Run one command and return its (cleaned) output.
    ///
    /// A denylisted command is never sent; the refusal text is returned in
    /// place of output so it shows up in the transcript.
    pub fn execute_command(&mut self, cmd: &str) -> Result<String, SessionError> {
        if let Some(token) = self.forbidden_token(cmd) {
            info!(command = %cmd, token, "refusing forbidden command");
            record(
                self.log.as_deref(),
                LogEvent::CommandRefused {
                    command: cmd.to_string(),
                    token: token.to_string(),
                },
            );
            return Ok(REFUSAL.to_string());
        }

        self.send_line(cmd)?;
        thread::sleep(self.settings.settle_delay);
        let mut output = self.receive(self.settings.command_timeout)?.output;

        let confirm = last_line(&strip_ansi(&output)).is_some_and(|line| CONFIRMATION.matches(line));
        if confirm {
            debug!(command = %cmd, "answering confirmation prompt");
            self.send_line("yes")?;
            thread::sleep(self.settings.settle_delay);
            output.push_str(&self.receive(self.settings.command_timeout)?.output);
        }

        Ok(self.cleaners.clean(cmd, &output))
    }

    fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        debug!(command = %line, "sending to shell");
        record(
            self.log.as_deref(),
            LogEvent::CommandSent {
                command: line.to_string(),
            },
        );
        self.channel.send(format!("{line}\n").as_bytes())
    }

    /// Poll the channel until the prompt detector finishes.
    ///
    /// On timeout an interrupt is sent and whatever arrived is returned.
    pub fn receive(&mut self, timeout: Duration) -> Result<Received, SessionError> {
        let start = Instant::now();
        let mut detector = PromptDetector::new(ReceiveConfig {
            timeout,
            max_ambiguous_polls: self.settings.max_ambiguous_polls,
        });
        let mut output = String::new();
        let mut ambiguous_polls = 0;

        loop {
            while let Some(chunk) = self.channel.try_recv()? {
                self.pending.extend(chunk);
            }
            let ready = complete_prefix_len(&self.pending);
            if ready > 0 {
                let bytes: Vec<u8> = self.pending.drain(..ready).collect();
                output.push_str(&self.decoder.decode(&bytes));
            }

            let visible = strip_ansi(&output);
            let state = detector.poll(last_line(&visible), &visible, start.elapsed());
            match state {
                ReceiveState::Reading { retries } => {
                    ambiguous_polls = retries;
                    thread::sleep(self.settings.poll_interval);
                }
                ReceiveState::PromptDetected => {
                    return Ok(self.finish_receive(output, state, ambiguous_polls));
                }
                ReceiveState::TimedOut => {
                    warn!(
                        timeout_secs = timeout.as_secs(),
                        bytes = output.len(),
                        "no prompt before deadline; interrupting"
                    );
                    self.interrupt()?;
                    return Ok(self.finish_receive(output, state, ambiguous_polls));
                }
            }
        }
    }

    fn finish_receive(&self, output: String, state: ReceiveState, ambiguous_polls: u32) -> Received {
        record(
            self.log.as_deref(),
            LogEvent::OutputReceived {
                state: state_label(state).to_string(),
                bytes: output.len(),
                ambiguous_polls,
            },
        );
        Received {
            output,
            state,
            ambiguous_polls,
        }
    }

    /// Send Ctrl-C and give the remote side a moment to react.
    pub fn interrupt(&mut self) -> Result<(), SessionError> {
        debug!("sending interrupt");
        self.channel.send(INTERRUPT)?;
        thread::sleep(self.settings.settle_delay);
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), SessionError> {
        self.channel.close()
    }
}
