//! End-of-output detection for the remote shell.
//!
//! An interactive program on the remote side never says "I'm done". After
//! every poll the session looks at the last non-empty line of what it has
//! read so far and decides whether control has returned.
//!
//! ## State machine
//!
//! ```text
//! READING         → nothing conclusive yet       → poll again
//! READING         → shell prompt / known dialog  → PROMPT_DETECTED
//! READING         → N ambiguous polls            → PROMPT_DETECTED
//! READING         → deadline passed              → TIMED_OUT (caller interrupts)
//! ```
//!
//! Ambiguous endings (`?`, `:`, `>`, confirmations, pagers) are counted per
//! poll, not per line, so a program parked on a sub-prompt is released after
//! a handful of poll intervals instead of the full timeout.

use std::time::Duration;

use crate::prompt::CONFIRMATION;

/// Dialog `apt` shows when an upgrade touches a locally modified sshd config.
pub const CONFIG_DIALOG_MARKER: &str =
    "What do you want to do about modified configuration file sshd_config?";

/// How a single line of output reads to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    /// `user@host:~$`, `bash-5.1#`: the shell is back.
    ShellPrompt,
    /// The hard-coded configuration-file dialog is on screen.
    ConfigDialog,
    /// Ends in `?`, `$`, `#` or shows a `--More--` pager.
    PromptLike,
    /// Ends in `:` (password and similar sub-prompts).
    SubPrompt,
    /// Ends in `>` (nested interpreters, file-transfer clients).
    NestedPrompt,
    /// A yes/no or fingerprint confirmation.
    Confirmation,
    /// Ordinary output.
    Output,
}

impl LineClass {
    pub fn is_terminal(self) -> bool {
        matches!(self, LineClass::ShellPrompt | LineClass::ConfigDialog)
    }

    pub fn is_ambiguous(self) -> bool {
        matches!(
            self,
            LineClass::PromptLike
                | LineClass::SubPrompt
                | LineClass::NestedPrompt
                | LineClass::Confirmation
        )
    }
}

/// Classify the last output line. `buffer` is everything read so far.
///
/// Rules are checked in priority order; the first that applies wins.
pub fn classify(last_line: &str, buffer: &str) -> LineClass {
    let ends_in_shell_sigil = last_line.ends_with('$') || last_line.ends_with('#');

    if ends_in_shell_sigil && (last_line.contains('@') || last_line.contains("bash")) {
        return LineClass::ShellPrompt;
    }
    if buffer.contains(CONFIG_DIALOG_MARKER) {
        return LineClass::ConfigDialog;
    }
    if last_line.ends_with('?')
        || ends_in_shell_sigil
        || last_line.to_lowercase().contains("--more--")
    {
        return LineClass::PromptLike;
    }
    if last_line.ends_with(':') && !last_line.contains("::") && !last_line.contains("-->") {
        return LineClass::SubPrompt;
    }
    if last_line.ends_with('>') && !last_line.contains('<') && !last_line.contains("-->") {
        return LineClass::NestedPrompt;
    }
    if CONFIRMATION.matches(last_line) {
        return LineClass::Confirmation;
    }
    LineClass::Output
}

/// Receive loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    /// Still reading; `retries` ambiguous polls so far.
    Reading { retries: u32 },
    /// The remote program handed control back (or is close enough).
    PromptDetected,
    /// The deadline passed with no conclusion.
    TimedOut,
}

impl ReceiveState {
    pub fn is_finished(self) -> bool {
        !matches!(self, ReceiveState::Reading { .. })
    }
}

/// Configuration for one receive call.
#[derive(Debug, Clone)]
pub struct ReceiveConfig {
    /// How long to read before giving up and interrupting.
    pub timeout: Duration,
    /// Ambiguous polls tolerated before treating output as complete.
    pub max_ambiguous_polls: u32,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_ambiguous_polls: 3,
        }
    }
}

/// Compute the next receive state from the current retry count, the last
/// output line (if any), the full buffer, and the time spent so far.
pub fn next_state(
    config: &ReceiveConfig,
    retries: u32,
    last_line: Option<&str>,
    buffer: &str,
    elapsed: Duration,
) -> ReceiveState {
    let mut retries = retries;

    if let Some(line) = last_line {
        // sudo prompts are counted twice so they resolve sooner.
        if line.contains("sudo") {
            retries += 1;
        }

        let class = classify(line, buffer);
        if class.is_terminal() {
            return ReceiveState::PromptDetected;
        }
        if class.is_ambiguous() {
            retries += 1;
        }
        if retries >= config.max_ambiguous_polls {
            return ReceiveState::PromptDetected;
        }
    }

    if elapsed > config.timeout {
        return ReceiveState::TimedOut;
    }
    ReceiveState::Reading { retries }
}

/// Stateful wrapper around [`next_state`] for one receive call.
pub struct PromptDetector {
    state: ReceiveState,
    config: ReceiveConfig,
}

impl PromptDetector {
    pub fn new(config: ReceiveConfig) -> Self {
        Self {
            state: ReceiveState::Reading { retries: 0 },
            config,
        }
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    /// Feed the result of one poll. Finished states are sticky.
    pub fn poll(&mut self, last_line: Option<&str>, buffer: &str, elapsed: Duration) -> ReceiveState {
        if let ReceiveState::Reading { retries } = self.state {
            self.state = next_state(&self.config, retries, last_line, buffer, elapsed);
        }
        self.state
    }
}
