//! Prompt patterns for remote shell output.
//!
//! Interactive tools on the remote host give no structured signal when they
//! want input. This module provides compiled pattern sets for the prompts
//! the session layer reacts to: confirmations it answers itself, credential
//! prompts the orchestrator feeds from the next command, and file-transfer
//! sub-shells it may have to leave and re-enter.
//!
//! All patterns run on a single line of *ANSI-stripped* text.

use std::sync::LazyLock;

use regex::{Regex, RegexSet};

/// One family of line patterns, matched as a set.
pub struct PromptPatterns {
    set: RegexSet,
}

impl PromptPatterns {
    fn new(patterns: &[&str]) -> Self {
        Self {
            set: RegexSet::new(patterns).expect("prompt patterns compile"),
        }
    }

    pub fn matches(&self, line: &str) -> bool {
        self.set.is_match(line)
    }
}

/// `[y/n]`, `[y/n/q]`, ssh host-key checks, `(yes/no)`.
pub static CONFIRMATION: LazyLock<PromptPatterns> = LazyLock::new(|| {
    PromptPatterns::new(&[
        r"(?i)\[y/n(?:/q)?\]",
        r"(?i)yes/no/\[fingerprint\]",
        r"(?i)\(yes/no\)",
    ])
});

/// `Password:`, `[sudo] password for kali:`.
pub static CREDENTIAL: LazyLock<PromptPatterns> = LazyLock::new(|| {
    PromptPatterns::new(&[r"(?i)password\s+for\b", r"(?i)password:"])
});

/// `smb: \>`, `ftp>`.
pub static SUB_SHELL: LazyLock<PromptPatterns> =
    LazyLock::new(|| PromptPatterns::new(&[r"smb:", r"ftp>"]));

pub static REJECTION: LazyLock<PromptPatterns> =
    LazyLock::new(|| PromptPatterns::new(&[r"command not found", r"\?Invalid command\."]));

static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    // CSI (ESC [ ... final), OSC (ESC ] ... BEL | ESC \\), two-byte ESC x.
    Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[^\[\]]").unwrap()
});

/// `input` without terminal escape sequences.
pub fn strip_ansi(input: &str) -> String {
    ANSI_RE.replace_all(input, "").into_owned()
}

/// Non-empty, trimmed lines of `output`, in order.
pub fn output_lines(output: &str) -> Vec<&str> {
    output
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Last non-empty line of `output`, trimmed.
pub fn last_line(output: &str) -> Option<&str> {
    output
        .rsplit('\n')
        .map(str::trim)
        .find(|line| !line.is_empty())
}
