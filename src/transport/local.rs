//! Local shell in a pseudo-terminal.
//!
//! Used when the toolbox host is the machine deeppentest runs on. The
//! prompt is pinned to `user@host:dir$` so end-of-output detection works
//! regardless of the user's shell profile.

use tracing::info;

use super::{Connector, PtyChannel, SessionError, ShellChannel, SpawnConfig};

const PROMPT: &str = r"\u@\h:\w\$ ";

pub struct LocalConnector {
    shell: String,
}

impl LocalConnector {
    pub fn new(shell: &str) -> Self {
        Self {
            shell: shell.to_string(),
        }
    }

    pub fn spawn_config(&self) -> SpawnConfig {
        let mut args = Vec::new();
        if self.shell.ends_with("bash") {
            // A profile could override PS1 again.
            args.push("--noprofile".to_string());
            args.push("--norc".to_string());
        }
        SpawnConfig {
            program: self.shell.clone(),
            args,
            env: vec![
                ("PS1".to_string(), PROMPT.to_string()),
                ("TERM".to_string(), "dumb".to_string()),
            ],
        }
    }
}

impl Connector for LocalConnector {
    fn name(&self) -> &str {
        "local"
    }

    fn target(&self) -> String {
        self.shell.clone()
    }

    fn connect(&self) -> Result<Box<dyn ShellChannel>, SessionError> {
        info!(shell = %self.shell, "opening local shell");
        Ok(Box::new(PtyChannel::spawn(&self.spawn_config())?))
    }
}
