//! Shell completion scripts for the deeppentest CLI.

use std::io::{self, Write};

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::{Shell, generate};

use crate::cli::{Cli, CompletionShell};

const BIN_NAME: &str = "deeppentest";

fn to_clap_shell(shell: CompletionShell) -> Shell {
    match shell {
        CompletionShell::Bash => Shell::Bash,
        CompletionShell::Zsh => Shell::Zsh,
        CompletionShell::Fish => Shell::Fish,
    }
}

pub fn write(shell: CompletionShell, out: &mut dyn Write) -> Result<()> {
    let mut cmd = Cli::command();
    generate(to_clap_shell(shell), &mut cmd, BIN_NAME, out);
    Ok(())
}

pub fn print(shell: CompletionShell) -> Result<()> {
    write(shell, &mut io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_scripts_mention_subcommands() {
        for shell in [
            CompletionShell::Bash,
            CompletionShell::Zsh,
            CompletionShell::Fish,
        ] {
            let mut buf = Vec::new();
            write(shell, &mut buf).unwrap();
            let script = String::from_utf8(buf).unwrap();
            assert!(script.contains(BIN_NAME), "{shell:?}");
            assert!(script.contains("exec"), "{shell:?}");
        }
    }
}
