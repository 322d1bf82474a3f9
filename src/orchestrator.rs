//! Replays a task's commands through the session.
//!
//! Instruction text from the planner carries commands in
//! `<execute>...</execute>` blocks. They run one at a time and the output of
//! each is folded into an `Action:` / `Observation:` transcript. Two
//! recoveries look across command boundaries:
//!
//! - **Credential lookahead**: when a command ends on a password prompt, the
//!   next command is the credential and is sent at once. If the prompt comes
//!   back, the program is interrupted and the credential is sent once more,
//!   replacing the failed attempt in the transcript.
//! - **Sub-shell re-entry**: when a command lands in a file-transfer prompt
//!   that rejected it, the sub-shell is exited and the command re-issued,
//!   replacing the failed attempt in the transcript.
//!
//! Any session failure discards the whole transcript in favour of one fixed
//! sentence; a partial transcript would read as a complete one.

use std::sync::{Arc, LazyLock};
use std::thread;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::log::{ExecutionLog, LogEvent, record};
use crate::prompt::{CREDENTIAL, REJECTION, SUB_SHELL, last_line, output_lines, strip_ansi};
use crate::session::SessionAutomaton;
use crate::session::manager::SessionManager;
use crate::transport::SessionError;

/// Transcript returned when the session layer fails.
pub const SESSION_UNAVAILABLE: &str =
    "Before sending a remote command you need to set-up an SSH connection.";

const OPEN_TAG: &str = "<execute>";

static EXECUTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<execute>(.*?)</execute>").unwrap());

/// Commands inside `<execute>` blocks, in document order.
///
/// A block holding a stray open tag keeps only the text after the last one.
pub fn parse_commands(text: &str) -> Vec<String> {
    EXECUTE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let body = caps.get(1)?.as_str();
            let body = match body.rfind(OPEN_TAG) {
                Some(pos) => &body[pos + OPEN_TAG.len()..],
                None => body,
            };
            let command = body.trim();
            (!command.is_empty()).then(|| command.to_string())
        })
        .collect()
}

/// Append-only transcript with rollback to a recorded position.
#[derive(Debug, Default)]
pub struct Transcript {
    text: String,
}

/// Position in a [`Transcript`] to roll back to.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint(usize);

impl Transcript {
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.text.len())
    }

    /// Drop everything appended since `checkpoint`.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.text.truncate(checkpoint.0);
    }

    pub fn push_action(&mut self, command: &str) {
        self.text.push_str("Action:");
        self.text.push_str(command);
        self.text.push_str("\nObservation: ");
    }

    pub fn push_observation(&mut self, output: &str) {
        self.text.push_str(output);
        self.text.push('\n');
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

/// Commands parsed from one instruction and the transcript of running them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub commands: Vec<String>,
    pub transcript: String,
}

pub struct CommandOrchestrator<'a> {
    sessions: &'a SessionManager,
    log: Option<Arc<ExecutionLog>>,
    recovery_pause: Duration,
}

impl<'a> CommandOrchestrator<'a> {
    pub fn new(sessions: &'a SessionManager, log: Option<Arc<ExecutionLog>>) -> Self {
        Self {
            sessions,
            log,
            recovery_pause: Duration::from_millis(500),
        }
    }

    /// Pause after leaving a sub-shell before re-issuing the command.
    pub fn with_recovery_pause(mut self, pause: Duration) -> Self {
        self.recovery_pause = pause;
        self
    }

    /// Parse and run the commands in `instruction`.
    pub fn run(&self, action: &str, instruction: &str) -> Execution {
        let commands = parse_commands(instruction);
        if commands.is_empty() {
            debug!(action, "instruction holds no commands");
            return Execution {
                commands,
                transcript: String::new(),
            };
        }

        info!(action, count = commands.len(), "running commands");
        let transcript = match self
            .sessions
            .with_session(|session| self.replay(session, &commands))
        {
            Ok(transcript) => transcript,
            Err(e) => {
                warn!(error = %e, "session failure; discarding transcript");
                SESSION_UNAVAILABLE.to_string()
            }
        };
        Execution {
            commands,
            transcript,
        }
    }

    fn replay(
        &self,
        session: &mut SessionAutomaton,
        commands: &[String],
    ) -> Result<String, SessionError> {
        let mut transcript = Transcript::default();
        let mut i = 0;

        while i < commands.len() {
            let command = &commands[i];
            let action_start = transcript.checkpoint();
            transcript.push_action(command);
            let output = session.execute_command(command)?;
            transcript.push_observation(&output);

            let visible = strip_ansi(&output);
            let lines = output_lines(&visible);
            let last = lines.last().copied().unwrap_or_default();
            let mut step = 1;

            if CREDENTIAL.matches(last) {
                match commands.get(i + 1) {
                    Some(credential) => {
                        self.supply_credential(session, &mut transcript, credential)?;
                        step = 2;
                    }
                    None => {
                        debug!(command = %command, "password prompt with nothing to answer");
                        session.interrupt()?;
                    }
                }
            }

            let rejected_in_sub_shell = SUB_SHELL.matches(last)
                && lines.len() > 1
                && REJECTION.matches(lines[lines.len() - 2]);
            if rejected_in_sub_shell {
                info!(command = %command, "command landed in a sub-shell; re-issuing");
                record(
                    self.log.as_deref(),
                    LogEvent::SubShellRecovery {
                        command: command.clone(),
                    },
                );
                session.execute_command("exit")?;
                thread::sleep(self.recovery_pause);
                transcript.rollback(action_start);
                transcript.push_action(command);
                let fresh = session.execute_command(command)?;
                transcript.push_observation(&fresh);
            }

            i += step;
        }

        Ok(transcript.into_string())
    }

    fn supply_credential(
        &self,
        session: &mut SessionAutomaton,
        transcript: &mut Transcript,
        credential: &str,
    ) -> Result<(), SessionError> {
        let attempt_start = transcript.checkpoint();
        transcript.push_action(credential);
        let answer = session.execute_command(credential)?;
        transcript.push_observation(&answer);

        let prompted_again =
            last_line(&strip_ansi(&answer)).is_some_and(|line| CREDENTIAL.matches(line));
        if prompted_again {
            info!("credential rejected; interrupting and retrying once");
            record(
                self.log.as_deref(),
                LogEvent::CredentialRetry {
                    command: credential.to_string(),
                },
            );
            session.interrupt()?;
            transcript.rollback(attempt_start);
            transcript.push_action(credential);
            let retry = session.execute_command(credential)?;
            transcript.push_observation(&retry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::session::tests::fast_settings;
    use crate::transport::scripted::{ScriptedChannel, ScriptedConnector, SentLog, chunks};

    const PROMPT: &str = "kali@kali:~$ ";

    /// A manager whose single channel answers with `responder`.
    fn manager_with<F>(responder: F) -> (SessionManager, Arc<Mutex<Option<SentLog>>>)
    where
        F: Fn(&str) -> Vec<Vec<u8>> + Send + Sync + Clone + 'static,
    {
        let sent: Arc<Mutex<Option<SentLog>>> = Arc::default();
        let slot = Arc::clone(&sent);
        let (connector, _) = ScriptedConnector::new(move || {
            let responder = responder.clone();
            let (channel, log) = ScriptedChannel::new(move |input| Ok(responder(input)));
            *slot.lock().unwrap() = Some(log);
            Ok(channel)
        });
        (
            SessionManager::new(Box::new(connector), fast_settings(), None),
            sent,
        )
    }

    fn sent_lines(sent: &Arc<Mutex<Option<SentLog>>>) -> Vec<String> {
        sent.lock().unwrap().as_ref().unwrap().lines()
    }

    fn orchestrator(manager: &SessionManager) -> CommandOrchestrator<'_> {
        CommandOrchestrator::new(manager, None).with_recovery_pause(Duration::ZERO)
    }

    // ── parsing ──

    #[test]
    fn parses_commands_in_order() {
        assert_eq!(
            parse_commands("<execute> a </execute><execute> b </execute>"),
            vec!["a", "b"]
        );
        assert!(parse_commands("no tags here").is_empty());
    }

    #[test]
    fn parses_multiline_blocks_and_recovers_stray_open_tags() {
        let text = "First enumerate:\n<execute>\nnmap -sV\n  10.10.0.7\n</execute>\n\
                    then <execute>ls <execute> id </execute> and <execute>  </execute>";
        assert_eq!(parse_commands(text), vec!["nmap -sV\n  10.10.0.7", "id"]);
    }

    #[test]
    fn unterminated_block_is_ignored() {
        assert_eq!(
            parse_commands("<execute>whoami</execute><execute>id"),
            vec!["whoami"]
        );
    }

    // ── transcript ──

    #[test]
    fn transcript_rolls_back_to_checkpoint() {
        let mut t = Transcript::default();
        t.push_action("id");
        t.push_observation("uid=0(root)");
        let mark = t.checkpoint();
        t.push_action("whoami");
        t.push_observation("oops");
        t.rollback(mark);
        assert_eq!(t.as_str(), "Action:id\nObservation: uid=0(root)\n");
    }

    // ── replay ──

    #[test]
    fn runs_commands_into_transcript() {
        let (manager, sent) = manager_with(|input| match input {
            "id\n" => chunks(&["uid=0(root) gid=0(root)\r\n", "root@target:~# "]),
            _ => chunks(&["/root\r\n", "root@target:~# "]),
        });
        let run = orchestrator(&manager).run("Shell", "<execute>id</execute><execute>pwd</execute>");
        assert_eq!(run.commands, vec!["id", "pwd"]);
        assert_eq!(
            run.transcript,
            "Action:id\nObservation: uid=0(root) gid=0(root)\r\nroot@target:~# \n\
             Action:pwd\nObservation: /root\r\nroot@target:~# \n"
        );
        assert_eq!(sent_lines(&sent), vec!["id\n", "pwd\n"]);
    }

    #[test]
    fn password_prompt_sends_next_command_immediately() {
        let (manager, sent) = manager_with(|input| match input {
            "sudo -l\n" => chunks(&["[sudo] password for kali: "]),
            "kali\n" => chunks(&["\r\nUser kali may run the following commands\r\n", PROMPT]),
            _ => chunks(&["uid=1000(kali)\r\n", PROMPT]),
        });
        let run = orchestrator(&manager).run(
            "Shell",
            "<execute>sudo -l</execute><execute>kali</execute><execute>id</execute>",
        );
        assert_eq!(sent_lines(&sent), vec!["sudo -l\n", "kali\n", "id\n"]);
        assert_eq!(run.transcript.matches("Action:").count(), 3);
        assert!(run.transcript.contains("Action:kali\nObservation: \r\nUser kali may run"));
    }

    #[test]
    fn rejected_credential_is_retried_once_and_replaced() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let (manager, sent) = manager_with(move |input| match input {
            "su root\n" => chunks(&["Password: "]),
            "toor\n" if counter.fetch_add(1, Ordering::SeqCst) == 0 => {
                chunks(&["\r\nsu: Authentication failure\r\nPassword: "])
            }
            "toor\n" => chunks(&["\r\n", "root@kali:/home/kali# "]),
            _ => vec![],
        });
        let run = orchestrator(&manager).run("Shell", "<execute>su root</execute><execute>toor</execute>");

        assert_eq!(
            sent_lines(&sent),
            vec!["su root\n", "toor\n", "\x03", "toor\n"]
        );
        assert_eq!(
            run.transcript,
            "Action:su root\nObservation: Password: \n\
             Action:toor\nObservation: \r\nroot@kali:/home/kali# \n"
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn password_prompt_without_credential_interrupts() {
        let (manager, sent) = manager_with(|_| chunks(&["Password: "]));
        let run = orchestrator(&manager).run("Shell", "<execute>su root</execute>");
        assert_eq!(sent_lines(&sent), vec!["su root\n", "\x03"]);
        assert_eq!(run.transcript, "Action:su root\nObservation: Password: \n");
    }

    #[test]
    fn rejected_command_in_sub_shell_exits_and_reissues() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let (manager, sent) = manager_with(move |input| match input {
            "cat /etc/passwd\n" if counter.fetch_add(1, Ordering::SeqCst) == 0 => {
                chunks(&["cat: command not found\r\n", "smb: \\> "])
            }
            "cat /etc/passwd\n" => chunks(&["root:x:0:0:root:/root:/bin/bash\r\n", PROMPT]),
            "exit\n" => chunks(&[PROMPT]),
            _ => vec![],
        });
        let run = orchestrator(&manager).run("Shell", "<execute>cat /etc/passwd</execute>");

        assert_eq!(
            sent_lines(&sent),
            vec!["cat /etc/passwd\n", "exit\n", "cat /etc/passwd\n"]
        );
        assert_eq!(
            run.transcript,
            format!("Action:cat /etc/passwd\nObservation: root:x:0:0:root:/root:/bin/bash\r\n{PROMPT}\n")
        );
    }

    #[test]
    fn sub_shell_prompt_alone_is_left_alone() {
        let (manager, sent) = manager_with(|_| chunks(&["Try \"help\" to get a list\r\n", "smb: \\> "]));
        let run = orchestrator(&manager).run("Shell", "<execute>smbclient //10.10.0.7/share -N</execute>");
        assert_eq!(sent_lines(&sent), vec!["smbclient //10.10.0.7/share -N\n"]);
        assert!(run.transcript.ends_with("smb: \\> \n"));
    }

    #[test]
    fn session_failure_discards_partial_transcript() {
        let (connector, _) = ScriptedConnector::new(|| {
            Ok(ScriptedChannel::new(|input| {
                if input.starts_with("id") {
                    Ok(chunks(&["uid=0(root)\r\n", PROMPT]))
                } else {
                    Err(SessionError::Closed)
                }
            })
            .0)
        });
        let manager = SessionManager::new(Box::new(connector), fast_settings(), None);
        let run = orchestrator(&manager).run("Shell", "<execute>id</execute><execute>ls</execute>");
        assert_eq!(run.transcript, SESSION_UNAVAILABLE);
        assert_eq!(run.commands, vec!["id", "ls"]);
    }

    #[test]
    fn connect_failure_yields_fixed_sentence() {
        let (connector, _) = ScriptedConnector::new(|| {
            Err(SessionError::AuthenticationFailed {
                username: "root".to_string(),
                host: "10.10.0.5".to_string(),
            })
        });
        let manager = SessionManager::new(Box::new(connector), fast_settings(), None);
        let run = orchestrator(&manager).run("Shell", "<execute>id</execute>");
        assert_eq!(run.transcript, SESSION_UNAVAILABLE);
    }

    #[test]
    fn no_commands_never_touches_the_session() {
        let (connector, connects) = ScriptedConnector::new(|| Err(SessionError::Closed));
        let manager = SessionManager::new(Box::new(connector), fast_settings(), None);
        let run = orchestrator(&manager).run("Shell", "Nothing to run yet.");
        assert!(run.commands.is_empty());
        assert!(run.transcript.is_empty());
        assert_eq!(connects.load(Ordering::SeqCst), 0);
    }
}
