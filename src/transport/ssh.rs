//! Remote shell over a native ssh session.
//!
//! The connector opens a TCP connection, runs the ssh handshake, logs in
//! with the configured password (or the local agent when there is none) and
//! requests an interactive shell with a PTY, like a terminal login would.
//! Host keys are accepted without checking.
//!
//! Once the shell is up the session is switched to non-blocking mode so the
//! automaton can poll it the same way it polls a local PTY.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use ssh2::{Channel, Session};
use tracing::{debug, info, warn};

use super::{Connector, SessionError, ShellChannel};
use crate::decode::OutputDecoder;
use crate::detector::{LineClass, classify};
use crate::prompt::{last_line, strip_ansi};

const TERM: &str = "xterm";
const PTY_COLS: u32 = 200;
const PTY_ROWS: u32 = 50;
const WRITE_BACKOFF: Duration = Duration::from_millis(5);

/// Connection parameters for one ssh login.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
}

pub struct SshConnector {
    target: SshTarget,
    connect_timeout: Duration,
    poll_interval: Duration,
}

impl SshConnector {
    pub fn new(target: SshTarget, connect_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            target,
            connect_timeout,
            poll_interval,
        }
    }

    fn timeout_error(&self) -> SessionError {
        SessionError::ConnectTimeout {
            host: self.target.host.clone(),
            secs: self.connect_timeout.as_secs(),
        }
    }

    fn auth_error(&self) -> SessionError {
        SessionError::AuthenticationFailed {
            username: self.target.username.clone(),
            host: self.target.host.clone(),
        }
    }

    fn open_tcp(&self) -> Result<TcpStream, SessionError> {
        let addr = (self.target.host.as_str(), self.target.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                SessionError::Io(std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("cannot resolve {}", self.target.host),
                ))
            })?;
        let tcp = TcpStream::connect_timeout(&addr, self.connect_timeout).map_err(|e| {
            if e.kind() == ErrorKind::TimedOut {
                self.timeout_error()
            } else {
                SessionError::Io(e)
            }
        })?;
        tcp.set_nodelay(true)?;
        Ok(tcp)
    }

    fn login(&self) -> Result<Session, SessionError> {
        let mut session = Session::new()?;
        session.set_tcp_stream(self.open_tcp()?);
        session.set_timeout(u32::try_from(self.connect_timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake()?;

        let username = &self.target.username;
        let attempt = match self.target.password.as_deref() {
            Some(password) => session.userauth_password(username, password),
            None => session.userauth_agent(username),
        };
        if let Err(e) = attempt {
            warn!(host = %self.target.host, error = %e, "ssh server refused the credentials");
            return Err(self.auth_error());
        }
        if !session.authenticated() {
            return Err(self.auth_error());
        }
        Ok(session)
    }
}

impl Connector for SshConnector {
    fn name(&self) -> &str {
        "ssh"
    }

    fn target(&self) -> String {
        format!(
            "{}@{}:{}",
            self.target.username, self.target.host, self.target.port
        )
    }

    fn connect(&self) -> Result<Box<dyn ShellChannel>, SessionError> {
        info!(remote = %self.target(), "opening ssh session");
        let session = self.login()?;

        let mut channel = session.channel_session()?;
        channel.request_pty(TERM, None, Some((PTY_COLS, PTY_ROWS, 0, 0)))?;
        channel.shell()?;
        session.set_blocking(false);

        let mut shell = SshChannel {
            session,
            channel,
            closed: false,
        };
        if let Err(e) = await_shell(
            &mut shell,
            &self.target.host,
            self.connect_timeout,
            self.poll_interval,
        ) {
            let _ = shell.close();
            return Err(e);
        }
        Ok(Box::new(shell))
    }
}

/// Interactive shell channel of an authenticated ssh session.
pub struct SshChannel {
    session: Session,
    channel: Channel,
    closed: bool,
}

impl SshChannel {
    fn hung_up(&self) -> Result<Option<Vec<u8>>, SessionError> {
        if self.channel.eof() {
            Err(SessionError::Closed)
        } else {
            Ok(None)
        }
    }
}

impl ShellChannel for SshChannel {
    fn send(&mut self, data: &[u8]) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        let mut rest = data;
        while !rest.is_empty() {
            match self.channel.write(rest) {
                Ok(0) => return Err(SessionError::Closed),
                Ok(n) => rest = &rest[n..],
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(WRITE_BACKOFF),
                Err(e) => return Err(e.into()),
            }
        }
        loop {
            match self.channel.flush() {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(WRITE_BACKOFF),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        let mut buf = [0u8; 4096];
        match self.channel.read(&mut buf) {
            Ok(0) => self.hung_up(),
            Ok(n) => Ok(Some(buf[..n].to_vec())),
            Err(e) if e.kind() == ErrorKind::WouldBlock => self.hung_up(),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Teardown runs blocking, bounded by the session timeout.
        self.session.set_blocking(true);
        let _ = self.channel.send_eof();
        self.channel.close()?;
        let _ = self.channel.wait_close();
        let _ = self.session.disconnect(None, "session closed", None);
        debug!("ssh shell closed");
        Ok(())
    }
}

impl Drop for SshChannel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Wait for the login shell to show its prompt.
///
/// Silence until the deadline is a [`SessionError::ConnectTimeout`]. A
/// shell that printed something but no recognisable prompt is accepted
/// once the deadline passes; the automaton copes with odd prompts.
pub fn await_shell(
    channel: &mut dyn ShellChannel,
    host: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), SessionError> {
    let decoder = OutputDecoder::default();
    let start = Instant::now();
    let mut raw = Vec::new();

    loop {
        let mut fresh = false;
        while let Some(chunk) = channel.try_recv()? {
            raw.extend(chunk);
            fresh = true;
        }

        if fresh {
            let text = strip_ansi(&decoder.decode(&raw));
            if let Some(line) = last_line(&text)
                && classify(line, &text) == LineClass::ShellPrompt
            {
                debug!(prompt = line, "remote shell ready");
                return Ok(());
            }
        }

        if start.elapsed() > timeout {
            if raw.is_empty() {
                return Err(SessionError::ConnectTimeout {
                    host: host.to_string(),
                    secs: timeout.as_secs(),
                });
            }
            warn!(host, bytes = raw.len(), "no recognisable prompt after login; continuing");
            return Ok(());
        }
        thread::sleep(poll_interval);
    }
}
