//! Owner of the one shell session a run uses.
//!
//! The connection is opened lazily on first use and reused afterwards, so
//! shell state (working directory, open sub-shells) carries across tasks.
//! The mutex both serialises commands and guards the lazy open against a
//! double connect.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::{SessionAutomaton, SessionSettings};
use crate::log::{ExecutionLog, LogEvent, record};
use crate::transport::{Connector, SessionError};

pub struct SessionManager {
    connector: Box<dyn Connector>,
    settings: SessionSettings,
    log: Option<Arc<ExecutionLog>>,
    session: Mutex<Option<SessionAutomaton>>,
}

impl SessionManager {
    pub fn new(
        connector: Box<dyn Connector>,
        settings: SessionSettings,
        log: Option<Arc<ExecutionLog>>,
    ) -> Self {
        Self {
            connector,
            settings,
            log,
            session: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<SessionAutomaton>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Run `f` against the session, connecting first if needed.
    ///
    /// A session whose channel reports [`SessionError::Closed`] is dropped,
    /// so the next call opens a fresh one.
    pub fn with_session<T, F>(&self, f: F) -> Result<T, SessionError>
    where
        F: FnOnce(&mut SessionAutomaton) -> Result<T, SessionError>,
    {
        let mut guard = self.lock();
        if guard.is_none() {
            let channel = self.connector.connect()?;
            info!(
                transport = self.connector.name(),
                remote = %self.connector.target(),
                "session established"
            );
            record(
                self.log.as_deref(),
                LogEvent::SessionOpened {
                    transport: self.connector.name().to_string(),
                    target: self.connector.target(),
                },
            );
            *guard = Some(SessionAutomaton::new(
                channel,
                self.settings.clone(),
                self.log.clone(),
            ));
        }
        let session = guard.as_mut().ok_or(SessionError::Closed)?;
        let result = f(session);
        if matches!(result, Err(SessionError::Closed))
            && let Some(mut dead) = guard.take()
        {
            warn!(
                transport = self.connector.name(),
                "shell went away; reconnecting on next use"
            );
            let _ = dead.close();
            record(
                self.log.as_deref(),
                LogEvent::SessionClosed {
                    transport: self.connector.name().to_string(),
                },
            );
        }
        result
    }

    /// Tear the session down. Errors are ignored; a later call to
    /// [`Self::with_session`] connects again.
    pub fn close(&self) {
        let Some(mut session) = self.lock().take() else {
            return;
        };
        if let Err(e) = session.close() {
            debug!(error = %e, "error while closing session (ignored)");
        }
        info!(transport = self.connector.name(), "session closed");
        record(
            self.log.as_deref(),
            LogEvent::SessionClosed {
                transport: self.connector.name().to_string(),
            },
        );
    }
}
