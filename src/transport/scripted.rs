//! In-memory shell for tests.
//!
//! Every `send` is recorded and handed to a responder closure, whose chunks
//! are queued as output. Each `try_recv` yields one queued chunk; a queued
//! pause yields `None` once, which ends the current poll's drain.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{Connector, SessionError, ShellChannel};

type Responder = Box<dyn FnMut(&str) -> Result<Vec<Vec<u8>>, SessionError> + Send>;

/// Turn text pieces into output chunks.
pub fn chunks(parts: &[&str]) -> Vec<Vec<u8>> {
    parts.iter().map(|p| p.as_bytes().to_vec()).collect()
}

#[derive(Default)]
struct Shared {
    sent: Vec<String>,
    closes: usize,
}

/// Shared view of what a scripted channel was sent.
#[derive(Clone, Default)]
pub struct SentLog(Arc<Mutex<Shared>>);

impl SentLog {
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().sent.clone()
    }

    pub fn closes(&self) -> usize {
        self.0.lock().unwrap().closes
    }
}

pub struct ScriptedChannel {
    responder: Responder,
    pending: VecDeque<Option<Vec<u8>>>,
    log: SentLog,
}

impl ScriptedChannel {
    pub fn new<F>(responder: F) -> (Self, SentLog)
    where
        F: FnMut(&str) -> Result<Vec<Vec<u8>>, SessionError> + Send + 'static,
    {
        let log = SentLog::default();
        let channel = Self {
            responder: Box::new(responder),
            pending: VecDeque::new(),
            log: log.clone(),
        };
        (channel, log)
    }

    /// Queue output that appears without any input (banners, login prompts).
    pub fn push_output(&mut self, text: &str) {
        self.pending.push_back(Some(text.as_bytes().to_vec()));
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.pending.push_back(Some(bytes.to_vec()));
    }

    /// Make the next `try_recv` report no data even if more is queued.
    pub fn push_pause(&mut self) {
        self.pending.push_back(None);
    }
}

impl ShellChannel for ScriptedChannel {
    fn send(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let text = String::from_utf8_lossy(data).into_owned();
        self.log.0.lock().unwrap().sent.push(text.clone());
        let reply = (self.responder)(&text)?;
        self.pending.extend(reply.into_iter().map(Some));
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        Ok(self.pending.pop_front().flatten())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        self.log.0.lock().unwrap().closes += 1;
        Ok(())
    }
}

type ChannelFactory = Box<dyn Fn() -> Result<ScriptedChannel, SessionError> + Send + Sync>;

/// Connector handing out scripted channels; counts connection attempts.
pub struct ScriptedConnector {
    factory: ChannelFactory,
    connects: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new<F>(factory: F) -> (Self, Arc<AtomicUsize>)
    where
        F: Fn() -> Result<ScriptedChannel, SessionError> + Send + Sync + 'static,
    {
        let connects = Arc::new(AtomicUsize::new(0));
        let connector = Self {
            factory: Box::new(factory),
            connects: Arc::clone(&connects),
        };
        (connector, connects)
    }
}

impl Connector for ScriptedConnector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn target(&self) -> String {
        "memory".to_string()
    }

    fn connect(&self) -> Result<Box<dyn ShellChannel>, SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new((self.factory)()?))
    }
}
