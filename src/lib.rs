//! Plan-driven penetration testing over a supervised interactive shell.
//!
//! Two engines make up the crate:
//! - the task planning side ([`task`], [`dag`], [`merge`], [`scheduler`]):
//!   ordering, persisting and re-planning work items,
//! - the session side ([`transport`], [`detector`], [`session`],
//!   [`orchestrator`]): driving one long-lived shell and deciding from text
//!   alone when a command has finished.

pub mod cleaner;
pub mod cli;
pub mod config;
pub mod dag;
pub mod decode;
pub mod detector;
pub mod executor;
pub mod log;
pub mod merge;
pub mod operator;
pub mod orchestrator;
pub mod paths;
pub mod prompt;
pub mod report;
pub mod scheduler;
pub mod session;
pub mod shell_completion;
pub mod task;
pub mod transport;
