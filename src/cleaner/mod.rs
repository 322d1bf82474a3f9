//! Tool-specific output cleanup.
//!
//! Some tools bury a few useful lines under banners, progress bars and
//! colour codes. A cleaner is picked by looking at the command text; the
//! first registered cleaner that claims the command rewrites its output.
//! Output of unrecognised commands is returned untouched.

mod dirb;
mod msfconsole;

pub use dirb::DirbCleaner;
pub use msfconsole::MsfconsoleCleaner;

/// Rewrites the output of one family of commands.
pub trait OutputCleaner: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this cleaner handles output of `command`.
    fn applies_to(&self, command: &str) -> bool;

    fn clean(&self, output: &str) -> String;
}

/// Ordered set of cleaners.
pub struct CleanerRegistry {
    cleaners: Vec<Box<dyn OutputCleaner>>,
}

impl Default for CleanerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(DirbCleaner));
        registry.register(Box::new(MsfconsoleCleaner));
        registry
    }
}

impl CleanerRegistry {
    pub fn empty() -> Self {
        Self {
            cleaners: Vec::new(),
        }
    }

    pub fn register(&mut self, cleaner: Box<dyn OutputCleaner>) {
        self.cleaners.push(cleaner);
    }

    pub fn clean(&self, command: &str, output: &str) -> String {
        match self.cleaners.iter().find(|c| c.applies_to(command)) {
            Some(cleaner) => {
                tracing::debug!(cleaner = cleaner.name(), "cleaning command output");
                cleaner.clean(output)
            }
            None => output.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl OutputCleaner for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn applies_to(&self, command: &str) -> bool {
            command.starts_with("shout")
        }

        fn clean(&self, output: &str) -> String {
            output.to_uppercase()
        }
    }

    #[test]
    fn unknown_commands_pass_through() {
        let registry = CleanerRegistry::default();
        assert_eq!(registry.clean("ls -la", "\x1b[1mraw\x1b[0m"), "\x1b[1mraw\x1b[0m");
    }

    #[test]
    fn gobuster_is_not_treated_as_dirb() {
        let registry = CleanerRegistry::default();
        let out = "URL_BASE: http://x/\nnoise\n";
        assert_eq!(registry.clean("gobuster dir -w dirb/common.txt", out), out);
    }

    #[test]
    fn registered_cleaners_are_consulted_in_order() {
        let mut registry = CleanerRegistry::empty();
        registry.register(Box::new(Upper));
        registry.register(Box::new(MsfconsoleCleaner));
        assert_eq!(registry.clean("shout msfconsole", "hi"), "HI");
        assert_eq!(registry.clean("whisper", "hi"), "hi");
    }
}
