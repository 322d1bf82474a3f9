use std::sync::LazyLock;

use regex::Regex;

use super::OutputCleaner;
use crate::prompt::strip_ansi;

static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:URL_BASE:|WORDLIST_FILES:|GENERATED WORDS:|---- Scanning URL:)[^\r\n]*")
        .unwrap()
});
static HIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"http\S+ \(CODE:\d+\|SIZE:\d+\)").unwrap());
static STATS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"DOWNLOADED: \d+ - FOUND: \d+").unwrap());

/// Directory brute-forcer: keeps the scan header, hits with status codes
/// and the final counters.
pub struct DirbCleaner;

fn collect(re: &Regex, text: &str) -> String {
    re.find_iter(text)
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

impl OutputCleaner for DirbCleaner {
    fn name(&self) -> &str {
        "dirb"
    }

    fn applies_to(&self, command: &str) -> bool {
        command.contains("dirb") && !command.contains("gobuster")
    }

    fn clean(&self, output: &str) -> String {
        let text = strip_ansi(output);
        format!(
            "{}\n{}\n{}",
            collect(&SUMMARY_RE, &text),
            collect(&HIT_RE, &text),
            collect(&STATS_RE, &text)
        )
    }
}
