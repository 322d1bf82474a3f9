use super::OutputCleaner;
use crate::prompt::strip_ansi;

const NOISE: [&str; 4] = ["loading", "warning:", "starting", "====="];

/// Exploitation console: drops the banner and module-loading chatter.
pub struct MsfconsoleCleaner;

impl OutputCleaner for MsfconsoleCleaner {
    fn name(&self) -> &str {
        "msfconsole"
    }

    fn applies_to(&self, command: &str) -> bool {
        command.contains("msfconsole")
    }

    fn clean(&self, output: &str) -> String {
        strip_ansi(output)
            .lines()
            .filter(|line| {
                let lower = line.to_lowercase();
                !NOISE.iter().any(|noise| lower.contains(noise))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_banner_noise_and_colour() {
        let raw = "[*] Starting the Metasploit Framework console...\n\
\x1b[32m=[ metasploit v6.3.4-dev ]\x1b[0m\n\
+ -- --=[ 2294 exploits - 1201 auxiliary ]\n\
=========================================\n\
[!] Warning: database not connected\n\
Loading modules\n\
msf6 exploit(multi/handler) > ";
        assert_eq!(
            MsfconsoleCleaner.clean(raw),
            "=[ metasploit v6.3.4-dev ]\n\
+ -- --=[ 2294 exploits - 1201 auxiliary ]\n\
msf6 exploit(multi/handler) > "
        );
    }

    #[test]
    fn applies_to_console_invocations() {
        assert!(MsfconsoleCleaner.applies_to("msfconsole -q -x 'use exploit/multi/handler'"));
        assert!(!MsfconsoleCleaner.applies_to("msfvenom -p linux/x64/shell_reverse_tcp"));
    }
}
