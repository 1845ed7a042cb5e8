//! OpenSSH client configuration.
//!
//! Reads `~/.ssh/config` followed by `/etc/ssh/ssh_config` and resolves the
//! effective settings for one host by walking the `Host` stanzas in
//! declaration order. As in OpenSSH, the first obtained value for a
//! directive wins.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::expand_path;
use crate::error::Result;

/// The `StrictHostKeyChecking` policy for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrictHostKeyChecking {
    /// Reject unknown keys (also the behaviour for `ask`, since there is no
    /// terminal to ask on during a parallel run)
    #[default]
    Yes,
    /// Accept and remember unknown keys with a warning
    AcceptNew,
    /// Accept anything silently
    No,
}

/// The effective configuration for a single host.
#[derive(Debug, Clone)]
pub struct ConfigBlock {
    /// User to authenticate as
    pub user: String,
    /// Port to dial
    pub port: u16,
    /// Host name override (`HostName` directive)
    pub hostname: Option<String>,
    /// Identity file restricting which agent key is used
    pub identity_file: Option<PathBuf>,
    /// Host key policy
    pub strict_host_key_checking: StrictHostKeyChecking,
    /// Verify unknown host keys against SSHFP DNS records
    pub verify_host_key_dns: bool,
}

#[derive(Debug)]
struct Stanza {
    patterns: Vec<String>,
    directives: Vec<(String, String)>,
}

impl Stanza {
    fn matches(&self, host: &str) -> bool {
        let mut matched = false;
        for pattern in &self.patterns {
            let (negated, pattern) = match pattern.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, pattern.as_str()),
            };
            let hit = glob::Pattern::new(pattern)
                .map(|p| p.matches(host))
                .unwrap_or(false);
            if hit {
                if negated {
                    return false;
                }
                matched = true;
            }
        }
        matched
    }
}

/// Parsed OpenSSH client configuration.
#[derive(Debug, Default)]
pub struct SshConfig {
    stanzas: Vec<Stanza>,
    default_user: String,
}

impl SshConfig {
    /// Reads the user and system configuration files. Missing files are
    /// fine; both missing yields a configuration of defaults.
    pub fn read_openssh_config() -> Result<Self> {
        let mut paths = Vec::new();
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".ssh").join("config"));
        }
        paths.push(PathBuf::from("/etc/ssh/ssh_config"));
        Self::from_files(&paths)
    }

    /// Parses specific configuration files, earlier files first.
    pub fn from_files(paths: &[PathBuf]) -> Result<Self> {
        let mut config = Self {
            stanzas: Vec::new(),
            default_user: current_user(),
        };
        for path in paths {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                config.parse(&content);
                debug!(path = %path.display(), "Parsed ssh configuration");
            }
        }
        Ok(config)
    }

    /// Parses configuration text, appending to any existing stanzas.
    pub fn parse(&mut self, content: &str) {
        // Directives before the first Host stanza apply to every host.
        let mut current = Stanza {
            patterns: vec!["*".to_string()],
            directives: Vec::new(),
        };
        let mut saw_host = false;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = match split_directive(line) {
                Some(parts) => parts,
                None => continue,
            };
            if key.eq_ignore_ascii_case("host") {
                if saw_host || !current.directives.is_empty() {
                    self.stanzas.push(current);
                }
                current = Stanza {
                    patterns: value.split_whitespace().map(String::from).collect(),
                    directives: Vec::new(),
                };
                saw_host = true;
            } else if !key.eq_ignore_ascii_case("match") {
                current
                    .directives
                    .push((key.to_ascii_lowercase(), value.to_string()));
            }
        }
        if saw_host || !current.directives.is_empty() {
            self.stanzas.push(current);
        }
    }

    /// Resolves the effective configuration for one host.
    pub fn for_host(&self, host: &str) -> ConfigBlock {
        let mut user = None;
        let mut port = None;
        let mut hostname = None;
        let mut identity_file = None;
        let mut strict = None;
        let mut verify_dns = None;

        for stanza in &self.stanzas {
            if !stanza.matches(host) {
                continue;
            }
            for (key, value) in &stanza.directives {
                match key.as_str() {
                    "user" => set_first(&mut user, || value.clone()),
                    "port" => {
                        if let Ok(p) = value.parse::<u16>() {
                            set_first(&mut port, || p);
                        }
                    }
                    "hostname" => set_first(&mut hostname, || value.clone()),
                    "identityfile" => set_first(&mut identity_file, || expand_path(value)),
                    "stricthostkeychecking" => {
                        let policy = match value.to_ascii_lowercase().as_str() {
                            "no" | "off" => StrictHostKeyChecking::No,
                            "accept-new" => StrictHostKeyChecking::AcceptNew,
                            _ => StrictHostKeyChecking::Yes,
                        };
                        set_first(&mut strict, || policy);
                    }
                    "verifyhostkeydns" => {
                        set_first(&mut verify_dns, || value.eq_ignore_ascii_case("yes"));
                    }
                    _ => {}
                }
            }
        }

        ConfigBlock {
            user: user.unwrap_or_else(|| self.default_user.clone()),
            port: port.unwrap_or(22),
            hostname,
            identity_file,
            strict_host_key_checking: strict.unwrap_or_default(),
            verify_host_key_dns: verify_dns.unwrap_or(false),
        }
    }
}

fn set_first<T>(slot: &mut Option<T>, value: impl FnOnce() -> T) {
    if slot.is_none() {
        *slot = Some(value());
    }
}

// "Key Value" or "Key=Value", with optional quotes around the value.
fn split_directive(line: &str) -> Option<(&str, &str)> {
    let (key, value) = match line.split_once(|c: char| c.is_whitespace() || c == '=') {
        Some(parts) => parts,
        None => return None,
    };
    let value = value.trim_start_matches(['=', ' ', '\t']).trim();
    let value = value.strip_prefix('"').unwrap_or(value);
    let value = value.strip_suffix('"').unwrap_or(value);
    Some((key, value))
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(content: &str) -> SshConfig {
        let mut config = SshConfig {
            stanzas: Vec::new(),
            default_user: "fallback".to_string(),
        };
        config.parse(content);
        config
    }

    #[test]
    fn test_first_match_wins_per_directive() {
        let config = config(
            "Host *.example.com\n\
             \tUser alice\n\
             Host *\n\
             \tUser bob\n\
             \tPort 2222\n",
        );
        let block = config.for_host("web1.example.com");
        assert_eq!(block.user, "alice");
        assert_eq!(block.port, 2222);

        let block = config.for_host("db1.example.org");
        assert_eq!(block.user, "bob");
    }

    #[test]
    fn test_defaults_without_matching_stanza() {
        let config = config("Host special\n\tPort 2022\n");
        let block = config.for_host("other");
        assert_eq!(block.user, "fallback");
        assert_eq!(block.port, 22);
        assert_eq!(block.strict_host_key_checking, StrictHostKeyChecking::Yes);
        assert!(!block.verify_host_key_dns);
    }

    #[test]
    fn test_negated_pattern_excludes_host() {
        let config = config("Host *.example.com !web1.example.com\n\tPort 2222\n");
        assert_eq!(config.for_host("web2.example.com").port, 2222);
        assert_eq!(config.for_host("web1.example.com").port, 22);
    }

    #[test]
    fn test_policies_and_dns_flag() {
        let config = config(
            "Host a\n\
             \tStrictHostKeyChecking accept-new\n\
             Host b\n\
             \tStrictHostKeyChecking no\n\
             \tVerifyHostKeyDNS yes\n",
        );
        assert_eq!(
            config.for_host("a").strict_host_key_checking,
            StrictHostKeyChecking::AcceptNew
        );
        let b = config.for_host("b");
        assert_eq!(b.strict_host_key_checking, StrictHostKeyChecking::No);
        assert!(b.verify_host_key_dns);
    }

    #[test]
    fn test_top_level_directives_apply_everywhere() {
        let config = config("User carol\n\nHost db*\n\tPort 2022\n");
        assert_eq!(config.for_host("db1").user, "carol");
        assert_eq!(config.for_host("db1").port, 2022);
        assert_eq!(config.for_host("web1").port, 22);
    }

    #[test]
    fn test_hostname_alias() {
        let config = config("Host jump\n\tHostName bastion.example.com\n");
        assert_eq!(
            config.for_host("jump").hostname.as_deref(),
            Some("bastion.example.com")
        );
    }
}
