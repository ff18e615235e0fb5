use std::path::Path;

use crate::config::{Config, ConfigError};
use crate::sources::{AnySource, Source, SourceKind};

/// Title searched for when probing a source.
const PROBE_QUERY: &str = "naruto";

pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
        }
    }

    fn warning(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
        }
    }

    fn error(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
        }
    }

    pub fn icon(&self) -> &'static str {
        match self.status {
            CheckStatus::Ok => "✓",
            CheckStatus::Warning => "⚠",
            CheckStatus::Error => "✗",
        }
    }

    pub fn color(&self) -> &'static str {
        match self.status {
            CheckStatus::Ok => "\x1b[32m",      // green
            CheckStatus::Warning => "\x1b[33m", // yellow
            CheckStatus::Error => "\x1b[31m",   // red
        }
    }
}

pub async fn run_checks(config: &Config, config_path: Option<&Path>) -> Vec<CheckResult> {
    let mut results = vec![
        check_player(&config.player.command),
        check_config(config, config_path),
        check_presence(config),
    ];

    for kind in SourceKind::ALL {
        let source = AnySource::from_config(kind, &config.sources, &config.player.user_agent);
        results.push(check_source(&source).await);
    }

    results.push(check_storage(&config.storage.download_dir()));
    results
}

fn check_player(command: &str) -> CheckResult {
    match which::which(command) {
        Ok(path) => CheckResult::ok("Player", &format!("{} found at {}", command, path.display())),
        Err(_) => CheckResult::error("Player", &format!("'{}' not found in PATH", command)),
    }
}

fn check_config(config: &Config, path: Option<&Path>) -> CheckResult {
    let location = match path {
        Some(path) => path.display().to_string(),
        None => match Config::config_path() {
            Ok(path) if path.exists() => path.display().to_string(),
            Ok(_) => return CheckResult::ok("Config", "No config file, using defaults"),
            Err(ConfigError::NoConfigDir) => {
                return CheckResult::warning("Config", "No config directory on this platform");
            }
            Err(e) => return CheckResult::error("Config", &e.to_string()),
        },
    };

    match config.validate() {
        Ok(()) => CheckResult::ok("Config", &format!("Loaded {}", location)),
        Err(e) => CheckResult::error("Config", &format!("{}: {}", location, e)),
    }
}

fn check_presence(config: &Config) -> CheckResult {
    if config.presence.enabled {
        CheckResult::ok(
            "Discord",
            &format!("Rich Presence enabled (app {})", config.presence.app_id),
        )
    } else {
        CheckResult::warning("Discord", "Rich Presence disabled in config")
    }
}

async fn check_source<S: Source>(source: &S) -> CheckResult {
    let name = format!("Source {}", source.kind());
    match source.search(PROBE_QUERY).await {
        Ok(titles) if titles.is_empty() => {
            CheckResult::warning(&name, "Reachable, but a test search returned nothing")
        }
        Ok(titles) => CheckResult::ok(
            &name,
            &format!("Reachable, test search returned {} titles", titles.len()),
        ),
        Err(e) => CheckResult::error(&name, &format!("Search failed: {}", e)),
    }
}

fn check_storage(dir: &Path) -> CheckResult {
    if let Err(e) = std::fs::create_dir_all(dir) {
        return CheckResult::error("Downloads", &format!("Cannot create {}: {}", dir.display(), e));
    }

    let test_file = dir.join(".anistream_test");
    match std::fs::write(&test_file, "test") {
        Ok(_) => {
            let _ = std::fs::remove_file(&test_file);
            CheckResult::ok("Downloads", &format!("Writable: {}", dir.display()))
        }
        Err(e) => CheckResult::error("Downloads", &format!("{} not writable: {}", dir.display(), e)),
    }
}

/// (errors, warnings)
pub fn summarize(results: &[CheckResult]) -> (usize, usize) {
    let count = |status| results.iter().filter(|r| r.status == status).count();
    (count(CheckStatus::Error), count(CheckStatus::Warning))
}

pub fn print_results(results: &[CheckResult]) {
    let reset = "\x1b[0m";

    println!("\nanistream doctor\n");

    for result in results {
        println!(
            "  {}{} {}{}  {}",
            result.color(),
            result.icon(),
            result.name,
            reset,
            result.message
        );
    }

    println!();

    let (errors, warnings) = summarize(results);
    if errors > 0 {
        println!("  {} error(s), {} warning(s)", errors, warnings);
        println!("  Fix errors above to use anistream.\n");
    } else if warnings > 0 {
        println!(
            "  {} warning(s) - anistream will work with limited features.\n",
            warnings
        );
    } else {
        println!("  All checks passed!\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_player() {
        let result = check_player("anistream-no-such-player");
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.icon(), "✗");
    }

    #[test]
    fn test_invalid_config_reported() {
        let mut config = Config::default();
        config.sources.openanime.base_url = "ftp://nope".to_string();
        let result = check_config(&config, Some(Path::new("/etc/anistream.toml")));
        assert_eq!(result.status, CheckStatus::Error);
        assert!(result.message.contains("sources.openanime.base_url"));
    }

    #[test]
    fn test_presence_disabled_warns() {
        let mut config = Config::default();
        config.presence.enabled = false;
        assert_eq!(check_presence(&config).status, CheckStatus::Warning);
    }

    #[test]
    fn test_storage_writable() {
        let dir = std::env::temp_dir().join(format!("anistream-doctor-{}", std::process::id()));
        let result = check_storage(&dir);
        assert_eq!(result.status, CheckStatus::Ok);
        assert!(!dir.join(".anistream_test").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_summarize() {
        let results = vec![
            CheckResult::ok("a", ""),
            CheckResult::warning("b", ""),
            CheckResult::error("c", ""),
            CheckResult::error("d", ""),
        ];
        assert_eq!(summarize(&results), (2, 1));
    }
}
