//! Webhook URLs kept outside the config file.
//!
//! A webhook URL embeds its token, so `webhook_url` may name where to find
//! it instead of holding it inline:
//!
//! ```toml
//! webhook_url = "pass::discord/standup-hook"   # first line of `pass show`
//! webhook_url = "env::STANDUP_WEBHOOK"         # read from the environment
//! ```

use std::process::Command;

/// Where a configured value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Secret<'a> {
    /// The value itself.
    Inline(&'a str),
    /// An entry in the `pass` password store.
    Pass(&'a str),
    /// An environment variable.
    Env(&'a str),
}

impl<'a> Secret<'a> {
    pub fn parse(value: &'a str) -> Self {
        if let Some(entry) = value.strip_prefix("pass::") {
            Self::Pass(entry)
        } else if let Some(var) = value.strip_prefix("env::") {
            Self::Env(var)
        } else {
            Self::Inline(value)
        }
    }

    /// True unless the value is inline. Referenced values are only known at
    /// resolve time, so validation skips them.
    pub fn is_reference(&self) -> bool {
        !matches!(self, Self::Inline(_))
    }

    /// Looks the value up.
    pub fn resolve(&self) -> Result<String, String> {
        match *self {
            Self::Inline(value) => Ok(value.to_string()),
            Self::Env(var) => {
                std::env::var(var).map_err(|_| format!("environment variable `{}` is not set", var))
            }
            Self::Pass(entry) => pass_show(entry),
        }
    }
}

fn pass_show(entry: &str) -> Result<String, String> {
    let output = Command::new("pass")
        .args(["show", entry])
        .output()
        .map_err(|e| format!("cannot run pass: {}", e))?;

    if !output.status.success() {
        return Err(format!(
            "pass show {} exited with {}: {}",
            entry,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    match stdout.lines().next().map(str::trim) {
        Some(line) if !line.is_empty() => Ok(line.to_string()),
        _ => Err(format!("pass entry {} is empty", entry)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefixes() {
        assert_eq!(Secret::parse("pass::hooks/team"), Secret::Pass("hooks/team"));
        assert_eq!(Secret::parse("env::TEAM_HOOK"), Secret::Env("TEAM_HOOK"));
        assert_eq!(
            Secret::parse("https://discord.com/api/webhooks/1/token"),
            Secret::Inline("https://discord.com/api/webhooks/1/token")
        );
        assert!(Secret::parse("env::X").is_reference());
        assert!(!Secret::parse("https://example.com/hook").is_reference());
    }

    #[test]
    fn inline_resolves_to_itself() {
        assert_eq!(Secret::parse("").resolve().unwrap(), "");
        assert_eq!(
            Secret::parse("https://example.com/hook").resolve().unwrap(),
            "https://example.com/hook"
        );
    }

    #[test]
    fn env_reference() {
        unsafe {
            std::env::set_var("_ICALREMIND_TEST_WEBHOOK", "https://example.com/hook");
        }
        assert_eq!(
            Secret::parse("env::_ICALREMIND_TEST_WEBHOOK").resolve().unwrap(),
            "https://example.com/hook"
        );
        unsafe {
            std::env::remove_var("_ICALREMIND_TEST_WEBHOOK");
        }

        let err = Secret::parse("env::_ICALREMIND_UNSET_12345").resolve().unwrap_err();
        assert!(err.contains("not set"));
    }

    #[test]
    fn missing_pass_entry_errors() {
        // Fails whether or not `pass` is installed.
        assert!(Secret::parse("pass::nonexistent/entry/12345").resolve().is_err());
    }
}
