//! Bot configuration, read from the environment (and `.env`, via dotenv).

use std::env;
use thiserror::Error;

pub const DEFAULT_PREFIX: &str = "!";
pub const DEFAULT_YTDLP: &str = "yt-dlp";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing {0} in the environment")]
    Missing(&'static str),

    #[error("Invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BotConfig {
    pub discord_token: String,
    /// Prefix that marks a message as a command.
    pub prefix: String,
    /// `yt-dlp` executable used for resolving and streaming.
    pub ytdlp_path: String,
}

impl BotConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let discord_token = lookup("DISCORD_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;

        let prefix = lookup("COMMAND_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string());
        if prefix.is_empty() || prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid {
                name: "COMMAND_PREFIX",
                reason: format!("`{}` must be non-empty and contain no whitespace", prefix),
            });
        }

        let ytdlp_path = lookup("YTDLP_PATH")
            .filter(|path| !path.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_YTDLP.to_string());

        Ok(Self {
            discord_token,
            prefix,
            ytdlp_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_the_token_is_set() {
        let config = BotConfig::from_lookup(lookup(&[("DISCORD_TOKEN", "abc")])).unwrap();

        assert_eq!(
            config,
            BotConfig {
                discord_token: "abc".to_string(),
                prefix: "!".to_string(),
                ytdlp_path: "yt-dlp".to_string(),
            }
        );
    }

    #[test]
    fn overrides_are_read() {
        let config = BotConfig::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("COMMAND_PREFIX", "mb!"),
            ("YTDLP_PATH", "/opt/bin/yt-dlp"),
        ]))
        .unwrap();

        assert_eq!(config.prefix, "mb!");
        assert_eq!(config.ytdlp_path, "/opt/bin/yt-dlp");
    }

    #[rstest]
    #[case(&[])]
    #[case(&[("DISCORD_TOKEN", "  ")])]
    fn token_is_required(#[case] vars: &[(&str, &str)]) {
        assert_eq!(
            BotConfig::from_lookup(lookup(vars)),
            Err(ConfigError::Missing("DISCORD_TOKEN"))
        );
    }

    #[rstest]
    #[case("")]
    #[case("! ")]
    #[case("m b")]
    fn bad_prefixes_are_rejected(#[case] prefix: &str) {
        let result = BotConfig::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("COMMAND_PREFIX", prefix),
        ]));

        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                name: "COMMAND_PREFIX",
                ..
            })
        ));
    }
}
