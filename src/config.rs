use anyhow::{Context, Result};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub participants: Roster,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// The organizer's chat. Integers and strings are both accepted.
    #[serde(default, deserialize_with = "de_opt_identifier")]
    pub admin_chat_id: Option<String>,
    /// Second path segment expected on inbound webhook calls.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Externally reachable base URL, used when registering the webhook.
    #[serde(default)]
    pub public_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default = "default_ref", rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub history_url: Option<String>,
    #[serde(default = "default_ref")]
    pub history_ref: String,
    #[serde(default = "default_history_file")]
    pub history_file: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastConfig {
    /// Maximum sends in flight during `/broadcast`; 1 keeps them sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// One roster entry: display name and the chat that receives broadcasts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub name: String,
    pub chat_id: String,
}

/// Participants in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster(Vec<Participant>);

impl Roster {
    #[cfg(test)]
    pub fn new(participants: Vec<Participant>) -> Self {
        Self(participants)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Participant> {
        self.0.iter()
    }

    /// Parse the `{"name": id, ...}` JSON object used by `PARTICIPANTS_JSON`.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Participants must be a JSON object of name -> chat id")
    }
}

impl<'de> Deserialize<'de> for Roster {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RosterVisitor;

        impl<'de> Visitor<'de> for RosterVisitor {
            type Value = Roster;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of participant name to chat id")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Roster, A::Error> {
                let mut participants: Vec<Participant> =
                    Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, id)) = map.next_entry::<String, Identifier>()? {
                    // Names are unique: a repeated key keeps its first position
                    // and takes the last value.
                    match participants.iter_mut().find(|p| p.name == name) {
                        Some(existing) => existing.chat_id = id.0,
                        None => participants.push(Participant {
                            name,
                            chat_id: id.0,
                        }),
                    }
                }
                Ok(Roster(participants))
            }
        }

        deserializer.deserialize_map(RosterVisitor)
    }
}

/// A chat identifier as written in config: either a number or a string.
/// Normalized to its string form so comparisons never depend on the type.
struct Identifier(String);

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(Identifier(n.to_string())),
            Raw::Text(s) if s.trim().is_empty() => {
                Err(de::Error::custom("chat id must not be empty"))
            }
            Raw::Text(s) => Ok(Identifier(normalize_identifier(&s))),
        }
    }
}

/// Integer-looking ids (`099`, `+99`) collapse to their canonical decimal
/// form; anything else is only trimmed.
fn normalize_identifier(raw: &str) -> String {
    let raw = raw.trim();
    match raw.parse::<i64>() {
        Ok(n) => n.to_string(),
        Err(_) => raw.to_string(),
    }
}

fn de_opt_identifier<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<Identifier>::deserialize(deserializer)?.map(|id| id.0))
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_ref() -> String {
    "main".to_string()
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_history_file() -> String {
    "secret_santa_history.json".to_string()
}

fn default_concurrency() -> usize {
    1
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            public_url: None,
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            repo: None,
            workflow: None,
            git_ref: default_ref(),
            token: None,
            api_base_url: default_api_base_url(),
            history_url: None,
            history_ref: default_ref(),
            history_file: default_history_file(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

impl GithubConfig {
    /// Where `/status` reads the draw history from, if a repository is known.
    pub fn effective_history_url(&self) -> Option<String> {
        if let Some(url) = &self.history_url {
            return Some(url.clone());
        }
        self.repo.as_ref().map(|repo| {
            format!(
                "https://raw.githubusercontent.com/{}/{}/{}",
                repo, self.history_ref, self.history_file
            )
        })
    }
}

impl Config {
    pub fn admin_chat_id(&self) -> Option<&str> {
        self.telegram.admin_chat_id.as_deref()
    }

    /// The inbound path secret; an empty value disables the check.
    pub fn webhook_secret(&self) -> Option<&str> {
        self.telegram
            .webhook_secret
            .as_deref()
            .filter(|s| !s.is_empty())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Build the configuration from the hosting environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty variables behave as unset.
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let participants = match var("PARTICIPANTS_JSON") {
            Some(raw) => Roster::from_json(&raw)?,
            None => Roster::default(),
        };

        let concurrency = match var("BROADCAST_CONCURRENCY") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("Invalid BROADCAST_CONCURRENCY: {}", raw))?,
            None => default_concurrency(),
        };

        let config = Config {
            telegram: TelegramConfig {
                bot_token: var("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
                admin_chat_id: var("ADMIN_CHAT_ID").map(|id| normalize_identifier(&id)),
                webhook_secret: var("TELEGRAM_SECRET"),
            },
            server: ServerConfig {
                listen: var("LISTEN_ADDR").unwrap_or_else(default_listen),
                public_url: var("PUBLIC_URL"),
            },
            github: GithubConfig {
                repo: var("GITHUB_REPO"),
                workflow: var("GITHUB_WORKFLOW"),
                git_ref: var("GITHUB_REF").unwrap_or_else(default_ref),
                token: var("GITHUB_TOKEN"),
                ..GithubConfig::default()
            },
            broadcast: BroadcastConfig { concurrency },
            participants,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("Telegram bot token is not configured");
        }
        if self.broadcast.concurrency == 0 {
            anyhow::bail!("broadcast concurrency must be at least 1");
        }
        Ok(())
    }
}
