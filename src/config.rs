use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context as _, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1";
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 10_000;
pub const MAX_TURNS_PER_TASK: usize = 25;
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_ATTACH_URL: &str = "http://127.0.0.1:9222";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Claude,
    OpenAi,
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(ProviderKind::Claude),
            "openai" => Ok(ProviderKind::OpenAi),
            other => Err(anyhow!("unknown provider '{}', expected claude or openai", other)),
        }
    }
}

/// Whether screenshots are returned to the agent as image content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageResponses {
    #[default]
    Allow,
    Omit,
}

impl FromStr for ImageResponses {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(ImageResponses::Allow),
            "omit" => Ok(ImageResponses::Omit),
            other => Err(anyhow!("unknown image response mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderKind,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_output_tokens: u32,
    pub max_turns: usize,
    pub one_shot: bool,
    pub image_responses: ImageResponses,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub attach_url: Option<String>,
    pub profile_dir: Option<PathBuf>,
    pub port: u16,
    pub transcript_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Claude,
            model: DEFAULT_CLAUDE_MODEL.to_string(),
            api_key: None,
            base_url: None,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            max_turns: MAX_TURNS_PER_TASK,
            one_shot: false,
            image_responses: ImageResponses::Allow,
            headless: true,
            chrome_path: None,
            attach_url: Some(DEFAULT_ATTACH_URL.to_string()),
            profile_dir: dirs::data_local_dir().map(|dir| dir.join("tabwright").join("profile")),
            port: DEFAULT_PORT,
            transcript_path: None,
        }
    }
}

impl Config {
    /// Reads `TABWRIGHT_*` variables and the provider API key from the
    /// process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(provider) = lookup("TABWRIGHT_PROVIDER") {
            config.provider = provider.parse()?;
            if config.provider == ProviderKind::OpenAi {
                config.model = DEFAULT_OPENAI_MODEL.to_string();
            }
        }
        if let Some(model) = lookup("TABWRIGHT_MODEL") {
            config.model = model;
        }
        config.api_key = match config.provider {
            ProviderKind::Claude => lookup("ANTHROPIC_API_KEY"),
            ProviderKind::OpenAi => lookup("OPENAI_API_KEY"),
        };
        config.base_url = lookup("TABWRIGHT_BASE_URL");
        if let Some(value) = lookup("TABWRIGHT_MAX_OUTPUT_TOKENS") {
            config.max_output_tokens = value
                .parse()
                .with_context(|| format!("invalid TABWRIGHT_MAX_OUTPUT_TOKENS '{}'", value))?;
        }
        if let Some(value) = lookup("TABWRIGHT_MAX_TURNS") {
            config.max_turns = value
                .parse()
                .with_context(|| format!("invalid TABWRIGHT_MAX_TURNS '{}'", value))?;
        }
        if let Some(value) = lookup("TABWRIGHT_ONE_SHOT") {
            config.one_shot = parse_flag(&value);
        }
        if let Some(value) = lookup("TABWRIGHT_IMAGE_RESPONSES") {
            config.image_responses = value.parse()?;
        }
        if let Some(value) = lookup("TABWRIGHT_HEADLESS") {
            config.headless = parse_flag(&value);
        }
        if let Some(path) = lookup("TABWRIGHT_CHROME_PATH") {
            config.chrome_path = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup("TABWRIGHT_ATTACH_URL") {
            config.attach_url = if url.is_empty() { None } else { Some(url) };
        }
        if let Some(port) = lookup("TABWRIGHT_PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("invalid TABWRIGHT_PORT '{}'", port))?;
        }
        if let Some(path) = lookup("TABWRIGHT_TRANSCRIPT") {
            config.transcript_path = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    pub fn require_api_key(&self) -> Result<&str> {
        let var = match self.provider {
            ProviderKind::Claude => "ANTHROPIC_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        };
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("{} not set in environment", var))
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
