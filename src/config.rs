use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;

use crate::llm::gateway::GatewaySettings;
use crate::llm::gemini::SafetyProfile;

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub log_level: String,
    pub log_dir: PathBuf,
    pub gemini_api_key: String,
    pub gemini_api_base: String,
    pub gemini_image_model: String,
    pub gemini_reasoning_model: String,
    pub gemini_safety_settings: SafetyProfile,
    pub gemini_timeout_seconds: u64,
    pub gemini_image_aspect_ratio: String,
    pub gemini_image_size: String,
    pub telegram_max_length: usize,
    /// Problems found while loading, logged once the subscriber is installed.
    pub startup_warnings: Vec<String>,
}

pub static CONFIG: Lazy<Config> = Lazy::new(|| match Config::load() {
    Ok(config) => config,
    Err(err) => {
        eprintln!("Invalid configuration: {err:#}");
        std::process::exit(1);
    }
});

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_string(lookup: Lookup, name: &str, default: &str) -> String {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u64(lookup: Lookup, name: &str, default: u64) -> u64 {
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(lookup: Lookup, name: &str, default: usize) -> usize {
    lookup(name)
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn normalize_gemini_safety_settings(value: &str, warnings: &mut Vec<String>) -> SafetyProfile {
    if value.trim().is_empty() {
        return SafetyProfile::Permissive;
    }
    SafetyProfile::parse(value).unwrap_or_else(|| {
        warnings.push(format!(
            "Unknown GEMINI_SAFETY_SETTINGS value '{value}'; defaulting to permissive."
        ));
        SafetyProfile::Permissive
    })
}

impl Config {
    fn load() -> Result<Self> {
        Self::from_lookup(&|name| env::var(name).ok())
    }

    fn from_lookup(lookup: Lookup) -> Result<Self> {
        let bot_token = env_string(lookup, "BOT_TOKEN", "");
        if bot_token.is_empty() {
            return Err(anyhow::anyhow!("BOT_TOKEN is required"));
        }

        let mut startup_warnings = Vec::new();
        let gemini_api_key = env_string(lookup, "GEMINI_API_KEY", "");
        if gemini_api_key.is_empty() {
            startup_warnings
                .push("GEMINI_API_KEY is not set; model calls will fail and fall back".to_string());
        }
        let gemini_safety_settings = normalize_gemini_safety_settings(
            &env_string(lookup, "GEMINI_SAFETY_SETTINGS", "permissive"),
            &mut startup_warnings,
        );
        let telegram_max_length = env_usize(lookup, "TELEGRAM_MAX_LENGTH", 4000).clamp(256, 4096);

        Ok(Config {
            bot_token,
            log_level: env_string(lookup, "LOG_LEVEL", "info").to_lowercase(),
            log_dir: PathBuf::from(env_string(lookup, "LOG_DIR", "logs")),
            gemini_api_key,
            gemini_api_base: env_string(
                lookup,
                "GEMINI_API_BASE",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            gemini_image_model: env_string(
                lookup,
                "GEMINI_IMAGE_MODEL",
                "gemini-3-pro-image-preview",
            ),
            gemini_reasoning_model: env_string(
                lookup,
                "GEMINI_REASONING_MODEL",
                "gemini-3-pro-preview",
            ),
            gemini_safety_settings,
            gemini_timeout_seconds: env_u64(lookup, "GEMINI_TIMEOUT_SECONDS", 120).max(1),
            gemini_image_aspect_ratio: env_string(lookup, "GEMINI_IMAGE_ASPECT_RATIO", "16:9"),
            gemini_image_size: env_string(lookup, "GEMINI_IMAGE_SIZE", ""),
            telegram_max_length,
            startup_warnings,
        })
    }

    pub fn gemini_timeout(&self) -> Duration {
        Duration::from_secs(self.gemini_timeout_seconds)
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            image_model: self.gemini_image_model.clone(),
            reasoning_model: self.gemini_reasoning_model.clone(),
            safety: self.gemini_safety_settings,
            aspect_ratio: Some(self.gemini_image_aspect_ratio.clone()),
            image_size: Some(self.gemini_image_size.clone()).filter(|size| !size.is_empty()),
        }
    }
}
