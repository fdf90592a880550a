use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use tempra_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Setting {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

impl Setting {
    fn new(key: &'static str, env_key: &'static str, value: impl Into<String>) -> Self {
        Self { key, env_key, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for setting in settings(&config) {
        let source = field_source(
            setting.key,
            setting.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", setting.key, setting.value));
    }

    lines.join("\n")
}

fn settings(config: &AppConfig) -> Vec<Setting> {
    let intents: Vec<&str> =
        config.dialogue.enabled_intents.iter().map(|intent| intent.as_str()).collect();

    vec![
        Setting::new("database.url", "TEMPRA_DATABASE_URL", config.database.url.clone()),
        Setting::new(
            "database.max_connections",
            "TEMPRA_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        Setting::new(
            "database.timeout_secs",
            "TEMPRA_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs.to_string(),
        ),
        Setting::new("llm.provider", "TEMPRA_LLM_PROVIDER", format!("{:?}", config.llm.provider)),
        Setting::new("llm.model", "TEMPRA_LLM_MODEL", config.llm.model.clone()),
        Setting::new("llm.fast_model", "TEMPRA_LLM_FAST_MODEL", config.llm.fast_model()),
        Setting::new(
            "llm.base_url",
            "TEMPRA_LLM_BASE_URL",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
        ),
        Setting::new(
            "llm.api_key",
            "TEMPRA_LLM_API_KEY",
            redact_secret(config.llm.api_key.as_ref().map(|key| key.expose_secret())),
        ),
        Setting::new(
            "llm.timeout_secs",
            "TEMPRA_LLM_TIMEOUT_SECS",
            config.llm.timeout_secs.to_string(),
        ),
        Setting::new("agent.enabled", "TEMPRA_AGENT_ENABLED", config.agent.enabled.to_string()),
        Setting::new(
            "agent.max_steps",
            "TEMPRA_AGENT_MAX_STEPS",
            config.agent.max_steps.to_string(),
        ),
        Setting::new(
            "agent.repeat_threshold",
            "TEMPRA_AGENT_REPEAT_THRESHOLD",
            config.agent.repeat_threshold.to_string(),
        ),
        Setting::new("dialogue.enabled_intents", "TEMPRA_DIALOGUE_ENABLED_INTENTS", intents.join(",")),
        Setting::new(
            "dialogue.utc_offset_minutes",
            "TEMPRA_DIALOGUE_UTC_OFFSET_MINUTES",
            config.dialogue.utc_offset_minutes.to_string(),
        ),
        Setting::new(
            "providers.timeout_secs",
            "TEMPRA_PROVIDERS_TIMEOUT_SECS",
            config.providers.timeout_secs.to_string(),
        ),
        Setting::new(
            "providers.access_token",
            "TEMPRA_PROVIDERS_ACCESS_TOKEN",
            redact_secret(config.providers.access_token.as_ref().map(|token| token.expose_secret())),
        ),
        Setting::new("logging.level", "TEMPRA_LOGGING_LEVEL", config.logging.level.clone()),
        Setting::new(
            "logging.format",
            "TEMPRA_LOGGING_FORMAT",
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("tempra.toml"), PathBuf::from("config/tempra.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Keeps a short prefix so operators can tell keys apart without exposing them.
fn redact_secret(secret: Option<&str>) -> String {
    match secret.map(str::trim) {
        None => "<unset>".to_string(),
        Some("") => "<empty>".to_string(),
        Some(value) => match value.split_once('-') {
            Some((prefix, _)) if prefix.len() <= 8 => format!("{prefix}-***"),
            _ => "<redacted>".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_never_print_past_their_prefix() {
        assert_eq!(redact_secret(None), "<unset>");
        assert_eq!(redact_secret(Some("  ")), "<empty>");
        assert_eq!(redact_secret(Some("sk-abcdef123456")), "sk-***");
        assert_eq!(redact_secret(Some("ya29.a0AfH6SMB")), "<redacted>");
    }

    #[test]
    fn dotted_paths_walk_nested_tables() {
        let doc: toml::Value = "[llm]\nmodel = \"gpt-4o\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "llm.model"));
        assert!(!contains_path(&doc, "llm.api_key"));
        assert!(!contains_path(&doc, "database.url"));
    }
}
