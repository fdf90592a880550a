use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::intent::IntentLabel;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub dialogue: DialogueConfig,
    pub providers: ProvidersConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    /// Model used for extraction, planning and the agent loop.
    pub model: String,
    /// Model used for short classification calls. Falls back to `model`.
    pub fast_model: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl LlmConfig {
    pub fn fast_model(&self) -> &str {
        self.fast_model.as_deref().unwrap_or(&self.model)
    }
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub enabled: bool,
    pub max_steps: u32,
    pub repeat_threshold: u32,
    pub tool_timeout_secs: u64,
    pub max_result_chars: usize,
}

#[derive(Clone, Debug)]
pub struct DialogueConfig {
    pub enabled_intents: BTreeSet<IntentLabel>,
    pub continuation_window: usize,
    pub history_window: usize,
    pub utc_offset_minutes: i32,
    pub default_event_minutes: i64,
}

#[derive(Clone, Debug)]
pub struct ProvidersConfig {
    pub timeout_secs: u64,
    /// Token handed to calendar and email providers by the static credential source.
    pub access_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub agent_enabled: Option<bool>,
    pub agent_max_steps: Option<u32>,
    pub access_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://tempra.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                fast_model: None,
                timeout_secs: 30,
                max_retries: 2,
            },
            agent: AgentConfig {
                enabled: true,
                max_steps: 6,
                repeat_threshold: 2,
                tool_timeout_secs: 30,
                max_result_chars: 4_000,
            },
            dialogue: DialogueConfig {
                enabled_intents: IntentLabel::ALL.into_iter().collect(),
                continuation_window: 3,
                history_window: 40,
                utc_offset_minutes: 0,
                default_event_minutes: 60,
            },
            providers: ProvidersConfig { timeout_secs: 20, access_token: None },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("tempra.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(fast_model) = llm.fast_model {
                self.llm.fast_model = Some(fast_model);
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(enabled) = agent.enabled {
                self.agent.enabled = enabled;
            }
            if let Some(max_steps) = agent.max_steps {
                self.agent.max_steps = max_steps;
            }
            if let Some(repeat_threshold) = agent.repeat_threshold {
                self.agent.repeat_threshold = repeat_threshold;
            }
            if let Some(tool_timeout_secs) = agent.tool_timeout_secs {
                self.agent.tool_timeout_secs = tool_timeout_secs;
            }
            if let Some(max_result_chars) = agent.max_result_chars {
                self.agent.max_result_chars = max_result_chars;
            }
        }

        if let Some(dialogue) = patch.dialogue {
            if let Some(enabled_intents) = dialogue.enabled_intents {
                self.dialogue.enabled_intents =
                    parse_intents("dialogue.enabled_intents", enabled_intents.iter())?;
            }
            if let Some(continuation_window) = dialogue.continuation_window {
                self.dialogue.continuation_window = continuation_window;
            }
            if let Some(history_window) = dialogue.history_window {
                self.dialogue.history_window = history_window;
            }
            if let Some(utc_offset_minutes) = dialogue.utc_offset_minutes {
                self.dialogue.utc_offset_minutes = utc_offset_minutes;
            }
            if let Some(default_event_minutes) = dialogue.default_event_minutes {
                self.dialogue.default_event_minutes = default_event_minutes;
            }
        }

        if let Some(providers) = patch.providers {
            if let Some(timeout_secs) = providers.timeout_secs {
                self.providers.timeout_secs = timeout_secs;
            }
            if let Some(access_token) = providers.access_token {
                self.providers.access_token = Some(secret_value(access_token));
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TEMPRA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TEMPRA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("TEMPRA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TEMPRA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TEMPRA_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TEMPRA_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("TEMPRA_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("TEMPRA_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("TEMPRA_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("TEMPRA_LLM_FAST_MODEL") {
            self.llm.fast_model = Some(value);
        }
        if let Some(value) = read_env("TEMPRA_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("TEMPRA_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TEMPRA_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("TEMPRA_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("TEMPRA_AGENT_ENABLED") {
            self.agent.enabled = parse_bool("TEMPRA_AGENT_ENABLED", &value)?;
        }
        if let Some(value) = read_env("TEMPRA_AGENT_MAX_STEPS") {
            self.agent.max_steps = parse_u32("TEMPRA_AGENT_MAX_STEPS", &value)?;
        }
        if let Some(value) = read_env("TEMPRA_AGENT_REPEAT_THRESHOLD") {
            self.agent.repeat_threshold = parse_u32("TEMPRA_AGENT_REPEAT_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("TEMPRA_AGENT_TOOL_TIMEOUT_SECS") {
            self.agent.tool_timeout_secs = parse_u64("TEMPRA_AGENT_TOOL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TEMPRA_DIALOGUE_ENABLED_INTENTS") {
            self.dialogue.enabled_intents = parse_intents(
                "TEMPRA_DIALOGUE_ENABLED_INTENTS",
                value.split(',').filter(|part| !part.trim().is_empty()),
            )?;
        }
        if let Some(value) = read_env("TEMPRA_DIALOGUE_UTC_OFFSET_MINUTES") {
            self.dialogue.utc_offset_minutes =
                value.trim().parse::<i32>().map_err(|_| ConfigError::InvalidEnvOverride {
                    key: "TEMPRA_DIALOGUE_UTC_OFFSET_MINUTES".to_string(),
                    value: value.clone(),
                })?;
        }

        if let Some(value) = read_env("TEMPRA_PROVIDERS_TIMEOUT_SECS") {
            self.providers.timeout_secs = parse_u64("TEMPRA_PROVIDERS_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TEMPRA_PROVIDERS_ACCESS_TOKEN") {
            self.providers.access_token = Some(secret_value(value));
        }

        let log_level = read_env("TEMPRA_LOGGING_LEVEL").or_else(|| read_env("TEMPRA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TEMPRA_LOGGING_FORMAT").or_else(|| read_env("TEMPRA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(enabled) = overrides.agent_enabled {
            self.agent.enabled = enabled;
        }
        if let Some(max_steps) = overrides.agent_max_steps {
            self.agent.max_steps = max_steps;
        }
        if let Some(access_token) = overrides.access_token {
            self.providers.access_token = Some(secret_value(access_token));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_agent(&self.agent)?;
        validate_dialogue(&self.dialogue)?;
        validate_providers(&self.providers)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("tempra.toml"), PathBuf::from("config/tempra.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn parse_intents<I, S>(key: &str, values: I) -> Result<BTreeSet<IntentLabel>, ConfigError>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    let mut intents = BTreeSet::new();
    for value in values {
        let label = value.as_ref().parse::<IntentLabel>().map_err(|_| {
            ConfigError::Validation(format!(
                "{key} contains unknown intent `{}` (expected schedule|email|remind|todo|goal|general)",
                value.as_ref().trim()
            ))
        })?;
        intents.insert(label);
    }
    intents.insert(IntentLabel::General);
    Ok(intents)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if !(1..=16).contains(&agent.max_steps) {
        return Err(ConfigError::Validation("agent.max_steps must be in range 1..=16".to_string()));
    }

    if agent.repeat_threshold == 0 {
        return Err(ConfigError::Validation(
            "agent.repeat_threshold must be greater than zero".to_string(),
        ));
    }

    if agent.tool_timeout_secs == 0 || agent.tool_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "agent.tool_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if agent.max_result_chars < 64 {
        return Err(ConfigError::Validation(
            "agent.max_result_chars must be at least 64".to_string(),
        ));
    }

    Ok(())
}

fn validate_dialogue(dialogue: &DialogueConfig) -> Result<(), ConfigError> {
    if dialogue.continuation_window == 0 {
        return Err(ConfigError::Validation(
            "dialogue.continuation_window must be greater than zero".to_string(),
        ));
    }

    if dialogue.history_window < dialogue.continuation_window {
        return Err(ConfigError::Validation(
            "dialogue.history_window must be at least dialogue.continuation_window".to_string(),
        ));
    }

    if dialogue.utc_offset_minutes.abs() > 14 * 60 {
        return Err(ConfigError::Validation(
            "dialogue.utc_offset_minutes must be within -840..=840".to_string(),
        ));
    }

    if dialogue.default_event_minutes <= 0 || dialogue.default_event_minutes > 24 * 60 {
        return Err(ConfigError::Validation(
            "dialogue.default_event_minutes must be in range 1..=1440".to_string(),
        ));
    }

    Ok(())
}

fn validate_providers(providers: &ProvidersConfig) -> Result<(), ConfigError> {
    if providers.timeout_secs == 0 || providers.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "providers.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    agent: Option<AgentPatch>,
    dialogue: Option<DialoguePatch>,
    providers: Option<ProvidersPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    fast_model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    enabled: Option<bool>,
    max_steps: Option<u32>,
    repeat_threshold: Option<u32>,
    tool_timeout_secs: Option<u64>,
    max_result_chars: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct DialoguePatch {
    enabled_intents: Option<Vec<String>>,
    continuation_window: Option<usize>,
    history_window: Option<usize>,
    utc_offset_minutes: Option<i32>,
    default_event_minutes: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProvidersPatch {
    timeout_secs: Option<u64>,
    access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, LlmProvider};
    use crate::domain::intent::IntentLabel;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_and_enable_every_intent() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| format!("defaults should validate: {err}"))?;

        ensure(config.agent.max_steps == 6, "default step budget should be 6")?;
        ensure(config.agent.repeat_threshold == 2, "default repeat threshold should be 2")?;
        ensure(config.dialogue.continuation_window == 3, "continuation window should be 3")?;
        ensure(
            IntentLabel::ALL.iter().all(|label| config.dialogue.enabled_intents.contains(label)),
            "every intent should be enabled by default",
        )?;
        ensure(config.llm.fast_model() == "llama3.1", "fast model should fall back to model")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_TEMPRA_LLM_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("tempra.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "open_ai"
api_key = "${TEST_TEMPRA_LLM_KEY}"
model = "gpt-4o"
fast_model = "gpt-4o-mini"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::OpenAi, "provider should come from file")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be interpolated from environment",
            )?;
            ensure(config.llm.fast_model() == "gpt-4o-mini", "fast model should be set")?;
            Ok(())
        })();

        clear_vars(&["TEST_TEMPRA_LLM_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEMPRA_LOG_LEVEL", "warn");
        env::set_var("TEMPRA_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["TEMPRA_LOG_LEVEL", "TEMPRA_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEMPRA_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("TEMPRA_AGENT_MAX_STEPS", "4");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("tempra.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[agent]
max_steps = 3
repeat_threshold = 3

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.agent.max_steps == 4, "env step budget should win over file")?;
            ensure(config.agent.repeat_threshold == 3, "file threshold should win over default")?;
            Ok(())
        })();

        clear_vars(&["TEMPRA_DATABASE_URL", "TEMPRA_AGENT_MAX_STEPS"]);
        result
    }

    #[test]
    fn enabled_intents_parse_from_env_and_always_keep_general() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEMPRA_DIALOGUE_ENABLED_INTENTS", "schedule, todo");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let intents = &config.dialogue.enabled_intents;

            ensure(intents.len() == 3, "schedule, todo and general should be enabled")?;
            ensure(intents.contains(&IntentLabel::General), "general is always enabled")?;
            ensure(!intents.contains(&IntentLabel::Email), "email should be disabled")
        })();

        clear_vars(&["TEMPRA_DIALOGUE_ENABLED_INTENTS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEMPRA_AGENT_MAX_STEPS", "40");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("agent.max_steps")
            );
            ensure(has_message, "validation failure should mention agent.max_steps")
        })();

        clear_vars(&["TEMPRA_AGENT_MAX_STEPS"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEMPRA_LLM_TIMEOUT_SECS", "soon");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "TEMPRA_LLM_TIMEOUT_SECS", "error should name the variable")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("invalid override should fail".to_string()),
        };

        clear_vars(&["TEMPRA_LLM_TIMEOUT_SECS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEMPRA_LLM_PROVIDER", "anthropic");
        env::set_var("TEMPRA_LLM_API_KEY", "sk-ant-secret-value");
        env::set_var("TEMPRA_PROVIDERS_ACCESS_TOKEN", "ya29-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-ant-secret-value"), "debug output should not contain api key")?;
            ensure(
                !debug.contains("ya29-secret-value"),
                "debug output should not contain provider token",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["TEMPRA_LLM_PROVIDER", "TEMPRA_LLM_API_KEY", "TEMPRA_PROVIDERS_ACCESS_TOKEN"]);
        result
    }
}
