use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub chatwoot: ChatwootConfig,
    pub calendar: CalendarConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChatwootConfig {
    pub base_url: String,
    pub api_token: SecretString,
    pub account_id: i64,
    pub webhook_secret: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CalendarConfig {
    pub base_url: String,
    pub api_token: SecretString,
    pub calendar_id: String,
    pub timezone: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub freebusy_cache_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// Knobs for the conversation control plane: throttling, fragment grouping
/// and rolling context depth.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub rate_limit_max_messages: u32,
    pub rate_limit_window_secs: u64,
    pub message_group_delay_secs: u64,
    pub context_max_entries: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
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
    pub chatwoot_base_url: Option<String>,
    pub chatwoot_api_token: Option<String>,
    pub chatwoot_webhook_secret: Option<String>,
    pub calendar_api_token: Option<String>,
    pub calendar_id: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
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
                url: "sqlite://citabot.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            chatwoot: ChatwootConfig {
                base_url: String::new(),
                api_token: String::new().into(),
                account_id: 1,
                webhook_secret: None,
                timeout_secs: 30,
            },
            calendar: CalendarConfig {
                base_url: "https://www.googleapis.com/calendar/v3".to_string(),
                api_token: String::new().into(),
                calendar_id: String::new(),
                timezone: "America/Mexico_City".to_string(),
                timeout_secs: 30,
                max_retries: 3,
                freebusy_cache_ttl_secs: 300,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            pipeline: PipelineConfig {
                rate_limit_max_messages: 30,
                rate_limit_window_secs: 3600,
                message_group_delay_secs: 3,
                context_max_entries: 20,
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8000,
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
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
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("citabot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
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

        if let Some(chatwoot) = patch.chatwoot {
            if let Some(base_url) = chatwoot.base_url {
                self.chatwoot.base_url = base_url;
            }
            if let Some(api_token_value) = chatwoot.api_token {
                self.chatwoot.api_token = secret_value(api_token_value);
            }
            if let Some(account_id) = chatwoot.account_id {
                self.chatwoot.account_id = account_id;
            }
            if let Some(webhook_secret_value) = chatwoot.webhook_secret {
                self.chatwoot.webhook_secret = Some(secret_value(webhook_secret_value));
            }
            if let Some(timeout_secs) = chatwoot.timeout_secs {
                self.chatwoot.timeout_secs = timeout_secs;
            }
        }

        if let Some(calendar) = patch.calendar {
            if let Some(base_url) = calendar.base_url {
                self.calendar.base_url = base_url;
            }
            if let Some(api_token_value) = calendar.api_token {
                self.calendar.api_token = secret_value(api_token_value);
            }
            if let Some(calendar_id) = calendar.calendar_id {
                self.calendar.calendar_id = calendar_id;
            }
            if let Some(timezone) = calendar.timezone {
                self.calendar.timezone = timezone;
            }
            if let Some(timeout_secs) = calendar.timeout_secs {
                self.calendar.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = calendar.max_retries {
                self.calendar.max_retries = max_retries;
            }
            if let Some(ttl) = calendar.freebusy_cache_ttl_secs {
                self.calendar.freebusy_cache_ttl_secs = ttl;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(pipeline) = patch.pipeline {
            if let Some(max_messages) = pipeline.rate_limit_max_messages {
                self.pipeline.rate_limit_max_messages = max_messages;
            }
            if let Some(window_secs) = pipeline.rate_limit_window_secs {
                self.pipeline.rate_limit_window_secs = window_secs;
            }
            if let Some(delay_secs) = pipeline.message_group_delay_secs {
                self.pipeline.message_group_delay_secs = delay_secs;
            }
            if let Some(max_entries) = pipeline.context_max_entries {
                self.pipeline.context_max_entries = max_entries;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
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
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CITABOT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CITABOT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("CITABOT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CITABOT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CITABOT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CITABOT_CHATWOOT_BASE_URL") {
            self.chatwoot.base_url = value;
        }
        if let Some(value) = read_env("CITABOT_CHATWOOT_API_TOKEN") {
            self.chatwoot.api_token = secret_value(value);
        }
        if let Some(value) = read_env("CITABOT_CHATWOOT_ACCOUNT_ID") {
            self.chatwoot.account_id = parse_i64("CITABOT_CHATWOOT_ACCOUNT_ID", &value)?;
        }
        if let Some(value) = read_env("CITABOT_CHATWOOT_WEBHOOK_SECRET") {
            self.chatwoot.webhook_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("CITABOT_CHATWOOT_TIMEOUT_SECS") {
            self.chatwoot.timeout_secs = parse_u64("CITABOT_CHATWOOT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CITABOT_CALENDAR_BASE_URL") {
            self.calendar.base_url = value;
        }
        if let Some(value) = read_env("CITABOT_CALENDAR_API_TOKEN") {
            self.calendar.api_token = secret_value(value);
        }
        if let Some(value) = read_env("CITABOT_CALENDAR_ID") {
            self.calendar.calendar_id = value;
        }
        if let Some(value) = read_env("CITABOT_CALENDAR_TIMEZONE") {
            self.calendar.timezone = value;
        }
        if let Some(value) = read_env("CITABOT_CALENDAR_TIMEOUT_SECS") {
            self.calendar.timeout_secs = parse_u64("CITABOT_CALENDAR_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CITABOT_CALENDAR_MAX_RETRIES") {
            self.calendar.max_retries = parse_u32("CITABOT_CALENDAR_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("CITABOT_CALENDAR_FREEBUSY_CACHE_TTL_SECS") {
            self.calendar.freebusy_cache_ttl_secs =
                parse_u64("CITABOT_CALENDAR_FREEBUSY_CACHE_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("CITABOT_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("CITABOT_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CITABOT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CITABOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CITABOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CITABOT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CITABOT_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("CITABOT_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("CITABOT_RATE_LIMIT_MAX_MESSAGES") {
            self.pipeline.rate_limit_max_messages =
                parse_u32("CITABOT_RATE_LIMIT_MAX_MESSAGES", &value)?;
        }
        if let Some(value) = read_env("CITABOT_RATE_LIMIT_WINDOW_SECS") {
            self.pipeline.rate_limit_window_secs =
                parse_u64("CITABOT_RATE_LIMIT_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("CITABOT_MESSAGE_GROUP_DELAY_SECS") {
            self.pipeline.message_group_delay_secs =
                parse_u64("CITABOT_MESSAGE_GROUP_DELAY_SECS", &value)?;
        }
        if let Some(value) = read_env("CITABOT_CONTEXT_MAX_ENTRIES") {
            self.pipeline.context_max_entries =
                parse_u64("CITABOT_CONTEXT_MAX_ENTRIES", &value)? as usize;
        }

        if let Some(value) = read_env("CITABOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CITABOT_SERVER_PORT") {
            self.server.port = parse_u16("CITABOT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CITABOT_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_u16("CITABOT_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("CITABOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CITABOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("CITABOT_LOGGING_LEVEL").or_else(|| read_env("CITABOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CITABOT_LOGGING_FORMAT").or_else(|| read_env("CITABOT_LOG_FORMAT"));
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
        if let Some(base_url) = overrides.chatwoot_base_url {
            self.chatwoot.base_url = base_url;
        }
        if let Some(api_token) = overrides.chatwoot_api_token {
            self.chatwoot.api_token = secret_value(api_token);
        }
        if let Some(webhook_secret) = overrides.chatwoot_webhook_secret {
            self.chatwoot.webhook_secret = Some(secret_value(webhook_secret));
        }
        if let Some(api_token) = overrides.calendar_api_token {
            self.calendar.api_token = secret_value(api_token);
        }
        if let Some(calendar_id) = overrides.calendar_id {
            self.calendar.calendar_id = calendar_id;
        }
        if let Some(provider) = overrides.llm_provider {
            self.llm.provider = provider;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_chatwoot(&self.chatwoot)?;
        validate_calendar(&self.calendar)?;
        validate_llm(&self.llm)?;
        validate_pipeline(&self.pipeline)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("citabot.toml"), PathBuf::from("config/citabot.toml")]
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

fn validate_chatwoot(chatwoot: &ChatwootConfig) -> Result<(), ConfigError> {
    let base_url = chatwoot.base_url.trim();
    if !base_url.is_empty()
        && !base_url.starts_with("http://")
        && !base_url.starts_with("https://")
    {
        return Err(ConfigError::Validation(
            "chatwoot.base_url must start with http:// or https://".to_string(),
        ));
    }

    if !base_url.is_empty() && chatwoot.api_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "chatwoot.api_token is required when chatwoot.base_url is configured. Get it from Chatwoot > Profile Settings > Access Token".to_string(),
        ));
    }

    if chatwoot.account_id <= 0 {
        return Err(ConfigError::Validation(
            "chatwoot.account_id must be greater than zero".to_string(),
        ));
    }

    if chatwoot.timeout_secs == 0 || chatwoot.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "chatwoot.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_calendar(calendar: &CalendarConfig) -> Result<(), ConfigError> {
    let base_url = calendar.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "calendar.base_url must start with http:// or https://".to_string(),
        ));
    }

    if calendar.timezone.trim().is_empty() {
        return Err(ConfigError::Validation(
            "calendar.timezone must be an IANA timezone name (e.g. America/Mexico_City)"
                .to_string(),
        ));
    }

    if calendar.timeout_secs == 0 || calendar.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "calendar.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if calendar.max_retries > 10 {
        return Err(ConfigError::Validation(
            "calendar.max_retries must be at most 10".to_string(),
        ));
    }

    if calendar.freebusy_cache_ttl_secs == 0 || calendar.freebusy_cache_ttl_secs > 3600 {
        return Err(ConfigError::Validation(
            "calendar.freebusy_cache_ttl_secs must be in range 1..=3600".to_string(),
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

fn validate_pipeline(pipeline: &PipelineConfig) -> Result<(), ConfigError> {
    if pipeline.rate_limit_max_messages == 0 || pipeline.rate_limit_max_messages > 1000 {
        return Err(ConfigError::Validation(
            "pipeline.rate_limit_max_messages must be in range 1..=1000".to_string(),
        ));
    }

    if pipeline.rate_limit_window_secs < 60 || pipeline.rate_limit_window_secs > 86_400 {
        return Err(ConfigError::Validation(
            "pipeline.rate_limit_window_secs must be in range 60..=86400".to_string(),
        ));
    }

    if pipeline.message_group_delay_secs == 0 || pipeline.message_group_delay_secs > 60 {
        return Err(ConfigError::Validation(
            "pipeline.message_group_delay_secs must be in range 1..=60".to_string(),
        ));
    }

    if pipeline.context_max_entries == 0 || pipeline.context_max_entries > 100 {
        return Err(ConfigError::Validation(
            "pipeline.context_max_entries must be in range 1..=100".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation(
            "server.port must be greater than zero".to_string(),
        ));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.port == server.health_check_port {
        return Err(ConfigError::Validation(
            "server.port and server.health_check_port must differ".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
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

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    chatwoot: Option<ChatwootPatch>,
    calendar: Option<CalendarPatch>,
    llm: Option<LlmPatch>,
    pipeline: Option<PipelinePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatwootPatch {
    base_url: Option<String>,
    api_token: Option<String>,
    account_id: Option<i64>,
    webhook_secret: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CalendarPatch {
    base_url: Option<String>,
    api_token: Option<String>,
    calendar_id: Option<String>,
    timezone: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    freebusy_cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelinePatch {
    rate_limit_max_messages: Option<u32>,
    rate_limit_window_secs: Option<u64>,
    message_group_delay_secs: Option<u64>,
    context_max_entries: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
