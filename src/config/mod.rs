//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::{
    application::{
        gateway::{
            DEFAULT_GEMINI_BASE_URL, DEFAULT_MAX_TOKENS, DEFAULT_OPENROUTER_BASE_URL,
            DEFAULT_TEMPERATURE, DEFAULT_TIMEOUT,
        },
        render::{DEFAULT_DIAGRAM_MARKER, DEFAULT_SETTLE_DELAY, DiagramMarker},
    },
    domain::Provider,
};

pub use cli::{
    CliArgs, Command, ExportArgs, GenerateArgs, GlobalOverrides, KeysArgs, KeysCommand,
    PreviewArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "appunti";
const ENV_PREFIX: &str = "APPUNTI";
const DEFAULT_MERMAID_THEME: &str = "dark";
const DEFAULT_CREDENTIALS_FILE: &str = "credentials.toml";
pub(crate) const DEFAULT_MERMAID_CLI_PATH: &str = "mmdc";
pub(crate) const DEFAULT_MERMAID_CACHE_DIR: &str = "/tmp/appunti-mermaid";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub gateway: GatewaySettings,
    pub credentials: CredentialSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub settle_delay: Duration,
    pub diagram_marker: DiagramMarker,
    pub sanitize: bool,
    pub mermaid_cli_path: PathBuf,
    pub mermaid_cache_dir: PathBuf,
    pub mermaid_theme: String,
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub provider: Provider,
    /// `None` selects the provider's default model.
    pub model: Option<String>,
    pub gemini_base_url: Url,
    pub openrouter_base_url: Url,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CredentialSettings {
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_global_overrides(&cli.overrides);
    if let Command::Generate(args) = &cli.command {
        raw.apply_generate_overrides(args);
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    gateway: RawGatewaySettings,
    credentials: RawCredentialSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(delay) = overrides.settle_delay_ms {
            self.render.settle_delay_ms = Some(delay);
        }
        if let Some(path) = overrides.mermaid_cli_path.as_ref() {
            self.render.mermaid_cli_path = Some(path.clone());
        }
        if let Some(dir) = overrides.mermaid_cache_dir.as_ref() {
            self.render.mermaid_cache_dir = Some(dir.clone());
        }
        if let Some(sanitize) = overrides.sanitize {
            self.render.sanitize = Some(sanitize);
        }
        if let Some(path) = overrides.credentials_path.as_ref() {
            self.credentials.path = Some(path.clone());
        }
    }

    fn apply_generate_overrides(&mut self, args: &GenerateArgs) {
        if let Some(provider) = args.provider {
            self.gateway.provider = Some(provider.as_str().to_string());
        }
        if let Some(model) = args.model.as_ref() {
            self.gateway.model = Some(model.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            render,
            gateway,
            credentials,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            render: build_render_settings(render)?,
            gateway: build_gateway_settings(gateway)?,
            credentials: build_credential_settings(credentials)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::WARN,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let settle_delay = match render.settle_delay_ms {
        Some(0) => {
            return Err(LoadError::invalid(
                "render.settle_delay_ms",
                "must be greater than zero",
            ));
        }
        Some(millis) => Duration::from_millis(millis),
        None => DEFAULT_SETTLE_DELAY,
    };

    let marker = render
        .diagram_marker
        .unwrap_or_else(|| DEFAULT_DIAGRAM_MARKER.to_string());
    let diagram_marker = DiagramMarker::new(&marker)
        .map_err(|err| LoadError::invalid("render.diagram_marker", err.to_string()))?;

    let cli_path = render
        .mermaid_cli_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MERMAID_CLI_PATH));
    if cli_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.mermaid_cli_path",
            "path must not be empty",
        ));
    }

    let cache_dir = render
        .mermaid_cache_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MERMAID_CACHE_DIR));
    if cache_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.mermaid_cache_dir",
            "path must not be empty",
        ));
    }

    let theme = render
        .mermaid_theme
        .map(|theme| theme.trim().to_string())
        .unwrap_or_else(|| DEFAULT_MERMAID_THEME.to_string());
    if theme.is_empty() || !theme.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-') {
        return Err(LoadError::invalid(
            "render.mermaid_theme",
            format!("unsupported theme `{theme}`"),
        ));
    }

    Ok(RenderSettings {
        settle_delay,
        diagram_marker,
        sanitize: render.sanitize.unwrap_or(false),
        mermaid_cli_path: cli_path,
        mermaid_cache_dir: cache_dir,
        mermaid_theme: theme,
    })
}

fn build_gateway_settings(gateway: RawGatewaySettings) -> Result<GatewaySettings, LoadError> {
    let provider = match gateway.provider {
        Some(value) => Provider::from_str(value.trim())
            .map_err(|err| LoadError::invalid("gateway.provider", err.to_string()))?,
        None => Provider::Gemini,
    };

    let model = gateway.model.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let gemini_base_url = parse_base_url(
        gateway.gemini_base_url.as_deref(),
        DEFAULT_GEMINI_BASE_URL,
        "gateway.gemini_base_url",
    )?;
    let openrouter_base_url = parse_base_url(
        gateway.openrouter_base_url.as_deref(),
        DEFAULT_OPENROUTER_BASE_URL,
        "gateway.openrouter_base_url",
    )?;

    let timeout = match gateway.timeout_seconds {
        Some(0) => {
            return Err(LoadError::invalid(
                "gateway.timeout_seconds",
                "must be greater than zero",
            ));
        }
        Some(seconds) => Duration::from_secs(seconds),
        None => DEFAULT_TIMEOUT,
    };

    let temperature = gateway.temperature.unwrap_or(DEFAULT_TEMPERATURE);
    if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
        return Err(LoadError::invalid(
            "gateway.temperature",
            "must be between 0.0 and 2.0",
        ));
    }

    let max_tokens = gateway.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    if max_tokens == 0 {
        return Err(LoadError::invalid(
            "gateway.max_tokens",
            "must be greater than zero",
        ));
    }

    Ok(GatewaySettings {
        provider,
        model,
        gemini_base_url,
        openrouter_base_url,
        timeout,
        temperature,
        max_tokens,
    })
}

fn build_credential_settings(
    credentials: RawCredentialSettings,
) -> Result<CredentialSettings, LoadError> {
    let path = credentials.path.unwrap_or_else(default_credentials_path);
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "credentials.path",
            "path must not be empty",
        ));
    }
    Ok(CredentialSettings { path })
}

fn default_credentials_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home)
            .join(".config")
            .join("appunti")
            .join(DEFAULT_CREDENTIALS_FILE),
        None => PathBuf::from(".appunti").join(DEFAULT_CREDENTIALS_FILE),
    }
}

fn parse_base_url(
    value: Option<&str>,
    default: &str,
    key: &'static str,
) -> Result<Url, LoadError> {
    let candidate = value.map(str::trim).unwrap_or(default);
    let url = Url::parse(candidate)
        .map_err(|err| LoadError::invalid(key, format!("invalid URL `{candidate}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(key, "URL must use http or https"));
    }
    Ok(url)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    settle_delay_ms: Option<u64>,
    diagram_marker: Option<String>,
    sanitize: Option<bool>,
    mermaid_cli_path: Option<PathBuf>,
    mermaid_cache_dir: Option<PathBuf>,
    mermaid_theme: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawGatewaySettings {
    provider: Option<String>,
    model: Option<String>,
    gemini_base_url: Option<String>,
    openrouter_base_url: Option<String>,
    timeout_seconds: Option<u64>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCredentialSettings {
    path: Option<PathBuf>,
}
