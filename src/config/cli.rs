use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::Provider;

/// Command-line arguments for the `appunti` binary.
#[derive(Debug, Parser)]
#[command(
    name = "appunti",
    version,
    about = "Turn raw study material into typeset HTML notes"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "APPUNTI_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Generate notes from text and render the preview.
    Generate(GenerateArgs),
    /// Run the preview pipeline over an existing HTML document.
    Preview(PreviewArgs),
    /// Export an HTML document as-is or as a standalone page.
    Export(ExportArgs),
    /// Manage stored provider API keys.
    Keys(KeysArgs),
    /// List supported providers and their default models.
    Providers,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the delay before math and diagrams are processed.
    #[arg(long = "render-settle-delay-ms", value_name = "MILLIS", global = true)]
    pub settle_delay_ms: Option<u64>,

    /// Override the Mermaid CLI executable path used for diagram rendering.
    #[arg(long = "render-mermaid-cli-path", value_name = "PATH", global = true)]
    pub mermaid_cli_path: Option<PathBuf>,

    /// Override the directory used to cache rendered Mermaid diagrams.
    #[arg(long = "render-mermaid-cache-dir", value_name = "PATH", global = true)]
    pub mermaid_cache_dir: Option<PathBuf>,

    /// Sanitize generated markup before mounting it.
    #[arg(
        long = "render-sanitize",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub sanitize: Option<bool>,

    /// Override the credential store location.
    #[arg(long = "credentials-path", value_name = "PATH", global = true)]
    pub credentials_path: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GenerateArgs {
    /// Text file to convert; reads stdin when omitted.
    #[arg(long, short, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub input: Option<PathBuf>,

    /// Provider to call (gemini|openrouter).
    #[arg(long, value_name = "PROVIDER")]
    pub provider: Option<Provider>,

    /// Model identifier; defaults to the provider's default model.
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// API key for this request, taking precedence over stored keys and the environment.
    #[arg(long = "api-key", value_name = "KEY")]
    pub api_key: Option<String>,

    /// Where to write the settled preview markup; stdout when omitted.
    #[arg(long, short, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Also write a standalone page to this path.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub standalone: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct PreviewArgs {
    /// HTML document to render.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Where to write the settled preview markup; stdout when omitted.
    #[arg(long, short, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct ExportArgs {
    /// HTML document to export.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Wrap the document in a self-contained page.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub standalone: bool,

    /// Output path; stdout when omitted.
    #[arg(long, short, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct KeysArgs {
    #[command(subcommand)]
    pub command: KeysCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum KeysCommand {
    /// Store an API key; a blank key removes the stored one.
    Set {
        #[arg(value_name = "PROVIDER")]
        provider: Provider,
        #[arg(value_name = "KEY")]
        key: String,
    },
    /// Remove the stored API key for a provider.
    Clear {
        #[arg(value_name = "PROVIDER")]
        provider: Provider,
    },
    /// Show which providers have a stored key.
    List,
}
