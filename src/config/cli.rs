use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the edgecache binary.
#[derive(Debug, Parser)]
#[command(
    name = "edgecache",
    version,
    about = "Edge cache decision runner"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "EDGECACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: SettingsOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a request scenario and print the emitted directives.
    Decide(DecideArgs),
    /// Print the purge tags a content change would produce.
    #[command(name = "purge-tags")]
    PurgeTags(PurgeTagsArgs),
}

#[derive(Debug, Args, Clone)]
pub struct DecideArgs {
    /// Scenario file (TOML).
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Print the directives as JSON.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeTagsArgs {
    /// Scenario file (TOML) providing the content directory.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Content item whose change is simulated.
    #[arg(long = "content-id", value_name = "ID")]
    pub content_id: u64,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SettingsOverrides {
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

    /// Override the cache tag prefix.
    #[arg(long = "tag-prefix", value_name = "PREFIX", global = true)]
    pub tag_prefix: Option<String>,

    /// Toggle the diagnostic log channel.
    #[arg(
        long = "diagnostics",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub diagnostics: Option<bool>,
}
