//! Command-line interface handling for the module host.
//!
//! Options given here override the matching configuration file settings.

use crate::config::AppConfig;
use clap::{Arg, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the modules directory
    pub modules_dir: Option<PathBuf>,
    /// Optional override for the resource root
    pub resource_root: Option<PathBuf>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses the process arguments. Exits with usage on invalid input.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list, the first item being the binary name.
    pub fn parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)),
            modules_dir: matches.get_one::<String>("modules").map(PathBuf::from),
            resource_root: matches.get_one::<String>("resources").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }

    /// Applies the overrides to a loaded configuration.
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(modules_dir) = &self.modules_dir {
            config.modules.directory = modules_dir.to_string_lossy().to_string();
        }
        if let Some(resource_root) = &self.resource_root {
            config.modules.resource_root = resource_root.to_string_lossy().to_string();
        }
        if let Some(log_level) = &self.log_level {
            config.logging.level = log_level.clone();
        }
        if self.json_logs {
            config.logging.json_format = true;
        }
    }
}

const DEFAULT_CONFIG: &str = "host.toml";

fn command() -> Command {
    Command::new("Module Host")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Loads module bundles and hosts them until shutdown")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG),
        )
        .arg(
            Arg::new("modules")
                .short('m')
                .long("modules")
                .value_name("DIR")
                .help("Module bundle directory"),
        )
        .arg(
            Arg::new("resources")
                .short('r')
                .long("resources")
                .value_name("DIR")
                .help("Resource root bundles are mounted under"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
}
