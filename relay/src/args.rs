use std::{fmt, io::IsTerminal, net::SocketAddr, path::PathBuf, str::FromStr};

use clap::{Parser, ValueEnum};
use config::Config;
use logforth::filter::EnvFilter;

const WORKSPACE_CRATES: [&str; 4] = ["relay", "server", "mcp", "config"];

#[derive(Debug, Parser)]
#[command(name = "Relay", version, long_about = concat!("Relay multi-tenant MCP gateway v", env!("CARGO_PKG_VERSION")))]
pub struct Args {
    /// Address to accept MCP clients on. Overrides `server.listen_address`.
    /// Default: 127.0.0.1:8000
    #[arg(short, long, env = "RELAY_LISTEN_ADDRESS")]
    pub listen_address: Option<SocketAddr>,
    /// Path to the TOML configuration file. A missing file means an empty configuration.
    #[arg(long, short, env = "RELAY_CONFIG_PATH", default_value = "./relay.toml")]
    pub config: PathBuf,
    /// Log level of the workspace crates. Dependencies always log at `warn`.
    #[arg(long = "log", env = "RELAY_LOG", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
    /// Style of log output
    #[arg(long, env = "RELAY_LOG_STYLE", value_enum, default_value_t = LogStyle::default())]
    pub log_style: LogStyle,
    /// Validate the configuration, print the tenants it serves and exit.
    #[arg(long)]
    pub check: bool,
}

impl Args {
    /// Loads and validates the configuration file, or the defaults when it does not exist.
    pub fn config(&self) -> anyhow::Result<Config> {
        let config = if self.config.exists() {
            Config::load(&self.config)?
        } else {
            Config::default()
        };

        config.validate()?;

        Ok(config)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogStyle {
    /// Colorized text, the default on a terminal
    Color,
    /// Plain text, the default otherwise
    Text,
    /// One JSON object per line
    Json,
}

impl Default for LogStyle {
    fn default() -> Self {
        if std::io::stdout().is_terminal() {
            LogStyle::Color
        } else {
            LogStyle::Text
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn env_filter(self) -> EnvFilter {
        let directives = match self {
            LogLevel::Off => "off".to_string(),
            level => WORKSPACE_CRATES
                .iter()
                .fold(String::from("warn"), |acc, krate| format!("{acc},{krate}={level}")),
        };

        EnvFilter::from_str(&directives).expect("workspace log filters are valid")
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_possible_value() {
            Some(value) => f.write_str(value.get_name()),
            None => Ok(()),
        }
    }
}

impl fmt::Display for LogStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_possible_value() {
            Some(value) => f.write_str(value.get_name()),
            None => Ok(()),
        }
    }
}
