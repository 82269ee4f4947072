mod watch_cmd;

use anyhow::Result;
use clap::Args;
use clap::Parser;
use docflow_workflow::ChannelConfig;
use std::path::PathBuf;
use url::Url;

pub use watch_cmd::Command;
pub use watch_cmd::HistoryArgs;
pub use watch_cmd::StatusArgs;
pub use watch_cmd::WatchArgs;

/// Follow document-generation executions from the terminal.
#[derive(Debug, Parser)]
#[command(name = "docflow", version)]
pub struct Cli {
    #[clap(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Default, Args)]
pub struct ConnectionArgs {
    /// Channel configuration file (YAML or TOML).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Base url of the REST API.
    #[arg(long = "api-url", global = true, env = "DOCFLOW_API_URL", value_name = "URL")]
    pub api_url: Option<Url>,

    /// Realtime server url. Defaults to the API url.
    #[arg(long = "socket-url", global = true, value_name = "URL")]
    pub socket_url: Option<Url>,

    /// Account email sent with status requests.
    #[arg(long, global = true, env = "DOCFLOW_ACCOUNT", value_name = "EMAIL")]
    pub account: Option<String>,
}

impl ConnectionArgs {
    /// Config file values, overridden by whatever was given on the command
    /// line.
    pub fn resolve(&self) -> Result<ChannelConfig> {
        let mut config = match &self.config {
            Some(path) => ChannelConfig::load(path)?,
            None => ChannelConfig::local()?,
        };
        if let Some(api_url) = &self.api_url {
            config.api_base_url = api_url.clone();
        }
        if let Some(socket_url) = &self.socket_url {
            config.socket_url = Some(socket_url.clone());
        }
        if let Some(account) = &self.account {
            config.account = Some(account.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.connection.resolve()?;
    watch_cmd::execute(cli.command, config).await
}
