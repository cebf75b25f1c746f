#[derive(Debug, clap::Parser)]
#[command(name = "cronherd", version, about = "Container-native cron daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Run the scheduler daemon.
    Daemon(DaemonArgs),
    /// Parse and validate the file configuration, then exit 0/1.
    Validate(ValidateArgs),
    /// Check configuration, engine reachability, schedules and images.
    Doctor(DoctorArgs),
    /// Interactively generate a starter configuration file.
    Init(InitArgs),
}

#[derive(Debug, Clone, clap::Args)]
pub struct DaemonArgs {
    /// Config file path or glob.
    #[arg(long, env = "CRONHERD_CONFIG", default_value = "/etc/cronherd.conf")]
    pub config: String,
    #[arg(long, env = "DOCKER_HOST", default_value = "unix:///var/run/docker.sock")]
    pub docker_host: String,
    /// Overrides the container poll interval from the config file.
    #[arg(long, env = "CRONHERD_DOCKER_POLL_INTERVAL")]
    pub docker_poll_interval: Option<humantime::Duration>,
    /// Overrides the config file poll interval.
    #[arg(long, env = "CRONHERD_CONFIG_POLL_INTERVAL")]
    pub config_poll_interval: Option<humantime::Duration>,
    /// Overrides the fallback poll period used while the event stream is
    /// failed.
    #[arg(long, env = "CRONHERD_POLLING_FALLBACK")]
    pub polling_fallback: Option<humantime::Duration>,
    #[arg(long, env = "CRONHERD_LOG_LEVEL")]
    pub log_level: Option<String>,
    #[arg(long, env = "CRONHERD_ENABLE_WEB")]
    pub enable_web: bool,
    #[arg(long, env = "CRONHERD_WEB_ADDRESS")]
    pub web_address: Option<String>,
    #[arg(long, env = "CRONHERD_ENABLE_PPROF")]
    pub enable_pprof: bool,
    #[arg(long, env = "CRONHERD_PPROF_ADDRESS")]
    pub pprof_address: Option<String>,
    #[arg(long, env = "CRONHERD_AUTH_USER")]
    pub auth_user: Option<String>,
    #[arg(long, env = "CRONHERD_AUTH_PASSWORD", hide_env_values = true)]
    pub auth_password: Option<String>,
}

#[derive(Debug, Clone, clap::Args)]
pub struct ValidateArgs {
    #[arg(long, env = "CRONHERD_CONFIG", default_value = "/etc/cronherd.conf")]
    pub config: String,
}

#[derive(Debug, Clone, clap::Args)]
pub struct DoctorArgs {
    #[arg(long, env = "CRONHERD_CONFIG", default_value = "/etc/cronherd.conf")]
    pub config: String,
    #[arg(long, env = "DOCKER_HOST", default_value = "unix:///var/run/docker.sock")]
    pub docker_host: String,
    /// Emit the report as JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, clap::Args)]
pub struct InitArgs {
    /// Where to write the generated configuration.
    #[arg(long, default_value = "cronherd.conf")]
    pub output: String,
}

impl Cli {
    /// Parse CLI from std::env and return the parsed structure.
    pub fn parse() -> Self {
        <Self as clap::Parser>::parse()
    }
}
