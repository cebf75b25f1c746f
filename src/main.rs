use anyhow::Result;
use cronherd::cli::{Cli, Command};
use cronherd::provider::docker::DockerProvider;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Daemon(args) => {
            init_tracing(args.log_level.as_deref());

            let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
            let mut sigint =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

            let signal_tx = shutdown_tx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                }
                signal_tx.send(()).ok();
            });

            cronherd::daemon::run(args, shutdown_tx, shutdown_rx).await
        }
        Command::Validate(args) => {
            init_tracing(None);
            std::process::exit(cronherd::daemon::validate(&args.config));
        }
        Command::Doctor(args) => {
            init_tracing(None);
            let provider = DockerProvider::connect(&args.docker_host).ok();
            let report = cronherd::doctor::run(
                &args.config,
                provider
                    .as_ref()
                    .map(|p| p as &dyn cronherd::provider::ContainerProvider),
            )
            .await;
            if args.json {
                println!("{}", report.render_json());
            } else {
                print!("{}", report.render_text());
            }
            std::process::exit(if report.healthy { 0 } else { 1 });
        }
        Command::Init(args) => {
            init_tracing(None);
            cronherd::wizard::run(&args.output)
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = level
        .map(str::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
