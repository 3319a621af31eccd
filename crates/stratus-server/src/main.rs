use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use stratus_remote::InMemoryControlPlane;
use stratus_server::ControlPlaneService;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "stratus-server",
    about = "Stratus control-plane protocol v1 server"
)]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8321)]
    port: u16,

    /// Require this bearer token on every request.
    #[arg(long)]
    token: Option<String>,

    /// Account reported to clients.
    #[arg(long, default_value = "123456789012")]
    account_id: String,

    /// Partition reported to clients.
    #[arg(long, default_value = "aws")]
    partition: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STRATUS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let addr = format!("0.0.0.0:{}", cli.port);
    info!("starting stratus-server on {addr}");
    info!("serving account {} ({})", cli.account_id, cli.partition);

    let plane = InMemoryControlPlane::new().with_account(&cli.account_id, &cli.partition);
    let service = ControlPlaneService::new(Arc::new(plane)).with_auth_token(cli.token);
    match stratus_server::run_server(&service, &addr) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server failed: {e}");
            ExitCode::FAILURE
        }
    }
}
