mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use devup::{ComposeRuntime, EnvSecretStore, Error as DevupError, Parser as RegistryParser, Stack, UpOptions};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(devup_error) = e.downcast_ref::<DevupError>() {
            eprintln!("Error: {}", devup_error.with_suggestion());
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let registry_path = match cli.registry.clone() {
        Some(path) => path,
        None => {
            let start = match cli.workdir.clone() {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            RegistryParser::find_registry_in_dir(&start)?
        }
    };
    let registry = RegistryParser::new().load_registry(&registry_path)?;
    tracing::debug!(registry = %registry_path.display(), project = %registry.settings.project(), "Loaded registry");

    let secrets = EnvSecretStore::load(&registry.root_dir);
    let runtime = ComposeRuntime::new(registry.settings.project(), registry.compose_path());

    // Ctrl+C stops new work; containers already started keep running.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, not starting anything new");
                cancel.cancel();
            }
        });
    }

    let stack = Stack::new(registry, Arc::new(runtime), Arc::new(secrets)).with_cancellation(cancel);
    let out = &output::CliOutput;

    match cli.command {
        Commands::Up {
            services,
            no_deps,
            infra_only,
            dry_run,
        } => {
            let options = UpOptions {
                services,
                no_deps,
                infra_only,
            };
            commands::run_up(&stack, options, dry_run, out).await
        }
        Commands::Down => commands::run_down(&stack, out).await,
        Commands::Restart { services } => commands::run_restart(&stack, services, out).await,
        Commands::Reset { volumes } => commands::run_reset(&stack, volumes, out).await,
        Commands::Status { json } => commands::run_status(&stack, json, out).await,
        Commands::Logs {
            service,
            tail,
            follow,
        } => commands::run_logs(&stack, service, tail, follow, out).await,
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
