use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    dich_truyen::logging::init(dich_truyen::logging::DEFAULT_FILTER).context("init logging")?;

    let cli = dich_truyen::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        dich_truyen::cli::Command::Pipeline(args) => {
            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received; finishing in-flight chapters");
                    on_ctrl_c.cancel();
                }
            });
            dich_truyen::commands::pipeline(args, cancel)
                .await
                .context("pipeline")?;
        }
        dich_truyen::cli::Command::Status(args) => {
            dich_truyen::commands::status(args).await.context("status")?;
        }
        dich_truyen::cli::Command::Resumable(args) => {
            dich_truyen::commands::resumable(args)
                .await
                .context("resumable")?;
        }
        dich_truyen::cli::Command::Glossary { command } => {
            dich_truyen::commands::glossary(command)
                .await
                .context("glossary")?;
        }
    }

    Ok(())
}
