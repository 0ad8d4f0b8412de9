use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    sqsp_migrate::logging::init().context("init logging")?;

    let cli = sqsp_migrate::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        sqsp_migrate::cli::Command::Migrate(args) => {
            sqsp_migrate::migrate::run(args).await.context("migrate")?;
        }
        sqsp_migrate::cli::Command::Transform(args) => {
            sqsp_migrate::blocks::run(args).context("transform")?;
        }
    }

    Ok(())
}
