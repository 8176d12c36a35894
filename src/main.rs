use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn try_main() -> anyhow::Result<()> {
    let cli = portalcrawl::cli::Cli::parse();
    portalcrawl::logging::init(&cli.log_level).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        portalcrawl::cli::Command::Crawl(args) => {
            portalcrawl::crawl::run(args, std::env::args().collect()).context("crawl")?;
        }
        portalcrawl::cli::Command::Cat(args) => {
            portalcrawl::inspect::cat(args).context("cat")?;
        }
        portalcrawl::cli::Command::List(args) => {
            portalcrawl::inspect::list(args).context("list")?;
        }
    }

    Ok(())
}
