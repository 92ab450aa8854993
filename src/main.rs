use anyhow::Result;
use clap::Parser;
use ssh_remote::{cli::Cli, config::Config, run};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    let config = Config::from_cli(&cli)?;

    if let Err(e) = run(config) {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
