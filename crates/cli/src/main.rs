mod args;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::args::{Cli, Command};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var("LIDARMAP_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Decode { capture, out } => commands::decode(&capture, &out, &config),
        Command::Map {
            input,
            out,
            overrides,
            cloud,
            series,
        } => {
            let mut config = config;
            overrides.apply(&mut config);
            config.validate()?;
            commands::map(&input, &out, &config, cloud, series)
        }
        Command::Heightmaps { capture, out } => commands::height_maps(&capture, &out, &config),
    }
}
