// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use blockyard::{Packager, StoreConfig, Transact};
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use std::sync::Arc;
use tracing::debug;

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = StoreConfig::resolve(cli.root, cli.config.as_deref())?;
    debug!("Using storage root {}", config.root().display());
    let mut packager = Packager::new(config, Arc::new(Transact::new()));
    packager.load_all()?;

    match command {
        Commands::Install { path, force } => commands::cmd_install(&mut packager, &path, force),
        Commands::Remove { query, package } => commands::cmd_remove(&mut packager, &query, package),
        Commands::List {
            components,
            packages,
        } => commands::cmd_list(&packager, components, packages),
        Commands::Show {
            query,
            package,
            deep,
        } => commands::cmd_show(&mut packager, &query, package, deep),
        Commands::Compatible { query } => commands::cmd_compatible(&packager, &query),
        Commands::Compile {
            query,
            package,
            output,
        } => commands::cmd_compile(&packager, &query, package, &output),
        Commands::Clean { co_existing } => {
            commands::cmd_clean(&mut packager, co_existing.as_deref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_install_with_root() {
        let cli = Cli::try_parse_from(["blockyard", "--root", "/tmp/by", "install", "a.zip", "-f"])
            .unwrap();
        assert_eq!(cli.root.as_deref(), Some(std::path::Path::new("/tmp/by")));
        assert!(matches!(cli.command, Some(Commands::Install { force: true, .. })));
    }
}
