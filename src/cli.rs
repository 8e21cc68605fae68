// src/cli.rs
//! CLI definitions for blockyard
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "blockyard")]
#[command(author = "Blockyard Contributors")]
#[command(version)]
#[command(about = "Transactional manager for installable components and packages", long_about = None)]
pub struct Cli {
    /// Storage root (overrides --config, BLOCKYARD_HOME and blockyard.toml)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Config file to read the storage root from (overrides BLOCKYARD_HOME)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install a component or package from a manifest (.json) or archive (.zip)
    Install {
        /// Path to the manifest or archive
        path: PathBuf,

        /// Replace the version if it is already installed
        #[arg(short, long)]
        force: bool,
    },

    /// Remove installed versions nothing depends on
    Remove {
        /// `name` or `name@range`
        query: String,

        /// Treat the query as a package
        #[arg(short, long)]
        package: bool,
    },

    /// List installed components and packages
    List {
        /// Only list components
        #[arg(long, conflicts_with = "packages")]
        components: bool,

        /// Only list packages
        #[arg(long)]
        packages: bool,
    },

    /// Show the installed unit a query resolves to
    Show {
        /// `name` or `name@range`
        query: String,

        /// Treat the query as a package
        #[arg(short, long)]
        package: bool,

        /// For packages, list transitive includes instead of direct ones
        #[arg(long)]
        deep: bool,
    },

    /// Find an installed component that can stand in for a requested version
    Compatible {
        /// `name@version`
        query: String,
    },

    /// Compile an installed unit into a ZIP archive
    Compile {
        /// `name` or `name@range`
        query: String,

        /// Treat the query as a package
        #[arg(short, long)]
        package: bool,

        /// Directory to write the archive to
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Remove units nothing includes and that include nothing
    Clean {
        /// Instead, remove every other installed version of this unit
        #[arg(long, value_name = "QUERY")]
        co_existing: Option<String>,
    },
}
