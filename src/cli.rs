// src/cli.rs
//! Command-line surface: `bundle`, `cat`, `ls`, `strip`. `help` is clap's
//! built-in subcommand help, generated for free from the doc comments below.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rucksack", version = "1.0.0 (bundle format v1)", about = "Asset bundler and texture packer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build or update a bundle from a JSON asset manifest.
    Bundle {
        assets_json: PathBuf,
        bundle: PathBuf,
        /// Root that manifest paths resolve against. Defaults to the current directory.
        #[arg(long)]
        prefix: Option<PathBuf>,
        /// Raise the log level to debug.
        #[arg(long)]
        verbose: bool,
        /// Write a makefile dependency fragment to this path.
        #[arg(long)]
        deps: Option<PathBuf>,
    },
    /// Print one entry's payload.
    Cat {
        bundle: PathBuf,
        key: String,
        /// With a texture entry: write the raw pixel payload instead of a JSON description.
        #[arg(long)]
        texture: bool,
    },
    /// List every key in a bundle, one per line.
    Ls { bundle: PathBuf },
    /// Rewrite a bundle into a byte-minimal copy, atomically replacing it.
    Strip { bundle: PathBuf },
}
