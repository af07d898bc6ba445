// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Command line interface definition.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Cairn: a clustered object store control plane.
#[derive(Parser)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the cluster and serve the API.
    Serve(ServeArgs),
    /// Print version information.
    Version,
}

/// Arguments for the serve command.
#[derive(Args)]
pub struct ServeArgs {
    /// Path to configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Data directory for target stores (overrides config).
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve() {
        let cli = Cli::parse_from(["cairn", "serve", "--config", "cairn.toml", "-b", "0.0.0.0:9000"]);
        let Commands::Serve(args) = cli.command else { panic!("expected serve") };
        assert_eq!(args.config, Some(PathBuf::from("cairn.toml")));
        assert_eq!(args.bind, Some("0.0.0.0:9000".parse().unwrap()));
        assert!(args.data_dir.is_none());
    }

    #[test]
    fn test_parse_version() {
        let cli = Cli::parse_from(["cairn", "version"]);
        assert!(matches!(cli.command, Commands::Version));
    }

    #[test]
    fn test_invalid_bind_rejected() {
        assert!(Cli::try_parse_from(["cairn", "serve", "--bind", "nowhere"]).is_err());
    }
}
