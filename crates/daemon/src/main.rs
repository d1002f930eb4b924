//! ttyweb daemon
//!
//! Serves PTY-backed terminal sessions over WebSocket.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use daemon::config::Config;
use daemon::orchestrator::DaemonOrchestrator;
use tracing_subscriber::EnvFilter;

/// ttyweb - share a terminal over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "ttyweb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve terminal sessions until interrupted
    Serve(ServeArgs),

    /// Print or save the effective configuration as TOML
    Config {
        /// Write it to this file instead of printing
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

/// Flags of the `serve` command. Each overrides the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Host name or address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Path prefix for every route
    #[arg(long, value_name = "PATH")]
    pub prefix_path: Option<String>,

    /// HTML page served at the prefix root
    #[arg(long, value_name = "FILE")]
    pub index_file: Option<PathBuf>,

    /// Working directory for session processes
    #[arg(long, short, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Command line each session runs
    #[arg(long)]
    pub command: Option<String>,

    /// Extra environment entry for session processes (repeatable)
    #[arg(long = "env", short, value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Do not pass the daemon's environment to session processes
    #[arg(long)]
    pub no_inherit_env: bool,
}

impl ServeArgs {
    /// Applies the flags on top of `config`.
    pub fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(prefix) = self.prefix_path {
            config.server.prefix_path = prefix;
        }
        if let Some(index) = self.index_file {
            config.server.index_file = Some(index);
        }
        if let Some(dir) = self.workdir {
            config.command.workdir = Some(dir);
        }
        if let Some(command) = self.command {
            config.command.command = command;
        }
        config.command.extra_env.extend(self.env);
        if self.no_inherit_env {
            config.command.inherit_env = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    if let Commands::Serve(args) = &cli.command {
        args.clone().apply(&mut config);
    }

    // Initialize tracing; RUST_LOG wins over flags and config
    let level = if cli.verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
    }

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Serve(_) => run_server(config).await,
        Commands::Config { output: Some(path) } => config.save(path),
        Commands::Config { output: None } => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Run the server until SIGINT or SIGTERM.
async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("ttyweb starting...");

    let mut orchestrator = DaemonOrchestrator::new(config)?;
    orchestrator.start().await?;

    wait_for_shutdown_signal().await?;

    tracing::info!("Shutting down...");
    orchestrator.stop().await?;
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_command_defaults() {
        let cli = Cli::try_parse_from(["ttyweb", "serve"]).unwrap();
        match cli.command {
            Commands::Serve(args) => {
                assert!(args.host.is_none());
                assert!(args.port.is_none());
                assert!(args.env.is_empty());
                assert!(!args.no_inherit_env);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_serve_flags_override_config() {
        let cli = Cli::try_parse_from([
            "ttyweb",
            "serve",
            "--host",
            "0.0.0.0",
            "--port",
            "7681",
            "--prefix-path",
            "/tty",
            "--command",
            "/bin/bash -l",
            "-e",
            "A=1",
            "--env",
            "B=2",
            "--no-inherit-env",
            "--workdir",
            "/tmp",
        ])
        .unwrap();

        let Commands::Serve(args) = cli.command else {
            panic!("Expected Serve command");
        };

        let mut config = Config::default();
        config.command.extra_env = vec!["FROM_FILE=1".to_string()];
        args.apply(&mut config);

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 7681);
        assert_eq!(config.server.prefix_path, "/tty");
        assert_eq!(config.command.command, "/bin/bash -l");
        assert_eq!(config.command.extra_env, vec!["FROM_FILE=1", "A=1", "B=2"]);
        assert!(!config.command.inherit_env);
        assert_eq!(config.command.workdir, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["ttyweb", "config", "--verbose", "-c", "/etc/ttyweb.toml"])
            .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/ttyweb.toml")));
        assert!(matches!(cli.command, Commands::Config { output: None }));
    }

    #[test]
    fn test_config_output_flag() {
        let cli = Cli::try_parse_from(["ttyweb", "config", "--output", "/tmp/ttyweb.toml"]).unwrap();
        match cli.command {
            Commands::Config { output } => {
                assert_eq!(output, Some(PathBuf::from("/tmp/ttyweb.toml")));
            }
            _ => panic!("Expected Config command"),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["ttyweb"]).is_err());
    }
}
