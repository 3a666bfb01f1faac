//! Command-line interface for motorelay.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::Verbosity;

pub use commands::{
    ConfigCommand, RouteCommand, ServeCommand, StatusCommand, TrackCommand, WatchCommand,
};

/// motorelay - Live vehicle location relay
///
/// Runs the broadcast relay, streams a vehicle's positions to it, watches
/// live updates and rebuilds recorded routes.
#[derive(Debug, Parser)]
#[command(name = "motorelay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the broadcast relay
    Serve(ServeCommand),

    /// Stream a subject's positions to the relay and record them
    Track(TrackCommand),

    /// Print live messages from the relay
    Watch(WatchCommand),

    /// Rebuild a recorded route
    Route(RouteCommand),

    /// Show sample store status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
        assert_eq!(Cli::command().get_name(), "motorelay");
    }

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(parse(&["motorelay", "status"]).verbosity(), Verbosity::Normal);
        assert_eq!(parse(&["motorelay", "-v", "status"]).verbosity(), Verbosity::Verbose);
        assert_eq!(parse(&["motorelay", "-vv", "status"]).verbosity(), Verbosity::Trace);
        assert_eq!(parse(&["motorelay", "-q", "status"]).verbosity(), Verbosity::Quiet);
    }

    #[test]
    fn test_parse_serve_with_bind() {
        let cli = parse(&["motorelay", "serve", "--bind", "127.0.0.1:4000"]);
        let Command::Serve(cmd) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(cmd.bind, Some("127.0.0.1:4000".parse().unwrap()));
    }

    #[test]
    fn test_parse_track() {
        let cli = parse(&["motorelay", "track", "moto-1", "--replay", "ride.jsonl", "--offline"]);
        let Command::Track(cmd) = cli.command else {
            panic!("expected track");
        };
        assert_eq!(cmd.subject, "moto-1");
        assert_eq!(cmd.replay, PathBuf::from("ride.jsonl"));
        assert!(cmd.offline);
    }

    #[test]
    fn test_track_requires_replay() {
        assert!(Cli::try_parse_from(["motorelay", "track", "moto-1"]).is_err());
    }

    #[test]
    fn test_parse_watch_filter() {
        let cli = parse(&["motorelay", "watch", "--subject", "moto-2"]);
        let Command::Watch(cmd) = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(cmd.subject.as_deref(), Some("moto-2"));
    }

    #[test]
    fn test_parse_route_json() {
        let cli = parse(&["motorelay", "route", "moto-1", "--json"]);
        assert!(matches!(cli.command, Command::Route(RouteCommand { json: true, .. })));
    }

    #[test]
    fn test_parse_with_config() {
        let cli = parse(&["motorelay", "-c", "/custom/config.toml", "config", "path"]);
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
        assert!(matches!(cli.command, Command::Config(ConfigCommand::Path)));
    }
}
