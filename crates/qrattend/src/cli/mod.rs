//! Command-line interface for qrattend.
//!
//! This module provides the CLI structure for the `qrattend` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ActionArgs, ClearCommand, ConfigCommand, ExportCommand, ImageCommand, LogCommand, ScanCommand,
    StatusCommand,
};

/// qrattend - QR code attendance logger
///
/// Scans QR codes from a camera or an image file and records a log-in and
/// log-out time per code and day.
#[derive(Debug, Parser)]
#[command(name = "qrattend")]
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
    /// Scan continuously from the camera (Ctrl-C to stop)
    Scan(ScanCommand),

    /// Scan a single image file
    Image(ImageCommand),

    /// Show the attendance log
    Log(LogCommand),

    /// Export the attendance log as CSV
    Export(ExportCommand),

    /// Delete all log entries
    Clear(ClearCommand),

    /// Show decoder and storage status
    Status(StatusCommand),

    /// View configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Facing;
    use crate::logging::Verbosity;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_name() {
        assert_eq!(Cli::command().get_name(), "qrattend");
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity() {
        assert_eq!(parse(&["qrattend", "-q", "status"]).verbosity(), Verbosity::Quiet);
        assert_eq!(parse(&["qrattend", "status"]).verbosity(), Verbosity::Normal);
        assert_eq!(parse(&["qrattend", "-v", "status"]).verbosity(), Verbosity::Verbose);
        assert_eq!(parse(&["qrattend", "-vv", "status"]).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_parse_scan_defaults() {
        let cli = parse(&["qrattend", "scan"]);
        let Command::Scan(scan) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(scan.facing, None);
        assert_eq!(scan.max_frames, None);
        assert!(!scan.actions.sound);
    }

    #[test]
    fn test_parse_scan_options() {
        let cli = parse(&[
            "qrattend",
            "scan",
            "--facing",
            "user",
            "--max-frames",
            "50",
            "--sound",
            "--copy",
            "--open",
        ]);
        let Command::Scan(scan) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(scan.facing, Some(Facing::User));
        assert_eq!(scan.max_frames, Some(50));
        assert!(scan.actions.sound && scan.actions.copy && scan.actions.open);
    }

    #[test]
    fn test_parse_scan_rejects_unknown_facing() {
        assert!(Cli::try_parse_from(["qrattend", "scan", "--facing", "sideways"]).is_err());
    }

    #[test]
    fn test_parse_image() {
        let cli = parse(&["qrattend", "image", "badge.png", "--annotate", "out.png"]);
        let Command::Image(image) = cli.command else {
            panic!("expected image");
        };
        assert_eq!(image.file, PathBuf::from("badge.png"));
        assert_eq!(image.annotate, Some(PathBuf::from("out.png")));
    }

    #[test]
    fn test_parse_image_requires_file() {
        assert!(Cli::try_parse_from(["qrattend", "image"]).is_err());
    }

    #[test]
    fn test_parse_export_default_output() {
        let cli = parse(&["qrattend", "export"]);
        let Command::Export(export) = cli.command else {
            panic!("expected export");
        };
        assert_eq!(export.output, PathBuf::from("attendance-log.csv"));
    }

    #[test]
    fn test_parse_log_and_clear() {
        assert!(matches!(
            parse(&["qrattend", "log", "--json"]).command,
            Command::Log(LogCommand { json: true, .. })
        ));
        assert!(matches!(
            parse(&["qrattend", "clear", "--yes"]).command,
            Command::Clear(ClearCommand { yes: true })
        ));
    }

    #[test]
    fn test_parse_config_subcommands() {
        assert!(matches!(
            parse(&["qrattend", "config", "path"]).command,
            Command::Config(ConfigCommand::Path)
        ));
        assert!(matches!(
            parse(&["qrattend", "config", "show", "--json"]).command,
            Command::Config(ConfigCommand::Show { json: true })
        ));
    }

    #[test]
    fn test_parse_with_config() {
        let cli = parse(&["qrattend", "-c", "/custom/config.toml", "status"]);
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
    }
}
