//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::config::ActionsConfig;
use crate::export::DEFAULT_EXPORT_FILE;
use crate::frame::Facing;

/// Side-effect toggles shared by the scanning commands.
///
/// A flag turns the action on for this run; configured actions stay on.
#[derive(Debug, Clone, Copy, Default, Args)]
pub struct ActionArgs {
    /// Ring the terminal bell on every logged detection
    #[arg(long)]
    pub sound: bool,

    /// Copy every logged payload to the clipboard
    #[arg(long)]
    pub copy: bool,

    /// Open logged http(s) payloads in the browser
    #[arg(long)]
    pub open: bool,
}

impl ActionArgs {
    /// Merge the flags into the configured toggles.
    #[must_use]
    pub fn apply(self, mut actions: ActionsConfig) -> ActionsConfig {
        actions.sound |= self.sound;
        actions.auto_copy |= self.copy;
        actions.auto_open_url |= self.open;
        actions
    }
}

/// Scan command arguments.
#[derive(Debug, Args)]
pub struct ScanCommand {
    /// Camera to use (overrides `scan.facing`)
    #[arg(short, long, value_enum)]
    pub facing: Option<Facing>,

    /// Stop after this many frames
    #[arg(long, value_name = "N")]
    pub max_frames: Option<u64>,

    /// Actions for logged detections
    #[command(flatten)]
    pub actions: ActionArgs,
}

/// Image command arguments.
#[derive(Debug, Args)]
pub struct ImageCommand {
    /// Image file to scan
    pub file: PathBuf,

    /// Write the image with detected codes outlined to this path
    #[arg(long, value_name = "PATH")]
    pub annotate: Option<PathBuf>,

    /// Actions for a logged detection
    #[command(flatten)]
    pub actions: ActionArgs,
}

/// Log command arguments.
#[derive(Debug, Args)]
pub struct LogCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,

    /// Show only the newest N records
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Export command arguments.
#[derive(Debug, Args)]
pub struct ExportCommand {
    /// Output file
    #[arg(short, long, default_value = DEFAULT_EXPORT_FILE)]
    pub output: PathBuf,
}

/// Clear command arguments.
#[derive(Debug, Args)]
pub struct ClearCommand {
    /// Skip confirmation
    #[arg(short, long)]
    pub yes: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_args_enable_only() {
        let configured = ActionsConfig {
            sound: true,
            auto_copy: false,
            auto_open_url: false,
        };
        let merged = ActionArgs {
            sound: false,
            copy: true,
            open: false,
        }
        .apply(configured);

        assert!(merged.sound);
        assert!(merged.auto_copy);
        assert!(!merged.auto_open_url);
    }

    #[test]
    fn test_action_args_default_keeps_config() {
        let merged = ActionArgs::default().apply(ActionsConfig::default());
        assert_eq!(merged, ActionsConfig::default());
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }

    #[test]
    fn test_export_command_debug() {
        let cmd = ExportCommand {
            output: PathBuf::from(DEFAULT_EXPORT_FILE),
        };
        assert!(format!("{cmd:?}").contains("attendance-log.csv"));
    }
}
