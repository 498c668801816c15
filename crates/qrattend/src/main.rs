//! `qrattend` - CLI for the QR attendance logger
//!
//! This binary scans QR codes from a camera or image file and manages the
//! attendance log.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;

use qrattend::actions::SystemActions;
use qrattend::cli::{
    ActionArgs, ClearCommand, Cli, Command, ConfigCommand, ExportCommand, ImageCommand,
    LogCommand, ScanCommand, StatusCommand,
};
use qrattend::decoder::DecoderSelector;
use qrattend::export::write_csv;
use qrattend::frame::{save_frame, CommandCamera, StillImage};
use qrattend::scan::{ScanEvent, SessionSettings};
use qrattend::{
    init_logging, AttendanceLog, Config, Engine, EngineSettings, Error, LogStore, Outcome,
    ScanHandle, ScanSession, Storage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // `config validate` must work on a config that fails to load
    let config_path = cli.config.clone();
    let load = || Config::load_from(config_path.clone());

    match cli.command {
        Command::Scan(cmd) => handle_scan(&load()?, cmd).await,
        Command::Image(cmd) => handle_image(&load()?, cmd).await,
        Command::Log(cmd) => handle_log(&load()?, &cmd),
        Command::Export(cmd) => handle_export(&load()?, &cmd),
        Command::Clear(cmd) => handle_clear(&load()?, &cmd),
        Command::Status(cmd) => handle_status(&load()?, &cmd).await,
        Command::Config(cmd) => handle_config(cli.config, cmd),
    }
}

fn open_storage(config: &Config) -> anyhow::Result<Storage> {
    let path = config.database_path();
    let storage = Storage::open(&path)
        .with_context(|| format!("failed to open attendance log at {}", path.display()))?;
    Ok(storage.with_log_key(config.storage.log_key.clone()))
}

async fn build_session(config: &Config, actions: ActionArgs) -> anyhow::Result<ScanSession<Storage>> {
    let mut settings = EngineSettings::from_config(config);
    settings.actions = actions.apply(settings.actions);

    let engine = Engine::new(open_storage(config)?, settings, Box::new(SystemActions::new()));
    let decoder = DecoderSelector::from_config(config).await;
    Ok(ScanSession::new(
        engine,
        decoder,
        SessionSettings::from_config(config),
    ))
}

fn describe(outcome: &Outcome) -> Option<String> {
    match outcome {
        Outcome::LoggedIn(r) => Some(format!("IN   {}  {} {}", r.text, r.date, r.log_in)),
        Outcome::LoggedOut(r) => Some(format!("OUT  {}  {} {}", r.text, r.date, r.log_out)),
        Outcome::Suppressed | Outcome::Ignored => None,
    }
}

async fn handle_scan(config: &Config, cmd: ScanCommand) -> anyhow::Result<()> {
    let facing = cmd.facing.unwrap_or(config.scan.facing);
    let mut session = build_session(config, cmd.actions).await?;
    let mut camera = CommandCamera::from_config(config, facing);

    let handle = ScanHandle::new();
    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.stop();
        }
    });

    println!(
        "Scanning with the {facing} camera ({} decoder). Press Ctrl-C to stop.",
        session.decoder().active()
    );

    let report = session
        .run_continuous(&mut camera, &handle, cmd.max_frames, |event| match event {
            ScanEvent::Detected(outcome) => {
                if let Some(line) = describe(&outcome) {
                    println!("{line}");
                }
            }
            ScanEvent::Failed(e) => eprintln!("Not recorded: {e}"),
        })
        .await?;

    println!();
    println!(
        "Stopped after {} frames: {} logged in, {} logged out.",
        report.frames, report.logged_in, report.logged_out
    );
    if report.failed_grabs > 0 {
        println!("{} frames could not be grabbed.", report.failed_grabs);
    }
    Ok(())
}

async fn handle_image(config: &Config, cmd: ImageCommand) -> anyhow::Result<()> {
    // Load first: an unreadable image touches nothing
    let mut still = StillImage::open(&cmd.file)?;
    let mut session = build_session(config, cmd.actions).await?;

    match session.scan_once(&mut still).await? {
        None => println!("No QR found"),
        Some(Outcome::Ignored) => println!("Empty QR payload ignored"),
        Some(Outcome::Suppressed) => println!("Repeat detection ignored"),
        Some(outcome) => {
            if let Some(line) = describe(&outcome) {
                println!("{line}");
            }
        }
    }

    if let Some(path) = &cmd.annotate {
        save_frame(&session.annotated(), path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Annotated image written to {}", path.display());
    }
    Ok(())
}

fn handle_log(config: &Config, cmd: &LogCommand) -> anyhow::Result<()> {
    let log = open_storage(config)?.load()?;
    let records = match cmd.limit {
        Some(n) => &log.records()[..n.min(log.len())],
        None => log.records(),
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No entries");
        return Ok(());
    }

    println!(
        "{:<24} {:<12} {:<10} {:<10} {}",
        "Employee", "Date", "Log In", "Log Out", "Type"
    );
    for r in records {
        println!(
            "{:<24} {:<12} {:<10} {:<10} {}",
            r.text, r.date, r.log_in, r.log_out, r.source
        );
    }
    Ok(())
}

fn handle_export(config: &Config, cmd: &ExportCommand) -> anyhow::Result<()> {
    let log = open_storage(config)?.load()?;
    match write_csv(&log, &cmd.output) {
        Ok(()) => {
            println!("Exported {} entries to {}", log.len(), cmd.output.display());
            Ok(())
        }
        Err(Error::EmptyLog) => {
            println!("No entries");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn handle_clear(config: &Config, cmd: &ClearCommand) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let log: AttendanceLog = storage.load()?;

    if !cmd.yes {
        println!("This will delete all {} log entries.", log.len());
        println!("Use --yes to confirm.");
        return Ok(());
    }

    storage.clear()?;
    println!("Log cleared.");
    Ok(())
}

async fn handle_status(config: &Config, cmd: &StatusCommand) -> anyhow::Result<()> {
    let stats = open_storage(config)?.stats()?;
    let decoder = DecoderSelector::from_config(config).await;

    if cmd.json {
        let status = serde_json::json!({
            "database_path": config.database_path(),
            "records": stats.total_records,
            "capacity": config.log.capacity,
            "newest_date": stats.newest_date,
            "db_size_bytes": stats.db_size_bytes,
            "native_decoder": decoder.has_native(),
            "active_decoder": decoder.active().to_string(),
            "facing": config.scan.facing,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("qrattend status");
        println!("---------------");
        println!("Database:      {}", config.database_path().display());
        println!(
            "Records:       {} / {}",
            stats.total_records, config.log.capacity
        );
        println!(
            "Newest:        {}",
            stats.newest_date.as_deref().unwrap_or("-")
        );
        println!("Size:          {} bytes", stats.db_size_bytes);
        println!(
            "Native QR:     {}",
            if decoder.has_native() {
                config.decoder.native_program.as_str()
            } else {
                "not available"
            }
        );
        println!("Decoder:       {}", decoder.active());
        println!("Camera:        {}", config.scan.facing);
    }
    Ok(())
}

fn handle_config(config_path: Option<std::path::PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Log key:            {}", config.storage.log_key);
                println!();
                println!("[Log]");
                println!("  Capacity:           {}", config.log.capacity);
                println!("  Date format:        {}", config.log.date_format);
                println!("  Time format:        {}", config.log.time_format);
                println!("  Snapshots:          {}", config.log.capture_snapshots);
                println!();
                println!("[Scan]");
                println!("  Dedup window (ms):  {}", config.scan.dedup_window_ms);
                println!("  Dedup scope:        {:?}", config.scan.dedup_scope);
                println!("  Tick interval (ms): {}", config.scan.tick_interval_ms);
                println!("  Facing:             {}", config.scan.facing);
                println!();
                println!("[Camera]");
                println!("  Command:            {}", config.camera.command.join(" "));
                println!();
                println!("[Decoder]");
                println!("  Native enabled:     {}", config.decoder.native_enabled);
                println!("  Native program:     {}", config.decoder.native_program);
                println!("  Fallback policy:    {:?}", config.decoder.fallback_policy);
                println!();
                println!("[Actions]");
                println!("  Sound:              {}", config.actions.sound);
                println!("  Auto copy:          {}", config.actions.auto_copy);
                println!("  Auto open URL:      {}", config.actions.auto_open_url);
            }
        }
        ConfigCommand::Path => {
            println!(
                "{}",
                config_path
                    .unwrap_or_else(Config::default_config_path)
                    .display()
            );
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
