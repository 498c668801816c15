//! Dedup and log engine.
//!
//! Every decoded payload goes through [`Engine::handle_detection`]. Repeats
//! of the last accepted payload inside the dedup window are dropped; anything
//! else becomes either a new log-in record for today or a log-out update of
//! today's existing record for the same text.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::actions::{is_url, Actions};
use crate::config::{ActionsConfig, Config};
use crate::error::{Error, Result};
use crate::record::{AttendanceLog, AttendanceRecord, ScanSource};
use crate::storage::LogStore;

/// How far the dedup gate reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupScope {
    /// One gate for all sources: camera and image detections suppress each other.
    #[default]
    Global,
    /// A repeat is only suppressed when it also comes from the same source.
    PerSource,
}

/// Source of local wall-clock time.
pub trait Clock {
    /// Current local date and time.
    fn now(&self) -> NaiveDateTime;
}

/// The system's local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Result of handing a detection to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The payload was empty.
    Ignored,
    /// Same payload as the last accepted one, inside the dedup window.
    Suppressed,
    /// A new record was created.
    LoggedIn(AttendanceRecord),
    /// An existing record for today got a new log-out time.
    LoggedOut(AttendanceRecord),
}

impl Outcome {
    /// Whether the detection changed the log.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::LoggedIn(_) | Self::LoggedOut(_))
    }
}

/// Tunables of the engine, taken from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Maximum number of records kept.
    pub capacity: usize,
    /// Repeat suppression window.
    pub dedup_window: Duration,
    /// Scope of the repeat suppression.
    pub dedup_scope: DedupScope,
    /// chrono format for record dates.
    pub date_format: String,
    /// chrono format for log-in/log-out times.
    pub time_format: String,
    /// Side-effect toggles.
    pub actions: ActionsConfig,
}

impl EngineSettings {
    /// Build settings from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            capacity: config.log.capacity,
            dedup_window: config.dedup_window(),
            dedup_scope: config.scan.dedup_scope,
            date_format: config.log.date_format.clone(),
            time_format: config.log.time_format.clone(),
            actions: config.actions.clone(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The last accepted detection.
#[derive(Debug, Clone, Copy)]
struct LastSeen {
    hash: blake3::Hash,
    source: ScanSource,
    at: NaiveDateTime,
}

/// Owns the dedup state and performs log upserts against a [`LogStore`].
pub struct Engine<S> {
    store: S,
    settings: EngineSettings,
    last_seen: Option<LastSeen>,
    clock: Box<dyn Clock>,
    actions: Box<dyn Actions>,
}

impl<S> std::fmt::Debug for Engine<S>
where
    S: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.store)
            .field("settings", &self.settings)
            .field("last_seen", &self.last_seen)
            .finish_non_exhaustive()
    }
}

impl<S: LogStore> Engine<S> {
    /// Create an engine using the system clock.
    #[must_use]
    pub fn new(store: S, settings: EngineSettings, actions: Box<dyn Actions>) -> Self {
        Self::with_clock(store, settings, actions, Box::new(SystemClock))
    }

    /// Create an engine with an explicit clock.
    #[must_use]
    pub fn with_clock(
        store: S,
        settings: EngineSettings,
        actions: Box<dyn Actions>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            store,
            settings,
            last_seen: None,
            clock,
            actions,
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Record a detection at the clock's current time.
    ///
    /// `snapshot` is only invoked when a new record is created.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be loaded, or [`Error::LogSave`] if
    /// it cannot be persisted.
    pub fn handle_detection<F>(
        &mut self,
        text: &str,
        source: ScanSource,
        snapshot: F,
    ) -> Result<Outcome>
    where
        F: FnOnce() -> Option<String>,
    {
        let now = self.clock.now();
        self.handle_detection_at(text, source, now, snapshot)
    }

    /// Record a detection that happened at `now`.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::handle_detection`].
    pub fn handle_detection_at<F>(
        &mut self,
        text: &str,
        source: ScanSource,
        now: NaiveDateTime,
        snapshot: F,
    ) -> Result<Outcome>
    where
        F: FnOnce() -> Option<String>,
    {
        if text.is_empty() {
            return Ok(Outcome::Ignored);
        }

        let hash = blake3::hash(text.as_bytes());
        if self.is_repeat(hash, source, now) {
            debug!(%source, "Suppressing repeat detection");
            return Ok(Outcome::Suppressed);
        }
        let today = format_timestamp(now, &self.settings.date_format)?;
        let time = format_timestamp(now, &self.settings.time_format)?;

        self.last_seen = Some(LastSeen {
            hash,
            source,
            at: now,
        });

        let mut log = self.store.load()?;
        let outcome = if let Some(record) = log.find_mut(text, &today) {
            record.log_out = time;
            Outcome::LoggedOut(record.clone())
        } else {
            let record = AttendanceRecord::new(text, today, time, source, snapshot());
            log.push_front(record.clone());
            Outcome::LoggedIn(record)
        };

        let dropped = log.truncate(self.settings.capacity);
        if dropped > 0 {
            debug!(dropped, "Evicted oldest records over capacity");
        }

        self.store
            .save(&log)
            .map_err(|err| Error::log_save(&err))?;

        match &outcome {
            Outcome::LoggedIn(r) => info!(text = %r.text, date = %r.date, at = %r.log_in, "Logged in"),
            Outcome::LoggedOut(r) => {
                info!(text = %r.text, date = %r.date, at = %r.log_out, "Logged out");
            }
            Outcome::Ignored | Outcome::Suppressed => {}
        }

        self.run_actions(text);
        Ok(outcome)
    }

    /// Current contents of the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn log(&self) -> Result<AttendanceLog> {
        self.store.load()
    }

    /// Empty the log. The dedup state is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }

    fn is_repeat(&self, hash: blake3::Hash, source: ScanSource, now: NaiveDateTime) -> bool {
        let Some(last) = self.last_seen else {
            return false;
        };
        if last.hash != hash {
            return false;
        }
        if self.settings.dedup_scope == DedupScope::PerSource && last.source != source {
            return false;
        }
        let elapsed = now.signed_duration_since(last.at);
        // Local time can step backwards (DST fall-back, NTP); that is never a repeat
        if elapsed < TimeDelta::zero() {
            return false;
        }
        let window = TimeDelta::from_std(self.settings.dedup_window).unwrap_or(TimeDelta::MAX);
        elapsed < window
    }

    fn run_actions(&mut self, text: &str) {
        let toggles = &self.settings.actions;
        if toggles.sound {
            if let Err(e) = self.actions.alert() {
                warn!(error = %e, "Audible alert failed");
            }
        }
        if toggles.auto_copy {
            if let Err(e) = self.actions.copy_text(text) {
                warn!(error = %e, "Copy to clipboard failed");
            }
        }
        if toggles.auto_open_url && is_url(text) {
            if let Err(e) = self.actions.open_url(text) {
                warn!(error = %e, "Opening URL failed");
            }
        }
    }
}

/// Format `at` with a chrono format string.
///
/// Specifiers that need an offset (`%z`, `%Z`) cannot be rendered from a
/// naive local time and produce an error instead of a panic.
///
/// # Errors
///
/// Returns [`Error::ConfigValidation`] if `format` cannot render `at`.
pub(crate) fn format_timestamp(at: NaiveDateTime, format: &str) -> Result<String> {
    let mut out = String::new();
    write!(out, "{}", at.format(format)).map_err(|_| Error::ConfigValidation {
        message: format!("cannot render date/time format: {format}"),
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::tests::RecordingActions;
    use crate::storage::Storage;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn at(day: u32, h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    fn engine_with(settings: EngineSettings) -> (Engine<Storage>, RecordingActions) {
        let actions = RecordingActions::default();
        let engine = Engine::new(
            Storage::open_in_memory().unwrap(),
            settings,
            Box::new(actions.clone()),
        );
        (engine, actions)
    }

    fn engine() -> Engine<Storage> {
        engine_with(EngineSettings::default()).0
    }

    fn no_snapshot() -> Option<String> {
        None
    }

    #[test]
    fn test_empty_text_is_ignored() {
        let mut engine = engine();
        let outcome = engine
            .handle_detection_at("", ScanSource::Camera, at(4, 9, 0, 0, 0), no_snapshot)
            .unwrap();
        assert_eq!(outcome, Outcome::Ignored);
        assert!(engine.log().unwrap().is_empty());
    }

    #[test]
    fn test_repeats_inside_window_are_suppressed() {
        let mut engine = engine();
        let first = engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 9, 0, 0, 0), no_snapshot)
            .unwrap();
        assert!(first.is_accepted());

        for ms in [100, 900, 2499] {
            let when = at(4, 9, 0, 0, 0) + TimeDelta::milliseconds(ms);
            let outcome = engine
                .handle_detection_at("EMP-1", ScanSource::Camera, when, no_snapshot)
                .unwrap();
            assert_eq!(outcome, Outcome::Suppressed);
        }

        let log = engine.log().unwrap();
        assert_eq!(log.len(), 1);
        assert!(log.records()[0].log_out.is_empty());
    }

    #[test]
    fn test_window_is_measured_from_last_accepted() {
        let mut engine = engine();
        engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 9, 0, 0, 0), no_snapshot)
            .unwrap();
        // Exactly at the window edge the detection is accepted
        let outcome = engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 9, 0, 2, 500), no_snapshot)
            .unwrap();
        assert!(matches!(outcome, Outcome::LoggedOut(_)));
    }

    #[test]
    fn test_clock_going_backwards_is_not_a_repeat() {
        let mut engine = engine();
        engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 1, 59, 0, 0), no_snapshot)
            .unwrap();

        // Wall clock fell back an hour; the same badge 29 minutes later
        let outcome = engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 1, 30, 0, 0), no_snapshot)
            .unwrap();
        let Outcome::LoggedOut(record) = outcome else {
            panic!("expected a log-out update, got {outcome:?}");
        };
        assert_eq!(record.log_out, "01:30:00");

        // The gate now measures from the new reading
        let outcome = engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 1, 30, 1, 0), no_snapshot)
            .unwrap();
        assert_eq!(outcome, Outcome::Suppressed);
    }

    #[test]
    fn test_different_text_is_not_suppressed() {
        let mut engine = engine();
        engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 9, 0, 0, 0), no_snapshot)
            .unwrap();
        let outcome = engine
            .handle_detection_at("EMP-2", ScanSource::Camera, at(4, 9, 0, 0, 10), no_snapshot)
            .unwrap();
        assert!(matches!(outcome, Outcome::LoggedIn(_)));

        // The gate only remembers the last text: EMP-1 is accepted again
        let outcome = engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 9, 0, 0, 20), no_snapshot)
            .unwrap();
        assert!(matches!(outcome, Outcome::LoggedOut(_)));
    }

    #[test]
    fn test_second_detection_sets_log_out_only() {
        let mut engine = engine();
        engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 9, 0, 0, 0), no_snapshot)
            .unwrap();
        engine
            .handle_detection_at("EMP-1", ScanSource::Image, at(4, 12, 0, 0, 0), no_snapshot)
            .unwrap();
        engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 18, 0, 0, 0), no_snapshot)
            .unwrap();

        let log = engine.log().unwrap();
        assert_eq!(log.len(), 1);
        let record = &log.records()[0];
        assert_eq!(record.log_in, "09:00:00");
        assert_eq!(record.log_out, "18:00:00");
        assert_eq!(record.source, ScanSource::Camera);
    }

    #[test]
    fn test_different_days_create_separate_records() {
        let mut engine = engine();
        engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 9, 0, 0, 0), no_snapshot)
            .unwrap();
        engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(5, 9, 0, 0, 0), no_snapshot)
            .unwrap();

        let log = engine.log().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.records()[0].date, "2024-03-05");
        assert_eq!(log.records()[1].date, "2024-03-04");
    }

    #[test]
    fn test_attendance_scenario() {
        let mut engine = engine();

        engine
            .handle_detection_at("EMP-42", ScanSource::Camera, at(4, 9, 0, 0, 0), no_snapshot)
            .unwrap();
        let repeat = engine
            .handle_detection_at("EMP-42", ScanSource::Camera, at(4, 9, 0, 1, 0), no_snapshot)
            .unwrap();
        assert_eq!(repeat, Outcome::Suppressed);

        let log = engine.log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.records()[0].log_in, "09:00:00");
        assert_eq!(log.records()[0].log_out, "");

        engine
            .handle_detection_at("EMP-42", ScanSource::Camera, at(4, 17, 30, 0, 0), no_snapshot)
            .unwrap();
        let log = engine.log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.records()[0].log_in, "09:00:00");
        assert_eq!(log.records()[0].log_out, "17:30:00");

        engine
            .handle_detection_at("EMP-42", ScanSource::Camera, at(5, 9, 5, 0, 0), no_snapshot)
            .unwrap();
        let log = engine.log().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.records()[0].date, "2024-03-05");
        assert_eq!(log.records()[0].log_in, "09:05:00");
        assert_eq!(log.records()[0].log_out, "");
        assert_eq!(log.records()[1].log_out, "17:30:00");
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut engine = engine();
        for i in 0..201u32 {
            let text = format!("EMP-{i}");
            engine
                .handle_detection_at(&text, ScanSource::Camera, at(4, 9, 0, 0, 0), no_snapshot)
                .unwrap();
        }

        let log = engine.log().unwrap();
        assert_eq!(log.len(), 200);
        assert_eq!(log.records()[0].text, "EMP-200");
        assert_eq!(log.records()[199].text, "EMP-1");
        assert!(log.find("EMP-0", "2024-03-04").is_none());
    }

    #[test]
    fn test_snapshot_only_taken_for_new_records() {
        let mut engine = engine();
        let mut calls = 0;

        engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 9, 0, 0, 0), || {
                calls += 1;
                Some("data:image/jpeg;base64,AAA".to_string())
            })
            .unwrap();
        engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 17, 0, 0, 0), || {
                calls += 1;
                Some("data:image/jpeg;base64,BBB".to_string())
            })
            .unwrap();

        assert_eq!(calls, 1);
        let log = engine.log().unwrap();
        assert_eq!(
            log.records()[0].snapshot.as_deref(),
            Some("data:image/jpeg;base64,AAA")
        );
    }

    #[test]
    fn test_global_scope_suppresses_across_sources() {
        let mut engine = engine();
        engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 9, 0, 0, 0), no_snapshot)
            .unwrap();
        let outcome = engine
            .handle_detection_at("EMP-1", ScanSource::Image, at(4, 9, 0, 1, 0), no_snapshot)
            .unwrap();
        assert_eq!(outcome, Outcome::Suppressed);
    }

    #[test]
    fn test_per_source_scope_allows_other_source() {
        let settings = EngineSettings {
            dedup_scope: DedupScope::PerSource,
            ..EngineSettings::default()
        };
        let (mut engine, _) = engine_with(settings);
        engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 9, 0, 0, 0), no_snapshot)
            .unwrap();

        let outcome = engine
            .handle_detection_at("EMP-1", ScanSource::Image, at(4, 9, 0, 1, 0), no_snapshot)
            .unwrap();
        assert!(matches!(outcome, Outcome::LoggedOut(_)));

        let outcome = engine
            .handle_detection_at("EMP-1", ScanSource::Image, at(4, 9, 0, 2, 0), no_snapshot)
            .unwrap();
        assert_eq!(outcome, Outcome::Suppressed);
    }

    #[test]
    fn test_actions_follow_toggles() {
        let settings = EngineSettings {
            actions: ActionsConfig {
                sound: true,
                auto_copy: true,
                auto_open_url: true,
            },
            ..EngineSettings::default()
        };
        let (mut engine, actions) = engine_with(settings);

        engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 9, 0, 0, 0), no_snapshot)
            .unwrap();
        engine
            .handle_detection_at(
                "https://example.com/badge/1",
                ScanSource::Camera,
                at(4, 9, 0, 0, 10),
                no_snapshot,
            )
            .unwrap();
        // Suppressed detections trigger nothing
        engine
            .handle_detection_at(
                "https://example.com/badge/1",
                ScanSource::Camera,
                at(4, 9, 0, 0, 20),
                no_snapshot,
            )
            .unwrap();

        let calls = actions.calls();
        assert_eq!(
            calls,
            vec![
                "alert".to_string(),
                "copy:EMP-1".to_string(),
                "alert".to_string(),
                "copy:https://example.com/badge/1".to_string(),
                "open:https://example.com/badge/1".to_string(),
            ]
        );
    }

    #[test]
    fn test_actions_disabled_by_default() {
        let (mut engine, actions) = engine_with(EngineSettings::default());
        engine
            .handle_detection_at("https://x.test", ScanSource::Camera, at(4, 9, 0, 0, 0), no_snapshot)
            .unwrap();
        assert!(actions.calls().is_empty());
    }

    #[test]
    fn test_settings_from_default_config() {
        let settings = EngineSettings::from_config(&Config::default());
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.dedup_window, Duration::from_millis(2500));
        assert_eq!(settings.actions, ActionsConfig::default());
    }

    #[test]
    fn test_offset_time_format_is_an_error() {
        let settings = EngineSettings {
            time_format: "%H:%M:%S %Z".to_string(),
            ..EngineSettings::default()
        };
        let (mut engine, _) = engine_with(settings);
        let err = engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 9, 0, 0, 0), no_snapshot)
            .unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
        assert!(engine.log().unwrap().is_empty());
    }

    #[test]
    fn test_format_timestamp() {
        let when = at(4, 9, 5, 7, 0);
        assert_eq!(format_timestamp(when, "%Y-%m-%d").unwrap(), "2024-03-04");
        assert_eq!(format_timestamp(when, "%H:%M:%S").unwrap(), "09:05:07");
        for format in ["%z", "%:z", "%Z", "%Y-%Q"] {
            assert!(format_timestamp(when, format).is_err(), "{format}");
        }
    }

    struct FailingStore;

    impl LogStore for FailingStore {
        fn load(&self) -> Result<AttendanceLog> {
            Ok(AttendanceLog::new())
        }

        fn save(&self, _log: &AttendanceLog) -> Result<()> {
            Err(Error::internal("disk full"))
        }

        fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_save_failure_is_log_save_error() {
        let mut engine = Engine::new(
            FailingStore,
            EngineSettings::default(),
            Box::new(RecordingActions::default()),
        );
        let err = engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 9, 0, 0, 0), no_snapshot)
            .unwrap_err();
        assert!(matches!(err, Error::LogSave { .. }));
        assert!(err.to_string().contains("disk full"));
    }

    struct FixedClock(NaiveDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            self.0
        }
    }

    #[test]
    fn test_handle_detection_uses_clock() {
        let mut engine = Engine::with_clock(
            Storage::open_in_memory().unwrap(),
            EngineSettings::default(),
            Box::new(RecordingActions::default()),
            Box::new(FixedClock(at(4, 8, 15, 0, 0))),
        );
        let outcome = engine
            .handle_detection("EMP-7", ScanSource::Image, no_snapshot)
            .unwrap();
        let Outcome::LoggedIn(record) = outcome else {
            panic!("expected a new record");
        };
        assert_eq!(record.date, "2024-03-04");
        assert_eq!(record.log_in, "08:15:00");
        assert_eq!(record.source, ScanSource::Image);
    }

    #[test]
    fn test_clear_empties_log() {
        let mut engine = engine();
        engine
            .handle_detection_at("EMP-1", ScanSource::Camera, at(4, 9, 0, 0, 0), no_snapshot)
            .unwrap();
        engine.clear().unwrap();
        assert!(engine.log().unwrap().is_empty());
    }
}
