//! The detect-and-dedup loop.
//!
//! A [`ScanSession`] owns the engine, the decoder selector, the frame raster
//! and the overlay. Camera input runs [`ScanSession::run_continuous`], one
//! tick per frame, until the [`ScanHandle`] is stopped or the source ends.
//! Still images go through [`ScanSession::scan_once`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::decoder::{DecodedPayload, DecoderSelector};
use crate::engine::{Engine, Outcome};
use crate::error::{Error, Result};
use crate::frame::{encode_snapshot, FrameSource};
use crate::overlay::Overlay;
use crate::record::ScanSource;
use crate::storage::LogStore;

/// Lifecycle of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Not scanning.
    Idle,
    /// Loading the decoder and acquiring the camera.
    Starting,
    /// Ticking.
    Scanning,
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Scanning => write!(f, "scanning"),
        }
    }
}

/// Cloneable stop switch for a running scan.
#[derive(Debug, Clone, Default)]
pub struct ScanHandle {
    stop_signal: Arc<AtomicBool>,
}

impl ScanHandle {
    /// Create a handle that has not been stopped.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop after the current tick.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Clear a previous stop request.
    pub fn reset(&self) {
        self.stop_signal.store(false, Ordering::SeqCst);
    }
}

/// Something that happened during a continuous scan.
#[derive(Debug)]
pub enum ScanEvent {
    /// The engine handled a detection.
    Detected(Outcome),
    /// The engine failed to handle a detection. The loop continues.
    Failed(Error),
}

/// Counters for a finished continuous scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Frames decoded.
    pub frames: u64,
    /// Frames that could not be grabbed.
    pub failed_grabs: u64,
    /// New records.
    pub logged_in: u64,
    /// Log-out updates.
    pub logged_out: u64,
    /// Repeats dropped by the dedup gate.
    pub suppressed: u64,
}

impl ScanReport {
    fn count(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::LoggedIn(_) => self.logged_in += 1,
            Outcome::LoggedOut(_) => self.logged_out += 1,
            Outcome::Suppressed => self.suppressed += 1,
            Outcome::Ignored => {}
        }
    }
}

/// Session tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Delay between camera ticks.
    pub tick_interval: Duration,
    /// Attach a snapshot to new records.
    pub capture_snapshots: bool,
    /// JPEG quality of snapshots.
    pub snapshot_quality: u8,
}

impl SessionSettings {
    /// Build settings from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            capture_snapshots: config.log.capture_snapshots,
            snapshot_quality: config.log.snapshot_quality,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

enum Tick {
    Frame(Option<Outcome>),
    GrabFailed,
    Dropped,
    Ended,
}

/// Scan state for one user session.
pub struct ScanSession<S> {
    engine: Engine<S>,
    decoder: DecoderSelector,
    raster: RgbaImage,
    overlay: Overlay,
    settings: SessionSettings,
    state: ScanState,
}

impl<S: std::fmt::Debug> std::fmt::Debug for ScanSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("engine", &self.engine)
            .field("decoder", &self.decoder)
            .field("raster", &self.raster.dimensions())
            .field("overlay", &self.overlay)
            .field("settings", &self.settings)
            .field("state", &self.state)
            .finish()
    }
}

impl<S: LogStore> ScanSession<S> {
    /// Create an idle session.
    #[must_use]
    pub fn new(engine: Engine<S>, decoder: DecoderSelector, settings: SessionSettings) -> Self {
        Self {
            engine,
            decoder,
            raster: RgbaImage::new(0, 0),
            overlay: Overlay::new(),
            settings,
            state: ScanState::Idle,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// The engine.
    #[must_use]
    pub fn engine(&self) -> &Engine<S> {
        &self.engine
    }

    /// The decoder selector.
    #[must_use]
    pub fn decoder(&self) -> &DecoderSelector {
        &self.decoder
    }

    /// Shapes from the latest frame.
    #[must_use]
    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    /// The latest frame.
    #[must_use]
    pub fn raster(&self) -> &RgbaImage {
        &self.raster
    }

    /// The latest frame with the overlay drawn on it.
    #[must_use]
    pub fn annotated(&self) -> RgbaImage {
        self.overlay.render_onto(&self.raster)
    }

    /// Scan frames until `handle` is stopped, `max_frames` frames were
    /// decoded, or the source runs out.
    ///
    /// `on_event` sees every engine outcome as it happens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyScanning`] if the session is not idle,
    /// [`Error::DecoderUnavailable`] or [`Error::CameraUnavailable`] if
    /// starting fails. The session is idle again afterwards.
    pub async fn run_continuous<F>(
        &mut self,
        source: &mut dyn FrameSource,
        handle: &ScanHandle,
        max_frames: Option<u64>,
        mut on_event: F,
    ) -> Result<ScanReport>
    where
        F: FnMut(ScanEvent),
    {
        self.begin(source).await?;
        info!(source = %source.source(), decoder = %self.decoder.active(), "Scanning");

        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut report = ScanReport::default();
        loop {
            if handle.should_stop() {
                debug!("Stop requested");
                break;
            }
            if max_frames.is_some_and(|max| report.frames >= max) {
                debug!(frames = report.frames, "Frame limit reached");
                break;
            }
            ticker.tick().await;

            match self.tick(source, handle).await {
                Ok(Tick::Frame(outcome)) => {
                    report.frames += 1;
                    if let Some(outcome) = outcome {
                        report.count(&outcome);
                        on_event(ScanEvent::Detected(outcome));
                    }
                }
                Ok(Tick::GrabFailed) => report.failed_grabs += 1,
                Ok(Tick::Dropped) => {}
                Ok(Tick::Ended) => {
                    debug!("Frame source ended");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Detection not recorded");
                    on_event(ScanEvent::Failed(e));
                }
            }
        }

        source.stop();
        self.overlay.clear();
        self.state = ScanState::Idle;
        info!(
            frames = report.frames,
            logged_in = report.logged_in,
            logged_out = report.logged_out,
            "Scanning stopped"
        );
        Ok(report)
    }

    /// Decode a single frame from `source`.
    ///
    /// Returns `None` if no QR code was found.
    ///
    /// # Errors
    ///
    /// Returns an error if starting fails, the source has no frame, or the
    /// detection could not be recorded.
    pub async fn scan_once(&mut self, source: &mut dyn FrameSource) -> Result<Option<Outcome>> {
        self.begin(source).await?;
        let result = self.scan_first_frame(source).await;
        source.stop();
        self.state = ScanState::Idle;
        result
    }

    async fn scan_first_frame(&mut self, source: &mut dyn FrameSource) -> Result<Option<Outcome>> {
        let frame = source
            .next_frame()
            .await?
            .ok_or_else(|| Error::internal("frame source produced no frame"))?;
        self.raster = frame;
        let payloads = self.decoder.detect(&self.raster).await;
        self.process(&payloads, source.source())
    }

    async fn begin(&mut self, source: &mut dyn FrameSource) -> Result<()> {
        if self.state != ScanState::Idle {
            return Err(Error::AlreadyScanning);
        }
        self.state = ScanState::Starting;

        let started = match self.decoder.ensure_available() {
            Ok(()) => source.start().await,
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            self.state = ScanState::Idle;
            return Err(e);
        }

        self.state = ScanState::Scanning;
        Ok(())
    }

    async fn tick(&mut self, source: &mut dyn FrameSource, handle: &ScanHandle) -> Result<Tick> {
        let frame = match source.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(Tick::Ended),
            Err(e) => {
                warn!(error = %e, "Frame grab failed");
                return Ok(Tick::GrabFailed);
            }
        };
        self.raster = frame;

        let payloads = self.decoder.detect(&self.raster).await;
        if handle.should_stop() {
            return Ok(Tick::Dropped);
        }
        self.process(&payloads, source.source()).map(Tick::Frame)
    }

    /// Update the overlay and hand the first payload to the engine.
    fn process(
        &mut self,
        payloads: &[DecodedPayload],
        source: ScanSource,
    ) -> Result<Option<Outcome>> {
        let Some(first) = payloads.first() else {
            self.overlay.clear();
            return Ok(None);
        };
        self.overlay.draw(payloads);
        if payloads.len() > 1 {
            debug!(count = payloads.len(), "Multiple codes in frame, using the first");
        }

        let raster = &self.raster;
        let settings = self.settings;
        let outcome = self.engine.handle_detection(&first.text, source, || {
            if !settings.capture_snapshots {
                return None;
            }
            encode_snapshot(raster, settings.snapshot_quality)
                .map_err(|e| warn!(error = %e, "Snapshot failed"))
                .ok()
        })?;
        Ok(Some(outcome))
    }
}
