//! Sweep-tracking scan controller.
//!
//! ```text
//! Init ──► FirstPing ──► Stepping ──► Terminal(Cancelled)
//!              │             │
//!              │             └──────► Terminal(SinkFailure)
//!              └────────────────────► Terminal(StartupFailure)
//! ```
//!
//! The first CHECK ping establishes the reference angle `init_pos`. The head is
//! then stepped indefinitely; every time the rounded position lands exactly on
//! `init_pos` the return counter is bumped. Each configured sweep passes the
//! origin twice, so after `num_sweeps * 2` returns the current scan file is
//! closed and the next one opened.
//!
//! Failed transactions and undecodable responses during stepping only lose that
//! step. Cancellation is polled once per iteration, before the transaction.

use super::sink::{DataSink, SinkFactory};
use crate::config::SwitchParameters;
use crate::error::{SonarError, SonarResult};
use crate::instrument::{SerialDevice, Transactor};
use crate::protocol::{decode, round_tenth, FrameSet};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Shared stop request, set once by a watcher and polled by the scan loop.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that is not yet set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the scan loop to stop after the in-flight transaction.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why the controller stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// Stopped by the cancel flag.
    Cancelled,
    /// No reference position could be acquired.
    StartupFailure,
    /// A scan file could not be opened.
    SinkFailure,
}

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Frames built, nothing sent yet.
    Init,
    /// Acquiring the reference position.
    FirstPing,
    /// Stepping the head.
    Stepping,
    /// Finished.
    Terminal(Terminal),
}

/// Position and segmentation bookkeeping for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanState {
    /// Index of the scan currently being written, starting at 0.
    pub scan_index: u32,
    /// Origin returns seen in the current scan.
    pub return_count: u32,
    /// Reference angle in degrees, rounded to 0.1.
    pub init_pos: Option<f64>,
    /// Last decoded head position in degrees.
    pub current_pos: Option<f64>,
    /// Steps in the current scan that produced data.
    pub successful: u64,
    /// Steps in the current scan that were lost.
    pub unsuccessful: u64,
    /// STEP transactions issued this session.
    pub total_steps: u64,
}

/// Drives one scanning session on a device.
pub struct ScanController<D, F> {
    device: D,
    sinks: F,
    transactor: Transactor,
    params: SwitchParameters,
    frames: FrameSet,
    cancel: CancelFlag,
    state: ControllerState,
    scan: ScanState,
    sink: Option<DataSink>,
}

impl<D: SerialDevice, F: SinkFactory> ScanController<D, F> {
    /// Build the controller and its three frame variants.
    pub fn new(
        device: D,
        sinks: F,
        transactor: Transactor,
        params: SwitchParameters,
        cancel: CancelFlag,
    ) -> Self {
        let frames = FrameSet::build(&params);
        Self {
            device,
            sinks,
            transactor,
            params,
            frames,
            cancel,
            state: ControllerState::Init,
            scan: ScanState::default(),
            sink: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Position and segmentation bookkeeping.
    pub fn scan_state(&self) -> &ScanState {
        &self.scan
    }

    /// Frames built for this session.
    pub fn frames(&self) -> &FrameSet {
        &self.frames
    }

    /// Origin returns that close a scan.
    pub fn returns_per_scan(&self) -> u32 {
        u32::from(self.params.num_sweeps) * 2
    }

    /// Give back the device and sink factory.
    pub fn into_parts(self) -> (D, F) {
        (self.device, self.sinks)
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `StartupFailure` when the reference position cannot be acquired,
    /// and `DataSink` when a scan file cannot be created.
    pub fn run(&mut self) -> SonarResult<Terminal> {
        let result = self.run_inner();
        self.close_sink();
        match &result {
            Ok(_) => self.state = ControllerState::Terminal(Terminal::Cancelled),
            Err(SonarError::StartupFailure(_)) => {
                self.state = ControllerState::Terminal(Terminal::StartupFailure)
            }
            Err(_) => self.state = ControllerState::Terminal(Terminal::SinkFailure),
        }
        result
    }

    fn run_inner(&mut self) -> SonarResult<Terminal> {
        self.state = ControllerState::FirstPing;
        let init_pos = self.acquire_init_pos()?;
        self.scan.init_pos = Some(init_pos);
        info!("Initial head position {:.1}°", init_pos);

        self.open_scan()?;

        // Baseline step: sets the position without counting a return.
        self.state = ControllerState::Stepping;
        if let Some(pos) = self.step() {
            self.scan.current_pos = Some(pos);
        }

        loop {
            if self.cancel.is_cancelled() {
                info!("Scan cancelled after {} steps", self.scan.total_steps);
                return Ok(Terminal::Cancelled);
            }

            let Some(pos) = self.step() else {
                continue;
            };
            self.scan.current_pos = Some(pos);

            if round_tenth(pos) == init_pos {
                self.scan.return_count += 1;
                debug!(
                    "Return {}/{} to {:.1}°",
                    self.scan.return_count,
                    self.returns_per_scan(),
                    init_pos
                );
                if self.scan.return_count >= self.returns_per_scan() {
                    self.advance_scan()?;
                }
            }
        }
    }

    fn acquire_init_pos(&mut self) -> SonarResult<f64> {
        let check = self.frames.check;
        let raw = self
            .transactor
            .transact(&mut self.device, check.as_bytes(), None, 0)
            .map_err(|e| {
                error!("Initial position check failed: {}", e);
                SonarError::StartupFailure(format!("initial position check failed: {}", e))
            })?;

        let response = decode(&raw).map_err(|e| {
            error!("Initial position response unusable: {}", e);
            SonarError::StartupFailure(format!("initial position response unusable: {}", e))
        })?;

        response.headpos().map(round_tenth).ok_or_else(|| {
            error!("Initial position response has no head position ({})", response.header);
            SonarError::StartupFailure(format!(
                "response header {} carries no head position",
                response.header
            ))
        })
    }

    /// Issue one STEP and return the decoded head position, or `None` if the step was lost.
    fn step(&mut self) -> Option<f64> {
        let step = self.scan.total_steps;
        self.scan.total_steps += 1;

        let frame = self.frames.step;
        let sink = self.sink.as_mut().map(|s| s as &mut dyn Write);
        let raw = match self
            .transactor
            .transact(&mut self.device, frame.as_bytes(), sink, step)
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Step {}: lost ({})", step, e);
                self.scan.unsuccessful += 1;
                return None;
            }
        };

        match decode(&raw) {
            Ok(response) => match response.headpos() {
                Some(pos) => {
                    self.scan.successful += 1;
                    Some(pos)
                }
                None => {
                    warn!("Step {}: {} response carries no head position", step, response.header);
                    self.scan.unsuccessful += 1;
                    None
                }
            },
            Err(e) => {
                warn!("Step {}: parse error: {}", step, e);
                self.scan.unsuccessful += 1;
                None
            }
        }
    }

    fn open_scan(&mut self) -> SonarResult<()> {
        let sink = self.sinks.open(self.scan.scan_index)?;
        self.sink = Some(sink);
        info!("Starting Scan {}", self.scan.scan_index);
        Ok(())
    }

    fn close_sink(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.flush() {
                warn!("Scan {}: failed to flush data file: {}", self.scan.scan_index, e);
            }
            info!(
                "Scan {} complete: steps={}, successful={}, unsuccessful={}",
                self.scan.scan_index,
                self.scan.successful + self.scan.unsuccessful,
                self.scan.successful,
                self.scan.unsuccessful
            );
        }
    }

    fn advance_scan(&mut self) -> SonarResult<()> {
        self.close_sink();
        self.scan.scan_index += 1;
        self.scan.return_count = 0;
        self.scan.successful = 0;
        self.scan.unsuccessful = 0;
        self.open_scan()
    }
}
