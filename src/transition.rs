//! Map-load detection by watching screen brightness.
//!
//! A map change shows up as a loading screen: the center of the screen goes
//! black, then comes back. The detector waits for both edges in turn, each
//! with its own timeout, polling the stop flag before every sample so a stop
//! request is honored within one poll interval.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::time::{Instant, sleep};

use crate::config::{FracRegion, Timing, TransitionSettings};
use crate::screen::Screen;
use crate::state::RunControl;
use crate::status::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionResult {
    Success,
    Timeout,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    /// Waiting for brightness to drop below the threshold.
    Blackout,
    /// Waiting for brightness to rise above it again.
    Recovery,
}

pub struct TransitionDetector {
    screen: Arc<dyn Screen>,
    control: Arc<RunControl>,
    settings: TransitionSettings,
    timing: Timing,
}

impl TransitionDetector {
    pub fn new(
        screen: Arc<dyn Screen>,
        control: Arc<RunControl>,
        settings: TransitionSettings,
        timing: Timing,
    ) -> Self {
        Self {
            screen,
            control,
            settings,
            timing,
        }
    }

    /// Wait for a blackout followed by recovery.
    ///
    /// Each phase gets the full map-load timeout. A single sample past the
    /// threshold is enough to complete a phase. `Err` means the screen could
    /// not be read at all.
    pub async fn await_transition(&self) -> Result<TransitionResult> {
        self.control
            .report(Level::Info, "Waiting for map transition...");

        self.control
            .report(Level::Debug, "Waiting for screen to turn black...");
        match self.watch(Edge::Blackout).await? {
            TransitionResult::Success => {}
            TransitionResult::Timeout => {
                self.control.report(
                    Level::Warning,
                    "Map transition timeout: Screen did not turn black.",
                );
                return Ok(TransitionResult::Timeout);
            }
            TransitionResult::Stopped => return Ok(TransitionResult::Stopped),
        }

        self.control.report(
            Level::Debug,
            "Screen is black. Waiting for it to become visible again.",
        );
        match self.watch(Edge::Recovery).await? {
            TransitionResult::Success => {
                self.control.report(
                    Level::Debug,
                    "Screen is visible again. Map transition complete.",
                );
                Ok(TransitionResult::Success)
            }
            TransitionResult::Timeout => {
                self.control.report(
                    Level::Warning,
                    "Map transition timeout: Screen did not become visible again.",
                );
                Ok(TransitionResult::Timeout)
            }
            TransitionResult::Stopped => Ok(TransitionResult::Stopped),
        }
    }

    async fn watch(&self, edge: Edge) -> Result<TransitionResult> {
        let region = match edge {
            Edge::Blackout => self.settings.blackout_region,
            Edge::Recovery => self.settings.recovery_region,
        };
        let threshold = self.settings.black_threshold;
        let started = Instant::now();

        while started.elapsed() < self.timing.map_load_timeout {
            if !self.control.is_running() {
                self.control
                    .report(Level::Info, "Map transition cancelled by user.");
                return Ok(TransitionResult::Stopped);
            }

            let brightness = self.sample(region).await?;
            let crossed = match edge {
                Edge::Blackout => brightness < threshold,
                Edge::Recovery => brightness > threshold,
            };
            if crossed {
                tracing::debug!(
                    "{edge:?} edge at brightness {brightness:.1} after {:?}",
                    started.elapsed()
                );
                return Ok(TransitionResult::Success);
            }

            sleep(self.timing.poll_interval).await;
        }

        Ok(TransitionResult::Timeout)
    }

    async fn sample(&self, region: FracRegion) -> Result<f64> {
        let screen = self.screen.clone();
        tokio::task::spawn_blocking(move || screen.sample_brightness(region))
            .await
            .context("brightness sampling task panicked")?
            .context("failed to sample screen brightness")
    }
}
