//! The harvest-and-travel loop.
//!
//! Each step scans the current map, harvests if a target shows up, then walks
//! to the next map of the cycle. Position only advances after a route fully
//! succeeds; any navigation failure ends the run.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::time::sleep;

use crate::config::Config;
use crate::input::{Actuator, jitter};
use crate::navigator::Navigator;
use crate::routes::{RouteError, RouteGraph, route_name};
use crate::scanner::{HarvestScanner, HarvestTarget};
use crate::state::{Rig, RunControl};
use crate::status::Level;
use crate::transition::TransitionDetector;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum RunOutcome {
    Stopped,
    Failed(String),
}

/// Result of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Advanced,
    Stopped,
    Failed(String),
}

pub struct Cycle {
    routes: Arc<RouteGraph>,
    scanner: HarvestScanner,
    navigator: Navigator,
    actuator: Actuator,
    control: Arc<RunControl>,
    config: Config,
    index: usize,
}

impl Cycle {
    /// Wire up a run starting at `starting_map`.
    pub fn new(rig: &Rig, control: Arc<RunControl>, config: &Config, starting_map: &str) -> Result<Self, RouteError> {
        let index = rig.routes.index_of(starting_map)?;
        let timing = config.timing.clone();

        let actuator = Actuator::new(rig.input.clone(), control.clone(), timing.clone());
        let detector = TransitionDetector::new(
            rig.screen.clone(),
            control.clone(),
            config.transition.clone(),
            timing.clone(),
        );
        let navigator = Navigator::new(
            rig.routes.clone(),
            actuator.clone(),
            detector,
            control.clone(),
            timing.clone(),
        );
        let scanner = HarvestScanner::new(
            rig.screen.clone(),
            rig.templates.clone(),
            control.clone(),
            config.matching.clone(),
            timing,
        );

        Ok(Self {
            routes: rig.routes.clone(),
            scanner,
            navigator,
            actuator,
            control,
            config: config.clone(),
            index,
        })
    }

    pub fn current_map(&self) -> &str {
        self.routes.map_at(self.index)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Run until stopped or a navigation failure. The run control must already
    /// be started. Unexpected errors end the run as `Failed`.
    pub async fn run(&mut self) -> RunOutcome {
        self.control
            .report(Level::Info, "Water Collector Bot Started!");
        self.control.report(
            Level::Info,
            &format!(
                "Starting bot cycle in {} seconds...",
                self.config.timing.startup_delay.as_secs()
            ),
        );
        sleep(self.config.timing.startup_delay).await;

        let outcome = loop {
            if !self.control.is_running() {
                break RunOutcome::Stopped;
            }
            match self.step().await {
                Ok(Step::Advanced) => {
                    self.control.report(Level::Info, "--- Cycle continues ---");
                    sleep(self.config.timing.post_cycle).await;
                }
                Ok(Step::Stopped) => break RunOutcome::Stopped,
                Ok(Step::Failed(reason)) => break RunOutcome::Failed(reason),
                Err(e) => {
                    let reason = format!("An unexpected error occurred: {e:#}");
                    tracing::error!("{reason}");
                    self.control.request_stop(Some(&reason));
                    break RunOutcome::Failed(reason);
                }
            }
        };

        tracing::info!("Run has stopped ({outcome:?}) at {}.", self.current_map());
        outcome
    }

    /// One scan → harvest → travel iteration.
    pub async fn step(&mut self) -> Result<Step> {
        let current = self.current_map().to_string();
        self.control.set_current_map(&current);
        self.control
            .report(Level::Info, &format!("Currently on {current}."));

        if let Some(target) = self.scanner.scan().await? {
            self.harvest(&target).await?;
        }

        if !self.control.is_running() {
            return Ok(Step::Stopped);
        }

        let next_index = self.routes.next_index(self.index);
        let next = self.routes.map_at(next_index).to_string();
        let route = route_name(&current, &next);
        self.control.report(
            Level::Info,
            &format!("Traveling from {current} to {next}."),
        );

        if self.navigator.run_route(&route).await? {
            self.index = next_index;
            self.control.set_current_map(&next);
            self.control
                .report(Level::Success, &format!("Arrived at {next}."));
            return Ok(Step::Advanced);
        }

        if !self.control.is_running() {
            // Cancelled mid-route
            return Ok(Step::Stopped);
        }

        let reason = format!("Navigation failed from {current} to {next}.");
        self.control.report(
            Level::Error,
            "Stopping bot due to navigation failure.",
        );
        self.control.request_stop(Some(&reason));
        Ok(Step::Failed(reason))
    }

    /// Click the target and wait out the harvest animation. The wait is not
    /// interrupted by a stop request.
    async fn harvest(&self, target: &HarvestTarget) -> Result<()> {
        self.control.report(
            Level::Info,
            &format!("Attempting to harvest water at ({}, {})...", target.x, target.y),
        );

        let x = target.x as i32;
        let y = target.y as i32 + self.config.matching.click_offset_y;
        self.actuator.click_at(x, y).await?;

        let wait = jitter(self.config.timing.harvest_min, self.config.timing.harvest_max);
        sleep(wait).await;
        self.control
            .report(Level::Success, "Harvest action completed.");
        Ok(())
    }
}
