use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::input::InputDevice;
use crate::routes::RouteGraph;
use crate::scanner::TemplateSet;
use crate::screen::Screen;
use crate::status::{Level, OperatorStatus, StatusSink};

/// Cooperative run-control shared between the control surface and the worker.
///
/// Each field has exactly one writer: the control side writes the stop flag,
/// the worker writes progress (counter, current map). Reads are lock-free
/// except for the stop reason and current map, which are rarely touched.
pub struct RunControl {
    running: AtomicBool,
    stop_reason: Mutex<Option<String>>,
    resource_count: AtomicU64,
    count_tx: watch::Sender<u64>,
    current_map: Mutex<Option<String>>,
    sink: Arc<dyn StatusSink>,
}

impl RunControl {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        let (count_tx, _rx) = watch::channel(0);
        Self {
            running: AtomicBool::new(false),
            stop_reason: Mutex::new(None),
            resource_count: AtomicU64::new(0),
            count_tx,
            current_map: Mutex::new(None),
            sink,
        }
    }

    /// Begin a fresh run: running, counter reset to 0, stop reason cleared.
    pub fn start(&self) {
        *lock(&self.stop_reason) = None;
        *lock(&self.current_map) = None;
        self.resource_count.store(0, Ordering::SeqCst);
        self.count_tx.send_replace(0);
        self.running.store(true, Ordering::SeqCst);
    }

    /// Ask the worker to halt at its next checkpoint.
    ///
    /// Returns `true` if this call performed the transition. Repeated calls
    /// are no-ops and emit nothing.
    pub fn request_stop(&self, reason: Option<&str>) -> bool {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        match reason {
            Some(reason) => {
                *lock(&self.stop_reason) = Some(reason.to_string());
                tracing::warn!("stop requested: {reason}");
                self.sink.emit(Level::Error, reason);
            }
            None => {
                tracing::info!(success = true, "Stopped collecting water.");
                self.sink.emit(Level::Success, "Stopped collecting water.");
            }
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop_reason(&self) -> Option<String> {
        lock(&self.stop_reason).clone()
    }

    /// Record a detected harvest target; returns the new count.
    pub fn increment_resource(&self) -> u64 {
        let count = self.resource_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.count_tx.send_replace(count);
        count
    }

    pub fn resource_count(&self) -> u64 {
        self.resource_count.load(Ordering::SeqCst)
    }

    /// Observe counter changes (reset to 0 on `start`, +1 per detection).
    pub fn subscribe_count(&self) -> watch::Receiver<u64> {
        self.count_tx.subscribe()
    }

    pub fn set_current_map(&self, map: &str) {
        *lock(&self.current_map) = Some(map.to_string());
    }

    pub fn current_map(&self) -> Option<String> {
        lock(&self.current_map).clone()
    }

    /// Log a core message; forward it to the operator sink only while running.
    pub fn report(&self, level: Level, message: &str) {
        match level {
            Level::Info => tracing::info!("{message}"),
            Level::Success => tracing::info!(success = true, "{message}"),
            Level::Warning => tracing::warn!("{message}"),
            Level::Error => tracing::error!("{message}"),
            Level::Debug => tracing::debug!("{message}"),
        }

        if self.is_running() {
            self.sink.emit(level, message);
        }
    }
}

// Poisoning only happens if a holder panicked mid-assignment of a plain value.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    Stopped,
    Failed,
}

/// Screen, input and static configuration shared by every run.
#[derive(Clone)]
pub struct Rig {
    pub screen: Arc<dyn Screen>,
    pub input: Arc<dyn InputDevice>,
    pub routes: Arc<RouteGraph>,
    pub templates: Arc<TemplateSet>,
}

pub struct AppStateInner {
    pub phase: RunPhase,
    pub config: Config,
    pub run_handle: Option<JoinHandle<()>>,
    pub auto_stop_handle: Option<JoinHandle<()>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

pub type AppState = Arc<tokio::sync::Mutex<AppStateInner>>;

impl AppStateInner {
    pub fn new(config: Config) -> Self {
        Self {
            phase: RunPhase::Idle,
            config,
            run_handle: None,
            auto_stop_handle: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// A previous run's worker is still winding down.
    pub fn worker_active(&self) -> bool {
        self.run_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn disarm_auto_stop(&mut self) {
        if let Some(handle) = self.auto_stop_handle.take() {
            handle.abort();
        }
    }

    /// Seconds the current (or last) run has been going.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or(now);
        Some((end - started).num_seconds().max(0))
    }
}

/// Everything the control surface needs.
#[derive(Clone)]
pub struct Shared {
    pub app: AppState,
    pub control: Arc<RunControl>,
    pub operator: Arc<OperatorStatus>,
    pub rig: Rig,
}
