use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use serde::Deserialize;

use crate::config::Timing;
use crate::state::RunControl;
use crate::status::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKey {
    Space,
    Enter,
    Escape,
    Tab,
}

/// A key a route can press. Movement keys are held; everything else is tapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Key {
    Move(Direction),
    Named(NamedKey),
    Char(char),
}

impl Key {
    pub fn is_movement(&self) -> bool {
        matches!(self, Key::Move(_))
    }
}

impl FromStr for Key {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let key = match lower.as_str() {
            "up" | "north" => Key::Move(Direction::Up),
            "down" | "south" => Key::Move(Direction::Down),
            "left" | "west" => Key::Move(Direction::Left),
            "right" | "east" => Key::Move(Direction::Right),
            "space" => Key::Named(NamedKey::Space),
            "enter" | "return" => Key::Named(NamedKey::Enter),
            "escape" | "esc" => Key::Named(NamedKey::Escape),
            "tab" => Key::Named(NamedKey::Tab),
            _ => {
                let mut chars = lower.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if !c.is_whitespace() => Key::Char(c),
                    _ => return Err(format!("unknown key identifier: {s:?}")),
                }
            }
        };
        Ok(key)
    }
}

impl TryFrom<String> for Key {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Move(Direction::Up) => f.write_str("up"),
            Key::Move(Direction::Down) => f.write_str("down"),
            Key::Move(Direction::Left) => f.write_str("left"),
            Key::Move(Direction::Right) => f.write_str("right"),
            Key::Named(NamedKey::Space) => f.write_str("space"),
            Key::Named(NamedKey::Enter) => f.write_str("enter"),
            Key::Named(NamedKey::Escape) => f.write_str("escape"),
            Key::Named(NamedKey::Tab) => f.write_str("tab"),
            Key::Char(c) => write!(f, "{c}"),
        }
    }
}

/// Raw keyboard and pointer primitives. Blocking; errors are device failures.
pub trait InputDevice: Send + Sync {
    /// Press `key`, keep it down for `hold`, release it.
    fn hold(&self, key: Key, hold: Duration) -> Result<()>;

    /// Press and release `key` at once.
    fn tap(&self, key: Key) -> Result<()>;

    /// Move the pointer to absolute `(x, y)` over roughly `duration`, then left-click.
    fn click(&self, x: i32, y: i32, duration: Duration) -> Result<()>;
}

/// Random delay in `[min, max]`.
pub fn jitter(min: Duration, max: Duration) -> Duration {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    if lo == hi {
        return lo;
    }
    let secs = rand::thread_rng().gen_range(lo.as_secs_f64()..=hi.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Input actuator: run-control-aware key presses and clicks with jittered pacing.
#[derive(Clone)]
pub struct Actuator {
    device: Arc<dyn InputDevice>,
    control: Arc<RunControl>,
    timing: Timing,
}

impl Actuator {
    pub fn new(device: Arc<dyn InputDevice>, control: Arc<RunControl>, timing: Timing) -> Self {
        Self {
            device,
            control,
            timing,
        }
    }

    /// Press a key; no-op once the run has been asked to stop.
    pub async fn press_key(&self, key: Key) -> Result<()> {
        if !self.control.is_running() {
            return Ok(());
        }

        let device = self.device.clone();
        if key.is_movement() {
            self.control
                .report(Level::Debug, &format!("Holding movement key: {key}"));
            let hold = self.timing.key_hold;
            tokio::task::spawn_blocking(move || device.hold(key, hold))
                .await
                .context("input task panicked")?
                .with_context(|| format!("failed to hold key {key}"))?;
        } else {
            self.control
                .report(Level::Debug, &format!("Tapping action key: {key}"));
            tokio::task::spawn_blocking(move || device.tap(key))
                .await
                .context("input task panicked")?
                .with_context(|| format!("failed to tap key {key}"))?;
        }

        self.pause().await;
        Ok(())
    }

    /// Move to `(x, y)` and click; no-op once the run has been asked to stop.
    pub async fn click_at(&self, x: i32, y: i32) -> Result<()> {
        if !self.control.is_running() {
            return Ok(());
        }

        let device = self.device.clone();
        let duration = self.timing.pointer_move;
        tokio::task::spawn_blocking(move || device.click(x, y, duration))
            .await
            .context("input task panicked")?
            .with_context(|| format!("failed to click at ({x}, {y})"))?;

        self.pause().await;
        self.control
            .report(Level::Debug, &format!("Clicked at: ({x}, {y})"));
        Ok(())
    }

    async fn pause(&self) {
        let delay = jitter(self.timing.action_delay_min, self.timing.action_delay_max);
        tokio::time::sleep(delay).await;
    }
}
