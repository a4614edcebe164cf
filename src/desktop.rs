//! Real screen and input backends.
//!
//! `xcap` captures the primary monitor, `enigo` injects keyboard and mouse
//! events. Both are created per call on the blocking thread that uses them,
//! so neither needs to be shared across threads.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use enigo::{Button, Coordinate, Direction as Press, Enigo, Keyboard, Mouse, Settings};
use image::RgbaImage;
use xcap::Monitor;

use crate::input::{Direction, InputDevice, Key, NamedKey};
use crate::screen::Screen;

/// Primary monitor via `xcap`.
pub struct XcapScreen;

impl Screen for XcapScreen {
    fn capture(&self) -> Result<RgbaImage> {
        let monitors = Monitor::all().context("failed to enumerate monitors")?;
        let monitor = monitors
            .iter()
            .find(|m| m.is_primary())
            .or_else(|| monitors.first())
            .context("no monitor available")?;

        let image = monitor.capture_image().context("failed to capture monitor")?;
        tracing::trace!("captured {}x{} frame", image.width(), image.height());
        Ok(image)
    }
}

/// Keyboard and mouse via `enigo`.
pub struct EnigoInput;

/// Steps used to animate a pointer move.
const POINTER_STEPS: u32 = 10;

impl EnigoInput {
    fn connect() -> Result<Enigo> {
        Enigo::new(&Settings::default())
            .map_err(|e| anyhow::anyhow!("failed to initialize input controller: {e:?}"))
    }
}

fn enigo_key(key: Key) -> enigo::Key {
    match key {
        Key::Move(Direction::Up) => enigo::Key::UpArrow,
        Key::Move(Direction::Down) => enigo::Key::DownArrow,
        Key::Move(Direction::Left) => enigo::Key::LeftArrow,
        Key::Move(Direction::Right) => enigo::Key::RightArrow,
        Key::Named(NamedKey::Space) => enigo::Key::Space,
        Key::Named(NamedKey::Enter) => enigo::Key::Return,
        Key::Named(NamedKey::Escape) => enigo::Key::Escape,
        Key::Named(NamedKey::Tab) => enigo::Key::Tab,
        Key::Char(c) => enigo::Key::Unicode(c),
    }
}

impl InputDevice for EnigoInput {
    fn hold(&self, key: Key, hold: Duration) -> Result<()> {
        let mut enigo = Self::connect()?;
        let k = enigo_key(key);
        enigo
            .key(k, Press::Press)
            .map_err(|e| anyhow::anyhow!("failed to press {key}: {e:?}"))?;
        thread::sleep(hold);
        enigo
            .key(k, Press::Release)
            .map_err(|e| anyhow::anyhow!("failed to release {key}: {e:?}"))
    }

    fn tap(&self, key: Key) -> Result<()> {
        Self::connect()?
            .key(enigo_key(key), Press::Click)
            .map_err(|e| anyhow::anyhow!("failed to tap {key}: {e:?}"))
    }

    fn click(&self, x: i32, y: i32, duration: Duration) -> Result<()> {
        let mut enigo = Self::connect()?;

        let (sx, sy) = enigo
            .location()
            .map_err(|e| anyhow::anyhow!("failed to read pointer location: {e:?}"))?;
        let pause = duration / POINTER_STEPS;
        for i in 1..=POINTER_STEPS {
            let t = i as f64 / POINTER_STEPS as f64;
            let px = sx + ((x - sx) as f64 * t).round() as i32;
            let py = sy + ((y - sy) as f64 * t).round() as i32;
            enigo
                .move_mouse(px, py, Coordinate::Abs)
                .map_err(|e| anyhow::anyhow!("failed to move mouse to ({px}, {py}): {e:?}"))?;
            thread::sleep(pause);
        }

        enigo
            .button(Button::Left, Press::Click)
            .map_err(|e| anyhow::anyhow!("failed to click at ({x}, {y}): {e:?}"))
    }
}
