use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnv(String),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: String, value: String },
}

/// Delays and limits governing the automation loop.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Interval between brightness samples while waiting for a transition.
    pub poll_interval: Duration,
    /// Budget for each transition phase (blackout, then recovery).
    pub map_load_timeout: Duration,
    /// Movement keys are held this long, then released.
    pub key_hold: Duration,
    /// Randomized pause after each key press or click.
    pub action_delay_min: Duration,
    pub action_delay_max: Duration,
    /// Duration of the animated pointer move before a click.
    pub pointer_move: Duration,
    /// Randomized wait for the harvest animation.
    pub harvest_min: Duration,
    pub harvest_max: Duration,
    /// Pause after a confirmed map change before the next key.
    pub post_transition: Duration,
    /// Pause after a completed route before the next cycle.
    pub post_cycle: Duration,
    /// Pause after a scan finds nothing.
    pub scan_miss: Duration,
    /// Delay before the first cycle of a run.
    pub startup_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            map_load_timeout: Duration::from_secs(15),
            key_hold: Duration::from_millis(200),
            action_delay_min: Duration::from_millis(500),
            action_delay_max: Duration::from_millis(700),
            pointer_move: Duration::from_millis(100),
            harvest_min: Duration::from_millis(4500),
            harvest_max: Duration::from_millis(5000),
            post_transition: Duration::from_secs(1),
            post_cycle: Duration::from_secs(1),
            scan_miss: Duration::from_millis(750),
            startup_delay: Duration::from_secs(5),
        }
    }
}

/// Fractional screen rectangle; `0.0..=1.0` on both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FracRegion {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl FracRegion {
    pub const fn centered(fraction: f64) -> Self {
        let margin = (1.0 - fraction) / 2.0;
        Self {
            left: margin,
            top: margin,
            right: 1.0 - margin,
            bottom: 1.0 - margin,
        }
    }

    /// Resolve to pixel bounds `(x, y, width, height)` inside a `w`×`h` frame.
    /// Never returns an empty rectangle for a non-empty frame.
    pub fn to_pixels(&self, w: u32, h: u32) -> (u32, u32, u32, u32) {
        let x0 = ((self.left * w as f64).round() as u32).min(w.saturating_sub(1));
        let y0 = ((self.top * h as f64).round() as u32).min(h.saturating_sub(1));
        let x1 = ((self.right * w as f64).round() as u32).clamp(x0 + 1, w.max(1));
        let y1 = ((self.bottom * h as f64).round() as u32).clamp(y0 + 1, h.max(1));
        (x0, y0, x1 - x0, y1 - y0)
    }
}

/// Parameters of the blackout/recovery transition watch.
#[derive(Debug, Clone)]
pub struct TransitionSettings {
    /// Mean brightness (0-255) below which the screen counts as black.
    pub black_threshold: f64,
    pub blackout_region: FracRegion,
    pub recovery_region: FracRegion,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self {
            black_threshold: 25.0,
            blackout_region: FracRegion::centered(0.2),
            recovery_region: FracRegion::centered(0.1),
        }
    }
}

/// Parameters of the harvest-target template search.
#[derive(Debug, Clone)]
pub struct MatchSettings {
    pub confidence: f32,
    /// Frame and templates are shrunk by this factor before matching.
    pub scale_down: u32,
    /// Vertical offset applied to the match center before clicking.
    pub click_offset_y: i32,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            confidence: 0.80,
            scale_down: 1,
            click_offset_y: -20,
        }
    }
}

pub const TEMPLATE_NAMES: &[&str] = &[
    "w_elem_01.png",
    "w_elem_02.png",
    "w_elem_03.png",
    "w_elem_04.png",
    "w_elem_05.png",
    "w_elem_06.png",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub auth_token: String,
    pub listen_addr: String,
    /// JSON route table; the embedded default is used when unset.
    pub routes_file: Option<PathBuf>,
    pub assets_dir: Option<PathBuf>,
    /// Overrides the route table's starting map.
    pub starting_map: Option<String>,
    pub template_names: Vec<String>,
    /// Listen for the global F8 stop key.
    pub stop_hotkey: bool,
    pub timing: Timing,
    pub transition: TransitionSettings,
    pub matching: MatchSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let auth_token = get("TIDEPOOL_AUTH_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnv("TIDEPOOL_AUTH_TOKEN".into()))?;

        let listen_addr = get("TIDEPOOL_LISTEN_ADDR").unwrap_or_else(|| "127.0.0.1:8091".into());
        let routes_file = get("TIDEPOOL_ROUTES_FILE").map(PathBuf::from);
        let assets_dir = get("TIDEPOOL_ASSETS_DIR").map(PathBuf::from);
        let starting_map = get("TIDEPOOL_STARTING_MAP").filter(|s| !s.trim().is_empty());

        let stop_hotkey = match get("TIDEPOOL_STOP_HOTKEY") {
            Some(v) => parse_bool("TIDEPOOL_STOP_HOTKEY", &v)?,
            None => true,
        };

        let mut timing = Timing::default();
        if let Some(secs) = parse_opt::<f64>(&get, "TIDEPOOL_MAP_LOAD_TIMEOUT_SECS")? {
            timing.map_load_timeout = positive_secs("TIDEPOOL_MAP_LOAD_TIMEOUT_SECS", secs)?;
        }
        if let Some(secs) = parse_opt::<f64>(&get, "TIDEPOOL_STARTUP_DELAY_SECS")? {
            timing.startup_delay = non_negative_secs("TIDEPOOL_STARTUP_DELAY_SECS", secs)?;
        }

        let mut transition = TransitionSettings::default();
        if let Some(t) = parse_opt::<f64>(&get, "TIDEPOOL_BLACK_THRESHOLD")? {
            if !(0.0..=255.0).contains(&t) {
                return Err(invalid("TIDEPOOL_BLACK_THRESHOLD", &t.to_string()));
            }
            transition.black_threshold = t;
        }

        let mut matching = MatchSettings::default();
        if let Some(c) = parse_opt::<f32>(&get, "TIDEPOOL_MATCH_CONFIDENCE")? {
            if !(c > 0.0 && c <= 1.0) {
                return Err(invalid("TIDEPOOL_MATCH_CONFIDENCE", &c.to_string()));
            }
            matching.confidence = c;
        }

        Ok(Config {
            auth_token,
            listen_addr,
            routes_file,
            assets_dir,
            starting_map,
            template_names: TEMPLATE_NAMES.iter().map(|s| s.to_string()).collect(),
            stop_hotkey,
            timing,
            transition,
            matching,
        })
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        name: name.into(),
        value: value.into(),
    }
}

fn parse_opt<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(name, &raw)),
        None => Ok(None),
    }
}

fn parse_bool(name: &str, v: &str) -> Result<bool, ConfigError> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, v)),
    }
}

fn positive_secs(name: &str, secs: f64) -> Result<Duration, ConfigError> {
    if secs.is_finite() && secs > 0.0 {
        Ok(Duration::from_secs_f64(secs))
    } else {
        Err(invalid(name, &secs.to_string()))
    }
}

fn non_negative_secs(name: &str, secs: f64) -> Result<Duration, ConfigError> {
    if secs.is_finite() && secs >= 0.0 {
        Ok(Duration::from_secs_f64(secs))
    } else {
        Err(invalid(name, &secs.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;

    pub(crate) fn test_config() -> Config {
        Config::from_lookup(|name| (name == "TIDEPOOL_AUTH_TOKEN").then(|| "secret".into()))
            .unwrap()
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = test_config();
        assert_eq!(config.listen_addr, "127.0.0.1:8091");
        assert!(config.stop_hotkey);
        assert_eq!(config.timing.map_load_timeout, Duration::from_secs(15));
        assert_eq!(config.transition.black_threshold, 25.0);
        assert_eq!(config.matching.confidence, 0.80);
        assert_eq!(config.template_names.len(), 6);
        assert_eq!(config.template_names[0], "w_elem_01.png");
    }

    #[test]
    fn test_missing_token() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(ref v) if v == "TIDEPOOL_AUTH_TOKEN"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("TIDEPOOL_AUTH_TOKEN", "t"),
            ("TIDEPOOL_MAP_LOAD_TIMEOUT_SECS", "7.5"),
            ("TIDEPOOL_BLACK_THRESHOLD", "30"),
            ("TIDEPOOL_MATCH_CONFIDENCE", "0.9"),
            ("TIDEPOOL_STOP_HOTKEY", "off"),
            ("TIDEPOOL_STARTING_MAP", "MAP_05"),
        ]))
        .unwrap();

        assert_eq!(config.timing.map_load_timeout, Duration::from_millis(7500));
        assert_eq!(config.transition.black_threshold, 30.0);
        assert_eq!(config.matching.confidence, 0.9);
        assert!(!config.stop_hotkey);
        assert_eq!(config.starting_map.as_deref(), Some("MAP_05"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        for (name, value) in [
            ("TIDEPOOL_MAP_LOAD_TIMEOUT_SECS", "0"),
            ("TIDEPOOL_MAP_LOAD_TIMEOUT_SECS", "abc"),
            ("TIDEPOOL_BLACK_THRESHOLD", "300"),
            ("TIDEPOOL_MATCH_CONFIDENCE", "1.5"),
            ("TIDEPOOL_STOP_HOTKEY", "maybe"),
        ] {
            let result = Config::from_lookup(lookup(&[("TIDEPOOL_AUTH_TOKEN", "t"), (name, value)]));
            assert!(
                matches!(result, Err(ConfigError::Invalid { .. })),
                "{name}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_centered_region_to_pixels() {
        let region = FracRegion::centered(0.2);
        assert_eq!(region.to_pixels(1000, 500), (400, 200, 200, 100));
    }

    #[test]
    fn test_region_never_empty() {
        let region = FracRegion {
            left: 0.5,
            top: 0.5,
            right: 0.5,
            bottom: 0.5,
        };
        let (_, _, w, h) = region.to_pixels(10, 10);
        assert_eq!((w, h), (1, 1));
    }
}
