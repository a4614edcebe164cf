pub mod api;
pub mod config;
pub mod cycle;
#[cfg(feature = "desktop")]
pub mod desktop;
pub mod detector;
#[cfg(feature = "desktop")]
pub mod hotkey;
pub mod input;
pub mod navigator;
pub mod routes;
pub mod scanner;
pub mod screen;
pub mod state;
pub mod status;
pub mod transition;
