//! Global F8 stop key.

use std::sync::Arc;

use rdev::{EventType, Key, listen};

use crate::state::RunControl;

/// Listen for F8 anywhere on the desktop and request a stop.
///
/// The listener owns a dedicated thread for the life of the process. If the
/// platform refuses the hook (no display, missing permissions) the error is
/// logged and the service keeps running without it.
pub fn spawn_stop_listener(control: Arc<RunControl>) {
    let spawned = std::thread::Builder::new()
        .name("stop-hotkey".into())
        .spawn(move || {
            tracing::info!("press F8 to stop a running collection");
            let result = listen(move |event| {
                if let EventType::KeyPress(Key::F8) = event.event_type
                    && control.request_stop(None)
                {
                    tracing::info!("stop requested via F8");
                }
            });
            if let Err(e) = result {
                tracing::warn!("stop hotkey unavailable: {e:?}");
            }
        });

    if let Err(e) = spawned {
        tracing::warn!("failed to start stop hotkey thread: {e}");
    }
}
