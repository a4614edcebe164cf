use std::sync::Arc;

use anyhow::Result;
use tokio::time::sleep;

use crate::config::Timing;
use crate::input::Actuator;
use crate::routes::RouteGraph;
use crate::state::RunControl;
use crate::status::Level;
use crate::transition::{TransitionDetector, TransitionResult};

/// Walks a route key by key, confirming a map transition after each press.
pub struct Navigator {
    routes: Arc<RouteGraph>,
    actuator: Actuator,
    detector: TransitionDetector,
    control: Arc<RunControl>,
    timing: Timing,
}

impl Navigator {
    pub fn new(
        routes: Arc<RouteGraph>,
        actuator: Actuator,
        detector: TransitionDetector,
        control: Arc<RunControl>,
        timing: Timing,
    ) -> Self {
        Self {
            routes,
            actuator,
            detector,
            control,
            timing,
        }
    }

    /// Run the named route. `Ok(true)` only if every step's transition succeeded.
    ///
    /// Unknown routes, stop requests and transition timeouts all yield
    /// `Ok(false)` without retrying; details go to the log. `Err` is reserved
    /// for input or screen failures.
    pub async fn run_route(&self, name: &str) -> Result<bool> {
        let Some(keys) = self.routes.route(name) else {
            self.control
                .report(Level::Error, &format!("Error: Travel route '{name}' not found!"));
            return Ok(false);
        };

        self.control.report(Level::Info, "Executing travel route...");

        for (step, &key) in keys.iter().enumerate() {
            if !self.control.is_running() {
                tracing::info!("route {name} stopped before step {}/{}", step + 1, keys.len());
                return Ok(false);
            }

            self.actuator.press_key(key).await?;

            match self.detector.await_transition().await? {
                TransitionResult::Success => {
                    self.control.report(
                        Level::Info,
                        &format!(
                            "Map change successful. Pausing ({:.1}s)...",
                            self.timing.post_transition.as_secs_f64()
                        ),
                    );
                    sleep(self.timing.post_transition).await;
                }
                status => {
                    self.control.report(
                        Level::Error,
                        &format!(
                            "Navigation failed during transition at step {}/{} of {name}. Status: {status:?}",
                            step + 1,
                            keys.len()
                        ),
                    );
                    return Ok(false);
                }
            }
        }

        self.control
            .report(Level::Success, "Route completed successfully!");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransitionSettings;
    use crate::input::tests::{RecordingInput, fast_timing};
    use crate::input::{Direction, Key};
    use crate::routes::{RouteTable, tests::three_map_graph};
    use crate::screen::Screen;
    use crate::screen::tests::{BlinkingScreen, ScriptedScreen};
    use crate::status::tests::RecordingSink;

    fn navigator(
        routes: RouteGraph,
        screen: Arc<dyn Screen>,
        input: Arc<RecordingInput>,
        control: Arc<RunControl>,
    ) -> Navigator {
        let timing = fast_timing();
        Navigator::new(
            Arc::new(routes),
            Actuator::new(input, control.clone(), timing.clone()),
            TransitionDetector::new(screen, control.clone(), TransitionSettings::default(), timing.clone()),
            control,
            timing,
        )
    }

    fn running_control() -> Arc<RunControl> {
        let control = Arc::new(RunControl::new(Arc::new(RecordingSink::default())));
        control.start();
        control
    }

    fn four_step_graph() -> RouteGraph {
        let table = RouteTable::from_json(
            r#"{"starting_map": "A", "map_order": ["A", "B"],
                "routes": {"A_TO_B": ["up", "up", "left", "down"], "B_TO_A": ["up"]}}"#,
        )
        .unwrap();
        RouteGraph::from_table(table).unwrap()
    }

    #[tokio::test]
    async fn test_route_succeeds_when_every_transition_does() {
        let input = Arc::new(RecordingInput::default());
        let nav = navigator(three_map_graph(), Arc::new(BlinkingScreen::new()), input.clone(), running_control());

        assert!(nav.run_route("A_TO_B").await.unwrap());
        assert_eq!(input.presses(), 2);
    }

    #[tokio::test]
    async fn test_timeout_aborts_rest_of_route() {
        // First transition: black then bright. After that the screen stays bright.
        let screen = Arc::new(ScriptedScreen::new(&[0.0, 200.0, 200.0]));
        let input = Arc::new(RecordingInput::default());
        let nav = navigator(four_step_graph(), screen, input.clone(), running_control());

        assert!(!nav.run_route("A_TO_B").await.unwrap());
        // Step 2 timed out: exactly two presses, not four
        assert_eq!(input.presses(), 2);
        assert_eq!(
            input.actions()[1],
            crate::input::tests::Action::Hold(Key::Move(Direction::Up))
        );
    }

    #[tokio::test]
    async fn test_unknown_route_presses_nothing() {
        let input = Arc::new(RecordingInput::default());
        let nav = navigator(three_map_graph(), Arc::new(BlinkingScreen::new()), input.clone(), running_control());

        assert!(!nav.run_route("A_TO_C").await.unwrap());
        assert_eq!(input.presses(), 0);
    }

    #[tokio::test]
    async fn test_stop_mid_route_fails_without_further_presses() {
        let control = running_control();
        let input = Arc::new(RecordingInput {
            stop_after: Some((1, control.clone())),
            ..Default::default()
        });
        let nav = navigator(four_step_graph(), Arc::new(BlinkingScreen::new()), input.clone(), control);

        assert!(!nav.run_route("A_TO_B").await.unwrap());
        assert_eq!(input.presses(), 1);
    }

    #[tokio::test]
    async fn test_not_running_presses_nothing() {
        let control = running_control();
        control.request_stop(None);
        let input = Arc::new(RecordingInput::default());
        let nav = navigator(three_map_graph(), Arc::new(BlinkingScreen::new()), input.clone(), control);

        assert!(!nav.run_route("C_TO_A").await.unwrap());
        assert_eq!(input.presses(), 0);
    }

    #[tokio::test]
    async fn test_input_failure_is_an_error() {
        let input = Arc::new(RecordingInput {
            fail: true,
            ..Default::default()
        });
        let nav = navigator(three_map_graph(), Arc::new(BlinkingScreen::new()), input, running_control());

        assert!(nav.run_route("A_TO_B").await.is_err());
    }
}
