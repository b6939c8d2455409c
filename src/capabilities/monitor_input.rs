//! Keyboard input injected from outside the guest

use std::time::Duration;

use async_trait::async_trait;

use crate::common::Result;
use crate::ensure;
use crate::fixtures::{FixtureScope, RUNNER_COMMANDS, WAYLAND_CLIENT, WINDOW_FACTORY};
use crate::testing::{CapabilityTest, TestInfo};

const TYPED: &str = "abc";
/// evdev codes of `TYPED`
const EXPECTED_KEYS: [u32; 3] = [30, 48, 46];

const KEY_STATE_PRESSED: u32 = 1;

static INFO: TestInfo = TestInfo {
    id: "monitor.keyboard_typing",
    fixtures: &[WAYLAND_CLIENT, WINDOW_FACTORY, RUNNER_COMMANDS],
};

/// Keys sent through the VM monitor reach the focused window
pub struct KeyboardTyping;

#[async_trait]
impl CapabilityTest for KeyboardTyping {
    fn info(&self) -> &TestInfo {
        &INFO
    }

    async fn run(&self, fixtures: &mut FixtureScope) -> Result<()> {
        let monitor = fixtures.monitor()?;
        let (client, windows) = fixtures.windows()?;
        let window = windows.open(client).await?;
        windows.record(client, Duration::from_millis(200)).await?;

        monitor.send_keys(TYPED).await?;
        windows.record(client, Duration::from_millis(500)).await?;

        let pressed: Vec<u32> = windows
            .window(window)?
            .events_of("wl_keyboard.key")
            .into_iter()
            .filter(|e| e.arg("state").and_then(|v| v.as_uint()) == Some(KEY_STATE_PRESSED))
            .filter_map(|e| e.arg("key").and_then(|v| v.as_uint()))
            .collect();
        ensure!(
            pressed == EXPECTED_KEYS,
            "typed {:?}, window saw key presses {:?}",
            TYPED,
            pressed
        );
        Ok(())
    }
}
