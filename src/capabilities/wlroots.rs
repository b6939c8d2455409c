//! Pointer tests driven through the wlroots virtual pointer protocol
//!
//! The test opens a fullscreen window, creates a virtual pointer on the
//! window's seat, and checks that the synthetic input reaches the window
//! as ordinary `wl_pointer` events.

use std::time::Duration;

use async_trait::async_trait;

use super::ensure_even_motion;
use crate::common::{Error, Result};
use crate::ensure;
use crate::fixtures::{FixtureScope, WindowFactory, WAYLAND_CLIENT, WINDOW_FACTORY};
use crate::testing::{CapabilityTest, TestInfo};
use crate::wire::{Fixed, ObjectId, WireArg, WireClient, WireEvent};

const VIRTUAL_POINTER_MANAGER: &str = "zwlr_virtual_pointer_manager_v1";

/// Both axes span 100 units regardless of the output size
const EXTENT: u32 = 100;

/// Time given to the compositor to deliver the resulting events
const SETTLE: Duration = Duration::from_millis(100);

const BTN_LEFT: u32 = 0x110;
const BTN_RIGHT: u32 = 0x111;
const BTN_MIDDLE: u32 = 0x112;

const FIXTURES: &[&str] = &[WAYLAND_CLIENT, WINDOW_FACTORY];

async fn create_virtual_pointer(
    client: &mut WireClient,
    windows: &WindowFactory,
) -> Result<ObjectId> {
    let seat = windows
        .seat()
        .ok_or_else(|| Error::Internal("no seat bound before opening a window".into()))?;
    let manager = client.bind(VIRTUAL_POINTER_MANAGER, 1).await?;
    client
        .call_new(
            manager,
            "create_virtual_pointer",
            vec![WireArg::Object(Some(seat)), WireArg::New],
        )
        .await
}

async fn move_to(client: &mut WireClient, pointer: ObjectId, x: u32, y: u32) -> Result<()> {
    client
        .call(
            pointer,
            "motion_absolute",
            vec![
                WireArg::Uint(1),
                WireArg::Uint(x),
                WireArg::Uint(y),
                WireArg::Uint(EXTENT),
                WireArg::Uint(EXTENT),
            ],
        )
        .await?;
    client.call(pointer, "frame", vec![]).await?;
    Ok(())
}

fn button_name(button: u32) -> String {
    match button {
        BTN_LEFT => "left".to_string(),
        BTN_RIGHT => "right".to_string(),
        BTN_MIDDLE => "middle".to_string(),
        other => other.to_string(),
    }
}

fn button_label(event: &WireEvent) -> String {
    let button = event.arg("button").and_then(|v| v.as_uint()).unwrap_or(0);
    let state = match event.arg("state").and_then(|v| v.as_uint()) {
        Some(1) => "pressed",
        Some(0) => "released",
        _ => "unknown",
    };
    format!("{}.{}", button_name(button), state)
}

static MOVE_INFO: TestInfo = TestInfo {
    id: "wlroots.mouse_move_absolute",
    fixtures: FIXTURES,
};

/// Absolute pointer motion arrives as evenly spaced motion events
pub struct MouseMoveAbsolute;

#[async_trait]
impl CapabilityTest for MouseMoveAbsolute {
    fn info(&self) -> &TestInfo {
        &MOVE_INFO
    }

    async fn run(&self, fixtures: &mut FixtureScope) -> Result<()> {
        let (client, windows) = fixtures.windows()?;
        let window = windows.open(client).await?;
        let pointer = create_virtual_pointer(client, windows).await?;

        for pos in (10..50).step_by(10) {
            move_to(client, pointer, pos, pos).await?;
            windows.record(client, SETTLE).await?;
        }
        client.call(pointer, "destroy", vec![]).await?;
        windows.close(client, window).await?;

        ensure_even_motion(&windows.window(window)?.events_of("wl_pointer.motion"))
    }
}

static CLICK_INFO: TestInfo = TestInfo {
    id: "wlroots.mouse_click",
    fixtures: FIXTURES,
};

/// Left, right and middle clicks arrive as press/release pairs
pub struct MouseClick;

#[async_trait]
impl CapabilityTest for MouseClick {
    fn info(&self) -> &TestInfo {
        &CLICK_INFO
    }

    async fn run(&self, fixtures: &mut FixtureScope) -> Result<()> {
        let (client, windows) = fixtures.windows()?;
        let window = windows.open(client).await?;
        let pointer = create_virtual_pointer(client, windows).await?;

        move_to(client, pointer, 50, 50).await?;
        for button in [BTN_LEFT, BTN_RIGHT, BTN_MIDDLE] {
            for state in [1, 0] {
                client
                    .call(
                        pointer,
                        "button",
                        vec![WireArg::Uint(1), WireArg::Uint(button), WireArg::Uint(state)],
                    )
                    .await?;
                client.call(pointer, "frame", vec![]).await?;
            }
        }
        client.call(pointer, "destroy", vec![]).await?;
        windows.record(client, SETTLE).await?;
        windows.close(client, window).await?;

        let seen: Vec<String> = windows
            .window(window)?
            .events_of("wl_pointer.button")
            .into_iter()
            .map(button_label)
            .collect();
        let expected: Vec<String> = ["left", "right", "middle"]
            .iter()
            .flat_map(|b| [format!("{}.pressed", b), format!("{}.released", b)])
            .collect();
        ensure!(seen == expected, "button events {:?}, expected {:?}", seen, expected);
        Ok(())
    }
}

static SCROLL_INFO: TestInfo = TestInfo {
    id: "wlroots.mouse_scroll",
    fixtures: FIXTURES,
};

/// A vertical scroll arrives as at least one axis event
pub struct MouseScroll;

#[async_trait]
impl CapabilityTest for MouseScroll {
    fn info(&self) -> &TestInfo {
        &SCROLL_INFO
    }

    async fn run(&self, fixtures: &mut FixtureScope) -> Result<()> {
        let (client, windows) = fixtures.windows()?;
        let window = windows.open(client).await?;
        let pointer = create_virtual_pointer(client, windows).await?;

        move_to(client, pointer, 50, 50).await?;
        // Vertical axis
        client
            .call(
                pointer,
                "axis",
                vec![
                    WireArg::Uint(1),
                    WireArg::Uint(0),
                    WireArg::Fixed(Fixed::from_f64(15.0)),
                ],
            )
            .await?;
        client.call(pointer, "frame", vec![]).await?;
        client.call(pointer, "destroy", vec![]).await?;
        windows.record(client, SETTLE).await?;
        windows.close(client, window).await?;

        let axis = windows.window(window)?.events_of("wl_pointer.axis");
        ensure!(!axis.is_empty(), "no wl_pointer.axis events received");
        Ok(())
    }
}
