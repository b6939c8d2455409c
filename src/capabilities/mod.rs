//! Built-in capability tests
//!
//! Each test is a unit struct implementing [`CapabilityTest`]; [`all`]
//! returns every implementation compiled into the binary, which the test
//! registry matches against the definitions file by id.

pub mod desktop_portal;
pub mod monitor_input;
pub mod wlroots;

use std::sync::Arc;

use crate::common::{Error, Result};
use crate::testing::CapabilityTest;
use crate::wire::WireEvent;

/// Fail the test with an assertion error unless `cond` holds
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($fmt:tt)+) => {
        if !$cond {
            return Err($crate::common::Error::TestAssertion(format!($($fmt)+)));
        }
    };
}

fn surface_position(event: &WireEvent) -> Result<(f64, f64)> {
    let x = event.arg("surface_x").and_then(|v| v.as_f64());
    let y = event.arg("surface_y").and_then(|v| v.as_f64());
    match (x, y) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(Error::protocol(format!(
            "{} without surface coordinates",
            event.qualified_name()
        ))),
    }
}

/// The first three motion events must be evenly spaced on both axes
pub(crate) fn ensure_even_motion(motions: &[&WireEvent]) -> Result<()> {
    ensure!(
        motions.len() >= 3,
        "expected at least 3 motion events, got {}",
        motions.len()
    );

    let points = motions[..3]
        .iter()
        .map(|e| surface_position(e))
        .collect::<Result<Vec<_>>>()?;
    let (dx1, dy1) = (points[1].0 - points[0].0, points[1].1 - points[0].1);
    let (dx2, dy2) = (points[2].0 - points[1].0, points[2].1 - points[1].1);
    ensure!(dx1 == dx2, "uneven x steps: {} then {}", dx1, dx2);
    ensure!(dy1 == dy2, "uneven y steps: {} then {}", dy1, dy2);
    Ok(())
}

/// Every test implementation in the binary
pub fn all() -> Vec<Arc<dyn CapabilityTest>> {
    vec![
        Arc::new(wlroots::MouseMoveAbsolute),
        Arc::new(wlroots::MouseClick),
        Arc::new(wlroots::MouseScroll),
        Arc::new(monitor_input::KeyboardTyping),
        Arc::new(desktop_portal::CompositorDetect),
        Arc::new(desktop_portal::MouseMoveAbsolute),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::FixtureRegistry;
    use crate::wire::{Fixed, ObjectId, WireValue};
    use std::collections::HashSet;

    fn motion(x: f64, y: f64) -> WireEvent {
        WireEvent {
            object: ObjectId(9),
            interface: "wl_pointer".into(),
            name: "motion".into(),
            args: vec![
                ("time".into(), WireValue::Uint(1)),
                ("surface_x".into(), WireValue::Fixed(Fixed::from_f64(x))),
                ("surface_y".into(), WireValue::Fixed(Fixed::from_f64(y))),
            ],
        }
    }

    #[test]
    fn test_surface_position() {
        assert_eq!(surface_position(&motion(64.5, 48.0)).unwrap(), (64.5, 48.0));

        let leave = WireEvent {
            name: "leave".into(),
            args: vec![("serial".into(), WireValue::Uint(2))],
            ..motion(0.0, 0.0)
        };
        assert!(surface_position(&leave).is_err());
    }

    #[test]
    fn test_even_motion() {
        let even = [motion(10.0, 20.0), motion(20.0, 30.0), motion(30.0, 40.0), motion(99.0, 1.0)];
        ensure_even_motion(&even.iter().collect::<Vec<_>>()).unwrap();

        let uneven = [motion(10.0, 20.0), motion(20.0, 30.0), motion(35.0, 40.0)];
        let err = ensure_even_motion(&uneven.iter().collect::<Vec<_>>()).unwrap_err();
        assert_eq!(err.to_string(), "uneven x steps: 10 then 15");

        let short = [motion(1.0, 1.0)];
        assert!(matches!(
            ensure_even_motion(&short.iter().collect::<Vec<_>>()),
            Err(Error::TestAssertion(_))
        ));
    }

    #[test]
    fn test_ids_unique_and_fixtures_registered() {
        let fixtures = FixtureRegistry::with_builtins().unwrap();
        let mut ids = HashSet::new();
        for test in all() {
            let info = test.info();
            assert!(ids.insert(info.id), "duplicate id {}", info.id);
            for name in info.fixtures {
                assert!(fixtures.contains(name), "{} needs unknown fixture {}", info.id, name);
            }
            fixtures.plan(info.fixtures).unwrap();
        }
    }
}
