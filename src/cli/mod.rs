//! CLI command handling
//!
//! Wires the configuration, registries and executor together for each
//! subcommand and formats the output.

mod dbus;

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;

use crate::capabilities;
use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::Result;
use crate::fixtures::{CompositorSession, FixtureRegistry, WindowFactory};
use crate::monitor::{MonitorBridge, MonitorCommand};
use crate::testing::{format_table, DefinitionsFile, Selection, TestExecutor, TestRegistry};
use crate::wire::{WireClient, WireEvent, WireValue};

/// Exit code when any selected test failed or errored
pub const EXIT_TESTS_FAILED: i32 = 2;

/// Dispatch a CLI command, returning the process exit code
pub async fn dispatch(command: Commands, config: Config) -> Result<i32> {
    match command {
        Commands::TestsRun {
            ids,
            compositor,
            compositor_skip_failing,
            timeout,
            json,
        } => {
            let selection = Selection {
                compositor,
                skip_failing: compositor_skip_failing,
                ids,
            };
            let timeout = match timeout {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => config.runner.test_timeout(),
            };
            tests_run(&config, selection, timeout, json).await
        }

        Commands::TestsList => {
            let registry = load_registry(&config)?;
            let rows: Vec<Vec<String>> = registry
                .definitions()
                .iter()
                .map(|d| {
                    vec![
                        d.id.clone(),
                        d.feature.clone().unwrap_or_default(),
                        d.compositors.join("|"),
                    ]
                })
                .collect();
            for line in format_table(&rows, Some(&["implementation", "feature", "compositors"]), ' ') {
                println!("{}", line);
            }
            Ok(0)
        }

        Commands::WaylandList => {
            let mut client = connect_wire(&config).await?;
            let mut rows: Vec<Vec<String>> = client
                .globals()
                .await?
                .iter()
                .map(|g| vec![g.interface.clone(), g.version.to_string()])
                .collect();
            rows.sort();
            for line in format_table(&rows, Some(&["interface", "version"]), ' ') {
                println!("{}", line);
            }
            Ok(0)
        }

        Commands::ShowWindow { seconds } => {
            let mut client = connect_wire(&config).await?;
            let mut windows = WindowFactory::new();
            let id = windows.open(&mut client).await?;
            windows
                .record(&mut client, Duration::from_secs(seconds))
                .await?;
            windows.close(&mut client, id).await?;

            let window = windows.window(id)?;
            println!("Window events: {}", window.events().len());
            for event in window.events() {
                println!("  {}", describe_event(event));
            }
            Ok(0)
        }

        Commands::DbusList { segments } => {
            for line in dbus::list(&segments).await? {
                println!("{}", line);
            }
            Ok(0)
        }

        Commands::MonitorSend { command } => {
            let bridge = MonitorBridge::from_config(&config.monitor).await?;
            let reply = bridge.execute(&MonitorCommand::Raw(command.join(" "))).await;
            bridge.close().await;
            let reply = reply?;
            if !reply.is_empty() {
                println!("{}", reply.text());
            }
            Ok(0)
        }
    }
}

fn load_registry(config: &Config) -> Result<TestRegistry> {
    let file = DefinitionsFile::load(&config.runner.registry)?;
    TestRegistry::load(file.tests, &capabilities::all())
}

async fn connect_wire(config: &Config) -> Result<WireClient> {
    let session = CompositorSession::from_config(config, None);
    let descriptor = session.descriptor()?;
    WireClient::connect(&session.wire_socket, descriptor, session.wire.clone()).await
}

async fn tests_run(
    config: &Config,
    selection: Selection,
    timeout: Option<Duration>,
    json: bool,
) -> Result<i32> {
    // Configuration problems abort before anything runs
    let registry = load_registry(config)?;
    let fixtures = Arc::new(FixtureRegistry::with_builtins()?);
    let selected = registry.select(&selection)?;

    let session = CompositorSession::from_config(config, selection.compositor.clone());
    session.descriptor()?;
    let session = Arc::new(session);
    let executor = TestExecutor::new(fixtures, session).with_timeout(timeout);

    tracing::info!(
        "Running {} of {} tests (compositor: {})",
        selected.len(),
        registry.len(),
        selection.compositor.as_deref().unwrap_or("any")
    );

    let prefixes = format_table(
        &selected
            .iter()
            .map(|d| vec![format!("{} ...", d.id)])
            .collect::<Vec<_>>(),
        None,
        '.',
    );
    let mut prefixes = prefixes.into_iter();

    let report = executor
        .run_with_progress(&selected, |outcome| {
            if json {
                return;
            }
            let prefix = prefixes.next().unwrap_or_else(|| outcome.id.clone());
            println!("{} {}", prefix, outcome.status.colored_label());
        })
        .await;

    if json {
        println!("{}", report.to_json()?);
    } else {
        report.print_summary();
    }

    Ok(if report.is_success() { 0 } else { EXIT_TESTS_FAILED })
}

fn describe_value(value: &WireValue) -> String {
    match value {
        WireValue::Int(v) => v.to_string(),
        WireValue::Uint(v) => v.to_string(),
        WireValue::Fixed(v) => v.to_f64().to_string(),
        WireValue::Str(Some(s)) => format!("{:?}", s),
        WireValue::Str(None) => "nil".to_string(),
        WireValue::Array(bytes) => format!("array[{}]", bytes.len()),
        WireValue::Object(Some(id)) | WireValue::NewId(id) => format!("@{}", id),
        WireValue::Object(None) => "nil".to_string(),
        WireValue::Fd(_) => "fd".to_string(),
    }
}

fn describe_event(event: &WireEvent) -> String {
    let args: Vec<String> = event
        .args
        .iter()
        .map(|(name, value)| format!("{}={}", name, describe_value(value)))
        .collect();
    format!("{} {}", event.qualified_name().cyan(), args.join(" "))
}

/// Apply command-line overrides on top of the loaded configuration
pub fn apply_overrides(
    config: &mut Config,
    registry: Option<std::path::PathBuf>,
    socket: Option<std::path::PathBuf>,
    monitor: Option<&str>,
) -> Result<()> {
    if let Some(registry) = registry {
        config.runner.registry = registry;
    }
    if let Some(socket) = socket {
        config.wire.socket = Some(socket);
    }
    if let Some(endpoint) = monitor {
        let (host, port) = crate::common::parse_endpoint(endpoint)?;
        config.monitor.host = host;
        config.monitor.port = port;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Fixed, ObjectId};

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        apply_overrides(&mut config, None, None, Some("10.0.2.2:4444")).unwrap();
        assert_eq!((config.monitor.host.as_str(), config.monitor.port), ("10.0.2.2", 4444));
        assert!(apply_overrides(&mut config, None, None, Some("nope")).is_err());
    }

    #[test]
    fn test_describe_event() {
        colored::control::set_override(false);
        let event = WireEvent {
            object: ObjectId(7),
            interface: "wl_pointer".into(),
            name: "enter".into(),
            args: vec![
                ("serial".into(), WireValue::Uint(3)),
                ("surface".into(), WireValue::Object(Some(ObjectId(5)))),
                ("surface_x".into(), WireValue::Fixed(Fixed::from_f64(1.5))),
            ],
        };
        assert_eq!(
            describe_event(&event),
            "wl_pointer.enter serial=3 surface=@5 surface_x=1.5"
        );
    }
}
