//! Factories for the standard fixture names

use std::sync::Arc;

use async_trait::async_trait;

use crate::common::{Error, Result};
use crate::monitor::MonitorBridge;
use crate::wire::WireClient;

use super::{
    Fixture, FixtureFactory, FixtureRegistry, FixtureScope, FixtureSpec, WindowFactory,
    DBUS_CLIENT, RUNNER_COMMANDS, WAYLAND_CLIENT, WINDOW_FACTORY,
};

/// Connects a fresh wire client to the compositor socket
pub struct WaylandClientFactory;

#[async_trait]
impl FixtureFactory for WaylandClientFactory {
    async fn create(&self, scope: &mut FixtureScope) -> Result<Fixture> {
        let session = Arc::clone(scope.session());
        let descriptor = session.descriptor()?;
        let client =
            WireClient::connect(&session.wire_socket, descriptor, session.wire.clone()).await?;
        Ok(Fixture::Wire(client))
    }

    async fn teardown(&self, fixture: Fixture, _scope: &mut FixtureScope) -> Result<()> {
        if let Fixture::Wire(client) = fixture {
            tracing::debug!("Closing wire session {:?}", client);
        }
        Ok(())
    }
}

/// Window factory bound to the `wayland_client` fixture
pub struct WindowFactoryFactory;

#[async_trait]
impl FixtureFactory for WindowFactoryFactory {
    async fn create(&self, _scope: &mut FixtureScope) -> Result<Fixture> {
        Ok(Fixture::Windows(WindowFactory::new()))
    }

    async fn teardown(&self, fixture: Fixture, scope: &mut FixtureScope) -> Result<()> {
        let Fixture::Windows(mut factory) = fixture else {
            return Err(Error::fixture_mismatch(WINDOW_FACTORY, "window factory"));
        };
        if factory.open_count() == 0 {
            return Ok(());
        }

        let client = scope.wire_client()?;
        if client.is_failed() {
            // The connection is dead; closing it releases the windows
            return Ok(());
        }
        factory.close_all(client).await
    }
}

/// Opens the monitor bridge
pub struct RunnerCommandsFactory;

#[async_trait]
impl FixtureFactory for RunnerCommandsFactory {
    async fn create(&self, scope: &mut FixtureScope) -> Result<Fixture> {
        let session = scope.session();
        let bridge = MonitorBridge::connect(
            &session.monitor_host,
            session.monitor_port,
            session.monitor.clone(),
        )
        .await?;
        Ok(Fixture::Monitor(Arc::new(bridge)))
    }

    async fn teardown(&self, fixture: Fixture, _scope: &mut FixtureScope) -> Result<()> {
        if let Fixture::Monitor(bridge) = fixture {
            bridge.close().await;
        }
        Ok(())
    }
}

/// Session bus connection
pub struct DbusClientFactory;

#[async_trait]
impl FixtureFactory for DbusClientFactory {
    async fn create(&self, _scope: &mut FixtureScope) -> Result<Fixture> {
        let connection = zbus::Connection::session().await?;
        Ok(Fixture::Dbus(connection))
    }

    async fn teardown(&self, fixture: Fixture, _scope: &mut FixtureScope) -> Result<()> {
        if let Fixture::Dbus(connection) = fixture {
            connection.close().await?;
        }
        Ok(())
    }
}

impl FixtureRegistry {
    /// Registry holding the standard fixtures, already validated
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(FixtureSpec::new(
            WAYLAND_CLIENT,
            Arc::new(WaylandClientFactory),
        ))?;
        registry.register(
            FixtureSpec::new(WINDOW_FACTORY, Arc::new(WindowFactoryFactory))
                .depends_on(WAYLAND_CLIENT),
        )?;
        registry.register(FixtureSpec::new(
            RUNNER_COMMANDS,
            Arc::new(RunnerCommandsFactory),
        ))?;
        registry.register(FixtureSpec::new(DBUS_CLIENT, Arc::new(DbusClientFactory)))?;
        registry.validate()?;
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::Config;
    use crate::fixtures::CompositorSession;

    #[test]
    fn test_builtin_names() {
        let registry = FixtureRegistry::with_builtins().unwrap();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec![WAYLAND_CLIENT, WINDOW_FACTORY, RUNNER_COMMANDS, DBUS_CLIENT]
        );
        assert_eq!(
            registry.plan(&[WINDOW_FACTORY]).unwrap(),
            vec![WAYLAND_CLIENT, WINDOW_FACTORY]
        );
    }

    #[tokio::test]
    async fn test_unreachable_monitor_is_a_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = Config::default();
        config.monitor.port = port;
        let session = Arc::new(CompositorSession::from_config(&config, None));

        let registry = FixtureRegistry::with_builtins().unwrap();
        let err = registry
            .resolve(&[RUNNER_COMMANDS], session)
            .await
            .unwrap_err();
        assert_eq!(err.class(), crate::common::ErrorClass::Connection);
    }

    #[tokio::test]
    async fn test_missing_socket_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.wire.socket = Some(dir.path().join("wayland-missing"));
        let descriptor = Arc::new(
            crate::wire::ProtocolDescriptor::from_json(r#"{ "interfaces": { "wl_display": {} } }"#)
                .unwrap(),
        );
        let session =
            Arc::new(CompositorSession::from_config(&config, None).with_descriptor(descriptor));

        let registry = FixtureRegistry::with_builtins().unwrap();
        let err = registry
            .resolve(&[WINDOW_FACTORY], session)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed { .. }));
    }
}
