//! Named, typed resources injected into capability tests
//!
//! A test lists the fixture names it needs. The [`FixtureRegistry`] maps
//! each name to a [`FixtureSpec`] (factory plus dependencies), creates the
//! requested fixtures dependencies-first into a [`FixtureScope`], and the
//! scope tears them down in exact reverse creation order.

pub mod builtin;
pub mod registry;
pub mod window;

use std::any::Any;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::monitor::{MonitorBridge, MonitorOptions};
use crate::wire::{ProtocolDescriptor, WireClient, WireOptions};

pub use registry::FixtureRegistry;
pub use window::{Window, WindowFactory, WindowId};

/// Wire protocol client connected to the compositor
pub const WAYLAND_CLIENT: &str = "wayland_client";
/// Session bus connection
pub const DBUS_CLIENT: &str = "dbus_client";
/// Monitor bridge for injecting input from outside the guest
pub const RUNNER_COMMANDS: &str = "runner_commands";
/// Opens top-level windows over `wayland_client`
pub const WINDOW_FACTORY: &str = "window_factory";

/// A live fixture instance
pub enum Fixture {
    Wire(WireClient),
    Windows(WindowFactory),
    Monitor(Arc<MonitorBridge>),
    Dbus(zbus::Connection),
    /// Anything else a custom factory produces
    Value(Box<dyn Any + Send + Sync>),
}

impl Fixture {
    pub fn kind(&self) -> &'static str {
        match self {
            Fixture::Wire(_) => "wire client",
            Fixture::Windows(_) => "window factory",
            Fixture::Monitor(_) => "monitor bridge",
            Fixture::Dbus(_) => "dbus connection",
            Fixture::Value(_) => "value",
        }
    }
}

impl std::fmt::Debug for Fixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fixture({})", self.kind())
    }
}

/// Creates and destroys one kind of fixture
#[async_trait]
pub trait FixtureFactory: Send + Sync {
    /// Build the fixture; dependencies are already present in `scope`
    async fn create(&self, scope: &mut FixtureScope) -> Result<Fixture>;

    /// Release the fixture; dependencies are still present in `scope`
    async fn teardown(&self, fixture: Fixture, scope: &mut FixtureScope) -> Result<()> {
        let _ = scope;
        drop(fixture);
        Ok(())
    }
}

/// Registration entry: name, dependencies and factory
#[derive(Clone)]
pub struct FixtureSpec {
    pub name: String,
    pub deps: Vec<String>,
    pub factory: Arc<dyn FixtureFactory>,
}

impl FixtureSpec {
    pub fn new(name: impl Into<String>, factory: Arc<dyn FixtureFactory>) -> Self {
        Self {
            name: name.into(),
            deps: Vec::new(),
            factory,
        }
    }

    pub fn depends_on(mut self, dep: impl Into<String>) -> Self {
        self.deps.push(dep.into());
        self
    }
}

impl std::fmt::Debug for FixtureSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureSpec")
            .field("name", &self.name)
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

/// Read-only facts about the compositor under test, shared by all tests of
/// a run
#[derive(Debug)]
pub struct CompositorSession {
    /// Capability tag of the compositor, when the caller selected one
    pub tag: Option<String>,
    pub wire_socket: PathBuf,
    pub wire: WireOptions,
    pub descriptor_path: PathBuf,
    pub monitor_host: String,
    pub monitor_port: u16,
    pub monitor: MonitorOptions,
    descriptor: OnceLock<Arc<ProtocolDescriptor>>,
}

impl CompositorSession {
    pub fn from_config(config: &Config, tag: Option<String>) -> Self {
        Self {
            tag,
            wire_socket: crate::common::paths::wire_socket_path(config.wire.socket.as_ref()),
            wire: WireOptions {
                call_timeout: config.wire.call_timeout(),
            },
            descriptor_path: config.wire.descriptor.clone(),
            monitor_host: config.monitor.host.clone(),
            monitor_port: config.monitor.port,
            monitor: MonitorOptions::from(&config.monitor),
            descriptor: OnceLock::new(),
        }
    }

    /// Use an already loaded descriptor instead of reading `descriptor_path`
    pub fn with_descriptor(self, descriptor: Arc<ProtocolDescriptor>) -> Self {
        let _ = self.descriptor.set(descriptor);
        self
    }

    /// The protocol descriptor, loaded on first use
    pub fn descriptor(&self) -> Result<Arc<ProtocolDescriptor>> {
        if let Some(descriptor) = self.descriptor.get() {
            return Ok(Arc::clone(descriptor));
        }
        let loaded = ProtocolDescriptor::load(&self.descriptor_path)?;
        Ok(Arc::clone(self.descriptor.get_or_init(|| loaded)))
    }
}

struct FixtureInstance {
    name: String,
    fixture: Fixture,
    factory: Arc<dyn FixtureFactory>,
}

/// The fixtures of one test invocation, in creation order
pub struct FixtureScope {
    session: Arc<CompositorSession>,
    instances: Vec<FixtureInstance>,
}

impl FixtureScope {
    pub fn new(session: Arc<CompositorSession>) -> Self {
        Self {
            session,
            instances: Vec::new(),
        }
    }

    pub fn session(&self) -> &Arc<CompositorSession> {
        &self.session
    }

    pub(crate) fn push(&mut self, name: &str, fixture: Fixture, factory: Arc<dyn FixtureFactory>) {
        tracing::debug!("Created fixture {} ({})", name, fixture.kind());
        self.instances.push(FixtureInstance {
            name: name.to_string(),
            fixture,
            factory,
        });
    }

    /// Fixture names in creation order
    pub fn names(&self) -> Vec<&str> {
        self.instances.iter().map(|i| i.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn get(&self, name: &str) -> Result<&Fixture> {
        self.instances
            .iter()
            .find(|i| i.name == name)
            .map(|i| &i.fixture)
            .ok_or_else(|| Error::UnknownFixture(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Fixture> {
        self.instances
            .iter_mut()
            .find(|i| i.name == name)
            .map(|i| &mut i.fixture)
            .ok_or_else(|| Error::UnknownFixture(name.to_string()))
    }

    pub fn wire_client(&mut self) -> Result<&mut WireClient> {
        match self.get_mut(WAYLAND_CLIENT)? {
            Fixture::Wire(client) => Ok(client),
            _ => Err(Error::fixture_mismatch(WAYLAND_CLIENT, "wire client")),
        }
    }

    pub fn window_factory(&mut self) -> Result<&mut WindowFactory> {
        match self.get_mut(WINDOW_FACTORY)? {
            Fixture::Windows(factory) => Ok(factory),
            _ => Err(Error::fixture_mismatch(WINDOW_FACTORY, "window factory")),
        }
    }

    /// The wire client and the window factory at the same time
    pub fn windows(&mut self) -> Result<(&mut WireClient, &mut WindowFactory)> {
        let mut client = None;
        let mut factory = None;
        for instance in self.instances.iter_mut() {
            match (instance.name.as_str(), &mut instance.fixture) {
                (WAYLAND_CLIENT, Fixture::Wire(c)) => client = Some(c),
                (WINDOW_FACTORY, Fixture::Windows(w)) => factory = Some(w),
                _ => {}
            }
        }
        match (client, factory) {
            (Some(c), Some(w)) => Ok((c, w)),
            (None, _) => Err(Error::UnknownFixture(WAYLAND_CLIENT.to_string())),
            (_, None) => Err(Error::UnknownFixture(WINDOW_FACTORY.to_string())),
        }
    }

    pub fn monitor(&self) -> Result<Arc<MonitorBridge>> {
        match self.get(RUNNER_COMMANDS)? {
            Fixture::Monitor(bridge) => Ok(Arc::clone(bridge)),
            _ => Err(Error::fixture_mismatch(RUNNER_COMMANDS, "monitor bridge")),
        }
    }

    pub fn dbus(&self) -> Result<&zbus::Connection> {
        match self.get(DBUS_CLIENT)? {
            Fixture::Dbus(connection) => Ok(connection),
            _ => Err(Error::fixture_mismatch(DBUS_CLIENT, "dbus connection")),
        }
    }

    /// A custom fixture value of type `T`
    pub fn value<T: Any>(&self, name: &str) -> Result<&T> {
        match self.get(name)? {
            Fixture::Value(value) => value
                .downcast_ref::<T>()
                .ok_or_else(|| Error::fixture_mismatch(name, std::any::type_name::<T>())),
            _ => Err(Error::fixture_mismatch(name, std::any::type_name::<T>())),
        }
    }

    /// Tear every fixture down, last created first
    ///
    /// Teardown errors are logged and the remaining fixtures are still
    /// released.
    pub async fn teardown(&mut self) {
        while let Some(instance) = self.instances.pop() {
            tracing::debug!("Tearing down fixture {}", instance.name);
            if let Err(e) = instance.factory.teardown(instance.fixture, self).await {
                tracing::warn!("Teardown of fixture {} failed: {}", instance.name, e);
            }
        }
    }
}

impl std::fmt::Debug for FixtureScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureScope")
            .field("fixtures", &self.names())
            .finish()
    }
}
