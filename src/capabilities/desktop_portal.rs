//! Tests that go through the XDG desktop portals on the session bus
//!
//! Remote desktop access normally needs a click on an authorization
//! dialog. The pointer test instead stores a fixed restore token with all
//! permissions granted in the portal permission store, then restores the
//! session with it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use zbus::proxy;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};
use zbus::Connection;

use crate::common::{Error, Result};
use crate::ensure;
use crate::fixtures::{FixtureScope, DBUS_CLIENT, WAYLAND_CLIENT, WINDOW_FACTORY};
use crate::testing::{CapabilityTest, TestInfo};

use super::ensure_even_motion;

/// Well-known bus names owned by each desktop's shell
const SHELL_NAMES: &[(&str, &str)] = &[
    ("org.kde.plasmashell", "kde"),
    ("org.gnome.Shell", "gnome"),
];

const PORTAL_SERVICE: &str = "org.freedesktop.portal.Desktop";
const REQUEST_INTERFACE: &str = "org.freedesktop.portal.Request";

const PERMISSION_TABLE: &str = "remote-desktop";
const RESTORE_TOKEN: &str = "9c437d05-3e48-4f8e-81d6-cea0001564ff";

/// `persist_mode`: keep the permission until explicitly revoked
const PERSIST_UNTIL_REVOKED: u32 = 2;
/// Keyboard and pointer
const DEVICE_TYPES: u32 = 1 | 2;
/// Keyboard, pointer and touchscreen, as GNOME records a full grant
const GNOME_DEVICE_TYPES: u32 = 1 | 2 | 4;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
const SETTLE: Duration = Duration::from_millis(100);

/// Compositor tag for the first known shell name, in sorted name order
pub fn detect_compositor<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<&'static str> {
    let mut names: Vec<&str> = names.into_iter().collect();
    names.sort_unstable();
    names.into_iter().find_map(|name| {
        SHELL_NAMES
            .iter()
            .find(|(shell, _)| *shell == name)
            .map(|(_, tag)| *tag)
    })
}

async fn bus_compositor(connection: &Connection) -> Result<(Option<&'static str>, usize)> {
    let proxy = zbus::fdo::DBusProxy::new(connection).await?;
    let names = proxy.list_names().await.map_err(zbus::Error::from)?;
    tracing::debug!("{} names on the session bus", names.len());
    Ok((detect_compositor(names.iter().map(|n| n.as_str())), names.len()))
}

#[proxy(
    interface = "org.freedesktop.impl.portal.PermissionStore",
    default_service = "org.freedesktop.impl.portal.PermissionStore",
    default_path = "/org/freedesktop/impl/portal/PermissionStore",
    gen_blocking = false
)]
trait PermissionStore {
    fn list(&self, table: &str) -> zbus::Result<Vec<String>>;

    fn set(
        &self,
        table: &str,
        create: bool,
        id: &str,
        app_permissions: HashMap<&str, Vec<&str>>,
        data: &Value<'_>,
    ) -> zbus::Result<()>;
}

#[proxy(
    interface = "org.freedesktop.portal.RemoteDesktop",
    default_service = "org.freedesktop.portal.Desktop",
    default_path = "/org/freedesktop/portal/desktop",
    gen_blocking = false
)]
trait RemoteDesktop {
    fn create_session(&self, options: HashMap<&str, Value<'_>>) -> zbus::Result<OwnedObjectPath>;

    fn select_devices(
        &self,
        session_handle: &ObjectPath<'_>,
        options: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<OwnedObjectPath>;

    fn start(
        &self,
        session_handle: &ObjectPath<'_>,
        parent_window: &str,
        options: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<OwnedObjectPath>;

    fn notify_pointer_motion_absolute(
        &self,
        session_handle: &ObjectPath<'_>,
        options: HashMap<&str, Value<'_>>,
        stream: u32,
        x: f64,
        y: f64,
    ) -> zbus::Result<()>;
}

#[proxy(
    interface = "org.freedesktop.portal.ScreenCast",
    default_service = "org.freedesktop.portal.Desktop",
    default_path = "/org/freedesktop/portal/desktop",
    gen_blocking = false
)]
trait ScreenCast {
    fn select_sources(
        &self,
        session_handle: &ObjectPath<'_>,
        options: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<OwnedObjectPath>;
}

#[proxy(
    interface = "org.freedesktop.portal.Session",
    default_service = "org.freedesktop.portal.Desktop",
    gen_blocking = false
)]
trait PortalSession {
    fn close(&self) -> zbus::Result<()>;
}

/// QDataStream encoding of the `QVariantMap` KDE stores for a granted
/// remote desktop session: `devices` (uint) and `screenShareEnabled` (bool)
fn kde_permission_data(devices: u32) -> Vec<u8> {
    fn put_key(out: &mut Vec<u8>, key: &str) {
        let utf16: Vec<u16> = key.encode_utf16().collect();
        out.extend_from_slice(&((utf16.len() * 2) as u32).to_be_bytes());
        for unit in utf16 {
            out.extend_from_slice(&unit.to_be_bytes());
        }
    }
    const QVARIANT_BOOL: u32 = 1;
    const QVARIANT_UINT: u32 = 3;

    let mut out = Vec::new();
    out.extend_from_slice(&2u32.to_be_bytes());
    put_key(&mut out, "devices");
    out.extend_from_slice(&QVARIANT_UINT.to_be_bytes());
    out.push(0);
    out.extend_from_slice(&devices.to_be_bytes());
    put_key(&mut out, "screenShareEnabled");
    out.extend_from_slice(&QVARIANT_BOOL.to_be_bytes());
    out.push(0);
    out.push(1);
    out
}

/// Permission store entry granting remote desktop access on `compositor`
fn permission_data(compositor: &str) -> Value<'static> {
    if compositor == "gnome" {
        let monitor: Vec<(u32, u32, Value<'static>)> =
            vec![(0, 1, Value::from("RHT:QEMU Monitor:0x00000000"))];
        let grant = Value::from((0i64, 1i64, GNOME_DEVICE_TYPES, false, monitor));
        Value::from(("GNOME", 1u32, grant))
    } else {
        Value::from(("KDE", 1u32, Value::from(kde_permission_data(DEVICE_TYPES))))
    }
}

/// Object path the portal will use for the request identified by `token`
fn request_path(unique_name: &str, token: &str) -> String {
    let sender = unique_name.trim_start_matches(':').replace('.', "_");
    format!("/org/freedesktop/portal/desktop/request/{}/{}", sender, token)
}

fn request_token() -> String {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    format!(
        "captest{}_{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    )
}

/// Run a portal call that answers through a `Request.Response` signal
///
/// The subscription is in place before `call` runs, so a fast response is
/// not missed. `call` receives the handle token to pass in its options.
async fn portal_request<F, Fut>(connection: &Connection, call: F) -> Result<HashMap<String, OwnedValue>>
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = zbus::Result<OwnedObjectPath>>,
{
    let unique_name = connection
        .unique_name()
        .map(|n| n.to_string())
        .ok_or_else(|| Error::Internal("session bus connection has no unique name".into()))?;
    let token = request_token();
    let path = request_path(&unique_name, &token);

    let request = zbus::Proxy::new(connection, PORTAL_SERVICE, path.as_str(), REQUEST_INTERFACE).await?;
    let mut responses = request.receive_signal("Response").await?;
    call(token).await?;

    let message = tokio::time::timeout(RESPONSE_TIMEOUT, responses.next())
        .await
        .map_err(|_| Error::timeout(format!("portal response on {}", path), RESPONSE_TIMEOUT))?
        .ok_or_else(|| Error::ConnectionClosed(format!("no response on {}", path)))?;
    let (code, results): (u32, HashMap<String, OwnedValue>) = message.body().deserialize()?;
    ensure!(code == 0, "portal request {} answered with code {}", path, code);
    Ok(results)
}

fn result_string(results: &HashMap<String, OwnedValue>, key: &str) -> Result<String> {
    match results.get(key).map(|v| &**v) {
        Some(Value::Str(s)) => Ok(s.as_str().to_string()),
        Some(Value::ObjectPath(p)) => Ok(p.as_str().to_string()),
        other => Err(Error::protocol(format!("portal result {} is {:?}", key, other))),
    }
}

/// Node id of the first stream in a `Start` response's `a(ua{sv})`
fn first_stream(streams: &Value<'_>) -> Option<u32> {
    let Value::Array(streams) = streams else {
        return None;
    };
    match streams.iter().next()? {
        Value::Structure(stream) => match stream.fields().first()? {
            Value::U32(node) => Some(*node),
            _ => None,
        },
        _ => None,
    }
}

/// Grant the restore token, unless an earlier run already did
async fn authorize(connection: &Connection, compositor: &str) -> Result<()> {
    let store = PermissionStoreProxy::new(connection).await?;
    let granted = store.list(PERMISSION_TABLE).await?;
    if granted.iter().any(|id| id == RESTORE_TOKEN) {
        return Ok(());
    }

    tracing::debug!("Granting remote desktop token for {}", compositor);
    store
        .set(
            PERMISSION_TABLE,
            true,
            RESTORE_TOKEN,
            HashMap::from([("", vec!["yes"])]),
            &permission_data(compositor),
        )
        .await?;
    Ok(())
}

/// A started remote desktop session
struct RemoteSession {
    remote: RemoteDesktopProxy<'static>,
    handle: OwnedObjectPath,
    stream: u32,
}

impl RemoteSession {
    async fn start(connection: &Connection) -> Result<Self> {
        let remote = RemoteDesktopProxy::new(connection).await?;
        let screen_cast = ScreenCastProxy::new(connection).await?;

        let created = portal_request(connection, |token| {
            remote.create_session(HashMap::from([
                ("handle_token", Value::from(token)),
                ("session_handle_token", Value::from("captest")),
            ]))
        })
        .await?;
        let handle = OwnedObjectPath::try_from(result_string(&created, "session_handle")?)
            .map_err(|e| Error::protocol(format!("bad session handle: {}", e)))?;

        screen_cast.select_sources(&handle, HashMap::new()).await?;

        portal_request(connection, |token| {
            remote.select_devices(
                &handle,
                HashMap::from([
                    ("handle_token", Value::from(token)),
                    ("persist_mode", Value::from(PERSIST_UNTIL_REVOKED)),
                    ("restore_token", Value::from(RESTORE_TOKEN)),
                    ("types", Value::from(DEVICE_TYPES)),
                ]),
            )
        })
        .await?;

        let started = portal_request(connection, |token| {
            remote.start(&handle, "", HashMap::from([("handle_token", Value::from(token))]))
        })
        .await?;
        let stream = started
            .get("streams")
            .and_then(|streams| first_stream(streams))
            .ok_or_else(|| Error::protocol("remote desktop session started without streams"))?;

        tracing::debug!("Remote desktop session {} on stream {}", handle.as_str(), stream);
        Ok(Self {
            remote,
            handle,
            stream,
        })
    }

    async fn move_to(&self, x: f64, y: f64) -> Result<()> {
        self.remote
            .notify_pointer_motion_absolute(&self.handle, HashMap::new(), self.stream, x, y)
            .await?;
        Ok(())
    }

    async fn close(self, connection: &Connection) {
        let closed = async {
            PortalSessionProxy::builder(connection)
                .path(self.handle.clone())?
                .build()
                .await?
                .close()
                .await
        };
        if let Err(e) = closed.await {
            tracing::debug!("Closing remote desktop session: {}", e);
        }
    }
}

static DETECT_INFO: TestInfo = TestInfo {
    id: "desktop_portal.compositor_detect",
    fixtures: &[DBUS_CLIENT],
};

/// The running desktop is identifiable from the session bus
pub struct CompositorDetect;

#[async_trait]
impl CapabilityTest for CompositorDetect {
    fn info(&self) -> &TestInfo {
        &DETECT_INFO
    }

    async fn run(&self, fixtures: &mut FixtureScope) -> Result<()> {
        let (detected, count) = bus_compositor(fixtures.dbus()?).await?;
        ensure!(
            detected.is_some(),
            "no known compositor name among {} bus names",
            count
        );
        if let Some(expected) = fixtures.session().tag.as_deref() {
            ensure!(
                detected == Some(expected),
                "session bus looks like {:?}, expected {}",
                detected,
                expected
            );
        }
        Ok(())
    }
}

static MOVE_INFO: TestInfo = TestInfo {
    id: "desktop_portal.mouse_move_absolute",
    fixtures: &[DBUS_CLIENT, WAYLAND_CLIENT, WINDOW_FACTORY],
};

/// Absolute pointer motion through the RemoteDesktop portal arrives as
/// evenly spaced motion events
pub struct MouseMoveAbsolute;

#[async_trait]
impl CapabilityTest for MouseMoveAbsolute {
    fn info(&self) -> &TestInfo {
        &MOVE_INFO
    }

    async fn run(&self, fixtures: &mut FixtureScope) -> Result<()> {
        let connection = fixtures.dbus()?.clone();
        let (detected, _) = bus_compositor(&connection).await?;
        let compositor =
            detected.ok_or_else(|| Error::Skipped("no known desktop on the session bus".into()))?;

        authorize(&connection, compositor).await?;
        let session = RemoteSession::start(&connection).await?;

        let (client, windows) = fixtures.windows()?;
        let window = windows.open(client).await?;
        let driven: Result<()> = async {
            for pos in (100..150).step_by(10) {
                session.move_to(f64::from(pos), f64::from(pos)).await?;
                windows.record(client, SETTLE).await?;
            }
            Ok(())
        }
        .await;
        session.close(&connection).await;
        driven?;
        windows.close(client, window).await?;

        ensure_even_motion(&windows.window(window)?.events_of("wl_pointer.motion"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_compositor() {
        let names = [
            ":1.42",
            "org.freedesktop.DBus",
            "org.kde.plasmashell",
            "org.freedesktop.portal.Desktop",
        ];
        assert_eq!(detect_compositor(names), Some("kde"));
        assert_eq!(detect_compositor(["org.gnome.Shell", ":1.7"]), Some("gnome"));
        assert_eq!(detect_compositor(["org.freedesktop.DBus"]), None);
    }

    #[test]
    fn test_request_path() {
        assert_eq!(
            request_path(":1.42", "captest7_0"),
            "/org/freedesktop/portal/desktop/request/1_42/captest7_0"
        );
        assert_ne!(request_token(), request_token());
    }

    #[test]
    fn test_kde_permission_data() {
        let expected: &[u8] = b"\x00\x00\x00\x02\
            \x00\x00\x00\x0e\x00d\x00e\x00v\x00i\x00c\x00e\x00s\
            \x00\x00\x00\x03\x00\x00\x00\x00\x03\
            \x00\x00\x00$\x00s\x00c\x00r\x00e\x00e\x00n\x00S\x00h\x00a\x00r\x00e\
            \x00E\x00n\x00a\x00b\x00l\x00e\x00d\
            \x00\x00\x00\x01\x00\x01";
        assert_eq!(kde_permission_data(3), expected);
    }

    #[test]
    fn test_permission_data_signatures() {
        assert_eq!(permission_data("gnome").value_signature().to_string(), "(suv)");
        assert_eq!(permission_data("kde").value_signature().to_string(), "(suv)");
    }

    #[test]
    fn test_first_stream() {
        let streams = Value::from(vec![(57u32, HashMap::<&str, Value<'_>>::new())]);
        assert_eq!(first_stream(&streams), Some(57));

        let empty = Value::from(Vec::<(u32, HashMap<&str, Value<'_>>)>::new());
        assert_eq!(first_stream(&empty), None);
        assert_eq!(first_stream(&Value::from(3u32)), None);
    }
}
