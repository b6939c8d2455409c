//! Top-level test windows
//!
//! Each window is a fullscreen xdg toplevel backed by a memfd shm buffer,
//! so pointer and keyboard input aimed at the output lands on it. The
//! factory owns the shared globals (compositor, shm, wm base, seat) and
//! routes pointer/keyboard events to the window that has focus.

use std::fs::File;
use std::os::fd::AsFd;
use std::time::Duration;

use tokio::time::Instant;

use crate::common::{Error, Result};
use crate::wire::{ObjectId, WireArg, WireClient, WireEvent, WireValue};

const DEFAULT_WIDTH: i32 = 640;
const DEFAULT_HEIGHT: i32 = 480;
const BYTES_PER_PIXEL: i32 = 4;
/// `wl_shm.format.xrgb8888`
const FORMAT_XRGB8888: u32 = 1;

const SEAT_CAPABILITY_POINTER: u32 = 1;
const SEAT_CAPABILITY_KEYBOARD: u32 = 2;

/// Handle to a window owned by a [`WindowFactory`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(usize);

#[derive(Debug, Clone, Copy)]
struct Globals {
    compositor: ObjectId,
    shm: ObjectId,
    wm_base: ObjectId,
    seat: ObjectId,
}

/// One open toplevel and the input it received
#[derive(Debug)]
pub struct Window {
    id: WindowId,
    surface: ObjectId,
    xdg_surface: ObjectId,
    toplevel: ObjectId,
    pool: Option<ObjectId>,
    buffer: Option<ObjectId>,
    configured: bool,
    close_requested: bool,
    size: (i32, i32),
    events: Vec<WireEvent>,
    open: bool,
}

impl Window {
    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn surface(&self) -> ObjectId {
        self.surface
    }

    /// Input events recorded while this window had focus
    pub fn events(&self) -> &[WireEvent] {
        &self.events
    }

    /// Recorded events of one kind, e.g. `"wl_pointer.motion"`
    pub fn events_of(&self, kind: &str) -> Vec<&WireEvent> {
        let (interface, name) = kind.split_once('.').unwrap_or((kind, ""));
        self.events
            .iter()
            .filter(|e| e.interface == interface && (name.is_empty() || e.name == name))
            .collect()
    }

    /// Whether the compositor asked the window to close
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    pub fn size(&self) -> (i32, i32) {
        self.size
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

/// Opens windows and dispatches their events
#[derive(Debug, Default)]
pub struct WindowFactory {
    globals: Option<Globals>,
    seat_capabilities: u32,
    pointer: Option<ObjectId>,
    keyboard: Option<ObjectId>,
    windows: Vec<Window>,
    /// Window under the pointer / holding keyboard focus
    pointer_focus: Option<usize>,
    keyboard_focus: Option<usize>,
}

impl WindowFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bound seat, once a window has been opened
    pub fn seat(&self) -> Option<ObjectId> {
        self.globals.map(|g| g.seat)
    }

    pub fn window(&self, id: WindowId) -> Result<&Window> {
        self.windows
            .get(id.0)
            .ok_or_else(|| Error::Internal(format!("no window {}", id.0)))
    }

    pub fn open_count(&self) -> usize {
        self.windows.iter().filter(|w| w.open).count()
    }

    async fn globals(&mut self, client: &mut WireClient) -> Result<Globals> {
        if let Some(globals) = self.globals {
            return Ok(globals);
        }

        let globals = Globals {
            compositor: client.bind("wl_compositor", 4).await?,
            shm: client.bind("wl_shm", 1).await?,
            wm_base: client.bind("xdg_wm_base", 2).await?,
            seat: client.bind("wl_seat", 7).await?,
        };
        self.globals = Some(globals);

        // Seat capabilities arrive right after the bind
        client.roundtrip().await?;
        self.dispatch_pending(client, Duration::ZERO).await?;

        if self.seat_capabilities & SEAT_CAPABILITY_POINTER != 0 {
            self.pointer = Some(
                client
                    .call_new(globals.seat, "get_pointer", vec![WireArg::New])
                    .await?,
            );
        }
        if self.seat_capabilities & SEAT_CAPABILITY_KEYBOARD != 0 {
            self.keyboard = Some(
                client
                    .call_new(globals.seat, "get_keyboard", vec![WireArg::New])
                    .await?,
            );
        }
        Ok(globals)
    }

    /// Open a fullscreen toplevel and wait until it is mapped
    pub async fn open(&mut self, client: &mut WireClient) -> Result<WindowId> {
        let globals = self.globals(client).await?;
        let id = WindowId(self.windows.len());

        let surface = client
            .call_new(globals.compositor, "create_surface", vec![WireArg::New])
            .await?;
        let xdg_surface = client
            .call_new(
                globals.wm_base,
                "get_xdg_surface",
                vec![WireArg::New, WireArg::Object(Some(surface))],
            )
            .await?;
        let toplevel = client
            .call_new(xdg_surface, "get_toplevel", vec![WireArg::New])
            .await?;
        client
            .call(toplevel, "set_title", vec![WireArg::Str(Some("captest"))])
            .await?;
        client
            .call(toplevel, "set_fullscreen", vec![WireArg::Object(None)])
            .await?;
        client.call(surface, "commit", vec![]).await?;

        self.windows.push(Window {
            id,
            surface,
            xdg_surface,
            toplevel,
            pool: None,
            buffer: None,
            configured: false,
            close_requested: false,
            size: (0, 0),
            events: Vec::new(),
            open: true,
        });

        let deadline = Instant::now() + client_timeout();
        while !self.windows[id.0].configured {
            if Instant::now() >= deadline {
                return Err(Error::timeout("waiting for window configure", client_timeout()));
            }
            self.dispatch_pending(client, Duration::from_millis(50)).await?;
        }

        self.attach_buffer(client, globals, id).await?;
        client.roundtrip().await?;
        tracing::debug!("Opened window {} on surface {}", id.0, surface);
        Ok(id)
    }

    async fn attach_buffer(
        &mut self,
        client: &mut WireClient,
        globals: Globals,
        id: WindowId,
    ) -> Result<()> {
        let window = &mut self.windows[id.0];
        let (mut width, mut height) = window.size;
        if width <= 0 || height <= 0 {
            (width, height) = (DEFAULT_WIDTH, DEFAULT_HEIGHT);
            window.size = (width, height);
        }
        let (stride, size) = buffer_layout(width, height)?;

        let memory = shm_file(size as u64)?;
        let pool = client
            .call_new(
                globals.shm,
                "create_pool",
                vec![
                    WireArg::New,
                    WireArg::Fd(memory.as_fd()),
                    WireArg::Int(size),
                ],
            )
            .await?;
        let buffer = client
            .call_new(
                pool,
                "create_buffer",
                vec![
                    WireArg::New,
                    WireArg::Int(0),
                    WireArg::Int(width),
                    WireArg::Int(height),
                    WireArg::Int(stride),
                    WireArg::Uint(FORMAT_XRGB8888),
                ],
            )
            .await?;

        let surface = window.surface;
        window.pool = Some(pool);
        window.buffer = Some(buffer);

        client
            .call(
                surface,
                "attach",
                vec![WireArg::Object(Some(buffer)), WireArg::Int(0), WireArg::Int(0)],
            )
            .await?;
        client
            .call(
                surface,
                "damage",
                vec![
                    WireArg::Int(0),
                    WireArg::Int(0),
                    WireArg::Int(width),
                    WireArg::Int(height),
                ],
            )
            .await?;
        client.call(surface, "commit", vec![]).await?;
        Ok(())
    }

    /// Pump events for `timeout`, recording input on the focused windows
    ///
    /// Returns the number of events handled.
    pub async fn record(&mut self, client: &mut WireClient, timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut handled = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            handled += self.dispatch_pending(client, remaining).await?;
            if remaining.is_zero() {
                return Ok(handled);
            }
        }
    }

    async fn dispatch_pending(&mut self, client: &mut WireClient, timeout: Duration) -> Result<usize> {
        let batch = client.poll_events(timeout).await?;
        let count = batch.len();
        for event in batch {
            self.dispatch(client, event).await?;
        }
        Ok(count)
    }

    fn window_index(&self, pred: impl Fn(&Window) -> bool) -> Option<usize> {
        self.windows.iter().position(|w| w.open && pred(w))
    }

    async fn dispatch(&mut self, client: &mut WireClient, event: WireEvent) -> Result<()> {
        let (interface, name) = (event.interface.clone(), event.name.clone());
        match (interface.as_str(), name.as_str()) {
            ("wl_seat", "capabilities") => {
                self.seat_capabilities = uint_arg(&event, "capabilities");
            }
            ("xdg_wm_base", "ping") => {
                let serial = uint_arg(&event, "serial");
                client
                    .call(event.object, "pong", vec![WireArg::Uint(serial)])
                    .await?;
            }
            ("xdg_toplevel", "configure") => {
                if let Some(idx) = self.window_index(|w| w.toplevel == event.object) {
                    let width = event.arg("width").and_then(WireValue::as_int).unwrap_or(0);
                    let height = event.arg("height").and_then(WireValue::as_int).unwrap_or(0);
                    if width > 0 && height > 0 {
                        self.windows[idx].size = (width, height);
                    }
                }
            }
            ("xdg_toplevel", "close") => {
                if let Some(idx) = self.window_index(|w| w.toplevel == event.object) {
                    self.windows[idx].close_requested = true;
                }
            }
            ("xdg_surface", "configure") => {
                if let Some(idx) = self.window_index(|w| w.xdg_surface == event.object) {
                    let serial = uint_arg(&event, "serial");
                    client
                        .call(event.object, "ack_configure", vec![WireArg::Uint(serial)])
                        .await?;
                    self.windows[idx].configured = true;
                }
            }
            ("wl_pointer", name) => {
                let focus = self.update_focus(&event, name, FocusKind::Pointer);
                if let Some(idx) = focus {
                    self.windows[idx].events.push(event);
                }
            }
            ("wl_keyboard", name) => {
                let focus = self.update_focus(&event, name, FocusKind::Keyboard);
                if let Some(idx) = focus {
                    self.windows[idx].events.push(event);
                }
            }
            _ => {
                tracing::trace!("Window factory ignores {}", event.qualified_name());
            }
        }
        Ok(())
    }

    /// Track enter/leave and return the window the event belongs to
    fn update_focus(&mut self, event: &WireEvent, name: &str, kind: FocusKind) -> Option<usize> {
        let surface = event.arg("surface").and_then(WireValue::as_object);
        let entered = match name {
            "enter" => surface.and_then(|s| self.window_index(|w| w.surface == s)),
            _ => None,
        };
        let slot = match kind {
            FocusKind::Pointer => &mut self.pointer_focus,
            FocusKind::Keyboard => &mut self.keyboard_focus,
        };
        match name {
            "enter" => {
                *slot = entered;
                entered
            }
            "leave" => slot.take(),
            _ => *slot,
        }
    }

    /// Destroy a window and its buffer
    pub async fn close(&mut self, client: &mut WireClient, id: WindowId) -> Result<()> {
        let window = self
            .windows
            .get_mut(id.0)
            .ok_or_else(|| Error::Internal(format!("no window {}", id.0)))?;
        if !window.open {
            return Ok(());
        }
        window.open = false;

        let objects = [
            Some(window.toplevel),
            Some(window.xdg_surface),
            window.buffer,
            window.pool,
            Some(window.surface),
        ];
        for object in objects.into_iter().flatten() {
            client.call(object, "destroy", vec![]).await?;
        }

        if self.pointer_focus == Some(id.0) {
            self.pointer_focus = None;
        }
        if self.keyboard_focus == Some(id.0) {
            self.keyboard_focus = None;
        }
        client.roundtrip().await
    }

    /// Close every window that is still open
    pub async fn close_all(&mut self, client: &mut WireClient) -> Result<()> {
        let open: Vec<WindowId> = self
            .windows
            .iter()
            .filter(|w| w.open)
            .map(|w| w.id)
            .collect();
        for id in open {
            self.close(client, id).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum FocusKind {
    Pointer,
    Keyboard,
}

fn uint_arg(event: &WireEvent, name: &str) -> u32 {
    event.arg(name).and_then(WireValue::as_uint).unwrap_or(0)
}

fn client_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Stride and total size of an ARGB buffer, rejecting sizes that overflow a pool
fn buffer_layout(width: i32, height: i32) -> Result<(i32, i32)> {
    width
        .checked_mul(BYTES_PER_PIXEL)
        .and_then(|stride| Some((stride, stride.checked_mul(height)?)))
        .ok_or_else(|| Error::protocol(format!("configure size {}x{} is too large", width, height)))
}

/// Anonymous shared memory of `size` bytes
fn shm_file(size: u64) -> Result<File> {
    use nix::sys::memfd::{memfd_create, MemFdCreateFlag};

    let fd = memfd_create(c"captest-shm", MemFdCreateFlag::MFD_CLOEXEC)
        .map_err(|e| Error::Io(e.into()))?;
    let file = File::from(fd);
    file.set_len(size)?;
    Ok(file)
}
