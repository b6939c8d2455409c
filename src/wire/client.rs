//! Generic wire protocol client
//!
//! Marshals requests and demarshals events against a [`ProtocolDescriptor`]
//! instead of generated bindings. The client is single-threaded and
//! cooperative: every operation takes `&mut self`, reads happen only while
//! a caller awaits [`WireClient::call`] or [`WireClient::poll_events`], and
//! events that arrive while a call waits for its acknowledgement are
//! buffered for the next poll.

use std::collections::{HashMap, HashSet, VecDeque};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::time::Instant;

use crate::common::{Error, Result};

use super::codec::{self, Fixed, FrameHeader, PayloadReader, PayloadWriter};
use super::descriptor::{ArgSpec, ArgType, MessageSpec, ProtocolDescriptor};
use super::transport::{WireSocket, RECV_CHUNK};

/// Id of the display singleton that exists from the moment of connection
pub const DISPLAY_ID: u32 = 1;

/// Interface name of the display singleton
pub const DISPLAY_INTERFACE: &str = "wl_display";

/// Session-scoped object id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live protocol object owned by one client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireObject {
    pub id: ObjectId,
    pub interface: String,
    pub version: u32,
}

/// Argument supplied to a request
#[derive(Debug)]
pub enum WireArg<'a> {
    Int(i32),
    Uint(u32),
    Fixed(Fixed),
    Str(Option<&'a str>),
    Array(&'a [u8]),
    Object(Option<ObjectId>),
    /// An object made earlier with [`WireClient::create_object`]
    NewId(ObjectId),
    /// Allocate the new object while marshalling (see [`WireClient::call_new`])
    New,
    Fd(BorrowedFd<'a>),
}

/// Argument received with an event
#[derive(Debug)]
pub enum WireValue {
    Int(i32),
    Uint(u32),
    Fixed(Fixed),
    Str(Option<String>),
    Array(Vec<u8>),
    Object(Option<ObjectId>),
    NewId(ObjectId),
    Fd(OwnedFd),
}

impl WireValue {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            WireValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u32> {
        match self {
            WireValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WireValue::Fixed(v) => Some(v.to_f64()),
            WireValue::Int(v) => Some(f64::from(*v)),
            WireValue::Uint(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::Str(v) => v.as_deref(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            WireValue::Object(v) => *v,
            WireValue::NewId(v) => Some(*v),
            _ => None,
        }
    }
}

/// One demarshalled event
#[derive(Debug)]
pub struct WireEvent {
    pub object: ObjectId,
    pub interface: String,
    pub name: String,
    pub args: Vec<(String, WireValue)>,
}

impl WireEvent {
    /// Look up an argument by its declared name
    pub fn arg(&self, name: &str) -> Option<&WireValue> {
        self.args.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// `interface.event`, the form tests filter on
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.interface, self.name)
    }

    pub fn is(&self, interface: &str, name: &str) -> bool {
        self.interface == interface && self.name == name
    }
}

/// Finite batch of events returned by one poll
#[derive(Debug, Default)]
pub struct EventBatch {
    events: std::vec::IntoIter<WireEvent>,
}

impl EventBatch {
    fn new(events: Vec<WireEvent>) -> Self {
        Self {
            events: events.into_iter(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.len() == 0
    }
}

impl Iterator for EventBatch {
    type Item = WireEvent;

    fn next(&mut self) -> Option<WireEvent> {
        self.events.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.events.size_hint()
    }
}

impl ExactSizeIterator for EventBatch {}

/// Result of a request
#[derive(Debug, Default)]
pub struct CallReply {
    /// Object created by the request, if it had a `new_id` argument
    pub created: Option<ObjectId>,
    /// The acknowledging event, for requests that declare one
    pub ack: Option<WireEvent>,
}

/// A global advertised through the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub name: u32,
    pub interface: String,
    pub version: u32,
}

/// Client tuning knobs
#[derive(Debug, Clone)]
pub struct WireOptions {
    /// How long a call waits for its acknowledgement
    pub call_timeout: Duration,
}

impl Default for WireOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Generic wire protocol session
pub struct WireClient {
    socket: WireSocket,
    descriptor: Arc<ProtocolDescriptor>,
    options: WireOptions,
    /// Live objects by id
    objects: HashMap<u32, WireObject>,
    /// Ids destroyed on our side; events for them may still be in flight
    retired: HashSet<u32>,
    /// Next client-side id; never reused within the session
    next_id: u32,
    inbuf: Vec<u8>,
    in_fds: VecDeque<OwnedFd>,
    /// Events read while waiting for an acknowledgement
    pending: VecDeque<WireEvent>,
    /// Reason the session died, once a fatal error occurred
    failed: Option<String>,
    registry: Option<ObjectId>,
    globals: Vec<Global>,
}

impl WireClient {
    /// Connect to the compositor socket at `path`
    pub async fn connect(
        path: &Path,
        descriptor: Arc<ProtocolDescriptor>,
        options: WireOptions,
    ) -> Result<Self> {
        let socket = WireSocket::connect(path)
            .await
            .map_err(|e| Error::connection_failed(path.display().to_string(), e))?;
        tracing::debug!("Connected to {}", path.display());
        Ok(Self::with_socket(socket, descriptor, options))
    }

    /// Run a session over an already connected stream
    pub fn from_stream(
        stream: UnixStream,
        descriptor: Arc<ProtocolDescriptor>,
        options: WireOptions,
    ) -> Self {
        Self::with_socket(WireSocket::from_stream(stream), descriptor, options)
    }

    fn with_socket(
        socket: WireSocket,
        descriptor: Arc<ProtocolDescriptor>,
        options: WireOptions,
    ) -> Self {
        let mut objects = HashMap::new();
        if let Some(display) = descriptor.interface(DISPLAY_INTERFACE) {
            objects.insert(
                DISPLAY_ID,
                WireObject {
                    id: ObjectId(DISPLAY_ID),
                    interface: display.name.clone(),
                    version: display.version,
                },
            );
        }

        Self {
            socket,
            descriptor,
            options,
            objects,
            retired: HashSet::new(),
            next_id: DISPLAY_ID + 1,
            inbuf: Vec::with_capacity(RECV_CHUNK),
            in_fds: VecDeque::new(),
            pending: VecDeque::new(),
            failed: None,
            registry: None,
            globals: Vec::new(),
        }
    }

    /// The display singleton
    pub fn display(&self) -> ObjectId {
        ObjectId(DISPLAY_ID)
    }

    pub fn descriptor(&self) -> &Arc<ProtocolDescriptor> {
        &self.descriptor
    }

    /// Look up a live object
    pub fn object(&self, id: ObjectId) -> Option<&WireObject> {
        self.objects.get(&id.0)
    }

    /// Whether a fatal protocol error ended this session
    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    fn ensure_open(&self) -> Result<()> {
        match &self.failed {
            Some(reason) => Err(Error::SessionClosed(reason.clone())),
            None => Ok(()),
        }
    }

    /// Record a fatal error; the session refuses all further work
    fn fail(&mut self, error: Error) -> Error {
        if error.is_fatal_for_session() && self.failed.is_none() {
            tracing::warn!("Wire session failed: {}", error);
            self.failed = Some(error.to_string());
        }
        error
    }

    /// Allocate a new object of `interface` at version 1
    pub fn create_object(&mut self, interface: &str) -> Result<WireObject> {
        self.create_object_versioned(interface, 1)
    }

    /// Allocate a new object id for `interface`
    ///
    /// The object exists locally as soon as this returns; it becomes known
    /// to the peer when it is passed as a `new_id` argument.
    pub fn create_object_versioned(&mut self, interface: &str, version: u32) -> Result<WireObject> {
        let spec = self.descriptor.require(interface)?;
        let id = self.next_id;
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| Error::protocol("client object ids exhausted"))?;

        let object = WireObject {
            id: ObjectId(id),
            interface: spec.name.clone(),
            version,
        };
        self.objects.insert(id, object.clone());
        Ok(object)
    }

    /// Send a request and, if it declares an acknowledgement, wait for it
    pub async fn call(
        &mut self,
        object: ObjectId,
        method: &str,
        args: Vec<WireArg<'_>>,
    ) -> Result<CallReply> {
        self.ensure_open()?;

        let target = self
            .objects
            .get(&object.0)
            .cloned()
            .ok_or(Error::UnknownObject(object.0))?;
        let descriptor = Arc::clone(&self.descriptor);
        let spec = descriptor
            .require(&target.interface)?
            .method(method)
            .ok_or_else(|| {
                Error::protocol(format!("{} has no method {}", target.interface, method))
            })?;

        let (payload, fds, created) = self.marshal(&target, spec, args)?;
        let message = codec::encode_message(object.0, spec.opcode, &payload)?;

        tracing::debug!(
            target: "captest::wire",
            " -> {}@{}.{} ({} bytes, {} fds)",
            target.interface,
            object,
            method,
            message.len(),
            fds.len()
        );

        if let Err(e) = self.socket.send(&message, &fds).await {
            return Err(self.fail(Error::ConnectionClosed(format!(
                "write of {}.{} failed: {}",
                target.interface, method, e
            ))));
        }

        if spec.destructor {
            self.objects.remove(&object.0);
            self.retired.insert(object.0);
        }

        let ack = match &spec.ack {
            Some(event) => {
                let on = created.unwrap_or(object);
                let deadline = Instant::now() + self.options.call_timeout;
                Some(self.wait_for(on, event, deadline).await?)
            }
            None => None,
        };

        Ok(CallReply { created, ack })
    }

    /// Create a new object through `method`, filling the [`WireArg::New`] slot
    pub async fn call_new(
        &mut self,
        object: ObjectId,
        method: &str,
        args: Vec<WireArg<'_>>,
    ) -> Result<ObjectId> {
        let reply = self.call(object, method, args).await?;
        reply
            .created
            .ok_or_else(|| Error::protocol(format!("{} does not create an object", method)))
    }

    fn marshal(
        &mut self,
        target: &WireObject,
        spec: &MessageSpec,
        args: Vec<WireArg<'_>>,
    ) -> Result<(Vec<u8>, Vec<RawFd>, Option<ObjectId>)> {
        if args.len() != spec.args.len() {
            return Err(Error::protocol(format!(
                "{}.{} takes {} arguments, got {}",
                target.interface,
                spec.name,
                spec.args.len(),
                args.len()
            )));
        }

        let mut writer = PayloadWriter::new();
        let mut fds = Vec::new();
        let mut created = None;

        for (arg_spec, arg) in spec.args.iter().zip(args) {
            let mismatch = |arg: &WireArg<'_>| {
                Error::protocol(format!(
                    "{}.{} argument {} expects {:?}, got {:?}",
                    target.interface, spec.name, arg_spec.name, arg_spec.kind, arg
                ))
            };

            match (arg_spec.kind, arg) {
                (ArgType::Int, WireArg::Int(v)) => writer.put_int(v),
                (ArgType::Uint, WireArg::Uint(v)) => writer.put_uint(v),
                (ArgType::Fixed, WireArg::Fixed(v)) => writer.put_fixed(v),
                (ArgType::String, WireArg::Str(v)) => {
                    if v.is_none() && !arg_spec.allow_null {
                        return Err(self.null_error(target, spec, arg_spec));
                    }
                    writer.put_string(v);
                }
                (ArgType::Array, WireArg::Array(v)) => writer.put_array(v),
                (ArgType::Object, WireArg::Object(v)) => match v {
                    None if arg_spec.allow_null => writer.put_uint(0),
                    None => return Err(self.null_error(target, spec, arg_spec)),
                    Some(id) => {
                        let referenced = self
                            .objects
                            .get(&id.0)
                            .ok_or(Error::UnknownObject(id.0))?;
                        if let Some(expected) = &arg_spec.interface {
                            if &referenced.interface != expected {
                                return Err(Error::protocol(format!(
                                    "{}.{} argument {} must be a {}, got {}@{}",
                                    target.interface,
                                    spec.name,
                                    arg_spec.name,
                                    expected,
                                    referenced.interface,
                                    id
                                )));
                            }
                        }
                        writer.put_uint(id.0);
                    }
                },
                (ArgType::NewId, WireArg::NewId(id)) => {
                    let object = self
                        .objects
                        .get(&id.0)
                        .cloned()
                        .ok_or(Error::UnknownObject(id.0))?;
                    self.put_new_id(&mut writer, target, spec, arg_spec, &object)?;
                    created = Some(id);
                }
                (ArgType::NewId, WireArg::New) => {
                    let interface = arg_spec.interface.clone().ok_or_else(|| {
                        Error::protocol(format!(
                            "{}.{} creates an untyped object; use create_object",
                            target.interface, spec.name
                        ))
                    })?;
                    let object = self.create_object_versioned(&interface, target.version)?;
                    self.put_new_id(&mut writer, target, spec, arg_spec, &object)?;
                    created = Some(object.id);
                }
                (ArgType::Fd, WireArg::Fd(fd)) => fds.push(fd.as_raw_fd()),
                (_, other) => return Err(mismatch(&other)),
            }
        }

        Ok((writer.into_inner(), fds, created))
    }

    fn put_new_id(
        &self,
        writer: &mut PayloadWriter,
        target: &WireObject,
        spec: &MessageSpec,
        arg_spec: &ArgSpec,
        object: &WireObject,
    ) -> Result<()> {
        match &arg_spec.interface {
            Some(expected) if expected != &object.interface => Err(Error::protocol(format!(
                "{}.{} creates a {}, got {}@{}",
                target.interface, spec.name, expected, object.interface, object.id
            ))),
            Some(_) => {
                writer.put_uint(object.id.0);
                Ok(())
            }
            None => {
                // Untyped new_id: interface name and version precede the id
                writer.put_string(Some(&object.interface));
                writer.put_uint(object.version);
                writer.put_uint(object.id.0);
                Ok(())
            }
        }
    }

    fn null_error(&self, target: &WireObject, spec: &MessageSpec, arg: &ArgSpec) -> Error {
        Error::protocol(format!(
            "{}.{} argument {} is not nullable",
            target.interface, spec.name, arg.name
        ))
    }

    /// Collect the events that arrive within `timeout`
    ///
    /// Never waits past `timeout`; when nothing arrives the batch is
    /// empty. Buffered events are returned without waiting at all.
    pub async fn poll_events(&mut self, timeout: Duration) -> Result<EventBatch> {
        self.ensure_open()?;

        if self.pending.is_empty() {
            let deadline = Instant::now() + timeout;
            self.read_until(deadline).await?;
        }
        // Drain whatever else is already readable, without waiting
        while self.read_until(Instant::now()).await? {}

        Ok(EventBatch::new(self.pending.drain(..).collect()))
    }

    /// Wait until `object` emits `event`, keeping other events queued
    pub async fn wait_for(
        &mut self,
        object: ObjectId,
        event: &str,
        deadline: Instant,
    ) -> Result<WireEvent> {
        loop {
            if let Some(pos) = self
                .pending
                .iter()
                .position(|e| e.object == object && e.name == event)
            {
                if let Some(found) = self.pending.remove(pos) {
                    return Ok(found);
                }
            }

            if Instant::now() >= deadline || !self.read_until(deadline).await? {
                return Err(Error::timeout(
                    format!("waiting for {}.{}", object, event),
                    self.options.call_timeout,
                ));
            }
        }
    }

    /// Read and dispatch at least one message, unless `deadline` passes first
    ///
    /// Returns whether anything was dispatched.
    async fn read_until(&mut self, deadline: Instant) -> Result<bool> {
        let mut dispatched = self.dispatch_buffered()?;
        if dispatched {
            return Ok(true);
        }

        loop {
            let mut chunk = [0u8; RECV_CHUNK];
            let read = tokio::time::timeout_at(
                deadline,
                self.socket.recv(&mut chunk, &mut self.in_fds),
            )
            .await;

            let n = match read {
                Err(_) => return Ok(dispatched),
                Ok(Err(e)) => {
                    return Err(self.fail(Error::ConnectionClosed(format!(
                        "read from compositor failed: {}",
                        e
                    ))))
                }
                Ok(Ok(0)) => {
                    let err = Error::SessionClosed("compositor closed the connection".into());
                    return Err(self.fail(err));
                }
                Ok(Ok(n)) => n,
            };

            self.inbuf.extend_from_slice(&chunk[..n]);
            dispatched |= self.dispatch_buffered()?;
            if dispatched {
                return Ok(true);
            }
        }
    }

    /// Decode every complete message in the input buffer
    fn dispatch_buffered(&mut self) -> Result<bool> {
        let mut any = false;
        loop {
            let frame = match codec::take_frame(&mut self.inbuf) {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(any),
                Err(e) => return Err(self.fail(e)),
            };
            any = true;

            match self.demarshal(frame.0, &frame.1) {
                Ok(Some(event)) => self.pending.push_back(event),
                Ok(None) => {}
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    fn demarshal(&mut self, header: FrameHeader, payload: &[u8]) -> Result<Option<WireEvent>> {
        let Some(target) = self.objects.get(&header.object).cloned() else {
            if self.retired.contains(&header.object) {
                tracing::trace!(
                    target: "captest::wire",
                    "dropping event {} for destroyed object {}",
                    header.opcode,
                    header.object
                );
                return Ok(None);
            }
            return Err(Error::UnknownObject(header.object));
        };

        let descriptor = Arc::clone(&self.descriptor);
        let interface = descriptor.require(&target.interface)?;
        let spec = interface
            .event_by_opcode(header.opcode)
            .ok_or_else(|| Error::UnknownOpcode {
                interface: target.interface.clone(),
                opcode: header.opcode,
            })?;

        let mut reader = PayloadReader::new(payload);
        let mut args = Vec::with_capacity(spec.args.len());
        for arg in &spec.args {
            let value = match arg.kind {
                ArgType::Int => WireValue::Int(reader.get_int()?),
                ArgType::Uint => WireValue::Uint(reader.get_uint()?),
                ArgType::Fixed => WireValue::Fixed(reader.get_fixed()?),
                ArgType::String => WireValue::Str(reader.get_string()?),
                ArgType::Array => WireValue::Array(reader.get_array()?),
                ArgType::Object => {
                    let id = reader.get_uint()?;
                    if id == 0 || self.retired.contains(&id) {
                        WireValue::Object(None)
                    } else if self.objects.contains_key(&id) {
                        WireValue::Object(Some(ObjectId(id)))
                    } else {
                        return Err(Error::UnknownObject(id));
                    }
                }
                ArgType::NewId => {
                    let created = arg.interface.as_deref().ok_or_else(|| {
                        Error::protocol(format!(
                            "{}.{} sends an untyped new_id",
                            target.interface, spec.name
                        ))
                    })?;
                    let id = reader.get_uint()?;
                    self.objects.insert(
                        id,
                        WireObject {
                            id: ObjectId(id),
                            interface: created.to_string(),
                            version: target.version,
                        },
                    );
                    WireValue::NewId(ObjectId(id))
                }
                ArgType::Fd => {
                    let fd = self.in_fds.pop_front().ok_or_else(|| {
                        Error::protocol(format!(
                            "{}.{} expects a file descriptor, none received",
                            target.interface, spec.name
                        ))
                    })?;
                    WireValue::Fd(fd)
                }
            };
            args.push((arg.name.clone(), value));
        }

        if reader.remaining() != 0 {
            return Err(Error::protocol(format!(
                "{}.{} has {} trailing bytes",
                target.interface,
                spec.name,
                reader.remaining()
            )));
        }

        tracing::debug!(
            target: "captest::wire",
            " <- {}@{}.{}",
            target.interface,
            header.object,
            spec.name
        );

        let event = WireEvent {
            object: target.id,
            interface: target.interface,
            name: spec.name.clone(),
            args,
        };

        if event.object.0 == DISPLAY_ID && event.interface == DISPLAY_INTERFACE {
            return self.display_event(event);
        }
        Ok(Some(event))
    }

    /// Errors and id release notifications from the display singleton
    fn display_event(&mut self, event: WireEvent) -> Result<Option<WireEvent>> {
        match event.name.as_str() {
            "error" => {
                let object = event
                    .arg("object_id")
                    .and_then(WireValue::as_object)
                    .map_or(0, |id| id.0);
                let interface = self
                    .objects
                    .get(&object)
                    .map_or_else(|| "unknown".to_string(), |o| o.interface.clone());
                Err(Error::CompositorError {
                    object,
                    interface,
                    code: event.arg("code").and_then(WireValue::as_uint).unwrap_or(0),
                    message: event
                        .arg("message")
                        .and_then(WireValue::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            }
            "delete_id" => {
                if let Some(id) = event.arg("id").and_then(WireValue::as_uint) {
                    if self.objects.remove(&id).is_some() {
                        self.retired.insert(id);
                    }
                }
                Ok(None)
            }
            _ => Ok(Some(event)),
        }
    }

    /// Block until the compositor has processed every request sent so far
    pub async fn roundtrip(&mut self) -> Result<()> {
        let display = self.display();
        self.call(display, "sync", vec![WireArg::New]).await?;
        Ok(())
    }

    /// Globals advertised by the compositor, fetched once per session
    pub async fn globals(&mut self) -> Result<&[Global]> {
        if self.registry.is_none() {
            let display = self.display();
            let registry = self
                .call_new(display, "get_registry", vec![WireArg::New])
                .await?;
            self.registry = Some(registry);
            self.roundtrip().await?;

            let mut keep = VecDeque::with_capacity(self.pending.len());
            for event in self.pending.drain(..) {
                if event.object == registry && event.name == "global" {
                    self.globals.push(Global {
                        name: event.arg("name").and_then(WireValue::as_uint).unwrap_or(0),
                        interface: event
                            .arg("interface")
                            .and_then(WireValue::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        version: event.arg("version").and_then(WireValue::as_uint).unwrap_or(1),
                    });
                } else {
                    keep.push_back(event);
                }
            }
            self.pending = keep;
        }
        Ok(&self.globals)
    }

    /// Bind the first advertised global of `interface`
    ///
    /// The bound version is the lower of `max_version` and what the
    /// compositor advertises.
    pub async fn bind(&mut self, interface: &str, max_version: u32) -> Result<ObjectId> {
        let global = self
            .globals()
            .await?
            .iter()
            .find(|g| g.interface == interface)
            .cloned()
            .ok_or_else(|| Error::GlobalMissing(interface.to_string()))?;
        let registry = self
            .registry
            .ok_or_else(|| Error::Internal("registry missing after globals()".into()))?;

        let version = global.version.min(max_version);
        let object = self.create_object_versioned(interface, version)?;
        self.call(
            registry,
            "bind",
            vec![WireArg::Uint(global.name), WireArg::NewId(object.id)],
        )
        .await?;
        Ok(object.id)
    }
}

impl std::fmt::Debug for WireClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireClient")
            .field("objects", &self.objects.len())
            .field("next_id", &self.next_id)
            .field("pending", &self.pending.len())
            .field("failed", &self.failed)
            .finish()
    }
}
