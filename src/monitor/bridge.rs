//! Line-oriented client for the VM monitor
//!
//! The monitor protocol has no request ids, so a reply can only be matched
//! to the command written just before it. [`MonitorBridge`] keeps its
//! session behind a `tokio::sync::Mutex` and holds the guard across the
//! write and the read: a second caller waits until the first reply (or its
//! timeout) has been consumed.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::common::config::MonitorConfig;
use crate::common::{Error, Result};

use super::command::{key_for_char, MonitorCommand};

/// Per-bridge protocol settings
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub timeout: Duration,
    pub terminator: String,
    pub await_greeting: bool,
    pub error_prefixes: Vec<String>,
    /// One connection per command; the peer closes it after replying
    pub one_shot: bool,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for MonitorOptions {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            timeout: config.timeout(),
            terminator: config.terminator.clone(),
            await_greeting: config.await_greeting,
            error_prefixes: config.error_prefixes.clone(),
            one_shot: config.one_shot,
        }
    }
}

/// Reply to one command, prompt and echo removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReply {
    pub lines: Vec<String>,
}

impl MonitorReply {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// One open connection
struct MonitorSession {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    /// Commands written on this connection
    seq: u64,
    /// The peer hung up after its last reply
    closed: bool,
}

impl MonitorSession {
    async fn open(addr: &str, options: &MonitorOptions) -> Result<Self> {
        let stream = tokio::time::timeout(options.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::timeout(format!("connecting to monitor {}", addr), options.timeout))?
            .map_err(|e| Error::connection_failed(addr, e))?;
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        let mut session = Self {
            reader,
            writer,
            seq: 0,
            closed: false,
        };

        if options.await_greeting {
            let banner = session.read_reply(options).await?;
            tracing::debug!("Monitor greeting: {}", banner.trim());
        }
        Ok(session)
    }

    async fn exchange(&mut self, line: &str, options: &MonitorOptions) -> Result<String> {
        self.seq += 1;
        tracing::debug!("monitor #{} -> {}", self.seq, line);

        let mut framed = String::with_capacity(line.len() + 1);
        framed.push_str(line);
        framed.push('\n');
        self.writer
            .write_all(framed.as_bytes())
            .await
            .map_err(|e| Error::ConnectionClosed(format!("monitor write failed: {}", e)))?;

        let reply = self.read_reply(options).await?;
        tracing::debug!("monitor #{} <- {:?}", self.seq, reply);
        Ok(reply)
    }

    /// Read until the buffered output ends with the prompt
    ///
    /// A close after some output (or any close in one-shot mode) ends the
    /// reply; a close before any output means the command went unanswered.
    async fn read_reply(&mut self, options: &MonitorOptions) -> Result<String> {
        let deadline = Instant::now() + options.timeout;
        let terminator = options.terminator.as_bytes();
        let mut buf = Vec::new();

        loop {
            let mut chunk = [0u8; 1024];
            let n = match tokio::time::timeout_at(deadline, self.reader.read(&mut chunk)).await {
                Err(_) => return Err(Error::timeout("monitor reply", options.timeout)),
                Ok(Err(e)) => {
                    return Err(Error::ConnectionClosed(format!("monitor read failed: {}", e)))
                }
                Ok(Ok(0)) => {
                    self.closed = true;
                    if buf.is_empty() && !options.one_shot {
                        return Err(Error::ConnectionClosed(
                            "monitor closed the connection".to_string(),
                        ));
                    }
                    return Ok(String::from_utf8_lossy(&buf).into_owned());
                }
                Ok(Ok(n)) => n,
            };

            buf.extend_from_slice(&chunk[..n]);
            if buf.ends_with(terminator) {
                buf.truncate(buf.len() - terminator.len());
                return Ok(String::from_utf8_lossy(&buf).into_owned());
            }
        }
    }

    async fn shutdown(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!("Monitor shutdown: {}", e);
        }
    }
}

#[derive(Default)]
struct SessionSlot {
    session: Option<MonitorSession>,
    /// Keys pressed through `inject_key` and not yet released
    held: Vec<String>,
}

/// Command channel into the VM monitor
pub struct MonitorBridge {
    addr: String,
    options: MonitorOptions,
    slot: Mutex<SessionSlot>,
}

impl MonitorBridge {
    /// Open a session to the monitor at `host:port`
    pub async fn connect(host: &str, port: u16, options: MonitorOptions) -> Result<Self> {
        let addr = if host.contains(':') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        let session = MonitorSession::open(&addr, &options).await?;
        tracing::debug!("Connected to monitor at {}", addr);

        // A one-shot endpoint gets a fresh connection per command
        let session = if options.one_shot {
            session.shutdown().await;
            None
        } else {
            Some(session)
        };

        Ok(Self {
            addr,
            options,
            slot: Mutex::new(SessionSlot {
                session,
                held: Vec::new(),
            }),
        })
    }

    /// Connect using the `[monitor]` configuration section
    pub async fn from_config(config: &MonitorConfig) -> Result<Self> {
        Self::connect(&config.host, config.port, MonitorOptions::from(config)).await
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one command and wait for its reply
    pub async fn execute(&self, command: &MonitorCommand) -> Result<MonitorReply> {
        let line = command.to_line()?;
        let mut slot = self.slot.lock().await;
        self.execute_locked(&mut slot, &line).await
    }

    /// Run one command while the caller holds the session guard
    ///
    /// A close before any reply is answered by one reconnect and a replay
    /// of the same command. A timeout or an answered command is never
    /// replayed, since the command may have run.
    async fn execute_locked(&self, slot: &mut SessionSlot, line: &str) -> Result<MonitorReply> {
        let mut reconnected = false;
        loop {
            if slot.session.is_none() {
                slot.session = Some(MonitorSession::open(&self.addr, &self.options).await?);
            }
            let Some(session) = slot.session.as_mut() else {
                return Err(Error::Internal("monitor session missing".into()));
            };

            match session.exchange(line, &self.options).await {
                Ok(raw) => {
                    if self.options.one_shot || session.closed {
                        if let Some(session) = slot.session.take() {
                            session.shutdown().await;
                        }
                    }
                    return self.interpret(line, &raw);
                }
                Err(Error::ConnectionClosed(reason)) if !reconnected => {
                    tracing::warn!(
                        "Monitor connection lost ({}), reconnecting to {}",
                        reason,
                        self.addr
                    );
                    slot.session = None;
                    reconnected = true;
                }
                Err(e) => {
                    // The stream may still deliver a stale reply; start afresh next time
                    slot.session = None;
                    return Err(e);
                }
            }
        }
    }

    fn interpret(&self, line: &str, raw: &str) -> Result<MonitorReply> {
        let lines: Vec<String> = raw
            .lines()
            .map(|l| strip_escapes(l).trim().to_string())
            .filter(|l| !l.is_empty() && l != line)
            .collect();

        let rejected = lines.iter().any(|l| {
            self.options
                .error_prefixes
                .iter()
                .any(|prefix| l.starts_with(prefix.as_str()))
        });
        if rejected {
            return Err(Error::CommandRejected {
                command: line.to_string(),
                reply: lines.join("\n"),
            });
        }
        Ok(MonitorReply { lines })
    }

    /// Press or release `key`
    ///
    /// The monitor only knows atomic press-and-release chords, so a press
    /// sends the chord of every held key plus `key`, and a release only
    /// updates the held set.
    pub async fn inject_key(&self, key: &str, pressed: bool) -> Result<MonitorReply> {
        let mut slot = self.slot.lock().await;
        if !pressed {
            slot.held.retain(|k| k != key);
            return Ok(MonitorReply::default());
        }

        let mut keys = slot.held.clone();
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
        let line = MonitorCommand::SendKey {
            keys: keys.clone(),
            hold_ms: None,
        }
        .to_line()?;

        let reply = self.execute_locked(&mut slot, &line).await?;
        slot.held = keys;
        Ok(reply)
    }

    /// Move the pointer by `(x, y)`
    pub async fn inject_mouse_move(&self, x: i32, y: i32) -> Result<MonitorReply> {
        self.execute(&MonitorCommand::MouseMove { dx: x, dy: y }).await
    }

    /// Set the pressed mouse button mask
    pub async fn inject_mouse_button(&self, mask: u32) -> Result<MonitorReply> {
        self.execute(&MonitorCommand::MouseButton { mask }).await
    }

    /// Type `text` one key chord at a time
    pub async fn send_keys(&self, text: &str) -> Result<()> {
        for c in text.chars() {
            let keys = key_for_char(c).ok_or_else(|| Error::CommandRejected {
                command: format!("send_keys {:?}", text),
                reply: format!("no key for character {:?}", c),
            })?;
            self.execute(&MonitorCommand::SendKey {
                keys: keys.into_iter().map(str::to_string).collect(),
                hold_ms: None,
            })
            .await?;
        }
        Ok(())
    }

    /// Close the session; later commands reconnect
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        slot.held.clear();
        if let Some(session) = slot.session.take() {
            tracing::debug!("Closing monitor session after {} commands", session.seq);
            session.shutdown().await;
        }
    }
}

impl std::fmt::Debug for MonitorBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorBridge")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

/// Drop ANSI escape sequences the monitor uses for line editing
fn strip_escapes(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            if chars.next() == Some('[') {
                for c in chars.by_ref() {
                    if c.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}
