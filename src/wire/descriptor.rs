//! Machine-readable protocol schema
//!
//! The descriptor is a JSON document listing every interface with its
//! methods (requests) and events, each with an opcode and an ordered
//! argument list:
//!
//! ```json
//! { "interfaces": { "wl_display": {
//!     "methods": [{ "name": "sync", "opcode": 0, "ack": "done",
//!                   "args": [{ "name": "callback", "type": "new_id", "interface": "wl_callback" }] }],
//!     "events":  [{ "name": "delete_id", "opcode": 1, "args": [{ "name": "id", "type": "uint" }] }]
//! } } }
//! ```
//!
//! Once loaded it is immutable and shared behind an `Arc` by every client.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::common::{Error, Result};

/// Wire encoding of one argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgType {
    Int,
    Uint,
    Fixed,
    String,
    Object,
    NewId,
    Array,
    Fd,
}

/// One declared argument
#[derive(Debug, Clone, Deserialize)]
pub struct ArgSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ArgType,
    /// Interface of `object`/`new_id` arguments; an untyped `new_id`
    /// carries the interface name and version on the wire instead
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub allow_null: bool,
}

/// A method or an event
#[derive(Debug, Clone, Deserialize)]
pub struct MessageSpec {
    pub name: String,
    pub opcode: u16,
    #[serde(default)]
    pub args: Vec<ArgSpec>,
    /// The object is destroyed by this request
    #[serde(default)]
    pub destructor: bool,
    /// Event that acknowledges this request synchronously
    #[serde(default)]
    pub ack: Option<String>,
}

impl MessageSpec {
    /// Interface created by this message, if it has a typed `new_id` argument
    pub fn creates(&self) -> Option<&str> {
        self.args
            .iter()
            .find(|a| a.kind == ArgType::NewId)
            .and_then(|a| a.interface.as_deref())
    }

    /// Number of file descriptors travelling alongside this message
    pub fn fd_count(&self) -> usize {
        self.args.iter().filter(|a| a.kind == ArgType::Fd).count()
    }
}

#[derive(Debug, Deserialize)]
struct RawInterface {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default, alias = "requests")]
    methods: Vec<MessageSpec>,
    #[serde(default)]
    events: Vec<MessageSpec>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    interfaces: BTreeMap<String, RawInterface>,
}

/// Indexed view of one interface
#[derive(Debug)]
pub struct InterfaceSpec {
    pub name: String,
    pub version: u32,
    methods: BTreeMap<u16, MessageSpec>,
    events: BTreeMap<u16, MessageSpec>,
    method_names: HashMap<String, u16>,
    event_names: HashMap<String, u16>,
}

impl InterfaceSpec {
    fn build(name: String, raw: RawInterface) -> Result<Self> {
        let (methods, method_names) = index_messages(&name, "method", raw.methods)?;
        let (events, event_names) = index_messages(&name, "event", raw.events)?;
        Ok(Self {
            name,
            version: raw.version,
            methods,
            events,
            method_names,
            event_names,
        })
    }

    pub fn method(&self, name: &str) -> Option<&MessageSpec> {
        self.method_names.get(name).and_then(|op| self.methods.get(op))
    }

    pub fn method_by_opcode(&self, opcode: u16) -> Option<&MessageSpec> {
        self.methods.get(&opcode)
    }

    pub fn event(&self, name: &str) -> Option<&MessageSpec> {
        self.event_names.get(name).and_then(|op| self.events.get(op))
    }

    pub fn event_by_opcode(&self, opcode: u16) -> Option<&MessageSpec> {
        self.events.get(&opcode)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MessageSpec> {
        self.methods.values()
    }

    pub fn events(&self) -> impl Iterator<Item = &MessageSpec> {
        self.events.values()
    }
}

type MessageIndex = (BTreeMap<u16, MessageSpec>, HashMap<String, u16>);

fn index_messages(interface: &str, kind: &str, messages: Vec<MessageSpec>) -> Result<MessageIndex> {
    let mut by_opcode = BTreeMap::new();
    let mut by_name = HashMap::new();
    for message in messages {
        if by_name.insert(message.name.clone(), message.opcode).is_some() {
            return Err(Error::Descriptor(format!(
                "duplicate {} {}.{}",
                kind, interface, message.name
            )));
        }
        let opcode = message.opcode;
        if let Some(previous) = by_opcode.insert(opcode, message) {
            return Err(Error::Descriptor(format!(
                "{}.{} reuses {} opcode {}",
                interface, previous.name, kind, opcode
            )));
        }
    }
    Ok((by_opcode, by_name))
}

/// The whole protocol schema
#[derive(Debug)]
pub struct ProtocolDescriptor {
    interfaces: HashMap<String, InterfaceSpec>,
}

impl ProtocolDescriptor {
    /// Load and validate a descriptor file
    pub fn load(path: &Path) -> Result<Arc<Self>> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_json(&content).map(Arc::new)
    }

    /// Parse and validate a descriptor from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawDescriptor =
            serde_json::from_str(json).map_err(|e| Error::Descriptor(e.to_string()))?;

        let mut interfaces = HashMap::with_capacity(raw.interfaces.len());
        for (name, raw_interface) in raw.interfaces {
            let spec = InterfaceSpec::build(name.clone(), raw_interface)?;
            interfaces.insert(name, spec);
        }

        let descriptor = Self { interfaces };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Every typed `new_id` must name an interface we can instantiate,
    /// and `ack` must name an event that can actually arrive.
    fn validate(&self) -> Result<()> {
        for interface in self.interfaces.values() {
            for message in interface.methods().chain(interface.events()) {
                for arg in &message.args {
                    if arg.kind == ArgType::NewId {
                        if let Some(target) = &arg.interface {
                            if !self.interfaces.contains_key(target) {
                                return Err(Error::Descriptor(format!(
                                    "{}.{} creates unknown interface {}",
                                    interface.name, message.name, target
                                )));
                            }
                        }
                    }
                }
            }

            for method in interface.methods() {
                let Some(ack) = &method.ack else { continue };
                let acking = match method.creates() {
                    Some(created) => &self.interfaces[created],
                    None => interface,
                };
                if acking.event(ack).is_none() {
                    return Err(Error::Descriptor(format!(
                        "{}.{} is acknowledged by unknown event {}.{}",
                        interface.name, method.name, acking.name, ack
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn interface(&self, name: &str) -> Option<&InterfaceSpec> {
        self.interfaces.get(name)
    }

    /// Look up an interface, failing with a protocol error
    pub fn require(&self, name: &str) -> Result<&InterfaceSpec> {
        self.interface(name)
            .ok_or_else(|| Error::protocol(format!("interface {} is not in the descriptor", name)))
    }

    pub fn interface_names(&self) -> impl Iterator<Item = &str> {
        self.interfaces.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = r#"{
        "interfaces": {
            "wl_display": {
                "methods": [
                    { "name": "sync", "opcode": 0, "ack": "done",
                      "args": [{ "name": "callback", "type": "new_id", "interface": "wl_callback" }] }
                ],
                "events": [
                    { "name": "error", "opcode": 0, "args": [
                        { "name": "object_id", "type": "object" },
                        { "name": "code", "type": "uint" },
                        { "name": "message", "type": "string" } ] }
                ]
            },
            "wl_callback": {
                "events": [{ "name": "done", "opcode": 0, "args": [{ "name": "callback_data", "type": "uint" }] }]
            }
        }
    }"#;

    #[test]
    fn test_lookup_by_name_and_opcode() {
        let d = ProtocolDescriptor::from_json(SMALL).unwrap();
        let display = d.interface("wl_display").unwrap();
        let sync = display.method("sync").unwrap();
        assert_eq!(sync.opcode, 0);
        assert_eq!(sync.creates(), Some("wl_callback"));
        assert_eq!(display.event_by_opcode(0).unwrap().name, "error");
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn test_requests_alias() {
        let d = ProtocolDescriptor::from_json(
            r#"{ "interfaces": { "wl_buffer": {
                "requests": [{ "name": "destroy", "opcode": 0, "destructor": true }] } } }"#,
        )
        .unwrap();
        assert!(d.interface("wl_buffer").unwrap().method("destroy").unwrap().destructor);
    }

    #[test]
    fn test_duplicate_opcode_rejected() {
        let err = ProtocolDescriptor::from_json(
            r#"{ "interfaces": { "x": { "methods": [
                { "name": "a", "opcode": 0 }, { "name": "b", "opcode": 0 } ] } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Descriptor(_)));
    }

    #[test]
    fn test_unknown_arg_type_rejected() {
        let err = ProtocolDescriptor::from_json(
            r#"{ "interfaces": { "x": { "methods": [
                { "name": "a", "opcode": 0, "args": [{ "name": "v", "type": "double" }] } ] } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Descriptor(_)));
    }

    #[test]
    fn test_dangling_new_id_rejected() {
        let err = ProtocolDescriptor::from_json(
            r#"{ "interfaces": { "x": { "methods": [
                { "name": "make", "opcode": 0, "args": [{ "name": "id", "type": "new_id", "interface": "y" }] } ] } } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown interface y"));
    }

    #[test]
    fn test_missing_interfaces_key_rejected() {
        assert!(ProtocolDescriptor::from_json(r#"{ "wl_display": {} }"#).is_err());
    }
}
