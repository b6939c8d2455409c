//! Session bus browsing for `dbus-list`
//!
//! The bus forms a tree: service name, object path, interface, members.
//! Each extra segment on the command line descends one level.

use zbus::fdo::{DBusProxy, IntrospectableProxy};
use zbus::Connection;

use crate::common::{Error, Result};

const TYPE_LEGEND: &[&str] = &[
    "b = boolean",
    "u = unsigned number",
    "s = string",
    "o = dbus object path (string)",
    "v = dynamic type",
    "ax = array of x",
    "{xy} = map from x to y",
    "(xyz) = tuple with xyz as members",
];

/// Typed name pair from an `<arg>` or `<property>` element
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub signature: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodDoc {
    pub name: String,
    pub inputs: Vec<Member>,
    pub outputs: Vec<Member>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterfaceDoc {
    pub name: String,
    pub methods: Vec<MethodDoc>,
    pub properties: Vec<Member>,
}

/// The parts of one object's introspection data that `dbus-list` prints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Introspection {
    /// Names of the direct child nodes
    pub nodes: Vec<String>,
    pub interfaces: Vec<InterfaceDoc>,
}

impl Introspection {
    /// Parse an introspection XML document
    ///
    /// Only the root node's own interfaces are collected; anything inlined
    /// inside child nodes is skipped.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut out = Introspection::default();
        let mut depth = 0usize;
        let mut interface: Option<InterfaceDoc> = None;
        let mut method: Option<MethodDoc> = None;
        let mut rest = xml;

        while let Some(start) = rest.find('<') {
            rest = &rest[start..];
            if let Some(body) = rest.strip_prefix("<!--") {
                let end = body
                    .find("-->")
                    .ok_or_else(|| Error::protocol("unterminated comment in introspection data"))?;
                rest = &body[end + 3..];
                continue;
            }
            let end = rest
                .find('>')
                .ok_or_else(|| Error::protocol("unterminated tag in introspection data"))?;
            let tag = &rest[1..end];
            rest = &rest[end + 1..];
            if tag.starts_with('?') || tag.starts_with('!') {
                continue;
            }

            if let Some(closing) = tag.strip_prefix('/') {
                match closing.trim() {
                    "node" => depth = depth.saturating_sub(1),
                    "method" if depth == 1 => {
                        if let (Some(m), Some(i)) = (method.take(), interface.as_mut()) {
                            i.methods.push(m);
                        }
                    }
                    "interface" if depth == 1 => out.interfaces.extend(interface.take()),
                    _ => {}
                }
                continue;
            }

            let self_closing = tag.ends_with('/');
            let tag = tag.trim_end_matches('/');
            let (element, attrs) = tag.split_once(char::is_whitespace).unwrap_or((tag, ""));
            let name = attribute(attrs, "name").unwrap_or_default();

            if element == "node" {
                depth += 1;
                if depth == 2 && !name.is_empty() {
                    out.nodes.push(name);
                }
                if self_closing {
                    depth -= 1;
                }
                continue;
            }
            if depth != 1 {
                continue;
            }
            match element {
                "interface" => {
                    let doc = InterfaceDoc { name, ..Default::default() };
                    if self_closing {
                        out.interfaces.push(doc);
                    } else {
                        interface = Some(doc);
                    }
                }
                "method" => {
                    let doc = MethodDoc { name, ..Default::default() };
                    match (self_closing, interface.as_mut()) {
                        (true, Some(i)) => i.methods.push(doc),
                        (false, _) => method = Some(doc),
                        _ => {}
                    }
                }
                "arg" => {
                    if let Some(m) = method.as_mut() {
                        let member = Member {
                            name,
                            signature: attribute(attrs, "type").unwrap_or_default(),
                        };
                        // Method args default to input
                        match attribute(attrs, "direction").as_deref() {
                            Some("out") => m.outputs.push(member),
                            _ => m.inputs.push(member),
                        }
                    }
                }
                "property" => {
                    if let Some(i) = interface.as_mut() {
                        i.properties.push(Member {
                            name,
                            signature: attribute(attrs, "type").unwrap_or_default(),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(out)
    }

    pub fn interface(&self, name: &str) -> Option<&InterfaceDoc> {
        self.interfaces.iter().find(|i| i.name == name)
    }
}

/// Value of `key="..."` (or single-quoted) in an element's attribute text
fn attribute(attrs: &str, key: &str) -> Option<String> {
    let mut rest = attrs;
    loop {
        rest = rest.trim_start();
        let (name, after) = rest.split_once('=')?;
        let after = after.trim_start();
        let quote = after.chars().next()?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        let value_end = after[1..].find(quote)? + 1;
        if name.trim() == key {
            return Some(unescape(&after[1..value_end]));
        }
        rest = &after[value_end + 1..];
    }
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Lines describing one interface: type legend, methods, then properties
pub fn describe_interface(interface: &InterfaceDoc) -> Vec<String> {
    let mut lines = vec!["The letters after the names below specify the type of the name:".to_string(), String::new()];
    lines.extend(TYPE_LEGEND.iter().map(|l| l.to_string()));
    lines.push(String::new());
    lines.push("See https://dbus.freedesktop.org/doc/dbus-specification.html#type-system for a full explanation.".to_string());
    lines.push(String::new());

    lines.push("# Methods:".to_string());
    lines.push(String::new());
    for method in &interface.methods {
        lines.push(method.name.clone());
        for arg in &method.inputs {
            lines.push(format!("  input {} {}", arg.name, arg.signature));
        }
        for arg in &method.outputs {
            lines.push(format!("  output {} {}", arg.name, arg.signature));
        }
    }

    lines.push(String::new());
    lines.push("# Properties:".to_string());
    lines.push(String::new());
    for property in &interface.properties {
        lines.push(format!("{} {}", property.name, property.signature));
    }
    lines
}

/// Well-known names, sorted, without the `:1.23` unique connection names
pub fn visible_names(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut names: Vec<String> = names.into_iter().filter(|n| !n.starts_with(':')).collect();
    names.sort();
    names
}

async fn introspect(connection: &Connection, service: &str, path: &str) -> Result<Introspection> {
    let proxy = IntrospectableProxy::builder(connection)
        .destination(service)?
        .path(path)?
        .build()
        .await?;
    let xml = proxy.introspect().await.map_err(zbus::Error::from)?;
    Introspection::parse(&xml)
}

/// Object paths under `service` that have no children, sorted
async fn leaf_paths(connection: &Connection, service: &str) -> Result<Vec<String>> {
    let mut leaves = Vec::new();
    let mut pending = vec![String::new()];
    while let Some(path) = pending.pop() {
        let object = if path.is_empty() { "/" } else { path.as_str() };
        let data = introspect(connection, service, object).await?;
        if data.nodes.is_empty() {
            leaves.push(path);
        } else {
            pending.extend(data.nodes.iter().map(|node| format!("{}/{}", path, node)));
        }
    }
    leaves.sort();
    Ok(leaves)
}

/// Lines to print for `dbus-list` with the given path segments
pub async fn list(segments: &[String]) -> Result<Vec<String>> {
    let connection = Connection::session().await?;
    match segments {
        [] => {
            let names = DBusProxy::new(&connection)
                .await?
                .list_names()
                .await
                .map_err(zbus::Error::from)?;
            Ok(visible_names(names.into_iter().map(|n| n.to_string())))
        }
        [service] => leaf_paths(&connection, service).await,
        [service, path] => {
            let mut names: Vec<String> = introspect(&connection, service, path)
                .await?
                .interfaces
                .into_iter()
                .map(|i| i.name)
                .collect();
            names.sort();
            Ok(names)
        }
        [service, path, interface] => {
            let data = introspect(&connection, service, path).await?;
            Ok(data
                .interface(interface)
                .map(describe_interface)
                .unwrap_or_default())
        }
        _ => Err(Error::Config(
            "dbus-list takes at most a service, an object path and an interface".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG_CONTROL: &str = r#"<!DOCTYPE node PUBLIC "-//freedesktop//DTD D-BUS Object Introspection 1.0//EN"
 "http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd">
<node>
 <!-- generated -->
 <interface name="org.freedesktop.DBus.Peer">
  <method name="Ping"/>
  <method name="GetMachineId">
   <arg type="s" name="machine_uuid" direction="out"/>
  </method>
 </interface>
 <interface name="org.freedesktop.LogControl1">
  <method name="SetLevel">
   <arg name="level" type="s"/>
   <arg name="ok" type="b" direction="out"/>
  </method>
  <signal name="Changed">
   <arg name="what" type="s"/>
  </signal>
  <property name="LogLevel" type="s" access="readwrite"/>
  <property name="Targets" type='a{sv}' access="read"/>
 </interface>
 <node name="unit"/>
 <node name="job">
  <interface name="org.example.Hidden"/>
 </node>
</node>
"#;

    #[test]
    fn test_parse_introspection() {
        let data = Introspection::parse(LOG_CONTROL).unwrap();
        assert_eq!(data.nodes, vec!["unit", "job"]);
        let names: Vec<&str> = data.interfaces.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["org.freedesktop.DBus.Peer", "org.freedesktop.LogControl1"]);

        let peer = data.interface("org.freedesktop.DBus.Peer").unwrap();
        assert_eq!(peer.methods.len(), 2);
        assert_eq!(peer.methods[1].outputs[0].name, "machine_uuid");

        let log = data.interface("org.freedesktop.LogControl1").unwrap();
        assert_eq!(log.methods.len(), 1);
        assert_eq!(log.methods[0].inputs, vec![Member { name: "level".into(), signature: "s".into() }]);
        assert_eq!(log.properties[1].signature, "a{sv}");
        assert!(data.interface("org.example.Hidden").is_none());
    }

    #[test]
    fn test_parse_rejects_truncated_xml() {
        assert!(Introspection::parse("<node><interface name=\"x\"").is_err());
        assert!(Introspection::parse("<node><!-- never closed").is_err());
    }

    #[test]
    fn test_attribute_unescapes() {
        assert_eq!(attribute(r#"name="a&amp;b" type="s""#, "type").as_deref(), Some("s"));
        assert_eq!(attribute(r#"name="a&amp;b""#, "name").as_deref(), Some("a&b"));
        assert_eq!(attribute("name=bare", "name"), None);
    }

    #[test]
    fn test_describe_interface() {
        let data = Introspection::parse(LOG_CONTROL).unwrap();
        let lines = describe_interface(data.interface("org.freedesktop.LogControl1").unwrap());
        let methods = lines.iter().position(|l| l == "# Methods:").unwrap();
        let properties = lines.iter().position(|l| l == "# Properties:").unwrap();
        assert!(lines[..methods].contains(&"ax = array of x".to_string()));
        assert_eq!(
            lines[methods + 2..methods + 5],
            ["SetLevel", "  input level s", "  output ok b"]
        );
        assert_eq!(lines[properties + 2..], ["LogLevel s", "Targets a{sv}"]);
    }

    #[test]
    fn test_visible_names() {
        let names = vec![":1.42".to_string(), "org.gnome.Shell".into(), "org.freedesktop.DBus".into()];
        assert_eq!(visible_names(names), vec!["org.freedesktop.DBus", "org.gnome.Shell"]);
    }
}
