//! Monitor command lines

use std::fmt;
use std::path::PathBuf;

use crate::common::{Error, Result};

/// One command understood by the VM monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorCommand {
    /// Press and release a key chord, e.g. `["ctrl", "alt", "f1"]`
    SendKey { keys: Vec<String>, hold_ms: Option<u32> },
    /// Move the pointer
    MouseMove { dx: i32, dy: i32 },
    /// Set the pressed button mask (1 = left, 2 = right, 4 = middle)
    MouseButton { mask: u32 },
    /// Write the guest screen to a file on the host
    ScreenDump(PathBuf),
    /// Anything else, sent verbatim
    Raw(String),
}

impl MonitorCommand {
    pub fn send_key(key: impl Into<String>) -> Self {
        Self::SendKey {
            keys: vec![key.into()],
            hold_ms: None,
        }
    }

    /// Render the command line, without the trailing newline
    pub fn to_line(&self) -> Result<String> {
        let line = match self {
            MonitorCommand::SendKey { keys, hold_ms } => {
                if keys.is_empty() {
                    return Err(invalid(self, "sendkey needs at least one key"));
                }
                if let Some(bad) = keys.iter().find(|k| !is_key_name(k)) {
                    return Err(invalid(self, &format!("invalid key name '{}'", bad)));
                }
                let chord = keys.join("-");
                match hold_ms {
                    Some(ms) => format!("sendkey {} {}", chord, ms),
                    None => format!("sendkey {}", chord),
                }
            }
            MonitorCommand::MouseMove { dx, dy } => format!("mouse_move {} {}", dx, dy),
            MonitorCommand::MouseButton { mask } => format!("mouse_button {}", mask),
            MonitorCommand::ScreenDump(path) => format!("screendump {}", path.display()),
            MonitorCommand::Raw(text) => text.trim().to_string(),
        };

        if line.is_empty() || line.contains(['\n', '\r']) {
            return Err(invalid(self, "command must be a single non-empty line"));
        }
        Ok(line)
    }
}

impl fmt::Display for MonitorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_line() {
            Ok(line) => f.write_str(&line),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

fn is_key_name(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn invalid(command: &MonitorCommand, reason: &str) -> Error {
    Error::CommandRejected {
        command: format!("{:?}", command),
        reply: format!("not sent: {}", reason),
    }
}

/// Monitor key name for a printable character
///
/// Returns the keys of the chord, so upper-case letters and shifted
/// symbols come back with `shift` in front.
pub fn key_for_char(c: char) -> Option<Vec<&'static str>> {
    const LOWER: [&str; 26] = [
        "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n", "o", "p", "q", "r",
        "s", "t", "u", "v", "w", "x", "y", "z",
    ];
    const DIGITS: [&str; 10] = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];

    let plain = |k: &'static str| Some(vec![k]);
    let shifted = |k: &'static str| Some(vec!["shift", k]);

    match c {
        'a'..='z' => plain(LOWER[(c as u8 - b'a') as usize]),
        'A'..='Z' => shifted(LOWER[(c as u8 - b'A') as usize]),
        '0'..='9' => plain(DIGITS[(c as u8 - b'0') as usize]),
        ' ' => plain("spc"),
        '\n' => plain("ret"),
        '\t' => plain("tab"),
        '-' => plain("minus"),
        '=' => plain("equal"),
        '.' => plain("dot"),
        ',' => plain("comma"),
        '/' => plain("slash"),
        ';' => plain("semicolon"),
        '\'' => plain("apostrophe"),
        '_' => shifted("minus"),
        '+' => shifted("equal"),
        ':' => shifted("semicolon"),
        '?' => shifted("slash"),
        '!' => shifted("1"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lines() {
        let cmd = MonitorCommand::SendKey {
            keys: vec!["ctrl".into(), "alt".into(), "f2".into()],
            hold_ms: Some(200),
        };
        assert_eq!(cmd.to_line().unwrap(), "sendkey ctrl-alt-f2 200");
        assert_eq!(MonitorCommand::send_key("a").to_line().unwrap(), "sendkey a");
        assert_eq!(
            MonitorCommand::MouseMove { dx: -5, dy: 10 }.to_line().unwrap(),
            "mouse_move -5 10"
        );
        assert_eq!(
            MonitorCommand::MouseButton { mask: 1 }.to_line().unwrap(),
            "mouse_button 1"
        );
        assert_eq!(
            MonitorCommand::ScreenDump("/tmp/shot.ppm".into()).to_line().unwrap(),
            "screendump /tmp/shot.ppm"
        );
    }

    #[test]
    fn test_rejects_injection() {
        let cmd = MonitorCommand::Raw("info status\nquit".into());
        assert!(matches!(cmd.to_line(), Err(Error::CommandRejected { .. })));

        let cmd = MonitorCommand::SendKey {
            keys: vec!["a b".into()],
            hold_ms: None,
        };
        assert!(cmd.to_line().is_err());
        assert!(MonitorCommand::SendKey {
            keys: vec![],
            hold_ms: None
        }
        .to_line()
        .is_err());
    }

    #[test]
    fn test_key_for_char() {
        assert_eq!(key_for_char('q'), Some(vec!["q"]));
        assert_eq!(key_for_char('Q'), Some(vec!["shift", "q"]));
        assert_eq!(key_for_char(' '), Some(vec!["spc"]));
        assert_eq!(key_for_char('é'), None);
    }
}
