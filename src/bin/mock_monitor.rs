//! Mock VM monitor binary for integration testing
//!
//! Listens on 127.0.0.1 and answers monitor commands the way the human
//! monitor does: echo-free output followed by a `(qemu) ` prompt.
//!
//! ```text
//! mock-monitor [PORT] [--drop-every N] [--greeting] [--one-shot]
//! ```
//!
//! Prints `LISTENING <port>` once bound. With `--drop-every N` each
//! connection is closed after reading its Nth command, without replying.
//! With `--one-shot` it behaves like the VM runner's monitor proxy: one
//! command per connection, output without the prompt, then the connection
//! is closed.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use clap::Parser;

const PROMPT: &str = "(qemu) ";

#[derive(Parser, Clone, Copy)]
#[command(name = "mock-monitor")]
struct Options {
    /// Port to listen on; 0 picks a free one
    #[arg(default_value_t = 0)]
    port: u16,

    /// Hang up after every Nth command on a connection
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    drop_every: Option<u64>,

    /// Send a banner and prompt on connect
    #[arg(long)]
    greeting: bool,

    /// Serve one command per connection and close it after the reply
    #[arg(long)]
    one_shot: bool,
}

/// Commands received over every connection, in arrival order
type History = Arc<Mutex<Vec<String>>>;

fn main() {
    let options = Options::parse();

    let listener = match TcpListener::bind(("127.0.0.1", options.port)) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("mock-monitor: bind failed: {}", e);
            std::process::exit(1);
        }
    };
    let port = listener.local_addr().map(|a| a.port()).unwrap_or(options.port);
    println!("LISTENING {}", port);
    std::io::stdout().flush().ok();

    let history = History::default();
    for stream in listener.incoming().flatten() {
        let history = Arc::clone(&history);
        thread::spawn(move || serve(stream, options, history));
    }
}

fn serve(stream: TcpStream, options: Options, history: History) {
    let Ok(reader) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(reader);
    let mut writer = stream;
    let mut received = 0u64;

    if options.greeting {
        let banner = format!("QEMU 8.2.0 monitor - type 'help' for more information\r\n{}", PROMPT);
        if writer.write_all(banner.as_bytes()).is_err() {
            return;
        }
    }

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let command = line.trim().to_string();
        if command.is_empty() {
            continue;
        }
        received += 1;
        let output = {
            let Ok(mut history) = history.lock() else {
                break;
            };
            history.push(command.clone());
            respond(&command, &history)
        };

        if options.drop_every.is_some_and(|n| received % n == 0) {
            break;
        }
        if command == "quit" {
            break;
        }

        if options.one_shot {
            let _ = writer.write_all(output.as_bytes());
            break;
        }
        if writer
            .write_all(format!("{}{}", output, PROMPT).as_bytes())
            .is_err()
        {
            break;
        }
    }
}

fn respond(command: &str, history: &[String]) -> String {
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match (name, args.as_slice()) {
        ("sendkey", [_] | [_, _]) => String::new(),
        ("mouse_move", [dx, dy]) | ("mouse_move", [dx, dy, _]) => {
            if dx.parse::<i32>().is_ok() && dy.parse::<i32>().is_ok() {
                String::new()
            } else {
                "Error: invalid mouse_move arguments\r\n".to_string()
            }
        }
        ("mouse_button", [mask]) => match mask.parse::<u32>() {
            Ok(_) => String::new(),
            Err(_) => "Error: invalid button mask\r\n".to_string(),
        },
        ("screendump", [path]) => match std::fs::write(path, b"P6\n1 1\n255\n\0\0\0") {
            Ok(()) => String::new(),
            Err(e) => format!("Could not open '{}': {}\r\n", path, e),
        },
        ("info", ["status"]) => "VM status: running\r\n".to_string(),
        // Earlier commands, for assertions in tests
        ("info", ["history"]) => history[..history.len() - 1]
            .iter()
            .map(|c| format!("{}\r\n", c))
            .collect(),
        _ => format!("unknown command: '{}'\r\n", name),
    }
}
