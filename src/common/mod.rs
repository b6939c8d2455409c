//! Common utilities shared by the wire client, monitor bridge and runner

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, ErrorClass, Result};

/// Split a `host:port` monitor endpoint
pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16)> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("Endpoint '{}' is not host:port", endpoint)))?;
    let port = port
        .parse()
        .map_err(|_| Error::Config(format!("Invalid port in endpoint '{}'", endpoint)))?;
    // [::1]:4444 style
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok((host.to_string(), port))
}
