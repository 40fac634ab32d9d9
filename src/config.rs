//! Command-line configuration.

use clap::Parser;

const MIN_EPHEMERAL_PORT: u16 = 32768;
const MAX_EPHEMERAL_PORT: u16 = 61000;

/// A recursive DNS resolver.
///
/// Listens on 127.0.0.1 and answers A queries by iteratively walking
/// the DNS hierarchy starting from a hard-coded root server.
#[derive(Debug, Clone, Parser)]
pub struct Args {
    /// Port to listen on, or 0 to let the OS choose an ephemeral one
    #[clap(short, long, value_parser = parse_port, default_value_t = 0)]
    pub port: u16,
}

fn parse_port(s: &str) -> Result<u16, String> {
    let port: u16 = s
        .parse()
        .map_err(|_| format!("`{s}` is not a valid port number"))?;
    if port == 0 || (MIN_EPHEMERAL_PORT..=MAX_EPHEMERAL_PORT).contains(&port) {
        Ok(port)
    } else {
        Err(format!(
            "port must be 0 or in the range {MIN_EPHEMERAL_PORT}..={MAX_EPHEMERAL_PORT}, got {port}"
        ))
    }
}
