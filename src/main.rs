use std::io::Write;
use std::net::{Ipv4Addr, UdpSocket};
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use recursor::cache::Cache;
use recursor::protocol::serialise::WritableBuffer;
use recursor::protocol::wire_types::*;
use recursor::resolver::transport::{Transport, UdpTransport};
use recursor::resolver::{self, ResolveOutcome};
use recursor::{ROOT_NS_ADDR, ROOT_NS_NAME};

mod config;

use config::Args;

fn main() {
    let args = Args::parse();
    begin_logging();

    let server = match UdpSocket::bind((Ipv4Addr::LOCALHOST, args.port)) {
        Ok(socket) => socket,
        Err(error) => {
            tracing::error!(?error, port = args.port, "could not bind server socket");
            process::exit(2);
        }
    };

    let actual_port = match server.local_addr() {
        Ok(addr) => addr.port(),
        Err(error) => {
            tracing::error!(?error, "could not read bound address");
            process::exit(2);
        }
    };

    if !announce(actual_port) {
        process::exit(1);
    }

    let transport = match UdpTransport::bind() {
        Ok(t) => t,
        Err(error) => {
            tracing::error!(?error, "could not bind upstream socket");
            process::exit(2);
        }
    };

    let root_ns_name =
        DomainName::from_dotted_string(ROOT_NS_NAME).expect("ROOT_NS_NAME is a valid domain name");
    let mut cache = Cache::with_root_hint(&root_ns_name, ROOT_NS_ADDR);

    tracing::info!(port = actual_port, "ready");
    run(&server, &transport, &mut cache);
}

fn begin_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

/// Write the startup banner the external test harness looks for, and
/// flush it immediately: it is plain text, not a tracing log line, and
/// must appear within a second of the process starting regardless of
/// whatever the logging subscriber is doing.
fn announce(port: u16) -> bool {
    let argv0 = std::env::args()
        .next()
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
    let mut stdout = std::io::stdout();
    writeln!(stdout, "{argv0}: listening on port {port}").is_ok() && stdout.flush().is_ok()
}

fn run(server: &UdpSocket, transport: &dyn Transport, cache: &mut Cache) {
    let mut buf = [0u8; 512];
    loop {
        let (len, peer) = match server.recv_from(&mut buf) {
            Ok(ok) => ok,
            Err(error) => {
                tracing::warn!(?error, "failed to receive client datagram");
                continue;
            }
        };

        let Some(reply) = handle_datagram(cache, transport, &buf[..len]) else {
            tracing::debug!(%peer, "dropping unparseable query");
            continue;
        };

        let mut out = WritableBuffer::default();
        if let Err(error) = reply.serialise(&mut out) {
            tracing::warn!(%peer, ?error, "failed to serialise reply");
            continue;
        }
        out.truncate_to_512();

        if let Err(error) = server.send_to(&out.octets, peer) {
            tracing::warn!(%peer, ?error, "failed to send reply");
        }
    }
}

/// Parse, resolve, and build a reply for one client datagram.
/// Returns `None` only when the query was unparseable enough that no
/// transaction id could be recovered to correlate a reply with.
fn handle_datagram(cache: &mut Cache, transport: &dyn Transport, datagram: &[u8]) -> Option<Message> {
    let query = match Message::from_octets(datagram) {
        Ok(query) => query,
        Err(error) => {
            tracing::debug!(?error, "could not parse query");
            return error.id().map(Message::make_format_error_response);
        }
    };

    let Some(question) = query.questions.first() else {
        let mut response = query.make_response();
        response.header.rcode = Rcode::FormatError;
        return Some(response);
    };

    let mut response = query.make_response();

    if question.qtype.is_unknown() || question.qclass.is_unknown() {
        response.header.rcode = Rcode::NotImplemented;
        return Some(response);
    }

    let cached = cache
        .lookup_a(&question.name)
        .or_else(|| cache.lookup_cname(&question.name, true));

    let outcome = if let Some(bundle) = cached {
        tracing::info!(name = %question.name, source = "cache", "answered");
        ResolveOutcome::Answer(bundle)
    } else {
        let outcome = resolver::resolve(cache, transport, &question.name);
        let rcode = match &outcome {
            ResolveOutcome::Answer(_) => Rcode::NoError,
            ResolveOutcome::Failure(rcode) => *rcode,
        };
        tracing::info!(name = %question.name, source = "upstream", ?rcode, "answered");
        outcome
    };

    match outcome {
        ResolveOutcome::Answer(bundle) => {
            response.answers.push(bundle.answer);
            response.authority = bundle.authority;
            response.additional = bundle.additional;
        }
        ResolveOutcome::Failure(rcode) => {
            response.header.rcode = rcode;
        }
    }

    Some(response)
}
