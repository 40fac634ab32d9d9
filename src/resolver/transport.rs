//! Sending queries to upstream name servers.
//!
//! The production implementation is a single blocking UDP socket.
//! Resolution logic is written against the `Transport` trait instead
//! of calling the socket directly so that it can be driven
//! deterministically in tests, the same way the cache is split from
//! its storage.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use tracing::{debug, trace};

use crate::protocol::wire_types::Message;
use crate::{DNS_PORT, UPSTREAM_RETRIES, UPSTREAM_TIMEOUT};

/// Sends a query to a single upstream address and waits for a reply.
pub trait Transport {
    /// Send `request` to `address`, retrying as needed, and return the
    /// parsed reply. `None` means every attempt was exhausted without
    /// producing a usable response; the caller treats this the same as
    /// an upstream SERVFAIL.
    fn query(&self, request: &Message, address: Ipv4Addr) -> Option<Message>;
}

/// A real UDP socket, bound once and reused for every upstream query
/// this process makes. There is never more than one query in flight,
/// so there is no need to correlate replies by transaction id across
/// concurrent sends.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn bind() -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_read_timeout(Some(UPSTREAM_TIMEOUT))?;
        socket.set_write_timeout(Some(UPSTREAM_TIMEOUT))?;
        Ok(Self { socket })
    }
}

impl Transport for UdpTransport {
    fn query(&self, request: &Message, address: Ipv4Addr) -> Option<Message> {
        let packet = request.clone().into_octets().ok()?;
        if packet.len() > 512 {
            debug!(len = packet.len(), "refusing to send oversized query");
            return None;
        }

        let peer = SocketAddrV4::new(address, DNS_PORT);
        for attempt in 1..=UPSTREAM_RETRIES {
            if let Err(err) = self.socket.send_to(&packet, peer) {
                trace!(%peer, attempt, %err, "send to upstream failed");
                continue;
            }

            let mut buf = [0u8; 512];
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) if from.ip() == std::net::IpAddr::V4(address) => {
                    match Message::from_octets(&buf[..len]) {
                        Ok(reply) => return Some(reply),
                        Err(err) => trace!(%peer, attempt, ?err, "malformed upstream reply"),
                    }
                }
                Ok((_, from)) => trace!(%peer, attempt, %from, "reply from unexpected address"),
                Err(err) => trace!(%peer, attempt, %err, "no reply from upstream"),
            }
        }

        debug!(%peer, attempts = UPSTREAM_RETRIES, "upstream exhausted");
        None
    }
}

/// A fixed `Duration` is exposed so callers (and tests) know how long
/// the transport is willing to wait for any single reply.
pub const fn read_timeout() -> Duration {
    UPSTREAM_TIMEOUT
}

#[cfg(any(feature = "test-util", test))]
pub mod test_util {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// A transport backed by a fixed script of canned replies, keyed by
    /// `(address, question name)`. Lets resolver tests exercise
    /// referrals, CNAME chases, and timeouts without a real socket.
    #[derive(Default)]
    pub struct MockTransport {
        replies: RefCell<HashMap<(Ipv4Addr, String), Message>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Script a reply for queries to `address` asking about `name`.
        pub fn stub(&self, address: Ipv4Addr, name: &str, reply: Message) {
            self.replies
                .borrow_mut()
                .insert((address, name.to_string()), reply);
        }
    }

    impl Transport for MockTransport {
        fn query(&self, request: &Message, address: Ipv4Addr) -> Option<Message> {
            let name = request.questions.first()?.name.to_dotted_string();
            let mut reply = self.replies.borrow().get(&(address, name)).cloned()?;
            reply.header.id = request.header.id;
            Some(reply)
        }
    }
}
