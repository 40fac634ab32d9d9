//! The recursive resolution engine: iterative descent from the root,
//! referral following, and CNAME chasing.

pub mod transport;

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Instant;

use rand::Rng;
use tracing::{debug, trace, warn};

use crate::cache::Cache;
use crate::protocol::wire_types::*;
use crate::resolver::transport::Transport;
use crate::{MAX_RECURSION, ROOT_NS_ADDR};

/// Per-client-request state threaded through every nested resolver
/// invocation. The recursion bound lives here, rather than in a
/// global, so each datagram gets a fresh budget.
pub struct ResolverContext {
    depth: usize,
}

impl ResolverContext {
    pub fn new() -> Self {
        Self { depth: 0 }
    }
}

impl Default for ResolverContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The result of asking the engine to resolve a name. An answer
/// carries the RR plus whatever authority/glue accompanies it; a
/// failure carries the RCODE the client reply should report.
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    Answer(AnswerBundle),
    Failure(Rcode),
}

/// Resolve `name`'s A record, starting a fresh iterative descent at
/// the hard-coded root server. This is the entry point the request
/// loop calls on a cache miss.
pub fn resolve(cache: &mut Cache, transport: &dyn Transport, name: &DomainName) -> ResolveOutcome {
    let mut ctx = ResolverContext::new();
    resolve_at(cache, transport, &mut ctx, name, ROOT_NS_ADDR, None, false)
}

/// One pass of the algorithm: query `server` for `name`'s A record,
/// and handle whatever comes back (a direct answer, a CNAME to chase,
/// or a referral to follow). `seen_cname` is true once the chain has
/// already been rewritten through a CNAME, and controls whether a
/// referral's NS/glue get reattached to an otherwise-bare sub-answer.
///
/// If a server returns more than one relevant answer RR, the first
/// CNAME or A record encountered wins; this mirrors the behaviour of
/// the source this was ported from.
#[allow(clippy::too_many_arguments)]
fn resolve_at(
    cache: &mut Cache,
    transport: &dyn Transport,
    ctx: &mut ResolverContext,
    name: &DomainName,
    server: Ipv4Addr,
    server_name: Option<&DomainName>,
    seen_cname: bool,
) -> ResolveOutcome {
    ctx.depth += 1;
    if ctx.depth > MAX_RECURSION {
        warn!(%name, "recursion limit reached");
        return ResolveOutcome::Failure(Rcode::ServerFailure);
    }

    let question = Question {
        name: name.clone(),
        qtype: QueryType::Record(RecordType::A),
        qclass: QueryClass::Record(RecordClass::IN),
    };
    let request = Message::query(transaction_id(), question);

    let started = Instant::now();
    let Some(reply) = transport.query(&request, server) else {
        debug!(%name, %server, "upstream did not answer");
        return ResolveOutcome::Failure(Rcode::ServerFailure);
    };
    if let Some(server_name) = server_name {
        cache.record_rtt(server_name, started.elapsed());
    }

    if reply.header.rcode != Rcode::NoError {
        trace!(%name, %server, rcode = ?reply.header.rcode, "upstream returned an error");
        return ResolveOutcome::Failure(reply.header.rcode);
    }

    if let Some(outcome) = inspect_answers(cache, transport, ctx, name, &reply) {
        return outcome;
    }

    resolve_via_referral(cache, transport, ctx, name, &reply, seen_cname)
}

/// Look at the answer section for a CNAME or A record relevant to
/// `name`. Returns `None` when there is nothing usable there, meaning
/// the caller should fall through to referral handling.
fn inspect_answers(
    cache: &mut Cache,
    transport: &dyn Transport,
    ctx: &mut ResolverContext,
    name: &DomainName,
    reply: &Message,
) -> Option<ResolveOutcome> {
    for answer in &reply.answers {
        match &answer.rtype_with_data {
            RecordTypeWithData::CNAME { cname } => {
                cache.insert_cname(name, cname, answer.ttl);
                let resolved = resolve_at(cache, transport, ctx, cname, ROOT_NS_ADDR, None, true);
                return Some(match resolved {
                    ResolveOutcome::Answer(mut bundle) => {
                        bundle.answer = bundle.answer.rewrite_owner(name);
                        ResolveOutcome::Answer(bundle)
                    }
                    failure => failure,
                });
            }
            RecordTypeWithData::A { address } => {
                cache.insert_a(name, *address, answer.ttl);
                return Some(ResolveOutcome::Answer(AnswerBundle::new(ResourceRecord {
                    name: name.clone(),
                    rtype_with_data: RecordTypeWithData::A { address: *address },
                    rclass: RecordClass::IN,
                    ttl: answer.ttl,
                })));
            }
            _ => continue,
        }
    }
    None
}

/// Treat `reply` as a referral: prime the cache with its NS/glue, then
/// walk candidate servers (glued addresses first, then NS names that
/// need a side resolution) until one answers `name`.
fn resolve_via_referral(
    cache: &mut Cache,
    transport: &dyn Transport,
    ctx: &mut ResolverContext,
    name: &DomainName,
    reply: &Message,
    seen_cname: bool,
) -> ResolveOutcome {
    for rr in &reply.authority {
        if let RecordTypeWithData::NS { nsdname } = &rr.rtype_with_data {
            cache.insert_ns(&rr.name, nsdname, rr.ttl);
        }
    }

    let mut glued_names = HashSet::new();
    for rr in &reply.additional {
        if let RecordTypeWithData::A { address } = &rr.rtype_with_data {
            cache.insert_a(&rr.name, *address, rr.ttl);
            glued_names.insert(rr.name.clone());
        }
    }

    for rr in &reply.additional {
        let RecordTypeWithData::A { address } = &rr.rtype_with_data else {
            continue;
        };
        trace!(%name, candidate = %rr.name, "trying glued nameserver");
        let sub = resolve_at(cache, transport, ctx, name, *address, Some(&rr.name), seen_cname);
        if let ResolveOutcome::Answer(mut bundle) = sub {
            if seen_cname && bundle.authority.is_empty() && bundle.additional.is_empty() {
                bundle.authority = reply.authority.clone();
                bundle.additional = reply.additional.clone();
            }
            return ResolveOutcome::Answer(bundle);
        }
    }

    for rr in &reply.authority {
        let RecordTypeWithData::NS { nsdname } = &rr.rtype_with_data else {
            continue;
        };
        if glued_names.contains(nsdname) {
            continue;
        }
        trace!(%name, nameserver = %nsdname, "resolving nameserver without glue");
        let side = resolve_at(cache, transport, ctx, nsdname, ROOT_NS_ADDR, None, seen_cname);
        let ResolveOutcome::Answer(addr_bundle) = side else {
            continue;
        };
        let RecordTypeWithData::A { address } = addr_bundle.answer.rtype_with_data else {
            continue;
        };
        let sub = resolve_at(cache, transport, ctx, name, address, Some(nsdname), seen_cname);
        if let ResolveOutcome::Answer(bundle) = sub {
            return ResolveOutcome::Answer(bundle);
        }
    }

    ResolveOutcome::Failure(Rcode::ServerFailure)
}

fn transaction_id() -> u16 {
    rand::thread_rng().gen()
}
