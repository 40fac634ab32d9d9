//! End-to-end wire format round-trip tests: build a `Message` by hand,
//! serialise it, parse it back, and check nothing was lost.
//!
//! Run with `cargo test --features test-util`.

use std::net::{Ipv4Addr, Ipv6Addr};

use recursor::protocol::deserialise::ConsumableBuffer;
use recursor::protocol::serialise::WritableBuffer;
use recursor::protocol::wire_types::test_util::*;
use recursor::protocol::wire_types::*;

#[test]
fn roundtrip_header() {
    let header = Header {
        id: 0x1234,
        is_response: true,
        opcode: Opcode::Standard,
        is_authoritative: true,
        is_truncated: false,
        recursion_desired: false,
        recursion_available: true,
        rcode: Rcode::NoError,
    };

    let mut buffer = WritableBuffer::default();
    header.serialise(&mut buffer);
    let parsed = WireHeader::deserialise(&mut ConsumableBuffer::new(&buffer.octets)).unwrap();
    assert_eq!(parsed.header, header);
}

#[test]
fn roundtrip_question() {
    let question = Question {
        name: domain("example.com."),
        qtype: QueryType::Record(RecordType::A),
        qclass: QueryClass::Record(RecordClass::IN),
    };

    let mut buffer = WritableBuffer::default();
    question.clone().serialise(&mut buffer);
    let parsed = Question::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets)).unwrap();
    assert_eq!(parsed, question);
}

#[test]
fn roundtrip_a_record() {
    let rr = a_record("example.com.", Ipv4Addr::new(93, 184, 216, 34), 3600);

    let mut buffer = WritableBuffer::default();
    rr.clone().serialise(&mut buffer).unwrap();
    let parsed = ResourceRecord::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets))
        .unwrap();
    assert_eq!(parsed, rr);
}

#[test]
fn roundtrip_ns_record() {
    let rr = ns_record("example.com.", "ns1.example.com.", 86400);

    let mut buffer = WritableBuffer::default();
    rr.clone().serialise(&mut buffer).unwrap();
    let parsed = ResourceRecord::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets))
        .unwrap();
    assert_eq!(parsed, rr);
}

#[test]
fn roundtrip_cname_record() {
    let rr = cname_record("www.svc.test.", "svc-cdn.net.", 300);

    let mut buffer = WritableBuffer::default();
    rr.clone().serialise(&mut buffer).unwrap();
    let parsed = ResourceRecord::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets))
        .unwrap();
    assert_eq!(parsed, rr);
}

#[test]
fn roundtrip_soa_record() {
    let rr = ResourceRecord {
        name: domain("example.com."),
        rtype_with_data: RecordTypeWithData::SOA {
            mname: domain("ns1.example.com."),
            rname: domain("hostmaster.example.com."),
            serial: 2024010100,
            refresh: 7200,
            retry: 3600,
            expire: 1209600,
            minimum: 300,
        },
        rclass: RecordClass::IN,
        ttl: 3600,
    };

    let mut buffer = WritableBuffer::default();
    rr.clone().serialise(&mut buffer).unwrap();
    let parsed = ResourceRecord::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets))
        .unwrap();
    assert_eq!(parsed, rr);
}

#[test]
fn roundtrip_aaaa_record() {
    let rr = ResourceRecord {
        name: domain("example.com."),
        rtype_with_data: RecordTypeWithData::AAAA {
            address: Ipv6Addr::new(0x2606, 0x2800, 0x220, 1, 0x248, 0x1893, 0x25c8, 0x1946),
        },
        rclass: RecordClass::IN,
        ttl: 3600,
    };

    let mut buffer = WritableBuffer::default();
    rr.clone().serialise(&mut buffer).unwrap();
    let parsed = ResourceRecord::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets))
        .unwrap();
    assert_eq!(parsed, rr);
}

#[test]
fn roundtrip_unknown_record_is_opaque() {
    let rr = unknown_record("example.com.", 99, &[1, 2, 3, 4, 5], 60);

    let mut buffer = WritableBuffer::default();
    rr.clone().serialise(&mut buffer).unwrap();
    let parsed = ResourceRecord::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets))
        .unwrap();
    assert_eq!(parsed, rr);
}

#[test]
fn roundtrip_full_message_with_referral_shape() {
    // A message shaped like a referral reply: no answer, one NS in
    // authority, one glue A record in additional.
    let message = Message {
        header: Header {
            id: 7,
            is_response: true,
            opcode: Opcode::Standard,
            is_authoritative: false,
            is_truncated: false,
            recursion_desired: false,
            recursion_available: false,
            rcode: Rcode::NoError,
        },
        questions: vec![Question {
            name: domain("example.com."),
            qtype: QueryType::Record(RecordType::A),
            qclass: QueryClass::Record(RecordClass::IN),
        }],
        answers: vec![],
        authority: vec![ns_record("com.", "a.gtld-servers.net.", 172800)],
        additional: vec![a_record(
            "a.gtld-servers.net.",
            Ipv4Addr::new(192, 5, 6, 30),
            172800,
        )],
    };

    let octets = message.clone().into_octets().unwrap();
    let parsed = Message::from_octets(&octets).unwrap();
    assert_eq!(parsed, message);
}

#[test]
fn name_compression_in_a_real_reply_expands_and_leaves_trailing_fields_intact() {
    // Hand-built wire bytes for a reply with one question ("com.") and
    // one answer RR whose owner is a compression pointer back at the
    // question name — the shape every real root/TLD/authoritative
    // reply actually uses. `DomainName::serialise` never emits
    // pointers itself, so this can't be produced by round-tripping a
    // `Message` through `into_octets`; it has to be assembled by hand
    // to actually exercise the decompression path.
    let mut octets = vec![
        0x00, 0x07, // id
        0x80, 0x00, // flags: response, no error
        0x00, 0x01, // qdcount
        0x00, 0x01, // ancount
        0x00, 0x00, // nscount
        0x00, 0x00, // arcount
    ];
    let question_name_offset = octets.len();
    octets.extend_from_slice(&[3, b'c', b'o', b'm', 0]); // "com."
    octets.extend_from_slice(&1u16.to_be_bytes()); // qtype A
    octets.extend_from_slice(&1u16.to_be_bytes()); // qclass IN

    octets.extend_from_slice(&(0xC000u16 | question_name_offset as u16).to_be_bytes()); // owner: pointer to "com."
    octets.extend_from_slice(&1u16.to_be_bytes()); // type A
    octets.extend_from_slice(&1u16.to_be_bytes()); // class IN
    octets.extend_from_slice(&3600u32.to_be_bytes()); // ttl
    octets.extend_from_slice(&4u16.to_be_bytes()); // rdlength
    octets.extend_from_slice(&[192, 5, 6, 30]); // rdata

    let parsed = Message::from_octets(&octets).unwrap();
    assert_eq!(parsed.questions[0].name, domain("com."));
    assert_eq!(parsed.answers.len(), 1);
    assert_eq!(parsed.answers[0].name, domain("com."));
    assert_eq!(parsed.answers[0].ttl, 3600);
    assert_eq!(
        parsed.answers[0].rtype_with_data,
        RecordTypeWithData::A {
            address: Ipv4Addr::new(192, 5, 6, 30)
        }
    );
}
