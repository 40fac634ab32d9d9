//! Deserialisation of DNS messages from the network. See the
//! `wire_types` module for details of the format.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::protocol::wire_types::*;

impl Message {
    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        Self::deserialise(&mut ConsumableBuffer::new(octets))
    }

    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let wire_header = WireHeader::deserialise(buffer)?;
        let mut questions = Vec::with_capacity(wire_header.qdcount.into());
        let mut answers = Vec::with_capacity(wire_header.ancount.into());
        let mut authority = Vec::with_capacity(wire_header.nscount.into());
        let mut additional = Vec::with_capacity(wire_header.arcount.into());

        for _ in 0..wire_header.qdcount {
            questions.push(Question::deserialise(wire_header.header.id, buffer)?);
        }
        for _ in 0..wire_header.ancount {
            answers.push(ResourceRecord::deserialise(wire_header.header.id, buffer)?);
        }
        for _ in 0..wire_header.nscount {
            authority.push(ResourceRecord::deserialise(wire_header.header.id, buffer)?);
        }
        for _ in 0..wire_header.arcount {
            additional.push(ResourceRecord::deserialise(wire_header.header.id, buffer)?);
        }

        Ok(Self {
            header: wire_header.header,
            questions,
            answers,
            authority,
            additional,
        })
    }
}

impl WireHeader {
    /// # Errors
    ///
    /// If the header is too short.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let id = buffer.next_u16().ok_or(Error::CompletelyBusted)?;
        let flags1 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let flags2 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let qdcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let ancount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let nscount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let arcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;

        Ok(Self {
            header: Header {
                id,
                is_response: flags1 & HEADER_MASK_QR != 0,
                opcode: Opcode::from((flags1 & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE),
                is_authoritative: flags1 & HEADER_MASK_AA != 0,
                is_truncated: flags1 & HEADER_MASK_TC != 0,
                recursion_desired: flags1 & HEADER_MASK_RD != 0,
                recursion_available: flags2 & HEADER_MASK_RA != 0,
                rcode: Rcode::from((flags2 & HEADER_MASK_RCODE) >> HEADER_OFFSET_RCODE),
            },
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

impl Question {
    /// # Errors
    ///
    /// If the question cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let qtype = QueryType::deserialise(id, buffer)?;
        let qclass = QueryClass::deserialise(id, buffer)?;

        Ok(Self {
            name,
            qtype,
            qclass,
        })
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the record cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let rtype = RecordType::deserialise(id, buffer)?;
        let rclass = RecordClass::deserialise(id, buffer)?;
        let ttl = buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?;
        let rdlength = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;

        let rdata_start = buffer.position();

        // for records which include domain names, deserialise them so
        // any compression pointers inside the rdata get expanded.
        let rtype_with_data = match rtype {
            RecordType::A => RecordTypeWithData::A {
                address: Ipv4Addr::from(
                    buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                ),
            },
            RecordType::NS => RecordTypeWithData::NS {
                nsdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::CNAME => RecordTypeWithData::CNAME {
                cname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::SOA => RecordTypeWithData::SOA {
                mname: DomainName::deserialise(id, buffer)?,
                rname: DomainName::deserialise(id, buffer)?,
                serial: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                refresh: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                retry: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                expire: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                minimum: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
            },
            RecordType::AAAA => RecordTypeWithData::AAAA {
                address: Ipv6Addr::new(
                    buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                    buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                    buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                    buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                    buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                    buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                    buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                    buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                ),
            },
            RecordType::Unknown(tag) => RecordTypeWithData::Unknown {
                tag,
                octets: buffer
                    .take(rdlength as usize)
                    .ok_or(Error::ResourceRecordTooShort(id))?
                    .to_vec(),
            },
        };

        let rdata_stop = buffer.position();

        if rdata_stop == rdata_start + (rdlength as usize) {
            Ok(Self {
                name,
                rtype_with_data,
                rclass,
                ttl,
            })
        } else {
            Err(Error::ResourceRecordInvalid(id))
        }
    }
}

impl DomainName {
    /// # Errors
    ///
    /// If the domain cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let mut octets = Vec::<u8>::with_capacity(DOMAINNAME_MAX_LEN);
        let mut labels = Vec::<Vec<u8>>::with_capacity(5);
        let mut hops = 0;
        let mut return_to = None;

        loop {
            let size = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;

            if usize::from(size) <= LABEL_MAX_LEN {
                octets.push(size);

                if size == 0 {
                    labels.push(Vec::new());
                    break;
                }

                let label = buffer
                    .take(size as usize)
                    .ok_or(Error::DomainTooShort(id))?
                    .to_vec();
                octets.extend_from_slice(&label);
                labels.push(label);

                if octets.len() > DOMAINNAME_MAX_LEN {
                    return Err(Error::DomainTooLong(id));
                }
            } else if size >= 192 {
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return Err(Error::DomainPointerLoop(id));
                }

                let hi = size & 0b0011_1111;
                let lo = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;
                let ptr = u16::from_be_bytes([hi, lo]) as usize;

                // The first pointer followed is where the name ends as far
                // as the outer caller is concerned; everything after it is
                // read from the pointed-to suffix instead.
                if return_to.is_none() {
                    return_to = Some(buffer.position());
                }

                buffer.jump(ptr);
            } else {
                return Err(Error::DomainLabelInvalid(id));
            }
        }

        if let Some(position) = return_to {
            buffer.jump(position);
        }

        if octets.len() <= DOMAINNAME_MAX_LEN {
            Ok(DomainName { octets, labels })
        } else {
            Err(Error::DomainTooLong(id))
        }
    }
}

impl QueryType {
    /// # Errors
    ///
    /// If the query type field is too short.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let value = buffer.next_u16().ok_or(Error::QuestionTooShort(id))?;
        Ok(Self::from(value))
    }
}

impl QueryClass {
    /// # Errors
    ///
    /// If the query class field is too short.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let value = buffer.next_u16().ok_or(Error::QuestionTooShort(id))?;
        Ok(Self::from(value))
    }
}

impl RecordType {
    /// # Errors
    ///
    /// If the record type field is too short.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let value = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;
        Ok(Self::from(value))
    }
}

impl RecordClass {
    /// # Errors
    ///
    /// If the record class field is too short.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let value = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;
        Ok(Self::from(value))
    }
}

/// Errors encountered when parsing a datagram. In every error which
/// carries a `u16`, that is the transaction id taken from the header,
/// recovered so that an error reply can still be correlated with the
/// original query.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// The datagram is not even 2 octets long, so it doesn't contain a
    /// valid id. No reply can be correlated in this case.
    CompletelyBusted,

    /// The header is missing one or more required fields.
    HeaderTooShort(u16),

    /// A question ends with an incomplete field.
    QuestionTooShort(u16),

    /// A resource record ends with an incomplete field.
    ResourceRecordTooShort(u16),

    /// A resource record's rdata did not consume exactly `rdlength`
    /// octets.
    ResourceRecordInvalid(u16),

    /// A domain name is incomplete.
    DomainTooShort(u16),

    /// A domain name expands to more than 255 octets.
    DomainTooLong(u16),

    /// A domain name followed more than `MAX_POINTER_HOPS` compression
    /// pointers; almost certainly a pointer loop.
    DomainPointerLoop(u16),

    /// A domain label is longer than 63 octets and is not a pointer.
    DomainLabelInvalid(u16),
}

impl Error {
    pub fn id(self) -> Option<u16> {
        match self {
            Error::CompletelyBusted => None,
            Error::HeaderTooShort(id)
            | Error::QuestionTooShort(id)
            | Error::ResourceRecordTooShort(id)
            | Error::ResourceRecordInvalid(id)
            | Error::DomainTooShort(id)
            | Error::DomainTooLong(id)
            | Error::DomainPointerLoop(id)
            | Error::DomainLabelInvalid(id) => Some(id),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for Error {}

/// A buffer which is consumed by the parsing process. Unlike
/// `WritableBuffer`, reads can jump backward (for compression
/// pointers) via `jump`/`at_offset` without losing the original
/// octets.
pub struct ConsumableBuffer<'a> {
    octets: &'a [u8],
    position: usize,
}

impl<'a> ConsumableBuffer<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self {
            octets,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the read position to an absolute offset, without
    /// consuming or losing access to anything before or after it.
    /// Used to follow a compression pointer in place rather than
    /// recursing into a fresh buffer view.
    pub fn jump(&mut self, position: usize) {
        self.position = position;
    }

    pub fn next_u8(&mut self) -> Option<u8> {
        let a = *self.octets.get(self.position)?;
        self.position += 1;
        Some(a)
    }

    pub fn next_u16(&mut self) -> Option<u16> {
        let a = *self.octets.get(self.position)?;
        let b = *self.octets.get(self.position + 1)?;
        self.position += 2;
        Some(u16::from_be_bytes([a, b]))
    }

    pub fn next_u32(&mut self) -> Option<u32> {
        let a = *self.octets.get(self.position)?;
        let b = *self.octets.get(self.position + 1)?;
        let c = *self.octets.get(self.position + 2)?;
        let d = *self.octets.get(self.position + 3)?;
        self.position += 4;
        Some(u32::from_be_bytes([a, b, c, d]))
    }

    pub fn take(&mut self, size: usize) -> Option<&'a [u8]> {
        if self.octets.len() >= self.position + size {
            let slice = &self.octets[self.position..self.position + size];
            self.position += size;
            Some(slice)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::serialise::WritableBuffer;
    use crate::protocol::wire_types::test_util::*;
    use std::net::Ipv4Addr;

    #[test]
    fn roundtrips_a_record() {
        let rr = a_record("example.com.", Ipv4Addr::new(93, 184, 216, 34), 3600);

        let mut buffer = WritableBuffer::default();
        rr.clone().serialise(&mut buffer).unwrap();

        let parsed = ResourceRecord::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets))
            .expect("well formed record");
        assert_eq!(parsed, rr);
    }

    #[test]
    fn expands_a_compression_pointer() {
        // "com." at offset 0, then "example" pointing back at "com."
        let mut octets = vec![3, b'c', b'o', b'm', 0];
        let ptr_offset = octets.len();
        octets.push(7);
        octets.extend_from_slice(b"example");
        let pointer = 0xC000u16 | 0u16;
        octets.extend_from_slice(&pointer.to_be_bytes());

        let mut buffer = ConsumableBuffer::new(&octets);
        buffer.jump(ptr_offset);
        let dn = DomainName::deserialise(0, &mut buffer).expect("well formed name");
        assert_eq!(dn.to_dotted_string(), "example.com.");

        // The pointer is 2 octets; the outer read position must land
        // immediately after them, not wherever following the pointer
        // happened to leave it.
        assert_eq!(buffer.position(), octets.len());
    }

    #[test]
    fn a_record_after_a_compressed_owner_name_parses_correctly() {
        // "com." at offset 0, then an A record whose owner is a pointer
        // back at "com.", followed by type/class/ttl/rdlength/rdata.
        // If the pointer jump leaked into the outer position, the
        // type/class/ttl fields below would be read from the wrong
        // offset and the rdlength check would fail.
        let mut octets = vec![3, b'c', b'o', b'm', 0];
        octets.extend_from_slice(&(0xC000u16 | 0).to_be_bytes()); // owner: pointer to "com."
        octets.extend_from_slice(&1u16.to_be_bytes()); // type A
        octets.extend_from_slice(&1u16.to_be_bytes()); // class IN
        octets.extend_from_slice(&3600u32.to_be_bytes()); // ttl
        octets.extend_from_slice(&4u16.to_be_bytes()); // rdlength
        octets.extend_from_slice(&[93, 184, 216, 34]); // rdata

        let mut buffer = ConsumableBuffer::new(&octets);
        let rr = ResourceRecord::deserialise(0, &mut buffer).expect("well formed record");
        assert_eq!(rr.name.to_dotted_string(), "com.");
        assert_eq!(
            rr.rtype_with_data,
            RecordTypeWithData::A {
                address: Ipv4Addr::new(93, 184, 216, 34)
            }
        );
        assert_eq!(rr.ttl, 3600);
    }

    #[test]
    fn rejects_pointer_loop() {
        // offset 0 points to offset 2, offset 2 points back to offset 0
        let mut octets = Vec::new();
        octets.extend_from_slice(&(0xC000u16 | 2).to_be_bytes());
        octets.extend_from_slice(&(0xC000u16 | 0).to_be_bytes());

        let mut buffer = ConsumableBuffer::new(&octets);
        let err = DomainName::deserialise(0, &mut buffer).unwrap_err();
        assert_eq!(err, Error::DomainPointerLoop(0));
    }

    #[test]
    fn rejects_oversized_label_length_byte() {
        // 0b01000000 = 64: too long to be a label, too small to be a pointer.
        let octets = vec![64u8];
        let mut buffer = ConsumableBuffer::new(&octets);
        assert_eq!(
            DomainName::deserialise(7, &mut buffer).unwrap_err(),
            Error::DomainLabelInvalid(7)
        );
    }

    #[test]
    fn truncated_header_reports_id() {
        let octets = vec![0, 42, 0]; // id = 42, then nothing else
        let err = Message::from_octets(&octets).unwrap_err();
        assert_eq!(err.id(), Some(42));
    }

    #[test]
    fn empty_buffer_is_completely_busted() {
        let err = Message::from_octets(&[]).unwrap_err();
        assert_eq!(err, Error::CompletelyBusted);
        assert_eq!(err.id(), None);
    }
}
