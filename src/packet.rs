//! ICMP echo codec.
//!
//! Requests are built as a bare ICMP message (the kernel prepends the IPv4 header),
//! replies are read from a raw socket and therefore start with the IPv4 header.

use std::{net::Ipv4Addr, time::Instant};

use pnet::packet::{
    icmp::{
        echo_reply::EchoReplyPacket, echo_request::MutableEchoRequestPacket, IcmpCode,
        IcmpPacket, IcmpType,
    },
    ipv4::Ipv4Packet,
    Packet,
};

use crate::{
    constants::{
        DEFAULT_PAYLOAD, ICMP_DEST_UNREACHABLE, ICMP_ECHO_REPLY, ICMP_ECHO_REQUEST,
        ICMP_HEADER_LEN, IPV4_HEADER_LEN, MIN_PACKET_LEN,
    },
    error::DecodeError,
};

/// Internet checksum: 16-bit one's-complement sum with carry fold, complemented.
///
/// An odd trailing byte is padded with zero.
pub fn checksum(data: &[u8]) -> u16 {
    let mut chunks = data.chunks_exact(2);
    let mut sum: u32 = chunks
        .by_ref()
        .map(|word| u16::from_be_bytes([word[0], word[1]]) as u32)
        .sum();
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct EchoRequest {
    pub identifier: u16,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

impl EchoRequest {
    pub fn new(identifier: u16, sequence: u16, payload: &[u8]) -> Self {
        Self {
            identifier,
            sequence,
            payload: payload.to_vec(),
        }
    }

    /// Serializes the request with its checksum filled in, big-endian on the wire.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0; ICMP_HEADER_LEN + self.payload.len()];
        let mut packet = MutableEchoRequestPacket::new(&mut buf)
            .expect("buffer holds at least an ICMP header");
        packet.set_icmp_type(IcmpType::new(ICMP_ECHO_REQUEST));
        packet.set_icmp_code(IcmpCode::new(0));
        packet.set_checksum(0);
        packet.set_identifier(self.identifier);
        packet.set_sequence_number(self.sequence);
        packet.set_payload(&self.payload);
        let sum = checksum(packet.packet());
        packet.set_checksum(sum);
        buf
    }
}

/// Encodes an echo request carrying the default payload.
pub fn encode(sequence: u16, identifier: u16) -> Vec<u8> {
    EchoRequest::new(identifier, sequence, DEFAULT_PAYLOAD).encode()
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct EchoReply {
    pub icmp_type: u8,
    pub code: u8,
    /// Taken as received, never re-derived.
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
    pub source: Ipv4Addr,
    pub ttl: u8,
    pub byte_count: usize,
    pub received_at: Instant,
}

impl EchoReply {
    /// Whether this reply answers the request `(identifier, sequence)` that is in flight.
    pub fn answers(&self, identifier: u16, sequence: u16) -> bool {
        self.icmp_type == ICMP_ECHO_REPLY
            && self.identifier == identifier
            && self.sequence == sequence
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct UnreachableNotice {
    pub source: Ipv4Addr,
    pub code: u8,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum IcmpMessage {
    EchoReply(EchoReply),
    Unreachable(UnreachableNotice),
}

impl IcmpMessage {
    /// Unreachable notices never match, whatever sequence is outstanding.
    pub fn matches(&self, identifier: u16, sequence: u16) -> bool {
        match self {
            IcmpMessage::EchoReply(reply) => reply.answers(identifier, sequence),
            IcmpMessage::Unreachable(_) => false,
        }
    }
}

/// Parses a raw IPv4 datagram, stamping replies with the current instant.
pub fn decode(packet: &[u8]) -> Result<IcmpMessage, DecodeError> {
    decode_at(packet, Instant::now())
}

/// Parses a raw IPv4 datagram. The ICMP header is read at the fixed 20-byte offset.
pub fn decode_at(packet: &[u8], received_at: Instant) -> Result<IcmpMessage, DecodeError> {
    let truncated = DecodeError::Truncated { len: packet.len() };
    if packet.len() < MIN_PACKET_LEN {
        return Err(truncated);
    }
    let ip = Ipv4Packet::new(packet).ok_or(truncated)?;
    let icmp_bytes = &packet[IPV4_HEADER_LEN..];
    let icmp = IcmpPacket::new(icmp_bytes).ok_or(truncated)?;

    match icmp.get_icmp_type().0 {
        ICMP_ECHO_REPLY => {
            let echo = EchoReplyPacket::new(icmp_bytes).ok_or(truncated)?;
            Ok(IcmpMessage::EchoReply(EchoReply {
                icmp_type: ICMP_ECHO_REPLY,
                code: echo.get_icmp_code().0,
                checksum: echo.get_checksum(),
                identifier: echo.get_identifier(),
                sequence: echo.get_sequence_number(),
                source: ip.get_source(),
                ttl: ip.get_ttl(),
                byte_count: packet.len(),
                received_at,
            }))
        }
        ICMP_DEST_UNREACHABLE => Ok(IcmpMessage::Unreachable(UnreachableNotice {
            source: ip.get_source(),
            code: icmp.get_icmp_code().0,
        })),
        icmp_type => Err(DecodeError::UnexpectedType { icmp_type }),
    }
}
