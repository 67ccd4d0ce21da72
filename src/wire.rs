//! Wire-level message codec: parses and serializes DHCPv4 datagrams per
//! RFC 2131/2132.
//!
//! `BytesIn`/`BytesOut` are small byte-cursor helpers over a fixed layout;
//! unlike a no-alloc embedded codec this one sizes everything up to an
//! owned, heap-backed `DhcpMessage` so a server can hold parsed messages
//! across thread boundaries.

use std::net::Ipv4Addr;

use crate::error::WireError;

/// The four-byte marker that must precede the options block.
pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

const BOOTP_HEADER_LEN: usize = 236;
const SNAME_LEN: usize = 64;
const FILE_LEN: usize = 128;
const MIN_PARSE_LEN: usize = BOOTP_HEADER_LEN + 4;
/// Classic minimum serialized size for a BOOTP/DHCP datagram.
pub const MIN_SERIALIZED_LEN: usize = 300;

pub const OP_BOOTREQUEST: u8 = 1;
pub const OP_BOOTREPLY: u8 = 2;

const OPT_PAD: u8 = 0;
const OPT_END: u8 = 255;
pub const OPT_MESSAGE_TYPE: u8 = 53;
pub const OPT_SERVER_IDENTIFIER: u8 = 54;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_PARAMETER_REQUEST_LIST: u8 = 55;
pub const OPT_IP_LEASE_TIME: u8 = 51;
pub const OPT_RENEWAL_TIME: u8 = 58;
pub const OPT_REBINDING_TIME: u8 = 59;
pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DOMAIN_NAME_SERVER: u8 = 6;
pub const OPT_HOST_NAME: u8 = 12;
pub const OPT_DOMAIN_NAME: u8 = 15;
pub const OPT_CLIENT_IDENTIFIER: u8 = 61;
pub const OPT_RELAY_AGENT_INFO: u8 = 82;
pub const OPT_OVERLOAD: u8 = 52;

/// DHCP message type, carried in option 53.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Result<Self, WireError> {
        Ok(match v {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            other => return Err(WireError::InvalidMessageType(other)),
        })
    }
}

/// An option as it appears on the wire: an opaque `code` plus its raw body.
/// Unknown and well-known codes alike are never named enumerators here —
/// every option is `(code: u8, bytes: Vec<u8>)` and higher layers
/// (`options.rs`) interpret well-known codes on top of this.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RawOption {
    pub code: u8,
    pub data: Vec<u8>,
}

/// A parsed BOOTP/DHCP datagram.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DhcpMessage {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; SNAME_LEN],
    pub file: [u8; FILE_LEN],
    pub options: Vec<RawOption>,
}

impl DhcpMessage {
    pub const BROADCAST_FLAG: u16 = 0x8000;

    pub fn is_broadcast(&self) -> bool {
        self.flags & Self::BROADCAST_FLAG != 0
    }

    pub fn option(&self, code: u8) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|o| o.code == code)
            .map(|o| o.data.as_slice())
    }

    pub fn message_type(&self) -> Result<MessageType, WireError> {
        let data = self.option(OPT_MESSAGE_TYPE).ok_or(WireError::MissingMessageType)?;
        let byte = *data.first().ok_or(WireError::MissingMessageType)?;
        MessageType::from_u8(byte)
    }

    pub fn client_mac(&self) -> crate::addr::Mac {
        crate::addr::Mac::from_chaddr(&self.chaddr, self.hlen)
    }

    /// Parses a datagram. Duplicate option codes: the later instance
    /// replaces the earlier one, since RFC 3396 concatenation is not
    /// required for any option this server interprets.
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < MIN_PARSE_LEN {
            return Err(WireError::ShortDatagram { len: data.len() });
        }

        let mut cur = BytesIn::new(data);

        let op = cur.byte();
        let htype = cur.byte();
        let hlen = cur.byte();
        if hlen > 16 {
            return Err(WireError::InvalidHlen(hlen));
        }
        let hops = cur.byte();
        let xid = u32::from_be_bytes(cur.arr4());
        let secs = u16::from_be_bytes(cur.arr2());
        let flags = u16::from_be_bytes(cur.arr2());
        let ciaddr = Ipv4Addr::from(cur.arr4());
        let yiaddr = Ipv4Addr::from(cur.arr4());
        let siaddr = Ipv4Addr::from(cur.arr4());
        let giaddr = Ipv4Addr::from(cur.arr4());

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(cur.slice(16));

        let mut sname = [0u8; SNAME_LEN];
        sname.copy_from_slice(cur.slice(SNAME_LEN));

        let mut file = [0u8; FILE_LEN];
        file.copy_from_slice(cur.slice(FILE_LEN));

        let cookie = cur.slice(4);
        if cookie != MAGIC_COOKIE {
            return Err(WireError::BadMagic);
        }

        // Option overload (code 52) is rejected rather than honored: see
        // DESIGN.md Open Question #1.
        let options = parse_options(cur.remaining())?;
        if options.iter().any(|o| o.code == OPT_OVERLOAD) {
            return Err(WireError::OptionOverload);
        }

        Ok(DhcpMessage {
            op,
            htype,
            hlen,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            file,
            options,
        })
    }

    /// Serializes the datagram. Options are emitted in insertion order,
    /// then END, then PAD out to [`MIN_SERIALIZED_LEN`].
    pub fn serialize(&self) -> Result<Vec<u8>, WireError> {
        for opt in &self.options {
            if opt.data.len() > 255 {
                return Err(WireError::OptionTooLarge(opt.code));
            }
        }

        let mut out = BytesOut::new();
        out.byte(self.op);
        out.byte(self.htype);
        out.byte(self.hlen);
        out.byte(self.hops);
        out.push(&self.xid.to_be_bytes());
        out.push(&self.secs.to_be_bytes());
        out.push(&self.flags.to_be_bytes());
        out.push(&self.ciaddr.octets());
        out.push(&self.yiaddr.octets());
        out.push(&self.siaddr.octets());
        out.push(&self.giaddr.octets());
        out.push(&self.chaddr);
        out.push(&self.sname);
        out.push(&self.file);
        out.push(&MAGIC_COOKIE);

        for opt in &self.options {
            if opt.code == OPT_PAD || opt.code == OPT_END {
                continue;
            }
            out.byte(opt.code);
            out.byte(opt.data.len() as u8);
            out.push(&opt.data);
        }
        out.byte(OPT_END);

        while out.len() < MIN_SERIALIZED_LEN {
            out.byte(OPT_PAD);
        }

        Ok(out.into_vec())
    }
}

fn parse_options(data: &[u8]) -> Result<Vec<RawOption>, WireError> {
    let mut options: Vec<RawOption> = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        let code = data[offset];
        offset += 1;

        if code == OPT_PAD {
            continue;
        }
        if code == OPT_END {
            break;
        }

        let len = *data.get(offset).ok_or(WireError::OptionOverflow {
            code,
            len: 0,
            offset,
        })? as usize;
        offset += 1;

        if offset + len > data.len() {
            return Err(WireError::OptionOverflow { code, len, offset });
        }

        let body = data[offset..offset + len].to_vec();
        offset += len;

        if let Some(existing) = options.iter_mut().find(|o| o.code == code) {
            existing.data = body;
        } else {
            options.push(RawOption { code, data: body });
        }
    }

    Ok(options)
}

struct BytesIn<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BytesIn<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn byte(&mut self) -> u8 {
        let b = self.data[self.offset];
        self.offset += 1;
        b
    }

    fn arr2(&mut self) -> [u8; 2] {
        let a = [self.data[self.offset], self.data[self.offset + 1]];
        self.offset += 2;
        a
    }

    fn arr4(&mut self) -> [u8; 4] {
        let mut a = [0u8; 4];
        a.copy_from_slice(&self.data[self.offset..self.offset + 4]);
        self.offset += 4;
        a
    }

    fn slice(&mut self, len: usize) -> &'a [u8] {
        let s = &self.data[self.offset..self.offset + len];
        self.offset += len;
        s
    }

    fn remaining(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }
}

struct BytesOut {
    buf: Vec<u8>,
}

impl BytesOut {
    fn new() -> Self {
        Self {
            buf: Vec::with_capacity(MIN_SERIALIZED_LEN),
        }
    }

    fn byte(&mut self, b: u8) {
        self.buf.push(b);
    }

    fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DhcpMessage {
        DhcpMessage {
            op: OP_BOOTREQUEST,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 0x1234_5678,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: {
                let mut c = [0u8; 16];
                c[..6].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
                c
            },
            sname: [0u8; SNAME_LEN],
            file: [0u8; FILE_LEN],
            options: vec![RawOption {
                code: OPT_MESSAGE_TYPE,
                data: vec![MessageType::Discover as u8],
            }],
        }
    }

    #[test]
    fn round_trip_preserves_fields_and_option_order() {
        let msg = sample();
        let bytes = msg.serialize().unwrap();
        let parsed = DhcpMessage::parse(&bytes).unwrap();
        assert_eq!(parsed.xid, msg.xid);
        assert_eq!(parsed.chaddr, msg.chaddr);
        assert_eq!(parsed.options, msg.options);
        assert_eq!(parsed.message_type().unwrap(), MessageType::Discover);
    }

    #[test]
    fn short_datagram_is_rejected() {
        let err = DhcpMessage::parse(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, WireError::ShortDatagram { .. }));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = sample().serialize().unwrap();
        bytes[236] = 0; // corrupt the cookie
        let err = DhcpMessage::parse(&bytes).unwrap_err();
        assert!(matches!(err, WireError::BadMagic));
    }

    #[test]
    fn missing_message_type_is_rejected() {
        let mut msg = sample();
        msg.options.clear();
        let bytes = msg.serialize().unwrap();
        let err = DhcpMessage::parse(&bytes).unwrap_err();
        assert!(matches!(err, WireError::MissingMessageType));
    }

    #[test]
    fn duplicate_option_codes_keep_last_value() {
        let mut msg = sample();
        msg.options.push(RawOption {
            code: OPT_HOST_NAME,
            data: b"first".to_vec(),
        });
        msg.options.push(RawOption {
            code: OPT_HOST_NAME,
            data: b"second".to_vec(),
        });
        let bytes = msg.serialize().unwrap();
        let parsed = DhcpMessage::parse(&bytes).unwrap();
        assert_eq!(parsed.option(OPT_HOST_NAME), Some(&b"second"[..]));
    }

    #[test]
    fn serialized_size_has_classic_minimum() {
        let bytes = sample().serialize().unwrap();
        assert!(bytes.len() >= MIN_SERIALIZED_LEN);
    }

    #[test]
    fn oversized_option_is_rejected() {
        let mut msg = sample();
        msg.options.push(RawOption {
            code: 99,
            data: vec![0u8; 256],
        });
        let err = msg.serialize().unwrap_err();
        assert!(matches!(err, WireError::OptionTooLarge(99)));
    }

    #[test]
    fn overload_option_is_rejected_at_parse_time() {
        let mut msg = sample();
        msg.options.push(RawOption {
            code: OPT_OVERLOAD,
            data: vec![1],
        });
        let bytes = msg.serialize().unwrap();
        let err = DhcpMessage::parse(&bytes).unwrap_err();
        assert!(matches!(err, WireError::OptionOverload));
    }
}
