// codec.rs - RADIUS attribute and packet framing (RFC 2865 §5, §3)
//
// Knows four attribute formats (Text, String, Address, Integer) plus Time
// (spec design note: encode as big-endian Unix time rather than leaving it
// unimplemented). Packet framing is `code(1) | id(1) | len(2 be) |
// authenticator(16) | attributes`.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

use crate::error::{RadiusError, Result};

pub const HEADER_LEN: usize = 20;
pub const MAX_PACKET_LEN: usize = 65507;
pub const MAX_ATTR_VALUE_LEN: usize = 253;

/// RADIUS packet codes (RFC 2865 §3, plus Status-Server/Client constants
/// carried for completeness though this crate never sends them).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketCode {
    AccessRequest,
    AccessAccept,
    AccessReject,
    AccountingRequest,
    AccountingResponse,
    AccessChallenge,
    StatusServer,
    StatusClient,
    Other(u8),
}

impl PacketCode {
    pub fn to_u8(self) -> u8 {
        match self {
            PacketCode::AccessRequest => 1,
            PacketCode::AccessAccept => 2,
            PacketCode::AccessReject => 3,
            PacketCode::AccountingRequest => 4,
            PacketCode::AccountingResponse => 5,
            PacketCode::AccessChallenge => 11,
            PacketCode::StatusServer => 12,
            PacketCode::StatusClient => 13,
            PacketCode::Other(v) => v,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => PacketCode::AccessRequest,
            2 => PacketCode::AccessAccept,
            3 => PacketCode::AccessReject,
            4 => PacketCode::AccountingRequest,
            5 => PacketCode::AccountingResponse,
            11 => PacketCode::AccessChallenge,
            12 => PacketCode::StatusServer,
            13 => PacketCode::StatusClient,
            other => PacketCode::Other(other),
        }
    }
}

/// Attribute type codes used by this crate (RFC 2865 §5 subset + the two
/// Microsoft vendor sub-attributes MS-CHAP needs).
pub mod attr {
    pub const USER_NAME: u8 = 1;
    pub const USER_PASSWORD: u8 = 2;
    pub const CHAP_PASSWORD: u8 = 3;
    pub const NAS_IP_ADDRESS: u8 = 4;
    pub const NAS_PORT: u8 = 5;
    pub const SERVICE_TYPE: u8 = 6;
    pub const FRAMED_PROTOCOL: u8 = 7;
    pub const STATE: u8 = 24;
    pub const CLASS: u8 = 25;
    pub const VENDOR_SPECIFIC: u8 = 26;
    pub const SESSION_TIMEOUT: u8 = 27;
    pub const CALLED_STATION_ID: u8 = 30;
    pub const CALLING_STATION_ID: u8 = 31;
    pub const NAS_IDENTIFIER: u8 = 32;
    pub const CHAP_CHALLENGE: u8 = 60;
    pub const EAP_MESSAGE: u8 = 79;
    pub const MESSAGE_AUTHENTICATOR: u8 = 80;

    /// Microsoft vendor ID (RFC 2548).
    pub const MICROSOFT_VENDOR_ID: u32 = 311;
    pub const MS_CHAP_RESPONSE: u8 = 1;
    pub const MS_CHAP_CHALLENGE: u8 = 11;
    pub const MS_CHAP2_RESPONSE: u8 = 25;
    pub const MS_CHAP2_SUCCESS: u8 = 26;
}

/// Wire format of an attribute's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeFormat {
    Text,
    String,
    Address,
    Integer,
    Time,
}

struct AttributeDef {
    #[allow(dead_code)]
    name: &'static str,
    format: AttributeFormat,
}

fn attribute_table() -> &'static HashMap<u8, AttributeDef> {
    static TABLE: OnceLock<HashMap<u8, AttributeDef>> = OnceLock::new();
    TABLE.get_or_init(|| {
        use AttributeFormat::*;
        let defs: &[(u8, &'static str, AttributeFormat)] = &[
            (attr::USER_NAME, "User-Name", Text),
            (attr::USER_PASSWORD, "User-Password", String),
            (attr::CHAP_PASSWORD, "CHAP-Password", String),
            (attr::NAS_IP_ADDRESS, "NAS-IP-Address", Address),
            (attr::NAS_PORT, "NAS-Port", Integer),
            (attr::SERVICE_TYPE, "Service-Type", Integer),
            (attr::FRAMED_PROTOCOL, "Framed-Protocol", Integer),
            (attr::STATE, "State", String),
            (attr::CLASS, "Class", String),
            (attr::VENDOR_SPECIFIC, "Vendor-Specific", String),
            (attr::SESSION_TIMEOUT, "Session-Timeout", Integer),
            (attr::CALLED_STATION_ID, "Called-Station-Id", Text),
            (attr::CALLING_STATION_ID, "Calling-Station-Id", Text),
            (attr::NAS_IDENTIFIER, "NAS-Identifier", Text),
            (attr::CHAP_CHALLENGE, "CHAP-Challenge", String),
            (attr::EAP_MESSAGE, "EAP-Message", String),
            (attr::MESSAGE_AUTHENTICATOR, "Message-Authenticator", String),
        ];
        defs.iter()
            .map(|(code, name, format)| {
                (
                    *code,
                    AttributeDef {
                        name,
                        format: *format,
                    },
                )
            })
            .collect()
    })
}

pub fn format_of(code: u8) -> AttributeFormat {
    attribute_table()
        .get(&code)
        .map(|d| d.format)
        .unwrap_or(AttributeFormat::String)
}

/// Returns true for attribute types that may legally repeat within a single
/// packet (spec.md §3 invariant): Vendor-Specific and EAP-Message.
pub fn is_multivalued(code: u8) -> bool {
    code == attr::VENDOR_SPECIFIC || code == attr::EAP_MESSAGE
}

/// A single Vendor-Specific sub-attribute (RFC 2865 §5.26).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorSubAttribute {
    pub vendor_type: u8,
    pub data: Vec<u8>,
}

/// A decoded attribute value, tagged by the format used to encode it.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Text(String),
    Bytes(Vec<u8>),
    Address(Ipv4Addr),
    Integer(u32),
    Time(u32),
    Vendor {
        vendor_id: u32,
        sub_attributes: Vec<VendorSubAttribute>,
    },
}

/// A single decoded/encodable RADIUS attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub code: u8,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn text(code: u8, value: impl Into<String>) -> Self {
        Attribute {
            code,
            value: AttributeValue::Text(value.into()),
        }
    }

    pub fn bytes(code: u8, value: impl Into<Vec<u8>>) -> Self {
        Attribute {
            code,
            value: AttributeValue::Bytes(value.into()),
        }
    }

    pub fn integer(code: u8, value: u32) -> Self {
        Attribute {
            code,
            value: AttributeValue::Integer(value),
        }
    }

    pub fn address(code: u8, value: Ipv4Addr) -> Self {
        Attribute {
            code,
            value: AttributeValue::Address(value),
        }
    }

    pub fn vendor_specific(vendor_id: u32, vendor_type: u8, data: impl Into<Vec<u8>>) -> Self {
        Attribute {
            code: attr::VENDOR_SPECIFIC,
            value: AttributeValue::Vendor {
                vendor_id,
                sub_attributes: vec![VendorSubAttribute {
                    vendor_type,
                    data: data.into(),
                }],
            },
        }
    }

    /// Raw value bytes, ignoring the type/length header. Used by the
    /// Message-Authenticator HMAC and by callers reading back attributes.
    pub fn value_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_value(&mut out).expect("already-built value");
        out
    }

    fn encode_value(&self, out: &mut Vec<u8>) -> Result<()> {
        match &self.value {
            AttributeValue::Text(s) => out.extend_from_slice(s.as_bytes()),
            AttributeValue::Bytes(b) => out.extend_from_slice(b),
            AttributeValue::Address(addr) => out.extend_from_slice(&addr.octets()),
            AttributeValue::Integer(v) => out.extend_from_slice(&v.to_be_bytes()),
            AttributeValue::Time(v) => out.extend_from_slice(&v.to_be_bytes()),
            AttributeValue::Vendor {
                vendor_id,
                sub_attributes,
            } => {
                out.extend_from_slice(&vendor_id.to_be_bytes());
                for sub in sub_attributes {
                    if sub.data.len() > 253 {
                        return Err(RadiusError::InvalidArgument(format!(
                            "vendor sub-attribute {} too long",
                            sub.vendor_type
                        )));
                    }
                    out.push(sub.vendor_type);
                    out.push((sub.data.len() + 2) as u8);
                    out.extend_from_slice(&sub.data);
                }
            }
        }
        Ok(())
    }

    /// Encodes `type(1) | length(1) | value(...)` onto `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut value = Vec::new();
        self.encode_value(&mut value)?;

        if value.len() > MAX_ATTR_VALUE_LEN {
            return Err(RadiusError::InvalidArgument(format!(
                "attribute {} value too long ({} bytes)",
                self.code,
                value.len()
            )));
        }

        out.push(self.code);
        out.push((value.len() + 2) as u8);
        out.extend_from_slice(&value);
        Ok(())
    }

    fn decode(code: u8, raw: &[u8]) -> Result<Self> {
        let value = if code == attr::VENDOR_SPECIFIC {
            if raw.len() < 4 {
                return Err(RadiusError::InvalidResponse(
                    "Vendor-Specific attribute shorter than vendor-id".into(),
                ));
            }
            let vendor_id = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let mut sub_attributes = Vec::new();
            let mut offset = 4;
            while offset < raw.len() {
                if offset + 2 > raw.len() {
                    return Err(RadiusError::InvalidResponse(
                        "truncated vendor sub-attribute header".into(),
                    ));
                }
                let vendor_type = raw[offset];
                let vendor_length = raw[offset + 1] as usize;
                if vendor_length < 2 || offset + vendor_length > raw.len() {
                    return Err(RadiusError::InvalidResponse(
                        "vendor sub-attribute extends beyond attribute".into(),
                    ));
                }
                let data = raw[offset + 2..offset + vendor_length].to_vec();
                sub_attributes.push(VendorSubAttribute { vendor_type, data });
                // spec.md §9: the source bug advances by `vendor_length` only;
                // the fix advances by the full sub-attribute length.
                offset += vendor_length;
            }
            AttributeValue::Vendor {
                vendor_id,
                sub_attributes,
            }
        } else {
            match format_of(code) {
                AttributeFormat::Text => {
                    AttributeValue::Text(String::from_utf8_lossy(raw).into_owned())
                }
                AttributeFormat::String => AttributeValue::Bytes(raw.to_vec()),
                AttributeFormat::Address => {
                    if raw.len() != 4 {
                        return Err(RadiusError::InvalidResponse(format!(
                            "attribute {} is not a 4-byte address",
                            code
                        )));
                    }
                    AttributeValue::Address(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]))
                }
                AttributeFormat::Integer => {
                    if raw.len() != 4 {
                        return Err(RadiusError::InvalidResponse(format!(
                            "attribute {} is not a 4-byte integer",
                            code
                        )));
                    }
                    AttributeValue::Integer(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
                }
                AttributeFormat::Time => {
                    if raw.len() != 4 {
                        return Err(RadiusError::InvalidResponse(format!(
                            "attribute {} is not a 4-byte time",
                            code
                        )));
                    }
                    AttributeValue::Time(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
                }
            }
        };

        Ok(Attribute { code, value })
    }
}

/// A decoded RADIUS packet: header fields plus the attribute list in wire
/// order (duplicates of multi-valued types are preserved).
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub code: PacketCode,
    pub identifier: u8,
    pub authenticator: [u8; 16],
    pub attributes: Vec<Attribute>,
}

impl RawPacket {
    pub fn get(&self, code: u8) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.code == code)
    }

    pub fn get_all(&self, code: u8) -> Vec<&Attribute> {
        self.attributes.iter().filter(|a| a.code == code).collect()
    }
}

/// Parses a full RADIUS datagram per spec.md §4.1. Rejects undersized or
/// oversized packets, truncated attributes, and a declared length that
/// disagrees with the buffer.
pub fn decode_packet(data: &[u8]) -> Result<RawPacket> {
    if data.len() < 4 || data.len() > MAX_PACKET_LEN {
        return Err(RadiusError::InvalidResponse(format!(
            "bad packet size ({} bytes)",
            data.len()
        )));
    }
    if data.len() < HEADER_LEN {
        return Err(RadiusError::InvalidResponse(
            "packet shorter than RADIUS header".into(),
        ));
    }

    let code = PacketCode::from_u8(data[0]);
    let identifier = data[1];
    let length = u16::from_be_bytes([data[2], data[3]]) as usize;

    if length < HEADER_LEN || length > data.len() {
        return Err(RadiusError::InvalidResponse(format!(
            "declared length {} inconsistent with buffer of {} bytes",
            length,
            data.len()
        )));
    }

    let mut authenticator = [0u8; 16];
    authenticator.copy_from_slice(&data[4..20]);

    let mut attributes = Vec::new();
    let mut offset = HEADER_LEN;
    while offset < length {
        if offset + 2 > length {
            return Err(RadiusError::InvalidResponse("truncated attribute header".into()));
        }
        let attr_code = data[offset];
        let attr_len = data[offset + 1] as usize;
        if attr_len < 2 || offset + attr_len > length {
            return Err(RadiusError::InvalidResponse(format!(
                "attribute {} extends beyond packet",
                attr_code
            )));
        }
        let raw = &data[offset + 2..offset + attr_len];
        attributes.push(Attribute::decode(attr_code, raw)?);
        offset += attr_len;
    }

    Ok(RawPacket {
        code,
        identifier,
        authenticator,
        attributes,
    })
}

/// Encodes the packet header and attribute list. `authenticator` is
/// whatever the caller has computed so far (Request-Authenticator for a
/// request, the zero-filled placeholder while computing
/// Message-Authenticator).
pub fn encode_packet(
    code: PacketCode,
    identifier: u8,
    authenticator: &[u8; 16],
    attributes: &[Attribute],
) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    for a in attributes {
        a.encode(&mut body)?;
    }

    let total_len = HEADER_LEN + body.len();
    if total_len > MAX_PACKET_LEN {
        return Err(RadiusError::InvalidArgument(
            "packet exceeds maximum RADIUS datagram size".into(),
        ));
    }

    let mut out = Vec::with_capacity(total_len);
    out.push(code.to_u8());
    out.push(identifier);
    out.extend_from_slice(&(total_len as u16).to_be_bytes());
    out.extend_from_slice(authenticator);
    out.extend_from_slice(&body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_attribute_round_trips() {
        let attr = Attribute::text(attr::USER_NAME, "alice");
        let mut buf = Vec::new();
        attr.encode(&mut buf).unwrap();
        assert_eq!(buf, vec![1, 7, b'a', b'l', b'i', b'c', b'e']);

        let decoded = Attribute::decode(attr::USER_NAME, &buf[2..]).unwrap();
        assert_eq!(decoded.value, AttributeValue::Text("alice".into()));
    }

    #[test]
    fn integer_attribute_is_big_endian() {
        let attr = Attribute::integer(attr::SERVICE_TYPE, 1);
        let mut buf = Vec::new();
        attr.encode(&mut buf).unwrap();
        assert_eq!(buf, vec![6, 6, 0, 0, 0, 1]);
    }

    #[test]
    fn address_attribute_round_trips() {
        let addr = Ipv4Addr::new(192, 0, 2, 10);
        let attr = Attribute::address(attr::NAS_IP_ADDRESS, addr);
        let mut buf = Vec::new();
        attr.encode(&mut buf).unwrap();
        let decoded = Attribute::decode(attr::NAS_IP_ADDRESS, &buf[2..]).unwrap();
        assert_eq!(decoded.value, AttributeValue::Address(addr));
    }

    #[test]
    fn time_attribute_round_trips() {
        let attr = Attribute {
            code: 55,
            value: AttributeValue::Time(1_700_000_000),
        };
        let mut buf = Vec::new();
        attr.encode(&mut buf).unwrap();
        assert_eq!(&buf[2..], &1_700_000_000u32.to_be_bytes());
    }

    #[test]
    fn vendor_specific_decode_advances_past_sub_attribute_header() {
        // Two sub-attributes back to back: type=1 len=6 (4 bytes data),
        // type=2 len=5 (3 bytes data). The off-by-two bug noted in spec.md
        // §9 would stop after the first 4 bytes of the second sub-attribute.
        let mut raw = Vec::new();
        raw.extend_from_slice(&311u32.to_be_bytes());
        raw.push(1);
        raw.push(6);
        raw.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        raw.push(2);
        raw.push(5);
        raw.extend_from_slice(&[0x11, 0x22, 0x33]);

        let attr = Attribute::decode(attr::VENDOR_SPECIFIC, &raw).unwrap();
        match attr.value {
            AttributeValue::Vendor {
                vendor_id,
                sub_attributes,
            } => {
                assert_eq!(vendor_id, 311);
                assert_eq!(sub_attributes.len(), 2);
                assert_eq!(sub_attributes[0].vendor_type, 1);
                assert_eq!(sub_attributes[0].data, vec![0xAA, 0xBB, 0xCC, 0xDD]);
                assert_eq!(sub_attributes[1].vendor_type, 2);
                assert_eq!(sub_attributes[1].data, vec![0x11, 0x22, 0x33]);
            }
            _ => panic!("expected vendor attribute"),
        }
    }

    #[test]
    fn decode_packet_rejects_undersized_buffer() {
        let err = decode_packet(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidResponse);
    }

    #[test]
    fn decode_packet_rejects_length_mismatch() {
        let mut data = vec![2u8, 7, 0, 255];
        data.extend_from_slice(&[0u8; 16]);
        let err = decode_packet(&data).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidResponse);
    }

    #[test]
    fn packet_length_law() {
        let attrs = vec![Attribute::text(attr::USER_NAME, "bob")];
        let auth = [0u8; 16];
        let bytes = encode_packet(PacketCode::AccessRequest, 42, &auth, &attrs).unwrap();
        let declared = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        assert_eq!(declared, bytes.len());
    }
}
