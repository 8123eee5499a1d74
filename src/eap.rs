// eap.rs - EAP framing and MS-CHAPv2 sub-packets (spec.md §4.5)

use crate::codec::MAX_ATTR_VALUE_LEN;
use crate::error::{RadiusError, Result};

pub mod eap_code {
    pub const REQUEST: u8 = 1;
    pub const RESPONSE: u8 = 2;
    pub const SUCCESS: u8 = 3;
    pub const FAILURE: u8 = 4;
}

pub mod eap_type {
    pub const IDENTITY: u8 = 1;
    pub const NOTIFICATION: u8 = 2;
    pub const NAK: u8 = 3;
    pub const MD5_CHALLENGE: u8 = 4;
    pub const OTP: u8 = 5;
    pub const GENERIC_TOKEN: u8 = 6;
    pub const PEAP: u8 = 25;
    pub const MS_AUTH: u8 = 26;
}

pub mod ms_chap2_opcode {
    pub const CHALLENGE: u8 = 1;
    pub const RESPONSE: u8 = 2;
    pub const SUCCESS: u8 = 3;
    pub const FAILURE: u8 = 4;
    pub const CHANGE_PASSWORD: u8 = 7;
}

/// An EAP header and payload (RFC 3748 §4). Success/Failure carry no type
/// byte, matching spec.md §4.5.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapPacket {
    pub code: u8,
    pub id: u8,
    pub type_code: Option<u8>,
    pub data: Vec<u8>,
}

impl EapPacket {
    pub fn identity_response(id: u8, username: &str) -> Self {
        EapPacket {
            code: eap_code::RESPONSE,
            id,
            type_code: Some(eap_type::IDENTITY),
            data: username.as_bytes().to_vec(),
        }
    }

    pub fn legacy_nak(id: u8, desired_type: u8) -> Self {
        EapPacket {
            code: eap_code::RESPONSE,
            id,
            type_code: Some(eap_type::NAK),
            data: vec![desired_type],
        }
    }

    pub fn ms_auth_response(id: u8, sub_packet: Vec<u8>) -> Self {
        EapPacket {
            code: eap_code::RESPONSE,
            id,
            type_code: Some(eap_type::MS_AUTH),
            data: sub_packet,
        }
    }

    pub fn success(id: u8) -> Self {
        EapPacket {
            code: eap_code::SUCCESS,
            id,
            type_code: None,
            data: Vec::new(),
        }
    }

    pub fn failure(id: u8) -> Self {
        EapPacket {
            code: eap_code::FAILURE,
            id,
            type_code: None,
            data: Vec::new(),
        }
    }

    /// `code(1) | id(1) | length(2 be) | [type(1) | data]`.
    pub fn encode(&self) -> Vec<u8> {
        let body_len = self.type_code.map(|_| 1 + self.data.len()).unwrap_or(0);
        let length = 4 + body_len;

        let mut out = Vec::with_capacity(length);
        out.push(self.code);
        out.push(self.id);
        out.extend_from_slice(&(length as u16).to_be_bytes());
        if let Some(type_code) = self.type_code {
            out.push(type_code);
            out.extend_from_slice(&self.data);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(RadiusError::ProtocolError("EAP header truncated".into()));
        }
        let code = buf[0];
        let id = buf[1];
        let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if length < 4 || length > buf.len() {
            return Err(RadiusError::ProtocolError(format!(
                "EAP length {length} inconsistent with {}-byte payload",
                buf.len()
            )));
        }

        if length == 4 {
            return Ok(EapPacket {
                code,
                id,
                type_code: None,
                data: Vec::new(),
            });
        }

        let type_code = buf[4];
        let data = buf[5..length].to_vec();
        Ok(EapPacket {
            code,
            id,
            type_code: Some(type_code),
            data,
        })
    }
}

/// A decoded MS-CHAPv2 sub-packet (RFC 2759), carried as the `data` of an
/// EAP packet whose type is `MS_AUTH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsChap2Packet {
    Challenge {
        ms_chap_id: u8,
        challenge: [u8; 16],
        name: Vec<u8>,
    },
    Response {
        ms_chap_id: u8,
        peer_challenge: [u8; 16],
        nt_response: [u8; 24],
        flags: u8,
        name: Vec<u8>,
    },
    Success {
        ms_chap_id: u8,
        message: Vec<u8>,
    },
    Failure {
        ms_chap_id: u8,
        message: Vec<u8>,
    },
    ChangePassword {
        ms_chap_id: u8,
        encrypted_password: [u8; 516],
        encrypted_hash: [u8; 16],
        peer_challenge: [u8; 16],
        nt_response: [u8; 24],
        flags: u16,
    },
}

fn wrap(opcode: u8, ms_chap_id: u8, payload: &[u8]) -> Vec<u8> {
    let ms_length = (4 + payload.len()) as u16;
    let mut out = Vec::with_capacity(ms_length as usize);
    out.push(opcode);
    out.push(ms_chap_id);
    out.extend_from_slice(&ms_length.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

impl MsChap2Packet {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            MsChap2Packet::Challenge {
                ms_chap_id,
                challenge,
                name,
            } => {
                let mut payload = Vec::with_capacity(17 + name.len());
                payload.push(16u8);
                payload.extend_from_slice(challenge);
                payload.extend_from_slice(name);
                wrap(ms_chap2_opcode::CHALLENGE, *ms_chap_id, &payload)
            }
            MsChap2Packet::Response {
                ms_chap_id,
                peer_challenge,
                nt_response,
                flags,
                name,
            } => {
                let mut value = Vec::with_capacity(49);
                value.extend_from_slice(peer_challenge);
                value.extend_from_slice(&[0u8; 8]);
                value.extend_from_slice(nt_response);
                value.push(*flags);

                let mut payload = Vec::with_capacity(1 + value.len() + name.len());
                payload.push(value.len() as u8);
                payload.extend_from_slice(&value);
                payload.extend_from_slice(name);
                wrap(ms_chap2_opcode::RESPONSE, *ms_chap_id, &payload)
            }
            MsChap2Packet::Success { ms_chap_id, message } => {
                wrap(ms_chap2_opcode::SUCCESS, *ms_chap_id, message)
            }
            MsChap2Packet::Failure { ms_chap_id, message } => {
                wrap(ms_chap2_opcode::FAILURE, *ms_chap_id, message)
            }
            MsChap2Packet::ChangePassword {
                ms_chap_id,
                encrypted_password,
                encrypted_hash,
                peer_challenge,
                nt_response,
                flags,
            } => {
                let mut payload = Vec::with_capacity(582);
                payload.extend_from_slice(encrypted_password);
                payload.extend_from_slice(encrypted_hash);
                payload.extend_from_slice(peer_challenge);
                payload.extend_from_slice(&[0u8; 8]);
                payload.extend_from_slice(nt_response);
                payload.extend_from_slice(&flags.to_be_bytes());
                wrap(ms_chap2_opcode::CHANGE_PASSWORD, *ms_chap_id, &payload)
            }
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(RadiusError::ProtocolError(
                "MS-CHAPv2 sub-packet truncated".into(),
            ));
        }
        let opcode = buf[0];
        let ms_chap_id = buf[1];
        let ms_length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if ms_length < 4 || ms_length > buf.len() {
            return Err(RadiusError::ProtocolError(format!(
                "MS-CHAPv2 length {ms_length} inconsistent with {}-byte payload",
                buf.len()
            )));
        }
        let payload = &buf[4..ms_length];

        match opcode {
            ms_chap2_opcode::CHALLENGE => {
                if payload.is_empty() || payload[0] as usize != 16 || payload.len() < 17 {
                    return Err(RadiusError::ProtocolError(
                        "malformed MS-CHAPv2 Challenge".into(),
                    ));
                }
                let mut challenge = [0u8; 16];
                challenge.copy_from_slice(&payload[1..17]);
                let name = payload[17..].to_vec();
                Ok(MsChap2Packet::Challenge {
                    ms_chap_id,
                    challenge,
                    name,
                })
            }
            ms_chap2_opcode::RESPONSE => {
                if payload.is_empty() || payload[0] as usize != 49 || payload.len() < 50 {
                    return Err(RadiusError::ProtocolError(
                        "malformed MS-CHAPv2 Response".into(),
                    ));
                }
                let value = &payload[1..50];
                let mut peer_challenge = [0u8; 16];
                peer_challenge.copy_from_slice(&value[0..16]);
                let mut nt_response = [0u8; 24];
                nt_response.copy_from_slice(&value[24..48]);
                let flags = value[48];
                let name = payload[50..].to_vec();
                Ok(MsChap2Packet::Response {
                    ms_chap_id,
                    peer_challenge,
                    nt_response,
                    flags,
                    name,
                })
            }
            ms_chap2_opcode::SUCCESS => Ok(MsChap2Packet::Success {
                ms_chap_id,
                message: payload.to_vec(),
            }),
            ms_chap2_opcode::FAILURE => Ok(MsChap2Packet::Failure {
                ms_chap_id,
                message: payload.to_vec(),
            }),
            ms_chap2_opcode::CHANGE_PASSWORD => {
                if payload.len() < 582 {
                    return Err(RadiusError::ProtocolError(
                        "malformed MS-CHAPv2 ChangePassword".into(),
                    ));
                }
                let mut encrypted_password = [0u8; 516];
                encrypted_password.copy_from_slice(&payload[0..516]);
                let mut encrypted_hash = [0u8; 16];
                encrypted_hash.copy_from_slice(&payload[516..532]);
                let mut peer_challenge = [0u8; 16];
                peer_challenge.copy_from_slice(&payload[532..548]);
                let mut nt_response = [0u8; 24];
                nt_response.copy_from_slice(&payload[556..580]);
                let flags = u16::from_be_bytes([payload[580], payload[581]]);
                Ok(MsChap2Packet::ChangePassword {
                    ms_chap_id,
                    encrypted_password,
                    encrypted_hash,
                    peer_challenge,
                    nt_response,
                    flags,
                })
            }
            other => Err(RadiusError::ProtocolError(format!(
                "unknown MS-CHAPv2 opcode {other}"
            ))),
        }
    }
}

/// The parsed fields of an MS-CHAPv2 Failure ASCII payload: `E=<code>
/// R=<retry> C=<16-hex-byte challenge> V=<version> M=<message>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsChapFailure {
    pub code: u32,
    pub retriable: bool,
    pub challenge: Option<[u8; 16]>,
    pub version: u32,
    pub message: String,
}

pub fn parse_failure_message(bytes: &[u8]) -> Result<MsChapFailure> {
    let text = String::from_utf8_lossy(bytes);
    let (fields_part, message) = match text.find("M=") {
        Some(idx) => (&text[..idx], text[idx + 2..].trim().to_string()),
        None => (&text[..], String::new()),
    };

    let mut code = None;
    let mut retriable = false;
    let mut challenge = None;
    let mut version = 0u32;

    for token in fields_part.split_whitespace() {
        if let Some(v) = token.strip_prefix("E=") {
            code = v.parse().ok();
        } else if let Some(v) = token.strip_prefix("R=") {
            retriable = v == "1";
        } else if let Some(v) = token.strip_prefix("C=") {
            challenge = decode_hex16(v);
        } else if let Some(v) = token.strip_prefix("V=") {
            version = v.parse().unwrap_or(0);
        }
    }

    let code = code.ok_or_else(|| {
        RadiusError::ProtocolError("MS-CHAPv2 failure message missing E= code".into())
    })?;

    Ok(MsChapFailure {
        code,
        retriable,
        challenge,
        version,
        message,
    })
}

/// Builds the ASCII Failure payload text; used by tests driving a fake
/// RADIUS server, and a convenience for any caller that needs the wire
/// format of a failure it is constructing.
pub fn format_failure_message(failure: &MsChapFailure) -> Vec<u8> {
    let challenge_hex = failure
        .challenge
        .map(|c| hex::encode_upper(c))
        .unwrap_or_default();
    format!(
        "E={} R={} C={} V={} M={}",
        failure.code,
        if failure.retriable { 1 } else { 0 },
        challenge_hex,
        failure.version,
        failure.message
    )
    .into_bytes()
}

fn decode_hex16(s: &str) -> Option<[u8; 16]> {
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}

/// Splits an EAP payload into `ceil(len / 253)` chunks, each small enough
/// to fit in one EAP-Message attribute (spec.md §9's open question:
/// derive the count, never hardcode it).
pub fn split_eap_message(payload: &[u8]) -> Vec<Vec<u8>> {
    if payload.is_empty() {
        return vec![Vec::new()];
    }
    payload
        .chunks(MAX_ATTR_VALUE_LEN)
        .map(|c| c.to_vec())
        .collect()
}

/// Concatenates EAP-Message attribute values back into one payload, in the
/// order they appeared on the wire.
pub fn join_eap_messages(chunks: &[Vec<u8>]) -> Vec<u8> {
    chunks.concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_response_round_trips() {
        let packet = EapPacket::identity_response(3, "alice");
        let bytes = packet.encode();
        let decoded = EapPacket::decode(&bytes).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn success_has_no_type_byte() {
        let packet = EapPacket::success(9);
        let bytes = packet.encode();
        assert_eq!(bytes, vec![eap_code::SUCCESS, 9, 0, 4]);
    }

    #[test]
    fn legacy_nak_round_trips() {
        let packet = EapPacket::legacy_nak(4, eap_type::MS_AUTH);
        let bytes = packet.encode();
        let decoded = EapPacket::decode(&bytes).unwrap();
        assert_eq!(decoded.type_code, Some(eap_type::NAK));
        assert_eq!(decoded.data, vec![eap_type::MS_AUTH]);
    }

    #[test]
    fn ms_chap2_response_round_trips() {
        let packet = MsChap2Packet::Response {
            ms_chap_id: 7,
            peer_challenge: [0x11; 16],
            nt_response: [0x22; 24],
            flags: 0,
            name: b"alice".to_vec(),
        };
        let bytes = packet.encode();
        let decoded = MsChap2Packet::decode(&bytes).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn ms_chap2_challenge_round_trips() {
        let packet = MsChap2Packet::Challenge {
            ms_chap_id: 1,
            challenge: [0xAB; 16],
            name: b"server".to_vec(),
        };
        let bytes = packet.encode();
        let decoded = MsChap2Packet::decode(&bytes).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn failure_message_e691_parses_per_spec_scenario() {
        let text = b"E=691 R=0 C=00112233445566778899AABBCCDDEEFF V=3 M=Authentication failure";
        let failure = parse_failure_message(text).unwrap();
        assert_eq!(failure.code, 691);
        assert!(!failure.retriable);
        assert_eq!(failure.version, 3);
        assert_eq!(failure.message, "Authentication failure");
        assert_eq!(
            failure.challenge,
            Some([
                0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC,
                0xDD, 0xEE, 0xFF
            ])
        );
    }

    #[test]
    fn failure_message_round_trips_through_format() {
        let failure = MsChapFailure {
            code: 648,
            retriable: true,
            challenge: Some([0x42; 16]),
            version: 3,
            message: "Password expired".into(),
        };
        let bytes = format_failure_message(&failure);
        let parsed = parse_failure_message(&bytes).unwrap();
        assert_eq!(parsed, failure);
    }

    #[test]
    fn eap_split_matches_ceil_division() {
        let payload = vec![0u8; 600];
        let chunks = split_eap_message(&payload);
        assert_eq!(chunks.len(), 3); // ceil(600 / 253) == 3
        assert_eq!(join_eap_messages(&chunks), payload);
    }

    #[test]
    fn eap_split_of_exact_multiple_has_no_trailing_empty_chunk() {
        let payload = vec![7u8; 253 * 2];
        let chunks = split_eap_message(&payload);
        assert_eq!(chunks.len(), 2);
    }
}
