// builder.rs - packet assembly (spec.md §4.4)
//
// Owns identifier/Request-Authenticator generation and the
// zero-then-HMAC-then-overwrite dance for Message-Authenticator.

use rand::RngCore;

use crate::codec::{attr, encode_packet, Attribute, AttributeValue, PacketCode};
use crate::crypto::hmac_md5;
use crate::error::Result;

/// Fills an `N`-byte array with cryptographically random bytes. Used for the
/// Request-Authenticator (16 bytes), MS-CHAPv2 peer challenge (16 bytes),
/// and MS-CHAPv1 challenge (8 bytes).
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// A monotonically-increasing (mod 256) RADIUS packet identifier counter,
/// owned by the `Client` (spec.md §3 invariant: "the Session Engine's
/// next-id counter increments mod 256").
#[derive(Debug, Default)]
pub struct IdentifierCounter(u8);

impl IdentifierCounter {
    pub fn next(&mut self) -> u8 {
        let id = self.0;
        self.0 = self.0.wrapping_add(1);
        id
    }
}

/// Serializes `attributes` into a full RADIUS datagram. If a
/// Message-Authenticator attribute is present, its value is zeroed, the
/// packet is encoded, HMAC-MD5 is computed over the whole thing, and the
/// result is patched back in place (RFC 2869 §5.14).
pub fn build_packet(
    code: PacketCode,
    identifier: u8,
    authenticator: &[u8; 16],
    attributes: &[Attribute],
    secret: &[u8],
) -> Result<Vec<u8>> {
    let mut attrs = attributes.to_vec();
    let mut has_message_authenticator = false;
    for a in attrs.iter_mut() {
        if a.code == attr::MESSAGE_AUTHENTICATOR {
            a.value = AttributeValue::Bytes(vec![0u8; 16]);
            has_message_authenticator = true;
        }
    }

    let mut bytes = encode_packet(code, identifier, authenticator, &attrs)?;

    if has_message_authenticator {
        let mac = hmac_md5(secret, &bytes);

        let mut offset = crate::codec::HEADER_LEN;
        for a in &attrs {
            let value_len = a.value_bytes().len();
            if a.code == attr::MESSAGE_AUTHENTICATOR {
                bytes[offset + 2..offset + 18].copy_from_slice(&mac);
                break;
            }
            offset += 2 + value_len;
        }
    }

    Ok(bytes)
}
