// crypto.rs - password cryptography and packet authenticity (spec.md §4.2)
//
// PAP obfuscation, CHAP-MD5, MS-CHAP v1/v2 (NT hash, challenge hash,
// challenge-response, change-password blobs), and the HMAC-MD5 used for
// Message-Authenticator / Response-Authenticator.

use cipher::{BlockEncrypt, KeyInit, StreamCipher};
use des::Des;
use hmac::{Hmac, Mac};
use md4::Md4;
use md5::{Digest, Md5};
use rc4::Rc4;
use sha1::Sha1;

type HmacMd5 = Hmac<Md5>;

/// Pads `password` to the next 16-byte boundary with zero bytes and XORs it
/// block-by-block against a keystream derived from the shared secret and the
/// running ciphertext, per RFC 2865 §5.2. The same function both encrypts
/// and decrypts: XOR is its own inverse.
pub fn pap_crypt(password: &[u8], secret: &[u8], request_authenticator: &[u8; 16]) -> Vec<u8> {
    let padded_len = ((password.len() + 15) / 16).max(1) * 16;
    let mut padded = vec![0u8; padded_len];
    padded[..password.len()].copy_from_slice(password);

    let mut out = vec![0u8; padded_len];
    let mut prev: Vec<u8> = request_authenticator.to_vec();

    for chunk_start in (0..padded_len).step_by(16) {
        let mut hasher = Md5::new();
        hasher.update(secret);
        hasher.update(&prev);
        let b = hasher.finalize();

        let plain_block = &padded[chunk_start..chunk_start + 16];
        let mut cipher_block = [0u8; 16];
        for i in 0..16 {
            cipher_block[i] = plain_block[i] ^ b[i];
        }
        out[chunk_start..chunk_start + 16].copy_from_slice(&cipher_block);
        prev = cipher_block.to_vec();
    }

    out
}

/// Strips trailing zero padding from a PAP-decrypted password. Only valid
/// when the plaintext itself is guaranteed not to end in NUL, which holds
/// for the passwords this crate accepts (RFC 2865 gives no other way to
/// recover the original length).
pub fn strip_pap_padding(mut plain: Vec<u8>) -> Vec<u8> {
    while plain.last() == Some(&0) {
        plain.pop();
    }
    plain
}

/// CHAP-MD5 response (RFC 2865 §2.2 / RFC 1994): `MD5(id || password ||
/// challenge)`.
pub fn chap_md5_response(chap_id: u8, password: &[u8], challenge: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update([chap_id]);
    hasher.update(password);
    hasher.update(challenge);
    hasher.finalize().into()
}

/// HMAC-MD5, used for Message-Authenticator (RFC 2869 §5.14).
pub fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut mac = HmacMd5::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Response-Authenticator (RFC 2865 §3): `MD5(code || id || length ||
/// request_authenticator || attributes || secret)`.
pub fn response_authenticator(
    code: u8,
    identifier: u8,
    length: u16,
    request_authenticator: &[u8; 16],
    attributes: &[u8],
    secret: &[u8],
) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update([code, identifier]);
    hasher.update(length.to_be_bytes());
    hasher.update(request_authenticator);
    hasher.update(attributes);
    hasher.update(secret);
    hasher.finalize().into()
}

/// MD4(UTF-16LE(password)) — the MS-CHAP "NT password hash".
pub fn nt_password_hash(password: &str) -> [u8; 16] {
    let utf16le: Vec<u8> = password
        .encode_utf16()
        .flat_map(|u| u.to_le_bytes())
        .collect();
    let mut hasher = Md4::new();
    hasher.update(&utf16le);
    hasher.finalize().into()
}

/// Expands a 7-byte (56-bit) key into the 8-byte form DES expects, leaving
/// the low bit of each byte as an unused parity slot (DES itself ignores
/// parity; this crate never checks it, matching every interoperable
/// MS-CHAP implementation).
fn expand_des_key(key7: &[u8]) -> [u8; 8] {
    debug_assert_eq!(key7.len(), 7);
    let mut key = [0u8; 8];
    key[0] = key7[0] >> 1;
    key[1] = ((key7[0] & 0x01) << 6) | (key7[1] >> 2);
    key[2] = ((key7[1] & 0x03) << 5) | (key7[2] >> 3);
    key[3] = ((key7[2] & 0x07) << 4) | (key7[3] >> 4);
    key[4] = ((key7[3] & 0x0F) << 3) | (key7[4] >> 5);
    key[5] = ((key7[4] & 0x1F) << 2) | (key7[5] >> 6);
    key[6] = ((key7[5] & 0x3F) << 1) | (key7[6] >> 7);
    key[7] = key7[6] & 0x7F;
    for b in key.iter_mut() {
        *b <<= 1;
    }
    key
}

fn des_encrypt_block(key7: &[u8], block: &[u8; 8]) -> [u8; 8] {
    let key = expand_des_key(key7);
    let cipher = Des::new_from_slice(&key).expect("DES key is exactly 8 bytes");
    let mut buf = cipher::generic_array::GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);
    buf.into()
}

/// `ChallengeResponse` (RFC 2759 §8.4 / RFC 2433 §5): encrypts an 8-byte
/// challenge under three DES keys derived from a 16-byte password hash
/// (zero-padded to 21 bytes), producing a 24-byte response.
pub fn challenge_response(challenge: &[u8; 8], password_hash: &[u8; 16]) -> [u8; 24] {
    let mut zpwd = [0u8; 21];
    zpwd[..16].copy_from_slice(password_hash);

    let mut out = [0u8; 24];
    out[0..8].copy_from_slice(&des_encrypt_block(&zpwd[0..7], challenge));
    out[8..16].copy_from_slice(&des_encrypt_block(&zpwd[7..14], challenge));
    out[16..24].copy_from_slice(&des_encrypt_block(&zpwd[14..21], challenge));
    out
}

/// `ChallengeHash` (RFC 2759 §8.2): `SHA1(peer_challenge || auth_challenge
/// || username)[0..8]`.
pub fn mschap2_challenge_hash(
    peer_challenge: &[u8; 16],
    auth_challenge: &[u8; 16],
    username: &str,
) -> [u8; 8] {
    let mut hasher = Sha1::new();
    hasher.update(peer_challenge);
    hasher.update(auth_challenge);
    hasher.update(username.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[0..8]);
    out
}

/// `GenerateNTResponse` (RFC 2759 §8.1): the full MS-CHAPv2 NT-Response.
pub fn mschap2_nt_response(
    auth_challenge: &[u8; 16],
    peer_challenge: &[u8; 16],
    username: &str,
    password: &str,
) -> [u8; 24] {
    let challenge = mschap2_challenge_hash(peer_challenge, auth_challenge, username);
    let password_hash = nt_password_hash(password);
    challenge_response(&challenge, &password_hash)
}

/// MS-CHAP v1 NT-Response (RFC 2433 §5): the challenge-response taken
/// directly over the 8-byte server challenge, with no peer challenge or
/// challenge-hash step.
pub fn mschap1_nt_response(challenge: &[u8; 8], password: &str) -> [u8; 24] {
    let password_hash = nt_password_hash(password);
    challenge_response(challenge, &password_hash)
}

/// RC4-encrypts `data` with `key`. Used for the MS-CHAPv2 change-password
/// Encrypted-Password blob; RC4 is symmetric so the same function
/// encrypts and (if ever needed) decrypts.
pub fn rc4_crypt(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut cipher = Rc4::new_from_slice(key).expect("RC4 accepts any key length");
    let mut out = data.to_vec();
    cipher.apply_keystream(&mut out);
    out
}

/// Builds the 516-byte `Encrypted-Password` blob from RFC 2759's
/// `NewPasswordEncryptedWithOldNtPasswordHash`: the new password in
/// UTF-16LE, right-justified in a 512-byte block, followed by its
/// little-endian byte length, all RC4'd under the *old* password's NT hash.
pub fn encrypted_password_blob(new_password: &str, old_nt_hash: &[u8; 16]) -> [u8; 516] {
    let utf16le: Vec<u8> = new_password
        .encode_utf16()
        .flat_map(|u| u.to_le_bytes())
        .collect();
    assert!(
        utf16le.len() <= 512,
        "password too long to fit the MS-CHAPv2 change-password block"
    );

    let mut clear = [0u8; 516];
    let offset = 512 - utf16le.len();
    clear[offset..512].copy_from_slice(&utf16le);
    let len = utf16le.len() as u16;
    clear[512..514].copy_from_slice(&len.to_le_bytes());
    // clear[514..516] stay zero, matching the reference implementation.

    let encrypted = rc4_crypt(old_nt_hash, &clear);
    let mut out = [0u8; 516];
    out.copy_from_slice(&encrypted);
    out
}

/// Builds the 16-byte `Encrypted-Hash` blob from RFC 2759's
/// `NtPasswordHashEncryptedWithOldNtPasswordHash`: the new password's NT
/// hash, DES-encrypted in two 8-byte blocks under two 7-byte keys taken
/// from the old password's NT hash.
pub fn encrypted_hash_blob(new_nt_hash: &[u8; 16], old_nt_hash: &[u8; 16]) -> [u8; 16] {
    let mut block0 = [0u8; 8];
    block0.copy_from_slice(&new_nt_hash[0..8]);
    let mut block1 = [0u8; 8];
    block1.copy_from_slice(&new_nt_hash[8..16]);

    let mut out = [0u8; 16];
    out[0..8].copy_from_slice(&des_encrypt_block(&old_nt_hash[0..7], &block0));
    out[8..16].copy_from_slice(&des_encrypt_block(&old_nt_hash[7..14], &block1));
    out
}
