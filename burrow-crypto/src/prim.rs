//! Hash, MAC, and key-derivation primitives, and the rolling handshake state.

use blake2::digest::consts::U16;
use blake2::digest::Digest;
use blake2::Blake2s256;
use chacha20poly1305::Nonce;
use hmac::SimpleHmac;
use tai64::Tai64N;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use burrow_types::Mac;

use crate::CryptoError;

/// 32-byte symmetric key or hash output.
pub type Key = [u8; 32];

pub(crate) const LABEL_MAC1: [u8; 8] = *b"mac1----";
pub(crate) const LABEL_COOKIE: [u8; 8] = *b"cookie--";

/// Construction: The UTF-8 string literal “Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s”, 37 bytes of output.
/// Identifier: The UTF-8 string literal “WireGuard v1 zx2c4 Jason@zx2c4.com”, 34 bytes of output.
/// Ci := Hash(Construction)
/// Hi := Hash(Ci || Identifier)
const CONSTRUCTION_HASH: Key = [
    96, 226, 109, 174, 243, 39, 239, 192, 46, 195, 53, 226, 160, 37, 210, 208, 22, 235, 66, 6, 248,
    114, 119, 245, 45, 56, 209, 152, 139, 120, 205, 54,
];
const IDENTIFIER_HASH: Key = [
    34, 17, 179, 97, 8, 26, 197, 102, 105, 18, 67, 219, 69, 138, 213, 50, 45, 156, 108, 102, 34,
    147, 232, 183, 14, 225, 156, 101, 186, 7, 158, 243,
];

/// Transport/handshake AEAD nonce: 4 zero bytes, then the counter little-endian.
pub fn nonce(counter: u64) -> Nonce {
    let mut n = Nonce::default();
    n[4..].copy_from_slice(&counter.to_le_bytes());
    n
}

pub(crate) fn hash<const M: usize>(msg: [&[u8]; M]) -> Key {
    let mut digest = Blake2s256::default();
    for msg in msg {
        digest.update(msg);
    }
    digest.finalize().into()
}

/// Keyed BLAKE2s-128, the whitepaper's `Mac(key, input)`.
pub(crate) fn mac<const M: usize>(key: &[u8], msg: [&[u8]; M]) -> Mac {
    use blake2::digest::Mac;
    let mut mac = blake2::Blake2sMac::<U16>::new_from_slice(key).unwrap();
    for msg in msg {
        mac.update(msg);
    }
    mac.finalize().into_bytes().into()
}

fn hmac<const M: usize>(key: &[u8], msg: [&[u8]; M]) -> Key {
    use hmac::Mac;
    let mut hmac = <SimpleHmac<Blake2s256> as Mac>::new_from_slice(key).unwrap();
    for msg in msg {
        hmac.update(msg);
    }
    hmac.finalize().into_bytes().into()
}

/// HKDF over HMAC-BLAKE2s: extract, then expand N counter-labelled outputs.
pub(crate) fn hkdf<const N: usize, const M: usize>(key: &[u8], msg: [&[u8]; M]) -> [Key; N] {
    assert!(N <= 255);

    let mut output = [Key::default(); N];

    if N == 0 {
        return output;
    }

    let t0 = hmac(key, msg);
    let mut ti = hmac(&t0, [&[1]]);
    output[0] = ti;
    for i in 1..N as u8 {
        ti = hmac(&t0, [&ti, &[i + 1]]);
        output[i as usize] = ti;
    }

    output
}

/// TAI64N replay-guard timestamp with the low 24 bits of the nanosecond
/// field masked to zero.
pub fn timestamp(now: Tai64N) -> [u8; 12] {
    Tai64N(now.0, now.1 & 0xff00_0000).to_bytes()
}

fn shared_secret(sk: &StaticSecret, pk: &PublicKey) -> Result<x25519_dalek::SharedSecret, CryptoError> {
    let prk = sk.diffie_hellman(pk);
    if !prk.was_contributory() {
        return Err(CryptoError::InvalidKey);
    }
    Ok(prk)
}

/// The rolling chain key and transcript hash of an in-flight handshake.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HandshakeState {
    chain: Key,
    hash: Key,
}

impl Default for HandshakeState {
    fn default() -> Self {
        Self {
            chain: CONSTRUCTION_HASH,
            hash: IDENTIFIER_HASH,
        }
    }
}

impl HandshakeState {
    /// C := Kdf1(C, b)
    pub fn mix_chain(&mut self, b: &[u8]) {
        let [c] = hkdf(&self.chain, [b]);
        self.chain = c;
    }

    /// C := Kdf1(C, DH(sk, pk))
    pub fn mix_dh(&mut self, sk: &StaticSecret, pk: &PublicKey) -> Result<(), CryptoError> {
        let prk = shared_secret(sk, pk)?;
        let [c] = hkdf(&self.chain, [prk.as_bytes()]);
        self.chain = c;
        Ok(())
    }

    /// (C, k) := Kdf2(C, b)
    pub fn mix_key(&mut self, b: &[u8]) -> Key {
        let [c, k] = hkdf(&self.chain, [b]);
        self.chain = c;
        k
    }

    /// (C, k) := Kdf2(C, DH(sk, pk))
    pub fn mix_key_dh(&mut self, sk: &StaticSecret, pk: &PublicKey) -> Result<Key, CryptoError> {
        let prk = shared_secret(sk, pk)?;
        Ok(self.mix_key(prk.as_bytes()))
    }

    /// (C, t, k) := Kdf3(C, b); H := Hash(H || t)
    pub fn mix_key_and_hash(&mut self, b: &[u8]) -> Key {
        let [c, t, k] = hkdf(&self.chain, [b]);
        self.chain = c;
        self.mix_hash(&t);
        k
    }

    /// H := Hash(H || b)
    pub fn mix_hash(&mut self, b: &[u8]) {
        self.hash = hash([&self.hash, b]);
    }

    /// (k1, k2) := Kdf2(C, empty), consuming and zeroizing the state.
    pub fn split(&mut self) -> (Key, Key) {
        let [k1, k2] = hkdf(&self.chain, []);
        self.zeroize();
        (k1, k2)
    }

    pub fn chain_key(&self) -> &Key {
        &self.chain
    }

    pub fn transcript_hash(&self) -> &Key {
        &self.hash
    }

    pub(crate) fn aead_aad(&self) -> Key {
        self.hash
    }
}
