//! Cryptographic core of the tunnel: the Noise IKpsk2 key schedule, the
//! handshake message computations, the MAC1/MAC2 cookie layer, key codecs,
//! and the transport AEAD keys a completed handshake yields.
//!
//! This crate is deliberately passive. It never does I/O, never logs, and
//! never reads a clock or an RNG of its own; time and entropy are arguments.

#![no_std]

#[cfg(test)]
extern crate std;

mod handshake;
mod keys;
mod mac;
mod prim;
mod sealed;
mod session;

pub use x25519_dalek::{PublicKey, StaticSecret};

pub use handshake::{
    consume_handshake_init, consume_handshake_resp, create_handshake_init, create_handshake_resp,
    generate_ephemeral, precompute_static_static, ConsumedInit, LocalIdentity, RemoteIdentity,
};
pub use keys::{
    clamp, decode_preshared_key, decode_private_key, decode_public_key, encode_key,
    KeyDecodeError, KEY_BASE64_LEN,
};
pub use mac::{
    cookie_key, decrypt_cookie, encrypt_cookie, mac1_key, Checker, CookieState, Stamper,
    COOKIE_REFRESH_SECS,
};
pub use prim::{nonce, timestamp, HandshakeState, Key};
pub use session::{DecryptionKey, EncryptionKey, REPLAY_WINDOW};

/// Failure kinds surfaced by the crypto core. Authentication failures name
/// the field that failed so the caller can tell a garbled initiation from a
/// garbled response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// A Diffie-Hellman exchange produced the zero point.
    InvalidKey,
    /// The sealed static key in an initiation did not authenticate.
    DecryptStatic,
    /// The sealed timestamp in an initiation did not authenticate.
    DecryptTimestamp,
    /// The sealed empty payload in a response did not authenticate.
    DecryptEmpty,
    /// A cookie reply did not authenticate against our last MAC1.
    DecryptCookie,
    /// A transport packet did not authenticate.
    DecryptTransport,
    /// A transport counter was already seen or fell out of the window.
    Replay,
    /// The 64-bit send counter is spent; the session must be replaced.
    CounterExhausted,
    /// MAC1 or MAC2 verification failed.
    MacMismatch,
}
