//! MAC1/MAC2 stamping and checking, and the cookie-reply machinery behind MAC2.
//!
//! Both handshake messages end in two 16-byte authenticators. MAC1 proves the
//! sender knows the receiver's static public key and is always present. MAC2
//! is keyed with a cookie the receiver handed out while loaded; it is zero
//! unless the sender holds a cookie younger than the refresh window.

use core::net::SocketAddr;

use chacha20poly1305::{AeadInPlace, KeyInit, XChaCha20Poly1305};
use rand_core::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use tai64::Tai64N;
use x25519_dalek::PublicKey;
use zerocopy::little_endian;
use zeroize::{Zeroize, ZeroizeOnDrop};

use burrow_types::{Cookie, CookieReply, EncryptedCookie, Mac, Tag, MSG_COOKIE_REPLY};

use crate::prim::{hash, mac, Key, LABEL_COOKIE, LABEL_MAC1};
use crate::CryptoError;

/// A received cookie may key MAC2 for this long.
pub const COOKIE_REFRESH_SECS: u64 = 120;

pub fn mac1_key(spk: &PublicKey) -> Key {
    hash([&LABEL_MAC1, spk.as_bytes()])
}

pub fn cookie_key(spk: &PublicKey) -> Key {
    hash([&LABEL_COOKIE, spk.as_bytes()])
}

fn seconds_between(later: Tai64N, earlier: Tai64N) -> u64 {
    (later.0).0.saturating_sub((earlier.0).0)
}

pub fn encrypt_cookie(
    mut cookie: Cookie,
    key: &Key,
    nonce: &[u8; 24],
    aad: &[u8],
) -> EncryptedCookie {
    let tag = XChaCha20Poly1305::new(key.into())
        .encrypt_in_place_detached(nonce.into(), aad, &mut cookie.0)
        .expect("cookie is far below the aead length limit");

    EncryptedCookie {
        msg: cookie,
        tag: Tag(tag.into()),
    }
}

pub fn decrypt_cookie<'c>(
    cookie: &'c mut EncryptedCookie,
    key: &Key,
    nonce: &[u8; 24],
    aad: &[u8],
) -> Result<&'c mut Cookie, CryptoError> {
    XChaCha20Poly1305::new(key.into())
        .decrypt_in_place_detached(nonce.into(), aad, &mut cookie.msg.0, (&cookie.tag.0).into())
        .map_err(|_| CryptoError::DecryptCookie)?;

    Ok(&mut cookie.msg)
}

/// Rolling secret a loaded receiver derives per-address cookies from.
#[derive(Zeroize, ZeroizeOnDrop, Default)]
pub struct CookieState {
    key: Key,
}

impl CookieState {
    pub fn generate(&mut self, rng: &mut (impl CryptoRng + RngCore)) {
        rng.fill_bytes(&mut self.key);
    }

    /// The cookie is a keyed MAC over the sender's address and port; any
    /// encoding works as long as it is stable for the secret's lifetime.
    pub fn new_cookie(&self, addr: SocketAddr) -> Cookie {
        let mut a = [0u8; 18];
        match addr.ip() {
            core::net::IpAddr::V4(ipv4) => a[..4].copy_from_slice(&ipv4.octets()),
            core::net::IpAddr::V6(ipv6) => a[..16].copy_from_slice(&ipv6.octets()),
        }
        a[16..].copy_from_slice(&addr.port().to_be_bytes());
        Cookie(mac(&self.key, [&a]))
    }
}

/// Applies MAC1/MAC2 to outgoing handshake messages addressed to one peer.
pub struct Stamper {
    mac1_key: Key,
    cookie_key: Key,
    last_mac1: Mac,
    cookie: Option<(Cookie, Tai64N)>,
}

impl Stamper {
    /// Keys the stamper with the remote peer's static public key.
    pub fn new(remote_public: &PublicKey) -> Self {
        Self {
            mac1_key: mac1_key(remote_public),
            cookie_key: cookie_key(remote_public),
            last_mac1: Mac::default(),
            cookie: None,
        }
    }

    /// Writes MAC1 over the message body and, while a fresh cookie is held,
    /// MAC2 over everything up to it. MAC2 stays zero otherwise.
    pub fn stamp(&mut self, msg: &mut [u8], now: Tai64N) {
        let offset_mac2 = msg.len() - 16;
        let offset_mac1 = offset_mac2 - 16;

        let mac1 = mac(&self.mac1_key, [&msg[..offset_mac1]]);
        msg[offset_mac1..offset_mac2].copy_from_slice(&mac1);
        self.last_mac1 = mac1;

        match self.fresh_cookie(now) {
            Some(cookie) => {
                let mac2 = mac(&cookie.0, [&msg[..offset_mac2]]);
                msg[offset_mac2..].copy_from_slice(&mac2);
            }
            None => msg[offset_mac2..].fill(0),
        }
    }

    /// Opens a cookie reply (sealed against our most recent MAC1) and starts
    /// the freshness window.
    pub fn absorb_cookie_reply(
        &mut self,
        reply: &CookieReply,
        now: Tai64N,
    ) -> Result<(), CryptoError> {
        let mut sealed = reply.cookie;
        let cookie = decrypt_cookie(&mut sealed, &self.cookie_key, &reply.nonce, &self.last_mac1)?;
        self.cookie = Some((*cookie, now));
        Ok(())
    }

    fn fresh_cookie(&self, now: Tai64N) -> Option<Cookie> {
        let (cookie, received) = self.cookie?;
        (seconds_between(now, received) <= COOKIE_REFRESH_SECS).then_some(cookie)
    }
}

/// Validates MAC1/MAC2 on handshake messages addressed to us.
pub struct Checker {
    mac1_key: Key,
    cookie_key: Key,
}

impl Checker {
    /// Keys the checker with our own static public key.
    pub fn new(local_public: &PublicKey) -> Self {
        Self {
            mac1_key: mac1_key(local_public),
            cookie_key: cookie_key(local_public),
        }
    }

    pub fn check_mac1(&self, msg: &[u8]) -> Result<(), CryptoError> {
        // too short to carry the two MAC trailers at all
        let Some(offset_mac1) = msg.len().checked_sub(32) else {
            return Err(CryptoError::MacMismatch);
        };
        let expected = mac(&self.mac1_key, [&msg[..offset_mac1]]);
        if expected[..]
            .ct_eq(&msg[offset_mac1..offset_mac1 + 16])
            .into()
        {
            Ok(())
        } else {
            Err(CryptoError::MacMismatch)
        }
    }

    /// MAC2 is keyed with the cookie currently valid for the sender, not with
    /// the precomputed cookie key.
    pub fn check_mac2(&self, msg: &[u8], cookie: &Cookie) -> Result<(), CryptoError> {
        let Some(offset_mac2) = msg.len().checked_sub(16) else {
            return Err(CryptoError::MacMismatch);
        };
        let expected = mac(&cookie.0, [&msg[..offset_mac2]]);
        if expected[..].ct_eq(&msg[offset_mac2..]).into() {
            Ok(())
        } else {
            Err(CryptoError::MacMismatch)
        }
    }

    /// Builds the cookie reply a loaded receiver sends instead of processing
    /// a handshake message whose MAC2 did not validate.
    pub fn cookie_reply(
        &self,
        rng: &mut (impl CryptoRng + RngCore),
        receiver: u32,
        cookie: Cookie,
        observed_mac1: &Mac,
    ) -> CookieReply {
        let mut nonce = [0u8; 24];
        rng.fill_bytes(&mut nonce);

        CookieReply {
            msg_type: little_endian::U32::new(MSG_COOKIE_REPLY),
            receiver: little_endian::U32::new(receiver),
            nonce,
            cookie: encrypt_cookie(cookie, &self.cookie_key, &nonce, observed_mac1),
        }
    }
}
