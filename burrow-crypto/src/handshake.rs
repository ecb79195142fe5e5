//! The Noise IKpsk2 message computations.
//!
//! The tunnel runs a slightly modified Noise IKpsk2 handshake:
//!
//! ```text
//! <- s
//! -> e, es, s, ss
//! <- e, ee, se, psk
//! ```
//!
//! The initiator knows the responder's static public key up front, proves its
//! own static key under `es`, and binds a TAI64N timestamp under `ss` as the
//! flood/replay guard. The pre-shared key is mixed into the second message.
//!
//! Each routine here drives a caller-owned scratch [`HandshakeState`]; the
//! caller commits the scratch state only on success, so a failed message
//! leaves its durable handshake untouched. Produced messages carry zeroed
//! MAC trailers; stamping them is the caller's step.

use rand_core::{CryptoRng, RngCore};
use tai64::Tai64N;
use x25519_dalek::{PublicKey, StaticSecret};
use zerocopy::{little_endian, FromZeroes};

use burrow_types::{
    HandshakeInit, HandshakeResp, MSG_HANDSHAKE_INIT, MSG_HANDSHAKE_RESP,
};

use crate::prim::{timestamp, HandshakeState, Key};
use crate::sealed::Encrypted;
use crate::{cookie_key, mac1_key, CryptoError};

/// Our own static keypair, with the MAC keys peers will stamp messages
/// to us with.
pub struct LocalIdentity {
    pub private_key: StaticSecret,
    /// Cached public key, derived from the above private key.
    pub public_key: PublicKey,
    /// Cached `mac1_key(&self.public_key)`.
    pub mac1_key: Key,
    /// Cached `cookie_key(&self.public_key)`.
    pub cookie_key: Key,
}

/// The remote peer's static key material.
pub struct RemoteIdentity {
    pub public_key: PublicKey,
    /// Zero when no pre-shared key is configured.
    pub preshared_key: Key,
    /// Cached `mac1_key(&self.public_key)`.
    pub mac1_key: Key,
    /// Cached `cookie_key(&self.public_key)`.
    pub cookie_key: Key,
}

impl LocalIdentity {
    pub fn new(private_key: StaticSecret) -> Self {
        let public_key = PublicKey::from(&private_key);
        Self {
            mac1_key: mac1_key(&public_key),
            cookie_key: cookie_key(&public_key),
            public_key,
            private_key,
        }
    }
}

impl RemoteIdentity {
    pub fn new(public_key: PublicKey, preshared_key: Option<Key>) -> Self {
        Self {
            mac1_key: mac1_key(&public_key),
            cookie_key: cookie_key(&public_key),
            public_key,
            preshared_key: preshared_key.unwrap_or_default(),
        }
    }
}

/// DH(local static, remote static), computed once before any handshake.
/// A non-contributory result rejects the peer outright.
pub fn precompute_static_static(
    local: &LocalIdentity,
    remote: &RemoteIdentity,
) -> Result<Key, CryptoError> {
    let prk = local.private_key.diffie_hellman(&remote.public_key);
    if !prk.was_contributory() {
        return Err(CryptoError::InvalidKey);
    }
    Ok(*prk.as_bytes())
}

/// Generates an ephemeral keypair from the caller's CSPRNG.
pub fn generate_ephemeral(rng: &mut (impl CryptoRng + RngCore)) -> StaticSecret {
    StaticSecret::random_from_rng(&mut *rng)
}

/// -> e, es, s, ss
pub fn create_handshake_init(
    hs: &mut HandshakeState,
    local: &LocalIdentity,
    remote: &RemoteIdentity,
    static_static: &Key,
    esk: &StaticSecret,
    sender: u32,
    now: Tai64N,
) -> Result<HandshakeInit, CryptoError> {
    let epk = PublicKey::from(esk);

    // <- s:
    hs.mix_hash(remote.public_key.as_bytes());

    // -> e:
    hs.mix_chain(epk.as_bytes());
    hs.mix_hash(epk.as_bytes());

    let mut msg = HandshakeInit::new_zeroed();
    msg.msg_type = little_endian::U32::new(MSG_HANDSHAKE_INIT);
    msg.sender = little_endian::U32::new(sender);
    msg.ephemeral = epk.to_bytes();

    // -> es:
    let k = hs.mix_key_dh(esk, &remote.public_key)?;

    // -> s:
    msg.static_key = Encrypted::seal_and_hash(local.public_key.to_bytes(), hs, &k);

    // -> ss:
    let k = hs.mix_key(static_static);

    // payload:
    msg.timestamp = Encrypted::seal_and_hash(timestamp(now), hs, &k);

    Ok(msg)
}

/// State a responder carries out of a processed initiation.
pub struct ConsumedInit {
    pub state: HandshakeState,
    /// The initiator's static public key, as proven by the `es` seal.
    pub static_key: PublicKey,
    pub timestamp: [u8; 12],
    pub sender: u32,
    pub ephemeral: PublicKey,
}

/// -> e, es, s, ss (receiving side). Works on a scratch copy of the message;
/// the input bytes stay intact.
pub fn consume_handshake_init(
    msg: &HandshakeInit,
    local: &LocalIdentity,
    static_static: &Key,
) -> Result<ConsumedInit, CryptoError> {
    let mut msg = *msg;
    let mut hs = HandshakeState::default();

    // <- s:
    hs.mix_hash(local.public_key.as_bytes());

    // -> e:
    hs.mix_chain(&msg.ephemeral);
    hs.mix_hash(&msg.ephemeral);

    // -> es:
    let epk_i = PublicKey::from(msg.ephemeral);
    let k = hs.mix_key_dh(&local.private_key, &epk_i)?;

    // -> s:
    let spk_i = *msg
        .static_key
        .open_and_hash(&mut hs, &k)
        .map_err(|_| CryptoError::DecryptStatic)?;

    // -> ss:
    let k = hs.mix_key(static_static);

    // payload:
    let ts = *msg
        .timestamp
        .open_and_hash(&mut hs, &k)
        .map_err(|_| CryptoError::DecryptTimestamp)?;

    Ok(ConsumedInit {
        state: hs,
        static_key: PublicKey::from(spk_i),
        timestamp: ts,
        sender: msg.sender.get(),
        ephemeral: epk_i,
    })
}

/// <- e, ee, se, psk
pub fn create_handshake_resp(
    hs: &mut HandshakeState,
    remote: &RemoteIdentity,
    initiator_ephemeral: &PublicKey,
    esk: &StaticSecret,
    sender: u32,
    receiver: u32,
) -> Result<HandshakeResp, CryptoError> {
    let epk_r = PublicKey::from(esk);

    // <- e:
    hs.mix_chain(epk_r.as_bytes());
    hs.mix_hash(epk_r.as_bytes());

    // <- ee:
    hs.mix_dh(esk, initiator_ephemeral)?;

    // <- se:
    hs.mix_dh(esk, &remote.public_key)?;

    // <- psk:
    let k = hs.mix_key_and_hash(&remote.preshared_key);

    let mut msg = HandshakeResp::new_zeroed();
    msg.msg_type = little_endian::U32::new(MSG_HANDSHAKE_RESP);
    msg.sender = little_endian::U32::new(sender);
    msg.receiver = little_endian::U32::new(receiver);
    msg.ephemeral = epk_r.to_bytes();

    // payload:
    msg.empty = Encrypted::seal_and_hash([], hs, &k);

    Ok(msg)
}

/// <- e, ee, se, psk (receiving side). Opening the empty payload is what
/// authenticates the whole response.
pub fn consume_handshake_resp(
    msg: &HandshakeResp,
    hs: &mut HandshakeState,
    local: &LocalIdentity,
    remote: &RemoteIdentity,
    esk: &StaticSecret,
) -> Result<(), CryptoError> {
    let mut msg = *msg;

    // <- e:
    let epk_r = PublicKey::from(msg.ephemeral);
    hs.mix_chain(epk_r.as_bytes());
    hs.mix_hash(epk_r.as_bytes());

    // <- ee:
    hs.mix_dh(esk, &epk_r)?;

    // <- se:
    hs.mix_dh(&local.private_key, &epk_r)?;

    // <- psk:
    let k = hs.mix_key_and_hash(&remote.preshared_key);

    // payload:
    msg.empty
        .open_and_hash(hs, &k)
        .map_err(|_| CryptoError::DecryptEmpty)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    extern crate std;

    use rand::rngs::OsRng;

    use super::*;

    fn identities() -> (LocalIdentity, RemoteIdentity, LocalIdentity, RemoteIdentity) {
        let initiator_sk = StaticSecret::random_from_rng(OsRng);
        let responder_sk = StaticSecret::random_from_rng(OsRng);
        let initiator_pk = PublicKey::from(&initiator_sk);
        let responder_pk = PublicKey::from(&responder_sk);

        (
            LocalIdentity::new(initiator_sk),
            RemoteIdentity::new(responder_pk, None),
            LocalIdentity::new(responder_sk),
            RemoteIdentity::new(initiator_pk, None),
        )
    }

    #[test]
    fn static_static_agrees() {
        let (i_local, i_remote, r_local, r_remote) = identities();

        let i_ss = precompute_static_static(&i_local, &i_remote).unwrap();
        let r_ss = precompute_static_static(&r_local, &r_remote).unwrap();
        assert_eq!(i_ss, r_ss);
        assert_ne!(i_ss, [0; 32]);
    }

    #[test]
    fn zero_point_peer_is_rejected() {
        let (i_local, _, _, _) = identities();
        let low_order = RemoteIdentity::new(PublicKey::from([0u8; 32]), None);
        assert_eq!(
            precompute_static_static(&i_local, &low_order),
            Err(CryptoError::InvalidKey)
        );
    }

    #[test]
    fn transcripts_agree_across_a_full_exchange() {
        let (i_local, i_remote, r_local, r_remote) = identities();
        let ss = precompute_static_static(&i_local, &i_remote).unwrap();

        let esk_i = generate_ephemeral(&mut OsRng);
        let mut i_hs = HandshakeState::default();
        let init = create_handshake_init(
            &mut i_hs,
            &i_local,
            &i_remote,
            &ss,
            &esk_i,
            77,
            Tai64N(tai64::Tai64::from_unix(1_700_000_000), 0),
        )
        .unwrap();

        let consumed = consume_handshake_init(&init, &r_local, &ss).unwrap();
        let mut r_hs = consumed.state;
        assert_eq!(i_hs.chain_key(), r_hs.chain_key());
        assert_eq!(i_hs.transcript_hash(), r_hs.transcript_hash());
        assert_eq!(consumed.static_key, i_local.public_key);
        assert_eq!(consumed.sender, 77);

        let esk_r = generate_ephemeral(&mut OsRng);
        let resp = create_handshake_resp(&mut r_hs, &r_remote, &consumed.ephemeral, &esk_r, 99, 77)
            .unwrap();

        consume_handshake_resp(&resp, &mut i_hs, &i_local, &i_remote, &esk_i).unwrap();
        assert_eq!(i_hs.chain_key(), r_hs.chain_key());
        assert_eq!(i_hs.transcript_hash(), r_hs.transcript_hash());

        let (i_send, i_recv) = i_hs.split();
        let (r_recv, r_send) = r_hs.split();
        assert_eq!(i_send, r_recv);
        assert_eq!(i_recv, r_send);
    }

    #[test]
    fn preshared_key_must_match() {
        let (i_local, mut i_remote, r_local, mut r_remote) = identities();
        let ss = precompute_static_static(&i_local, &i_remote).unwrap();
        i_remote.preshared_key = [1; 32];
        r_remote.preshared_key = [2; 32];

        let esk_i = generate_ephemeral(&mut OsRng);
        let mut i_hs = HandshakeState::default();
        let init = create_handshake_init(
            &mut i_hs,
            &i_local,
            &i_remote,
            &ss,
            &esk_i,
            1,
            Tai64N(tai64::Tai64::from_unix(1_700_000_000), 0),
        )
        .unwrap();

        let consumed = consume_handshake_init(&init, &r_local, &ss).unwrap();
        let mut r_hs = consumed.state;
        let esk_r = generate_ephemeral(&mut OsRng);
        let resp = create_handshake_resp(&mut r_hs, &r_remote, &consumed.ephemeral, &esk_r, 2, 1)
            .unwrap();

        assert_eq!(
            consume_handshake_resp(&resp, &mut i_hs, &i_local, &i_remote, &esk_i),
            Err(CryptoError::DecryptEmpty)
        );
    }
}
