//! Tunnel state machine: one local peer, one remote peer, one handshake,
//! at most one transport session.
//!
//! The [`Tunnel`] is a passive, synchronous object. The host feeds it parsed
//! handshake messages and plaintext/ciphertext packets; it never touches a
//! socket, never logs, and never retries. Every `process_*` operation follows
//! a scratch-and-commit pattern: all work happens on scratch state and the
//! durable [`Handshake`] is only written once the message has fully
//! authenticated, so a failed message has no side effects.

use rand_core::{CryptoRng, RngCore};
use tai64::Tai64N;
use zerocopy::{little_endian, AsBytes};
use zeroize::Zeroize;

use burrow_crypto::{
    consume_handshake_init, consume_handshake_resp, create_handshake_init, create_handshake_resp,
    generate_ephemeral, precompute_static_static, CryptoError, DecryptionKey, EncryptionKey,
    HandshakeState, Key, LocalIdentity, PublicKey, RemoteIdentity, StaticSecret,
};
use burrow_types::{
    HandshakeInit, HandshakeResp, ParseError, TransportHeader, MSG_TRANSPORT,
    TRANSPORT_HEADER_SIZE,
};

/// Everything that can go wrong inside the tunnel core. Errors are returned,
/// never logged; the host decides what to drop and what to tear down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("message has a wrong type tag or length")]
    MalformedMessage,
    #[error("diffie-hellman produced a zero shared secret")]
    InvalidKey,
    #[error("initiation static key failed to authenticate")]
    DecryptStatic,
    #[error("initiation timestamp failed to authenticate")]
    DecryptTimestamp,
    #[error("response payload failed to authenticate")]
    DecryptEmpty,
    #[error("cookie reply failed to authenticate")]
    DecryptCookie,
    #[error("transport packet failed to authenticate")]
    DecryptTransport,
    #[error("timestamp or counter did not advance")]
    Replay,
    #[error("operation not permitted in the current handshake state")]
    WrongState,
    #[error("mac1 or mac2 verification failed")]
    MacMismatch,
    #[error("send counter exhausted, rekey required")]
    CounterExhausted,
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidKey => Error::InvalidKey,
            CryptoError::DecryptStatic => Error::DecryptStatic,
            CryptoError::DecryptTimestamp => Error::DecryptTimestamp,
            CryptoError::DecryptEmpty => Error::DecryptEmpty,
            CryptoError::DecryptCookie => Error::DecryptCookie,
            CryptoError::DecryptTransport => Error::DecryptTransport,
            CryptoError::Replay => Error::Replay,
            CryptoError::CounterExhausted => Error::CounterExhausted,
            CryptoError::MacMismatch => Error::MacMismatch,
        }
    }
}

impl From<ParseError> for Error {
    fn from(_: ParseError) -> Self {
        Error::MalformedMessage
    }
}

/// Handshake lifecycle. `Completed` is terminal for a handshake instance;
/// a fresh initiation starts a new instance (the replay guard survives).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Created,
    InitSent,
    InitReceived,
    ResponseSent,
    ResponseReceived,
    Completed,
}

/// Mutable handshake state. Secrets are zeroized when the handshake
/// completes; the precomputed static-static secret and the peer's last
/// timestamp outlive individual handshakes.
pub struct Handshake {
    state: HandshakeState,
    local_ephemeral: Option<StaticSecret>,
    remote_ephemeral: PublicKey,
    status: Status,
    local_index: u32,
    remote_index: u32,
    static_static: Key,
    last_timestamp: [u8; 12],
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            state: HandshakeState::default(),
            local_ephemeral: None,
            remote_ephemeral: PublicKey::from([0u8; 32]),
            status: Status::Created,
            local_index: 0,
            remote_index: 0,
            static_static: [0; 32],
            last_timestamp: [0; 12],
        }
    }
}

impl Drop for Handshake {
    fn drop(&mut self) {
        self.static_static.zeroize();
        self.last_timestamp.zeroize();
    }
}

impl Handshake {
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn last_timestamp(&self) -> &[u8; 12] {
        &self.last_timestamp
    }

    /// Rolling chain key; exposed for tests and channel binding.
    pub fn chain_key(&self) -> &Key {
        self.state.chain_key()
    }

    /// Rolling transcript hash; exposed for tests and channel binding.
    pub fn transcript_hash(&self) -> &Key {
        self.state.transcript_hash()
    }

    fn initialised(&self) -> bool {
        self.static_static != [0; 32]
    }
}

/// Directional transport keys plus the session indices stamped into
/// transport headers. The superseded keypair is retained until the next
/// rotation; its keys zeroize on drop.
pub struct Session {
    send: EncryptionKey,
    recv: DecryptionKey,
    local_index: u32,
    remote_index: u32,
    previous: Option<(EncryptionKey, DecryptionKey)>,
}

impl Session {
    pub fn local_index(&self) -> u32 {
        self.local_index
    }

    pub fn remote_index(&self) -> u32 {
        self.remote_index
    }

    pub fn send_counter(&self) -> u64 {
        self.send.counter()
    }

    /// Whether a superseded keypair is still being retained.
    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }
}

/// A single point-to-point tunnel: our identity, one remote peer, the
/// in-flight handshake, and the current transport session if one exists.
pub struct Tunnel {
    local: LocalIdentity,
    remote: RemoteIdentity,
    handshake: Handshake,
    session: Option<Session>,
}

impl Tunnel {
    pub fn new(local: LocalIdentity, remote: RemoteIdentity) -> Self {
        Self {
            local,
            remote,
            handshake: Handshake::default(),
            session: None,
        }
    }

    pub fn local(&self) -> &LocalIdentity {
        &self.local
    }

    pub fn remote(&self) -> &RemoteIdentity {
        &self.remote
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Precomputes the static-static shared secret. Must be called once
    /// before any handshake operation; rejects a degenerate peer key.
    pub fn initialise(&mut self) -> Result<(), Error> {
        self.handshake.static_static = precompute_static_static(&self.local, &self.remote)?;
        Ok(())
    }

    /// Starts a handshake as initiator. The returned message is unstamped;
    /// run it through the MAC [`burrow_crypto::Stamper`] before sending.
    pub fn initiate_handshake(
        &mut self,
        now: Tai64N,
        rng: &mut (impl CryptoRng + RngCore),
    ) -> Result<HandshakeInit, Error> {
        if !self.handshake.initialised() {
            return Err(Error::WrongState);
        }

        let mut state = HandshakeState::default();
        let ephemeral = generate_ephemeral(rng);
        let sender = rng.next_u32();
        let msg = create_handshake_init(
            &mut state,
            &self.local,
            &self.remote,
            &self.handshake.static_static,
            &ephemeral,
            sender,
            now,
        )?;

        let hs = &mut self.handshake;
        hs.state = state;
        hs.local_ephemeral = Some(ephemeral);
        hs.local_index = sender;
        hs.status = Status::InitSent;
        Ok(msg)
    }

    /// Processes a received initiation as responder. Accepted in any status:
    /// an authentic init with a fresh timestamp always starts a new
    /// handshake. On error the handshake is untouched.
    pub fn process_handshake_init(&mut self, msg: &HandshakeInit) -> Result<(), Error> {
        if !self.handshake.initialised() {
            return Err(Error::WrongState);
        }

        let consumed =
            consume_handshake_init(msg, &self.local, &self.handshake.static_static)?;
        // strictly greater: an equal timestamp is a replay
        if consumed.timestamp <= self.handshake.last_timestamp {
            return Err(Error::Replay);
        }

        let hs = &mut self.handshake;
        hs.state = consumed.state;
        hs.last_timestamp = consumed.timestamp;
        hs.remote_index = consumed.sender;
        hs.remote_ephemeral = consumed.ephemeral;
        hs.local_ephemeral = None;
        hs.status = Status::InitReceived;
        Ok(())
    }

    /// Builds the response to a processed initiation. Unstamped, like
    /// [`Tunnel::initiate_handshake`].
    pub fn create_handshake_response(
        &mut self,
        rng: &mut (impl CryptoRng + RngCore),
    ) -> Result<HandshakeResp, Error> {
        if self.handshake.status != Status::InitReceived {
            return Err(Error::WrongState);
        }

        let mut state = self.handshake.state.clone();
        let ephemeral = generate_ephemeral(rng);
        let sender = rng.next_u32();
        let msg = create_handshake_resp(
            &mut state,
            &self.remote,
            &self.handshake.remote_ephemeral,
            &ephemeral,
            sender,
            self.handshake.remote_index,
        )?;

        let hs = &mut self.handshake;
        hs.state = state;
        hs.local_ephemeral = Some(ephemeral);
        hs.local_index = sender;
        hs.status = Status::ResponseSent;
        Ok(msg)
    }

    /// Processes the responder's answer as initiator. On error the handshake
    /// is untouched.
    pub fn process_handshake_response(&mut self, msg: &HandshakeResp) -> Result<(), Error> {
        if self.handshake.status != Status::InitSent {
            return Err(Error::WrongState);
        }
        if msg.receiver.get() != self.handshake.local_index {
            return Err(Error::MalformedMessage);
        }

        let ephemeral = self
            .handshake
            .local_ephemeral
            .as_ref()
            .ok_or(Error::WrongState)?;
        let mut state = self.handshake.state.clone();
        consume_handshake_resp(msg, &mut state, &self.local, &self.remote, ephemeral)?;

        let hs = &mut self.handshake;
        hs.state = state;
        hs.remote_index = msg.sender.get();
        hs.status = Status::ResponseReceived;
        Ok(())
    }

    /// Derives the directional transport keys, zeroizes every handshake
    /// secret, and installs the new session. The superseded session's keys
    /// are retained as the previous keypair and zeroize when it goes.
    pub fn begin_session(&mut self) -> Result<(), Error> {
        let hs = &mut self.handshake;
        let (send_key, recv_key) = match hs.status {
            Status::ResponseReceived => hs.state.split(),
            Status::ResponseSent => {
                let (recv, send) = hs.state.split();
                (send, recv)
            }
            _ => return Err(Error::WrongState),
        };

        hs.local_ephemeral = None;
        hs.remote_ephemeral = PublicKey::from([0u8; 32]);
        hs.status = Status::Completed;

        let previous = self.session.take().map(|s| (s.send, s.recv));
        self.session = Some(Session {
            send: EncryptionKey::new(send_key),
            recv: DecryptionKey::new(recv_key),
            local_index: hs.local_index,
            remote_index: hs.remote_index,
            previous,
        });
        Ok(())
    }

    /// Seals a packet into a complete transport datagram.
    pub fn seal(&mut self, packet: &[u8]) -> Result<Vec<u8>, Error> {
        let session = self.session.as_mut().ok_or(Error::WrongState)?;

        let mut datagram = vec![0u8; TRANSPORT_HEADER_SIZE + packet.len() + 16];
        datagram[TRANSPORT_HEADER_SIZE..][..packet.len()].copy_from_slice(packet);
        let (counter, tag) = session
            .send
            .seal(&mut datagram[TRANSPORT_HEADER_SIZE..][..packet.len()])?;
        datagram[TRANSPORT_HEADER_SIZE + packet.len()..].copy_from_slice(&tag.0);

        let header = TransportHeader {
            msg_type: little_endian::U32::new(MSG_TRANSPORT),
            receiver: little_endian::U32::new(session.remote_index),
            counter: little_endian::U64::new(counter),
        };
        datagram[..TRANSPORT_HEADER_SIZE].copy_from_slice(header.as_bytes());
        Ok(datagram)
    }

    /// Opens a transport datagram in place, returning the plaintext packet.
    pub fn open<'p>(&mut self, datagram: &'p mut [u8]) -> Result<&'p [u8], Error> {
        let session = self.session.as_mut().ok_or(Error::WrongState)?;

        let (header, payload) = TransportHeader::parse_mut(datagram)?;
        if header.receiver.get() != session.local_index {
            return Err(Error::MalformedMessage);
        }

        Ok(session.recv.open(header.counter.get(), payload)?)
    }
}
