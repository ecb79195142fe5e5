//! Wire formats for the four tunnel messages.
//!
//! Every message is a `#[repr(C)]` plain-old-data struct whose in-memory
//! representation *is* its wire representation, so encoding is `as_bytes`
//! and decoding is an alignment-free reinterpretation plus a tag check.
//! All multi-byte scalars are little-endian; the 1-byte type tag and the
//! 3 reserved zero bytes are carried together as one little-endian u32.

#![no_std]

use zerocopy::little_endian;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

pub const MSG_HANDSHAKE_INIT: u32 = 1;
pub const MSG_HANDSHAKE_RESP: u32 = 2;
pub const MSG_COOKIE_REPLY: u32 = 3;
pub const MSG_TRANSPORT: u32 = 4;

pub const HANDSHAKE_INIT_SIZE: usize = 148;
pub const HANDSHAKE_RESP_SIZE: usize = 92;
pub const COOKIE_REPLY_SIZE: usize = 64;
pub const TRANSPORT_HEADER_SIZE: usize = 16;

/// BLAKE2s-128 authenticator carried in the mac1/mac2 trailer fields.
pub type Mac = [u8; 16];

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, FromZeroes, AsBytes)]
#[repr(transparent)]
pub struct Tag(pub [u8; 16]);

/// The 16-byte secret a peer proves possession of via mac2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, FromZeroes, AsBytes)]
#[repr(transparent)]
pub struct Cookie(pub [u8; 16]);

macro_rules! sealed_field {
    ($(#[$doc:meta])* $name:ident, $len:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, FromZeroes, AsBytes)]
        #[repr(C)]
        pub struct $name {
            pub msg: [u8; $len],
            pub tag: Tag,
        }
    };
}

sealed_field!(
    /// AEAD-sealed initiator static public key.
    EncryptedStatic, 32
);
sealed_field!(
    /// AEAD-sealed TAI64N timestamp.
    EncryptedTimestamp, 12
);
sealed_field!(
    /// AEAD seal over the empty string, authenticating the response transcript.
    EncryptedEmpty, 0
);

/// XChaCha20-Poly1305-sealed cookie inside a cookie reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct EncryptedCookie {
    pub msg: Cookie,
    pub tag: Tag,
}

/// First handshake message (initiator -> responder), 148 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct HandshakeInit {
    pub msg_type: little_endian::U32,
    pub sender: little_endian::U32,
    pub ephemeral: [u8; 32],
    pub static_key: EncryptedStatic,
    pub timestamp: EncryptedTimestamp,
    pub mac1: Mac,
    pub mac2: Mac,
}

/// Second handshake message (responder -> initiator), 92 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct HandshakeResp {
    pub msg_type: little_endian::U32,
    pub sender: little_endian::U32,
    pub receiver: little_endian::U32,
    pub ephemeral: [u8; 32],
    pub empty: EncryptedEmpty,
    pub mac1: Mac,
    pub mac2: Mac,
}

/// Cookie reply sent by a loaded responder instead of a response, 64 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct CookieReply {
    pub msg_type: little_endian::U32,
    pub receiver: little_endian::U32,
    pub nonce: [u8; 24],
    pub cookie: EncryptedCookie,
}

/// Header of a transport data packet; the sealed payload follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct TransportHeader {
    pub msg_type: little_endian::U32,
    pub receiver: little_endian::U32,
    pub counter: little_endian::U64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Datagram length does not match the fixed size for its type.
    Length,
    /// Unknown type tag, or nonzero reserved bytes.
    Type,
}

macro_rules! fixed_size_message {
    ($name:ident, $tag:expr, $size:expr) => {
        impl $name {
            pub const TYPE: u32 = $tag;
            pub const SIZE: usize = $size;

            /// Reinterprets an exactly-sized datagram, checking the tag.
            pub fn parse(data: &[u8]) -> Result<&Self, ParseError> {
                if data.first() != Some(&($tag as u8)) {
                    return Err(ParseError::Type);
                }
                let msg = Self::ref_from(data).ok_or(ParseError::Length)?;
                if msg.msg_type.get() != $tag {
                    return Err(ParseError::Type);
                }
                Ok(msg)
            }

            pub fn parse_mut(data: &mut [u8]) -> Result<&mut Self, ParseError> {
                Self::parse(data)?;
                Ok(Self::mut_from(data).ok_or(ParseError::Length)?)
            }
        }
    };
}

fixed_size_message!(HandshakeInit, MSG_HANDSHAKE_INIT, HANDSHAKE_INIT_SIZE);
fixed_size_message!(HandshakeResp, MSG_HANDSHAKE_RESP, HANDSHAKE_RESP_SIZE);
fixed_size_message!(CookieReply, MSG_COOKIE_REPLY, COOKIE_REPLY_SIZE);

impl TransportHeader {
    pub const TYPE: u32 = MSG_TRANSPORT;
    pub const SIZE: usize = TRANSPORT_HEADER_SIZE;

    /// Splits a transport datagram into its header and sealed payload.
    pub fn parse_mut(data: &mut [u8]) -> Result<(&mut Self, &mut [u8]), ParseError> {
        if data.first() != Some(&(MSG_TRANSPORT as u8)) {
            return Err(ParseError::Type);
        }
        if data.len() < TRANSPORT_HEADER_SIZE {
            return Err(ParseError::Length);
        }
        let (header, payload) = data.split_at_mut(TRANSPORT_HEADER_SIZE);
        let header = Self::mut_from(header).ok_or(ParseError::Length)?;
        if header.msg_type.get() != MSG_TRANSPORT {
            return Err(ParseError::Type);
        }
        Ok((header, payload))
    }
}

/// A datagram decoded at the boundary: a closed variant over the type tag.
pub enum Message<'m> {
    HandshakeInit(&'m mut HandshakeInit),
    HandshakeResp(&'m mut HandshakeResp),
    CookieReply(&'m mut CookieReply),
    Transport(&'m mut TransportHeader, &'m mut [u8]),
}

impl<'m> Message<'m> {
    pub fn parse(data: &'m mut [u8]) -> Result<Self, ParseError> {
        match data.first().copied().map(u32::from) {
            Some(MSG_HANDSHAKE_INIT) => HandshakeInit::parse_mut(data).map(Message::HandshakeInit),
            Some(MSG_HANDSHAKE_RESP) => HandshakeResp::parse_mut(data).map(Message::HandshakeResp),
            Some(MSG_COOKIE_REPLY) => CookieReply::parse_mut(data).map(Message::CookieReply),
            Some(MSG_TRANSPORT) => {
                TransportHeader::parse_mut(data).map(|(h, p)| Message::Transport(h, p))
            }
            _ => Err(ParseError::Type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_sizes() {
        assert_eq!(core::mem::size_of::<HandshakeInit>(), HANDSHAKE_INIT_SIZE);
        assert_eq!(core::mem::size_of::<HandshakeResp>(), HANDSHAKE_RESP_SIZE);
        assert_eq!(core::mem::size_of::<CookieReply>(), COOKIE_REPLY_SIZE);
        assert_eq!(core::mem::size_of::<TransportHeader>(), TRANSPORT_HEADER_SIZE);

        // unaligned reinterpretation must be legal at any buffer offset
        assert_eq!(core::mem::align_of::<HandshakeInit>(), 1);
        assert_eq!(core::mem::align_of::<TransportHeader>(), 1);
    }

    #[test]
    fn handshake_init_round_trip() {
        let mut original = HandshakeInit::new_zeroed();
        original.msg_type = little_endian::U32::new(MSG_HANDSHAKE_INIT);
        original.sender = little_endian::U32::new(u32::MAX);
        original.ephemeral[..4].copy_from_slice(&[1, 2, 3, 4]);
        original.static_key.msg[..4].copy_from_slice(&[5, 6, 7, 8]);
        original.timestamp.msg[..4].copy_from_slice(&[9, 10, 11, 12]);
        original.mac1[..4].copy_from_slice(&[13, 14, 15, 16]);
        original.mac2[..4].copy_from_slice(&[17, 18, 19, 20]);

        let bytes = original.as_bytes();
        assert_eq!(bytes.len(), HANDSHAKE_INIT_SIZE);
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..4], &[0, 0, 0]);
        assert_eq!(&bytes[4..8], &[0xff, 0xff, 0xff, 0xff]);

        let parsed = HandshakeInit::parse(bytes).unwrap();
        assert_eq!(*parsed, original);
    }

    #[test]
    fn handshake_resp_round_trip() {
        let mut original = HandshakeResp::new_zeroed();
        original.msg_type = little_endian::U32::new(MSG_HANDSHAKE_RESP);
        original.sender = little_endian::U32::new(u32::MAX / 2);
        original.receiver = little_endian::U32::new(u32::MAX / 4);
        original.ephemeral[..4].copy_from_slice(&[1, 2, 3, 4]);
        original.empty.tag.0[..4].copy_from_slice(&[5, 6, 7, 8]);

        let parsed = HandshakeResp::parse(original.as_bytes()).unwrap();
        assert_eq!(*parsed, original);
    }

    #[test]
    fn cookie_reply_round_trip() {
        let mut original = CookieReply::new_zeroed();
        original.msg_type = little_endian::U32::new(MSG_COOKIE_REPLY);
        original.receiver = little_endian::U32::new(7);
        original.nonce[..4].copy_from_slice(&[1, 2, 3, 4]);
        original.cookie.msg.0[..4].copy_from_slice(&[5, 6, 7, 8]);

        let parsed = CookieReply::parse(original.as_bytes()).unwrap();
        assert_eq!(*parsed, original);
    }

    #[test]
    fn transport_round_trip() {
        let mut datagram = [0u8; TRANSPORT_HEADER_SIZE + 4];
        {
            let header = TransportHeader {
                msg_type: little_endian::U32::new(MSG_TRANSPORT),
                receiver: little_endian::U32::new(u32::MAX),
                counter: little_endian::U64::new(u64::MAX),
            };
            datagram[..TRANSPORT_HEADER_SIZE].copy_from_slice(header.as_bytes());
            datagram[TRANSPORT_HEADER_SIZE..].copy_from_slice(&[1, 2, 3, 4]);
        }

        let (header, payload) = TransportHeader::parse_mut(&mut datagram).unwrap();
        assert_eq!(header.receiver.get(), u32::MAX);
        assert_eq!(header.counter.get(), u64::MAX);
        assert_eq!(payload, &[1, 2, 3, 4]);
    }

    #[test]
    fn rejects_wrong_tag_and_length() {
        let mut init = HandshakeInit::new_zeroed();
        init.msg_type = little_endian::U32::new(MSG_HANDSHAKE_INIT);
        let bytes = init.as_bytes();

        assert_eq!(
            HandshakeResp::parse(bytes).unwrap_err(),
            ParseError::Type,
        );
        assert_eq!(
            HandshakeInit::parse(&bytes[..HANDSHAKE_INIT_SIZE - 1]).unwrap_err(),
            ParseError::Length,
        );

        // reserved bytes are part of the tag word and must be zero
        let mut tampered = [0u8; HANDSHAKE_INIT_SIZE];
        tampered.copy_from_slice(bytes);
        tampered[2] = 0xaa;
        assert_eq!(HandshakeInit::parse(&tampered).unwrap_err(), ParseError::Type);

        let mut transport = [0u8; TRANSPORT_HEADER_SIZE - 1];
        transport[0] = MSG_TRANSPORT as u8;
        assert_eq!(
            TransportHeader::parse_mut(&mut transport).unwrap_err(),
            ParseError::Length,
        );

        let mut unknown = [0u8; 64];
        unknown[0] = 9;
        assert!(matches!(Message::parse(&mut unknown), Err(ParseError::Type)));
    }
}
