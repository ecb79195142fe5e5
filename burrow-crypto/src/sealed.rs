//! AEAD seal/open for the fixed-size encrypted handshake fields.
//!
//! Handshake fields are always sealed under the all-zero nonce with the
//! current transcript hash as associated data, and the ciphertext (tag
//! included) is mixed into the transcript immediately after.

use chacha20poly1305::{AeadInPlace, ChaCha20Poly1305, Key as AeadKey, KeyInit, Tag as AeadTag};
use zerocopy::AsBytes;

use burrow_types::{EncryptedEmpty, EncryptedStatic, EncryptedTimestamp, Tag};

use crate::prim::{nonce, HandshakeState, Key};

pub trait Encrypted: Sized {
    type Plaintext;

    fn seal_and_hash(msg: Self::Plaintext, state: &mut HandshakeState, key: &Key) -> Self;

    fn open_and_hash(
        &mut self,
        state: &mut HandshakeState,
        key: &Key,
    ) -> Result<&mut Self::Plaintext, chacha20poly1305::aead::Error>;
}

macro_rules! encrypted {
    ($t:ty, $n:literal) => {
        impl Encrypted for $t {
            type Plaintext = [u8; $n];

            fn seal_and_hash(mut msg: [u8; $n], state: &mut HandshakeState, key: &Key) -> Self {
                let aad = state.aead_aad();

                let tag = ChaCha20Poly1305::new(AeadKey::from_slice(key))
                    .encrypt_in_place_detached(&nonce(0), &aad, &mut msg)
                    .expect("handshake fields are below the aead length limit");

                let out = Self {
                    msg,
                    tag: Tag(tag.into()),
                };
                state.mix_hash(out.as_bytes());

                out
            }

            fn open_and_hash(
                &mut self,
                state: &mut HandshakeState,
                key: &Key,
            ) -> Result<&mut [u8; $n], chacha20poly1305::aead::Error> {
                let aad = state.aead_aad();
                state.mix_hash(self.as_bytes());

                ChaCha20Poly1305::new(AeadKey::from_slice(key)).decrypt_in_place_detached(
                    &nonce(0),
                    &aad,
                    &mut self.msg,
                    AeadTag::from_slice(&self.tag.0),
                )?;

                Ok(&mut self.msg)
            }
        }
    };
}

encrypted!(EncryptedStatic, 32);
encrypted!(EncryptedTimestamp, 12);
encrypted!(EncryptedEmpty, 0);
