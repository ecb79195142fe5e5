//! Transport-phase AEAD keys and the receive-side anti-replay window.

use chacha20poly1305::{AeadInPlace, ChaCha20Poly1305, Key as AeadKey, KeyInit, Tag as AeadTag};
use zeroize::{Zeroize, ZeroizeOnDrop};

use burrow_types::Tag;

use crate::prim::{nonce, Key};
use crate::CryptoError;

/// Width of the sliding receive window in packets.
pub const REPLAY_WINDOW: u64 = 2048;

/// One word beyond the window proper: an in-window advance may clear up to
/// `REPLAY_WINDOW / 64` ring words, and the redundant word keeps the word
/// holding the oldest still-accepted counter out of that range.
const WINDOW_WORDS: usize = (REPLAY_WINDOW / u64::BITS as u64) as usize + 1;

/// Sealing half of a transport session: one key, one monotone counter.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: Key,
    counter: u64,
}

impl EncryptionKey {
    pub fn new(key: Key) -> Self {
        Self { key, counter: 0 }
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Seals `payload` in place under the next counter, returning the counter
    /// used and the detached tag. The final counter value is reserved as the
    /// exhaustion sentinel; reaching it means the session must be replaced.
    pub fn seal(&mut self, payload: &mut [u8]) -> Result<(u64, Tag), CryptoError> {
        if self.counter == u64::MAX {
            return Err(CryptoError::CounterExhausted);
        }
        let counter = self.counter;

        let tag = ChaCha20Poly1305::new(AeadKey::from_slice(&self.key))
            .encrypt_in_place_detached(&nonce(counter), &[], payload)
            .expect("payload is below the aead length limit");

        self.counter += 1;
        Ok((counter, Tag(tag.into())))
    }
}

/// Opening half of a transport session: one key, one replay window.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DecryptionKey {
    key: Key,
    replay: AntiReplay,
}

impl DecryptionKey {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            replay: AntiReplay::default(),
        }
    }

    /// Opens `payload` (ciphertext followed by the 16-byte tag) in place.
    /// The replay window only advances once the tag has authenticated, so a
    /// forgery cannot burn a counter.
    pub fn open<'p>(&mut self, counter: u64, payload: &'p mut [u8]) -> Result<&'p [u8], CryptoError> {
        let Some(split) = payload.len().checked_sub(16) else {
            return Err(CryptoError::DecryptTransport);
        };
        self.replay.precheck(counter)?;

        let (ciphertext, tag) = payload.split_at_mut(split);
        ChaCha20Poly1305::new(AeadKey::from_slice(&self.key))
            .decrypt_in_place_detached(&nonce(counter), &[], ciphertext, AeadTag::from_slice(tag))
            .map_err(|_| CryptoError::DecryptTransport)?;

        self.replay.commit(counter);
        Ok(ciphertext)
    }
}

/// Sliding bitmap over the most recent `REPLAY_WINDOW` counters, as a ring of
/// 64-bit words with one redundant word. Counters at or below
/// `top - REPLAY_WINDOW` and counters whose bit is already set are rejected.
#[derive(Zeroize)]
struct AntiReplay {
    top: u64,
    bitmap: [u64; WINDOW_WORDS],
}

impl Default for AntiReplay {
    fn default() -> Self {
        AntiReplay {
            top: 0,
            bitmap: [0u64; WINDOW_WORDS],
        }
    }
}

impl AntiReplay {
    fn precheck(&self, counter: u64) -> Result<(), CryptoError> {
        if counter > self.top {
            return Ok(());
        }
        if self.top - counter >= REPLAY_WINDOW {
            return Err(CryptoError::Replay);
        }
        if self.bit(counter) {
            return Err(CryptoError::Replay);
        }
        Ok(())
    }

    fn commit(&mut self, counter: u64) {
        if counter > self.top {
            if counter - self.top >= REPLAY_WINDOW {
                self.bitmap = [0; WINDOW_WORDS];
            } else {
                let mut word = self.top / u64::BITS as u64;
                let newest = counter / u64::BITS as u64;
                while word < newest {
                    word += 1;
                    self.bitmap[(word % WINDOW_WORDS as u64) as usize] = 0;
                }
            }
            self.top = counter;
        }
        self.set_bit(counter);
    }

    fn bit(&self, counter: u64) -> bool {
        let word = (counter / u64::BITS as u64) % WINDOW_WORDS as u64;
        self.bitmap[word as usize] >> (counter % u64::BITS as u64) & 1 == 1
    }

    fn set_bit(&mut self, counter: u64) {
        let word = (counter / u64::BITS as u64) % WINDOW_WORDS as u64;
        self.bitmap[word as usize] |= 1 << (counter % u64::BITS as u64);
    }
}
