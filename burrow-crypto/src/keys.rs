//! Base64 codecs for the 32-byte curve keys.

use base64ct::{Base64, Encoding};
use x25519_dalek::{PublicKey, StaticSecret};

/// Length of a standard-Base64 rendering of a 32-byte key, padding included.
pub const KEY_BASE64_LEN: usize = 44;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDecodeError {
    /// Input is not valid standard Base64.
    Base64,
    /// Input decoded to something other than 32 bytes.
    Length,
}

/// Curve25519 scalar clamp: clear the low 3 bits, clear bit 255, set bit 254.
pub fn clamp(mut key: [u8; 32]) -> [u8; 32] {
    key[0] &= 248;
    key[31] = (key[31] & 127) | 64;
    key
}

fn decode_key(b64: &str) -> Result<[u8; 32], KeyDecodeError> {
    let mut buf = [0u8; 64];
    let decoded = Base64::decode(b64, &mut buf).map_err(|_| KeyDecodeError::Base64)?;
    <[u8; 32]>::try_from(decoded).map_err(|_| KeyDecodeError::Length)
}

/// Parses a Base64 private key, clamping the scalar.
pub fn decode_private_key(b64: &str) -> Result<StaticSecret, KeyDecodeError> {
    Ok(StaticSecret::from(clamp(decode_key(b64)?)))
}

pub fn decode_public_key(b64: &str) -> Result<PublicKey, KeyDecodeError> {
    Ok(PublicKey::from(decode_key(b64)?))
}

/// Parses a Base64 pre-shared key. Unlike a private key, a PSK is plain
/// 32-byte symmetric material and is not clamped.
pub fn decode_preshared_key(b64: &str) -> Result<[u8; 32], KeyDecodeError> {
    decode_key(b64)
}

/// Renders a 32-byte key as standard Base64 into the caller's buffer.
pub fn encode_key<'a>(key: &[u8; 32], out: &'a mut [u8; KEY_BASE64_LEN]) -> &'a str {
    Base64::encode(key, out).expect("buffer is sized for a 32-byte key")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIVATE_B64: &str = "WEGlnZqW7a3J+AmKoDg+/L95sSIutu9ApEp3AY+l30o=";
    const PUBLIC_B64: &str = "pMo33VR8Lwi0nmi3sAFTFttomPI71LSMkEjFXws94wU=";

    #[test]
    fn private_key_derives_expected_public() {
        let private = decode_private_key(PRIVATE_B64).unwrap();
        let public = PublicKey::from(&private);

        let mut buf = [0u8; KEY_BASE64_LEN];
        assert_eq!(encode_key(public.as_bytes(), &mut buf), PUBLIC_B64);
    }

    #[test]
    fn public_key_round_trips() {
        let public = decode_public_key(PUBLIC_B64).unwrap();
        let mut buf = [0u8; KEY_BASE64_LEN];
        assert_eq!(encode_key(public.as_bytes(), &mut buf), PUBLIC_B64);
    }

    #[test]
    fn clamp_pins_scalar_bits() {
        let clamped = clamp([0xff; 32]);
        assert_eq!(clamped[0], 0xf8);
        assert_eq!(clamped[31], 0x7f);

        let clamped = clamp([0; 32]);
        assert_eq!(clamped[0], 0);
        assert_eq!(clamped[31], 64);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(decode_public_key("not base64!!").unwrap_err(), KeyDecodeError::Base64);
        assert_eq!(decode_public_key("AAAA").unwrap_err(), KeyDecodeError::Length);
    }
}
