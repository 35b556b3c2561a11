//! Decoding of published RSA public keys.
//!
//! Issuers publish keys as base64url-encoded big-endian modulus and exponent
//! strings. Both padded and unpadded encodings are accepted.

use std::fmt;
use std::sync::Arc;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use jsonwebtoken::DecodingKey;

use crate::error::{AuthError, Result};

const EXPONENT_WIDTH: usize = 8;

const BASE64_URL_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// An RSA public key as published by the token issuer.
///
/// The verification key is built once at decode time and shared by clones.
#[derive(Clone)]
pub struct RsaPublicKey {
    modulus: Vec<u8>,
    exponent: u64,
    decoding_key: Arc<DecodingKey>,
}

impl RsaPublicKey {
    fn new(modulus: Vec<u8>, exponent: u64) -> Self {
        let exponent_bytes = exponent.to_be_bytes();
        let first = exponent_bytes
            .iter()
            .position(|b| *b != 0)
            .unwrap_or(EXPONENT_WIDTH - 1);
        let decoding_key = DecodingKey::from_rsa_raw_components(
            &modulus,
            exponent_bytes.get(first..).unwrap_or_default(),
        );

        Self {
            modulus,
            exponent,
            decoding_key: Arc::new(decoding_key),
        }
    }

    /// Big-endian modulus bytes without leading zeros.
    #[must_use]
    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    /// The public exponent.
    #[must_use]
    pub const fn exponent(&self) -> u64 {
        self.exponent
    }

    /// Key suitable for signature verification.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl PartialEq for RsaPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.modulus == other.modulus && self.exponent == other.exponent
    }
}

impl Eq for RsaPublicKey {}

impl fmt::Debug for RsaPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaPublicKey")
            .field("modulus_bits", &(self.modulus.len() * 8))
            .field("exponent", &self.exponent)
            .finish_non_exhaustive()
    }
}

/// Decode a base64url modulus/exponent pair into an [`RsaPublicKey`].
///
/// The exponent is left-padded to eight bytes before being read as a
/// big-endian integer, so short encodings such as `AQAB` keep their value.
///
/// # Errors
///
/// Returns [`AuthError::Decode`] if either component is not valid base64url,
/// the modulus is empty, or the exponent is zero or wider than 64 bits.
pub fn decode_rsa_components(modulus_b64: &str, exponent_b64: &str) -> Result<RsaPublicKey> {
    let modulus = BASE64_URL_LENIENT
        .decode(modulus_b64)
        .map_err(|e| AuthError::Decode(format!("modulus: {e}")))?;
    let first = modulus.iter().position(|b| *b != 0).unwrap_or(modulus.len());
    let modulus = modulus.get(first..).unwrap_or_default().to_vec();
    if modulus.is_empty() {
        return Err(AuthError::Decode("modulus is empty".to_string()));
    }

    let exponent = decode_exponent(exponent_b64)?;

    Ok(RsaPublicKey::new(modulus, exponent))
}

fn decode_exponent(exponent_b64: &str) -> Result<u64> {
    let raw = BASE64_URL_LENIENT
        .decode(exponent_b64)
        .map_err(|e| AuthError::Decode(format!("exponent: {e}")))?;
    if raw.len() > EXPONENT_WIDTH {
        return Err(AuthError::Decode(format!(
            "exponent is {} bytes, at most {EXPONENT_WIDTH} supported",
            raw.len()
        )));
    }

    let mut padded = [0u8; EXPONENT_WIDTH];
    let offset = EXPONENT_WIDTH - raw.len();
    for (slot, byte) in padded.iter_mut().skip(offset).zip(raw.iter()) {
        *slot = *byte;
    }

    match u64::from_be_bytes(padded) {
        0 => Err(AuthError::Decode("exponent is zero".to_string())),
        e => Ok(e),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use base64::prelude::*;

    const MODULUS: &str = "sBjVwZBJe3rjlGM2dc_qCahsrXTlXIk4Sk7wPRQi7l6CM5UYbd_kKu3fD_uCkLPnEhuylWfgf2a98SIvvOlNAfMG7hR82MN-YpgKrvJozQqcEsvQVPKOCaqK6xYeSA_Ag1EEP3UbOUZ4CxrSIS5-COXZv4cTR1hvZoEEHFaO1JG4NcTM7FsRcrjFBI9Smi9mD5YYOsLJqBLlB4vGpfRphxqmeHV_xmiLT2KpI2ArZaJODDkD503WUjHIkCjKwOoO2Pk0ZGciX8wvmn5mllzu-fj9-CRas-4IVLGVWs2clnUFPDLcwns8qNscDVLMZM8cuZM4RY4PirFZp0cXNxInWw==";

    #[test]
    fn decodes_standard_exponent() {
        let key = decode_rsa_components(MODULUS, "AQAB").unwrap();
        assert_eq!(key.exponent(), 65537);
        assert_eq!(key.modulus().len(), 256);
    }

    #[test]
    fn padded_and_unpadded_modulus_agree() {
        let unpadded = MODULUS.trim_end_matches('=');
        let a = decode_rsa_components(MODULUS, "AQAB").unwrap();
        let b = decode_rsa_components(unpadded, "AQAB").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn short_exponents_keep_their_value() {
        for len in 1..EXPONENT_WIDTH {
            let bytes: Vec<u8> = (1..=u8::try_from(len).unwrap()).collect();
            let expected = bytes
                .iter()
                .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

            let encoded = BASE64_URL_SAFE_NO_PAD.encode(&bytes);
            let key = decode_rsa_components(MODULUS, &encoded).unwrap();
            assert_eq!(key.exponent(), expected, "exponent of {len} bytes");
        }
    }

    #[test]
    fn exponent_with_leading_zero_byte() {
        let encoded = BASE64_URL_SAFE_NO_PAD.encode([0x00, 0x01, 0x00, 0x01]);
        let key = decode_rsa_components(MODULUS, &encoded).unwrap();
        assert_eq!(key.exponent(), 65537);
    }

    #[test]
    fn full_width_exponent() {
        let encoded = BASE64_URL_SAFE_NO_PAD.encode([0, 0, 0, 0, 0, 0x01, 0x00, 0x01]);
        let key = decode_rsa_components(MODULUS, &encoded).unwrap();
        assert_eq!(key.exponent(), 65537);
    }

    #[test]
    fn rejects_oversized_exponent() {
        let encoded = BASE64_URL_SAFE_NO_PAD.encode([1u8; 9]);
        let err = decode_rsa_components(MODULUS, &encoded).unwrap_err();
        assert!(matches!(err, AuthError::Decode(_)));
    }

    #[test]
    fn rejects_malformed_base64() {
        assert!(matches!(
            decode_rsa_components("not base64!!", "AQAB"),
            Err(AuthError::Decode(_))
        ));
        assert!(matches!(
            decode_rsa_components(MODULUS, "A*QAB"),
            Err(AuthError::Decode(_))
        ));
    }

    #[test]
    fn rejects_empty_components() {
        assert!(matches!(
            decode_rsa_components("", "AQAB"),
            Err(AuthError::Decode(_))
        ));
        assert!(matches!(
            decode_rsa_components(MODULUS, ""),
            Err(AuthError::Decode(_))
        ));
    }

    #[test]
    fn strips_leading_zero_in_modulus() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&[0xC0, 0xFF, 0xEE]);
        let encoded = BASE64_URL_SAFE_NO_PAD.encode(&bytes);
        let key = decode_rsa_components(&encoded, "AQAB").unwrap();
        assert_eq!(key.modulus(), &[0xC0, 0xFF, 0xEE]);
    }

    #[test]
    fn clones_share_verification_key() {
        let key = decode_rsa_components(MODULUS, "AQAB").unwrap();
        let copy = key.clone();
        assert!(std::ptr::eq(key.decoding_key(), copy.decoding_key()));
        assert!(std::ptr::eq(key.decoding_key(), key.decoding_key()));
    }

    #[test]
    fn debug_summarizes_key() {
        let key = decode_rsa_components(MODULUS, "AQAB").unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("modulus_bits: 2048"));
        assert!(debug.contains("exponent: 65537"));
    }
}
