//! Signed ticket tokens.
//!
//! Wire format: `base64url(json) "." base64url(hmac_sha256(json, secret))`,
//! unpadded. Padded segments are accepted on decode.

use std::fmt;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::models::TicketClaims;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("token must have exactly two segments")]
    Segments,

    #[error("token segment is not valid base64url")]
    Encoding,

    #[error("signature does not match payload")]
    Signature,

    #[error("invalid ticket payload: {0}")]
    Payload(String),

    #[error("signing key rejected")]
    Key,
}

impl CodecError {
    /// The token is not shaped like a signed ticket at all, as opposed to a
    /// well-formed token with a bad signature.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            CodecError::Segments | CodecError::Encoding | CodecError::Payload(_)
        )
    }
}

#[derive(Clone)]
pub struct TicketCodec {
    key: Vec<u8>,
}

impl fmt::Debug for TicketCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketCodec").finish_non_exhaustive()
    }
}

impl TicketCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: secret.to_vec(),
        }
    }

    pub fn encode(&self, claims: &TicketClaims) -> Result<String, CodecError> {
        let payload =
            serde_json::to_vec(claims).map_err(|e| CodecError::Payload(e.to_string()))?;
        let signature = self.sign(&payload)?;
        Ok(format!(
            "{}.{}",
            TOKEN_B64.encode(&payload),
            TOKEN_B64.encode(signature)
        ))
    }

    /// Verifies the signature, then parses the payload. Expiry is left to the
    /// caller.
    pub fn decode(&self, token: &str) -> Result<TicketClaims, CodecError> {
        let mut segments = token.split('.');
        let (payload_b64, signature_b64) = match (segments.next(), segments.next(), segments.next())
        {
            (Some(payload), Some(signature), None) => (payload, signature),
            _ => return Err(CodecError::Segments),
        };

        let payload = TOKEN_B64
            .decode(payload_b64)
            .map_err(|_| CodecError::Encoding)?;
        let provided = TOKEN_B64
            .decode(signature_b64)
            .map_err(|_| CodecError::Encoding)?;

        let expected = self.sign(&payload)?;
        if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            return Err(CodecError::Signature);
        }

        serde_json::from_slice(&payload).map_err(|e| CodecError::Payload(e.to_string()))
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| CodecError::Key)?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
