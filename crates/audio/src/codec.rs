//! Base64 framing and PCM16 sample conversions.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Errors produced when decoding wire payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Decodes standard base64 text into raw bytes.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, CodecError> {
    Ok(STANDARD.decode(text)?)
}

/// Encodes raw bytes as standard base64 text. Exact inverse of
/// [`decode_base64`] for any byte sequence.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Converts f32 samples in [-1.0, 1.0] to signed 16-bit PCM.
///
/// Inputs outside the nominal range saturate at the 16-bit extremes rather
/// than wrapping: -2.0 becomes [`i16::MIN`] and 2.0 becomes [`i16::MAX`].
/// NaN clamps to zero.
pub fn float_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
            if s < 0.0 {
                (s * 32768.0).max(i16::MIN as f32) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Converts signed 16-bit PCM samples to f32 in [-1.0, 1.0).
pub fn i16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Encodes i16 samples as base64-framed little-endian PCM16 bytes, the form
/// both wire protocols carry audio in.
pub fn encode_i16_base64(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    encode_base64(&bytes)
}
