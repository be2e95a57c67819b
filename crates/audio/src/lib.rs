//! Pure, stateless audio byte-format conversions shared by the relay server
//! and the console client.
//!
//! Everything in this crate operates on in-memory buffers: base64 framing,
//! PCM16 ↔ WAV container wrapping, linear resampling, and magic-byte format
//! sniffing. There is no I/O and no async here.

pub mod codec;
pub mod format;
pub mod resample;
pub mod wav;

pub use codec::{
    CodecError, decode_base64, encode_base64, encode_i16_base64, float_to_i16, i16_to_float,
};
pub use format::{AudioFormat, FormatDescriptor, detect_format};
pub use resample::resample_linear;
pub use wav::{pcm16_to_wav, wrap_pcm16_as_wav};

/// Canonical capture rate expected by the vendor's conversational endpoint.
pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;
