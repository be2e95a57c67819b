//! PCM16 → WAV container wrapping.

use crate::codec::{CodecError, decode_base64, encode_base64};

/// Size of the canonical RIFF/WAVE header this module writes.
const HEADER_SIZE: usize = 44;

/// Wraps raw little-endian PCM16 bytes in a canonical 44-byte RIFF/WAVE
/// header so stock audio players can decode them.
///
/// The stated sizes are exact: bytes 4–7 carry `36 + data_size` and bytes
/// 40–43 carry `data_size`, where `data_size` is the payload length.
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Vec<u8> {
    let data_size = pcm.len() as u32;
    let block_align = channels * 2;
    let byte_rate = sample_rate * block_align as u32;

    let mut wav = Vec::with_capacity(HEADER_SIZE + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_size).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    wav.extend_from_slice(&1u16.to_le_bytes()); // format tag: PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_size.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}

/// Base64-in/base64-out form of [`pcm16_to_wav`], matching how audio travels
/// on the wire.
pub fn wrap_pcm16_as_wav(
    pcm_base64: &str,
    sample_rate: u32,
    channels: u16,
) -> Result<String, CodecError> {
    let pcm = decode_base64(pcm_base64)?;
    Ok(encode_base64(&pcm16_to_wav(&pcm, sample_rate, channels)))
}
