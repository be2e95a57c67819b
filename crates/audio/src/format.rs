//! Magic-byte format sniffing and per-session audio format metadata.

/// Wire encodings the vendor is known to send audio chunks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Wav,
    Pcm16,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Pcm16 => "pcm16",
        }
    }
}

/// Classifies an audio payload by its first bytes.
///
/// An `ID3` tag or an MP3 frame sync (0xFF followed by a byte with the top
/// three bits set) means MP3; a `RIFF` signature means WAV; everything else
/// is treated as raw PCM16. This is a heuristic, not a demuxer: a raw PCM
/// stream that happens to start with one of these patterns is misclassified.
/// Callers pin the first classification per session rather than re-sniffing
/// every chunk.
pub fn detect_format(bytes: &[u8]) -> AudioFormat {
    if bytes.len() >= 3 && &bytes[..3] == b"ID3" {
        return AudioFormat::Mp3;
    }
    if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0 {
        return AudioFormat::Mp3;
    }
    if bytes.len() >= 4 && &bytes[..4] == b"RIFF" {
        return AudioFormat::Wav;
    }
    AudioFormat::Pcm16
}

/// Sample-rate and channel metadata learned once per session from the
/// vendor's initiation event, read thereafter to wrap raw PCM chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for FormatDescriptor {
    fn default() -> Self {
        Self {
            sample_rate: crate::CANONICAL_SAMPLE_RATE,
            channels: 1,
        }
    }
}

impl FormatDescriptor {
    /// Parses a vendor format label such as `pcm_16000` or `mp3_44100_128`
    /// by extracting the trailing 4-6 digit run as the sample rate. Returns
    /// `None` when no plausible rate is present.
    pub fn from_vendor_label(label: &str) -> Option<Self> {
        let rate = label
            .split(|c: char| !c.is_ascii_digit())
            .filter(|run| run.len() >= 4 && run.len() <= 6)
            .filter_map(|run| run.parse::<u32>().ok())
            .find(|&r| (8_000..=192_000).contains(&r))?;
        Some(Self {
            sample_rate: rate,
            channels: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_id3_and_frame_sync_as_mp3() {
        assert_eq!(detect_format(b"ID3\x04\x00"), AudioFormat::Mp3);
        assert_eq!(detect_format(&[0xFF, 0xFB, 0x90, 0x00]), AudioFormat::Mp3);
        assert_eq!(detect_format(&[0xFF, 0xE2, 0x00]), AudioFormat::Mp3);
    }

    #[test]
    fn detects_riff_as_wav() {
        let wav = crate::wav::pcm16_to_wav(&[0, 0], 16_000, 1);
        assert_eq!(detect_format(&wav), AudioFormat::Wav);
    }

    #[test]
    fn everything_else_is_pcm16() {
        assert_eq!(detect_format(&[]), AudioFormat::Pcm16);
        assert_eq!(detect_format(&[0x00, 0x01, 0x02]), AudioFormat::Pcm16);
        // 0xFF without the frame-sync high bits is not MP3.
        assert_eq!(detect_format(&[0xFF, 0x10]), AudioFormat::Pcm16);
    }

    #[test]
    fn vendor_labels_parse_to_sample_rates() {
        assert_eq!(
            FormatDescriptor::from_vendor_label("pcm_16000"),
            Some(FormatDescriptor {
                sample_rate: 16_000,
                channels: 1
            })
        );
        assert_eq!(
            FormatDescriptor::from_vendor_label("mp3_44100_128")
                .unwrap()
                .sample_rate,
            44_100
        );
        assert_eq!(FormatDescriptor::from_vendor_label("ulaw"), None);
        assert_eq!(FormatDescriptor::from_vendor_label("pcm_999"), None);
    }

    #[test]
    fn descriptor_defaults_to_16k_mono() {
        let d = FormatDescriptor::default();
        assert_eq!(d.sample_rate, 16_000);
        assert_eq!(d.channels, 1);
    }
}
