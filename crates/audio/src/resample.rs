//! Linear-interpolation resampling for mono f32 audio.

/// Resamples `input` from `from_rate` to `to_rate` by linear interpolation.
///
/// When the rates are equal the input is returned unchanged. Otherwise the
/// output length is `round(len * to_rate / from_rate)` and each output
/// sample interpolates between the two nearest input samples. Quality is
/// adequate for 16 kHz speech; this is deliberately not a windowed-sinc
/// resampler.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (input.len() as f64 / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let i0 = pos as usize;
        let i1 = (i0 + 1).min(input.len() - 1);
        let frac = (pos - i0 as f64) as f32;
        let i0 = i0.min(input.len() - 1);
        out.push(input[i0] * (1.0 - frac) + input[i1] * frac);
    }
    out
}
