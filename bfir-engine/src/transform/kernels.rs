//! Spectral arithmetic on the reordered working layout
//!
//! The working layout stores four bins per group of eight values: four real
//! parts followed by the four matching imaginary parts. Bin 0 and the
//! Nyquist bin are real only; the Nyquist real part occupies the unused
//! imaginary slot of bin 0 (index 4).

use crate::real::Real;

/// Direction of the layout translation done by [`mix_and_scale`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixMode {
    /// Half-complex in, working layout out
    Input,
    /// Working layout in, half-complex out
    Output,
}

/// Weighted sum of `inputs` written to `output`, translating the layout per `mode`
pub fn mix_and_scale<T: Real>(inputs: &[&[T]], output: &mut [T], scales: &[f64], mode: MixMode) {
    match (inputs, scales) {
        ([a], [sa]) => {
            let sa = T::of(*sa);
            reorder(output, mode, |i| a[i] * sa)
        }
        ([a, b], [sa, sb]) => {
            let (sa, sb) = (T::of(*sa), T::of(*sb));
            reorder(output, mode, |i| a[i] * sa + b[i] * sb)
        }
        ([a, b, c], [sa, sb, sc]) => {
            let (sa, sb, sc) = (T::of(*sa), T::of(*sb), T::of(*sc));
            reorder(output, mode, |i| a[i] * sa + b[i] * sb + c[i] * sc)
        }
        ([a, b, c, d], [sa, sb, sc, sd]) => {
            let (sa, sb, sc, sd) = (T::of(*sa), T::of(*sb), T::of(*sc), T::of(*sd));
            reorder(output, mode, |i| a[i] * sa + b[i] * sb + c[i] * sc + d[i] * sd)
        }
        _ => reorder(output, mode, |i| {
            inputs
                .iter()
                .zip(scales)
                .fold(T::ZERO, |acc, (buf, &s)| acc + buf[i] * T::of(s))
        }),
    }
}

#[inline(always)]
fn reorder<T: Real>(out: &mut [T], mode: MixMode, value: impl Fn(usize) -> T) {
    let n = out.len();
    let half = n / 2;
    match mode {
        MixMode::Input => {
            for base in (0..half).step_by(4) {
                for j in 0..4 {
                    out[2 * base + j] = value(base + j);
                }
            }
            out[4] = value(half);
            for j in 1..4 {
                out[4 + j] = value(n - j);
            }
            for base in (4..half).step_by(4) {
                for j in 0..4 {
                    out[2 * base + 4 + j] = value(n - base - j);
                }
            }
        }
        MixMode::Output => {
            for base in (0..half).step_by(4) {
                for j in 0..4 {
                    out[base + j] = value(2 * base + j);
                }
            }
            out[half] = value(4);
            for j in 1..4 {
                out[n - j] = value(4 + j);
            }
            for base in (4..half).step_by(4) {
                for j in 0..4 {
                    out[n - base - j] = value(2 * base + 4 + j);
                }
            }
        }
    }
}

/// `output = input × coeffs`, bin by bin
pub fn convolve<T: Real>(input: &[T], coeffs: &[T], output: &mut [T]) {
    let dc = input[0] * coeffs[0];
    let nyquist = input[4] * coeffs[4];
    for ((b, c), d) in input
        .chunks_exact(8)
        .zip(coeffs.chunks_exact(8))
        .zip(output.chunks_exact_mut(8))
    {
        for j in 0..4 {
            let (br, bi, cr, ci) = (b[j], b[j + 4], c[j], c[j + 4]);
            d[j] = br * cr - bi * ci;
            d[j + 4] = br * ci + bi * cr;
        }
    }
    output[0] = dc;
    output[4] = nyquist;
}

/// `output += input × coeffs`, bin by bin
pub fn convolve_add<T: Real>(input: &[T], coeffs: &[T], output: &mut [T]) {
    let dc = output[0] + input[0] * coeffs[0];
    let nyquist = output[4] + input[4] * coeffs[4];
    for ((b, c), d) in input
        .chunks_exact(8)
        .zip(coeffs.chunks_exact(8))
        .zip(output.chunks_exact_mut(8))
    {
        for j in 0..4 {
            let (br, bi, cr, ci) = (b[j], b[j + 4], c[j], c[j + 4]);
            d[j] += br * cr - bi * ci;
            d[j + 4] += br * ci + bi * cr;
        }
    }
    output[0] = dc;
    output[4] = nyquist;
}

/// `buffer ×= coeffs`, bin by bin
pub fn convolve_inplace<T: Real>(buffer: &mut [T], coeffs: &[T]) {
    let dc = buffer[0] * coeffs[0];
    let nyquist = buffer[4] * coeffs[4];
    for (b, c) in buffer.chunks_exact_mut(8).zip(coeffs.chunks_exact(8)) {
        for j in 0..4 {
            let (br, bi, cr, ci) = (b[j], b[j + 4], c[j], c[j + 4]);
            b[j] = br * cr - bi * ci;
            b[j + 4] = br * ci + bi * cr;
        }
    }
    buffer[0] = dc;
    buffer[4] = nyquist;
}

/// Multiply two spectra held in plain half-complex layout
pub fn convolve_inplace_ordered<T: Real>(buffer: &mut [T], coeffs: &[T]) {
    let n = buffer.len();
    let half = n / 2;
    buffer[0] *= coeffs[0];
    for k in 1..half {
        let re = buffer[k];
        let im = buffer[n - k];
        buffer[k] = re * coeffs[k] - im * coeffs[n - k];
        buffer[n - k] = re * coeffs[n - k] + im * coeffs[k];
    }
    buffer[half] *= coeffs[half];
}

/// `output = input × transform(unit impulse)`.
///
/// The impulse sits at the start of the upper half, so its transform is
/// `±1` per bin; the `1/size` factor matches [`coeffs_to_internal`] scaling.
///
/// [`coeffs_to_internal`]: super::Transform::coeffs_to_internal
pub fn dirac_convolve<T: Real>(input: &[T], output: &mut [T]) {
    let f = T::ONE / T::of(input.len() as f64);
    for (pair_in, pair_out) in input.chunks_exact(2).zip(output.chunks_exact_mut(2)) {
        pair_out[0] = pair_in[0] * f;
        pair_out[1] = -(pair_in[1] * f);
    }
}

/// In-place form of [`dirac_convolve`]
pub fn dirac_convolve_inplace<T: Real>(buffer: &mut [T]) {
    let f = T::ONE / T::of(buffer.len() as f64);
    for pair in buffer.chunks_exact_mut(2) {
        pair[0] *= f;
        pair[1] *= -f;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn halfcomplex(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64 + 1.0).collect()
    }

    #[test]
    fn test_reorder_roundtrip() {
        for n in [8, 16, 64, 1024] {
            let hc = halfcomplex(n);
            let mut working = vec![0.0; n];
            let mut back = vec![0.0; n];
            mix_and_scale(&[&hc], &mut working, &[1.0], MixMode::Input);
            mix_and_scale(&[&working], &mut back, &[1.0], MixMode::Output);
            assert_eq!(back, hc);
        }
    }

    #[test]
    fn test_input_layout_pairs_bins() {
        let n = 16;
        let hc = halfcomplex(n);
        let mut w = vec![0.0; n];
        mix_and_scale(&[&hc], &mut w, &[1.0], MixMode::Input);
        // Reals of bins 0..4, then Nyquist and imaginaries of bins 1..4
        assert_eq!(&w[0..4], &hc[0..4]);
        assert_eq!(w[4], hc[8]);
        assert_eq!(&w[5..8], &[hc[15], hc[14], hc[13]]);
        // Second group: reals of bins 4..8 then imaginaries of the same bins
        assert_eq!(&w[8..12], &hc[4..8]);
        assert_eq!(&w[12..16], &[hc[12], hc[11], hc[10], hc[9]]);
    }

    #[test]
    fn test_mix_generic_matches_specialized() {
        let n = 32;
        let bufs: Vec<Vec<f64>> = (0..5)
            .map(|k| (0..n).map(|i| ((i * (k + 3)) % 7) as f64 - 3.0).collect())
            .collect();
        let scales = [0.5, -1.0, 2.0, 0.25, 3.0];

        let refs: Vec<&[f64]> = bufs.iter().map(|b| b.as_slice()).collect();
        let mut four = vec![0.0; n];
        mix_and_scale(&refs[..4], &mut four, &scales[..4], MixMode::Input);

        let mut five = vec![0.0; n];
        mix_and_scale(&refs, &mut five, &scales, MixMode::Input);

        let mut single_fifth = vec![0.0; n];
        mix_and_scale(&refs[4..], &mut single_fifth, &scales[4..], MixMode::Input);

        for i in 0..n {
            assert!((five[i] - (four[i] + single_fifth[i])).abs() < 1e-12);
        }
    }

    #[test]
    fn test_convolve_complex_product() {
        let n = 16;
        let a: Vec<f64> = (0..n).map(|i| (i as f64 * 0.37).sin()).collect();
        let b: Vec<f64> = (0..n).map(|i| (i as f64 * 0.11).cos()).collect();
        let mut out = vec![0.0; n];
        convolve(&a, &b, &mut out);

        assert_eq!(out[0], a[0] * b[0]);
        assert_eq!(out[4], a[4] * b[4]);
        // Bin 5 lives in group 1, slot 1
        let (re, im) = (a[9] * b[9] - a[13] * b[13], a[9] * b[13] + a[13] * b[9]);
        assert!((out[9] - re).abs() < 1e-15 && (out[13] - im).abs() < 1e-15);

        let mut acc = out.clone();
        convolve_add(&a, &b, &mut acc);
        for i in 0..n {
            assert!((acc[i] - 2.0 * out[i]).abs() < 1e-12);
        }

        let mut inplace = a.clone();
        convolve_inplace(&mut inplace, &b);
        assert_eq!(inplace, out);
    }

    #[test]
    fn test_ordered_matches_reordered() {
        let n = 32;
        let a: Vec<f64> = (0..n).map(|i| (i as f64 * 0.5).sin()).collect();
        let b: Vec<f64> = (0..n).map(|i| (i as f64 * 0.2).cos()).collect();

        let mut ordered = a.clone();
        convolve_inplace_ordered(&mut ordered, &b);

        let (mut wa, mut wb, mut wout, mut back) =
            (vec![0.0; n], vec![0.0; n], vec![0.0; n], vec![0.0; n]);
        mix_and_scale(&[&a], &mut wa, &[1.0], MixMode::Input);
        mix_and_scale(&[&b], &mut wb, &[1.0], MixMode::Input);
        convolve(&wa, &wb, &mut wout);
        mix_and_scale(&[&wout], &mut back, &[1.0], MixMode::Output);

        for i in 0..n {
            assert!((ordered[i] - back[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_dirac_alternates_sign() {
        let input = vec![8.0f32; 8];
        let mut out = vec![0.0f32; 8];
        dirac_convolve(&input, &mut out);
        assert_eq!(out, vec![1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0]);

        let mut buf = input.clone();
        dirac_convolve_inplace(&mut buf);
        assert_eq!(buf, out);
    }
}
