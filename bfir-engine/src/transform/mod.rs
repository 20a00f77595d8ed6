//! Spectral transform engine
//!
//! Real transforms of size `2 × block_length` in half-complex packing:
//! `hc[k]` holds the real part of bin `k` for `k = 0..=n/2` and `hc[n - k]`
//! the imaginary part for `k = 1..n/2`. Transforms are unnormalized.
//! Convolution works on a reordered layout, see [`kernels`].

mod kernels;
mod plan;

pub use kernels::{
    convolve, convolve_add, convolve_inplace, convolve_inplace_ordered, dirac_convolve,
    dirac_convolve_inplace, mix_and_scale, MixMode,
};
pub use plan::{wisdom_path, Direction, Placement, Plan, PlanCache, MAX_ORDER};

use realfft::{ComplexToReal, RealToComplex};
use rustfft::num_complex::Complex;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::error::TransformError;
use crate::log::SharedSink;
use crate::real::{log2_exact, next_power_of_two, Real};

/// Smallest block length the reordered layout supports
pub const MIN_BLOCK_LENGTH: usize = 4;

/// Forward/inverse real transforms plus spectral arithmetic for one block length
pub struct Transform<T: Real> {
    block_length: usize,
    /// Transform size, twice the block length
    size: usize,
    order: u32,
    plans: PlanCache<T>,
    forward: Arc<dyn RealToComplex<T>>,
    inverse: Arc<dyn ComplexToReal<T>>,
    forward_inplace: Arc<dyn RealToComplex<T>>,
    inverse_inplace: Arc<dyn ComplexToReal<T>>,
    /// Pre-allocated buffers so transforms never allocate
    spectrum: Vec<Complex<T>>,
    work: Vec<T>,
    scratch: Vec<Complex<T>>,
    /// Two time-domain buffers for crossfades
    fade: Vec<T>,
    sink: SharedSink,
}

/// A short filter applied by direct small-block transforms
#[derive(Debug, Clone)]
pub struct ShortFilter<T> {
    block_length: usize,
    /// Spectrum in plain half-complex layout, scaled by `1/(2 × block_length)`
    coeffs: Vec<T>,
}

impl<T> ShortFilter<T> {
    pub fn block_length(&self) -> usize {
        self.block_length
    }
}

impl<T: Real> Transform<T> {
    pub fn new(block_length: usize, sink: SharedSink) -> Result<Self, TransformError> {
        Self::with_wisdom(block_length, sink, None)
    }

    /// Build the engine, importing and refreshing plans from `wisdom_dir` when given
    pub fn with_wisdom(
        block_length: usize,
        sink: SharedSink,
        wisdom_dir: Option<&Path>,
    ) -> Result<Self, TransformError> {
        let order = match log2_exact(block_length) {
            Some(log2) if block_length >= MIN_BLOCK_LENGTH && log2 < MAX_ORDER => log2 + 1,
            _ => return Err(TransformError::InvalidLength(block_length)),
        };
        let size = block_length * 2;
        let realsize = T::PRECISION.realsize();

        let mut plans = PlanCache::new(sink.clone());
        let wisdom = wisdom_dir.map(|dir| wisdom_path(dir, block_length, realsize));
        if let Some(path) = &wisdom {
            match plans.import_wisdom(path) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => sink.log(&format!(
                    "Warning: could not read FFT wisdom from {}: {}",
                    path.display(),
                    e
                )),
            }
        }

        sink.log(&format!("Creating 4 FFT plans of size {}...", size));
        let forward = forward_plan(&mut plans, Placement::OutOfPlace, order)?;
        let inverse = inverse_plan(&mut plans, Placement::OutOfPlace, order)?;
        let forward_inplace = forward_plan(&mut plans, Placement::InPlace, order)?;
        let inverse_inplace = inverse_plan(&mut plans, Placement::InPlace, order)?;

        if let Some(path) = &wisdom {
            if let Err(e) = plans.export_wisdom(path) {
                sink.log(&format!(
                    "Warning: could not save FFT wisdom to {}: {}",
                    path.display(),
                    e
                ));
            }
        }

        let scratch_len = [
            forward.get_scratch_len(),
            inverse.get_scratch_len(),
            forward_inplace.get_scratch_len(),
            inverse_inplace.get_scratch_len(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0);

        Ok(Self {
            block_length,
            size,
            order,
            plans,
            forward,
            inverse,
            forward_inplace,
            inverse_inplace,
            spectrum: vec![Complex::new(T::ZERO, T::ZERO); size / 2 + 1],
            work: vec![T::ZERO; size],
            scratch: vec![Complex::new(T::ZERO, T::ZERO); scratch_len],
            fade: vec![T::ZERO; size * 2],
            sink,
        })
    }

    pub fn block_length(&self) -> usize {
        self.block_length
    }

    /// Transform size (`2 × block_length`)
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn plans(&self) -> &PlanCache<T> {
        &self.plans
    }

    /// Send a message to the engine's sink
    pub fn log(&self, message: &str) {
        self.sink.log(message);
    }

    /// Forward transform of `input` into half-complex `output`
    pub fn time_to_freq(&mut self, input: &[T], output: &mut [T]) {
        self.work.copy_from_slice(input);
        run_forward(&*self.forward, &mut self.work, &mut self.spectrum, &mut self.scratch);
        pack_halfcomplex(&self.spectrum, output);
    }

    pub fn time_to_freq_inplace(&mut self, buffer: &mut [T]) {
        self.work.copy_from_slice(buffer);
        run_forward(
            &*self.forward_inplace,
            &mut self.work,
            &mut self.spectrum,
            &mut self.scratch,
        );
        pack_halfcomplex(&self.spectrum, buffer);
    }

    /// Inverse transform of half-complex `input` into `output`
    pub fn freq_to_time(&mut self, input: &[T], output: &mut [T]) {
        unpack_halfcomplex(input, &mut self.spectrum);
        run_inverse(&*self.inverse, &mut self.spectrum, output, &mut self.scratch);
    }

    pub fn freq_to_time_inplace(&mut self, buffer: &mut [T]) {
        unpack_halfcomplex(buffer, &mut self.spectrum);
        run_inverse(
            &*self.inverse_inplace,
            &mut self.spectrum,
            buffer,
            &mut self.scratch,
        );
    }

    /// In-place transform of any order, planning it on first use
    pub fn execute(
        &mut self,
        order: u32,
        direction: Direction,
        buffer: &mut [T],
    ) -> Result<(), TransformError> {
        self.plans
            .plan(direction, Placement::InPlace, order)?
            .execute(buffer)
    }

    /// Weighted sum of half-complex or working-layout buffers, see [`mix_and_scale`]
    pub fn mix_and_scale(&self, inputs: &[&[T]], output: &mut [T], scales: &[f64], mode: MixMode) {
        mix_and_scale(inputs, output, scales, mode);
    }

    pub fn convolve(&self, input: &[T], coeffs: &[T], output: &mut [T]) {
        convolve(input, coeffs, output);
    }

    pub fn convolve_add(&self, input: &[T], coeffs: &[T], output: &mut [T]) {
        convolve_add(input, coeffs, output);
    }

    pub fn convolve_inplace(&self, buffer: &mut [T], coeffs: &[T]) {
        convolve_inplace(buffer, coeffs);
    }

    pub fn dirac_convolve(&self, input: &[T], output: &mut [T]) {
        dirac_convolve(input, output);
    }

    pub fn dirac_convolve_inplace(&self, buffer: &mut [T]) {
        dirac_convolve_inplace(buffer);
    }

    /// Turn up to `block_length` raw coefficients into a working-layout spectrum.
    ///
    /// Coefficients land in the upper half of a zeroed transform buffer so the
    /// valid overlap-save output is the lower half of each inverse transform.
    pub fn coeffs_to_internal(
        &mut self,
        coeffs: &[T],
        scale: f64,
        dest: &mut [T],
    ) -> Result<(), TransformError> {
        if dest.len() != self.size {
            return Err(TransformError::LengthMismatch {
                expected: self.size,
                actual: dest.len(),
            });
        }
        let count = coeffs.len().min(self.block_length);
        let scale = T::of(scale);

        let mut buffer = vec![T::ZERO; self.size];
        for (slot, &c) in buffer[self.block_length..].iter_mut().zip(&coeffs[..count]) {
            let value = c * scale;
            if !value.finite() {
                self.sink.log("NaN or Inf value among coefficients.");
                return Err(TransformError::NonFinite);
            }
            *slot = value;
        }

        self.time_to_freq_inplace(&mut buffer);
        mix_and_scale(&[&buffer], dest, &[1.0 / self.size as f64], MixMode::Input);
        Ok(())
    }

    /// True if every value of every buffer is finite
    pub fn verify(&self, buffers: &[&[T]]) -> bool {
        for (index, buffer) in buffers.iter().enumerate() {
            if let Some(pos) = buffer.iter().position(|v| !v.finite()) {
                self.sink.log(&format!(
                    "NaN or Inf value in coefficient buffer {} at position {}.",
                    index, pos
                ));
                return false;
            }
        }
        true
    }

    /// Replace `input` by a linear crossfade from `crossfade` to `input`.
    ///
    /// Both spectra are in working layout. The fade spans the first
    /// `block_length` output samples; the result is re-scaled by `1/size`
    /// like coefficient spectra.
    pub fn crossfade_inplace(&mut self, input: &mut [T], crossfade: &[T]) {
        let size = self.size;
        let half = self.block_length;
        let mut fade = std::mem::take(&mut self.fade);
        {
            let (old, new) = fade.split_at_mut(size);
            mix_and_scale(&[crossfade], new, &[1.0], MixMode::Output);
            self.freq_to_time(new, old);
            mix_and_scale(&[&*input], new, &[1.0], MixMode::Output);
            self.freq_to_time_inplace(new);

            let step = T::ONE / T::of((half - 1) as f64);
            for n in 0..half {
                let t = step * T::of(n as f64);
                new[n] = old[n] * (T::ONE - t) + new[n] * t;
            }

            self.time_to_freq_inplace(new);
            mix_and_scale(&[&*new], input, &[1.0 / size as f64], MixMode::Input);
        }
        self.fade = fade;
    }

    /// Prepare a short filter whose block length is the next power of two
    /// at or above `coeffs.len()`
    pub fn short_filter(&mut self, coeffs: &[T]) -> Result<ShortFilter<T>, TransformError> {
        if coeffs.is_empty() {
            return Err(TransformError::InvalidLength(0));
        }
        let block_length = next_power_of_two(coeffs.len());
        let order = block_length.trailing_zeros() + 1;
        let size = block_length * 2;

        let mut spectrum = vec![T::ZERO; size];
        spectrum[block_length..block_length + coeffs.len()].copy_from_slice(coeffs);
        self.execute(order, Direction::Forward, &mut spectrum)?;
        let scale = T::ONE / T::of(size as f64);
        for v in spectrum.iter_mut() {
            *v *= scale;
        }
        // Inverse plan is needed for every block run through the filter
        self.plans.plan(Direction::Inverse, Placement::InPlace, order)?;

        Ok(ShortFilter {
            block_length,
            coeffs: spectrum,
        })
    }

    /// Filter one overlap block (`2 × filter.block_length()` samples) in place.
    ///
    /// The upper half holds the newest input; the filtered samples end up in
    /// the lower half.
    pub fn short_convolve(
        &mut self,
        filter: &ShortFilter<T>,
        overlap_block: &mut [T],
    ) -> Result<(), TransformError> {
        let order = filter.block_length.trailing_zeros() + 1;
        self.execute(order, Direction::Forward, overlap_block)?;
        convolve_inplace_ordered(overlap_block, &filter.coeffs);
        self.execute(order, Direction::Inverse, overlap_block)
    }
}

fn forward_plan<T: Real>(
    plans: &mut PlanCache<T>,
    placement: Placement,
    order: u32,
) -> Result<Arc<dyn RealToComplex<T>>, TransformError> {
    match plans.plan(Direction::Forward, placement, order)? {
        Plan::Forward(fft) => Ok(fft.clone()),
        Plan::Inverse(_) => Err(TransformError::OrderOutOfRange(order)),
    }
}

fn inverse_plan<T: Real>(
    plans: &mut PlanCache<T>,
    placement: Placement,
    order: u32,
) -> Result<Arc<dyn ComplexToReal<T>>, TransformError> {
    match plans.plan(Direction::Inverse, placement, order)? {
        Plan::Inverse(ifft) => Ok(ifft.clone()),
        Plan::Forward(_) => Err(TransformError::OrderOutOfRange(order)),
    }
}

#[inline]
fn run_forward<T: Real>(
    fft: &dyn RealToComplex<T>,
    work: &mut [T],
    spectrum: &mut [Complex<T>],
    scratch: &mut [Complex<T>],
) {
    // Buffer lengths are fixed when the plan is created
    let result = fft.process_with_scratch(work, spectrum, scratch);
    debug_assert!(result.is_ok(), "forward transform: {:?}", result);
}

impl<T: Real> Plan<T> {
    /// Transform `buffer` in place, half-complex on the frequency side
    pub fn execute(&self, buffer: &mut [T]) -> Result<(), TransformError> {
        let size = self.len();
        if buffer.len() != size {
            return Err(TransformError::LengthMismatch {
                expected: size,
                actual: buffer.len(),
            });
        }
        if size < 2 {
            // A length-1 transform is the identity
            return Ok(());
        }

        let mut spectrum = vec![Complex::new(T::ZERO, T::ZERO); size / 2 + 1];
        let mut scratch = vec![Complex::new(T::ZERO, T::ZERO); self.scratch_len()];
        match self {
            Plan::Forward(fft) => {
                let mut work = buffer.to_vec();
                run_forward(&**fft, &mut work, &mut spectrum, &mut scratch);
                pack_halfcomplex(&spectrum, buffer);
            }
            Plan::Inverse(ifft) => {
                unpack_halfcomplex(buffer, &mut spectrum);
                run_inverse(&**ifft, &mut spectrum, buffer, &mut scratch);
            }
        }
        Ok(())
    }
}

#[inline]
fn run_inverse<T: Real>(
    ifft: &dyn ComplexToReal<T>,
    spectrum: &mut [Complex<T>],
    output: &mut [T],
    scratch: &mut [Complex<T>],
) {
    let result = ifft.process_with_scratch(spectrum, output, scratch);
    debug_assert!(result.is_ok(), "inverse transform: {:?}", result);
}

fn pack_halfcomplex<T: Real>(spectrum: &[Complex<T>], out: &mut [T]) {
    let n = out.len();
    let half = n / 2;
    out[0] = spectrum[0].re;
    for k in 1..half {
        out[k] = spectrum[k].re;
        out[n - k] = spectrum[k].im;
    }
    out[half] = spectrum[half].re;
}

fn unpack_halfcomplex<T: Real>(input: &[T], spectrum: &mut [Complex<T>]) {
    let n = input.len();
    let half = n / 2;
    spectrum[0] = Complex::new(input[0], T::ZERO);
    for k in 1..half {
        spectrum[k] = Complex::new(input[k], input[n - k]);
    }
    spectrum[half] = Complex::new(input[half], T::ZERO);
}
