// src/metrics/spectral.rs - Welch spectral estimation over captured traces

use super::MetricsError;
use realfft::RealFftPlanner;
use realfft::num_complex::Complex64;
use std::f64::consts::PI;

/// Segmentation settings for Welch averaging.
#[derive(Debug, Clone)]
pub struct WelchConfig {
    /// Segment length in samples; 0 picks a power of two targeting at least
    /// eight averaged segments.
    pub segment_length: usize,
    /// Fractional overlap between consecutive segments.
    pub overlap: f64,
}

impl Default for WelchConfig {
    fn default() -> Self {
        Self {
            segment_length: 0,
            overlap: 0.5,
        }
    }
}

struct SegmentPlan {
    segment_length: usize,
    hop: usize,
    nfft: usize,
    num_freqs: usize,
    num_segments: usize,
    window: Vec<f64>,
    window_power: f64,
}

fn hann_window(len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (len as f64 - 1.0)).cos()))
        .collect()
}

fn plan_segments(len: usize, config: &WelchConfig) -> Result<SegmentPlan, MetricsError> {
    let segment_length = if config.segment_length == 0 {
        (len / 8).max(256).next_power_of_two()
    } else {
        config.segment_length
    };
    if segment_length < 8 {
        return Err(MetricsError::Spectral(format!(
            "segment length {segment_length} is too short"
        )));
    }
    if segment_length > len {
        return Err(MetricsError::InsufficientData(format!(
            "{len} samples cannot fill one {segment_length}-sample segment"
        )));
    }
    if !(0.0..1.0).contains(&config.overlap) {
        return Err(MetricsError::Spectral(format!(
            "overlap must be in [0, 1), got {}",
            config.overlap
        )));
    }
    let hop = (((1.0 - config.overlap) * segment_length as f64) as usize).max(1);
    let nfft = segment_length.next_power_of_two();
    let window = hann_window(segment_length);
    let window_power = window.iter().map(|w| w * w).sum();
    Ok(SegmentPlan {
        segment_length,
        hop,
        nfft,
        num_freqs: nfft / 2 + 1,
        num_segments: (len - segment_length) / hop + 1,
        window,
        window_power,
    })
}

fn frequency_vector(nfft: usize, sample_rate: f64) -> Vec<f64> {
    (0..nfft / 2 + 1)
        .map(|i| i as f64 * sample_rate / nfft as f64)
        .collect()
}

fn segment_spectrum(
    signal: &[f64],
    start: usize,
    plan: &SegmentPlan,
    fft: &dyn realfft::RealToComplex<f64>,
) -> Result<Vec<Complex64>, MetricsError> {
    let mut input = fft.make_input_vec();
    for i in 0..plan.segment_length {
        input[i] = signal[start + i] * plan.window[i];
    }
    let mut spectrum = fft.make_output_vec();
    fft.process(&mut input, &mut spectrum)
        .map_err(|e| MetricsError::Spectral(e.to_string()))?;
    Ok(spectrum)
}

/// One-sided scaling shared by the auto- and cross-spectra.
fn one_sided_scale(plan: &SegmentPlan, bin: usize, sample_rate: f64) -> f64 {
    let base = 1.0 / (sample_rate * plan.window_power);
    let is_nyquist = plan.nfft % 2 == 0 && bin == plan.num_freqs - 1;
    if bin > 0 && !is_nyquist { 2.0 * base } else { base }
}

/// Welch power spectral density, `(frequency, Sxx)` per one-sided bin.
pub fn welch_psd(
    signal: &[f64],
    sample_rate: f64,
    config: &WelchConfig,
) -> Result<Vec<(f64, f64)>, MetricsError> {
    let plan = plan_segments(signal.len(), config)?;
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(plan.nfft);
    let mut sum = vec![0.0f64; plan.num_freqs];
    for seg in 0..plan.num_segments {
        let spectrum = segment_spectrum(signal, seg * plan.hop, &plan, fft.as_ref())?;
        for (bin, value) in spectrum.iter().enumerate() {
            sum[bin] += value.norm_sqr() * one_sided_scale(&plan, bin, sample_rate);
        }
    }
    Ok(frequency_vector(plan.nfft, sample_rate)
        .into_iter()
        .zip(sum)
        .map(|(f, s)| (f, s / plan.num_segments as f64))
        .collect())
}

/// Welch cross power spectral density `Sxy = conj(X)·Y`, so the phase of
/// `Sxy/Sxx` is the output's lag relative to the input (negative for a
/// delayed response).
pub fn welch_cpsd(
    input: &[f64],
    output: &[f64],
    sample_rate: f64,
    config: &WelchConfig,
) -> Result<Vec<(f64, Complex64)>, MetricsError> {
    if input.len() != output.len() {
        return Err(MetricsError::Spectral(format!(
            "signal lengths differ: {} vs {}",
            input.len(),
            output.len()
        )));
    }
    let plan = plan_segments(input.len(), config)?;
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(plan.nfft);
    let mut sum = vec![Complex64::new(0.0, 0.0); plan.num_freqs];
    for seg in 0..plan.num_segments {
        let start = seg * plan.hop;
        let x = segment_spectrum(input, start, &plan, fft.as_ref())?;
        let y = segment_spectrum(output, start, &plan, fft.as_ref())?;
        for bin in 0..plan.num_freqs {
            sum[bin] += x[bin].conj() * y[bin] * one_sided_scale(&plan, bin, sample_rate);
        }
    }
    Ok(frequency_vector(plan.nfft, sample_rate)
        .into_iter()
        .zip(sum)
        .map(|(f, s)| (f, s / plan.num_segments as f64))
        .collect())
}

/// Removes 360° jumps from a phase sequence in degrees.
pub fn unwrap_phase_deg(phase: &[f64]) -> Vec<f64> {
    let mut unwrapped = Vec::with_capacity(phase.len());
    let mut offset = 0.0;
    for (i, &value) in phase.iter().enumerate() {
        if i > 0 {
            let mut diff = value - phase[i - 1];
            while diff > 180.0 {
                diff -= 360.0;
                offset -= 360.0;
            }
            while diff < -180.0 {
                diff += 360.0;
                offset += 360.0;
            }
        }
        unwrapped.push(value + offset);
    }
    unwrapped
}
