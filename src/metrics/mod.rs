// src/metrics/mod.rs - offline analysis of a completed capture

pub mod spectral;

use crate::capture::CapturedSeries;
use crate::config::{TestConfig, TrajectoryConfig};
use crate::trajectory::{StepPhase, TrajectoryGenerator};
use serde::Serialize;
use thiserror::Error;

pub use spectral::WelchConfig;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("not enough data for analysis: {0}")]
    InsufficientData(String),
    #[error(transparent)]
    Trajectory(#[from] crate::trajectory::TrajectoryError),
    #[error("spectral estimation failed: {0}")]
    Spectral(String),
}

/// Thresholds for step analysis. The usual conventions (10%→90% rise,
/// ±2% settling band) are defaults, not constants.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub rise_low_frac: f64,
    pub rise_high_frac: f64,
    pub settle_band_frac: f64,
    pub welch: WelchConfig,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            rise_low_frac: 0.10,
            rise_high_frac: 0.90,
            settle_band_frac: 0.02,
            welch: WelchConfig::default(),
        }
    }
}

/// Metrics of one step hold window. `None` means the threshold was never
/// crossed inside the window.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StepMetrics {
    pub overshoot_pct: f64,
    pub rise_time: Option<f64>,
    pub settling_time: Option<f64>,
}

/// Per-step metrics plus their averages. Fields that were `None` for a step
/// are excluded from that average, not counted as zero.
#[derive(Debug, Clone, Serialize)]
pub struct TestStepMetrics {
    pub steps: Vec<StepMetrics>,
    pub overshoot_pct: f64,
    pub rise_time: Option<f64>,
    pub settling_time: Option<f64>,
}

/// H1 frequency response between commanded and measured position over the
/// swept band. Magnitude is a linear ratio; phase is unwrapped degrees.
#[derive(Debug, Clone, Serialize)]
pub struct FrequencyResponse {
    pub freq: Vec<f64>,
    pub magnitude: Vec<f64>,
    pub phase: Vec<f64>,
    pub coherence: Vec<f64>,
    /// First frequency at which the magnitude falls 3 dB below the
    /// low-frequency reference, if it ever does.
    pub bandwidth: Option<f64>,
}

/// Analysis output for one capture. Absent sections mean the capture did not
/// carry the data for them; downstream consumers skip the matching plots.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TestMetrics {
    pub step: Option<TestStepMetrics>,
    pub frequency_response: Option<FrequencyResponse>,
}

/// Computes whatever the capture supports: step metrics for step tests,
/// frequency response for chirp captures that recorded commanded frequency.
pub fn analyze(
    series: &CapturedSeries,
    config: &TestConfig,
    metrics: &MetricsConfig,
) -> Result<TestMetrics, MetricsError> {
    match &config.trajectory {
        TrajectoryConfig::Step { .. } => {
            let generator = TrajectoryGenerator::new(
                &config.trajectory,
                config.start_pos,
                config.limits.min_pos,
                config.limits.max_pos,
            )?;
            let Some(phases) = generator.step_phases() else {
                return Ok(TestMetrics::default());
            };
            Ok(TestMetrics {
                step: Some(compute_step_metrics(series, phases, metrics)?),
                frequency_response: None,
            })
        }
        TrajectoryConfig::Chirp {
            start_freq,
            end_freq,
            ..
        } => {
            if !series.has_frequency_data() {
                tracing::warn!(
                    "capture has no commanded-frequency data; skipping frequency response"
                );
                return Ok(TestMetrics::default());
            }
            let band = (start_freq.min(*end_freq), start_freq.max(*end_freq));
            match frequency_response(series, band.0, band.1, metrics) {
                Ok(response) => Ok(TestMetrics {
                    step: None,
                    frequency_response: Some(response),
                }),
                Err(MetricsError::InsufficientData(reason)) => {
                    tracing::warn!("frequency response skipped: {reason}");
                    Ok(TestMetrics::default())
                }
                Err(err) => Err(err),
            }
        }
        TrajectoryConfig::Sine { .. } => Ok(TestMetrics::default()),
    }
}

/// Step metrics over the given hold windows.
pub fn compute_step_metrics(
    series: &CapturedSeries,
    phases: &[StepPhase],
    config: &MetricsConfig,
) -> Result<TestStepMetrics, MetricsError> {
    let mut steps = Vec::new();
    for phase in phases {
        let window: Vec<(f64, f64)> = series
            .iter()
            .filter(|r| {
                r.time_since_start >= phase.onset && r.time_since_start < phase.onset + phase.hold
            })
            .map(|r| (r.time_since_start, r.position))
            .collect();
        if window.is_empty() || phase.size().abs() < 1e-9 {
            continue;
        }
        steps.push(step_metrics_for_window(&window, phase, config));
    }
    if steps.is_empty() {
        return Err(MetricsError::InsufficientData(
            "no samples fell inside any step window".into(),
        ));
    }

    let overshoot_pct = steps.iter().map(|s| s.overshoot_pct).sum::<f64>() / steps.len() as f64;
    let rise_time = mean_of_present(steps.iter().map(|s| s.rise_time));
    let settling_time = mean_of_present(steps.iter().map(|s| s.settling_time));
    Ok(TestStepMetrics {
        steps,
        overshoot_pct,
        rise_time,
        settling_time,
    })
}

fn mean_of_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let present: Vec<f64> = values.flatten().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}

fn step_metrics_for_window(
    window: &[(f64, f64)],
    phase: &StepPhase,
    config: &MetricsConfig,
) -> StepMetrics {
    let size = phase.size();
    let direction = size.signum();
    let target = phase.target;

    let first_crossing = |threshold: f64| {
        window
            .iter()
            .find(|(_, pos)| (pos - threshold) * direction >= 0.0)
            .map(|(t, _)| *t)
    };
    let low = phase.from + config.rise_low_frac * size;
    let high = phase.from + config.rise_high_frac * size;
    let rise_time = match (first_crossing(low), first_crossing(high)) {
        (Some(t_low), Some(t_high)) => Some((t_high - t_low).max(0.0)),
        _ => None,
    };

    let overshoot = window
        .iter()
        .map(|(_, pos)| (pos - target) * direction)
        .fold(0.0f64, f64::max);
    let overshoot_pct = overshoot.max(0.0) / size.abs() * 100.0;

    let band = config.settle_band_frac * size.abs();
    let last_violation = window
        .iter()
        .rposition(|(_, pos)| (pos - target).abs() > band);
    let settling_time = match last_violation {
        None => window.first().map(|(t, _)| (t - phase.onset).max(0.0)),
        Some(i) if i + 1 < window.len() => Some(window[i + 1].0 - phase.onset),
        Some(_) => None,
    };

    StepMetrics {
        overshoot_pct,
        rise_time,
        settling_time,
    }
}

/// H1 estimate between commanded position (input) and measured position
/// (output), restricted to the swept band.
pub fn frequency_response(
    series: &CapturedSeries,
    freq_low: f64,
    freq_high: f64,
    config: &MetricsConfig,
) -> Result<FrequencyResponse, MetricsError> {
    let sample_rate = series.effective_sample_rate().ok_or_else(|| {
        MetricsError::InsufficientData("capture is too short to estimate a sample rate".into())
    })?;
    let input = series.commanded_positions();
    let output = series.positions();

    let sxy = spectral::welch_cpsd(&input, &output, sample_rate, &config.welch)?;
    let sxx = spectral::welch_psd(&input, sample_rate, &config.welch)?;
    let syy = spectral::welch_psd(&output, sample_rate, &config.welch)?;

    let mut freq = Vec::new();
    let mut magnitude = Vec::new();
    let mut phase_wrapped = Vec::new();
    let mut coherence = Vec::new();
    for i in 0..sxy.len() {
        let (f, cross) = sxy[i];
        if f < freq_low || f > freq_high {
            continue;
        }
        let input_power = sxx[i].1;
        if input_power <= 1e-12 {
            continue;
        }
        let h = cross / input_power;
        freq.push(f);
        magnitude.push(h.norm());
        phase_wrapped.push(h.arg().to_degrees());
        let denom = input_power * syy[i].1;
        coherence.push(if denom > 1e-12 {
            (cross.norm_sqr() / denom).min(1.0)
        } else {
            0.0
        });
    }
    if freq.is_empty() {
        return Err(MetricsError::InsufficientData(format!(
            "no spectral bins inside the swept band {freq_low:.2}-{freq_high:.2} Hz"
        )));
    }

    let bandwidth = compute_bandwidth(&freq, &magnitude);
    Ok(FrequencyResponse {
        phase: spectral::unwrap_phase_deg(&phase_wrapped),
        freq,
        magnitude,
        coherence,
        bandwidth,
    })
}

/// First ascending crossing of the −3 dB line relative to the low-frequency
/// reference magnitude, linearly interpolated between bins.
pub fn compute_bandwidth(freq: &[f64], magnitude: &[f64]) -> Option<f64> {
    if freq.len() < 2 || freq.len() != magnitude.len() {
        return None;
    }
    let reference_bins = magnitude.len().min(3);
    let reference = magnitude[..reference_bins].iter().sum::<f64>() / reference_bins as f64;
    if reference <= 0.0 {
        return None;
    }
    let threshold = reference * 10f64.powf(-3.0 / 20.0);
    for i in 1..magnitude.len() {
        if magnitude[i - 1] >= threshold && magnitude[i] < threshold {
            let span = magnitude[i - 1] - magnitude[i];
            let t = if span.abs() > 1e-12 {
                (magnitude[i - 1] - threshold) / span
            } else {
                0.5
            };
            return Some(freq[i - 1] + t * (freq[i] - freq[i - 1]));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SampleRecord;
    use std::f64::consts::PI;

    fn phase(onset: f64, hold: f64, from: f64, target: f64) -> StepPhase {
        StepPhase {
            onset,
            hold,
            from,
            target,
        }
    }

    fn series_from(positions: &[(f64, f64)]) -> CapturedSeries {
        let mut series = CapturedSeries::new();
        for &(t, pos) in positions {
            series.push(SampleRecord {
                time_since_start: t,
                position: pos,
                commanded_position: 0.0,
                torque: None,
                velocity: None,
                commanded_frequency: None,
            });
        }
        series
    }

    /// First-order rise toward `target` with time constant `tau`.
    fn exponential_rise(target: f64, n: usize, dt: f64, tau: f64) -> Vec<(f64, f64)> {
        (0..n)
            .map(|i| {
                let t = i as f64 * dt;
                (t, target * (1.0 - (-t / tau).exp()))
            })
            .collect()
    }

    #[test]
    fn rise_and_settle_on_a_clean_exponential() {
        let samples = exponential_rise(10.0, 300, 0.01, 0.2);
        let series = series_from(&samples);
        let metrics = compute_step_metrics(
            &series,
            &[phase(0.0, 3.0, 0.0, 10.0)],
            &MetricsConfig::default(),
        )
        .unwrap();
        assert_eq!(metrics.steps.len(), 1);
        let step = &metrics.steps[0];
        // 10%→90% of an exponential: tau·ln(9) ≈ 0.44s.
        let rise = step.rise_time.unwrap();
        assert!((rise - 0.2 * 9f64.ln()).abs() < 0.03, "rise {rise}");
        // Settles into ±2% at tau·ln(50) ≈ 0.78s.
        let settle = step.settling_time.unwrap();
        assert!((settle - 0.2 * 50f64.ln()).abs() < 0.05, "settle {settle}");
        // No excursion past the target.
        assert!(step.overshoot_pct.abs() < 1e-9);
    }

    #[test]
    fn overshoot_is_measured_beyond_target_only() {
        // Ramp to 12°, sag back to 10°, hold: a 20% overshoot of a 10° step.
        let samples: Vec<(f64, f64)> = (0..200)
            .map(|i| {
                let t = i as f64 * 0.01;
                let pos = if t < 0.3 {
                    40.0 * t
                } else if t < 0.5 {
                    12.0 - 10.0 * (t - 0.3)
                } else {
                    10.0
                };
                (t, pos)
            })
            .collect();
        let series = series_from(&samples);
        let metrics = compute_step_metrics(
            &series,
            &[phase(0.0, 2.0, 0.0, 10.0)],
            &MetricsConfig::default(),
        )
        .unwrap();
        let step = &metrics.steps[0];
        assert!(
            (step.overshoot_pct - 20.0).abs() < 1.5,
            "overshoot {}",
            step.overshoot_pct
        );
        // Rise covers 10%→90% of the ramp: (9-1)/40 s.
        let rise = step.rise_time.unwrap();
        assert!((rise - 0.2).abs() < 0.03, "rise {rise}");
    }

    #[test]
    fn never_crossed_thresholds_become_none_and_are_excluded_from_means() {
        // First step rises fully; second step stalls at 30% of the size.
        let mut samples = exponential_rise(10.0, 100, 0.01, 0.1);
        samples.extend((0..100).map(|i| (1.0 + i as f64 * 0.01, 3.0)));
        let series = series_from(&samples);
        let phases = [phase(0.0, 1.0, 0.0, 10.0), phase(1.0, 1.0, 0.0, 10.0)];
        let metrics =
            compute_step_metrics(&series, &phases, &MetricsConfig::default()).unwrap();
        assert_eq!(metrics.steps.len(), 2);
        assert!(metrics.steps[0].rise_time.is_some());
        assert!(metrics.steps[1].rise_time.is_none());
        assert!(metrics.steps[1].settling_time.is_none());
        // The aggregate equals the first step's value: the None is excluded,
        // not averaged in as zero.
        let aggregate = metrics.rise_time.unwrap();
        let only = metrics.steps[0].rise_time.unwrap();
        assert!((aggregate - only).abs() < 1e-12);
    }

    #[test]
    fn all_none_aggregates_stay_none() {
        let samples: Vec<(f64, f64)> = (0..100).map(|i| (i as f64 * 0.01, 0.5)).collect();
        let series = series_from(&samples);
        let metrics = compute_step_metrics(
            &series,
            &[phase(0.0, 1.0, 0.0, 10.0)],
            &MetricsConfig::default(),
        )
        .unwrap();
        assert!(metrics.rise_time.is_none());
        assert!(metrics.settling_time.is_none());
    }

    #[test]
    fn negative_steps_are_symmetric() {
        let samples = exponential_rise(-10.0, 300, 0.01, 0.2);
        let series = series_from(&samples);
        let metrics = compute_step_metrics(
            &series,
            &[phase(0.0, 3.0, 0.0, -10.0)],
            &MetricsConfig::default(),
        )
        .unwrap();
        let step = &metrics.steps[0];
        assert!(step.rise_time.is_some());
        assert!(step.overshoot_pct.abs() < 1e-9);
    }

    fn chirp_series(n: usize, fs: f64, lag_alpha: Option<f64>) -> CapturedSeries {
        // Linear sweep 0.2 → 10 Hz used as the commanded position; the
        // measured position is either a copy scaled by 0.5 or a one-pole lag.
        let duration = n as f64 / fs;
        let (f0, f1) = (0.2, 10.0);
        let k = (f1 - f0) / duration;
        let mut series = CapturedSeries::new();
        let mut lagged = 0.0f64;
        for i in 0..n {
            let t = i as f64 / fs;
            let cmd = 5.0 * (2.0 * PI * (f0 * t + 0.5 * k * t * t)).sin();
            let pos = match lag_alpha {
                Some(alpha) => {
                    lagged += alpha * (cmd - lagged);
                    lagged
                }
                None => 0.5 * cmd,
            };
            series.push(SampleRecord {
                time_since_start: t,
                position: pos,
                commanded_position: cmd,
                torque: None,
                velocity: None,
                commanded_frequency: Some(f0 + k * t),
            });
        }
        series
    }

    #[test]
    fn flat_gain_yields_flat_magnitude_and_high_coherence() {
        let series = chirp_series(4096, 100.0, None);
        let response =
            frequency_response(&series, 0.3, 8.0, &MetricsConfig::default()).unwrap();
        assert!(!response.freq.is_empty());
        for (i, &mag) in response.magnitude.iter().enumerate() {
            assert!((mag - 0.5).abs() < 0.05, "bin {i}: magnitude {mag}");
            assert!(response.coherence[i] > 0.9, "bin {i}");
            assert!(response.phase[i].abs() < 5.0, "bin {i}");
        }
        assert!(response.bandwidth.is_none());
    }

    #[test]
    fn one_pole_lag_rolls_off_with_a_bandwidth() {
        // alpha = 0.1 at 100 Hz puts the -3 dB corner near 1.7 Hz.
        let series = chirp_series(8192, 100.0, Some(0.1));
        let response =
            frequency_response(&series, 0.3, 10.0, &MetricsConfig::default()).unwrap();
        let bandwidth = response.bandwidth.expect("roll-off should cross -3 dB");
        assert!(
            bandwidth > 1.0 && bandwidth < 2.5,
            "bandwidth {bandwidth} Hz"
        );
        // Phase lags (negative) well before the corner.
        let last = response.phase.last().copied().unwrap();
        assert!(last < -20.0, "phase {last}");
    }

    #[test]
    fn bandwidth_interpolates_between_bins() {
        let freq = vec![1.0, 2.0, 3.0, 4.0];
        let magnitude = vec![1.0, 1.0, 0.4, 0.3];
        let bw = compute_bandwidth(&freq, &magnitude).unwrap();
        assert!(bw > 2.0 && bw < 3.0, "bw {bw}");
    }

    #[test]
    fn analyze_without_frequency_data_omits_the_response() {
        let mut series = CapturedSeries::new();
        for i in 0..600 {
            series.push(SampleRecord {
                time_since_start: i as f64 * 0.01,
                position: 0.0,
                commanded_position: 0.0,
                torque: None,
                velocity: None,
                commanded_frequency: None,
            });
        }
        let config = TestConfig::with_trajectory(TrajectoryConfig::Chirp {
            amplitude: 10.0,
            start_freq: 0.2,
            end_freq: 1.5,
            duration: 6.0,
        });
        let metrics = analyze(&series, &config, &MetricsConfig::default()).unwrap();
        assert!(metrics.frequency_response.is_none());
        assert!(metrics.step.is_none());
    }
}
