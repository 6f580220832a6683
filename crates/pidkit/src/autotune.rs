// pidkit: PID control core with bumpless transfer and relay autotuning
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Relay (Åström-Hägglund) autotuning.
//!
//! Exciting a process with an on/off relay of amplitude `d` drives it into a
//! limit cycle. Its half amplitude `a` and period `Pu` give the ultimate gain
//! `Ku = 4d / (π a)` by describing-function analysis, and the classic
//! Ziegler-Nichols rules map `(Ku, Pu)` to PID gains.
//!
//! Acquiring the trace (switching the relay, sampling at a fixed cadence,
//! dropping the initial transient) is up to the caller.

use std::f64::consts::PI;

use log::debug;

use crate::config::Tunings;
use crate::PidError;

const MIN_SAMPLES: usize = 3;

// Ziegler-Nichols PID rule
const ZN_KP: f64 = 0.6;
const ZN_KI: f64 = 1.2;
const ZN_KD: f64 = 0.075;

/// A strict local maximum or minimum of the trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extremum {
    pub index: usize,
    pub value: f64,
}

/// Characteristics of the observed limit cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct UltimateParameters {
    /// `Ku`
    pub ultimate_gain: f64,
    /// `Pu` in seconds, from the last two maxima
    pub ultimate_period: f64,
    /// Half the distance between the mean maximum and the mean minimum
    pub amplitude: f64,
    pub maxima: Vec<Extremum>,
    pub minima: Vec<Extremum>,
}

impl UltimateParameters {
    /// Ziegler-Nichols PID gains for these ultimate parameters.
    pub fn ziegler_nichols(&self) -> TuningResult {
        let ku = self.ultimate_gain;
        let pu = self.ultimate_period;
        TuningResult {
            kp: ZN_KP * ku,
            ki: ZN_KI * ku / pu,
            kd: ZN_KD * ku * pu,
        }
    }
}

/// Gains suggested by the autotuner. The caller decides whether to apply
/// them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningResult {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl From<TuningResult> for Tunings {
    fn from(result: TuningResult) -> Self {
        Tunings::new(result.kp, result.ki, result.kd)
    }
}

/// Stateless relay autotuner. Safe to call from any number of threads.
pub struct RelayAutoTuner;

impl RelayAutoTuner {
    /// Return Ziegler-Nichols gains for a relay oscillation trace.
    ///
    /// # Arguments
    /// * `data` - Process values sampled every `sample_time` seconds,
    ///   covering at least two full oscillation cycles
    /// * `sample_time` - Spacing between samples in seconds
    /// * `relay_amplitude` - Absolute output step used during the relay test
    ///
    /// # Errors
    /// * [`PidError::InvalidParameter`] for a non-positive `sample_time` or
    ///   `relay_amplitude`
    /// * [`PidError::InsufficientData`] for fewer than 3 samples
    /// * [`PidError::OscillationNotDetected`] without 2 maxima and 1 minimum
    /// * [`PidError::InvalidAmplitude`] when the amplitude is not positive
    pub fn tune(
        data: &[f64],
        sample_time: f64,
        relay_amplitude: f64,
    ) -> Result<TuningResult, PidError> {
        let ultimate = Self::analyze(data, sample_time, relay_amplitude)?;
        let result = ultimate.ziegler_nichols();
        debug!(
            "autotune: Ku={:.4} Pu={:.4}s -> kp={:.4} ki={:.4} kd={:.4}",
            ultimate.ultimate_gain, ultimate.ultimate_period, result.kp, result.ki, result.kd
        );
        Ok(result)
    }

    /// Derive the ultimate gain and period from a relay oscillation trace.
    /// Fails the same way as [`tune`](Self::tune).
    pub fn analyze(
        data: &[f64],
        sample_time: f64,
        relay_amplitude: f64,
    ) -> Result<UltimateParameters, PidError> {
        if !(sample_time.is_finite() && sample_time > 0.0) {
            return Err(PidError::InvalidParameter(
                "sample_time must be a positive finite number",
            ));
        }
        if !(relay_amplitude.is_finite() && relay_amplitude > 0.0) {
            return Err(PidError::InvalidParameter(
                "relay_amplitude must be a positive finite number",
            ));
        }
        if data.len() < MIN_SAMPLES {
            return Err(PidError::InsufficientData {
                samples: data.len(),
            });
        }

        let (maxima, minima) = find_extrema(data);

        // Two maxima for the period, one minimum for the amplitude
        let (last, previous) = match maxima.as_slice() {
            [.., previous, last] if !minima.is_empty() => (last, previous),
            _ => {
                return Err(PidError::OscillationNotDetected {
                    maxima: maxima.len(),
                    minima: minima.len(),
                })
            }
        };
        let ultimate_period = (last.index - previous.index) as f64 * sample_time;

        let amplitude = (mean(&maxima) - mean(&minima)) / 2.0;
        if amplitude.is_nan() || amplitude <= 0.0 {
            return Err(PidError::InvalidAmplitude(amplitude));
        }

        let ultimate_gain = 4.0 * relay_amplitude / (PI * amplitude);

        Ok(UltimateParameters {
            ultimate_gain,
            ultimate_period,
            amplitude,
            maxima,
            minima,
        })
    }
}

fn find_extrema(data: &[f64]) -> (Vec<Extremum>, Vec<Extremum>) {
    let mut maxima = Vec::new();
    let mut minima = Vec::new();

    for (offset, window) in data.windows(3).enumerate() {
        let (prev, cur, next) = (window[0], window[1], window[2]);
        let extremum = Extremum {
            index: offset + 1,
            value: cur,
        };
        if cur > prev && cur > next {
            maxima.push(extremum);
        }
        if cur < prev && cur < next {
            minima.push(extremum);
        }
    }

    (maxima, minima)
}

fn mean(extrema: &[Extremum]) -> f64 {
    extrema.iter().map(|e| e.value).sum::<f64>() / extrema.len() as f64
}
