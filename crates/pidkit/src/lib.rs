// pidkit: PID control core with bumpless transfer and relay autotuning
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Computational core of a single PID control loop.
//!
//! The crate has two halves:
//!
//! - [`PidEngine`] owns one loop's controller memory and turns a periodic
//!   `(measurement, setpoint, config)` triple into an output plus the
//!   per-term [`Contributions`]. It handles integral anti-windup, bumpless
//!   manual/automatic transfer and derivative-on-measurement.
//! - [`RelayAutoTuner`] is a pure function over a recorded relay
//!   oscillation trace that derives the ultimate gain/period and
//!   Ziegler-Nichols gains.
//!
//! Scheduling, sensor polling and persistence belong to the host. The host
//! calls [`PidEngine::step`] once per sample interval and may feed the
//! result of [`RelayAutoTuner::tune`] back as new [`Tunings`].
//!
//! ```
//! use pidkit::{ControllerConfig, PidEngine};
//!
//! let config = ControllerConfig::new()
//!     .with_kp(1.0)
//!     .with_ki(0.1)
//!     .with_kd(0.05)
//!     .with_sample_time(1.0)
//!     .without_output_limits();
//!
//! let mut engine = PidEngine::new();
//! let step = engine.step(40.0, 50.0, &config).unwrap();
//! assert!((step.output - 11.0).abs() < 1e-12);
//! ```

mod autotune;
mod config;
mod engine;

#[cfg(feature = "debugging")]
mod debug;

pub use autotune::{Extremum, RelayAutoTuner, TuningResult, UltimateParameters};
pub use config::{ControllerConfig, Direction, Limits, ModeFlags, StartMode, Tunings};
pub use engine::{Contributions, ControllerState, PidEngine, StepOutput, ThreadSafePidEngine};

#[cfg(feature = "debugging")]
pub use debug::{ControllerDebugData, ControllerDebugger, DebugConfig};

use thiserror::Error;

/// Errors reported by the engine, the autotuner and config loading.
///
/// Every failure is returned synchronously and nothing is retried
/// internally. A failed [`PidEngine::step`] leaves the controller state
/// untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PidError {
    /// Invalid parameter value (NaN, infinity, or out of allowed range)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),
    /// The oscillation trace is too short to contain a single extremum
    #[error("Insufficient data for autotune: {samples} samples, need at least 3")]
    InsufficientData { samples: usize },
    /// The trace does not show two maxima and one minimum
    #[error("Could not detect oscillation: found {maxima} maxima and {minima} minima")]
    OscillationNotDetected { maxima: usize, minima: usize },
    /// Peak-to-peak half amplitude is zero or negative
    #[error("Invalid oscillation amplitude: {0}")]
    InvalidAmplitude(f64),
    /// A serialized configuration could not be parsed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// Mutex was poisoned, indicating a panic in another thread
    #[error("Mutex was poisoned")]
    MutexPoisoned,
}
