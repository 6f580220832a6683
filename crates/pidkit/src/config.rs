// pidkit: PID control core with bumpless transfer and relay autotuning
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::PidError;

/// Action direction of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Output rises when the measurement falls below the setpoint.
    /// All gains must be non-negative.
    #[default]
    Direct,
    /// Explicit opt-in for reverse acting loops. All gains must be
    /// non-positive.
    Reverse,
}

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunings {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub direction: Direction,
}

impl Default for Tunings {
    fn default() -> Self {
        Tunings {
            kp: 1.0,
            ki: 0.1,
            kd: 0.05,
            direction: Direction::Direct,
        }
    }
}

impl Tunings {
    /// Direct acting gains.
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Tunings {
            kp,
            ki,
            kd,
            direction: Direction::Direct,
        }
    }

    /// Same gains, reverse acting.
    pub fn reversed(mut self) -> Self {
        self.direction = Direction::Reverse;
        self
    }

    pub fn validate(&self) -> Result<(), PidError> {
        if !self.kp.is_finite() {
            return Err(PidError::InvalidParameter("kp must be a finite number"));
        }
        if !self.ki.is_finite() {
            return Err(PidError::InvalidParameter("ki must be a finite number"));
        }
        if !self.kd.is_finite() {
            return Err(PidError::InvalidParameter("kd must be a finite number"));
        }

        let gains = [self.kp, self.ki, self.kd];
        match self.direction {
            Direction::Direct if gains.iter().any(|g| *g < 0.0) => Err(
                PidError::InvalidParameter("gains must be non-negative for direct action"),
            ),
            Direction::Reverse if gains.iter().any(|g| *g > 0.0) => Err(
                PidError::InvalidParameter("gains must be non-positive for reverse action"),
            ),
            _ => Ok(()),
        }
    }
}

/// Output limits. `None` on either side means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Limits {
    pub fn new(min: f64, max: f64) -> Self {
        Limits {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn unbounded() -> Self {
        Limits::default()
    }

    /// Lower bound, `-inf` when unset.
    pub fn lower(&self) -> f64 {
        self.min.unwrap_or(f64::NEG_INFINITY)
    }

    /// Upper bound, `+inf` when unset.
    pub fn upper(&self) -> f64 {
        self.max.unwrap_or(f64::INFINITY)
    }

    /// Clamp `value` into the limits. Only meaningful once validated.
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.lower()).min(self.upper())
    }

    pub fn validate(&self) -> Result<(), PidError> {
        if self.min.is_some_and(f64::is_nan) || self.max.is_some_and(f64::is_nan) {
            return Err(PidError::InvalidParameter("output limits must not be NaN"));
        }
        // Unbounded is spelled None
        if self.min.is_some_and(f64::is_infinite) || self.max.is_some_and(f64::is_infinite) {
            return Err(PidError::InvalidParameter(
                "output limits must be finite; leave a side unset for unbounded",
            ));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(PidError::InvalidParameter(
                    "output_min must not exceed output_max",
                ));
            }
        }
        Ok(())
    }
}

/// Per-cycle behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeFlags {
    /// Compute P from the measurement instead of the error.
    pub proportional_on_measurement: bool,
    /// Clamp integral and output to the limits.
    pub windup_protection: bool,
}

impl Default for ModeFlags {
    fn default() -> Self {
        ModeFlags {
            proportional_on_measurement: false,
            windup_protection: true,
        }
    }
}

/// Everything a [`crate::PidEngine`] step needs besides the measurement and
/// setpoint.
///
/// Uses a builder pattern; nothing is checked until [`validate`] or a
/// [`crate::PidEngine::step`] call, which rejects the whole configuration
/// at once.
///
/// [`validate`]: ControllerConfig::validate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Sample interval `dt` in seconds.
    pub sample_time: f64,
    pub tunings: Tunings,
    pub limits: Limits,
    pub flags: ModeFlags,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            sample_time: 10.0,
            tunings: Tunings::default(),
            limits: Limits::new(-10.0, 10.0),
            flags: ModeFlags::default(),
        }
    }
}

impl ControllerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML. Missing keys take their defaults;
    /// unbounded limit sides are simply omitted.
    ///
    /// ```
    /// let config = pidkit::ControllerConfig::from_toml_str(
    ///     r#"
    ///     sample_time = 0.5
    ///
    ///     [tunings]
    ///     kp = 2.0
    ///     ki = 0.4
    ///     kd = 0.0
    ///
    ///     [limits]
    ///     min = 0.0
    ///     "#,
    /// )
    /// .unwrap();
    /// assert_eq!(config.limits.max, None);
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, PidError> {
        let config: ControllerConfig =
            toml::from_str(source).map_err(|e| PidError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, PidError> {
        toml::to_string(self).map_err(|e| PidError::InvalidConfig(e.to_string()))
    }

    /// Set the proportional gain (Kp).
    pub fn with_kp(mut self, kp: f64) -> Self {
        self.tunings.kp = kp;
        self
    }

    /// Set the integral gain (Ki).
    pub fn with_ki(mut self, ki: f64) -> Self {
        self.tunings.ki = ki;
        self
    }

    /// Set the derivative gain (Kd).
    pub fn with_kd(mut self, kd: f64) -> Self {
        self.tunings.kd = kd;
        self
    }

    /// Replace all gains at once, e.g. with an autotune result.
    pub fn with_tunings(mut self, tunings: impl Into<Tunings>) -> Self {
        self.tunings = tunings.into();
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.tunings.direction = direction;
        self
    }

    /// Set the output limits (min, max).
    pub fn with_output_limits(mut self, min: f64, max: f64) -> Self {
        self.limits = Limits::new(min, max);
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Remove both output limits.
    pub fn without_output_limits(mut self) -> Self {
        self.limits = Limits::unbounded();
        self
    }

    /// Set the sample interval in seconds.
    pub fn with_sample_time(mut self, sample_time: f64) -> Self {
        self.sample_time = sample_time;
        self
    }

    pub fn with_proportional_on_measurement(mut self, enable: bool) -> Self {
        self.flags.proportional_on_measurement = enable;
        self
    }

    /// Enable or disable anti-windup.
    pub fn with_windup_protection(mut self, enable: bool) -> Self {
        self.flags.windup_protection = enable;
        self
    }

    /// Check the sample interval, gains and limits.
    pub fn validate(&self) -> Result<(), PidError> {
        if !(self.sample_time.is_finite() && self.sample_time > 0.0) {
            return Err(PidError::InvalidParameter(
                "sample_time must be a positive finite number",
            ));
        }
        self.tunings.validate()?;
        self.limits.validate()
    }
}

/// Policy for picking the output a loop resumes from when an operator
/// forces an output.
///
/// The host resolves it to a concrete seed and hands that to
/// [`crate::PidEngine::set_output`] or
/// [`crate::PidEngine::set_auto_mode`]; the engine never sees the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartMode {
    #[serde(rename = "Zero start")]
    ZeroStart,
    #[serde(rename = "Last known value")]
    LastKnownValue,
    #[serde(rename = "Startup value")]
    StartupValue,
}

impl StartMode {
    pub const ALL: [StartMode; 3] = [
        StartMode::ZeroStart,
        StartMode::LastKnownValue,
        StartMode::StartupValue,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            StartMode::ZeroStart => "Zero start",
            StartMode::LastKnownValue => "Last known value",
            StartMode::StartupValue => "Startup value",
        }
    }

    /// Resolve to a seed output. Missing values fall back to zero.
    pub fn resolve(&self, last_known: Option<f64>, startup: Option<f64>) -> f64 {
        match self {
            StartMode::ZeroStart => 0.0,
            StartMode::LastKnownValue => last_known.unwrap_or(0.0),
            StartMode::StartupValue => startup.unwrap_or(0.0),
        }
    }
}

impl fmt::Display for StartMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for StartMode {
    type Err = PidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StartMode::ALL
            .into_iter()
            .find(|mode| mode.label() == s)
            .ok_or(PidError::InvalidParameter("unknown start mode"))
    }
}
