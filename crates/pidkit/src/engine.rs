// pidkit: PID control core with bumpless transfer and relay autotuning
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};

use crate::config::{ControllerConfig, Limits};
use crate::PidError;

#[cfg(feature = "debugging")]
use crate::debug::{ControllerDebugger, DebugConfig};

/// Mutable controller memory of one loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerState {
    /// Accumulated integral term, already scaled by Ki.
    pub integral: f64,
    /// Measurement of the last committed step.
    pub last_input: Option<f64>,
    /// Output of the last committed step or bumpless transfer.
    pub last_output: Option<f64>,
    pub auto_mode: bool,
}

impl ControllerState {
    fn new(auto_mode: bool) -> Self {
        ControllerState {
            integral: 0.0,
            last_input: None,
            last_output: None,
            auto_mode,
        }
    }
}

/// Per-term breakdown of one step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Contributions {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    /// Change of the integral during this step.
    pub delta_i: f64,
}

/// Output of [`PidEngine::step`], always produced as a whole.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    pub output: f64,
    pub contributions: Contributions,
}

/// Inputs of the last accepted step, used as "current inputs" for a
/// bumpless transfer.
#[derive(Debug, Clone, PartialEq)]
struct InputSnapshot {
    measurement: f64,
    setpoint: f64,
    config: ControllerConfig,
}

/// A single-loop PID engine.
///
/// Please use [`ThreadSafePidEngine`] when several threads drive the same loop.
///
/// Each step evaluates
///
/// ```text
/// error  = setpoint - measurement
/// P      = Kp * error                  (or -Kp * measurement)
/// I     += Ki * error * dt
/// D      = -Kd * (measurement - last_input) / dt
/// output = P + I + D
/// ```
///
/// The derivative works on the measurement, so setpoint changes never kick
/// the output. The engine does not own its configuration: tunings, limits,
/// `dt` and mode flags arrive with every call.
pub struct PidEngine {
    state: ControllerState,
    last_inputs: Option<InputSnapshot>,

    #[cfg(feature = "debugging")]
    debugger: Option<ControllerDebugger>,
}

impl Default for PidEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PidEngine {
    /// Create an engine in automatic mode.
    pub fn new() -> Self {
        Self::with_mode(true)
    }

    /// Create an engine in manual mode. It stays frozen until
    /// [`set_auto_mode`](Self::set_auto_mode) switches it on.
    pub fn new_manual() -> Self {
        Self::with_mode(false)
    }

    fn with_mode(auto_mode: bool) -> Self {
        PidEngine {
            state: ControllerState::new(auto_mode),
            last_inputs: None,
            #[cfg(feature = "debugging")]
            debugger: None,
        }
    }

    /// Compute one control cycle.
    ///
    /// # Arguments
    /// * `measurement` - The current measured value of the process variable
    /// * `setpoint` - The target value for this cycle
    /// * `config` - Tunings, limits, sample interval and mode flags
    ///
    /// # Errors
    /// [`PidError::InvalidParameter`] when `dt <= 0`, the limits are inverted,
    /// a gain has the wrong sign for the configured direction, or an input is
    /// not finite. Validation happens before anything is written.
    ///
    /// # Manual mode
    /// The output is still computed from the frozen state and returned, but
    /// the integral, last input and last output are not touched.
    pub fn step(
        &mut self,
        measurement: f64,
        setpoint: f64,
        config: &ControllerConfig,
    ) -> Result<StepOutput, PidError> {
        if let Err(e) = validate_inputs(measurement, setpoint, config) {
            warn!("rejecting PID step: {}", e);
            return Err(e);
        }

        let (step, integral) = evaluate(&self.state, measurement, setpoint, config);

        if self.state.auto_mode {
            self.state.integral = integral;
            self.state.last_input = Some(measurement);
            self.state.last_output = Some(step.output);
        }

        self.last_inputs = Some(InputSnapshot {
            measurement,
            setpoint,
            config: config.clone(),
        });

        trace!(
            "step pv={} sp={} -> out={} (P={}, I={}, D={}, dI={}, auto={})",
            measurement,
            setpoint,
            step.output,
            step.contributions.p,
            step.contributions.i,
            step.contributions.d,
            step.contributions.delta_i,
            self.state.auto_mode
        );

        // Manual steps are streamed too, tagged with the mode
        #[cfg(feature = "debugging")]
        if let Some(ref mut debugger) = self.debugger {
            debugger.log_step(setpoint - measurement, &step, self.state.auto_mode);
        }

        Ok(step)
    }

    /// Switch between manual and automatic mode.
    ///
    /// Going from manual to automatic with a `seed_output` performs a
    /// bumpless transfer: the integral is chosen so that the next step with
    /// the same measurement and setpoint returns `seed_output`. Without a
    /// seed the frozen state simply resumes. Going to manual freezes the
    /// state; the seed is ignored. Asking for the current mode is a no-op.
    ///
    /// # Bumpless transfer
    /// The transfer is only bumpless once the engine has seen at least one
    /// step, manual or automatic, since it needs those inputs to back out the
    /// P term. Without any step the seed becomes the integral as is, so the
    /// first output is `seed + P`.
    pub fn set_auto_mode(
        &mut self,
        enabled: bool,
        seed_output: Option<f64>,
    ) -> Result<(), PidError> {
        if seed_output.is_some_and(|seed| !seed.is_finite()) {
            return Err(PidError::InvalidParameter(
                "seed_output must be a finite number",
            ));
        }

        match (self.state.auto_mode, enabled) {
            (false, true) => self.enter_auto(seed_output),
            (true, false) => {
                self.state.auto_mode = false;
                debug!("PID switched to manual, state frozen");
            }
            _ => debug!("PID already in requested mode (auto={})", enabled),
        }
        Ok(())
    }

    /// Force the output to `seed_output` and continue automatically from
    /// there: reset, then a seeded manual-to-automatic transfer regardless of
    /// the current mode.
    pub fn set_output(&mut self, seed_output: f64) -> Result<(), PidError> {
        if !seed_output.is_finite() {
            return Err(PidError::InvalidParameter(
                "seed_output must be a finite number",
            ));
        }
        self.reset();
        self.state.auto_mode = false;
        self.enter_auto(Some(seed_output));
        Ok(())
    }

    /// Reset the controller memory to its initial state. The mode is kept.
    pub fn reset(&mut self) {
        self.state = ControllerState::new(self.state.auto_mode);
        debug!("PID state reset (auto={})", self.state.auto_mode);
    }

    fn enter_auto(&mut self, seed_output: Option<f64>) {
        if let Some(seed) = seed_output {
            match &self.last_inputs {
                Some(snapshot) => {
                    let config = &snapshot.config;
                    let seed = if config.flags.windup_protection {
                        config.limits.clamp(seed)
                    } else {
                        seed
                    };
                    let error = snapshot.setpoint - snapshot.measurement;
                    let p = proportional(snapshot.measurement, error, config);
                    let increment = config.tunings.ki * error * config.sample_time;

                    // D is zero for the next step at an unchanged measurement, so
                    // after its integration the integral equals seed - P.
                    self.state.last_input = Some(snapshot.measurement);
                    self.state.integral = seed - p - increment;
                    self.state.last_output = Some(seed);
                }
                None => {
                    self.state.integral = seed;
                    self.state.last_output = Some(seed);
                }
            }
            debug!(
                "PID switched to auto with bumpless seed {:?} (integral={})",
                self.state.last_output, self.state.integral
            );
        } else {
            debug!("PID switched to auto, resuming frozen state");
        }
        self.state.auto_mode = true;
    }

    /// Snapshot of the controller memory.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn is_auto(&self) -> bool {
        self.state.auto_mode
    }

    pub fn integral(&self) -> f64 {
        self.state.integral
    }

    pub fn last_output(&self) -> Option<f64> {
        self.state.last_output
    }

    #[cfg(feature = "debugging")]
    pub fn with_debugging(mut self, debug_config: DebugConfig) -> Self {
        self.debugger = Some(ControllerDebugger::new(debug_config));
        self
    }
}

fn validate_inputs(
    measurement: f64,
    setpoint: f64,
    config: &ControllerConfig,
) -> Result<(), PidError> {
    if !measurement.is_finite() {
        return Err(PidError::InvalidParameter(
            "measurement must be a finite number",
        ));
    }
    if !setpoint.is_finite() {
        return Err(PidError::InvalidParameter(
            "setpoint must be a finite number",
        ));
    }
    config.validate()
}

fn proportional(measurement: f64, error: f64, config: &ControllerConfig) -> f64 {
    if config.flags.proportional_on_measurement {
        -config.tunings.kp * measurement
    } else {
        config.tunings.kp * error
    }
}

/// Pure evaluation of one step against `state`. Returns the step output and
/// the integral to commit.
fn evaluate(
    state: &ControllerState,
    measurement: f64,
    setpoint: f64,
    config: &ControllerConfig,
) -> (StepOutput, f64) {
    let tunings = &config.tunings;
    let dt = config.sample_time;
    let error = setpoint - measurement;

    let p = proportional(measurement, error, config);

    let d = match state.last_input {
        Some(last) => -tunings.kd * (measurement - last) / dt,
        None => 0.0,
    };

    let before = state.integral;
    let mut integral = before + tunings.ki * error * dt;

    let output = if config.flags.windup_protection {
        integral = limit_integral(before, integral, &config.limits, p + d);
        config.limits.clamp(p + integral + d)
    } else {
        p + integral + d
    };

    let step = StepOutput {
        output,
        contributions: Contributions {
            p,
            i: integral,
            d,
            delta_i: integral - before,
        },
    };
    (step, integral)
}

/// Keep the integral inside the headroom the other terms leave within the
/// limits. Integration may not push further into saturation, but an integral
/// that is already outside is never pulled back beyond where it was.
fn limit_integral(before: f64, candidate: f64, limits: &Limits, others: f64) -> f64 {
    let high = limits.upper() - others;
    let low = limits.lower() - others;

    if candidate > high {
        high.max(before.min(candidate))
    } else if candidate < low {
        low.min(before.max(candidate))
    } else {
        candidate
    }
}

/// Thread-safe handle to one [`PidEngine`].
///
/// Every call takes the lock for its whole multi-field update, so steps,
/// mode changes and resets from different threads never interleave.
pub struct ThreadSafePidEngine {
    engine: Arc<Mutex<PidEngine>>,
}

impl Clone for ThreadSafePidEngine {
    fn clone(&self) -> Self {
        ThreadSafePidEngine {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl Default for ThreadSafePidEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl From<PidEngine> for ThreadSafePidEngine {
    fn from(engine: PidEngine) -> Self {
        ThreadSafePidEngine {
            engine: Arc::new(Mutex::new(engine)),
        }
    }
}

impl ThreadSafePidEngine {
    /// Create a new thread-safe engine in automatic mode.
    pub fn new() -> Self {
        PidEngine::new().into()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PidEngine>, PidError> {
        self.engine.lock().map_err(|_| PidError::MutexPoisoned)
    }

    /// See [`PidEngine::step`].
    pub fn step(
        &self,
        measurement: f64,
        setpoint: f64,
        config: &ControllerConfig,
    ) -> Result<StepOutput, PidError> {
        self.lock()?.step(measurement, setpoint, config)
    }

    /// See [`PidEngine::set_auto_mode`].
    pub fn set_auto_mode(&self, enabled: bool, seed_output: Option<f64>) -> Result<(), PidError> {
        self.lock()?.set_auto_mode(enabled, seed_output)
    }

    /// See [`PidEngine::set_output`].
    pub fn set_output(&self, seed_output: f64) -> Result<(), PidError> {
        self.lock()?.set_output(seed_output)
    }

    /// Reset the controller state.
    pub fn reset(&self) -> Result<(), PidError> {
        self.lock()?.reset();
        Ok(())
    }

    pub fn state(&self) -> Result<ControllerState, PidError> {
        Ok(self.lock()?.state())
    }

    /// Get the last committed output, if any.
    pub fn last_output(&self) -> Result<Option<f64>, PidError> {
        Ok(self.lock()?.last_output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tunings;
    use std::thread;

    const EPS: f64 = 1e-9;

    fn unbounded(kp: f64, ki: f64, kd: f64) -> ControllerConfig {
        ControllerConfig::new()
            .with_kp(kp)
            .with_ki(ki)
            .with_kd(kd)
            .with_sample_time(1.0)
            .without_output_limits()
    }

    #[test]
    fn test_first_step() {
        let config = unbounded(1.0, 0.1, 0.05).with_windup_protection(false);
        let mut engine = PidEngine::new();

        let step = engine.step(40.0, 50.0, &config).unwrap();

        assert!((step.contributions.p - 10.0).abs() < EPS);
        assert!((step.contributions.i - 1.0).abs() < EPS);
        assert_eq!(step.contributions.d, 0.0, "no derivative without history");
        assert!((step.contributions.delta_i - 1.0).abs() < EPS);
        assert!((step.output - 11.0).abs() < EPS);

        let state = engine.state();
        assert!((state.integral - 1.0).abs() < EPS);
        assert_eq!(state.last_input, Some(40.0));
        assert_eq!(state.last_output, Some(step.output));
    }

    #[test]
    fn test_no_derivative_kick_on_setpoint_change() {
        let config = unbounded(1.0, 0.0, 2.0);
        let mut engine = PidEngine::new();
        engine.step(40.0, 50.0, &config).unwrap();

        // Setpoint jumps, measurement unchanged: D stays zero
        let step = engine.step(40.0, 80.0, &config).unwrap();
        assert_eq!(step.contributions.d, 0.0);
        assert!((step.contributions.p - 40.0).abs() < EPS);

        // Measurement rises by 2 within dt=1: D = -Kd * 2
        let step = engine.step(42.0, 80.0, &config).unwrap();
        assert!((step.contributions.d + 4.0).abs() < EPS);
    }

    #[test]
    fn test_proportional_on_measurement() {
        let on_error = unbounded(2.0, 0.3, 0.1);
        let on_measurement = on_error.clone().with_proportional_on_measurement(true);

        let mut a = PidEngine::new();
        let mut b = PidEngine::new();

        for (pv, sp) in [(10.0, 20.0), (12.0, 20.0), (15.0, 25.0)] {
            let sa = a.step(pv, sp, &on_error).unwrap();
            let sb = b.step(pv, sp, &on_measurement).unwrap();

            assert!((sa.contributions.p - 2.0 * (sp - pv)).abs() < EPS);
            assert!((sb.contributions.p + 2.0 * pv).abs() < EPS);
            assert_eq!(sa.contributions.i, sb.contributions.i);
            assert_eq!(sa.contributions.d, sb.contributions.d);
            assert_eq!(sa.contributions.delta_i, sb.contributions.delta_i);
        }
    }

    #[test]
    fn test_integral_grows_without_windup_protection() {
        let config = ControllerConfig::new()
            .with_kp(0.5)
            .with_ki(0.5)
            .with_kd(0.0)
            .with_sample_time(0.1)
            .with_output_limits(-1.0, 1.0)
            .with_windup_protection(false);
        let mut engine = PidEngine::new();

        let mut last = engine.integral();
        for _ in 0..1000 {
            let step = engine.step(0.0, 10.0, &config).unwrap();
            assert!(engine.integral() > last, "integral must keep growing");
            assert!(step.contributions.delta_i > 0.0);
            last = engine.integral();
        }
        assert!((last - 500.0).abs() < 1e-6);
        assert!(engine.last_output().unwrap() > 1.0, "output is not clamped");
    }

    #[test]
    fn test_windup_protection_keeps_output_in_limits() {
        let config = ControllerConfig::new()
            .with_kp(3.0)
            .with_ki(5.0)
            .with_kd(1.0)
            .with_sample_time(0.5)
            .with_output_limits(-2.0, 7.0);
        let mut engine = PidEngine::new();

        let mut pv = 0.0;
        for i in 0..500 {
            // Large alternating swings with long saturated stretches
            let setpoint = if (i / 50) % 2 == 0 { 1e6 } else { -1e6 };
            let step = engine.step(pv, setpoint, &config).unwrap();
            assert!(
                (-2.0..=7.0).contains(&step.output),
                "output {} escaped the limits at iteration {}",
                step.output,
                i
            );
            pv += (i % 7) as f64 - 3.0;
        }
    }

    #[test]
    fn test_windup_protection_one_sided_limit() {
        let config = unbounded(1.0, 1.0, 0.0).with_limits(Limits {
            min: None,
            max: Some(5.0),
        });
        let mut engine = PidEngine::new();

        for _ in 0..100 {
            let step = engine.step(0.0, 100.0, &config).unwrap();
            assert!(step.output <= 5.0);
        }
        // Above the limit P alone saturates, so integration is held at zero
        assert!(engine.integral() <= 0.0);

        for _ in 0..100 {
            let step = engine.step(100.0, -100.0, &config).unwrap();
            assert!(step.output < -100.0, "unbounded below");
        }
    }

    #[test]
    fn test_anti_windup_recovery() {
        let with_aw = ControllerConfig::new()
            .with_kp(0.5)
            .with_ki(0.5)
            .with_kd(0.0)
            .with_sample_time(0.1)
            .with_output_limits(-1.0, 1.0)
            .with_windup_protection(true);
        let without_aw = with_aw.clone().with_windup_protection(false);

        let mut engine_with_aw = PidEngine::new();
        let mut engine_without_aw = PidEngine::new();

        for _ in 0..20 {
            let out = engine_with_aw.step(0.0, 10.0, &with_aw).unwrap().output;
            assert_eq!(out, 1.0, "should saturate at the maximum");
            engine_without_aw.step(0.0, 10.0, &without_aw).unwrap();
        }

        assert!(
            engine_with_aw.integral() < engine_without_aw.integral(),
            "anti-windup should limit integral growth during saturation"
        );

        let recovery_with_aw = engine_with_aw.step(9.5, 10.0, &with_aw).unwrap().output;
        let recovery_without_aw = engine_without_aw
            .step(9.5, 10.0, &without_aw)
            .unwrap()
            .output;
        assert!(recovery_with_aw < 1.0, "should leave saturation immediately");
        assert!(recovery_with_aw < recovery_without_aw);
    }

    #[test]
    fn test_bumpless_transfer() {
        let config = ControllerConfig::new().with_sample_time(1.0);
        let mut engine = PidEngine::new();
        for pv in [30.0, 35.0, 40.0] {
            engine.step(pv, 50.0, &config).unwrap();
        }

        engine.set_auto_mode(false, None).unwrap();
        engine.step(45.0, 50.0, &config).unwrap();

        engine.set_auto_mode(true, Some(3.7)).unwrap();
        assert!(engine.is_auto());
        assert_eq!(engine.last_output(), Some(3.7));

        let step = engine.step(45.0, 50.0, &config).unwrap();
        assert!(
            (step.output - 3.7).abs() < EPS,
            "expected bumpless output 3.7, got {}",
            step.output
        );
        assert_eq!(step.contributions.d, 0.0);
    }

    #[test]
    fn test_bumpless_transfer_without_history() {
        let mut engine = PidEngine::new_manual();
        engine.set_auto_mode(true, Some(2.0)).unwrap();

        let state = engine.state();
        assert!(state.auto_mode);
        assert_eq!(state.integral, 2.0);
        assert_eq!(state.last_output, Some(2.0));
        assert_eq!(state.last_input, None);
    }

    #[test]
    fn test_bumpless_seed_clamped_to_limits() {
        let config = ControllerConfig::new()
            .with_sample_time(1.0)
            .with_output_limits(0.0, 10.0);
        let mut engine = PidEngine::new_manual();
        engine.step(20.0, 25.0, &config).unwrap();

        engine.set_auto_mode(true, Some(50.0)).unwrap();
        assert_eq!(engine.last_output(), Some(10.0));
        let step = engine.step(20.0, 25.0, &config).unwrap();
        assert!((step.output - 10.0).abs() < EPS);
    }

    #[test]
    fn test_manual_mode_freezes_state() {
        let config = ControllerConfig::new().with_sample_time(1.0);
        let mut engine = PidEngine::new();
        engine.step(40.0, 50.0, &config).unwrap();
        engine.step(42.0, 50.0, &config).unwrap();

        engine.set_auto_mode(false, None).unwrap();
        let frozen = engine.state();
        assert!(!frozen.auto_mode);

        for pv in [10.0, 60.0, 44.0] {
            let step = engine.step(pv, 50.0, &config).unwrap();
            assert!((step.contributions.p - (50.0 - pv)).abs() < EPS);
            let expected_d = -0.05 * (pv - 42.0);
            assert!((step.contributions.d - expected_d).abs() < EPS);
        }
        assert_eq!(engine.state(), frozen);

        // Resuming without a seed continues from the frozen memory
        engine.set_auto_mode(true, None).unwrap();
        let resumed = engine.state();
        assert_eq!(resumed.integral, frozen.integral);
        assert_eq!(resumed.last_input, frozen.last_input);
        assert!(resumed.auto_mode);
    }

    #[test]
    fn test_set_auto_mode_is_idempotent() {
        let config = ControllerConfig::new().with_sample_time(1.0);
        let mut engine = PidEngine::new();
        engine.step(40.0, 50.0, &config).unwrap();
        let before = engine.state();

        engine.set_auto_mode(true, Some(99.0)).unwrap();
        assert_eq!(engine.state(), before, "seed ignored when already auto");

        engine.set_auto_mode(false, None).unwrap();
        let manual = engine.state();
        engine.set_auto_mode(false, Some(1.0)).unwrap();
        assert_eq!(engine.state(), manual);
    }

    #[test]
    fn test_seed_validation() {
        let mut engine = PidEngine::new_manual();
        assert!(engine.set_auto_mode(true, Some(f64::NAN)).is_err());
        assert!(!engine.is_auto());
        assert!(engine.set_output(f64::INFINITY).is_err());
        assert!(!engine.is_auto());
    }

    #[test]
    fn test_reset_matches_fresh_engine() {
        let config = ControllerConfig::new()
            .with_sample_time(0.5)
            .with_output_limits(-100.0, 100.0);
        let mut engine = PidEngine::new();
        for i in 0..50 {
            engine.step(i as f64, 25.0, &config).unwrap();
        }

        engine.reset();
        let state = engine.state();
        assert_eq!(state.integral, 0.0);
        assert_eq!(state.last_input, None);
        assert_eq!(state.last_output, None);
        assert!(state.auto_mode);

        let mut fresh = PidEngine::new();
        for (pv, sp) in [(12.0, 25.0), (14.5, 25.0), (20.0, 30.0)] {
            assert_eq!(
                engine.step(pv, sp, &config).unwrap(),
                fresh.step(pv, sp, &config).unwrap()
            );
        }
    }

    #[test]
    fn test_reset_keeps_mode() {
        let mut engine = PidEngine::new_manual();
        engine.reset();
        assert!(!engine.is_auto());
    }

    #[test]
    fn test_invalid_parameters_leave_state_untouched() {
        let good = ControllerConfig::new().with_sample_time(1.0);
        let mut engine = PidEngine::new();
        engine.step(40.0, 50.0, &good).unwrap();
        let before = engine.state();

        let bad_configs = [
            good.clone().with_sample_time(0.0),
            good.clone().with_sample_time(-1.0),
            good.clone().with_output_limits(5.0, -5.0),
            good.clone().with_kp(-1.0),
            good.clone().with_ki(f64::NAN),
        ];
        for config in &bad_configs {
            assert!(matches!(
                engine.step(41.0, 50.0, config),
                Err(PidError::InvalidParameter(_))
            ));
            assert_eq!(engine.state(), before);
        }

        assert!(engine.step(f64::NAN, 50.0, &good).is_err());
        assert!(engine.step(40.0, f64::INFINITY, &good).is_err());
        assert_eq!(engine.state(), before);
    }

    #[test]
    fn test_reverse_direction() {
        let config = unbounded(0.0, 0.0, 0.0).with_tunings(Tunings::new(-2.0, 0.0, 0.0).reversed());
        let mut engine = PidEngine::new();

        // error = 5, Kp = -2 -> output -10
        let step = engine.step(-5.0, 0.0, &config).unwrap();
        assert_eq!(step.output, -10.0);

        let direct_with_negative = unbounded(-2.0, 0.0, 0.0);
        assert!(engine.step(-5.0, 0.0, &direct_with_negative).is_err());
    }

    #[test]
    fn test_set_output_after_saturation() {
        let config = ControllerConfig::new()
            .with_sample_time(1.0)
            .with_output_limits(0.0, 100.0);
        let mut engine = PidEngine::new();
        for _ in 0..100 {
            engine.step(0.0, 500.0, &config).unwrap();
        }
        engine.set_auto_mode(false, None).unwrap();
        engine.step(20.0, 25.0, &config).unwrap();

        engine.set_output(4.0).unwrap();
        assert!(engine.is_auto());
        assert_eq!(engine.last_output(), Some(4.0));

        let step = engine.step(20.0, 25.0, &config).unwrap();
        assert!((step.output - 4.0).abs() < EPS);
    }

    #[test]
    fn test_closed_loop_converges() {
        let config = ControllerConfig::new()
            .with_kp(2.0)
            .with_ki(0.5)
            .with_kd(0.05)
            .with_sample_time(0.1)
            .with_output_limits(-100.0, 100.0);
        let mut engine = PidEngine::new();

        let mut process_value = 0.0;
        for _ in 0..200 {
            let step = engine.step(process_value, 10.0, &config).unwrap();

            // Integrating plant
            process_value += step.output * config.sample_time * 0.1;

            if process_value > 9.0 && process_value < 11.0 {
                break;
            }
        }

        assert!((process_value - 10.0).abs() < 1.0);
    }

    #[test]
    fn test_thread_safe_engine() {
        let config = ControllerConfig::new()
            .with_kp(1.0)
            .with_ki(0.1)
            .with_kd(0.0)
            .with_sample_time(0.01)
            .with_output_limits(-10.0, 10.0);

        let engine = ThreadSafePidEngine::new();
        let thread_engine = engine.clone();
        let thread_config = config.clone();

        let handle = thread::spawn(move || {
            for i in 0..100 {
                let process_value = i as f64 * 0.1;
                match thread_engine.step(process_value, 10.0, &thread_config) {
                    Ok(step) => assert!((-10.0..=10.0).contains(&step.output)),
                    Err(e) => panic!("Failed to step: {:?}", e),
                }
            }
        });

        for _ in 0..10 {
            let state = engine.state().expect("Failed to read state");
            assert!(state.auto_mode);
        }

        handle.join().unwrap();

        let state = engine.state().unwrap();
        assert!(state.integral > 0.0);
        assert_eq!(state.last_input, Some(99.0 * 0.1));

        engine.set_output(2.5).unwrap();
        assert_eq!(engine.last_output().unwrap(), Some(2.5));
        engine.reset().unwrap();
        assert_eq!(engine.last_output().unwrap(), None);
    }

    #[test]
    fn test_seed_without_history_is_not_bumpless() {
        let config = unbounded(1.0, 0.1, 0.05).with_windup_protection(false);
        let mut engine = PidEngine::new_manual();
        engine.set_auto_mode(true, Some(3.0)).unwrap();

        // integral 3 + Ki*e*dt 1 + P 10
        let step = engine.step(40.0, 50.0, &config).unwrap();
        assert!((step.output - 14.0).abs() < EPS);
    }

    #[test]
    fn test_thread_safe_bumpless_transfer() {
        let config = ControllerConfig::new().with_sample_time(1.0);
        let engine = ThreadSafePidEngine::new();
        engine.step(40.0, 50.0, &config).unwrap();

        engine.set_auto_mode(false, None).unwrap();
        assert!(!engine.state().unwrap().auto_mode);
        engine.step(44.0, 50.0, &config).unwrap();

        let operator = engine.clone();
        thread::spawn(move || operator.set_auto_mode(true, Some(6.5)))
            .join()
            .unwrap()
            .unwrap();

        assert_eq!(engine.last_output().unwrap(), Some(6.5));
        let step = engine.step(44.0, 50.0, &config).unwrap();
        assert!((step.output - 6.5).abs() < EPS);
    }

    #[test]
    fn test_thread_safe_engine_reports_poisoned_lock() {
        let config = ControllerConfig::new().with_sample_time(1.0);
        let engine = ThreadSafePidEngine::new();

        let inner = Arc::clone(&engine.engine);
        let result = thread::spawn(move || {
            let _guard = inner.lock().unwrap();
            panic!("panic while holding the engine lock");
        })
        .join();
        assert!(result.is_err());

        assert_eq!(
            engine.step(1.0, 2.0, &config),
            Err(PidError::MutexPoisoned)
        );
        assert_eq!(
            engine.set_auto_mode(false, None),
            Err(PidError::MutexPoisoned)
        );
        assert_eq!(engine.set_output(1.0), Err(PidError::MutexPoisoned));
        assert_eq!(engine.reset(), Err(PidError::MutexPoisoned));
        assert_eq!(engine.state(), Err(PidError::MutexPoisoned));
        assert_eq!(engine.last_output(), Err(PidError::MutexPoisoned));
    }

    #[cfg(feature = "debugging")]
    #[test]
    fn test_manual_steps_are_streamed_with_mode() {
        use crate::debug::ControllerDebugger;
        use std::sync::mpsc::channel;

        let config = ControllerConfig::new().with_sample_time(1.0);
        let (tx, rx) = channel();
        let mut engine = PidEngine::new();
        engine.debugger = Some(ControllerDebugger::with_channel(DebugConfig::default(), tx));

        engine.step(40.0, 50.0, &config).unwrap();
        engine.set_auto_mode(false, None).unwrap();
        engine.step(41.0, 50.0, &config).unwrap();

        let modes: Vec<bool> = rx.try_iter().map(|record| record.auto_mode).collect();
        assert_eq!(modes, vec![true, false]);
    }
}
