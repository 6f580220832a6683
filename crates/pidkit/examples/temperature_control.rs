use pidkit::{ControllerConfig, PidEngine, RelayAutoTuner, StartMode};

/// This example regulates a simulated room heated by an HVAC unit.
///
/// The run has three phases:
/// - A relay experiment: full heating/cooling around the setpoint drives the
///   room into a limit cycle, and the recorded trace is autotuned
/// - Automatic control with the tuned gains, including a disturbance
/// - An operator takes over in manual mode and hands back bumplessly
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let setpoint = 22.0;
    let dt = 1.0;
    let mut room = Room::new(18.0, 15.0);

    println!("HVAC Temperature Control Simulation");
    println!("===================================");
    println!("Target temperature: {:.1}°C", setpoint);
    println!("Starting temperature: {:.1}°C", room.temperature);
    println!();

    // Phase 1: relay experiment
    let relay_amplitude = 60.0;
    let mut trace = Vec::new();
    for t in 0..900 {
        let relay = if room.temperature < setpoint {
            relay_amplitude
        } else {
            -relay_amplitude
        };
        room.advance(relay, dt);
        // Skip the initial approach to the setpoint
        if t >= 300 {
            trace.push(room.temperature);
        }
    }

    let tuned = match RelayAutoTuner::tune(&trace, dt, relay_amplitude) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Autotune failed: {}", e);
            return;
        }
    };
    println!(
        "Autotuned gains: kp={:.3} ki={:.4} kd={:.3}",
        tuned.kp, tuned.ki, tuned.kd
    );
    println!();

    // Phase 2: automatic control
    let config = ControllerConfig::new()
        .with_tunings(tuned)
        .with_sample_time(dt)
        .with_output_limits(-100.0, 100.0)
        .with_windup_protection(true);

    let mut engine = PidEngine::new();

    println!("Time(s) | Temperature(°C) | Output(%) |     P     |     I     |     D");
    println!("--------|-----------------|-----------|-----------|-----------|----------");

    for time in 0..240 {
        if time == 120 {
            room.temperature -= 2.0;
            println!(">>> Window opened! Temperature dropped 2°C");
        }

        let step = match engine.step(room.temperature, setpoint, &config) {
            Ok(step) => step,
            Err(e) => {
                eprintln!("PID step rejected: {}", e);
                return;
            }
        };
        room.advance(step.output, dt);

        if time % 10 == 0 {
            println!(
                "{:7} | {:15.2} | {:9.1} | {:9.2} | {:9.2} | {:9.2}",
                time,
                room.temperature,
                step.output,
                step.contributions.p,
                step.contributions.i,
                step.contributions.d
            );
        }
    }

    // Phase 3: manual override, then resume from the last known output
    let last_known = engine.last_output();
    if let Err(e) = engine.set_auto_mode(false, None) {
        eprintln!("Failed to switch to manual: {}", e);
        return;
    }
    println!("\n>>> Operator takes over at 20% heating");
    for _ in 0..30 {
        if let Err(e) = engine.step(room.temperature, setpoint, &config) {
            eprintln!("PID step rejected: {}", e);
            return;
        }
        room.advance(20.0, dt);
    }

    let seed = StartMode::LastKnownValue.resolve(last_known, None);
    if let Err(e) = engine.set_auto_mode(true, Some(seed)) {
        eprintln!("Failed to resume automatic mode: {}", e);
        return;
    }
    println!(">>> Back to automatic, seeded with {:.1}%", seed);

    for time in 0..60 {
        match engine.step(room.temperature, setpoint, &config) {
            Ok(step) => {
                room.advance(step.output, dt);
                if time % 10 == 0 {
                    println!(
                        "{:7} | {:15.2} | {:9.1}",
                        time, room.temperature, step.output
                    );
                }
            }
            Err(e) => {
                eprintln!("PID step rejected: {}", e);
                return;
            }
        }
    }

    println!("\nFinal temperature: {:.2}°C", room.temperature);
}

/// First-order thermal model with a short transport delay.
struct Room {
    temperature: f64,
    ambient: f64,
    pending: [f64; 5],
}

impl Room {
    fn new(temperature: f64, ambient: f64) -> Self {
        Room {
            temperature,
            ambient,
            pending: [0.0; 5],
        }
    }

    /// Apply `output` (-100% cooling .. 100% heating) for `dt` seconds.
    fn advance(&mut self, output: f64, dt: f64) {
        let thermal_mass = 500.0;
        let hvac_power = 400.0;
        let loss = 2.0;

        let delayed = self.pending[0];
        self.pending.rotate_left(1);
        self.pending[4] = output;

        let power = hvac_power * delayed / 100.0;
        let heat_loss = loss * (self.temperature - self.ambient);
        self.temperature += (power - heat_loss) * dt / thermal_mass;
    }
}
