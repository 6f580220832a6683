use pidkit::{ControllerConfig, StartMode, ThreadSafePidEngine};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// This example shares one loop between threads.
///
/// - A control thread steps the engine every 100ms
/// - An operator thread switches to manual, holds the output, and then
///   forces a restart from the configured startup value
///
/// The thread-safe handle serializes every call, so a mode change never
/// lands halfway through a step.
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ControllerConfig::new()
        .with_kp(2.0)
        .with_ki(0.5)
        .with_kd(1.0)
        .with_sample_time(0.1)
        .with_output_limits(-100.0, 100.0);

    let engine = ThreadSafePidEngine::new();
    let room = Arc::new(Mutex::new(SimulatedRoom::new(18.0, 15.0)));
    let setpoint = 22.0;

    let control_engine = engine.clone();
    let control_room = Arc::clone(&room);
    let control_thread = thread::spawn(move || {
        for tick in 0..300 {
            let temperature = match control_room.lock() {
                Ok(room) => room.temperature,
                Err(_) => return,
            };

            let auto = control_engine.state().map(|s| s.auto_mode).unwrap_or(false);
            let applied = match control_engine.step(temperature, setpoint, &config) {
                Ok(step) if auto => step.output,
                Ok(_) => 15.0, // operator's manual value
                Err(e) => {
                    eprintln!("CONTROL   | step rejected: {}", e);
                    return;
                }
            };

            if let Ok(mut room) = control_room.lock() {
                room.advance(applied, config.sample_time);
            }

            if tick % 10 == 0 {
                println!(
                    "CONTROL   | t={:5.1}s | {:5.2}°C | output {:+6.1} | {}",
                    tick as f64 * config.sample_time,
                    temperature,
                    applied,
                    if auto { "auto" } else { "manual" }
                );
            }
            thread::sleep(Duration::from_millis(10));
        }
    });

    let operator_engine = engine.clone();
    let operator_thread = thread::spawn(move || {
        thread::sleep(Duration::from_millis(1000));
        println!("OPERATOR  | switching to manual");
        if let Err(e) = operator_engine.set_auto_mode(false, None) {
            eprintln!("OPERATOR  | {}", e);
            return;
        }

        thread::sleep(Duration::from_millis(800));
        let seed = StartMode::StartupValue.resolve(None, Some(25.0));
        println!("OPERATOR  | restarting from startup value {:.1}", seed);
        if let Err(e) = operator_engine.set_output(seed) {
            eprintln!("OPERATOR  | {}", e);
        }
    });

    control_thread.join().expect("control thread panicked");
    operator_thread.join().expect("operator thread panicked");

    if let Ok(state) = engine.state() {
        println!(
            "\nFinal state: integral={:.3} last_output={:?} auto={}",
            state.integral, state.last_output, state.auto_mode
        );
    }
}

struct SimulatedRoom {
    temperature: f64,
    ambient: f64,
}

impl SimulatedRoom {
    fn new(temperature: f64, ambient: f64) -> Self {
        SimulatedRoom {
            temperature,
            ambient,
        }
    }

    fn advance(&mut self, output: f64, dt: f64) {
        let heating = 0.05 * output;
        let loss = 0.1 * (self.temperature - self.ambient);
        self.temperature += (heating - loss) * dt;
    }
}
