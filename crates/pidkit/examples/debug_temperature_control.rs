use pidkit::{ControllerConfig, DebugConfig, PidEngine};
use std::thread::sleep;
use std::time::Duration;

/// Temperature loop that streams every step to an iggy server.
///
/// Start an iggy server on 127.0.0.1:8090 first; without one the records
/// only go to `temperature_controller_debug.log`.
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ControllerConfig::new()
        .with_kp(2.0)
        .with_ki(0.1)
        .with_kd(0.5)
        .with_sample_time(0.1)
        .with_output_limits(-100.0, 100.0)
        .with_windup_protection(true);

    let debug_config = DebugConfig {
        controller_id: "temperature_controller".to_string(),
        sample_rate_hz: Some(10.0),
        ..DebugConfig::default()
    };
    let mut engine = PidEngine::new().with_debugging(debug_config);

    let setpoint = 22.0;
    let ambient = 15.0;
    let mut temperature = 18.0;

    for tick in 0..600 {
        let step = match engine.step(temperature, setpoint, &config) {
            Ok(step) => step,
            Err(e) => {
                eprintln!("PID step rejected: {}", e);
                return;
            }
        };

        let heat = 0.08 * step.output;
        let loss = 0.1 * (temperature - ambient);
        temperature += (heat - loss) * config.sample_time;

        if tick == 300 {
            temperature -= 2.0;
            println!(">>> Window opened! Temperature dropped 2°C");
        }
        if tick % 20 == 0 {
            println!(
                "t={:5.1}s temperature={:5.2}°C output={:+6.1}",
                tick as f64 * config.sample_time,
                temperature,
                step.output
            );
        }

        sleep(Duration::from_millis(100));
    }

    // Give the publisher thread time to flush
    sleep(Duration::from_secs(1));
}
