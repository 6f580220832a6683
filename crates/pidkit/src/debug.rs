// pidkit: PID control core with bumpless transfer and relay autotuning
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::str::FromStr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use iggy::client::{Client, UserClient};
use iggy::clients::client::IggyClient;
use iggy::messages::send_messages::{Message, Partitioning};
use iggy::utils::duration::IggyDuration;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::engine::StepOutput;

/// Configuration for streaming engine steps to iggy
#[derive(Debug, Clone)]
pub struct DebugConfig {
    /// Address of the iggy server
    pub iggy_url: String,
    pub username: String,
    pub password: String,
    /// Stream name for debugging data
    pub stream_name: String,
    /// Topic name for this controller's data
    pub topic_name: String,
    /// Unique ID for this controller instance
    pub controller_id: String,
    /// Optional sampling rate (in Hz) for debug data
    pub sample_rate_hz: Option<f64>,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            iggy_url: "127.0.0.1:8090".to_string(),
            username: "iggy".to_string(),
            password: "iggy".to_string(),
            stream_name: "pidkit_debug".to_string(),
            topic_name: "controller_data".to_string(),
            controller_id: "pid_controller".to_string(),
            sample_rate_hz: None,
        }
    }
}

/// One step as published to the debug stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerDebugData {
    /// Milliseconds since UNIX epoch
    pub timestamp: u128,
    pub controller_id: String,
    pub error: f64,
    pub output: f64,
    pub p_term: f64,
    pub i_term: f64,
    pub d_term: f64,
    pub delta_i: f64,
    pub auto_mode: bool,
}

/// Forwards step records to a background publisher thread.
pub struct ControllerDebugger {
    config: DebugConfig,
    tx: Sender<ControllerDebugData>,
    last_sample: Option<Instant>,
    sample_interval: Option<Duration>,
}

impl ControllerDebugger {
    /// Start the publisher thread for `config`.
    pub fn new(config: DebugConfig) -> Self {
        let (tx, rx) = channel();

        let thread_config = config.clone();
        thread::spawn(move || publish(thread_config, rx));

        Self::with_channel(config, tx)
    }

    pub(crate) fn with_channel(config: DebugConfig, tx: Sender<ControllerDebugData>) -> Self {
        let sample_interval = sample_interval(config.sample_rate_hz);
        if config.sample_rate_hz.is_some() && sample_interval.is_none() {
            warn!(
                "ignoring unusable debug sample rate {:?}, streaming every step",
                config.sample_rate_hz
            );
        }

        Self {
            config,
            tx,
            last_sample: None,
            sample_interval,
        }
    }

    /// Queue one step record, honouring the sampling rate.
    pub fn log_step(&mut self, error: f64, step: &StepOutput, auto_mode: bool) {
        if let Some(interval) = self.sample_interval {
            let now = Instant::now();
            if let Some(last) = self.last_sample {
                if now.duration_since(last) < interval {
                    return;
                }
            }
            self.last_sample = Some(now);
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let data = ControllerDebugData {
            timestamp,
            controller_id: self.config.controller_id.clone(),
            error,
            output: step.output,
            p_term: step.contributions.p,
            i_term: step.contributions.i,
            d_term: step.contributions.d,
            delta_i: step.contributions.delta_i,
            auto_mode,
        };

        if let Err(e) = self.tx.send(data) {
            warn!("failed to queue debug data: {}", e);
        }
    }
}

/// Spacing between records for a rate in Hz. Rates that are not positive or
/// whose period does not fit a `Duration` disable throttling.
fn sample_interval(rate_hz: Option<f64>) -> Option<Duration> {
    rate_hz
        .filter(|hz| hz.is_finite() && *hz > 0.0)
        .and_then(|hz| Duration::try_from_secs_f64(1.0 / hz).ok())
}

fn open_log_file(controller_id: &str) -> Option<File> {
    let filename = format!("{}_debug.log", controller_id);
    match OpenOptions::new().create(true).append(true).open(&filename) {
        Ok(file) => {
            info!("debug data for '{}' is logged to {}", controller_id, filename);
            Some(file)
        }
        Err(e) => {
            warn!("cannot open debug log {}: {}", filename, e);
            None
        }
    }
}

fn publish(config: DebugConfig, rx: Receiver<ControllerDebugData>) {
    let mut log_file = open_log_file(&config.controller_id);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            warn!("failed to create tokio runtime for debug stream: {}", e);
            return;
        }
    };

    let connection_string = format!(
        "iggy://{}:{}@{}",
        config.username, config.password, config.iggy_url
    );

    let producer = runtime.block_on(async {
        let client = match IggyClient::from_connection_string(&connection_string) {
            Ok(client) => client,
            Err(e) => {
                warn!("invalid iggy connection for {}: {}", config.iggy_url, e);
                return None;
            }
        };
        if let Err(e) = client.connect().await {
            warn!("failed to connect to iggy at {}: {}", config.iggy_url, e);
            return None;
        }
        if let Err(e) = client.login_user(&config.username, &config.password).await {
            warn!("iggy login failed: {}", e);
            return None;
        }

        let send_interval = match IggyDuration::from_str("1ms") {
            Ok(interval) => interval,
            Err(e) => {
                warn!("invalid iggy send interval: {}", e);
                return None;
            }
        };
        let mut producer = match client.producer(&config.stream_name, &config.topic_name) {
            Ok(builder) => builder
                .batch_size(1000)
                .send_interval(send_interval)
                .partitioning(Partitioning::balanced())
                .build(),
            Err(e) => {
                warn!("failed to create iggy producer: {}", e);
                return None;
            }
        };
        if let Err(e) = producer.init().await {
            warn!("failed to initialise iggy producer: {}", e);
            return None;
        }

        info!(
            "debug stream ready: stream '{}', topic '{}'",
            config.stream_name, config.topic_name
        );
        Some(producer)
    });

    if producer.is_none() {
        info!("falling back to file logging only");
    }

    while let Ok(data) = rx.recv() {
        let payload = match serde_json::to_vec(&data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("cannot serialize debug data: {}", e);
                continue;
            }
        };

        if let Some(file) = log_file.as_mut() {
            let written = file
                .write_all(&payload)
                .and_then(|_| file.write_all(b"\n"));
            if let Err(e) = written {
                warn!("error writing debug log: {}", e);
            }
        }

        if let Some(producer) = &producer {
            let message = Message::new(None, payload.into(), None);
            if let Err(e) = runtime.block_on(producer.send(vec![message])) {
                warn!("failed to send debug data to iggy: {}", e);
            }
        } else {
            debug!("debug record at {} ms", data.timestamp);
        }
    }
}
