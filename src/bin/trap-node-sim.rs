//! A trap node simulated on the host.
//!
//! Drives the real scheduler with a board whose sensor line is operated from
//! stdin and whose radio is the UDP link to a running gateway:
//!
//! ```text
//! snap            close the trap
//! reset           open the trap again
//! battery 3.1     set the battery voltage
//! ```

use std::io::BufRead;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;
use trap_relay::config::NodeConfig;
use trap_relay::link::UdpRadio;
use trap_relay::node::scheduler::{Board, PowerScheduler, WakeReason, WakeSources};
use trap_relay::node::state::RETAINED_LEN;
use trap_relay::node::transport::NodeTransport;
use trap_relay::node::Tick;

const INITIAL_MILLIVOLTS: u32 = 3_900;
const MAX_VOLTS: f32 = 6.0;

/// Sensor line and battery shared with the stdin thread.
#[derive(Debug, Default)]
struct Inputs {
    closed: AtomicBool,
    millivolts: AtomicU32,
}

struct SimBoard {
    started: Instant,
    inputs: Arc<Inputs>,
    edges: Receiver<()>,
    armed: Option<WakeSources>,
    fallback_timer: Duration,
    retained: Option<[u8; RETAINED_LEN]>,
}

impl Board for SimBoard {
    fn now(&self) -> Tick {
        self.started.elapsed().as_millis() as Tick
    }

    fn sensor_closed(&mut self) -> bool {
        self.inputs.closed.load(Ordering::SeqCst)
    }

    fn battery_voltage(&mut self) -> f32 {
        self.inputs.millivolts.load(Ordering::SeqCst) as f32 / 1000.0
    }

    fn delay_ms(&mut self, ms: Tick) {
        thread::sleep(Duration::from_millis(ms.into()));
    }

    fn store_retained(&mut self, block: &[u8; RETAINED_LEN]) {
        self.retained = Some(*block);
    }

    fn load_retained(&mut self) -> Option<[u8; RETAINED_LEN]> {
        self.retained
    }

    fn arm_wake_sources(&mut self, sources: WakeSources) {
        self.armed = Some(sources);
    }

    fn suspend(&mut self) -> WakeReason {
        let (timer, wake_on_closed) = match self.armed.take() {
            Some(sources) => (sources.timer, Some(sources.sensor_wake_on_closed)),
            None => (self.fallback_timer, None),
        };
        let deadline = Instant::now() + timer;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.edges.recv_timeout(remaining) {
                Ok(()) => {
                    let closed = self.inputs.closed.load(Ordering::SeqCst);
                    if wake_on_closed.map_or(false, |level| level == closed) {
                        return WakeReason::SensorEdge;
                    }
                }
                Err(RecvTimeoutError::Timeout) => return WakeReason::Timer,
                Err(RecvTimeoutError::Disconnected) => {
                    thread::sleep(remaining);
                    return WakeReason::Timer;
                }
            }
        }
    }
}

/// Operate the simulated hardware from stdin lines.
fn read_commands(inputs: Arc<Inputs>, edges: Sender<()>) {
    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("snap"), _) => {
                inputs.closed.store(true, Ordering::SeqCst);
                let _ = edges.send(());
            }
            (Some("reset"), _) => {
                inputs.closed.store(false, Ordering::SeqCst);
                let _ = edges.send(());
            }
            (Some("battery"), Some(volts)) => match millivolts(volts) {
                Ok(mv) => inputs.millivolts.store(mv, Ordering::SeqCst),
                Err(e) => tracing::warn!(volts, error = %e, "bad voltage"),
            },
            (None, _) => {}
            _ => tracing::warn!(%line, "unknown command, expected snap, reset or battery <volts>"),
        }
    }
}

/// Parse a battery voltage typed on stdin.
fn millivolts(volts: &str) -> Result<u32, String> {
    let volts: f32 = volts.parse().map_err(|e: std::num::ParseFloatError| e.to_string())?;
    if !(0.0..=MAX_VOLTS).contains(&volts) {
        return Err(format!("expected 0 to {MAX_VOLTS} V"));
    }
    Ok((volts * 1000.0).round() as u32)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run() {
        tracing::error!(error = %e, "node stopped");
    }
    ExitCode::FAILURE
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = NodeConfig::from_env()?;
    tracing::info!(?config, "starting simulated trap node");

    let mut radio = UdpRadio::bind("0.0.0.0:0")?;
    radio.register_peer(config.gateway_addr);
    let transport = NodeTransport::new(radio, config.gateway_addr, config.send_timeout);

    let inputs = Arc::new(Inputs {
        millivolts: AtomicU32::new(INITIAL_MILLIVOLTS),
        ..Inputs::default()
    });
    let (edges_tx, edges_rx) = mpsc::channel();
    let stdin_inputs = Arc::clone(&inputs);
    thread::spawn(move || read_commands(stdin_inputs, edges_tx));

    let board = SimBoard {
        started: Instant::now(),
        inputs,
        edges: edges_rx,
        armed: None,
        fallback_timer: config.sleep_interval,
        retained: None,
    };

    PowerScheduler::new(board, transport, config).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battery_command_takes_volts() {
        assert_eq!(millivolts("3.1"), Ok(3_100));
        assert_eq!(millivolts("0"), Ok(0));
    }

    #[test]
    fn implausible_voltages_are_refused() {
        for bad in ["-1", "NaN", "inf", "7.5", "three"] {
            assert!(millivolts(bad).is_err(), "{bad} accepted");
        }
    }
}
