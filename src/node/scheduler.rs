//! Sleep/wake state machine of a trap node.
//!
//! One wake cycle runs to completion before the next suspension:
//! `Sleeping → Waking → Active → PreparingSleep → Sleeping`. The sensor edge
//! interrupt and the wake timer only end a suspension; the cause is handed
//! to [`PowerScheduler::cycle`] as a [`WakeReason`].

use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

use crate::config::NodeConfig;
use crate::message::{EventMessage, EventType};

use super::debounce::DebounceDetector;
use super::state::{RetainedState, RETAINED_LEN};
use super::transport::{NodeTransport, Radio};
use super::{ticks, Tick};

/// Quiet-line budgets an edge wake may spend on a chattering line.
const MAX_BUDGETS: Tick = 4;

/// Why the node left suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Program start, either cold or with restored retained state.
    PowerOn,
    /// The sensor line changed level.
    SensorEdge,
    /// The sleep timer expired.
    Timer,
}

/// Wake sources armed right before suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeSources {
    /// Wake when the sensor line reads this level (`true` = closed).
    pub sensor_wake_on_closed: bool,
    pub timer: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Sleeping,
    Waking,
    Active,
    PreparingSleep,
}

/// Hardware the scheduler drives.
pub trait Board {
    /// Monotonic milliseconds since power-on, wrapping.
    fn now(&self) -> Tick;

    /// Raw sensor line, `true` when the trap is closed.
    fn sensor_closed(&mut self) -> bool;

    fn battery_voltage(&mut self) -> f32;

    fn delay_ms(&mut self, ms: Tick);

    fn store_retained(&mut self, block: &[u8; RETAINED_LEN]);

    fn load_retained(&mut self) -> Option<[u8; RETAINED_LEN]>;

    fn arm_wake_sources(&mut self, sources: WakeSources);

    /// Suspend until an armed source fires.
    fn suspend(&mut self) -> WakeReason;
}

/// An event sent during a wake cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentEvent {
    pub message: EventMessage,
    pub delivered: bool,
}

/// What one wake cycle did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub reason: WakeReason,
    pub sent: Option<SentEvent>,
}

pub struct PowerScheduler<B: Board, R: Radio> {
    board: B,
    transport: NodeTransport<R>,
    config: NodeConfig,
    state: RetainedState,
    detector: DebounceDetector,
    phase: Phase,
}

impl<B: Board, R: Radio> PowerScheduler<B, R> {
    /// Start the scheduler, restoring retained state if the board kept it.
    pub fn new(mut board: B, transport: NodeTransport<R>, config: NodeConfig) -> Self {
        let state = match board.load_retained().and_then(|block| RetainedState::from_block(&block)) {
            Some(state) => {
                tracing::info!(trap_count = state.trap_count, wake_count = state.wake_count, "retained state restored");
                state
            }
            None => {
                tracing::info!("cold boot, retained state reset");
                RetainedState::cold()
            }
        };

        let detector = DebounceDetector::with_confirmed(
            ticks(config.debounce_window),
            ticks(config.stable_window),
            state.line_closed,
            board.now(),
        );

        PowerScheduler {
            board,
            transport,
            config,
            state,
            detector,
            phase: Phase::Waking,
        }
    }

    /// Run wake cycles forever, starting with the power-on cycle.
    pub fn run(&mut self) -> ! {
        let mut reason = WakeReason::PowerOn;
        loop {
            self.cycle(reason);
            reason = self.sleep();
        }
    }

    /// Suspend with the sources armed by the last cycle.
    pub fn sleep(&mut self) -> WakeReason {
        self.phase = Phase::Sleeping;
        let reason = self.board.suspend();
        tracing::debug!(?reason, "suspension ended");
        reason
    }

    /// One wake cycle: handle `reason`, send at most one message, re-arm.
    ///
    /// Always ends in `PreparingSleep` with both wake sources armed, whatever
    /// happened to the send.
    #[tracing::instrument(skip(self), fields(node_id = self.config.node_id))]
    pub fn cycle(&mut self, reason: WakeReason) -> CycleReport {
        self.phase = Phase::Waking;
        self.state.record_wake();
        tracing::info!(wake_count = self.state.wake_count, "awake");

        self.phase = Phase::Active;
        let message = match reason {
            WakeReason::PowerOn => Some(self.report_status()),
            WakeReason::SensorEdge => self.qualify_trigger(),
            WakeReason::Timer => self.on_timer(),
        };

        let sent = message.map(|message| {
            let delivered = self.transport.send(&message);
            if delivered {
                tracing::info!(event_type = %message.event_type, trap_count = message.trap_count, "event delivered");
            } else {
                // Not retried in a later cycle.
                tracing::warn!(event_type = %message.event_type, "event not delivered");
            }
            SentEvent { message, delivered }
        });

        if sent.is_some() {
            self.board.delay_ms(ticks(self.config.settle_delay));
        }

        self.prepare_sleep();
        CycleReport { reason, sent }
    }

    /// Sample the line through the detector until it qualifies a snap or
    /// stays quiet for the qualification budget.
    ///
    /// The budget runs from the last raw change, so chatter longer than the
    /// debounce window still qualifies once it settles. A pending stability
    /// re-sample is always seen through. A line that never settles is given
    /// up on after [`MAX_BUDGETS`] budgets.
    fn qualify_trigger(&mut self) -> Option<EventMessage> {
        let period = ticks(self.config.sample_period).max(1);
        let budget = ticks(self.config.debounce_window)
            .saturating_add(ticks(self.config.stable_window))
            .saturating_add(period.saturating_mul(2));

        let start = self.board.now();
        let mut quiet_since = start;
        let mut last_closed = None;
        loop {
            let now = self.board.now();
            let closed = self.board.sensor_closed();
            if last_closed.is_some_and(|last| last != closed) {
                quiet_since = now;
            }
            last_closed = Some(closed);

            if self.detector.sample(closed, now) {
                let trap_count = self.state.record_trigger(now);
                tracing::info!(trap_count, "trap triggered");
                return Some(self.build(EventType::Trigger, now));
            }
            if !self.detector.is_confirming() {
                if now.wrapping_sub(quiet_since) >= budget {
                    tracing::debug!(closed, "edge wake did not qualify as a trigger");
                    return None;
                }
                if now.wrapping_sub(start) >= budget.saturating_mul(MAX_BUDGETS) {
                    tracing::warn!(closed, "sensor line never settled");
                    return None;
                }
            }
            self.board.delay_ms(period);
        }
    }

    fn on_timer(&mut self) -> Option<EventMessage> {
        let timer_wakes = self.state.record_timer_wake();
        if timer_wakes % self.config.status_every != 0 {
            tracing::debug!(timer_wakes, "no report due");
            return None;
        }
        Some(self.report_status())
    }

    /// Status message, or low battery when the voltage is under threshold.
    fn report_status(&mut self) -> EventMessage {
        let now = self.board.now();
        let message = self.build(EventType::Status, now);
        if message.battery_voltage < self.config.low_battery_volts {
            tracing::warn!(battery_voltage = message.battery_voltage, "battery low");
            return EventMessage {
                event_type: EventType::LowBattery,
                ..message
            };
        }
        message
    }

    fn build(&mut self, event_type: EventType, now: Tick) -> EventMessage {
        let battery_voltage = self.board.battery_voltage();
        EventMessage::new(self.config.node_id, event_type, self.state.trap_count, battery_voltage, now)
    }

    fn prepare_sleep(&mut self) {
        self.phase = Phase::PreparingSleep;

        // A closure still waiting for its re-sample has not qualified.
        self.state.line_closed = self.detector.is_confirmed_closed() && !self.detector.is_confirming();
        self.board.store_retained(&self.state.to_block());

        // Must stay the last board call before suspension.
        self.board.arm_wake_sources(WakeSources {
            sensor_wake_on_closed: !self.state.line_closed,
            timer: self.config.sleep_interval,
        });
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &RetainedState {
        &self.state
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn transport(&self) -> &NodeTransport<R> {
        &self.transport
    }
}

impl<B: Board, R: Radio> Debug for PowerScheduler<B, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PowerScheduler")
            .field("node_id", &self.config.node_id)
            .field("phase", &self.phase)
            .field("state", &self.state)
            .finish()
    }
}
