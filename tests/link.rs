use std::future::{self, Pending, Ready};
use std::net::UdpSocket;
use std::time::{Duration, Instant};

use trap_relay::config::{BridgeConfig, NodeConfig};
use trap_relay::gateway::bridge::{Broker, ConnectionState, Counters, FrameOutcome, GatewayBridge, Publish};
use trap_relay::gateway::radio::RadioLink;
use trap_relay::gateway::service;
use trap_relay::link::UdpRadio;
use trap_relay::message::{EventMessage, EventType};
use trap_relay::node::scheduler::{Board, Phase, PowerScheduler, WakeReason, WakeSources};
use trap_relay::node::state::RETAINED_LEN;
use trap_relay::node::transport::NodeTransport;
use trap_relay::node::Tick;

#[derive(Debug, Default)]
struct RecordingBroker {
    connected: bool,
    published: Vec<Publish>,
}

impl Broker for RecordingBroker {
    type Error = String;
    type Connect = Ready<Result<(), String>>;

    fn connect(&mut self) -> Self::Connect {
        self.connected = true;
        future::ready(Ok(()))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn publish(&mut self, publish: Publish) -> Result<(), String> {
        self.published.push(publish);
        Ok(())
    }
}

/// Broker whose connection attempts never finish.
#[derive(Debug, Default)]
struct UnreachableBroker {
    connect_calls: u32,
}

impl Broker for UnreachableBroker {
    type Error = String;
    type Connect = Pending<Result<(), String>>;

    fn connect(&mut self) -> Self::Connect {
        self.connect_calls += 1;
        future::pending()
    }

    fn is_connected(&self) -> bool {
        false
    }

    async fn publish(&mut self, _publish: Publish) -> Result<(), String> {
        Err("not connected".to_string())
    }
}

/// Board whose line never moves and whose suspension returns immediately.
#[derive(Debug, Default)]
struct IdleBoard {
    now: Tick,
    armed: Option<WakeSources>,
    suspended: u32,
}

impl Board for IdleBoard {
    fn now(&self) -> Tick {
        self.now
    }

    fn sensor_closed(&mut self) -> bool {
        false
    }

    fn battery_voltage(&mut self) -> f32 {
        3.7
    }

    fn delay_ms(&mut self, ms: Tick) {
        self.now = self.now.wrapping_add(ms);
    }

    fn store_retained(&mut self, _block: &[u8; RETAINED_LEN]) {}

    fn load_retained(&mut self) -> Option<[u8; RETAINED_LEN]> {
        None
    }

    fn arm_wake_sources(&mut self, sources: WakeSources) {
        self.armed = Some(sources);
    }

    fn suspend(&mut self) -> WakeReason {
        self.suspended += 1;
        WakeReason::Timer
    }
}

fn node_radio(gateway: std::net::SocketAddr) -> UdpRadio {
    let mut radio = UdpRadio::bind("127.0.0.1:0").unwrap();
    radio.register_peer(gateway);
    radio
}

#[tokio::test]
async fn trigger_travels_from_node_to_broker_topic() {
    let link = RadioLink::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let gateway = link.local_addr().unwrap();
    let now = Instant::now();
    let mut bridge = GatewayBridge::new(RecordingBroker::default(), BridgeConfig::default(), now);
    bridge.maintain_connection(now).await;

    let message = EventMessage::new(1, EventType::Trigger, 5, 3.85, 42);
    let mut transport = NodeTransport::new(node_radio(gateway), gateway, Duration::from_secs(2));
    let sending = tokio::task::spawn_blocking(move || transport.send(&message));

    let frame = link.recv().await.unwrap();
    let outcome = bridge.handle_frame(&frame.bytes, &frame.source.to_string(), Instant::now()).await;

    assert!(sending.await.unwrap(), "node should see the link ack");
    assert_eq!(outcome, FrameOutcome::Forwarded);

    let published = &bridge.broker().published;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "trap/1/trigger");
    let body: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
    assert_eq!(body["trap_count"], 5);
    assert_eq!(body["source_address"], frame.source.to_string());
}

#[tokio::test]
async fn frames_heard_while_disconnected_are_not_published() {
    let link = RadioLink::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let gateway = link.local_addr().unwrap();
    let mut bridge = GatewayBridge::new(RecordingBroker::default(), BridgeConfig::default(), Instant::now());

    let message = EventMessage::new(1, EventType::Trigger, 5, 3.85, 42);
    let mut transport = NodeTransport::new(node_radio(gateway), gateway, Duration::from_secs(2));
    let sending = tokio::task::spawn_blocking(move || transport.send(&message));

    let frame = link.recv().await.unwrap();
    let outcome = bridge.handle_frame(&frame.bytes, &frame.source.to_string(), Instant::now()).await;

    // The link ack does not depend on the broker.
    assert!(sending.await.unwrap());
    assert_eq!(outcome, FrameOutcome::Dropped);
    assert!(bridge.broker().published.is_empty());
    assert_eq!(bridge.counters().messages_received, 1);
    assert_eq!(bridge.counters().messages_forwarded, 0);
}

#[tokio::test]
async fn nodes_are_acknowledged_while_the_broker_connect_hangs() {
    let link = RadioLink::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let gateway = link.local_addr().unwrap();
    let mut bridge = GatewayBridge::new(UnreachableBroker::default(), BridgeConfig::default(), Instant::now());

    let message = EventMessage::new(3, EventType::Trigger, 1, 3.8, 7);
    let mut transport = NodeTransport::new(node_radio(gateway), gateway, Duration::from_millis(1000));
    let sending = tokio::task::spawn_blocking(move || transport.send(&message));

    let mut delivered = None;
    service::serve(&link, &mut bridge, Duration::from_secs(60), async {
        delivered = Some(sending.await.unwrap());
        // Let supervision have started its attempt.
        tokio::time::sleep(Duration::from_millis(50)).await;
    })
    .await;

    assert_eq!(delivered, Some(true), "node should see the link ack");
    assert_eq!(bridge.state(), ConnectionState::Connecting);
    assert_eq!(bridge.broker().connect_calls, 1);
    assert_eq!(
        bridge.counters(),
        Counters {
            messages_received: 1,
            messages_forwarded: 0,
            messages_dropped: 1,
        }
    );
}

#[test]
fn unanswered_send_gives_up_after_the_bounded_wait() {
    let silent_gateway = UdpSocket::bind("127.0.0.1:0").unwrap();
    let gateway = silent_gateway.local_addr().unwrap();
    let timeout = Duration::from_millis(300);
    let mut transport = NodeTransport::new(node_radio(gateway), gateway, timeout);

    let started = Instant::now();
    let delivered = transport.send(&EventMessage::new(2, EventType::Status, 0, 3.9, 0));
    let elapsed = started.elapsed();

    assert!(!delivered);
    assert!(elapsed >= timeout, "returned early after {elapsed:?}");
    assert!(elapsed < timeout + Duration::from_millis(700), "overran the wait: {elapsed:?}");
}

#[test]
fn node_sleeps_after_an_unanswered_send() {
    let silent_gateway = UdpSocket::bind("127.0.0.1:0").unwrap();
    let gateway = silent_gateway.local_addr().unwrap();
    let mut config = NodeConfig::new(2, gateway);
    config.send_timeout = Duration::from_millis(200);

    let transport = NodeTransport::new(node_radio(gateway), gateway, config.send_timeout);
    let mut node = PowerScheduler::new(IdleBoard::default(), transport, config);

    let report = node.cycle(WakeReason::PowerOn);
    assert!(!report.sent.unwrap().delivered);
    assert!(node.board().armed.is_some());

    assert_eq!(node.sleep(), WakeReason::Timer);
    assert_eq!(node.phase(), Phase::Sleeping);
    assert_eq!(node.board().suspended, 1);
}
