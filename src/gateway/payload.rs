//! JSON payloads published to the broker.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::message::EventMessage;

/// A node event as republished by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPayload<'a> {
    pub node_id: u8,
    pub event_type: u8,
    pub event_type_str: &'static str,
    pub trap_count: u32,
    pub battery_voltage: f32,
    pub hop_count: u8,
    pub node_timestamp: u32,
    /// Unix milliseconds at which the gateway received the frame.
    pub gateway_receipt_time: i64,
    /// Radio address of the sending node.
    pub source_address: &'a str,
}

impl<'a> EventPayload<'a> {
    pub fn new(message: &EventMessage, received_at: DateTime<Utc>, source_address: &'a str) -> Self {
        EventPayload {
            node_id: message.node_id,
            event_type: message.event_type.code(),
            event_type_str: message.event_type.name(),
            trap_count: message.trap_count,
            battery_voltage: message.battery_voltage,
            hop_count: message.hop_count,
            node_timestamp: message.node_timestamp,
            gateway_receipt_time: received_at.timestamp_millis(),
            source_address,
        }
    }
}

/// Periodic gateway heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivenessPayload {
    pub status: &'static str,
    /// Seconds since the bridge started.
    pub uptime: u64,
    pub signal_quality: Option<i32>,
    pub messages_received: u64,
    pub messages_forwarded: u64,
    /// Bytes of memory available to the gateway, if the platform reports it.
    pub free_memory: Option<u64>,
}

/// Available memory as reported by `/proc/meminfo`.
pub fn free_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_available(&meminfo)
}

fn parse_mem_available(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|line| line.starts_with("MemAvailable:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::message::EventType;

    #[test]
    fn event_payload_carries_every_field() {
        let message = EventMessage::new(1, EventType::Trigger, 5, 3.5, 77_000);
        let received_at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();

        let value = serde_json::to_value(EventPayload::new(&message, received_at, "10.0.0.7:50123")).unwrap();

        assert_eq!(
            value,
            json!({
                "node_id": 1,
                "event_type": 1,
                "event_type_str": "trigger",
                "trap_count": 5,
                "battery_voltage": 3.5,
                "hop_count": 0,
                "node_timestamp": 77_000,
                "gateway_receipt_time": 1_700_000_000_123i64,
                "source_address": "10.0.0.7:50123",
            })
        );
    }

    #[test]
    fn liveness_payload_serializes_unknowns_as_null() {
        let payload = LivenessPayload {
            status: "online",
            uptime: 120,
            signal_quality: None,
            messages_received: 4,
            messages_forwarded: 3,
            free_memory: None,
        };

        assert_eq!(
            serde_json::to_value(payload).unwrap(),
            json!({
                "status": "online",
                "uptime": 120,
                "signal_quality": null,
                "messages_received": 4,
                "messages_forwarded": 3,
                "free_memory": null,
            })
        );
    }

    #[test]
    fn mem_available_is_read_in_bytes() {
        let meminfo = "MemTotal:       16318480 kB\nMemFree:         1021336 kB\nMemAvailable:    8123456 kB\n";
        assert_eq!(parse_mem_available(meminfo), Some(8_123_456 * 1024));
        assert_eq!(parse_mem_available("MemTotal: 1 kB\n"), None);
    }
}
