//! Event message exchanged between a trap node and the gateway.
//!
//! Every frame has the same fixed layout, little-endian, no padding:
//!
//! | offset | field            | type |
//! |--------|------------------|------|
//! | 0      | `node_id`        | u8   |
//! | 1      | `event_type`     | u8   |
//! | 2      | `trap_count`     | u32  |
//! | 6      | `battery_voltage`| f32  |
//! | 10     | `hop_count`      | u8   |
//! | 11     | `node_timestamp` | u32  |
//!
//! A receiver validates a frame by its length alone before decoding anything.

use core::fmt;

/// Total length of an encoded [`EventMessage`].
pub const FRAME_LEN: usize = 15;

/// The type of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Periodic heartbeat from a node.
    Status,
    /// The trap snapped shut.
    Trigger,
    /// Battery voltage fell below the node's threshold.
    LowBattery,
}

impl EventType {
    /// Wire code of the event type.
    pub fn code(self) -> u8 {
        match self {
            EventType::Status => 0,
            EventType::Trigger => 1,
            EventType::LowBattery => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<EventType> {
        match code {
            0 => Some(EventType::Status),
            1 => Some(EventType::Trigger),
            2 => Some(EventType::LowBattery),
            _ => None,
        }
    }

    /// Name used in broker topics and payloads.
    pub fn name(self) -> &'static str {
        match self {
            EventType::Status => "status",
            EventType::Trigger => "trigger",
            EventType::LowBattery => "low_battery",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One reportable occurrence on a node.
///
/// Built, sent and discarded; there are no setters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventMessage {
    pub node_id: u8,
    pub event_type: EventType,
    pub trap_count: u32,
    pub battery_voltage: f32,
    pub hop_count: u8,
    pub node_timestamp: u32,
}

impl EventMessage {
    /// Message originating on the node itself (no relay hops).
    pub fn new(
        node_id: u8,
        event_type: EventType,
        trap_count: u32,
        battery_voltage: f32,
        node_timestamp: u32,
    ) -> Self {
        EventMessage {
            node_id,
            event_type,
            trap_count,
            battery_voltage,
            hop_count: 0,
            node_timestamp,
        }
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = self.node_id;
        frame[1] = self.event_type.code();
        frame[2..6].copy_from_slice(&self.trap_count.to_le_bytes());
        frame[6..10].copy_from_slice(&self.battery_voltage.to_le_bytes());
        frame[10] = self.hop_count;
        frame[11..15].copy_from_slice(&self.node_timestamp.to_le_bytes());
        frame
    }

    /// Decode a received frame.
    ///
    /// The length is checked before any field is read.
    pub fn decode(frame: &[u8]) -> Result<EventMessage, DecodeError> {
        let frame: &[u8; FRAME_LEN] = frame
            .try_into()
            .map_err(|_| DecodeError::Length(frame.len()))?;

        let event_type =
            EventType::from_code(frame[1]).ok_or(DecodeError::EventType(frame[1]))?;

        Ok(EventMessage {
            node_id: frame[0],
            event_type,
            trap_count: u32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]]),
            battery_voltage: f32::from_le_bytes([frame[6], frame[7], frame[8], frame[9]]),
            hop_count: frame[10],
            node_timestamp: u32::from_le_bytes([frame[11], frame[12], frame[13], frame[14]]),
        })
    }

    /// Broker topic for this message under `prefix`.
    pub fn topic(&self, prefix: &str) -> String {
        format!("{}/{}/{}", prefix, self.node_id, self.event_type)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame is {0} bytes, expected {FRAME_LEN}")]
    Length(usize),

    #[error("unknown event type {0}")]
    EventType(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger() -> EventMessage {
        EventMessage::new(1, EventType::Trigger, 5, 3.85, 123_456)
    }

    #[test]
    fn decode_restores_every_field() {
        let sent = EventMessage {
            hop_count: 2,
            ..trigger()
        };
        let received = EventMessage::decode(&sent.encode()).unwrap();
        assert_eq!(received, sent);
    }

    #[test]
    fn layout_is_little_endian_in_field_order() {
        let frame = EventMessage::new(7, EventType::LowBattery, 0x0102_0304, 1.0, 0xAABB_CCDD).encode();
        assert_eq!(frame[0], 7);
        assert_eq!(frame[1], 2);
        assert_eq!(&frame[2..6], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&frame[6..10], &1.0f32.to_le_bytes());
        assert_eq!(frame[10], 0);
        assert_eq!(&frame[11..15], &[0xDD, 0xCC, 0xBB, 0xAA]);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let frame = trigger().encode();
        assert_eq!(EventMessage::decode(&frame[..14]), Err(DecodeError::Length(14)));
        assert_eq!(EventMessage::decode(&[]), Err(DecodeError::Length(0)));

        let mut long = frame.to_vec();
        long.push(0);
        assert_eq!(EventMessage::decode(&long), Err(DecodeError::Length(16)));
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let mut frame = trigger().encode();
        frame[1] = 9;
        assert_eq!(EventMessage::decode(&frame), Err(DecodeError::EventType(9)));
    }

    #[test]
    fn topic_uses_prefix_node_and_type_name() {
        assert_eq!(trigger().topic("trap"), "trap/1/trigger");
        let low = EventMessage::new(12, EventType::LowBattery, 0, 3.1, 0);
        assert_eq!(low.topic("trap"), "trap/12/low_battery");
    }
}
