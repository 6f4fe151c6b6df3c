//! # Trap Relay
//!
//! Trap Relay carries trap events from battery powered sensor nodes to a
//! gateway, which republishes every [`message::EventMessage`] to an MQTT
//! broker for the monitoring system.
//!
//! The [`node`] side detects and reports triggers while spending most of
//! its life suspended; the [`gateway`] side bridges radio frames to the
//! broker and keeps that connection alive.

pub mod config;
pub mod gateway;
pub mod link;
pub mod message;
pub mod node;
