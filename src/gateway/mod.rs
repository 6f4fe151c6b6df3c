//! Gateway: receives node frames and republishes them to the broker.

pub mod bridge;
pub mod mq;
pub mod payload;
pub mod radio;
pub mod service;
