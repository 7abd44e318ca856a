//! RealtimeGateway: live WebSocket connections, per-user and
//! per-conversation destinations, and the bus consumer feeding them.

pub mod events;
pub mod forwarder;
pub mod gateway;
pub mod handler;
