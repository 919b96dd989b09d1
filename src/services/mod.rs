//! Service layer: the session engine and the WebSocket gateway.

pub mod engine;
pub mod gateway;
