// Library root for the server binary: configuration and the WebSocket
// transport, exposed so integration tests can drive them.

pub mod config;
pub mod ws_server;
