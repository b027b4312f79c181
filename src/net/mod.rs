//! TCP transport: the accepting server and the typed client.

pub mod client;
pub mod server;

pub use client::RemoteSession;
pub use server::StreamServer;
