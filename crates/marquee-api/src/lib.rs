// marquee-api: Async Rust client for the Marquee signage backend (HTTP + push channel)

mod auth;
mod commands;
mod status;

pub mod client;
pub mod error;
pub mod models;
pub mod push;
pub mod transport;

pub use client::SignageClient;
pub use error::Error;
pub use models::{
    Command, CommandKind, CommandStatus, DeviceStatus, IssuedCredentials, PairingCodeGrant,
    PairingPoll, PairingStatus,
};
pub use push::{PushChannel, PushState, ReconnectConfig};
