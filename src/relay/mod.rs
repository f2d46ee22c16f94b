//! Relay: the HTTP store-and-forward point between capturing and playing
//! devices

pub mod handlers;
pub mod server;
pub mod store;

pub use server::{RelayHandle, RelayServer};
pub use store::{RelayStats, RelayStore};
