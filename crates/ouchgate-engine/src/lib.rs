//! Engine stub: reflects every entry order as an acceptance.
//!
//! Reads the gateway's envelope stream and republishes one accepted
//! envelope per order on the acknowledgement feed, keeping the
//! routing id so the gateway can find the originating client.

pub mod error;
pub mod reflector;
pub mod server;

pub use error::EngineError;
pub use reflector::Reflector;
pub use server::{EngineServer, GatewayConnection};
