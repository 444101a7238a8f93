//! # Ping Response Engine
//!
//! Everything between "an event arrived" and "a reply went out":
//!
//! - [`telemetry`] - correlates link samples and raw frames with the next message
//! - [`classify`] - decides whether text is an info request, a ping, or noise
//! - [`rate_limit`] - per-sender sliding window
//! - [`reply`] - compact pong formatting
//! - [`watchdog`] - connection state transitions
//! - [`dispatcher`] - the event loop that owns all of the above

pub mod classify;
pub mod dispatcher;
pub mod rate_limit;
pub mod reply;
pub mod telemetry;
pub mod watchdog;

pub use dispatcher::{Dispatcher, InboundRequest, ReplyError, ReplyTarget};
