//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SignalDelivery`: durable, at-least-once handoff of signals to the queue

mod delivery;

pub use delivery::{DeliveryError, EnqueueReceipt, SignalDelivery};
