//! HTTP gateway adapter.
//!
//! Inbound adapter that runs the admission pipeline for the gateway path and
//! hands accepted signals to the delivery service.

mod controller;
mod cors;

pub use controller::{AppState, MAX_BODY_BYTES, REQUEST_ID_HEADER, create_router};
pub use cors::CorsHeaders;
