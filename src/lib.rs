//! Market-intelligence backend: regime classification, model lifecycle
//! and drift governance, forecast-outcome tracking, and the REST surface
//! that exposes them.

pub mod cache;
pub mod calibration;
pub mod config;
pub mod direction;
pub mod drift;
pub mod feed;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod monitor;
pub mod regime;
pub mod registry;
pub mod sizing;
pub mod store;
