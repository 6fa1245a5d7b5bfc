//! Saga coordinator for router provisioning.
//!
//! Requests carrying a service's routers are persisted as an aggregate,
//! dispatched to workers over the bus, and folded back as workers report
//! outcomes until the whole set reaches a terminal state.

pub mod bus;
pub mod config;
pub mod core;
pub mod handler;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod service;
pub mod store;
