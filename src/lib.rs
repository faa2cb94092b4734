// Domain errors
pub mod error;

// Spatial utilities, geocoding and navigation links
pub mod geo;

// Request records and storage
pub mod request;

// Agent presence and position
pub mod agent;

// Claiming pending requests
pub mod assignment;

// Mission lifecycle transitions
pub mod mission;

// Periodic location sampling
pub mod tracking;

// Change events and notifications
pub mod notify;

// Composition root and metrics
pub mod engine;

// Configuration
pub mod config;

// Snapshot persistence and recovery
pub mod snapshot;

// HTTP and WebSocket APIs
pub mod api;

// Subscription management
pub mod subscription;

pub use engine::DispatchEngine;
pub use error::{DispatchError, DispatchResult};
