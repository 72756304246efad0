//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the stream session interacts with its consumers.

/// Port interfaces for event sinks and session control.
pub mod ports;

/// Application services for routing and session startup.
pub mod services;
