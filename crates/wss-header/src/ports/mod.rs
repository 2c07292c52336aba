//! # Ports Layer
//!
//! Trait definitions for the hexagonal architecture.
//! - **Inbound (Driving)**: API that message dispatchers use
//! - **Outbound (Driven)**: Capabilities the engines need

pub mod inbound;
pub mod outbound;
