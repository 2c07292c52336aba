//! # Domain Layer
//!
//! Security header processing with no I/O dependencies.
//! This is the inner layer of the hexagonal architecture.

pub mod derived_keys;
pub mod element_store;
pub mod errors;
pub mod id_generator;
pub mod order_tracker;
pub mod policy;
pub mod receive;
pub mod resolver;
pub mod send;
pub mod token_tracker;
