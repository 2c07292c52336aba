//! # Integration Tests
//!
//! Messages built by `SendEngine`, serialized, and processed by
//! `ReceiveEngine` through the same software provider.

pub mod cardinality;
pub mod derived_keys;
pub mod lax_layouts;
pub mod ordering;
pub mod replay;
pub mod round_trip;
