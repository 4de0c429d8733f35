//! Shoal common — shared data model for the Shoal discovery engine.
//!
//! Holds the pieces every domain crate agrees on: the DNS-SD name
//! grammar ([`names`]), the service-instance representation and
//! sender-address types ([`types`]), and the validation errors raised
//! at engine entry points ([`error`]).

pub mod error;
pub mod names;
pub mod types;
