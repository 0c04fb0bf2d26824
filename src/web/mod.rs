//! HTTP surface for conflict data and risk scores.

pub mod conflicts;
pub mod error;
pub mod routes;
pub mod status;

pub use routes::*;
