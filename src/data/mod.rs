//! Database models and queries.

pub mod conflicts;
pub mod health;
pub mod normalize;
pub mod risk_cache;
pub mod seed;
