//! Record, value, and ordering vocabulary shared across the crate.

pub mod order;
pub mod record;
pub mod value;
