pub mod core;
pub mod error;
pub mod geo;
pub(crate) mod math;
