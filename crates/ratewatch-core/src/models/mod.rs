//! Data models for RateWatch

pub mod alert;
pub mod series;

pub use alert::*;
pub use series::*;
