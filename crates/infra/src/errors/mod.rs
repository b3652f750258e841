//! Mapping of third-party errors into `QrGenError`

pub mod conversions;

pub use conversions::InfraError;
