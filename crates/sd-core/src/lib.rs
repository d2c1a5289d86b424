//! sd-core: stable foundation for simdrive.
//!
//! Contains:
//! - numeric (Real + tolerances + float helpers)
//! - ids (stable compact event IDs)
//! - error (shared error types)

pub mod error;
pub mod ids;
pub mod numeric;

// Re-exports: nice ergonomics for downstream crates
pub use error::{CoreError, CoreResult};
pub use ids::*;
pub use numeric::*;
