//! Request middleware applied to every route.
//!
//! Layer order, outermost first: request id logging, correlation id, API version deprecation.

pub mod correlation;
pub mod deprecation;
pub mod request_id;

pub use correlation::{correlation_id_middleware, current_correlation_id};
pub use deprecation::deprecation_middleware;
pub use request_id::request_id_middleware;
