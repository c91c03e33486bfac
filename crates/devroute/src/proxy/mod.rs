//! Routing pipeline: contract validation, then the forward to the backend.

pub mod forward;
pub mod route;
