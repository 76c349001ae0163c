//! Outbound scheduling.
mod drr;

pub use drr::*;
