//! Type definitions

pub mod customer;
pub mod route;
pub mod vehicle;

pub use customer::*;
pub use route::*;
pub use vehicle::*;
