//! Stateless repositories — every method takes `&Connection`.

pub mod assistant;
pub mod report;
pub mod session;
