//! Route handlers. Ticket lifecycle and dashboard computation live in other
//! services; these endpoints answer with what the gate resolved.

pub mod admin;
pub mod dashboard;
pub mod health;
pub mod metrics;
pub mod session;
pub mod tickets;
pub mod users;
