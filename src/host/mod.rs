//! Host-facing contracts and the stdio bridge for frontend integration.

pub mod channel;
pub mod contract;
pub mod handler;
pub mod stdio;
pub mod worker;
