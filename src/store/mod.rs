//! Process-wide shared state for the flag server.
//!
//! Both stores are constructed explicitly and shared by `Arc` between every
//! server session; callers never take external locks.

pub mod flags;
pub mod subscriptions;
