#![forbid(unsafe_code)]

//! Shared byte-valued flags over a framed local IPC channel.
//!
//! A server process hosts named flags (`name -> u8`). Clients connect over a
//! named pipe or Unix domain socket, issue correlated
//! `GET`/`SET`/`CHANGE`/`REMOVE`/`SUB`/`UNSUB` requests, and receive `NOTIFY`
//! pushes for the flags they subscribe to.

pub mod client;
pub mod config;
pub mod errors;
pub mod ipc;
pub mod protocol;
pub mod server;
pub mod store;

pub use client::FlagClient;
pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use server::ServerState;
