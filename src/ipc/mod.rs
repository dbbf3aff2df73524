//! Local IPC layer.
//!
//! - `codec`: 4-byte little-endian length-prefixed framing.
//! - `channel`: read half + single-writer task over any duplex stream.
//! - `transport`: named pipe (Windows) or Unix domain socket (Linux/macOS)
//!   endpoints from the `interprocess` crate.

pub mod channel;
pub mod codec;
pub mod transport;
