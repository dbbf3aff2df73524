//! Local socket endpoints.
//!
//! Names are resolved in the generic namespace: a named pipe on Windows and
//! an abstract (Linux) or `/tmp`-backed (other Unix) domain socket elsewhere.

use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
use interprocess::local_socket::{GenericNamespaced, ListenerOptions, Name};

use crate::{AppError, Result};

/// Resolve `ipc_name` to a namespaced socket name.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the name is not valid on this platform.
pub fn socket_name(ipc_name: &str) -> Result<Name<'static>> {
    ipc_name
        .to_owned()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{ipc_name}': {err}")))
}

/// Create a listener for `ipc_name`.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the name is invalid or already in use.
pub fn bind(ipc_name: &str) -> Result<Listener> {
    ListenerOptions::new()
        .name(socket_name(ipc_name)?)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))
}

/// Connect to the listener registered under `ipc_name`.
///
/// # Errors
///
/// Returns `AppError::NotConnected` if no server is listening.
pub async fn connect(ipc_name: &str) -> Result<Stream> {
    let name = socket_name(ipc_name)?;
    Stream::connect(name).await.map_err(|err| {
        AppError::NotConnected(format!("cannot connect to ipc socket '{ipc_name}': {err}"))
    })
}
