//! Connection supervisor.
//!
//! Listens on the configured local socket. Every accepted connection gets its
//! own session task and the loop immediately goes back to accepting, so any
//! number of clients can be connected at once; all sessions share one
//! [`ServerState`].

use std::sync::Arc;

use interprocess::local_socket::tokio::{prelude::*, Listener};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, info_span, warn, Instrument};

use crate::ipc::transport;
use crate::server::session;
use crate::server::ServerState;
use crate::Result;

/// Spawn the flag server task.
///
/// The task stops accepting when `ct` is cancelled and returns once every
/// session has finished.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_flag_server(
    state: Arc<ServerState>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = state.config.ipc_name.clone();
    let listener = transport::bind(&name)?;

    info!(ipc_name = %name, "flag server listening");

    let span = info_span!("flag_server", name = %name);
    Ok(tokio::spawn(serve(listener, state, ct).instrument(span)))
}

async fn serve(listener: Listener, state: Arc<ServerState>, ct: CancellationToken) {
    let sessions = TaskTracker::new();

    loop {
        tokio::select! {
            () = ct.cancelled() => {
                info!("flag server shutting down");
                break;
            }
            accept_result = listener.accept() => {
                match accept_result {
                    Ok(stream) => {
                        sessions.spawn(session::handle_connection(
                            stream,
                            Arc::clone(&state),
                            ct.child_token(),
                        ));
                    }
                    Err(err) => {
                        warn!(%err, "ipc accept failed");
                    }
                }
            }
        }
    }

    sessions.close();
    sessions.wait().await;
    info!(flags = state.flags.len(), "flag server stopped");
}
