//! Server side of one client connection.
//!
//! Reads request frames, applies them to the shared [`ServerState`], queues
//! the response, and fans `NOTIFY` pushes out to subscribers after a
//! `CHANGE`.
//!
//! | Request            | Success                  | Failure                         |
//! |--------------------|--------------------------|---------------------------------|
//! | `GET:f`            | `SUCCESS:GET:f:v`        | `ERROR:GET:f:flag f not found`  |
//! | `SET:f:v`          | `SUCCESS:SET:f:v`        | `ERROR:SET:f:flag f already exists` |
//! | `CHANGE:f:v`       | `SUCCESS:CHANGE:f:v`     | value missing or invalid        |
//! | `REMOVE:f`         | `SUCCESS:REMOVE:f`       | `ERROR:REMOVE:f:flag f not found` |
//! | `SUB:f`            | `SUCCESS:SUB:f`          | never                           |
//! | `UNSUB:f`          | `SUCCESS:UNSUB:f`        | never                           |
//! | anything else      |                          | `ERROR:<reason>`                |
//!
//! `REMOVE` does not notify subscribers: the value no longer exists and the
//! `NOTIFY` payload is always a byte value.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::ipc::channel::{decode_text, FramedChannel};
use crate::protocol::{Command, Request, Response};
use crate::server::ServerState;
use crate::store::subscriptions::ConnectionHandle;
use crate::{AppError, Result};

/// How long a closing session waits for its queued frames to be written.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of applying one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Reply for the requesting connection.
    pub response: Response,
    /// `(flag, value)` to push to subscribers, if the request changed a flag.
    pub notify: Option<(String, u8)>,
}

impl Outcome {
    fn reply(response: Response) -> Self {
        Self {
            response,
            notify: None,
        }
    }
}

/// Parse and apply one request line on behalf of `connection`.
#[must_use]
pub fn handle_line(line: &str, connection: &ConnectionHandle, state: &ServerState) -> Outcome {
    match Request::parse(line) {
        Ok(request) => execute(&request, connection, state),
        Err(response) => Outcome::reply(response),
    }
}

/// Apply a parsed request to the shared state.
#[must_use]
pub fn execute(request: &Request, connection: &ConnectionHandle, state: &ServerState) -> Outcome {
    let command = request.command;
    let flag = request.flag.as_str();

    let success = |value: Option<u8>| Response::Success {
        command,
        flag: flag.to_owned(),
        value,
    };

    match command {
        Command::Get => match state.flags.get(flag) {
            Some(value) => Outcome::reply(success(Some(value))),
            None => Outcome::reply(Response::error(
                command,
                flag,
                format!("flag {flag} not found"),
            )),
        },
        Command::Set => {
            let Some(value) = request.value else {
                return Outcome::reply(missing_value(command, flag));
            };
            if state.flags.set_if_absent(flag, value) {
                Outcome::reply(success(Some(value)))
            } else {
                Outcome::reply(Response::error(
                    command,
                    flag,
                    format!("flag {flag} already exists"),
                ))
            }
        }
        Command::Change => {
            let Some(value) = request.value else {
                return Outcome::reply(missing_value(command, flag));
            };
            let stored = state.flags.update(flag, value);
            Outcome {
                response: success(Some(stored)),
                notify: Some((flag.to_owned(), stored)),
            }
        }
        Command::Remove => {
            if state.flags.remove(flag) {
                Outcome::reply(success(None))
            } else {
                Outcome::reply(Response::error(
                    command,
                    flag,
                    format!("flag {flag} not found"),
                ))
            }
        }
        Command::Sub => {
            state.subscriptions.subscribe(flag, connection);
            Outcome::reply(success(None))
        }
        Command::Unsub => {
            state.subscriptions.unsubscribe(flag, connection.id());
            Outcome::reply(success(None))
        }
    }
}

fn missing_value(command: Command, flag: &str) -> Response {
    Response::error(
        command,
        flag,
        format!("{command} request for flag {flag} was sent without a value"),
    )
}

/// Push `NOTIFY:flag:value` to every current subscriber of `flag`.
///
/// Never waits on a subscriber's queue. A subscriber whose writer has
/// stopped is dropped from the registry. A subscriber whose queue is full is
/// dropped and its connection is closed, so one client that stops reading
/// cannot stall the session that issued the change.
///
/// Returns the number of connections the notification was queued for.
pub fn fan_out(state: &ServerState, flag: &str, value: u8) -> usize {
    let frame = Response::Notify {
        flag: flag.to_owned(),
        value,
    }
    .encode();

    let mut delivered = 0;
    for subscriber in state.subscriptions.subscribers_of(flag) {
        match subscriber.sender().try_send_text(&frame) {
            Ok(()) => delivered += 1,
            Err(AppError::NotConnected(_)) => {
                debug!(connection = %subscriber.id(), "dropping stale subscriber");
                state.subscriptions.remove_connection(subscriber.id());
            }
            Err(err) => {
                warn!(
                    connection = %subscriber.id(),
                    %err,
                    "subscriber is not keeping up, closing its connection"
                );
                state.subscriptions.remove_connection(subscriber.id());
                subscriber.disconnect();
            }
        }
    }
    delivered
}

/// Serve one client connection until it closes, `ct` is cancelled, or
/// fan-out disconnects it for falling behind.
///
/// On exit the connection is removed from every subscription and its writer
/// is drained and shut down. A writer that cannot drain within one second is
/// aborted, which drops the stream.
pub async fn handle_connection<S>(stream: S, state: Arc<ServerState>, ct: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let id = Uuid::new_v4();
    let span = info_span!("flag_session", connection = %id);
    async move {
        let FramedChannel {
            mut reader,
            sender,
            mut writer,
        } = FramedChannel::open(stream, &state.config);
        let shutdown = ct.child_token();
        let connection = ConnectionHandle::with_shutdown(id, sender, shutdown.clone());
        info!("client connected");

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    debug!("session shut down");
                    break;
                }

                frame = reader.read_frame() => {
                    match frame {
                        Ok(Some(frame)) => {
                            let processed = tokio::select! {
                                biased;
                                () = shutdown.cancelled() => {
                                    debug!("session shut down while replying");
                                    break;
                                }
                                result = process_frame(&frame, &connection, &state) => result,
                            };
                            if let Err(err) = processed {
                                warn!(%err, "failed to queue response, closing session");
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!("peer closed the channel");
                            break;
                        }
                        Err(err) => {
                            warn!(%err, "channel read failed, closing session");
                            break;
                        }
                    }
                }
            }
        }

        let removed = state.subscriptions.remove_connection(id);
        drop(connection);

        match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => debug!(%err, "writer ended with an error"),
            Ok(Err(err)) => warn!(%err, "writer task failed"),
            Err(_elapsed) => {
                warn!("peer is not reading, discarding queued frames");
                writer.abort();
            }
        }

        info!(subscriptions_removed = removed, "client disconnected");
    }
    .instrument(span)
    .await;
}

async fn process_frame(
    frame: &[u8],
    connection: &ConnectionHandle,
    state: &ServerState,
) -> Result<()> {
    let outcome = match decode_text(frame) {
        Ok(line) => {
            debug!(request = %line, "request received");
            handle_line(&line, connection, state)
        }
        Err(err) => {
            warn!(%err, "undecodable request frame");
            Outcome::reply(Response::Rejected {
                reason: "request is not valid utf-8".into(),
            })
        }
    };

    connection
        .sender()
        .send_text(&outcome.response.encode())
        .await?;

    if let Some((flag, value)) = outcome.notify {
        let delivered = fan_out(state, &flag, value);
        debug!(flag = %flag, value, delivered, "change notification fanned out");
    }

    Ok(())
}
