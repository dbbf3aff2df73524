//! Client session for the flag server.
//!
//! A [`FlagClient`] owns one framed connection and runs two background tasks:
//!
//! - the reader, which parses every inbound frame, resolves the matching
//!   pending request, and queues `NOTIFY` pushes;
//! - the dispatcher, which drains the notification queue in arrival order
//!   and invokes the callback registered for the flag. It runs on the
//!   blocking pool and the queue is unbounded, so a slow callback delays
//!   later callbacks but never the routing of responses.
//!
//! Any number of callers may issue requests concurrently over the same
//! client. Each call waits for its own correlated response for at most the
//! configured request timeout.

pub mod pending;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::client::pending::{PendingRequests, Registration, Reply};
use crate::config::GlobalConfig;
use crate::ipc::channel::{decode_text, FrameReader, FrameSender, FramedChannel};
use crate::ipc::transport;
use crate::protocol::{Command, Request, Response};
use crate::{AppError, Result};

/// Callback invoked with `(flag, new_value)` for each change notification.
pub type FlagHandler = Arc<dyn Fn(&str, u8) + Send + Sync>;

/// State shared between the client handle and its background tasks.
struct Shared {
    pending: PendingRequests,
    handlers: RwLock<HashMap<String, FlagHandler>>,
    connected: AtomicBool,
}

impl Shared {
    fn handler_for(&self, flag: &str) -> Option<FlagHandler> {
        self.handlers.read().get(flag).cloned()
    }
}

/// Client connection to a flag server.
pub struct FlagClient {
    shared: Arc<Shared>,
    sender: FrameSender,
    request_timeout: Duration,
    writer: JoinHandle<Result<()>>,
    reader: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
    cancel: CancellationToken,
    _cancel_on_drop: DropGuard,
}

impl std::fmt::Debug for FlagClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagClient")
            .field("connected", &self.is_connected())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl FlagClient {
    /// Connect to the server listening on `config.ipc_name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotConnected` if no server is listening and
    /// `AppError::Ipc` if the name is invalid.
    pub async fn connect(config: &GlobalConfig) -> Result<Self> {
        let stream = transport::connect(&config.ipc_name).await?;
        info!(ipc_name = %config.ipc_name, "connected to flag server");
        Ok(Self::from_stream(stream, config))
    }

    /// Run the client protocol over an already connected stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_stream<S>(stream: S, config: &GlobalConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let FramedChannel {
            reader,
            sender,
            writer,
        } = FramedChannel::open(stream, config);

        let shared = Arc::new(Shared {
            pending: PendingRequests::new(),
            handlers: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(true),
        });
        let cancel = CancellationToken::new();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(
            run_reader(reader, Arc::clone(&shared), notify_tx, cancel.clone())
                .instrument(info_span!("flag_client_reader")),
        );
        let dispatcher = {
            let shared = Arc::clone(&shared);
            let cancel = cancel.clone();
            let span = info_span!("flag_client_dispatch");
            tokio::task::spawn_blocking(move || {
                span.in_scope(|| run_dispatcher(notify_rx, &shared, &cancel));
            })
        };

        Self {
            shared,
            sender,
            request_timeout: config.request_timeout(),
            writer,
            reader,
            dispatcher,
            _cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
        }
    }

    /// Whether the connection is still usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    /// Create `name` with `value`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Command` if the flag already exists, plus the
    /// common request errors (see [`FlagClient::send_request`]).
    pub async fn set_flag(&self, name: &str, value: u8) -> Result<()> {
        let payload = self.send_request(Command::Set, name, Some(value)).await?;
        expect_payload(Command::Set, &payload, &format!("{name}:{value}"))
    }

    /// Read the current value of `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Command` if the flag does not exist, plus the
    /// common request errors.
    pub async fn get_flag_value(&self, name: &str) -> Result<u8> {
        let payload = self.send_request(Command::Get, name, None).await?;
        payload
            .rsplit_once(':')
            .and_then(|(flag, raw)| (flag == name).then_some(raw))
            .and_then(|raw| raw.parse::<u8>().ok())
            .ok_or_else(|| {
                AppError::Protocol(format!("unexpected GET payload '{payload}' for flag {name}"))
            })
    }

    /// Create or overwrite `name`; subscribers are notified.
    ///
    /// # Errors
    ///
    /// Returns the common request errors.
    pub async fn change_flag(&self, name: &str, value: u8) -> Result<()> {
        let payload = self
            .send_request(Command::Change, name, Some(value))
            .await?;
        expect_payload(Command::Change, &payload, &format!("{name}:{value}"))
    }

    /// Delete `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Command` if the flag does not exist, plus the
    /// common request errors.
    pub async fn remove_flag(&self, name: &str) -> Result<()> {
        let payload = self.send_request(Command::Remove, name, None).await?;
        expect_payload(Command::Remove, &payload, name)
    }

    /// Subscribe to changes of `name` and route them to `callback`.
    ///
    /// The callback is registered before the request is sent, so a
    /// notification that follows the confirmation closely is not missed. It
    /// replaces any callback previously registered for `name`; if the
    /// subscription fails, the previous callback is restored. Callbacks run
    /// one at a time on the client's dispatch thread.
    ///
    /// # Errors
    ///
    /// Returns the common request errors.
    pub async fn subscribe_flag<F>(&self, name: &str, callback: F) -> Result<()>
    where
        F: Fn(&str, u8) + Send + Sync + 'static,
    {
        let previous = self
            .shared
            .handlers
            .write()
            .insert(name.to_owned(), Arc::new(callback));

        let confirmed = self
            .send_request(Command::Sub, name, None)
            .await
            .and_then(|payload| expect_payload(Command::Sub, &payload, name));

        if let Err(err) = confirmed {
            let mut handlers = self.shared.handlers.write();
            match previous {
                Some(previous) => {
                    handlers.insert(name.to_owned(), previous);
                }
                None => {
                    handlers.remove(name);
                }
            }
            return Err(err);
        }

        debug!(flag = %name, replaced = previous.is_some(), "flag handler registered");
        Ok(())
    }

    /// Cancel the subscription to `name` and drop its callback.
    ///
    /// # Errors
    ///
    /// Returns the common request errors.
    pub async fn unsubscribe_flag(&self, name: &str) -> Result<()> {
        let payload = self.send_request(Command::Unsub, name, None).await?;
        expect_payload(Command::Unsub, &payload, name)?;

        if self.shared.handlers.write().remove(name).is_none() {
            debug!(flag = %name, "unsubscribed from a flag without a local handler");
        }
        Ok(())
    }

    /// Send one request and wait for its correlated response.
    ///
    /// Returns the `SUCCESS` payload: `flag:value` for `GET`/`SET`/`CHANGE`,
    /// `flag` otherwise. The pending entry is always removed before
    /// returning, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` for an invalid flag name or value combination.
    /// - `AppError::NotConnected` if the connection is closed or drops while
    ///   waiting.
    /// - `AppError::Timeout` if no response arrives in time.
    /// - `AppError::Command` carrying the server's `ERROR` message.
    /// - `AppError::Ipc` if an identical request superseded this one.
    pub async fn send_request(
        &self,
        command: Command,
        name: &str,
        value: Option<u8>,
    ) -> Result<String> {
        if !self.is_connected() {
            return Err(AppError::NotConnected(format!(
                "cannot send {command} for flag {name}, the channel is closed"
            )));
        }

        let request = Request::new(command, name, value)?;
        let registration = self
            .shared
            .pending
            .register((command, request.correlation_token()))
            .await;
        let key = registration.key.clone();
        let ticket = registration.ticket;

        let outcome = self.await_reply(&request, registration).await;

        self.shared.pending.release(&key, ticket).await;
        outcome
    }

    async fn await_reply(&self, request: &Request, registration: Registration) -> Result<String> {
        let command = request.command;
        let flag = request.flag.as_str();

        // The reader may have cleared the table just before we registered.
        if !self.is_connected() {
            return Err(AppError::NotConnected(format!(
                "connection lost before {command} for flag {flag} was sent"
            )));
        }

        self.sender.send_text(&request.encode()).await?;

        match tokio::time::timeout(self.request_timeout, registration.rx).await {
            Ok(Ok(Reply::Success(payload))) => Ok(payload),
            Ok(Ok(Reply::Failure(message))) => Err(AppError::Command(message)),
            Ok(Ok(Reply::Superseded)) => Err(AppError::Ipc(format!(
                "{command} request for flag {flag} was superseded by an identical request"
            ))),
            Ok(Err(_)) => Err(AppError::NotConnected(format!(
                "connection closed while waiting for {command} on flag {flag}"
            ))),
            Err(_elapsed) => {
                warn!(
                    command = %command,
                    flag,
                    timeout_ms = u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX),
                    "request timed out"
                );
                Err(AppError::Timeout(format!(
                    "no response to {command} for flag {flag} within {:?}",
                    self.request_timeout
                )))
            }
        }
    }

    /// Close the connection.
    ///
    /// Queued frames are flushed and the write half is shut down before the
    /// background tasks are stopped. Outstanding requests fail with
    /// `AppError::NotConnected`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if flushing or shutting down the stream fails.
    pub async fn close(self) -> Result<()> {
        let Self {
            shared,
            sender,
            writer,
            reader,
            dispatcher,
            cancel,
            _cancel_on_drop,
            ..
        } = self;

        shared.connected.store(false, Ordering::Release);
        drop(sender);

        let flushed = match writer.await {
            Ok(result) => result,
            Err(err) => Err(AppError::Ipc(format!("writer task failed: {err}"))),
        };

        cancel.cancel();
        if let Err(err) = reader.await {
            warn!(%err, "reader task failed");
        }
        if let Err(err) = dispatcher.await {
            warn!(%err, "dispatch task failed");
        }

        info!("flag client closed");
        flushed
    }
}

fn expect_payload(command: Command, payload: &str, expected: &str) -> Result<()> {
    if payload == expected {
        Ok(())
    } else {
        Err(AppError::Protocol(format!(
            "unexpected {command} payload '{payload}', expected '{expected}'"
        )))
    }
}

/// Reader task: resolves pending requests and queues notifications.
///
/// On exit the client is marked disconnected and every outstanding request
/// fails.
async fn run_reader<R>(
    mut reader: FrameReader<ReadHalf<R>>,
    shared: Arc<Shared>,
    notify_tx: mpsc::UnboundedSender<(String, u8)>,
    cancel: CancellationToken,
) where
    R: AsyncRead,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("reader cancelled");
                break;
            }

            frame = reader.read_frame() => {
                match frame {
                    Ok(Some(frame)) => match decode_text(&frame) {
                        Ok(line) => route_inbound(&line, &shared, &notify_tx).await,
                        Err(err) => warn!(%err, "dropping undecodable frame"),
                    },
                    Ok(None) => {
                        info!("server closed the channel");
                        break;
                    }
                    Err(err) => {
                        warn!(%err, "channel read failed");
                        break;
                    }
                }
            }
        }
    }

    shared.connected.store(false, Ordering::Release);
    let failed = shared.pending.fail_all().await;
    if failed > 0 {
        debug!(failed, "outstanding requests failed on disconnect");
    }
}

/// Handle one inbound message line.
async fn route_inbound(
    line: &str,
    shared: &Shared,
    notify_tx: &mpsc::UnboundedSender<(String, u8)>,
) {
    let response = match Response::parse(line) {
        Ok(response) => response,
        Err(err) => {
            warn!(%err, message = %line, "dropping unparseable message");
            return;
        }
    };

    match response {
        Response::Notify { flag, value } => {
            if notify_tx.send((flag, value)).is_err() {
                debug!("notification dispatcher stopped");
            }
        }
        Response::Success {
            command,
            flag,
            value: Some(value),
        } => {
            let payload = format!("{flag}:{value}");
            let resolved = shared
                .pending
                .resolve(&(command, flag.clone()), Reply::Success(payload.clone()))
                .await
                || shared
                    .pending
                    .resolve(&(command, payload.clone()), Reply::Success(payload))
                    .await;
            if !resolved {
                warn!(command = %command, flag = %flag, "no pending request for response");
            }
        }
        Response::Success {
            command,
            flag,
            value: None,
        } => {
            let resolved = shared
                .pending
                .resolve(&(command, flag.clone()), Reply::Success(flag.clone()))
                .await;
            if !resolved {
                warn!(command = %command, flag = %flag, "no pending request for response");
            }
        }
        Response::Error {
            command,
            flag,
            reason,
        } => {
            let resolved = shared
                .pending
                .resolve(&(command, flag.clone()), Reply::Failure(reason.clone()))
                .await
                || shared
                    .pending
                    .resolve_for_flag(command, &flag, Reply::Failure(reason.clone()))
                    .await;
            if !resolved {
                warn!(command = %command, flag = %flag, %reason, "no pending request for error");
            }
        }
        Response::Rejected { reason } => {
            warn!(%reason, "server rejected a request");
        }
    }
}

/// Dispatch loop: invokes flag callbacks in notification order.
///
/// Runs on a blocking-pool thread. Stops once the reader drops the queue or
/// the client is closed; notifications still queued at that point are
/// discarded.
fn run_dispatcher(
    mut notify_rx: mpsc::UnboundedReceiver<(String, u8)>,
    shared: &Shared,
    cancel: &CancellationToken,
) {
    while let Some((flag, value)) = notify_rx.blocking_recv() {
        if cancel.is_cancelled() {
            break;
        }
        match shared.handler_for(&flag) {
            Some(handler) => handler(&flag, value),
            None => debug!(flag = %flag, value, "notification without a registered handler"),
        }
    }
    debug!("notification dispatch stopped");
}
