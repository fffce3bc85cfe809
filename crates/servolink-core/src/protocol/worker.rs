//! Background link worker
//!
//! Runs a [`ConnectionManager`] on a dedicated OS thread so that UI event
//! handlers never block on the serial port. Requests are processed in FIFO
//! order. Async callers get a bounded wait via [`LinkConfig::op_timeout`].
//!
//! [`LinkConfig::op_timeout`]: crate::config::LinkConfig::op_timeout

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use super::backend::PortDescriptor;
use crate::config::LinkConfig;
use super::connection::{ConnectionManager, ConnectionState};
use super::{codec, ConnectError, DisconnectError, LinkError, SendError};

/// What the worker does with a burst of queued sends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendPolicy {
    /// Every send is written, in order
    #[default]
    SendAll,
    /// Among sends queued back to back, only the newest valid one per channel is written
    LatestWins,
}

/// Outcome of a send that went through the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Bytes were accepted by the serial layer
    Written,
    /// A newer command for the same channel replaced this one before it was written
    Coalesced,
}

type Reply<T> = oneshot::Sender<T>;

struct SendRequest {
    channel_id: String,
    angle: i32,
    speed: i32,
    reply: Option<Reply<Result<Delivery, SendError>>>,
    /// Callers of earlier sends this one replaced
    superseded: Vec<Reply<Result<Delivery, SendError>>>,
}

impl SendRequest {
    fn new(
        channel_id: String,
        angle: i32,
        speed: i32,
        reply: Option<Reply<Result<Delivery, SendError>>>,
    ) -> Self {
        Self {
            channel_id,
            angle,
            speed,
            reply,
            superseded: Vec::new(),
        }
    }

    /// Take over the callers of `older`, which will never be written
    fn absorb(&mut self, older: SendRequest) {
        self.superseded.extend(older.reply);
        self.superseded.extend(older.superseded);
    }

    /// Superseded callers see `Coalesced` if this write lands and its error otherwise
    fn resolve(self, result: Result<Delivery, SendError>) {
        for reply in self.superseded {
            let _ = reply.send(result.clone().map(|_| Delivery::Coalesced));
        }
        if let Some(reply) = self.reply {
            let _ = reply.send(result);
        }
    }
}

enum Request {
    ListPorts(Reply<Vec<PortDescriptor>>),
    Connect(String, Reply<Result<(), ConnectError>>),
    Disconnect(Reply<Result<(), DisconnectError>>),
    Send(SendRequest),
    Shutdown(Reply<()>),
}

/// Spawns the worker thread
pub struct LinkWorker;

impl LinkWorker {
    /// Move `manager` onto a new worker thread and return a handle to it.
    ///
    /// The worker stops on [`LinkHandle::shutdown`] or once every handle is
    /// dropped; either way the port is released.
    pub fn spawn(manager: ConnectionManager) -> io::Result<LinkHandle> {
        let policy = manager.config().send_policy;
        let timeout = manager.config().op_timeout();
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(manager.current_state());

        thread::Builder::new()
            .name("servolink-worker".to_string())
            .spawn(move || run(manager, rx, state_tx, policy))?;

        Ok(LinkHandle {
            tx,
            state: state_rx,
            timeout,
        })
    }
}

fn run(
    manager: ConnectionManager,
    mut rx: mpsc::UnboundedReceiver<Request>,
    state_tx: watch::Sender<ConnectionState>,
    policy: SendPolicy,
) {
    info!(?policy, "Link worker started");

    while let Some(first) = rx.blocking_recv() {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }
        if policy == SendPolicy::LatestWins {
            batch = coalesce(batch, manager.config());
        }

        for request in batch {
            if handle(&manager, &state_tx, request) {
                info!("Link worker stopped");
                return;
            }
        }
    }

    let _ = manager.disconnect();
    state_tx.send_replace(manager.current_state());
    info!("Link worker stopped (all handles dropped)");
}

/// Push the manager's state to subscribers if it changed
fn publish(manager: &ConnectionManager, state_tx: &watch::Sender<ConnectionState>) {
    let current = manager.current_state();
    state_tx.send_if_modified(|state| {
        if *state == current {
            false
        } else {
            *state = current;
            true
        }
    });
}

/// Execute one request. Returns true when the worker should exit.
///
/// The new state is published before the caller is answered, so a caller
/// that awaited the reply always reads the post-operation state.
fn handle(
    manager: &ConnectionManager,
    state_tx: &watch::Sender<ConnectionState>,
    request: Request,
) -> bool {
    match request {
        Request::ListPorts(reply) => {
            let _ = reply.send(manager.list_ports());
        }
        Request::Connect(port, reply) => {
            let result = manager.connect(&port);
            publish(manager, state_tx);
            let _ = reply.send(result);
        }
        Request::Disconnect(reply) => {
            let result = manager.disconnect();
            publish(manager, state_tx);
            let _ = reply.send(result);
        }
        Request::Send(req) => {
            let result = manager
                .send(&req.channel_id, req.angle, req.speed)
                .map(|()| Delivery::Written);
            publish(manager, state_tx);
            req.resolve(result);
        }
        Request::Shutdown(reply) => {
            let _ = manager.disconnect();
            publish(manager, state_tx);
            let _ = reply.send(());
            return true;
        }
    }
    false
}

/// Drop superseded sends from a drained batch.
///
/// Only runs of consecutive sends are considered; a connect, disconnect or
/// any other request ends the run, so nothing queued after a disconnect can
/// replace something queued before it. A command that would be rejected
/// (out of range, or a channel outside `config`) never supersedes. Superseded
/// callers are answered with the outcome of the send that replaced them.
fn coalesce(batch: Vec<Request>, config: &LinkConfig) -> Vec<Request> {
    let mut slots: Vec<Option<Request>> = Vec::with_capacity(batch.len());
    let mut latest: HashMap<String, usize> = HashMap::new();

    for request in batch {
        match request {
            Request::Send(mut req) => {
                let acceptable = codec::encode(&req.channel_id, req.angle, req.speed).is_ok()
                    && config.has_channel(&req.channel_id);
                if !acceptable {
                    slots.push(Some(Request::Send(req)));
                    continue;
                }
                if let Some(idx) = latest.insert(req.channel_id.clone(), slots.len()) {
                    if let Some(Request::Send(old)) = slots[idx].take() {
                        debug!(channel = %old.channel_id, "Coalesced queued servo command");
                        req.absorb(old);
                    }
                }
                slots.push(Some(Request::Send(req)));
            }
            other => {
                latest.clear();
                slots.push(Some(other));
            }
        }
    }

    slots.into_iter().flatten().collect()
}

/// Cloneable handle to a running [`LinkWorker`]
#[derive(Clone)]
pub struct LinkHandle {
    tx: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<ConnectionState>,
    timeout: Duration,
}

impl LinkHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .map_err(|_| LinkError::WorkerStopped)?;

        // On timeout the request stays queued and still runs later
        tokio::time::timeout(self.timeout, rx)
            .await
            .map_err(|_| LinkError::Timeout(self.timeout))?
            .map_err(|_| LinkError::WorkerStopped)
    }

    /// List available serial ports
    pub async fn list_ports(&self) -> Result<Vec<PortDescriptor>, LinkError> {
        self.request(Request::ListPorts).await
    }

    /// Open `port`, releasing any port already open
    pub async fn connect(&self, port: &str) -> Result<(), LinkError> {
        let port = port.to_string();
        self.request(|reply| Request::Connect(port, reply)).await??;
        Ok(())
    }

    /// Release the port
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        self.request(Request::Disconnect).await??;
        Ok(())
    }

    /// Queue a command and wait until the worker has written or coalesced it
    pub async fn send(&self, channel_id: &str, angle: i32, speed: i32) -> Result<Delivery, LinkError> {
        let channel_id = channel_id.to_string();
        let delivery = self
            .request(|reply| {
                Request::Send(SendRequest::new(channel_id, angle, speed, Some(reply)))
            })
            .await??;
        Ok(delivery)
    }

    /// Queue a command without waiting for the outcome.
    ///
    /// Meant for slider callbacks; failures show up through [`Self::subscribe`].
    pub fn try_send(&self, channel_id: &str, angle: i32, speed: i32) -> Result<(), LinkError> {
        self.tx
            .send(Request::Send(SendRequest::new(
                channel_id.to_string(),
                angle,
                speed,
                None,
            )))
            .map_err(|_| LinkError::WorkerStopped)
    }

    /// State as last published by the worker
    pub fn current_state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Watch connection state changes, e.g. for a status indicator
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Release the port and stop the worker
    pub async fn shutdown(&self) -> Result<(), LinkError> {
        self.request(Request::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(channel_id: &str, angle: i32) -> (Request, oneshot::Receiver<Result<Delivery, SendError>>) {
        let (tx, rx) = oneshot::channel();
        let request =
            Request::Send(SendRequest::new(channel_id.to_string(), angle, 5, Some(tx)));
        (request, rx)
    }

    fn resolve_all(batch: Vec<Request>, result: Result<Delivery, SendError>) {
        for request in batch {
            if let Request::Send(req) = request {
                req.resolve(result.clone());
            }
        }
    }

    fn angles(batch: &[Request]) -> Vec<String> {
        batch
            .iter()
            .map(|r| match r {
                Request::Send(s) => format!("{}{}", s.channel_id, s.angle),
                Request::Disconnect(_) => "disconnect".to_string(),
                _ => "other".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_coalesce_keeps_latest_per_channel() {
        let (a1, mut a1_rx) = send("A", 10);
        let (b1, _b1_rx) = send("B", 20);
        let (a2, _a2_rx) = send("A", 30);

        let out = coalesce(vec![a1, b1, a2], &LinkConfig::default());
        assert_eq!(angles(&out), vec!["B20", "A30"]);
        assert!(a1_rx.try_recv().is_err(), "answered before the newer send ran");

        resolve_all(out, Ok(Delivery::Written));
        assert_eq!(a1_rx.try_recv().unwrap(), Ok(Delivery::Coalesced));
    }

    #[test]
    fn test_superseded_send_shares_failure() {
        let (a1, mut a1_rx) = send("A", 10);
        let (a2, mut a2_rx) = send("A", 20);
        let (a3, mut a3_rx) = send("A", 30);

        let out = coalesce(vec![a1, a2, a3], &LinkConfig::default());
        assert_eq!(angles(&out), vec!["A30"]);

        resolve_all(out, Err(SendError::NotConnected));
        for rx in [&mut a1_rx, &mut a2_rx, &mut a3_rx] {
            assert_eq!(rx.try_recv().unwrap(), Err(SendError::NotConnected));
        }
    }

    #[test]
    fn test_unconfigured_channel_does_not_supersede() {
        let (e1, _e1_rx) = send("E", 10);
        let (e2, _e2_rx) = send("E", 20);

        let out = coalesce(vec![e1, e2], &LinkConfig::default());
        assert_eq!(angles(&out), vec!["E10", "E20"]);
    }

    #[test]
    fn test_coalesce_stops_at_disconnect() {
        let (a1, _a1_rx) = send("A", 10);
        let (dtx, _drx) = oneshot::channel();
        let (a2, _a2_rx) = send("A", 30);

        let out = coalesce(vec![a1, Request::Disconnect(dtx), a2], &LinkConfig::default());
        assert_eq!(angles(&out), vec!["A10", "disconnect", "A30"]);
    }

    #[test]
    fn test_invalid_command_does_not_supersede() {
        let (a1, _a1_rx) = send("A", 10);
        let (a2, _a2_rx) = send("A", 999);

        let out = coalesce(vec![a1, a2], &LinkConfig::default());
        assert_eq!(angles(&out), vec!["A10", "A999"]);
    }

    #[test]
    fn test_policy_serde_names() {
        assert_eq!(
            serde_json::to_string(&SendPolicy::LatestWins).unwrap(),
            "\"latest_wins\""
        );
        assert_eq!(SendPolicy::default(), SendPolicy::SendAll);
    }
}
