//! ZMQ ROUTER server.
//!
//! One socket, one loop. Each peer identity gets a [`Connection`] holding its
//! session slot. Immediate-class calls are dispatched inline and their Return
//! is queued on the immediate queue behind any events the call produced.
//! Worker-class calls run on the blocking pool and queue their Return on the
//! worker queue, behind the events they emitted. The loop drains both queues
//! onto the socket.
//!
//! A Disconnect frame, an idle peer, or daemon shutdown sends the peer's
//! session through [`shutdown_session`] once the peer's worker calls finish.
//! Clients keep themselves from looking idle with heartbeats.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use recproto::socket::{create_router_and_bind, frames_to_multipart, multipart_to_frames, ZmqContext};
use recproto::{ExecutionClass, Kind, RecFrame, ShmBufferManager};
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::bridge::{event_queues, EventSink, Outbound, QueueSenders};
use crate::dispatch::{CallContext, DispatchTable, Services, SessionSlot};
use crate::engine::EngineFactory;
use crate::privilege::{PeerCredentials, StaticPrivileges};
use crate::session::Session;
use crate::shutdown::{shutdown_session, ShutdownReport};

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub endpoint: String,
    /// Zero disables idle reaping.
    pub idle_timeout: Duration,
    pub reap_interval: Duration,
}

impl ServerConfig {
    pub fn from_config(config: &recconf::RecConfig) -> Self {
        Self {
            endpoint: config.endpoint(),
            idle_timeout: config.dispatch.idle_timeout(),
            reap_interval: config.dispatch.reap_interval(),
        }
    }
}

impl Services {
    /// Shared-memory buffers and static privileges, as configured.
    pub fn from_config(config: &recconf::RecConfig, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            buffers: Arc::new(ShmBufferManager::new(&config.paths.buffer_dir)),
            privileges: Arc::new(StaticPrivileges::from_config(&config.security)),
            privilege: config.security.privilege.clone(),
        }
    }
}

struct Connection {
    peer: PeerCredentials,
    sink: EventSink,
    session: Option<Arc<Session>>,
    /// Worker-class calls still running for this peer.
    workers: Vec<JoinHandle<()>>,
    last_seen: Instant,
}

impl Connection {
    fn new(identity: Vec<Bytes>, queues: &QueueSenders) -> Self {
        Self {
            sink: queues.sink(identity.clone()),
            peer: PeerCredentials::new(identity),
            session: None,
            workers: Vec::new(),
            last_seen: Instant::now(),
        }
    }

    fn apply(&mut self, slot: SessionSlot) {
        match slot {
            SessionSlot::Keep => {}
            SessionSlot::Publish(session) => self.session = Some(session),
            SessionSlot::Clear => self.session = None,
        }
    }

    fn track(&mut self, worker: JoinHandle<()>) {
        self.workers.retain(|w| !w.is_finished());
        self.workers.push(worker);
    }

    /// Hand the session, if any, to the shutdown sequencer after every
    /// pending worker call has returned.
    fn retire(self, reason: &str) -> Option<JoinHandle<Result<ShutdownReport, JoinError>>> {
        let session = self.session?;
        info!(
            "{}: {} with live session {:#x}, {} worker calls pending",
            self.peer.label(),
            reason,
            session.handle(),
            self.workers.iter().filter(|w| !w.is_finished()).count()
        );
        let label = self.peer.label();
        let workers = self.workers;
        Some(tokio::spawn(async move {
            for worker in workers {
                if let Err(e) = worker.await {
                    warn!("{}: worker call failed: {}", label, e);
                }
            }
            tokio::task::spawn_blocking(move || shutdown_session(&session)).await
        }))
    }
}

pub struct Server {
    config: ServerConfig,
    services: Arc<Services>,
    table: Arc<DispatchTable>,
}

impl Server {
    pub fn new(config: ServerConfig, services: Services) -> Self {
        Self {
            config,
            services: Arc::new(services),
            table: Arc::new(DispatchTable::new()),
        }
    }

    /// Serve until `shutdown_rx` fires, then shut down every live session.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let context = ZmqContext::new();
        let socket = create_router_and_bind(&context, &self.config.endpoint)
            .with_context(|| format!("failed to bind recorder socket to {}", self.config.endpoint))?;
        info!("recorder socket bound to {}", self.config.endpoint);

        let (mut tx, mut rx) = socket.split();
        let (senders, mut queues) = event_queues();
        let mut connections: HashMap<Vec<Bytes>, Connection> = HashMap::new();
        let mut reap = tokio::time::interval(self.config.reap_interval);
        reap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, stopping server");
                    break;
                }

                Some(frames) = queues.immediate.recv() => {
                    send(&mut tx, frames).await;
                }

                Some(frames) = queues.worker.recv() => {
                    send(&mut tx, frames).await;
                }

                result = rx.next() => {
                    match result {
                        Some(Ok(mp)) => {
                            self.handle_message(multipart_to_frames(mp), &senders, &mut connections);
                        }
                        Some(Err(e)) => {
                            error!("error receiving message: {}", e);
                        }
                        None => {
                            warn!("socket stream ended");
                            break;
                        }
                    }
                }

                _ = reap.tick() => {
                    self.reap_idle(&mut connections);
                }
            }
        }

        let pending: Vec<_> = connections
            .into_values()
            .filter_map(|conn| conn.retire("daemon shutdown"))
            .collect();
        for handle in pending {
            match handle.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) | Err(e) => error!("session shutdown task failed: {}", e),
            }
        }

        // Flush whatever the sequencer's last state changes queued.
        while let Ok(frames) = queues.immediate.try_recv() {
            send(&mut tx, frames).await;
        }
        info!("recorder server stopped");
        Ok(())
    }

    fn handle_message(
        &self,
        frames: Vec<Bytes>,
        senders: &QueueSenders,
        connections: &mut HashMap<Vec<Bytes>, Connection>,
    ) {
        let (identity, frame) = match RecFrame::from_frames_with_identity(&frames) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("dropping malformed message: {}", e);
                return;
            }
        };

        if frame.kind == Kind::Disconnect {
            if let Some(conn) = connections.remove(&identity) {
                debug!("{}: disconnect", conn.peer.label());
                // Detached; the sequencer is best-effort and logs its own outcome.
                drop(conn.retire("disconnect"));
            }
            return;
        }

        let conn = connections
            .entry(identity)
            .or_insert_with_key(|identity| Connection::new(identity.clone(), senders));
        conn.last_seen = Instant::now();

        match frame.kind {
            Kind::Heartbeat => {
                conn.sink.send_frame(&RecFrame::heartbeat(frame.request_id));
            }
            Kind::Call => self.handle_call(conn, &frame),
            other => debug!("{}: ignoring {:?} frame", conn.peer.label(), other),
        }
    }

    fn handle_call(&self, conn: &mut Connection, frame: &RecFrame) {
        let call = match DispatchTable::decode(frame) {
            Ok(call) => call,
            Err(ret) => {
                conn.sink.send_return(ExecutionClass::Immediate, &ret);
                return;
            }
        };

        let ctx = CallContext {
            services: Arc::clone(&self.services),
            session: conn.session.clone(),
            peer: conn.peer.clone(),
            sink: conn.sink.clone(),
        };

        match call.api.class() {
            ExecutionClass::Immediate => {
                let out = self.table.dispatch(&ctx, &call);
                conn.apply(out.slot);
                conn.sink.send_return(ExecutionClass::Immediate, &out.ret);
            }
            ExecutionClass::Worker => {
                let table = Arc::clone(&self.table);
                let worker = tokio::task::spawn_blocking(move || {
                    let out = table.dispatch(&ctx, &call);
                    if !matches!(out.slot, SessionSlot::Keep) {
                        warn!("{} tried to change the session from a worker", call.api);
                    }
                    ctx.sink.send_return(ExecutionClass::Worker, &out.ret);
                });
                conn.track(worker);
            }
        }
    }

    fn reap_idle(&self, connections: &mut HashMap<Vec<Bytes>, Connection>) {
        if self.config.idle_timeout.is_zero() {
            return;
        }
        let idle: Vec<Vec<Bytes>> = connections
            .iter()
            .filter(|(_, c)| c.last_seen.elapsed() > self.config.idle_timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in idle {
            if let Some(conn) = connections.remove(&id) {
                debug!("{}: idle for {:?}", conn.peer.label(), self.config.idle_timeout);
                drop(conn.retire("idle timeout"));
            }
        }
    }
}

async fn send<S>(tx: &mut S, frames: Outbound)
where
    S: futures::Sink<recproto::socket::Multipart, Error = recproto::socket::TmqError> + Unpin,
{
    if let Err(e) = tx.send(frames_to_multipart(&frames)).await {
        error!("failed to send reply: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SoftEngineFactory;
    use crate::session::CreateMode;
    use recproto::RecorderState;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn connection() -> Connection {
        let (senders, _queues) = event_queues();
        Connection::new(vec![Bytes::from_static(b"peer")], &senders)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retire_waits_for_worker_calls() {
        let dir = tempfile::tempdir().unwrap();
        let buffers = Arc::new(ShmBufferManager::new(dir.path()));
        let session =
            Session::create(&SoftEngineFactory::new(), buffers, CreateMode::Audio { pid: 1 }).unwrap();
        session.engine().prepare().unwrap();

        let mut conn = connection();
        conn.apply(SessionSlot::Publish(Arc::clone(&session)));

        let saw_live = Arc::new(AtomicBool::new(false));
        let worker = {
            let session = Arc::clone(&session);
            let saw_live = Arc::clone(&saw_live);
            tokio::task::spawn_blocking(move || {
                std::thread::sleep(Duration::from_millis(200));
                saw_live.store(!session.is_torn_down(), Ordering::SeqCst);
            })
        };
        conn.track(worker);

        let report = conn.retire("disconnect").unwrap().await.unwrap().unwrap();
        assert!(saw_live.load(Ordering::SeqCst));
        assert_eq!(report.initial, RecorderState::Ready);
        assert!(report.released);
        assert!(session.is_torn_down());
    }

    #[tokio::test]
    async fn retire_without_session_does_nothing() {
        let mut conn = connection();
        conn.track(tokio::spawn(async {}));
        assert!(conn.retire("disconnect").is_none());
    }

    #[tokio::test]
    async fn finished_workers_are_pruned() {
        let mut conn = connection();
        let done = tokio::spawn(async {});
        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.track(done);
        conn.track(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }));
        assert_eq!(conn.workers.len(), 1);
    }
}
