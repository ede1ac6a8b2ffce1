//! Pending-request registry with at-most-once decision delivery.
//!
//! All state transitions happen under one async mutex, and the frame write
//! itself runs inside that critical section, so a decision racing the
//! cleanup scan either observes `pending` (and wins) or a terminal state
//! (and fails fast), so a second frame can never be written.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use {
    serde::Serialize,
    thiserror::Error,
    tokio::{io::AsyncWriteExt, net::UnixStream, sync::Mutex},
    tracing::{debug, info, warn},
};

use larkin_protocol::{
    CLEANUP_INTERVAL_SECS, TERMINAL_RETENTION_SECS, framing,
    socket::{Behavior, Decision, DecisionFrame, HookPayload},
};

/// Write deadline for timeout-fallback frames.
const FALLBACK_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Resolved,
    Disconnected,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("请求不存在或已被清理")]
    NotFound,

    #[error("请求已被{0}，请勿重复操作")]
    AlreadyResolved(&'static str),

    #[error("连接已断开，Claude 可能已超时或取消")]
    Disconnected,
}

struct PendingRequest {
    conn: UnixStream,
    data: HookPayload,
    hook_pid: Option<i32>,
    registered_at: Instant,
    status: RequestStatus,
    resolved_as: Option<Behavior>,
    /// Set when the request leaves `pending`; drives the retention purge.
    terminal_at: Option<Instant>,
}

impl PendingRequest {
    fn mark_terminal(&mut self, status: RequestStatus) {
        self.status = status;
        self.terminal_at = Some(Instant::now());
    }
}

/// Snapshot of one request for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSnapshot {
    pub status: RequestStatus,
    pub age_seconds: u64,
    pub session: String,
    pub tool: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerStats {
    pub pending: usize,
    pub resolved: usize,
    pub disconnected: usize,
    pub requests: HashMap<String, RequestSnapshot>,
}

pub struct RequestBroker {
    requests: Mutex<HashMap<String, PendingRequest>>,
    /// Zero disables the timeout; dead-peer detection still runs.
    timeout: Duration,
    retention: Duration,
}

impl RequestBroker {
    pub fn new(timeout: Duration) -> Self {
        Self::with_timings(timeout, Duration::from_secs(TERMINAL_RETENTION_SECS))
    }

    /// Constructor with an explicit terminal-retention window (tests).
    pub fn with_timings(timeout: Duration, retention: Duration) -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            timeout,
            retention,
        }
    }

    /// Record a pending request, taking ownership of the hook's socket.
    pub async fn register(
        &self,
        request_id: &str,
        conn: UnixStream,
        hook_pid: Option<i32>,
        data: HookPayload,
    ) {
        let session_id = data.session_id.clone();
        self.requests.lock().await.insert(
            request_id.to_string(),
            PendingRequest {
                conn,
                data,
                hook_pid,
                registered_at: Instant::now(),
                status: RequestStatus::Pending,
                resolved_as: None,
                terminal_at: None,
            },
        );
        info!(request_id, session_id, "registered permission request");
    }

    /// Deliver `decision` to the hook. Idempotent: later calls report what
    /// already happened instead of writing again.
    pub async fn resolve(&self, request_id: &str, decision: Decision) -> Result<(), ResolveError> {
        let mut requests = self.requests.lock().await;
        let req = requests.get_mut(request_id).ok_or(ResolveError::NotFound)?;

        match req.status {
            RequestStatus::Resolved => {
                return Err(ResolveError::AlreadyResolved(resolved_label(req.resolved_as)));
            },
            RequestStatus::Disconnected => return Err(ResolveError::Disconnected),
            RequestStatus::Pending => {},
        }

        let behavior = decision.behavior;
        let frame = DecisionFrame::resolved(decision, &req.data);
        let payload = match serde_json::to_vec(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(request_id, error = %e, "failed to encode decision frame");
                return Err(ResolveError::Disconnected);
            },
        };

        if let Err(e) = framing::write_frame(&mut req.conn, &payload).await {
            warn!(request_id, error = %e, "decision write failed, peer is gone");
            req.mark_terminal(RequestStatus::Disconnected);
            return Err(ResolveError::Disconnected);
        }

        // Socket stays open; the hook closes it after reading the frame.
        req.mark_terminal(RequestStatus::Resolved);
        req.resolved_as = Some(behavior);
        info!(
            request_id,
            session_id = req.data.session_id,
            behavior = behavior.as_str(),
            "request resolved"
        );
        Ok(())
    }

    pub async fn request_data(&self, request_id: &str) -> Option<HookPayload> {
        self.requests
            .lock()
            .await
            .get(request_id)
            .map(|r| r.data.clone())
    }

    pub async fn request_status(&self, request_id: &str) -> Option<RequestStatus> {
        self.requests.lock().await.get(request_id).map(|r| r.status)
    }

    pub async fn hook_pid(&self, request_id: &str) -> Option<i32> {
        self.requests
            .lock()
            .await
            .get(request_id)
            .and_then(|r| r.hook_pid)
    }

    pub async fn stats(&self) -> BrokerStats {
        let requests = self.requests.lock().await;
        let mut stats = BrokerStats {
            pending: 0,
            resolved: 0,
            disconnected: 0,
            requests: HashMap::with_capacity(requests.len()),
        };
        for (id, req) in requests.iter() {
            match req.status {
                RequestStatus::Pending => stats.pending += 1,
                RequestStatus::Resolved => stats.resolved += 1,
                RequestStatus::Disconnected => stats.disconnected += 1,
            }
            stats.requests.insert(
                id.clone(),
                RequestSnapshot {
                    status: req.status,
                    age_seconds: req.registered_at.elapsed().as_secs(),
                    session: req.data.session_id.clone(),
                    tool: req.data.tool_name.clone(),
                },
            );
        }
        stats
    }

    /// One scan: drop dead peers, time out overdue requests with a fallback
    /// frame, purge terminal entries past the retention window.
    pub async fn cleanup_pass(&self) {
        let mut requests = self.requests.lock().await;
        let mut purge = Vec::new();

        for (id, req) in requests.iter_mut() {
            match req.status {
                RequestStatus::Pending => {
                    if peer_closed(&req.conn) {
                        info!(
                            request_id = id,
                            session_id = req.data.session_id,
                            "hook disconnected, dropping request"
                        );
                        req.mark_terminal(RequestStatus::Disconnected);
                        continue;
                    }

                    let age = req.registered_at.elapsed();
                    if !self.timeout.is_zero() && age > self.timeout {
                        send_fallback(id, req, age).await;
                    }
                },
                RequestStatus::Resolved | RequestStatus::Disconnected => {
                    if req
                        .terminal_at
                        .is_some_and(|t| t.elapsed() > self.retention)
                    {
                        purge.push(id.clone());
                    }
                },
            }
        }

        for id in purge {
            requests.remove(&id);
            debug!(request_id = id, "purged terminal request");
        }
    }

    /// Run the cleanup scan forever; spawned at backend startup.
    pub async fn run_cleanup(&self) {
        let mut tick = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            self.cleanup_pass().await;
        }
    }
}

fn resolved_label(behavior: Option<Behavior>) -> &'static str {
    match behavior {
        Some(Behavior::Allow) => "批准",
        Some(Behavior::Deny) => "拒绝",
        None => "处理",
    }
}

/// Non-destructive liveness probe. The hook never sends after registering,
/// so a zero-byte read means EOF and anything unreadable means alive.
fn peer_closed(conn: &UnixStream) -> bool {
    let mut probe = [0u8; 1];
    match conn.try_read(&mut probe) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
        Err(_) => true,
    }
}

async fn send_fallback(id: &str, req: &mut PendingRequest, age: Duration) {
    let frame = DecisionFrame::server_timeout(req.data.session_id.clone(), age.as_secs());
    let written = match serde_json::to_vec(&frame) {
        Ok(payload) => tokio::time::timeout(
            FALLBACK_WRITE_TIMEOUT,
            framing::write_frame(&mut req.conn, &payload),
        )
        .await
        .is_ok_and(|r| r.is_ok()),
        Err(_) => false,
    };

    if written {
        info!(
            request_id = id,
            session_id = req.data.session_id,
            age_secs = age.as_secs(),
            "sent timeout fallback frame"
        );
    } else {
        warn!(request_id = id, "failed to send fallback frame");
    }
    req.mark_terminal(RequestStatus::Disconnected);
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use {super::*, larkin_protocol::socket::ResolvedFrame};

    fn payload(session: &str) -> HookPayload {
        HookPayload {
            session_id: session.into(),
            tool_name: "Bash".into(),
            tool_input: serde_json::json!({"command": "ls"}),
            project_dir: "/tmp".into(),
        }
    }

    async fn read_decision(client: &mut UnixStream) -> DecisionFrame {
        let raw = framing::read_frame(client).await.unwrap();
        serde_json::from_slice(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_writes_one_frame() {
        let broker = RequestBroker::new(Duration::from_secs(300));
        let (server, mut client) = UnixStream::pair().unwrap();
        broker.register("r1", server, None, payload("s1")).await;

        broker.resolve("r1", Decision::allow()).await.unwrap();

        let frame = read_decision(&mut client).await;
        let DecisionFrame::Resolved(ResolvedFrame {
            success, decision, session_id, ..
        }) = frame
        else {
            panic!("expected resolved frame");
        };
        assert!(success);
        assert_eq!(decision.behavior, Behavior::Allow);
        assert_eq!(session_id, "s1");
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let broker = RequestBroker::new(Duration::from_secs(300));
        let (server, mut client) = UnixStream::pair().unwrap();
        broker.register("r1", server, None, payload("s1")).await;

        broker.resolve("r1", Decision::allow()).await.unwrap();
        let err = broker.resolve("r1", Decision::allow()).await.unwrap_err();
        assert_eq!(err, ResolveError::AlreadyResolved("批准"));

        // Exactly one frame on the wire: after draining it, the socket has
        // nothing more to offer.
        let _ = read_decision(&mut client).await;
        let mut rest = Vec::new();
        tokio::select! {
            n = client.read_to_end(&mut rest) => {
                // Socket still open server-side, so read_to_end only returns
                // once the broker is dropped; reaching here means EOF with no
                // extra bytes.
                let _ = n;
                assert!(rest.is_empty());
            },
            () = tokio::time::sleep(Duration::from_millis(100)) => {},
        }
    }

    #[tokio::test]
    async fn test_resolve_unknown_request() {
        let broker = RequestBroker::new(Duration::from_secs(300));
        assert_eq!(
            broker.resolve("ghost", Decision::allow()).await.unwrap_err(),
            ResolveError::NotFound
        );
    }

    #[tokio::test]
    async fn test_dead_peer_detected_without_timeout() {
        // Timeout disabled: dead-peer detection must still work.
        let broker = RequestBroker::new(Duration::ZERO);
        let (server, client) = UnixStream::pair().unwrap();
        broker.register("r1", server, None, payload("s1")).await;
        drop(client);

        broker.cleanup_pass().await;
        assert_eq!(
            broker.request_status("r1").await,
            Some(RequestStatus::Disconnected)
        );
        assert_eq!(
            broker.resolve("r1", Decision::allow()).await.unwrap_err(),
            ResolveError::Disconnected
        );
    }

    #[tokio::test]
    async fn test_timeout_sends_fallback_frame() {
        let broker = RequestBroker::new(Duration::from_millis(20));
        let (server, mut client) = UnixStream::pair().unwrap();
        broker.register("r1", server, None, payload("s1")).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        broker.cleanup_pass().await;

        let frame = read_decision(&mut client).await;
        let DecisionFrame::Fallback(fallback) = frame else {
            panic!("expected fallback frame");
        };
        assert!(fallback.fallback_to_terminal);
        assert_eq!(fallback.error, "server_timeout");
        assert_eq!(
            broker.request_status("r1").await,
            Some(RequestStatus::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_zero_timeout_keeps_pending() {
        let broker = RequestBroker::new(Duration::ZERO);
        let (server, _client) = UnixStream::pair().unwrap();
        broker.register("r1", server, None, payload("s1")).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        broker.cleanup_pass().await;
        assert_eq!(
            broker.request_status("r1").await,
            Some(RequestStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_terminal_requests_purged_after_retention() {
        let broker =
            RequestBroker::with_timings(Duration::from_secs(300), Duration::from_millis(10));
        let (server, _client) = UnixStream::pair().unwrap();
        broker.register("r1", server, None, payload("s1")).await;
        broker.resolve("r1", Decision::allow()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        broker.cleanup_pass().await;
        assert!(broker.request_status("r1").await.is_none());
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let broker = RequestBroker::new(Duration::from_secs(300));
        let (server, _client) = UnixStream::pair().unwrap();
        broker.register("r1", server, None, payload("s1")).await;
        let (server2, _client2) = UnixStream::pair().unwrap();
        broker.register("r2", server2, None, payload("s2")).await;
        broker.resolve("r2", Decision::deny("no")).await.unwrap();

        let stats = broker.stats().await;
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.requests["r1"].tool, "Bash");
        assert_eq!(stats.requests["r2"].status, RequestStatus::Resolved);
    }
}
