//! Unix-socket listener accepting hook connections.
//!
//! Protocol per connection: the hook writes one unframed JSON object (a
//! `{"type":"ping"}` probe or a register request), the server answers (pong
//! for probes, an unframed ACK for registrations), and a registered socket
//! is then handed to the broker to wait for its decision frame.

use std::{os::unix::fs::PermissionsExt, path::PathBuf, sync::Arc, time::Duration};

use {
    tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{UnixListener, UnixStream},
        time::timeout,
    },
    tracing::{debug, info, warn},
};

use larkin_protocol::{
    SOCKET_RECEIVE_TIMEOUT_SECS,
    socket::{Ack, HookMessage, HookPayload, Pong},
};

use crate::broker::RequestBroker;

pub struct LocalSocketServer {
    path: PathBuf,
    listener: UnixListener,
    broker: Arc<RequestBroker>,
}

impl LocalSocketServer {
    /// Unlink any stale socket file, bind, and restrict to the owning user.
    pub fn bind(path: PathBuf, broker: Arc<RequestBroker>) -> std::io::Result<Self> {
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(e),
        }

        let listener = UnixListener::bind(&path)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        info!(path = %path.display(), "permission socket listening");
        Ok(Self {
            path,
            listener,
            broker,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Accept connections forever, one task per connection.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let broker = Arc::clone(&self.broker);
                    tokio::spawn(handle_connection(broker, stream));
                },
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                },
            }
        }
    }
}

async fn handle_connection(broker: Arc<RequestBroker>, mut stream: UnixStream) {
    let deadline = Duration::from_secs(SOCKET_RECEIVE_TIMEOUT_SECS);
    let message = match timeout(deadline, read_message(&mut stream)).await {
        Ok(Some(message)) => message,
        Ok(None) => {
            // Peer closed or sent garbage before a full object: drop quietly.
            debug!("connection closed before a complete request arrived");
            return;
        },
        Err(_) => {
            warn!("receive deadline elapsed with incomplete JSON, closing");
            return;
        },
    };

    match message {
        HookMessage::Probe { .. } => {
            if let Ok(pong) = serde_json::to_vec(&Pong::new()) {
                let _ = stream.write_all(&pong).await;
            }
            debug!("answered ping probe");
        },
        HookMessage::Register(frame) => {
            let payload = match HookPayload::decode(&frame.raw_input_encoded) {
                Some(payload) => payload,
                None => {
                    warn!(
                        request_id = frame.request_id,
                        "could not decode hook payload, registering as unknown"
                    );
                    HookPayload::unknown()
                },
            };

            // ACK before registering: if the hook is already gone the
            // write fails and the request is silently dropped.
            let ack = match serde_json::to_vec(&Ack::registered(&payload.session_id)) {
                Ok(ack) => ack,
                Err(e) => {
                    warn!(error = %e, "failed to encode ack");
                    return;
                },
            };
            if stream.write_all(&ack).await.is_err() {
                debug!(request_id = frame.request_id, "hook gone before ack");
                return;
            }

            broker
                .register(&frame.request_id, stream, frame.hook_pid, payload)
                .await;
        },
    }
}

/// Accumulate bytes until they parse as a complete hook message.
/// Returns `None` on EOF or when the buffer can no longer become valid.
async fn read_message(stream: &mut UnixStream) -> Option<HookMessage> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Ok(message) = serde_json::from_slice::<HookMessage>(&buf) {
            return Some(message);
        }
    }
}
