//! Hook-side socket client.
//!
//! Reads the request JSON from stdin, sends it over the Unix socket, waits
//! for the unframed ACK and then the length-prefixed decision frame, and
//! prints the decision payload to stdout. Every failure prints a JSON
//! fallback decision and exits non-zero; the wait deadline is the server
//! timeout plus a buffer, so the server always times out first.

use std::{path::PathBuf, time::{Duration, Instant}};

use {
    tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::UnixStream,
        time::timeout,
    },
    tracing::{debug, error},
};

use {
    larkin_config::LarkinConfig,
    larkin_protocol::{framing, socket::ClientFailure},
};

pub async fn run(config: &LarkinConfig, socket_override: Option<PathBuf>) -> i32 {
    let socket_path = socket_override.unwrap_or_else(|| config.socket_path.clone());
    let deadline = Duration::from_secs(config.client_timeout_secs());

    let mut request = String::new();
    if tokio::io::stdin().read_to_string(&mut request).await.is_err() || request.is_empty() {
        error!("no input data on stdin");
        return 1;
    }
    debug!(bytes = request.len(), socket = %socket_path.display(), "sending request");

    let started = Instant::now();
    match timeout(deadline, exchange(&socket_path, &request)).await {
        Ok(Ok(payload)) => {
            println!("{payload}");
            0
        },
        Ok(Err(failure)) => {
            print_failure(&failure);
            1
        },
        Err(_) => {
            let elapsed = started.elapsed().as_secs();
            error!(elapsed, "client deadline reached before a decision arrived");
            print_failure(&ClientFailure::timeout(elapsed));
            1
        },
    }
}

/// One full request/ack/decision exchange.
async fn exchange(socket_path: &std::path::Path, request: &str) -> Result<String, ClientFailure> {
    let mut stream = UnixStream::connect(socket_path).await.map_err(|e| {
        error!(error = %e, "connect failed");
        match e.kind() {
            std::io::ErrorKind::NotFound => {
                ClientFailure::new("socket_not_found", "Socket 文件不存在")
            },
            std::io::ErrorKind::ConnectionRefused => {
                ClientFailure::new("connection_refused", "连接被拒绝")
            },
            _ => ClientFailure::new(e.to_string(), format!("连接错误: {e}")),
        }
    })?;

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| ClientFailure::new(e.to_string(), format!("发送请求失败: {e}")))?;

    // The ACK has no length prefix: accumulate until a JSON object parses.
    let mut ack = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| ClientFailure::new(e.to_string(), format!("读取确认响应失败: {e}")))?;
        if n == 0 {
            return Err(ClientFailure::new("ack_read_failed", "读取确认响应失败"));
        }
        ack.extend_from_slice(&chunk[..n]);
        if serde_json::from_slice::<serde_json::Value>(&ack).is_ok() {
            debug!("ack received, waiting for decision");
            break;
        }
    }

    let payload = framing::read_frame(&mut stream).await.map_err(|e| {
        error!(error = %e, "decision read failed");
        match e {
            framing::FrameError::Truncated => {
                ClientFailure::new("incomplete_response", "响应不完整")
            },
            other => ClientFailure::new(other.to_string(), "读取响应失败"),
        }
    })?;

    String::from_utf8(payload)
        .map_err(|_| ClientFailure::new("invalid_utf8", "响应编码错误"))
}

fn print_failure(failure: &ClientFailure) {
    match serde_json::to_string(failure) {
        Ok(line) => println!("{line}"),
        Err(e) => error!(error = %e, "failed to encode failure payload"),
    }
}
