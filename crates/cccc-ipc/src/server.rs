//! Local IPC endpoint (spec §4.7, C7): newline-delimited JSON request/
//! response over a Unix domain socket or loopback TCP, with two streaming
//! upgrades (`events_stream`, `term_attach`).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::frames::{PushFrame, Request, Response};
use crate::handler::OpHandler;

const HEARTBEAT_INTERVAL_SECS: u64 = 15;
const TERM_POLL_INTERVAL_MS: u64 = 100;

pub enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl Listener {
    /// Bind a Unix socket, removing a stale socket file left by an unclean
    /// shutdown (the pidfile-based liveness check happens one layer up, in
    /// C9 recovery, before the daemon ever gets here).
    pub fn bind_unix(path: &Path) -> std::io::Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Listener::Unix(UnixListener::bind(path)?))
    }

    pub async fn bind_tcp(bind: &str, port: u16) -> std::io::Result<Self> {
        Ok(Listener::Tcp(TcpListener::bind((bind, port)).await?))
    }
}

pub struct IpcServer {
    listener: Listener,
    handler: Arc<dyn OpHandler>,
    op_timeout: Duration,
}

impl IpcServer {
    pub fn new(listener: Listener, handler: Arc<dyn OpHandler>, op_timeout_secs: u64) -> Self {
        Self {
            listener,
            handler,
            op_timeout: Duration::from_secs(op_timeout_secs),
        }
    }

    /// Accept loop. Runs until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("ipc server listening");
        loop {
            tokio::select! {
                accepted = self.accept_one() => {
                    match accepted {
                        Ok(()) => {}
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("ipc server shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn accept_one(&self) -> std::io::Result<()> {
        match &self.listener {
            Listener::Unix(l) => {
                let (stream, _) = l.accept().await?;
                self.spawn_connection(stream);
            }
            Listener::Tcp(l) => {
                let (stream, _) = l.accept().await?;
                self.spawn_connection(stream);
            }
        }
        Ok(())
    }

    fn spawn_connection<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let handler = Arc::clone(&self.handler);
        let op_timeout = self.op_timeout;
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, handler, op_timeout).await {
                debug!(error = %e, "connection closed");
            }
        });
    }
}

async fn handle_connection<S>(stream: S, handler: Arc<dyn OpHandler>, op_timeout: Duration) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let req: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                write_line(&mut write_half, &Response::err("invalid_request", e.to_string())).await?;
                continue;
            }
        };

        match req.op.as_str() {
            "events_stream" => {
                serve_events_stream(&mut lines, &mut write_half, &handler, &req.args).await?;
                break;
            }
            "term_attach" => {
                serve_term_attach(&mut lines, &mut write_half, &handler, &req.args).await?;
                break;
            }
            _ => {
                let res = match tokio::time::timeout(op_timeout, handler.call(&req.op, req.args)).await {
                    Ok(Ok(result)) => Response::ok(result),
                    Ok(Err(e)) => Response::err(e.code(), e.to_string()),
                    Err(_) => Response::err("internal_error", "operation timed out"),
                };
                write_line(&mut write_half, &res).await?;
            }
        }
    }
    Ok(())
}

/// `events_stream` upgrade: ack, then push matching events plus periodic
/// heartbeats until the client disconnects (spec §4.7, §4.8).
async fn serve_events_stream<R, W>(
    lines: &mut tokio::io::Lines<BufReader<R>>,
    write_half: &mut W,
    handler: &Arc<dyn OpHandler>,
    args: &Value,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let group_id = args.get("group_id").and_then(Value::as_str).unwrap_or_default();
    let kinds: Option<Vec<String>> = args
        .get("kinds")
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    let mut sub = match handler.subscribe_events(group_id, kinds) {
        Ok(s) => {
            write_line(write_half, &Response::ok(serde_json::json!({"subscribed": true}))).await?;
            s
        }
        Err(e) => {
            write_line(write_half, &Response::err(e.code(), e.to_string())).await?;
            return Ok(());
        }
    };

    let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    loop {
        tokio::select! {
            event = sub.recv() => {
                match event {
                    Some(event) => {
                        let frame = PushFrame::Event { event: serde_json::to_value(&event).unwrap_or(Value::Null) };
                        write_push(write_half, &frame).await?;
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                write_push(write_half, &PushFrame::Heartbeat).await?;
            }
            line = lines.next_line() => {
                if line?.is_none() {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// `term_attach` upgrade: ack, then poll the actor's output buffer while
/// accepting interleaved `term_input`/`term_resize` control lines.
async fn serve_term_attach<R, W>(
    lines: &mut tokio::io::Lines<BufReader<R>>,
    write_half: &mut W,
    handler: &Arc<dyn OpHandler>,
    args: &Value,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let group_id = args.get("group_id").and_then(Value::as_str).unwrap_or_default().to_string();
    let actor_id = args.get("actor_id").and_then(Value::as_str).unwrap_or_default().to_string();

    write_line(write_half, &Response::ok(serde_json::json!({"attached": true}))).await?;

    let mut poll = tokio::time::interval(Duration::from_millis(TERM_POLL_INTERVAL_MS));
    loop {
        tokio::select! {
            _ = poll.tick() => {
                match handler.drain_terminal(&group_id, &actor_id) {
                    Ok(chunk) if !chunk.is_empty() => {
                        let data_b64 = base64::engine::general_purpose::STANDARD.encode(chunk.as_bytes());
                        write_push(write_half, &PushFrame::TermOutput { actor_id: actor_id.clone(), data_b64 }).await?;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        write_line(write_half, &Response::err(e.code(), e.to_string())).await?;
                        break;
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(req) = serde_json::from_str::<Request>(&line) else { continue };
                match req.op.as_str() {
                    "term_input" => {
                        if let Some(data_b64) = req.args.get("data_b64").and_then(Value::as_str) {
                            if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(data_b64) {
                                if let Err(e) = handler.write_terminal(&group_id, &actor_id, &bytes) {
                                    warn!(actor_id, error = %e, "term_input write failed");
                                }
                            }
                        }
                    }
                    "term_resize" => {
                        let cols = req.args.get("cols").and_then(Value::as_u64).unwrap_or(80) as u16;
                        let rows = req.args.get("rows").and_then(Value::as_u64).unwrap_or(24) as u16;
                        if let Err(e) = handler.resize_terminal(&group_id, &actor_id, cols, rows) {
                            warn!(actor_id, error = %e, "term_resize failed");
                        }
                    }
                    other => warn!(op = other, "ignoring unexpected op during term_attach"),
                }
            }
        }
    }
    Ok(())
}

async fn write_line<W: AsyncWrite + Unpin>(w: &mut W, res: &Response) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(res).unwrap_or_default();
    line.push(b'\n');
    w.write_all(&line).await
}

async fn write_push<W: AsyncWrite + Unpin>(w: &mut W, frame: &PushFrame) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(frame).unwrap_or_default();
    line.push(b'\n');
    w.write_all(&line).await
}

#[allow(dead_code)]
fn assert_stream_bounds() {
    fn is_send<T: Send>() {}
    is_send::<UnixStream>();
    is_send::<TcpStream>();
}
