// TCP front for the command dispatcher.
//
// Accepts RESP and inline (telnet-style) connections, dispatches each
// command, and handles the connection-mode switches a command can request:
// pub/sub subscriber loops, live fence streams, and the raw log streaming
// that feeds followers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::glob::Glob;
use crate::pubsub::Subscriptions;
use crate::resp::{self, Value};
use crate::server::{ClientInfo, CommandCtx, ConnAction, OutputMode, Server};

const DENIED_BANNER: &str = "DENIED fleetmap is running in protected mode because protected \
mode is enabled and no password is set. In this mode connections are only accepted from the \
loopback interface. If you want to connect from external computers, either disable protected \
mode with CONFIG SET protected-mode no, or set a password with CONFIG SET requirepass.";

pub struct SocketServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl SocketServer {
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("failed to bind {host}:{port}"))?;
        let addr = listener.local_addr()?;
        info!(%addr, "listening");
        Ok(Self { listener, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn accept_loop(self, server: Arc<Server>) {
        let mut connection_id = 0u64;
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    connection_id += 1;
                    let id = connection_id;
                    debug!(connection_id = id, %peer, "accepted connection");
                    server.connected_clients.fetch_add(1, Ordering::SeqCst);
                    metrics::counter!("connections_accepted_total").increment(1);

                    let server = server.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, &server, id).await {
                            debug!(connection_id = id, error = %e, "connection error");
                        }
                        server.connected_clients.fetch_sub(1, Ordering::SeqCst);
                        metrics::counter!("connections_closed_total").increment(1);
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                    metrics::counter!("accept_errors_total").increment(1);
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    server: &Arc<Server>,
    connection_id: u64,
) -> Result<()> {
    if server.config.read().is_protected() && !peer.ip().is_loopback() {
        warn!(%peer, "refusing non-loopback connection in protected mode");
        let mut out = Vec::new();
        Value::Error(DENIED_BANNER.to_string()).encode(&mut out);
        let _ = stream.write_all(&out).await;
        return Ok(());
    }
    set_keepalive(&stream, server.config.read().keepalive);

    let kill = Arc::new(std::sync::atomic::AtomicBool::new(false));
    server.clients.lock().insert(
        connection_id,
        ClientInfo {
            id: connection_id,
            addr: peer.to_string(),
            name: String::new(),
            kill: kill.clone(),
        },
    );
    let _deregister = Deregister {
        server: server.clone(),
        id: connection_id,
    };

    let mut ctx = CommandCtx {
        client_id: Some(connection_id),
        ..CommandCtx::default()
    };
    let mut buf = BytesMut::with_capacity(16 * 1024);
    let mut chunk = [0u8; 16 * 1024];

    loop {
        let command = loop {
            match resp::parse_command(&buf, true) {
                Ok(Some((args, used))) => {
                    buf.advance(used);
                    if args.is_empty() {
                        continue;
                    }
                    break args;
                }
                Ok(None) => {
                    let n = stream.read(&mut chunk).await?;
                    if n == 0 {
                        return Ok(());
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                Err(err) => {
                    // framing errors are unrecoverable on a live connection
                    write_reply(
                        &mut stream,
                        &ctx,
                        &Value::Error(err.to_string()),
                        std::time::Duration::ZERO,
                    )
                    .await?;
                    return Ok(());
                }
            }
        };

        let started = std::time::Instant::now();
        let verb = command[0].to_lowercase();
        ctx.action = None;
        let reply = server.execute(command, &mut ctx);
        metrics::histogram!("cmd_duration_seconds", "cmd" => verb)
            .record(started.elapsed().as_secs_f64());

        write_reply(&mut stream, &ctx, &reply, started.elapsed()).await?;
        if kill.load(Ordering::SeqCst) {
            debug!(connection_id, "connection killed");
            return Ok(());
        }

        match ctx.action.take() {
            None => {}
            Some(ConnAction::Quit) => return Ok(()),
            Some(ConnAction::Subscribe(channels)) => {
                return subscriber_loop(stream, server, channels, Vec::new(), None).await;
            }
            Some(ConnAction::PSubscribe(patterns)) => {
                return subscriber_loop(stream, server, Vec::new(), patterns, None).await;
            }
            Some(ConnAction::LiveFence(channel)) => {
                debug!(connection_id, channel = %channel, "live fence attached");
                return subscriber_loop(
                    stream,
                    server,
                    vec![channel.clone()],
                    Vec::new(),
                    Some(channel),
                )
                .await;
            }
            Some(ConnAction::StreamAof(pos)) => {
                return stream_aof(stream, server, pos).await;
            }
            Some(ConnAction::Monitor) => {
                return monitor_loop(stream, server).await;
            }
        }
    }
}

/// Removes the connection from the client registry on any exit path.
struct Deregister {
    server: Arc<Server>,
    id: u64,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.server.clients.lock().remove(&self.id);
    }
}

/// Forward every dispatched command to the peer until it goes away.
async fn monitor_loop(stream: TcpStream, server: &Arc<Server>) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut rx = server.monitor.subscribe();
    let mut sink = [0u8; 512];
    loop {
        tokio::select! {
            line = rx.recv() => {
                match line {
                    Ok(line) => {
                        let mut out = Vec::new();
                        Value::Simple(line).encode(&mut out);
                        if writer.write_all(&out).await.is_err() {
                            return Ok(());
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(_) => return Ok(()),
                }
            }
            read = reader.read(&mut sink) => {
                match read {
                    Ok(0) | Err(_) => return Ok(()),
                    Ok(_) => {} // monitor peers only ever disconnect
                }
            }
        }
    }
}

fn confirm_frame(kind: &str, name: &str, count: usize) -> Vec<u8> {
    let frame = Value::Array(vec![
        Value::Bulk(kind.to_string()),
        Value::Bulk(name.to_string()),
        Value::Int(count as i64),
    ]);
    let mut out = Vec::new();
    frame.encode(&mut out);
    out
}

/// Deliver pub/sub traffic until the peer goes away. A live fence's
/// ephemeral hook is deleted when its connection ends.
async fn subscriber_loop(
    stream: TcpStream,
    server: &Arc<Server>,
    channels: Vec<String>,
    patterns: Vec<String>,
    fence_hook: Option<String>,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut subs = Subscriptions::default();
    let mut rx = server.pubsub.subscribe();

    for name in &channels {
        subs.add_channel(name);
        writer
            .write_all(&confirm_frame("subscribe", name, subs.count()))
            .await?;
    }
    for pattern in &patterns {
        if let Ok(glob) = Glob::new(pattern) {
            subs.add_pattern(glob);
        }
        writer
            .write_all(&confirm_frame("psubscribe", pattern, subs.count()))
            .await?;
    }

    let mut buf = BytesMut::new();
    let mut chunk = [0u8; 4096];
    loop {
        tokio::select! {
            envelope = rx.recv() => {
                match envelope {
                    Ok(e) if subs.wants(&e.channel) => {
                        let frame = Value::Array(vec![
                            Value::Bulk("message".to_string()),
                            Value::Bulk(e.channel),
                            Value::Bulk(e.payload),
                        ]);
                        let mut out = Vec::new();
                        frame.encode(&mut out);
                        if writer.write_all(&out).await.is_err() {
                            return cleanup_fence(server, fence_hook);
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "subscriber lagged, events dropped");
                    }
                    Err(_) => return cleanup_fence(server, fence_hook),
                }
            }
            read = reader.read(&mut chunk) => {
                let n = match read {
                    Ok(0) => return cleanup_fence(server, fence_hook),
                    Ok(n) => n,
                    Err(_) => return cleanup_fence(server, fence_hook),
                };
                buf.extend_from_slice(&chunk[..n]);
                loop {
                    match resp::parse_command(&buf, true) {
                        Ok(Some((args, used))) => {
                            buf.advance(used);
                            if args.is_empty() {
                                continue;
                            }
                            match args[0].to_uppercase().as_str() {
                                "SUBSCRIBE" => {
                                    for name in &args[1..] {
                                        subs.add_channel(name);
                                        writer
                                            .write_all(&confirm_frame("subscribe", name, subs.count()))
                                            .await?;
                                    }
                                }
                                "PSUBSCRIBE" => {
                                    for pattern in &args[1..] {
                                        if let Ok(glob) = Glob::new(pattern) {
                                            subs.add_pattern(glob);
                                        }
                                        writer
                                            .write_all(&confirm_frame("psubscribe", pattern, subs.count()))
                                            .await?;
                                    }
                                }
                                "PING" => {
                                    let mut out = Vec::new();
                                    Value::Simple("PONG".to_string()).encode(&mut out);
                                    writer.write_all(&out).await?;
                                }
                                "QUIT" => return cleanup_fence(server, fence_hook),
                                other => {
                                    let mut out = Vec::new();
                                    Value::Error(Error::Other(format!(
                                        "only SUBSCRIBE / PSUBSCRIBE / PING / QUIT allowed in this context, got '{other}'"
                                    ))
                                    .to_string())
                                    .encode(&mut out);
                                    writer.write_all(&out).await?;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(_) => return cleanup_fence(server, fence_hook),
                    }
                }
            }
        }
    }
}

fn cleanup_fence(server: &Arc<Server>, fence_hook: Option<String>) -> Result<()> {
    if let Some(name) = fence_hook {
        server.db.write().hooks.remove(&name);
        debug!(channel = %name, "live fence detached");
    }
    Ok(())
}

/// Stream the log from `pos`, then every append as it happens. Followers
/// sit on this until the connection breaks.
async fn stream_aof(mut stream: TcpStream, server: &Arc<Server>, pos: u64) -> Result<()> {
    let mut rx = server.aof_written.subscribe();
    let mut sent = pos;

    loop {
        let size = server.aof_size.load(Ordering::SeqCst);
        if size < sent {
            // the log was rewritten underneath us; the follower must
            // re-handshake from scratch
            return Ok(());
        }
        while sent < size {
            let chunk_len = (size - sent).min(64 * 1024);
            let bytes = {
                let mut aof = server.aof.lock();
                match aof.read_range(sent, chunk_len) {
                    Ok(b) => b,
                    Err(_) => return Ok(()),
                }
            };
            stream.write_all(&bytes).await?;
            sent += chunk_len;
        }
        match rx.recv().await {
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(_) => return Ok(()),
        }
    }
}

async fn write_reply(
    stream: &mut TcpStream,
    ctx: &CommandCtx,
    reply: &Value,
    elapsed: std::time::Duration,
) -> Result<()> {
    let mut out = Vec::new();
    match ctx.output {
        OutputMode::Resp => reply.encode(&mut out),
        OutputMode::Json => {
            let elapsed = format!("{elapsed:?}");
            let envelope = match reply {
                Value::Error(msg) => serde_json::json!({
                    "ok": false,
                    "err": msg,
                    "elapsed": elapsed,
                }),
                other => serde_json::json!({
                    "ok": true,
                    "result": other.to_json(),
                    "elapsed": elapsed,
                }),
            };
            Value::Bulk(envelope.to_string()).encode(&mut out);
        }
    }
    stream.write_all(&out).await?;
    Ok(())
}

/// TCP keepalive with the configured idle seconds.
fn set_keepalive(stream: &TcpStream, secs: u64) {
    #[cfg(unix)]
    {
        use std::os::fd::AsRawFd;
        let fd = stream.as_raw_fd();
        let on: libc::c_int = 1;
        unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_KEEPALIVE,
                &on as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
            #[cfg(target_os = "linux")]
            {
                let idle = secs.min(i32::MAX as u64) as libc::c_int;
                libc::setsockopt(
                    fd,
                    libc::IPPROTO_TCP,
                    libc::TCP_KEEPIDLE,
                    &idle as *const _ as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                );
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (stream, secs);
    }
}
