//! Server state and the command execution path.
//!
//! All shared state hangs off one [`Server`] value owned by `main`:
//! collections plus the expiration map behind a single readers-writer lock,
//! the append-only log behind its own mutex, configuration, pub/sub, and
//! the replication bookkeeping. Commands are classified as writes (exclusive
//! lock, logged, fence-evaluated) or reads (shared lock, deadline-checked);
//! connection- and admin-level verbs are handled here directly.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::aof::AofFile;
use crate::collection::Collection;
use crate::commands;
use crate::config::Config;
use crate::deadline::{Deadline, DeadlineHit};
use crate::error::{Error, Result};
use crate::geofence::Hook;
use crate::pubsub::PubSub;
use crate::resp::Value;

pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// The lock-guarded database aggregate: collections, hook store, and the
/// authoritative expiration map.
#[derive(Default)]
pub struct Db {
    pub collections: BTreeMap<Arc<str>, Collection>,
    pub expires: HashMap<(Arc<str>, Arc<str>), u64>,
    pub hooks: BTreeMap<String, Hook>,
}

impl Db {
    pub fn col(&self, key: &str) -> Option<&Collection> {
        self.collections.get(key)
    }

    pub fn col_mut_or_create(&mut self, key: &str) -> &mut Collection {
        self.collections
            .entry(Arc::from(key))
            .or_insert_with(Collection::new)
    }

    /// Collections vanish when their last object does.
    pub fn drop_if_empty(&mut self, key: &str) {
        if let Some(col) = self.collections.get(key)
            && col.is_empty()
        {
            self.collections.remove(key);
        }
    }

    pub fn is_expired(&self, key: &str, id: &str, now: u64) -> bool {
        self.expires
            .get(&(Arc::from(key), Arc::from(id)))
            .is_some_and(|at| *at <= now)
    }

    pub fn expire_at(&self, key: &str, id: &str) -> Option<u64> {
        self.expires.get(&(Arc::from(key), Arc::from(id))).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OutputMode {
    #[default]
    Resp,
    Json,
}

/// Requests a command makes of its connection, acted on by the socket
/// server after the reply is written.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnAction {
    Quit,
    Subscribe(Vec<String>),
    PSubscribe(Vec<String>),
    /// Switch the connection into log streaming starting at this offset.
    StreamAof(u64),
    /// Live fence: the connection subscribes to this ephemeral channel.
    LiveFence(String),
    /// Switch the connection into the command monitor stream.
    Monitor,
}

/// One registered connection, for CLIENT LIST/KILL.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: u64,
    pub addr: String,
    pub name: String,
    /// Set by CLIENT KILL; the connection loop checks it between commands.
    pub kill: Arc<AtomicBool>,
}

/// Per-execution context: connection output mode, auth state, and the
/// replay/internal flags that relax gates for trusted paths.
#[derive(Default)]
pub struct CommandCtx {
    pub output: OutputMode,
    pub authenticated: bool,
    /// Replaying the log at boot: no re-append, no fence events.
    pub replaying: bool,
    /// Trusted internal mutation (expiration purge, follower apply).
    pub internal: bool,
    pub deadline: Deadline,
    pub action: Option<ConnAction>,
    /// Registered connection id, when the command arrived over a socket.
    pub client_id: Option<u64>,
}

impl CommandCtx {
    pub fn replay() -> Self {
        Self {
            replaying: true,
            internal: true,
            authenticated: true,
            ..Self::default()
        }
    }

    pub fn internal() -> Self {
        Self {
            internal: true,
            authenticated: true,
            ..Self::default()
        }
    }
}

pub struct ExpireEntry {
    pub key: Arc<str>,
    pub id: Arc<str>,
    pub at: u64,
}

pub struct Server {
    pub dir: PathBuf,
    pub db: RwLock<Db>,
    pub config: RwLock<Config>,
    pub aof: Mutex<AofFile>,
    pub aof_size: AtomicU64,
    /// Wakes log tailers; carries the new log size.
    pub aof_written: broadcast::Sender<u64>,
    pub pubsub: PubSub,
    /// Flat sampling list for the expiration task; the map in [`Db`] stays
    /// authoritative, stale entries here are filtered at purge time.
    pub expires_list: Mutex<Vec<ExpireEntry>>,
    /// Bumped on FOLLOW reconfiguration; stale follower loops see the
    /// mismatch and abort.
    pub follow_generation: AtomicU64,
    pub caught_up: AtomicBool,
    pub connected_clients: AtomicI64,
    pub clients: Mutex<HashMap<u64, ClientInfo>>,
    /// Every dispatched command, formatted for MONITOR subscribers.
    pub monitor: broadcast::Sender<String>,
    pub started: Instant,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Open the data directory, replay the log, and stand the server up.
    pub fn open(dir: &Path) -> anyhow::Result<Arc<Self>> {
        let config = Config::load(dir)?;
        let aof = AofFile::open(dir).map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let aof_size = aof.size();
        let (aof_written, _) = broadcast::channel(1024);
        let (monitor, _) = broadcast::channel(1024);

        let server = Arc::new(Self {
            dir: dir.to_path_buf(),
            db: RwLock::new(Db::default()),
            config: RwLock::new(config),
            aof: Mutex::new(aof),
            aof_size: AtomicU64::new(aof_size),
            aof_written,
            pubsub: PubSub::new(),
            expires_list: Mutex::new(Vec::new()),
            follow_generation: AtomicU64::new(0),
            caught_up: AtomicBool::new(true),
            connected_clients: AtomicI64::new(0),
            clients: Mutex::new(HashMap::new()),
            monitor,
            started: Instant::now(),
        });

        server.replay_log()?;
        server.rebuild_expires_list();

        if server.config.read().following() {
            server.caught_up.store(false, Ordering::SeqCst);
        }
        Ok(server)
    }

    fn replay_log(self: &Arc<Self>) -> anyhow::Result<()> {
        let path = self.dir.join(crate::aof::AOF_FILE);
        let started = Instant::now();
        let stats = crate::aof::replay(&path, |args| {
            let mut ctx = CommandCtx::replay();
            self.try_execute(args, &mut ctx).map(|_| ())
        })
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("invalid aof file")?;
        if stats.commands > 0 {
            info!(
                commands = stats.commands,
                skipped = stats.skipped,
                elapsed = ?started.elapsed(),
                "log replayed"
            );
        }
        Ok(())
    }

    /// Discard in-memory state and rebuild it from the (possibly just
    /// truncated) log. Used when the follower handshake finds divergence.
    pub fn reset_and_replay(self: &Arc<Self>) -> Result<()> {
        {
            let mut db = self.db.write();
            *db = Db::default();
        }
        self.replay_log().map_err(|e| Error::Other(e.to_string()))?;
        self.rebuild_expires_list();
        Ok(())
    }

    /// Materialize the sampling list from the authoritative map.
    pub fn rebuild_expires_list(&self) {
        let db = self.db.read();
        let mut list = self.expires_list.lock();
        list.clear();
        for ((key, id), at) in &db.expires {
            list.push(ExpireEntry {
                key: key.clone(),
                id: id.clone(),
                at: *at,
            });
        }
    }

    pub fn push_expire_entry(&self, key: Arc<str>, id: Arc<str>, at: u64) {
        self.expires_list.lock().push(ExpireEntry { key, id, at });
    }

    /// Execute a command, converting every failure (including a deadline
    /// unwind) into a wire-level error value.
    pub fn execute(self: &Arc<Self>, args: Vec<String>, ctx: &mut CommandCtx) -> Value {
        let verb = args.first().map(|s| s.to_lowercase()).unwrap_or_default();
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.try_execute(args, ctx)
        }));
        let result = match caught {
            Ok(result) => result,
            Err(payload) => {
                if payload.downcast_ref::<DeadlineHit>().is_some() {
                    Err(Error::Timeout)
                } else {
                    error!(verb = %verb, "command handler panicked");
                    Err(Error::Other("internal error".to_string()))
                }
            }
        };
        match result {
            Ok(value) => value,
            Err(err) => Value::Error(err.to_string()),
        }
    }

    pub fn try_execute(self: &Arc<Self>, args: Vec<String>, ctx: &mut CommandCtx) -> Result<Value> {
        if args.is_empty() {
            return Err(Error::UnknownCommand(String::new()));
        }
        let verb = args[0].to_uppercase();
        metrics::counter!("commands_total", "cmd" => verb.to_lowercase()).increment(1);
        if verb != "MONITOR" && self.monitor.receiver_count() > 0 {
            // simple-string framing cannot carry line breaks
            let line = args.join(" ").replace(['\r', '\n'], " ");
            let _ = self.monitor.send(line);
        }

        // verbs that work before AUTH
        match verb.as_str() {
            "PING" => return Ok(Value::Simple("PONG".to_string())),
            "QUIT" => {
                ctx.action = Some(ConnAction::Quit);
                return Ok(Value::ok());
            }
            "AUTH" => return self.cmd_auth(&args, ctx),
            "OUTPUT" => return self.cmd_output(&args, ctx),
            _ => {}
        }

        if !ctx.authenticated && !self.config.read().requirepass.is_empty() {
            return Err(Error::AuthRequired);
        }

        match verb.as_str() {
            "SERVER" => return self.cmd_server(&args),
            "INFO" => return self.cmd_info(&args),
            "HEALTHZ" => {
                if self.config.read().following() && !self.caught_up.load(Ordering::SeqCst) {
                    return Err(Error::CatchingUp);
                }
                return Ok(Value::ok());
            }
            "CONFIG" => return self.cmd_config(&args),
            "READONLY" => return self.cmd_readonly(&args),
            "GC" => {
                info!("garbage collection requested");
                metrics::counter!("gc_requests_total").increment(1);
                return Ok(Value::ok());
            }
            "FOLLOW" => return self.cmd_follow(&args),
            "AOF" => return self.cmd_aof(&args, ctx),
            "AOFMD5" => return self.cmd_aofmd5(&args),
            "AOFSHRINK" => return self.cmd_aofshrink(&args),
            "PUBLISH" => return self.cmd_publish(&args),
            "CLIENT" => return self.cmd_client(&args, ctx),
            "MONITOR" => {
                ctx.action = Some(ConnAction::Monitor);
                return Ok(Value::ok());
            }
            "SUBSCRIBE" => {
                if args.len() < 2 {
                    return Err(Error::ArgCount("subscribe".to_string()));
                }
                ctx.action = Some(ConnAction::Subscribe(args[1..].to_vec()));
                return Ok(Value::ok());
            }
            "PSUBSCRIBE" => {
                if args.len() < 2 {
                    return Err(Error::ArgCount("psubscribe".to_string()));
                }
                ctx.action = Some(ConnAction::PSubscribe(args[1..].to_vec()));
                return Ok(Value::ok());
            }
            _ => {}
        }

        if commands::is_write(&verb) || commands::is_fence_registration(&verb, &args) {
            self.exec_write(&verb, args, ctx)
        } else if commands::is_read(&verb) {
            self.exec_read(&verb, &args, ctx)
        } else {
            Err(Error::UnknownCommand(args[0].clone()))
        }
    }

    fn exec_write(self: &Arc<Self>, verb: &str, args: Vec<String>, ctx: &mut CommandCtx) -> Result<Value> {
        if !ctx.internal {
            let config = self.config.read();
            if config.is_read_only() || config.following() {
                return Err(Error::ReadOnly);
            }
            let maxmemory = config.maxmemory_bytes();
            drop(config);
            if maxmemory > 0 && process_memory() > maxmemory {
                return Err(Error::OutOfMemory);
            }
        }

        let mut db = self.db.write();
        let outcome = commands::dispatch_write(self, &mut db, verb, &args, ctx)?;
        if !ctx.replaying {
            self.commit_outcome(&outcome)?;
        }
        drop(db);
        Ok(outcome.reply)
    }

    /// Log records and deliver fence events for a completed mutation. Runs
    /// while the write lock is held so subscribers observe events in
    /// mutation-commit order.
    pub(crate) fn commit_outcome(&self, outcome: &commands::WriteOutcome) -> Result<()> {
        if let Some(records) = &outcome.aof {
            let mut aof = self.aof.lock();
            let mut size = self.aof_size.load(Ordering::SeqCst);
            for record in records {
                size = aof.append(record, false)?;
            }
            self.aof_size.store(size, Ordering::SeqCst);
            let _ = self.aof_written.send(size);
        }
        for event in &outcome.events {
            if let Some(channel) = &event.channel {
                self.pubsub.publish(channel, &event.payload);
            }
            if let Some(endpoint) = &event.endpoint {
                // endpoint drivers (HTTP, queues) are wired in externally;
                // the core records the delivery intent
                metrics::counter!("fence_endpoint_events_total").increment(1);
                tracing::debug!(endpoint = %endpoint, "fence event for endpoint");
            }
        }
        Ok(())
    }

    fn exec_read(self: &Arc<Self>, verb: &str, args: &[String], ctx: &mut CommandCtx) -> Result<Value> {
        if !ctx.internal
            && self.config.read().following()
            && !self.caught_up.load(Ordering::SeqCst)
        {
            return Err(Error::CatchingUp);
        }
        let db = self.db.read();
        commands::dispatch_read(self, &db, verb, args, ctx)
    }

    fn cmd_auth(&self, args: &[String], ctx: &mut CommandCtx) -> Result<Value> {
        if args.len() != 2 {
            return Err(Error::ArgCount("auth".to_string()));
        }
        let config = self.config.read();
        if config.requirepass.is_empty() {
            return Err(Error::Other("Client sent AUTH, but no password is set".to_string()));
        }
        if config.requirepass != args[1] {
            return Err(Error::InvalidPassword);
        }
        ctx.authenticated = true;
        Ok(Value::ok())
    }

    fn cmd_output(&self, args: &[String], ctx: &mut CommandCtx) -> Result<Value> {
        match args.len() {
            1 => Ok(Value::Bulk(
                match ctx.output {
                    OutputMode::Resp => "resp",
                    OutputMode::Json => "json",
                }
                .to_string(),
            )),
            2 => {
                match args[1].to_lowercase().as_str() {
                    "resp" => ctx.output = OutputMode::Resp,
                    "json" => ctx.output = OutputMode::Json,
                    other => return Err(Error::InvalidArgument(other.to_string())),
                }
                Ok(Value::ok())
            }
            _ => Err(Error::ArgCount("output".to_string())),
        }
    }

    /// SERVER: stats document consumed by humans and by the follower
    /// handshake (id + aof_size).
    fn cmd_server(&self, args: &[String]) -> Result<Value> {
        if args.len() != 1 {
            return Err(Error::ArgCount("server".to_string()));
        }
        let db = self.db.read();
        let config = self.config.read();
        let mut objects = 0usize;
        let mut points = 0u64;
        let mut strings = 0u64;
        for col in db.collections.values() {
            objects += col.count();
            points += col.point_count();
            strings += col.string_count();
        }
        let doc = json!({
            "id": config.server_id,
            "aof_size": self.aof_size.load(Ordering::SeqCst),
            "num_collections": db.collections.len(),
            "num_objects": objects,
            "num_points": points,
            "num_strings": strings,
            "num_hooks": db.hooks.len(),
            "mem_alloc": process_memory(),
            "following": if config.following() {
                format!("{}:{}", config.follow_host, config.follow_port)
            } else {
                String::new()
            },
            "caught_up": self.caught_up.load(Ordering::SeqCst),
            "read_only": config.is_read_only(),
            "uptime_secs": self.started.elapsed().as_secs(),
        });
        Ok(Value::Bulk(doc.to_string()))
    }

    fn cmd_info(&self, args: &[String]) -> Result<Value> {
        if args.len() > 2 {
            return Err(Error::ArgCount("info".to_string()));
        }
        let config = self.config.read();
        let role = if config.following() { "slave" } else { "master" };
        let text = format!(
            "# Server\r\nversion:{}\r\nserver_id:{}\r\nuptime_in_seconds:{}\r\n\r\n# Clients\r\nconnected_clients:{}\r\n\r\n# Replication\r\nrole:{}\r\naof_size:{}\r\n",
            env!("CARGO_PKG_VERSION"),
            config.server_id,
            self.started.elapsed().as_secs(),
            self.connected_clients.load(Ordering::SeqCst),
            role,
            self.aof_size.load(Ordering::SeqCst),
        );
        Ok(Value::Bulk(text))
    }

    fn cmd_config(&self, args: &[String]) -> Result<Value> {
        if args.len() < 2 {
            return Err(Error::ArgCount("config".to_string()));
        }
        match args[1].to_uppercase().as_str() {
            "GET" => {
                if args.len() != 3 {
                    return Err(Error::ArgCount("config".to_string()));
                }
                let config = self.config.read();
                let props = config
                    .get_matching(&args[2])
                    .map_err(|e| Error::Other(e.to_string()))?;
                let mut out = Vec::with_capacity(props.len() * 2);
                for (name, value) in props {
                    out.push(Value::Bulk(name.to_string()));
                    out.push(Value::Bulk(value));
                }
                Ok(Value::Array(out))
            }
            "SET" => {
                if !(3..=4).contains(&args.len()) {
                    return Err(Error::ArgCount("config".to_string()));
                }
                let value = args.get(3).map(|s| s.as_str()).unwrap_or("");
                let mut config = self.config.write();
                config.set_property(&args[2], value)?;
                config
                    .save(&self.dir)
                    .map_err(|e| Error::Other(e.to_string()))?;
                Ok(Value::ok())
            }
            "REWRITE" => {
                let config = self.config.read();
                config
                    .save(&self.dir)
                    .map_err(|e| Error::Other(e.to_string()))?;
                Ok(Value::ok())
            }
            other => Err(Error::InvalidArgument(other.to_string())),
        }
    }

    fn cmd_readonly(&self, args: &[String]) -> Result<Value> {
        if args.len() != 2 {
            return Err(Error::ArgCount("readonly".to_string()));
        }
        let mut config = self.config.write();
        match args[1].to_lowercase().as_str() {
            "yes" => config.read_only = "yes".to_string(),
            "no" => config.read_only = "no".to_string(),
            other => return Err(Error::InvalidArgument(other.to_string())),
        }
        config
            .save(&self.dir)
            .map_err(|e| Error::Other(e.to_string()))?;
        Ok(Value::ok())
    }

    fn cmd_follow(self: &Arc<Self>, args: &[String]) -> Result<Value> {
        if args.len() != 3 {
            return Err(Error::ArgCount("follow".to_string()));
        }
        let host = args[1].to_lowercase();
        if host == "no" && args[2].to_lowercase() == "one" {
            {
                let mut config = self.config.write();
                config.follow_host = String::new();
                config.follow_port = 0;
                config
                    .save(&self.dir)
                    .map_err(|e| Error::Other(e.to_string()))?;
            }
            self.follow_generation.fetch_add(1, Ordering::SeqCst);
            self.caught_up.store(true, Ordering::SeqCst);
            info!("no longer following");
            return Ok(Value::ok());
        }
        let port: u16 = args[2]
            .parse()
            .map_err(|_| Error::InvalidArgument(args[2].clone()))?;
        {
            let mut config = self.config.write();
            config.follow_host = args[1].clone();
            config.follow_port = port;
            config
                .save(&self.dir)
                .map_err(|e| Error::Other(e.to_string()))?;
        }
        self.caught_up.store(false, Ordering::SeqCst);
        let generation = self.follow_generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(host = %args[1], port, "following leader");

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let server = self.clone();
            handle.spawn(async move {
                crate::follower::run(server, generation).await;
            });
        } else {
            warn!("no async runtime; follower loop not started");
        }
        Ok(Value::ok())
    }

    fn cmd_aof(&self, args: &[String], ctx: &mut CommandCtx) -> Result<Value> {
        if args.len() != 2 {
            return Err(Error::ArgCount("aof".to_string()));
        }
        let pos: u64 = args[1]
            .parse()
            .map_err(|_| Error::InvalidArgument(args[1].clone()))?;
        if pos > self.aof_size.load(Ordering::SeqCst) {
            return Err(Error::Other("pos is too big, must be less than the aof_size of leader".to_string()));
        }
        ctx.action = Some(ConnAction::StreamAof(pos));
        Ok(Value::ok())
    }

    fn cmd_aofmd5(&self, args: &[String]) -> Result<Value> {
        if args.len() != 3 {
            return Err(Error::ArgCount("aofmd5".to_string()));
        }
        let pos: u64 = args[1]
            .parse()
            .map_err(|_| Error::InvalidArgument(args[1].clone()))?;
        let len: u64 = args[2]
            .parse()
            .map_err(|_| Error::InvalidArgument(args[2].clone()))?;
        let digest = self.aof.lock().md5_range(pos, len)?;
        Ok(Value::Bulk(digest))
    }

    fn cmd_aofshrink(self: &Arc<Self>, args: &[String]) -> Result<Value> {
        if args.len() != 1 {
            return Err(Error::ArgCount("aofshrink".to_string()));
        }
        let db = self.db.write();
        let commands = commands::shrink_commands(&db);
        let mut aof = self.aof.lock();
        let size = aof.rewrite(commands)?;
        self.aof_size.store(size, Ordering::SeqCst);
        // tailing followers must re-handshake against the rewritten log
        self.follow_generation.fetch_add(1, Ordering::SeqCst);
        drop(aof);
        drop(db);
        Ok(Value::ok())
    }

    fn cmd_client(&self, args: &[String], ctx: &CommandCtx) -> Result<Value> {
        if args.len() < 2 {
            return Err(Error::ArgCount("client".to_string()));
        }
        match args[1].to_uppercase().as_str() {
            "LIST" => {
                let clients = self.clients.lock();
                let mut lines = String::new();
                for info in clients.values() {
                    lines.push_str(&format!(
                        "id={} addr={} name={}\n",
                        info.id, info.addr, info.name
                    ));
                }
                Ok(Value::Bulk(lines))
            }
            "GETNAME" => {
                let clients = self.clients.lock();
                let name = ctx
                    .client_id
                    .and_then(|id| clients.get(&id))
                    .map(|info| info.name.clone())
                    .unwrap_or_default();
                Ok(Value::Bulk(name))
            }
            "SETNAME" => {
                let name = args.get(2).ok_or_else(|| Error::ArgCount("client".to_string()))?;
                if name.contains(' ') || name.contains('\n') {
                    return Err(Error::InvalidArgument(name.clone()));
                }
                let Some(id) = ctx.client_id else {
                    return Err(Error::Other("no client connection".to_string()));
                };
                let mut clients = self.clients.lock();
                if let Some(info) = clients.get_mut(&id) {
                    info.name = name.clone();
                }
                Ok(Value::ok())
            }
            "KILL" => {
                let target = args.get(2).ok_or_else(|| Error::ArgCount("client".to_string()))?;
                let target = target.strip_prefix("id=").unwrap_or(target);
                let clients = self.clients.lock();
                let found = clients
                    .values()
                    .find(|info| info.id.to_string() == *target || info.addr == *target);
                match found {
                    Some(info) => {
                        info.kill.store(true, Ordering::SeqCst);
                        Ok(Value::ok())
                    }
                    None => Err(Error::Other("No such client".to_string())),
                }
            }
            other => Err(Error::InvalidArgument(other.to_string())),
        }
    }

    fn cmd_publish(&self, args: &[String]) -> Result<Value> {
        if args.len() != 3 {
            return Err(Error::ArgCount("publish".to_string()));
        }
        let receivers = self.pubsub.publish(&args[1], &args[2]);
        Ok(Value::Int(receivers as i64))
    }
}

/// Resident set size in bytes, used for the maxmemory write gate.
pub fn process_memory() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm")
            && let Some(rss_pages) = statm.split_whitespace().nth(1)
            && let Ok(pages) = rss_pages.parse::<u64>()
        {
            return pages * 4096;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_server() -> (Arc<Server>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let server = Server::open(dir.path()).unwrap();
        (server, dir)
    }

    fn exec(server: &Arc<Server>, tokens: &[&str]) -> Value {
        let args: Vec<String> = tokens.iter().map(|s| s.to_string()).collect();
        server.execute(args, &mut CommandCtx::default())
    }

    #[test]
    fn ping_and_unknown() {
        let (server, _dir) = test_server();
        assert_eq!(exec(&server, &["PING"]), Value::Simple("PONG".to_string()));
        match exec(&server, &["BLORP"]) {
            Value::Error(msg) => assert_eq!(msg, "unknown command 'BLORP'"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn write_then_restart_replays() {
        let dir = tempfile::tempdir().unwrap();
        {
            let server = Server::open(dir.path()).unwrap();
            assert_eq!(
                exec(&server, &["SET", "fleet", "truck1", "POINT", "33", "-115"]),
                Value::ok()
            );
            assert_eq!(exec(&server, &["SET", "fleet", "truck2", "POINT", "34", "-116"]), Value::ok());
            assert_eq!(exec(&server, &["DEL", "fleet", "truck2"]), Value::Int(1));
        }
        let server = Server::open(dir.path()).unwrap();
        match exec(&server, &["GET", "fleet", "truck1", "POINT"]) {
            Value::Array(parts) => {
                assert_eq!(parts[0], Value::Bulk("33".to_string()));
                assert_eq!(parts[1], Value::Bulk("-115".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(exec(&server, &["GET", "fleet", "truck2"]), Value::Null);
    }

    #[test]
    fn readonly_rejects_writes() {
        let (server, _dir) = test_server();
        assert_eq!(exec(&server, &["READONLY", "yes"]), Value::ok());
        match exec(&server, &["SET", "k", "i", "STRING", "v"]) {
            Value::Error(msg) => assert_eq!(msg, "read only"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(exec(&server, &["READONLY", "no"]), Value::ok());
        assert_eq!(exec(&server, &["SET", "k", "i", "STRING", "v"]), Value::ok());
    }

    #[test]
    fn auth_gate() {
        let (server, _dir) = test_server();
        assert_eq!(exec(&server, &["CONFIG", "SET", "requirepass", "hunter2"]), Value::ok());

        let mut ctx = CommandCtx::default();
        let denied = server.execute(
            vec!["GET".to_string(), "k".to_string(), "i".to_string()],
            &mut ctx,
        );
        assert!(matches!(denied, Value::Error(_)));

        let ok = server.execute(
            vec!["AUTH".to_string(), "hunter2".to_string()],
            &mut ctx,
        );
        assert_eq!(ok, Value::ok());
        let allowed = server.execute(
            vec!["GET".to_string(), "k".to_string(), "i".to_string()],
            &mut ctx,
        );
        assert_eq!(allowed, Value::Null);
    }

    #[test]
    fn server_doc_has_identity() {
        let (server, _dir) = test_server();
        match exec(&server, &["SERVER"]) {
            Value::Bulk(body) => {
                let doc: serde_json::Value = serde_json::from_str(&body).unwrap();
                assert!(doc["id"].as_str().is_some());
                assert_eq!(doc["aof_size"], json!(0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
