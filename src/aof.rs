//! The append-only command log.
//!
//! The log is the authoritative record: a straight concatenation of RESP
//! multi-bulk frames, one per committed mutation. Startup replays it
//! through the same dispatch path as live traffic; followers receive the
//! byte stream verbatim and write their own copy. Appends happen before a
//! mutation reports success; fsync is either per-append or deferred to the
//! once-a-second background flush.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::resp;

pub const AOF_FILE: &str = "appendonly.aof";

/// Read window used while replaying.
const REPLAY_BUF: usize = 64 * 1024;

#[derive(Debug)]
pub struct AofFile {
    file: File,
    path: PathBuf,
    size: u64,
}

impl AofFile {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(AOF_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, path, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one command frame. Returns the log size after the append.
    pub fn append(&mut self, args: &[String], sync: bool) -> Result<u64> {
        let frame = resp::encode_command(args);
        self.file.write_all(&frame)?;
        if sync {
            self.file.sync_data()?;
        }
        self.size += frame.len() as u64;
        metrics::counter!("aof_bytes_written_total").increment(frame.len() as u64);
        Ok(self.size)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Read `[pos, pos+len)` from the log.
    pub fn read_range(&mut self, pos: u64, len: u64) -> Result<Vec<u8>> {
        if pos + len > self.size {
            return Err(Error::Other("EOF".to_string()));
        }
        let mut buf = vec![0u8; len as usize];
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.read_exact(&mut buf)?;
        // append handle position is managed by the OS in append mode, but
        // reads move the cursor; put it back for clarity
        self.file.seek(SeekFrom::End(0))?;
        Ok(buf)
    }

    /// Hex MD5 digest of a byte range, for the follower handshake.
    pub fn md5_range(&mut self, pos: u64, len: u64) -> Result<String> {
        let bytes = self.read_range(pos, len)?;
        let mut hasher = Md5::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Truncate to `size` bytes (follower resync found a divergence).
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        self.file.set_len(size)?;
        self.file.seek(SeekFrom::End(0))?;
        self.size = size;
        Ok(())
    }

    /// Replace the log with `commands`, atomically. Used by the shrink
    /// rewrite: the new log expresses only the live state.
    pub fn rewrite<I>(&mut self, commands: I) -> Result<u64>
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        let tmp_path = self.path.with_extension("aof.tmp");
        let mut tmp = File::create(&tmp_path)?;
        let mut written = 0u64;
        for args in commands {
            let frame = resp::encode_command(&args);
            tmp.write_all(&frame)?;
            written += frame.len() as u64;
        }
        tmp.sync_all()?;
        drop(tmp);
        std::fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        self.size = written;
        info!(bytes = written, "log rewritten");
        Ok(written)
    }
}

/// Outcome of a log replay.
#[derive(Debug, Default)]
pub struct ReplayStats {
    pub commands: u64,
    pub skipped: u64,
    pub bytes: u64,
}

/// Replay the log at `path`, handing each complete command to `apply`.
///
/// Framing is incremental with a 64 KiB window. Zero padding and blank
/// records are skipped. A truncated final record is tolerated only at true
/// end-of-file; a framing error anywhere else is fatal. `key not found` and
/// `id not found` from `apply` are counted and skipped; any other error
/// aborts the replay.
pub fn replay<F>(path: &Path, mut apply: F) -> Result<ReplayStats>
where
    F: FnMut(Vec<String>) -> Result<()>,
{
    let mut stats = ReplayStats::default();
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
        Err(err) => return Err(err.into()),
    };

    let mut buf: Vec<u8> = Vec::with_capacity(REPLAY_BUF * 2);
    let mut chunk = [0u8; REPLAY_BUF];
    let mut eof = false;
    loop {
        if !eof {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                eof = true;
            } else {
                buf.extend_from_slice(&chunk[..n]);
            }
        }
        loop {
            match resp::parse_command(&buf, true) {
                Ok(Some((args, used))) => {
                    stats.bytes += used as u64;
                    buf.drain(..used);
                    if args.is_empty() {
                        continue;
                    }
                    stats.commands += 1;
                    match apply(args) {
                        Ok(()) => {}
                        Err(err) if err.harmless_in_replay() => {
                            stats.skipped += 1;
                        }
                        Err(err) => return Err(err),
                    }
                }
                Ok(None) => break,
                Err(err) => return Err(err),
            }
        }
        if eof {
            if !buf.is_empty() {
                // partial trailing record, acceptable at true end-of-file
                warn!(
                    bytes = buf.len(),
                    "log ends with an incomplete record, ignoring tail"
                );
            }
            return Ok(stats);
        }
    }
}
