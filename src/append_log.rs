//! The append-only command log and its replay. One record per line:
//! `<monotonic_seconds>,<command_name>,<arg1>,<arg2>,…`, with commas,
//! backslashes, and newlines inside an argument backslash-escaped so a
//! record's field boundaries are unambiguous even when an argument itself
//! contains a comma or newline.

use crate::engine::Engine;
use crate::error::Error;
use bytes::Bytes;
use log::warn;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Wraps the log file path. The file is opened fresh for each write rather
/// than held open, so writes from independent connections interleave at
/// the OS append-write level rather than through shared state here.
pub struct AppendLog {
    path: PathBuf,
    enabled: bool,
}

impl AppendLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), enabled: true }
    }

    /// A log that accepts `append` calls and silently drops them — used by
    /// tests that exercise the dispatcher without touching the filesystem.
    pub fn disabled(path: &Path) -> Self {
        Self { path: path.to_path_buf(), enabled: false }
    }

    /// Appends one record. Failures are logged and swallowed: a full disk
    /// or a permissions error must never surface to the client that
    /// triggered the write.
    pub fn append(&self, timestamp: f64, command: &str, args: &[Bytes]) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.try_append(timestamp, command, args) {
            warn!("append log write failed: {e}");
        }
    }

    fn try_append(&self, timestamp: f64, command: &str, args: &[Bytes]) -> std::io::Result<()> {
        let mut line = Vec::new();
        let mut buf = dtoa::Buffer::new();
        line.extend_from_slice(buf.format(timestamp).as_bytes());
        line.push(b',');
        escape_field(command.as_bytes(), &mut line);
        for arg in args {
            line.push(b',');
            escape_field(arg, &mut line);
        }
        line.push(b'\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&line)
    }

    /// Replays records with timestamp ≥ `after`. Calls engine methods
    /// directly rather than going through `dispatch`, so replayed commands
    /// are not themselves re-appended to the log.
    pub fn replay(&self, after: f64, engine: &mut Engine) -> Result<usize, Error> {
        let contents = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut replayed = 0usize;
        for line in contents.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            let fields = unescape_record(line);
            let Some((timestamp, rest)) = fields.split_first() else {
                continue;
            };
            let Some(ts) = std::str::from_utf8(timestamp).ok().and_then(|s| s.parse::<f64>().ok()) else {
                continue;
            };
            if ts < after {
                continue;
            }
            let Some((name, args)) = rest.split_first() else {
                continue;
            };
            if replay_record(name, args, ts, engine) {
                replayed += 1;
            }
        }
        Ok(replayed)
    }
}

/// Applies one decoded record directly against the engine, mirroring the
/// skip rule for already-elapsed `set` expirations. Returns whether the
/// record was applied.
fn replay_record(name: &[u8], args: &[Vec<u8>], ts: f64, engine: &mut Engine) -> bool {
    let args: Vec<Bytes> = args.iter().map(|a| Bytes::copy_from_slice(a)).collect();
    match name {
        b"set" => {
            if set_already_elapsed(&args, ts, engine.now()) {
                return false;
            }
            engine.set(&args).is_ok()
        }
        b"expire" => {
            if args.len() != 2 {
                return false;
            }
            match crate::engine::parse_int(&args[1]) {
                Ok(seconds) => {
                    engine.expire(&args[0], seconds);
                    true
                }
                Err(_) => false,
            }
        }
        b"zadd" => engine.zadd(&args).is_ok(),
        _ => false,
    }
}

/// True if the record's own `EX`/`PX` duration, measured from its
/// timestamp, has already elapsed by `now`.
fn set_already_elapsed(args: &[Bytes], record_ts: f64, now: f64) -> bool {
    let mut i = 2;
    while i < args.len() {
        let tok = &args[i];
        if tok.eq_ignore_ascii_case(b"ex") {
            if let Some(raw) = args.get(i + 1) {
                if let Ok(secs) = crate::engine::parse_int(raw) {
                    return record_ts + secs as f64 <= now;
                }
            }
            return false;
        } else if tok.eq_ignore_ascii_case(b"px") {
            if let Some(raw) = args.get(i + 1) {
                if let Ok(ms) = crate::engine::parse_int(raw) {
                    return record_ts + ms as f64 / 1000.0 <= now;
                }
            }
            return false;
        } else if tok.eq_ignore_ascii_case(b"nx") || tok.eq_ignore_ascii_case(b"xx") {
            i += 1;
        } else {
            i += 1;
        }
    }
    false
}

fn escape_field(field: &[u8], out: &mut Vec<u8>) {
    for &b in field {
        match b {
            b',' | b'\\' | b'\n' | b'\r' => {
                out.push(b'\\');
                out.push(b);
            }
            _ => out.push(b),
        }
    }
}

/// Splits one unescaped record line into its comma-delimited fields,
/// reversing `escape_field`.
fn unescape_record(line: &[u8]) -> Vec<Vec<u8>> {
    let mut fields = Vec::new();
    let mut current = Vec::new();
    let mut i = 0;
    while i < line.len() {
        match line[i] {
            b'\\' if i + 1 < line.len() => {
                current.push(line[i + 1]);
                i += 2;
            }
            b',' => {
                fields.push(std::mem::take(&mut current));
                i += 1;
            }
            b => {
                current.push(b);
                i += 1;
            }
        }
    }
    fields.push(current);
    fields
}
