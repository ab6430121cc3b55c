//! The in-memory data engine: key space, TTL bookkeeping, and the command
//! semantics for `SET`/`GET`/`EXPIRE`/`TTL`/`ZADD`/`ZRANGE`/`ZREVRANGE`/
//! `ZRANK`/`PING`.
//!
//! An `Engine` instance is owned by exactly one task (see `server::run`); no
//! interior mutability or locking is used here, which is what lets every
//! method take `&mut self` and run to completion without contention.

use crate::error::DbError;
use crate::zset::{fix_range, ZSet};
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Instant;

/// A key's value: either an opaque scalar or a sorted set. Mixing
/// operations across variants is a `WrongType` error.
#[derive(Debug)]
pub enum Value {
    Scalar(Vec<u8>),
    ZSetValue(ZSet),
}

/// Outcome of `ZADD`: either the count Redis normally returns, or the new
/// score when `INCR` was given, or `Nil` when a conditional (`NX`/`XX`)
/// blocked the single `INCR` pair from being applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZaddResult {
    Count(i64),
    Score(f64),
    Nil,
}

/// The key space, the TTL table, and the engine's private clock.
///
/// The expiry table only ever holds keys that carry an active TTL — a
/// persistent key (or one whose TTL was just cleared by `SET`) simply has
/// no entry. A `0`-deadline sentinel is deliberately not used here; that
/// representation belongs to the append log's wire format only (see
/// `crate::append_log`), not this in-memory table.
pub struct Engine {
    keyspace: HashMap<Vec<u8>, Value>,
    expiry: HashMap<Vec<u8>, f64>,
    start: Instant,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            keyspace: HashMap::new(),
            expiry: HashMap::new(),
            start: Instant::now(),
        }
    }

    /// Seconds elapsed since the engine started, used as the monotonic
    /// reference clock for deadlines.
    pub fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Passive expiry on read: if the key's deadline has passed, both
    /// tables are scrubbed before the key is reported absent. Returns
    /// whether the key is present and live.
    fn exists_live(&mut self, key: &[u8]) -> bool {
        if let Some(&deadline) = self.expiry.get(key) {
            if deadline < self.now() {
                self.expiry.remove(key);
                self.keyspace.remove(key);
                return false;
            }
        }
        self.keyspace.contains_key(key)
    }

    /// One purger pass: sample up to 20 keys at random from the expiry
    /// table, evict the ones whose deadline has passed, and repeat as long
    /// as more than 25% of the sampled population was evicted.
    pub fn purge(&mut self) {
        loop {
            let pre_len = self.expiry.len();
            if pre_len == 0 {
                break;
            }
            let now = self.now();
            let keys: Vec<Vec<u8>> = self.expiry.keys().cloned().collect();
            let sample_size = pre_len.min(20);
            let mut rng = rand::rng();
            let picks = rand::seq::index::sample(&mut rng, keys.len(), sample_size);

            let mut removed = 0usize;
            for i in picks.iter() {
                let key = &keys[i];
                if let Some(&deadline) = self.expiry.get(key) {
                    if deadline < now {
                        self.expiry.remove(key);
                        self.keyspace.remove(key);
                        removed += 1;
                    }
                }
            }

            if (removed as f64) <= 0.25 * pre_len as f64 {
                break;
            }
        }
    }

    pub fn ping(&self, message: Option<Bytes>) -> Vec<u8> {
        message.map(|b| b.to_vec()).unwrap_or_else(|| b"PONG".to_vec())
    }

    /// `SET key value [EX seconds|PX milliseconds] [NX|XX]`. Returns `true`
    /// on `"OK"`, `false` on a blocked `NX`/`XX` (reply nil).
    pub fn set(&mut self, args: &[Bytes]) -> Result<bool, DbError> {
        if args.len() < 2 {
            return Err(DbError::Syntax(
                "wrong number of arguments for 'set' command".into(),
            ));
        }
        let key = args[0].to_vec();
        let value = args[1].to_vec();

        let mut ex: Option<i64> = None;
        let mut px: Option<i64> = None;
        let mut nx = false;
        let mut xx = false;

        let mut i = 2;
        while i < args.len() {
            let tok = &args[i];
            if tok.eq_ignore_ascii_case(b"nx") {
                nx = true;
                i += 1;
            } else if tok.eq_ignore_ascii_case(b"xx") {
                xx = true;
                i += 1;
            } else if tok.eq_ignore_ascii_case(b"ex") {
                let raw = args
                    .get(i + 1)
                    .ok_or_else(|| DbError::Syntax("syntax error".into()))?;
                let secs = parse_int(raw)?;
                if secs <= 0 {
                    return Err(DbError::Value("invalid expire time in 'set' command".into()));
                }
                ex = Some(secs);
                i += 2;
            } else if tok.eq_ignore_ascii_case(b"px") {
                let raw = args
                    .get(i + 1)
                    .ok_or_else(|| DbError::Syntax("syntax error".into()))?;
                let ms = parse_int(raw)?;
                if ms <= 0 {
                    return Err(DbError::Value("invalid expire time in 'set' command".into()));
                }
                px = Some(ms);
                i += 2;
            } else {
                return Err(DbError::Syntax("syntax error".into()));
            }
        }

        if nx && xx {
            return Err(DbError::Syntax("syntax error".into()));
        }
        if ex.is_some() && px.is_some() {
            return Err(DbError::Syntax("syntax error".into()));
        }

        let exists = self.exists_live(&key);
        if (nx && exists) || (xx && !exists) {
            return Ok(false);
        }

        self.expiry.remove(&key);
        if let Some(secs) = ex {
            self.expiry.insert(key.clone(), self.now() + secs as f64);
        } else if let Some(ms) = px {
            self.expiry.insert(key.clone(), self.now() + ms as f64 / 1000.0);
        }
        self.keyspace.insert(key, Value::Scalar(value));
        Ok(true)
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        if !self.exists_live(key) {
            return Ok(None);
        }
        match self.keyspace.get(key) {
            Some(Value::Scalar(v)) => Ok(Some(v.clone())),
            Some(Value::ZSetValue(_)) => Err(DbError::WrongType),
            None => Ok(None),
        }
    }

    /// `seconds` may be negative, scheduling immediate expiry on the next
    /// read.
    pub fn expire(&mut self, key: &[u8], seconds: i64) -> i64 {
        if !self.exists_live(key) {
            return 0;
        }
        self.expiry.insert(key.to_vec(), self.now() + seconds as f64);
        1
    }

    pub fn ttl(&mut self, key: &[u8]) -> i64 {
        if !self.exists_live(key) {
            return -2;
        }
        match self.expiry.get(key) {
            None => -1,
            Some(&deadline) => (deadline - self.now()).floor() as i64,
        }
    }

    /// `ZADD key [NX|XX] [CH] [INCR] score member [score member ...]`.
    /// `args[0]` is the key; everything after is flags then score/member
    /// pairs. The returned `bool` reports whether the call actually wrote
    /// anything, independent of `ZaddResult` — `Count(0)` without `CH` can
    /// mean "no net new members" even though an existing member's score was
    /// updated, and callers that only append true mutations to a log need
    /// to tell the two apart.
    pub fn zadd(&mut self, args: &[Bytes]) -> Result<(ZaddResult, bool), DbError> {
        if args.is_empty() {
            return Err(DbError::Syntax(
                "wrong number of arguments for 'zadd' command".into(),
            ));
        }
        let key = args[0].to_vec();

        let mut nx = false;
        let mut xx = false;
        let mut ch = false;
        let mut incr = false;
        let mut i = 1;
        while i < args.len() {
            let tok = &args[i];
            if tok.eq_ignore_ascii_case(b"nx") {
                nx = true;
                i += 1;
            } else if tok.eq_ignore_ascii_case(b"xx") {
                xx = true;
                i += 1;
            } else if tok.eq_ignore_ascii_case(b"ch") {
                ch = true;
                i += 1;
            } else if tok.eq_ignore_ascii_case(b"incr") {
                incr = true;
                i += 1;
            } else {
                break;
            }
        }
        if nx && xx {
            return Err(DbError::Syntax(
                "XX and NX options at the same time are not compatible".into(),
            ));
        }

        let rest = &args[i..];
        if rest.is_empty() || rest.len() % 2 != 0 {
            return Err(DbError::Syntax("syntax error".into()));
        }
        if incr && rest.len() != 2 {
            return Err(DbError::Syntax(
                "INCR option supports a single increment-element pair".into(),
            ));
        }

        let mut pairs = Vec::with_capacity(rest.len() / 2);
        for chunk in rest.chunks_exact(2) {
            let score = parse_score(&chunk[0])?;
            pairs.push((score, chunk[1].to_vec()));
        }

        if !self.exists_live(&key) {
            self.keyspace.insert(key.clone(), Value::ZSetValue(ZSet::new()));
        }
        let zset = match self.keyspace.get_mut(&key) {
            Some(Value::ZSetValue(z)) => z,
            Some(Value::Scalar(_)) => return Err(DbError::WrongType),
            None => unreachable!("key materialized above"),
        };

        if incr {
            let (score, member) = pairs.into_iter().next().expect("checked len == 2 above");
            if (nx && zset.contains(&member)) || (xx && !zset.contains(&member)) {
                return Ok((ZaddResult::Nil, false));
            }
            let new_score = score + zset.score_of(&member).unwrap_or(0.0);
            let mutated = zset.add(member, new_score);
            return Ok((ZaddResult::Score(new_score), mutated));
        }

        let prev_len = zset.len();
        let mut changed: i64 = 0;
        for (score, member) in pairs {
            if nx && zset.contains(&member) {
                continue;
            }
            if xx && !zset.contains(&member) {
                continue;
            }
            if zset.add(member, score) {
                changed += 1;
            }
        }
        let mutated = changed > 0;

        if ch {
            Ok((ZaddResult::Count(changed), mutated))
        } else {
            Ok((ZaddResult::Count(zset.len() as i64 - prev_len as i64), mutated))
        }
    }

    /// Shared implementation for `ZRANGE`/`ZREVRANGE`. Returns `(member,
    /// score)` pairs already in the requested order; the caller (the
    /// dispatcher) decides whether to flatten scores into the reply.
    pub fn zrange(
        &mut self,
        key: &[u8],
        start: i64,
        stop: i64,
        reverse: bool,
    ) -> Result<Vec<(Vec<u8>, f64)>, DbError> {
        if !self.exists_live(key) {
            return Ok(Vec::new());
        }
        let zset = match self.keyspace.get(key) {
            Some(Value::ZSetValue(z)) => z,
            Some(Value::Scalar(_)) => return Err(DbError::WrongType),
            None => return Ok(Vec::new()),
        };

        let len = zset.len();
        let (lo, hi) = fix_range(start, stop, len);
        let (lo, hi) = if reverse { (len - hi, len - lo) } else { (lo, hi) };
        Ok(zset
            .islice(lo, hi, reverse)
            .into_iter()
            .map(|(score, member)| (member, score))
            .collect())
    }

    pub fn zrank(&mut self, key: &[u8], member: &[u8]) -> Result<Option<usize>, DbError> {
        if !self.exists_live(key) {
            return Ok(None);
        }
        match self.keyspace.get(key) {
            Some(Value::ZSetValue(z)) => Ok(z.rank(member)),
            Some(Value::Scalar(_)) => Err(DbError::WrongType),
            None => Ok(None),
        }
    }
}

pub fn parse_int(raw: &[u8]) -> Result<i64, DbError> {
    atoi::atoi::<i64>(raw).ok_or_else(|| {
        DbError::Value(format!(
            "value is not an integer or out of range: '{}'",
            String::from_utf8_lossy(raw)
        ))
    })
}

pub fn parse_score(raw: &[u8]) -> Result<f64, DbError> {
    let value: f64 = fast_float2::parse(raw).map_err(|_| {
        DbError::Value(format!(
            "value is not a valid float: '{}'",
            String::from_utf8_lossy(raw)
        ))
    })?;
    if value.is_nan() {
        return Err(DbError::Value("value is not a valid float: NaN".into()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn set_get_roundtrip_persistent() {
        let mut e = Engine::new();
        assert!(e.set(&[b("foo"), b("bar")]).unwrap());
        assert_eq!(e.get(b"foo").unwrap(), Some(b"bar".to_vec()));
        assert_eq!(e.ttl(b"foo"), -1);
    }

    #[test]
    fn set_with_ex_sets_ttl_in_expected_window() {
        let mut e = Engine::new();
        e.set(&[b("foo"), b("bar"), b("EX"), b("10")]).unwrap();
        let ttl = e.ttl(b"foo");
        assert!(ttl == 9 || ttl == 10, "ttl was {ttl}");
    }

    #[test]
    fn nx_blocks_second_set() {
        let mut e = Engine::new();
        assert!(e.set(&[b("k"), b("v"), b("NX")]).unwrap());
        assert!(!e.set(&[b("k"), b("v2"), b("NX")]).unwrap());
        assert_eq!(e.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn conflicting_flags_are_syntax_errors() {
        let mut e = Engine::new();
        assert!(matches!(
            e.set(&[b("k"), b("v"), b("NX"), b("XX")]),
            Err(DbError::Syntax(_))
        ));
        assert!(matches!(
            e.set(&[b("k"), b("v"), b("EX"), b("1"), b("PX"), b("1")]),
            Err(DbError::Syntax(_))
        ));
    }

    #[test]
    fn get_on_zset_is_wrong_type() {
        let mut e = Engine::new();
        e.zadd(&[b("z"), b("1"), b("a")]).unwrap();
        assert!(matches!(e.get(b"z"), Err(DbError::WrongType)));
    }

    #[test]
    fn expire_zero_then_get_is_gone() {
        let mut e = Engine::new();
        e.set(&[b("k"), b("v")]).unwrap();
        assert_eq!(e.expire(b"k", 0), 1);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(e.get(b"k").unwrap(), None);
        assert_eq!(e.ttl(b"k"), -2);
    }

    #[test]
    fn purge_keeps_retained_expired_fraction_below_bound() {
        let mut e = Engine::new();
        for i in 0..20 {
            let key = format!("k{i}");
            e.set(&[b(&key), b("v")]).unwrap();
            e.expire(key.as_bytes(), -1);
        }
        assert_eq!(e.expiry.len(), 20);

        e.purge();

        let now = e.now();
        let still_expired = e.expiry.values().filter(|&&deadline| deadline < now).count();
        let total = e.expiry.len().max(1);
        assert!(
            (still_expired as f64) / (total as f64) < 0.25,
            "{still_expired} of {total} keys in the expiry table are still past their deadline after a purge pass"
        );
    }

    #[test]
    fn zadd_basic_and_rank_and_range() {
        let mut e = Engine::new();
        let (r, mutated) = e
            .zadd(&[b("z"), b("1"), b("a"), b("2"), b("b"), b("3"), b("c")])
            .unwrap();
        assert_eq!(r, ZaddResult::Count(3));
        assert!(mutated);

        let fwd = e.zrange(b"z", 0, -1, false).unwrap();
        assert_eq!(
            fwd.iter().map(|(m, _)| m.clone()).collect::<Vec<_>>(),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );

        let rev = e.zrange(b"z", 0, 1, true).unwrap();
        assert_eq!(
            rev.iter().map(|(m, _)| m.clone()).collect::<Vec<_>>(),
            vec![b"c".to_vec(), b"b".to_vec()]
        );

        assert_eq!(e.zrank(b"z", b"b").unwrap(), Some(1));
    }

    #[test]
    fn zadd_ch_counts_changed_including_updates() {
        let mut e = Engine::new();
        e.zadd(&[b("z"), b("1"), b("a"), b("2"), b("b"), b("3"), b("c")])
            .unwrap();
        let (r, mutated) = e.zadd(&[b("z"), b("CH"), b("2"), b("a")]).unwrap();
        assert_eq!(r, ZaddResult::Count(1));
        assert!(mutated);
        let fwd = e.zrange(b"z", 0, -1, false).unwrap();
        assert_eq!(
            fwd.iter().map(|(m, _)| m.clone()).collect::<Vec<_>>(),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
    }

    #[test]
    fn zadd_incr_adds_to_previous_score() {
        let mut e = Engine::new();
        e.zadd(&[b("z"), b("1"), b("a"), b("2"), b("b"), b("3"), b("c")])
            .unwrap();
        e.zadd(&[b("z"), b("CH"), b("2"), b("a")]).unwrap();
        let (r, mutated) = e.zadd(&[b("z"), b("INCR"), b("5"), b("a")]).unwrap();
        assert_eq!(r, ZaddResult::Score(7.0));
        assert!(mutated);
        assert_eq!(e.zrank(b"z", b"a").unwrap(), Some(2));
    }

    #[test]
    fn zadd_xx_blocking_every_pair_is_not_reported_as_mutated() {
        let mut e = Engine::new();
        let (r, mutated) = e.zadd(&[b("z"), b("XX"), b("1"), b("ghost")]).unwrap();
        assert_eq!(r, ZaddResult::Count(0));
        assert!(!mutated);
    }

    #[test]
    fn zadd_on_scalar_is_wrong_type() {
        let mut e = Engine::new();
        e.set(&[b("k"), b("v")]).unwrap();
        assert!(matches!(e.zadd(&[b("k"), b("1"), b("m")]), Err(DbError::WrongType)));
    }

    #[test]
    fn zadd_rejects_nan_score() {
        let mut e = Engine::new();
        assert!(matches!(
            e.zadd(&[b("z"), b("nan"), b("m")]),
            Err(DbError::Value(_))
        ));
    }
}
