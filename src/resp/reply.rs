//! The engine-return-value → wire-value mapping.

use bytes::Bytes;

/// A value ready to be serialized onto the wire. One variant per RESP type
/// this server ever emits; there is deliberately no RESP3 surface (doubles,
/// maps, sets, booleans) since nothing here needs it.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(&'static str),
    Ok,
    Integer(i64),
    Bulk(Bytes),
    Nil,
    Array(Vec<Reply>),
    Error(String),
}

impl Reply {
    pub fn bulk(bytes: Vec<u8>) -> Self {
        Reply::Bulk(Bytes::from(bytes))
    }

    /// Formats a ZSet score as Redis clients expect it: a decimal string
    /// that always carries a `.0` for whole numbers (`ZRANGE WITHSCORES`,
    /// `ZADD INCR`). `dtoa` gives us this for free; byte-exact match with
    /// Redis's own formatter is not attempted.
    pub fn score(value: f64) -> Self {
        let mut buf = dtoa::Buffer::new();
        Reply::bulk(buf.format(value).as_bytes().to_vec())
    }
}

impl From<Option<Vec<u8>>> for Reply {
    fn from(value: Option<Vec<u8>>) -> Self {
        match value {
            Some(v) => Reply::bulk(v),
            None => Reply::Nil,
        }
    }
}
