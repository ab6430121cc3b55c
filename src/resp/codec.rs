//! Framing of inbound command arrays and serialization of replies. Inbound
//! commands are always an array of bulk strings; outbound replies cover
//! the RESP simple-string, integer, bulk-string, nil, array, and error
//! wire forms.

use super::Reply;
use crate::error::Error;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use memchr::memchr;
use smallvec::SmallVec;
use tokio_util::codec::{Decoder, Encoder};

/// A decoded command: the name plus its arguments, all bulk strings. Most
/// real commands carry a handful of arguments, so this stays inline rather
/// than heap-allocating a `Vec` per frame.
pub type CommandFrame = SmallVec<[Bytes; 4]>;

/// Decodes a byte stream into fully-framed commands (`*n\r\n($len\r\n...\r\n){n}`).
/// Partial frames are left in the buffer; `decode` returns `Ok(None)` and is
/// called again once more bytes arrive.
#[derive(Debug, Default)]
pub struct RequestDecoder;

impl Decoder for RequestDecoder {
    type Item = CommandFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match try_parse_command(src)? {
            Some((items, consumed)) => {
                src.advance(consumed);
                Ok(Some(items))
            }
            None => Ok(None),
        }
    }
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    let rel = memchr(b'\r', &buf[from..])?;
    let idx = from + rel;
    (buf.get(idx + 1) == Some(&b'\n')).then_some(idx)
}

fn parse_len(buf: &[u8], start: usize, end: usize) -> Result<i64, Error> {
    atoi::atoi::<i64>(&buf[start..end]).ok_or_else(|| Error::Protocol("invalid length prefix".into()))
}

/// Returns `Ok(None)` when the buffer holds an incomplete frame, `Err` on a
/// malformed one (the caller drops the connection in that case), and
/// otherwise the parsed command plus the number of bytes it consumed.
fn try_parse_command(buf: &[u8]) -> Result<Option<(CommandFrame, usize)>, Error> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != b'*' {
        return Err(Error::Protocol(format!(
            "expected array ('*'), got '{}'",
            buf[0] as char
        )));
    }
    let Some(count_crlf) = find_crlf(buf, 1) else {
        return Ok(None);
    };
    let count = parse_len(buf, 1, count_crlf)?;
    if count < 0 {
        return Ok(Some((CommandFrame::new(), count_crlf + 2)));
    }

    let mut pos = count_crlf + 2;
    let mut items = CommandFrame::with_capacity(count as usize);
    for _ in 0..count {
        if pos >= buf.len() {
            return Ok(None);
        }
        if buf[pos] != b'$' {
            return Err(Error::Protocol(format!(
                "expected bulk string ('$'), got '{}'",
                buf[pos] as char
            )));
        }
        let Some(len_crlf) = find_crlf(buf, pos + 1) else {
            return Ok(None);
        };
        let len = parse_len(buf, pos + 1, len_crlf)?;
        if len < 0 {
            return Err(Error::Protocol("null bulk string in command array".into()));
        }
        let data_start = len_crlf + 2;
        let data_end = data_start + len as usize;
        if buf.len() < data_end + 2 {
            return Ok(None);
        }
        if &buf[data_end..data_end + 2] != b"\r\n" {
            return Err(Error::Protocol("missing CRLF after bulk string".into()));
        }
        items.push(Bytes::copy_from_slice(&buf[data_start..data_end]));
        pos = data_end + 2;
    }

    Ok(Some((items, pos)))
}

/// Serializes `Reply` values onto the wire as RESP frames.
#[derive(Debug, Default)]
pub struct ReplyEncoder;

impl Encoder<Reply> for ReplyEncoder {
    type Error = Error;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_reply(&item, dst);
        Ok(())
    }
}

fn write_reply(item: &Reply, dst: &mut BytesMut) {
    match item {
        Reply::Simple(s) => {
            dst.put_u8(b'+');
            dst.put_slice(s.as_bytes());
            dst.put_slice(b"\r\n");
        }
        Reply::Ok => dst.put_slice(b"+OK\r\n"),
        Reply::Integer(n) => {
            dst.put_u8(b':');
            let mut buf = itoa::Buffer::new();
            dst.put_slice(buf.format(*n).as_bytes());
            dst.put_slice(b"\r\n");
        }
        Reply::Bulk(b) => {
            dst.put_u8(b'$');
            let mut buf = itoa::Buffer::new();
            dst.put_slice(buf.format(b.len()).as_bytes());
            dst.put_slice(b"\r\n");
            dst.put_slice(b);
            dst.put_slice(b"\r\n");
        }
        Reply::Nil => dst.put_slice(b"$-1\r\n"),
        Reply::Array(items) => {
            dst.put_u8(b'*');
            let mut buf = itoa::Buffer::new();
            dst.put_slice(buf.format(items.len()).as_bytes());
            dst.put_slice(b"\r\n");
            for it in items {
                write_reply(it, dst);
            }
        }
        Reply::Error(msg) => {
            dst.put_u8(b'-');
            // Error text can embed raw user-supplied bytes (bad SET/ZADD
            // arguments echoed back verbatim); strip CR/LF so it can't
            // smuggle an extra simple-error line onto the wire.
            if msg.contains(['\r', '\n']) {
                dst.put_slice(msg.replace(['\r', '\n'], " ").as_bytes());
            } else {
                dst.put_slice(msg.as_bytes());
            }
            dst.put_slice(b"\r\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(parts: &[&[u8]]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_slice(format!("*{}\r\n", parts.len()).as_bytes());
        for p in parts {
            buf.put_slice(format!("${}\r\n", p.len()).as_bytes());
            buf.put_slice(p);
            buf.put_slice(b"\r\n");
        }
        buf
    }

    #[test]
    fn decodes_full_frame() {
        let mut buf = frame(&[b"SET", b"foo", b"bar"]);
        let mut decoder = RequestDecoder;
        let items = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            &items[..],
            [Bytes::from_static(b"SET"), Bytes::from_static(b"foo"), Bytes::from_static(b"bar")]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn returns_none_on_partial_frame() {
        let full = frame(&[b"PING"]);
        let mut partial = BytesMut::from(&full[..full.len() - 2]);
        let mut decoder = RequestDecoder;
        assert!(decoder.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn rejects_non_array_frame() {
        let mut buf = BytesMut::from(&b"+PING\r\n"[..]);
        let mut decoder = RequestDecoder;
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn decodes_two_frames_back_to_back() {
        let mut buf = frame(&[b"PING"]);
        buf.extend_from_slice(&frame(&[b"PING"]));
        let mut decoder = RequestDecoder;
        assert!(decoder.decode(&mut buf).unwrap().is_some());
        assert!(decoder.decode(&mut buf).unwrap().is_some());
        assert!(buf.is_empty());
    }

    #[test]
    fn encodes_reply_table() {
        let mut encoder = ReplyEncoder;
        let mut buf = BytesMut::new();
        encoder.encode(Reply::Ok, &mut buf).unwrap();
        encoder.encode(Reply::Integer(-2), &mut buf).unwrap();
        encoder.encode(Reply::Nil, &mut buf).unwrap();
        encoder
            .encode(Reply::Array(vec![Reply::bulk(b"a".to_vec())]), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"+OK\r\n:-2\r\n$-1\r\n*1\r\n$1\r\na\r\n");
    }

    #[test]
    fn error_reply_strips_embedded_crlf() {
        let mut encoder = ReplyEncoder;
        let mut buf = BytesMut::new();
        encoder
            .encode(Reply::Error("ERR bad value '\r\n$-1\r\n'".into()), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"-ERR bad value ' $-1 '\r\n");
    }
}
