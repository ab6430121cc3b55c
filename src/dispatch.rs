//! Maps a parsed RESP command array to an `Engine` operation and turns the
//! result into a `Reply`. Commands are a closed tagged variant rather than
//! a string-keyed method table, so the match in `dispatch` is exhaustive
//! and adding a command is a compile error until every arm is updated.

use crate::append_log::AppendLog;
use crate::engine::{parse_int, Engine, ZaddResult};
use crate::error::{DbError, Error};
use crate::resp::Reply;
use bytes::Bytes;

/// One entry per supported command name.
enum Command {
    Ping,
    Set,
    Get,
    Expire,
    Ttl,
    Zadd,
    Zrange,
    Zrevrange,
    Zrank,
    Replay,
}

impl Command {
    fn lookup(name: &[u8]) -> Option<Self> {
        let mut lower = [0u8; 16];
        if name.len() > lower.len() {
            return None;
        }
        for (dst, src) in lower.iter_mut().zip(name) {
            *dst = src.to_ascii_lowercase();
        }
        match &lower[..name.len()] {
            b"ping" => Some(Command::Ping),
            b"set" => Some(Command::Set),
            b"get" => Some(Command::Get),
            b"expire" => Some(Command::Expire),
            b"ttl" => Some(Command::Ttl),
            b"zadd" => Some(Command::Zadd),
            b"zrange" => Some(Command::Zrange),
            b"zrevrange" => Some(Command::Zrevrange),
            b"zrank" => Some(Command::Zrank),
            b"replay" => Some(Command::Replay),
            _ => None,
        }
    }
}

/// Runs one parsed command against `engine`, appending successful
/// mutations to `log`. `frame[0]` is the command name; the rest are its
/// arguments.
pub fn dispatch(frame: &[Bytes], engine: &mut Engine, log: &AppendLog) -> Reply {
    match dispatch_inner(frame, engine, log) {
        Ok(reply) => reply,
        Err(Error::Db(e)) => Reply::Error(e.to_string()),
        Err(other) => Reply::Error(other.to_string()),
    }
}

fn dispatch_inner(frame: &[Bytes], engine: &mut Engine, log: &AppendLog) -> Result<Reply, Error> {
    let Some((name, args)) = frame.split_first() else {
        return Err(DbError::Syntax("empty command".into()).into());
    };

    let Some(command) = Command::lookup(name) else {
        return Err(DbError::UnknownCommand(String::from_utf8_lossy(name).into_owned()).into());
    };

    let reply = match command {
        Command::Ping => {
            if args.len() > 1 {
                return Err(DbError::Syntax("wrong number of arguments for 'ping' command".into()).into());
            }
            Reply::bulk(engine.ping(args.first().cloned()))
        }

        Command::Set => {
            if engine.set(args)? {
                log.append(engine.now(), "set", args);
                Reply::Ok
            } else {
                Reply::Nil
            }
        }

        Command::Get => {
            if args.len() != 1 {
                return Err(DbError::Syntax("wrong number of arguments for 'get' command".into()).into());
            }
            Reply::from(engine.get(&args[0])?)
        }

        Command::Expire => {
            if args.len() != 2 {
                return Err(DbError::Syntax("wrong number of arguments for 'expire' command".into()).into());
            }
            let seconds = parse_int(&args[1])?;
            let result = engine.expire(&args[0], seconds);
            if result == 1 {
                log.append(engine.now(), "expire", args);
            }
            Reply::Integer(result)
        }

        Command::Ttl => {
            if args.len() != 1 {
                return Err(DbError::Syntax("wrong number of arguments for 'ttl' command".into()).into());
            }
            Reply::Integer(engine.ttl(&args[0]))
        }

        Command::Zadd => {
            let (result, mutated) = engine.zadd(args)?;
            if mutated {
                log.append(engine.now(), "zadd", args);
            }
            match result {
                ZaddResult::Count(n) => Reply::Integer(n),
                ZaddResult::Score(s) => Reply::score(s),
                ZaddResult::Nil => Reply::Nil,
            }
        }

        Command::Zrange | Command::Zrevrange => {
            let reverse = matches!(command, Command::Zrevrange);
            if args.len() < 3 || args.len() > 4 {
                return Err(DbError::Syntax("wrong number of arguments".into()).into());
            }
            let start = parse_int(&args[1])?;
            let stop = parse_int(&args[2])?;
            let withscores = match args.get(3) {
                None => false,
                Some(tok) if tok.eq_ignore_ascii_case(b"withscores") => true,
                Some(_) => return Err(DbError::Syntax("syntax error".into()).into()),
            };
            let pairs = engine.zrange(&args[0], start, stop, reverse)?;
            let mut items = Vec::with_capacity(if withscores { pairs.len() * 2 } else { pairs.len() });
            for (member, score) in pairs {
                items.push(Reply::bulk(member));
                if withscores {
                    items.push(Reply::score(score));
                }
            }
            Reply::Array(items)
        }

        Command::Zrank => {
            if args.len() != 2 {
                return Err(DbError::Syntax("wrong number of arguments for 'zrank' command".into()).into());
            }
            match engine.zrank(&args[0], &args[1])? {
                Some(rank) => Reply::Integer(rank as i64),
                None => Reply::Nil,
            }
        }

        Command::Replay => {
            if args.len() > 1 {
                return Err(DbError::Syntax("wrong number of arguments for 'replay' command".into()).into());
            }
            let after = match args.first() {
                Some(raw) => parse_int(raw)? as f64,
                None => 0.0,
            };
            let replayed = log.replay(after, engine)?;
            Reply::Integer(replayed as i64)
        }
    };

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::append_log::AppendLog;
    use std::path::Path;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn run(engine: &mut Engine, log: &AppendLog, parts: &[&str]) -> Reply {
        let frame: Vec<Bytes> = parts.iter().map(|s| b(s)).collect();
        dispatch(&frame, engine, log)
    }

    fn no_log() -> AppendLog {
        AppendLog::disabled(Path::new("/dev/null"))
    }

    #[test]
    fn unknown_command_errors() {
        let mut e = Engine::new();
        let log = no_log();
        let reply = run(&mut e, &log, &["frobnicate"]);
        assert!(matches!(reply, Reply::Error(msg) if msg.contains("unknown command")));
    }

    #[test]
    fn set_get_ttl_happy_path() {
        let mut e = Engine::new();
        let log = no_log();
        assert_eq!(run(&mut e, &log, &["SET", "foo", "bar"]), Reply::Ok);
        assert_eq!(run(&mut e, &log, &["GET", "foo"]), Reply::bulk(b"bar".to_vec()));
        assert_eq!(run(&mut e, &log, &["TTL", "foo"]), Reply::Integer(-1));
    }

    #[test]
    fn ping_with_and_without_message() {
        let mut e = Engine::new();
        let log = no_log();
        assert_eq!(run(&mut e, &log, &["PING"]), Reply::bulk(b"PONG".to_vec()));
        assert_eq!(run(&mut e, &log, &["PING", "hello"]), Reply::bulk(b"hello".to_vec()));
    }

    #[test]
    fn zadd_zrange_withscores() {
        let mut e = Engine::new();
        let log = no_log();
        assert_eq!(
            run(&mut e, &log, &["ZADD", "z", "1", "a", "2", "b", "3", "c"]),
            Reply::Integer(3)
        );
        let reply = run(&mut e, &log, &["ZRANGE", "z", "0", "-1", "WITHSCORES"]);
        assert_eq!(
            reply,
            Reply::Array(vec![
                Reply::bulk(b"a".to_vec()),
                Reply::score(1.0),
                Reply::bulk(b"b".to_vec()),
                Reply::score(2.0),
                Reply::bulk(b"c".to_vec()),
                Reply::score(3.0),
            ])
        );
    }

    #[test]
    fn zrevrange_order() {
        let mut e = Engine::new();
        let log = no_log();
        run(&mut e, &log, &["ZADD", "z", "1", "a", "2", "b", "3", "c"]);
        let reply = run(&mut e, &log, &["ZREVRANGE", "z", "0", "1"]);
        assert_eq!(
            reply,
            Reply::Array(vec![Reply::bulk(b"c".to_vec()), Reply::bulk(b"b".to_vec())])
        );
    }

    #[test]
    fn wrong_type_surfaces_as_error() {
        let mut e = Engine::new();
        let log = no_log();
        run(&mut e, &log, &["SET", "k", "v"]);
        let reply = run(&mut e, &log, &["ZADD", "k", "1", "m"]);
        assert!(matches!(reply, Reply::Error(msg) if msg.starts_with("WRONGTYPE")));
    }

    #[test]
    fn wrong_arity_is_syntax_error() {
        let mut e = Engine::new();
        let log = no_log();
        let reply = run(&mut e, &log, &["GET"]);
        assert!(matches!(reply, Reply::Error(msg) if msg.contains("wrong number of arguments")));
    }

    #[test]
    fn zadd_xx_no_op_does_not_grow_the_log() {
        let path = std::env::temp_dir().join(format!(
            "rudis-dispatch-test-{}-{:?}.log",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_file(&path);
        let log = AppendLog::new(&path);
        let mut e = Engine::new();

        let reply = run(&mut e, &log, &["ZADD", "z", "XX", "1", "ghost"]);
        assert_eq!(reply, Reply::Integer(0));

        let mut replay_target = Engine::new();
        let replayed = log.replay(0.0, &mut replay_target).unwrap();
        assert_eq!(replayed, 0);

        let _ = std::fs::remove_file(&path);
    }
}
