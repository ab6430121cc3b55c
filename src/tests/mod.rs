//! Integration tests driving the dispatcher directly with constructed
//! argument vectors, split by command family. None of these bind a socket;
//! `src/server.rs`'s framing is covered at the unit level in
//! `src/resp/codec.rs`.
