//! Binary RPC surface.
//!
//! Length-prefixed msgpack frames carried over connections the demultiplexer
//! routes here by their preface content type. Requests are
//! `{id, service, method, body}`; responses are `{id, ok: true, body}` or
//! `{id, ok: false, error: {code, message}}`.

pub mod codec;
pub mod handlers;
pub mod router;
pub mod server;

pub use codec::RPC_CONTENT_TYPE;
pub use server::RpcServer;
