//! The one concrete transport binding the core needs to be runnable: a
//! WebSocket server terminating TLS with client-certificate
//! authentication. Everything here is ambient glue around the core
//! (spec.md §1 explicitly places transport out of the core's scope); the
//! core only ever sees the `Session` trait from `session.rs`.

mod cert;
pub mod websocket;

pub use websocket::serve;
