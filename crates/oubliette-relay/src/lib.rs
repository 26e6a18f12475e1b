//! # oubliette-relay
//!
//! The reverse tool-call bridge: agents running *inside* containers call
//! tools on the host MCP server through a per-project UNIX socket, with the
//! identity provisioned at spawn time and recursion limits enforced at the
//! socket boundary.
//!
//! Wire: newline-delimited JSON-RPC 2.0. Methods served:
//! `oubliette_tools`, `oubliette_call_tool`, `caller_tool_call`,
//! `heartbeat`. Caller-tool calls are not handled on the host at all; they
//! are forwarded up the spawn chain to the caller's own relay connection.

#![deny(unsafe_code)]

pub mod errors;
pub mod service;
pub mod wire;

pub use errors::RelayError;
pub use service::{RelayDispatcher, RelayIdentity, RelayService};
pub use wire::{RpcErrorBody, RpcRequest, RpcResponse};
