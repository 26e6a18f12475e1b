//! # oubliette-agent
//!
//! The agent-runtime adapter layer.
//!
//! The session manager consumes exactly two contracts, [`AgentRuntime`] and
//! [`StreamingExecutor`]; which wire protocol sits behind them is a process
//! wiring choice. This crate ships the HTTP+SSE backend ([`sse`]) and a
//! scripted in-memory fake ([`fake`]). Both feed the same
//! [`normalize::Normalizer`], so every backend's events reach the bus in
//! one shape.

#![deny(unsafe_code)]

pub mod contract;
pub mod errors;
pub mod fake;
pub mod normalize;
pub mod sse;

pub use contract::{AgentEvent, AgentRuntime, ExecuteRequest, StreamingExecutor};
pub use errors::AgentError;
pub use fake::{FakeAgentRuntime, FakeExecutor};
pub use normalize::Normalizer;
