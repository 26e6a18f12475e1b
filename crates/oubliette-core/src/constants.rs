//! Shared defaults and tuning constants.

/// Events retained per session ring buffer.
pub const EVENT_RING_CAPACITY: usize = 1000;

/// Bounded channel size for each live subscriber.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 100;

/// Maximum blocking wait for the synchronous event pull, in seconds.
pub const EVENTS_WAIT_TIMEOUT_SECS: u64 = 30;

/// Deadline for the in-container proxy's socket to appear, in seconds.
pub const RELAY_DIAL_TIMEOUT_SECS: u64 = 30;

/// Container status cache TTL, in seconds.
pub const STATUS_CACHE_TTL_SECS: u64 = 5;

/// Default sustained request rate per token, per second.
pub const RATE_LIMIT_PER_SECOND: f64 = 10.0;

/// Default burst capacity per token.
pub const RATE_LIMIT_BURST: f64 = 20.0;

/// Default spawn-depth cap applied at project creation.
pub const DEFAULT_MAX_RECURSION_DEPTH: u32 = 3;

/// Default live-session cap per session tree.
pub const DEFAULT_MAX_AGENTS_PER_SESSION: u32 = 5;

/// SQLite busy timeout, in milliseconds.
pub const DB_BUSY_TIMEOUT_MS: u32 = 5000;

/// Fixed path of the relay socket inside containers.
pub const CONTAINER_RELAY_SOCKET: &str = "/run/oubliette/relay.sock";

/// Relay socket file name on the host side.
pub const RELAY_SOCKET_NAME: &str = "relay.sock";
