//! Re-exports the scheduler's backoff helper from `lacquer-core`, where
//! it is the one canonical implementation shared with the MCP
//! WebSocket transport's reconnect loop (spec.md §4.3/§4.5).

pub use lacquer_core::retry::backoff_delay;
