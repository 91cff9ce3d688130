//! WebSocket Voice Pipeline Adapter
//!
//! This module connects a voice pipeline to a call over a WebSocket:
//!
//! - `protocol`: Defines the JSON message format between pipeline and server.
//! - `session`: Manages the connection lifecycle, from attach to teardown.
//! - `cycle`: Runs one conversational turn of the current agent, with tool calls.

mod cycle;
pub mod protocol;
pub mod session;

pub use session::ws_handler;
