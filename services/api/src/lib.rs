//! Medical Triage API Library Crate
//!
//! This library contains the web service around the call registry: the
//! application state, configuration, REST handlers, the room-event webhook,
//! the WebSocket voice pipeline adapter and its connection hub, and routing.
//! The `api` binary is a thin wrapper around this library.

pub mod background;
pub mod config;
pub mod handlers;
pub mod hub;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
