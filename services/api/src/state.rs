//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the call registry,
//! the signal router, the pipeline hub and the optional LLM client.

use crate::{config::Config, hub::PipelineHub};
use std::sync::Arc;
use triage_core::{CallRegistry, SignalRouter, llm_client::LLMClient};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<CallRegistry>,
    pub router: SignalRouter,
    pub hub: Arc<PipelineHub>,
    /// `None` when the conversation loop is disabled.
    pub llm_client: Option<Arc<dyn LLMClient>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        registry: Arc<CallRegistry>,
        hub: Arc<PipelineHub>,
        llm_client: Option<Arc<dyn LLMClient>>,
        config: Config,
    ) -> Self {
        Self {
            router: SignalRouter::new(registry.clone()),
            registry,
            hub,
            llm_client,
            config: Arc::new(config),
        }
    }
}
