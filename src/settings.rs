//! Provider handles shared by index construction, retrieval, and the agent.
//!
//! A [`Settings`] value is built once per process and cloned into every
//! component that needs a provider. Because the index store and the
//! retrieval engine receive the same `Arc<dyn Embedder>`, an index is always
//! queried with the embedding function that built it.

use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::llm::{create_chat_provider, ChatProvider};

#[derive(Clone)]
pub struct Settings {
    pub embedder: Arc<dyn Embedder>,
    pub llm: Arc<dyn ChatProvider>,
}

impl Settings {
    pub fn new(embedder: Arc<dyn Embedder>, llm: Arc<dyn ChatProvider>) -> Self {
        Self { embedder, llm }
    }

    /// Construct both providers from configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let llm = create_chat_provider(&config.llm)?;
        tracing::info!(
            embedding_model = embedder.model_name(),
            dims = embedder.dims(),
            llm = llm.name(),
            llm_model = llm.model(),
            "providers ready"
        );
        Ok(Self { embedder, llm })
    }
}
