#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use boardgame_buddy::config::RetrievalConfig;
use boardgame_buddy::embedding::Embedder;
use boardgame_buddy::error::{BuddyError, Result};
use boardgame_buddy::index::{IndexStore, VectorIndex};
use boardgame_buddy::llm::ChatProvider;
use boardgame_buddy::loader::DocumentSource;
use boardgame_buddy::models::{ChatMessage, Completion, Document, ToolCall, ToolDefinition};
use boardgame_buddy::retrieval::RetrievalEngine;
use boardgame_buddy::settings::Settings;

pub const DIMS: usize = 64;

/// Deterministic bag-of-words embedder: each lowercase word bumps one bucket.
pub struct FakeEmbedder {
    model: String,
    calls: AtomicUsize,
    fail: bool,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self::named("fake-bow")
    }

    pub fn named(model: &str) -> Self {
        Self {
            model: model.to_string(),
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn bucket(word: &str) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIMS as u64) as usize
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
    {
        vector[bucket(&word.to_lowercase())] += 1.0;
    }
    vector
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BuddyError::provider("fake", "embedding backend unavailable"));
        }
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

/// One scripted chat response.
pub enum Step {
    Reply(Completion),
    Fail(BuddyError),
    /// Never answers.
    Hang,
}

/// Chat provider that replays a script and records every request.
pub struct ScriptedChat {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<(Vec<ChatMessage>, Vec<ToolDefinition>)>>,
}

impl ScriptedChat {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(Vec<ChatMessage>, Vec<ToolDefinition>)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<Completion> {
        self.requests
            .lock()
            .unwrap()
            .push((messages.to_vec(), tools.to_vec()));
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(completion)) => Ok(completion),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Hang) => std::future::pending::<Result<Completion>>().await,
            None => Err(BuddyError::provider("scripted", "script exhausted")),
        }
    }
}

pub fn reply(text: &str) -> Step {
    Step::Reply(Completion::text(text))
}

pub fn search_call(id: &str, query: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: "search_documents".to_string(),
        arguments: json!({ "query": query }),
    }
}

pub fn call_search(query: &str) -> Step {
    Step::Reply(Completion::calls(vec![search_call("call_0", query)]))
}

pub fn doc(source_id: &str, body: &str) -> Document {
    let stem = source_id.trim_end_matches(".md");
    Document {
        id: format!("doc-{}", stem),
        source_id: source_id.to_string(),
        path: PathBuf::from(source_id),
        title: stem.to_string(),
        content_type: "text/markdown".to_string(),
        body: body.to_string(),
        updated_at: 0,
    }
}

pub fn board_game_docs() -> Vec<Document> {
    vec![
        doc(
            "catan.md",
            "Catan se joue de trois à quatre joueurs. Les colons échangent bois, argile et blé.",
        ),
        doc(
            "azul.md",
            "Azul se joue de deux à quatre joueurs avec des tuiles colorées posées sur un plateau.",
        ),
        doc(
            "dixit.md",
            "Dixit est un jeu d'ambiance où chaque joueur raconte une histoire avec des cartes illustrées.",
        ),
    ]
}

/// In-memory document source that counts how often it is read.
pub struct CountingSource {
    docs: Vec<Document>,
    loads: AtomicUsize,
}

impl CountingSource {
    pub fn new(docs: Vec<Document>) -> Self {
        Self {
            docs,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSource for CountingSource {
    fn describe(&self) -> String {
        "in-memory".to_string()
    }

    async fn load(&self) -> Result<Vec<Document>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.docs.is_empty() {
            return Err(BuddyError::Ingestion("no documents".to_string()));
        }
        Ok(self.docs.clone())
    }
}

pub fn settings_with(chat: Arc<ScriptedChat>) -> Settings {
    Settings::new(Arc::new(FakeEmbedder::new()), chat)
}

pub async fn build_index(dir: &Path, settings: &Settings) -> VectorIndex {
    IndexStore::new(dir, settings)
        .build(&board_game_docs())
        .await
        .unwrap()
}

pub async fn engine(dir: &Path, settings: &Settings) -> Arc<RetrievalEngine> {
    let index = build_index(dir, settings).await;
    Arc::new(RetrievalEngine::new(
        Arc::new(index),
        settings.clone(),
        RetrievalConfig::default(),
    ))
}

/// Names of staging directories left next to `dir`.
pub fn staging_leftovers(dir: &Path) -> Vec<String> {
    let parent = dir.parent().unwrap();
    std::fs::read_dir(parent)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.contains(".staging-"))
        .collect()
}
