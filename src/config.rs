//! TOML configuration.
//!
//! Every section has defaults that reproduce the stock assistant: a French
//! speaking "Buddy" backed by a local Ollama `mistral` model, local
//! `bge-base-en-v1.5` embeddings, documents under `data/` and the index under
//! `storage/`. A missing config file therefore yields a working setup.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub documents: DocumentsConfig,
    pub index: IndexConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DocumentsConfig {
    pub root: PathBuf,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            include_globs: vec![
                "**/*.md".to_string(),
                "**/*.txt".to_string(),
                "**/*.pdf".to_string(),
                "**/*.docx".to_string(),
                "**/*.pptx".to_string(),
            ],
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    pub dir: PathBuf,
    /// Keep the index when the session ends instead of deleting it.
    pub keep_after_session: bool,
    /// Rebuild from documents when the persisted index cannot be loaded.
    pub rebuild_on_corrupt: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("storage"),
            keep_after_session: false,
            rebuild_on_corrupt: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            overlap_tokens: 200,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of nearest chunks handed to the synthesizer.
    pub top_k: usize,
    /// Character budget of one synthesis prompt's context block.
    pub max_context_chars: usize,
    /// Tool output when nothing relevant was found.
    pub no_result_message: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 2,
            max_context_chars: 12_000,
            no_result_message: "Aucune information trouvée dans les documents.".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `local`, `ollama`, or `openai`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    pub url: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    /// `ollama` or `openai`.
    pub provider: String,
    pub model: Option<String>,
    /// Base URL override (Ollama host or OpenAI-compatible endpoint).
    pub url: Option<String>,
    pub temperature: Option<f32>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: None,
            url: None,
            temperature: None,
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

impl LlmConfig {
    pub fn model_or_default(&self) -> String {
        self.model.clone().unwrap_or_else(|| {
            match self.provider.as_str() {
                "openai" => "gpt-4o-mini",
                _ => "mistral",
            }
            .to_string()
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub language: String,
    /// System prompt template. Placeholders: `{name}`, `{language}`,
    /// `{tool}`, `{redirect_message}`.
    pub system_prompt: String,
    pub redirect_message: String,
    pub clarification_message: String,
    pub fallback_message: String,
    pub greeting_instruction: String,
    /// Tool calls allowed per turn.
    pub max_tool_calls: usize,
    /// Model round-trips allowed per turn.
    pub max_rounds: usize,
    /// Context messages sent with each request.
    pub max_history_messages: usize,
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "Tu es {name}, assistant expert en jeux de plateau et jeux de société.

RÈGLES STRICTES :
- Réponds UNIQUEMENT en {language}.
- Pour toute question sur un jeu : appelle l'outil {tool} une seule fois, sans jamais le mentionner dans ta réponse.
- Pour une question hors du domaine des jeux, réponds exactement : \"{redirect_message}\"
- Pour une question floue, demande poliment de reformuler.
- N'invente JAMAIS d'information : réponds uniquement à partir des résultats de {tool}. S'ils ne contiennent pas la réponse, dis que tu ne la connais pas.

Réponds de manière naturelle, concise et amicale.";

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Buddy".to_string(),
            language: "français".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            redirect_message:
                "Je suis spécialisé dans les jeux de plateau. Comment puis-je t'aider ?".to_string(),
            clarification_message:
                "Je n'ai pas bien compris ta question. Peux-tu la reformuler ?".to_string(),
            fallback_message: "Je n'ai pas la réponse à cette question.".to_string(),
            greeting_instruction: "Dis bonjour et présente-toi EN UNE SEULE PHRASE.".to_string(),
            max_tool_calls: 1,
            max_rounds: 3,
            max_history_messages: 40,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UiConfig {
    pub user_prompt: String,
    pub exit_command: String,
    pub exit_hint: String,
    pub goodbye: String,
    pub error_label: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            user_prompt: "Vous : ".to_string(),
            exit_command: "EXIT".to_string(),
            exit_hint: "Tapez 'EXIT' pour quitter la conversation.".to_string(),
            goodbye: "Au revoir et à bientôt !".to_string(),
            error_label: "Erreur".to_string(),
        }
    }
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to validated defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        return load_config(path);
    }
    tracing::debug!(path = %path.display(), "no config file, using defaults");
    let config = Config::default();
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_context_chars == 0 {
        bail!("retrieval.max_context_chars must be > 0");
    }

    match config.embedding.provider.as_str() {
        "local" | "ollama" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local, ollama, or openai.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.llm.provider.as_str() {
        "ollama" | "openai" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be ollama or openai.",
            other
        ),
    }
    if config.llm.timeout_secs == 0 {
        bail!("llm.timeout_secs must be > 0");
    }

    if config.agent.max_tool_calls < 1 {
        bail!("agent.max_tool_calls must be >= 1");
    }
    if config.agent.max_rounds <= config.agent.max_tool_calls {
        bail!("agent.max_rounds must be greater than agent.max_tool_calls");
    }
    if config.ui.exit_command.trim().is_empty() {
        bail!("ui.exit_command must not be empty");
    }

    Ok(())
}
