//! # Board Game Buddy
//!
//! A conversational assistant that answers board game questions from a local
//! document collection.
//!
//! Documents under `data/` are chunked, embedded, and persisted as a vector
//! index under `storage/`. Each user message goes to a tool-calling agent
//! whose only tool searches that index and synthesizes a grounded answer.
//! Off-topic questions are redirected and unclear ones get a request to
//! rephrase.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Loader   │──▶│ Chunk+Embed │──▶│ IndexStore   │
//! │ md/pdf/… │   │             │   │ index.sqlite │
//! └──────────┘   └─────────────┘   └──────┬───────┘
//!                                         ▼
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Session  │──▶│   Agent     │──▶│ Retrieval    │
//! │ console  │   │ policy+loop │   │ top-k+refine │
//! └──────────┘   └─────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ollama pull mistral
//! buddy                 # build or load the index, then chat
//! buddy index           # build the index and keep it
//! buddy reset           # delete the index
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`settings`] | Shared provider handles |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat provider abstraction with tool calling |
//! | [`loader`] | Directory document source |
//! | [`extract`] | PDF/DOCX/PPTX text extraction |
//! | [`chunk`] | Text chunking |
//! | [`index`] | Build, load, and destroy the persisted index |
//! | [`search`] | Cosine top-k search |
//! | [`retrieval`] | Query engine with answer synthesis |
//! | [`tools`] | Tool trait and registry |
//! | [`agent`] | Conversational agent |
//! | [`session`] | Console session loop and teardown |
//! | [`progress`] | Index build progress on stderr |
//! | [`db`] | Database connection |
//! | [`migrate`] | Index schema |

pub mod agent;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
mod http;
pub mod index;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod retrieval;
pub mod search;
pub mod session;
pub mod settings;
pub mod tools;
