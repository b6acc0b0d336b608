mod common;

use std::sync::Arc;

use tempfile::TempDir;

use boardgame_buddy::embedding::embed_query;
use boardgame_buddy::error::BuddyError;
use boardgame_buddy::index::{
    destroy_index, load_index, CorruptIndexPolicy, IndexOrigin, IndexStore, INDEX_FILE,
};
use boardgame_buddy::settings::Settings;

use common::*;

fn settings() -> Settings {
    settings_with(Arc::new(ScriptedChat::new(Vec::new())))
}

#[tokio::test]
async fn test_loaded_index_ranks_like_fresh_build() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("storage");
    let settings = settings();
    let store = IndexStore::new(&dir, &settings);

    let built = store.build(&board_game_docs()).await.unwrap();
    assert!(dir.join(INDEX_FILE).is_file());
    let loaded = store.load().await.unwrap();

    assert_eq!(built.len(), loaded.len());
    assert_eq!(built.meta(), loaded.meta());
    assert_eq!(built.documents().len(), 3);

    for query in [
        "combien de joueurs pour Catan",
        "tuiles colorées Azul",
        "histoire avec des cartes",
    ] {
        let vector = embed_query(settings.embedder.as_ref(), query).await.unwrap();
        let a = built.search(&vector, 3);
        let b = loaded.search(&vector, 3);
        let ids_a: Vec<&str> = a.iter().map(|h| h.chunk.id.as_str()).collect();
        let ids_b: Vec<&str> = b.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids_a, ids_b, "ranking differs for {:?}", query);
        for (x, y) in a.iter().zip(&b) {
            assert!((x.score - y.score).abs() < 1e-6);
        }
    }
}

#[tokio::test]
async fn test_nearest_chunk_matches_query_topic() {
    let tmp = TempDir::new().unwrap();
    let settings = settings();
    let index = build_index(&tmp.path().join("storage"), &settings).await;

    let vector = embed_query(settings.embedder.as_ref(), "Catan colons bois argile")
        .await
        .unwrap();
    let hits = index.search(&vector, 2);
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].source_id, "catan.md");
}

#[tokio::test]
async fn test_open_or_build_reads_source_only_when_nothing_persisted() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("storage");
    let settings = settings();
    let store = IndexStore::new(&dir, &settings);
    let source = CountingSource::new(board_game_docs());

    let (_, origin) = store
        .open_or_build(&source, CorruptIndexPolicy::Rebuild)
        .await
        .unwrap();
    assert_eq!(origin, IndexOrigin::Built);
    assert_eq!(source.loads(), 1);

    let (index, origin) = store
        .open_or_build(&source, CorruptIndexPolicy::Rebuild)
        .await
        .unwrap();
    assert_eq!(origin, IndexOrigin::Loaded);
    assert_eq!(source.loads(), 1, "document source must not be read on load");
    assert_eq!(index.documents().len(), 3);
}

#[tokio::test]
async fn test_corrupt_index_is_rebuilt_by_default() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("storage");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(INDEX_FILE), b"this is not a sqlite database").unwrap();

    let settings = settings();
    let store = IndexStore::new(&dir, &settings);
    let source = CountingSource::new(board_game_docs());

    let (index, origin) = store
        .open_or_build(&source, CorruptIndexPolicy::Rebuild)
        .await
        .unwrap();
    assert_eq!(origin, IndexOrigin::Rebuilt);
    assert_eq!(source.loads(), 1);
    assert!(!index.is_empty());
    assert!(store.load().await.is_ok());
}

#[tokio::test]
async fn test_corrupt_index_is_fatal_when_rebuild_disabled() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("storage");
    std::fs::create_dir_all(&dir).unwrap();

    let settings = settings();
    let store = IndexStore::new(&dir, &settings);
    let source = CountingSource::new(board_game_docs());

    let err = store
        .open_or_build(&source, CorruptIndexPolicy::Fail)
        .await
        .unwrap_err();
    assert!(matches!(err, BuddyError::CorruptIndex { .. }), "got {:?}", err);
    assert_eq!(source.loads(), 0);
    assert!(dir.exists(), "a corrupt index is left in place when not rebuilding");
}

#[tokio::test]
async fn test_load_rejects_different_embedder() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("storage");
    build_index(&dir, &settings()).await;

    let other = FakeEmbedder::named("another-model");
    let err = load_index(&dir, &other).await.unwrap_err();
    match err {
        BuddyError::CorruptIndex { reason, .. } => assert!(reason.contains("another-model")),
        other => panic!("expected CorruptIndex, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_source_is_ingestion_error_and_leaves_nothing() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("storage");
    let settings = settings();
    let store = IndexStore::new(&dir, &settings);

    let err = store
        .open_or_build(&CountingSource::new(Vec::new()), CorruptIndexPolicy::Rebuild)
        .await
        .unwrap_err();
    assert!(matches!(err, BuddyError::Ingestion(_)));
    assert!(!dir.exists());

    let err = store.build(&[doc("vide.md", "  \n\n ")]).await.unwrap_err();
    assert!(matches!(err, BuddyError::Ingestion(_)));
    assert!(!dir.exists());
}

#[tokio::test]
async fn test_failed_build_leaves_no_index_or_staging() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("storage");
    let settings = Settings::new(
        Arc::new(FakeEmbedder::failing()),
        Arc::new(ScriptedChat::new(Vec::new())),
    );

    let err = IndexStore::new(&dir, &settings)
        .build(&board_game_docs())
        .await
        .unwrap_err();
    assert!(matches!(err, BuddyError::Provider { .. }));
    assert!(!dir.exists());
    assert!(staging_leftovers(&dir).is_empty());
}

#[tokio::test]
async fn test_build_sweeps_stale_staging() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("storage");
    let stale = tmp.path().join(".storage.staging-crashed");
    std::fs::create_dir_all(&stale).unwrap();

    build_index(&dir, &settings()).await;
    assert!(dir.join(INDEX_FILE).is_file());
    assert!(staging_leftovers(&dir).is_empty());
}

#[tokio::test]
async fn test_small_batches_embed_every_chunk() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("storage");
    let embedder = Arc::new(FakeEmbedder::new());
    let settings = Settings::new(embedder.clone(), Arc::new(ScriptedChat::new(Vec::new())));

    let index = IndexStore::new(&dir, &settings)
        .with_batch_size(1)
        .build(&board_game_docs())
        .await
        .unwrap();
    assert_eq!(index.len(), 3);
    assert_eq!(embedder.calls(), 3);
}

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("storage");
    let settings = settings();
    let store = IndexStore::new(&dir, &settings);
    store.build(&board_game_docs()).await.unwrap();

    assert!(store.destroy().unwrap());
    assert!(!dir.exists());
    assert!(!store.destroy().unwrap());
    assert!(!destroy_index(&dir).unwrap());
}
