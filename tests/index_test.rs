mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{
    add_memory, persona, seed_persona, test_config, test_context, DeletingEmbedder,
    FailingEmbedder, FakeChatBackend, FakeEmbedder, GatedEmbedder,
};
use reverie::context::AppContext;
use reverie::store::memories::append_memory;
use reverie::store::types::MemoryKind;
use reverie::store::Store;

#[tokio::test]
async fn reconciliation_is_idempotent() {
    let embedder = FakeEmbedder::new();
    let ctx = test_context(test_config(), embedder.clone(), FakeChatBackend::streaming(&[]));
    seed_persona(&ctx.store, &persona("mei", "Mei", false));
    add_memory(&ctx.store, "mei", MemoryKind::Static, "Loves the rain");
    add_memory(&ctx.store, "mei", MemoryKind::Static, "Has a cat named Mochi");

    let first = ctx.indexer.reconcile().await.unwrap();
    assert_eq!(first.total, 2);
    assert_eq!(first.upserted, 2);
    let calls = embedder.call_count();

    let second = ctx.indexer.reconcile().await.unwrap();
    assert_eq!(second.upserted, 0);
    assert_eq!(second.already_indexed, 2);
    assert_eq!(embedder.call_count(), calls, "second pass must not re-embed");
    assert_eq!(ctx.index.indexed_ids().await.unwrap().len(), 2);
}

#[tokio::test]
async fn reconciliation_picks_up_new_memories_only() {
    let embedder = FakeEmbedder::new();
    let ctx = test_context(test_config(), embedder.clone(), FakeChatBackend::streaming(&[]));
    seed_persona(&ctx.store, &persona("mei", "Mei", false));
    add_memory(&ctx.store, "mei", MemoryKind::Static, "Loves the rain");
    ctx.indexer.reconcile().await.unwrap();

    let added = add_memory(&ctx.store, "mei", MemoryKind::Conversation, "Talked about the café");
    let report = ctx.indexer.reconcile().await.unwrap();
    assert_eq!(report.upserted, 1);
    assert!(ctx.index.indexed_ids().await.unwrap().contains(&added));
}

#[tokio::test]
async fn reconciliation_spans_several_load_chunks() {
    let ctx = test_context(test_config(), FakeEmbedder::new(), FakeChatBackend::streaming(&[]));
    seed_persona(&ctx.store, &persona("mei", "Mei", false));
    ctx.store
        .blocking(|conn| {
            let tx = conn.transaction()?;
            for i in 0..1_200 {
                append_memory(&tx, "mei", MemoryKind::Conversation, &format!("turn {i}"))?;
            }
            tx.commit()?;
            Ok(())
        })
        .unwrap();

    let report = ctx.indexer.reconcile().await.unwrap();
    assert_eq!(report.total, 1_200);
    assert_eq!(report.upserted, 1_200);
    assert_eq!(ctx.index.indexed_ids().await.unwrap().len(), 1_200);

    let again = ctx.indexer.reconcile().await.unwrap();
    assert_eq!(again.upserted, 0);
    assert_eq!(again.already_indexed, 1_200);
}

#[tokio::test]
async fn memory_deleted_while_indexing_leaves_no_vector() {
    let store = Store::open_in_memory().unwrap();
    let embedder = DeletingEmbedder::new(store.clone(), "Shy around strangers");
    let ctx = AppContext::new(test_config(), store, embedder, FakeChatBackend::streaming(&[]));
    seed_persona(&ctx.store, &persona("mei", "Mei", false));
    let kept = add_memory(&ctx.store, "mei", MemoryKind::Static, "Loves the rain");
    let doomed = add_memory(&ctx.store, "mei", MemoryKind::StaticPersona, "Shy around strangers");

    let report = ctx.indexer.reconcile().await.unwrap();
    assert_eq!(report.upserted, 1);
    assert_eq!(report.dropped, 1);

    let indexed = ctx.index.indexed_ids().await.unwrap();
    assert!(indexed.contains(&kept));
    assert!(!indexed.contains(&doomed));
}

#[tokio::test]
async fn first_retrieval_does_not_wait_for_the_rebuild() {
    let embedder = GatedEmbedder::new();
    let ctx = test_context(test_config(), embedder.clone(), FakeChatBackend::streaming(&[]));
    seed_persona(&ctx.store, &persona("mei", "Mei", false));
    let cat = add_memory(&ctx.store, "mei", MemoryKind::Static, "Has a cat named Mochi");
    let rain = add_memory(&ctx.store, "mei", MemoryKind::Static, "Loves the rain");

    // Memory embeddings are held back, so a retrieval that waited on the
    // rebuild would never finish.
    let found = tokio::time::timeout(
        Duration::from_secs(1),
        ctx.indexer.retrieve("mei", "Is it going to rain?", 2),
    )
    .await
    .expect("retrieval blocked on the rebuild");
    assert!(found.is_empty());

    embedder.open();
    let mut indexed = 0;
    for _ in 0..200 {
        indexed = ctx.index.count_for_persona("mei").await.unwrap();
        if indexed == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(indexed, 2, "background rebuild did not finish");

    let ids: Vec<i64> = ctx
        .indexer
        .retrieve("mei", "Is it going to rain?", 2)
        .await
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec![rain, cat]);
}

#[tokio::test]
async fn retrieval_is_scoped_to_the_persona() {
    let ctx = test_context(test_config(), FakeEmbedder::new(), FakeChatBackend::streaming(&[]));
    seed_persona(&ctx.store, &persona("mei", "Mei", false));
    seed_persona(&ctx.store, &persona("lin", "Lin", false));
    let mei_rain = add_memory(&ctx.store, "mei", MemoryKind::Static, "Loves the rain");
    add_memory(&ctx.store, "lin", MemoryKind::Static, "Hates the rain");
    add_memory(&ctx.store, "lin", MemoryKind::Static, "Walks in the rain every night");

    ctx.indexer.reconcile().await.unwrap();

    let found = ctx.indexer.retrieve("mei", "Do you like rain?", 5).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, mei_rain);
    assert!(found.iter().all(|m| m.persona_id == "mei"));
}

#[tokio::test]
async fn retrieval_orders_by_relevance() {
    let ctx = test_context(test_config(), FakeEmbedder::new(), FakeChatBackend::streaming(&[]));
    seed_persona(&ctx.store, &persona("mei", "Mei", false));
    let cat = add_memory(&ctx.store, "mei", MemoryKind::Static, "Has a cat named Mochi");
    let rain = add_memory(&ctx.store, "mei", MemoryKind::Static, "Loves the rain");
    ctx.indexer.reconcile().await.unwrap();

    let found = ctx.indexer.retrieve("mei", "Is it going to rain?", 2).await;
    let ids: Vec<i64> = found.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![rain, cat]);

    let top = ctx.indexer.retrieve("mei", "Is it going to rain?", 1).await;
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].id, rain);
}

#[tokio::test]
async fn retrieval_degrades_to_empty_when_embeddings_are_down() {
    let ctx = test_context(test_config(), Arc::new(FailingEmbedder), FakeChatBackend::streaming(&[]));
    seed_persona(&ctx.store, &persona("mei", "Mei", false));
    add_memory(&ctx.store, "mei", MemoryKind::Static, "Loves the rain");

    assert!(ctx.indexer.retrieve("mei", "rain?", 5).await.is_empty());

    let report = ctx.indexer.reconcile().await.unwrap();
    assert_eq!(report.upserted, 0);
    assert_eq!(report.skipped, 1);
}

#[tokio::test]
async fn blank_query_retrieves_nothing() {
    let embedder = FakeEmbedder::new();
    let ctx = test_context(test_config(), embedder.clone(), FakeChatBackend::streaming(&[]));
    seed_persona(&ctx.store, &persona("mei", "Mei", false));
    add_memory(&ctx.store, "mei", MemoryKind::Static, "Loves the rain");

    assert!(ctx.indexer.retrieve("mei", "   ", 5).await.is_empty());
    assert!(ctx.indexer.retrieve("mei", "rain", 0).await.is_empty());
    assert_eq!(embedder.call_count(), 0);
}

#[tokio::test]
async fn trait_changes_resync_the_index() {
    use reverie::store::state::upsert_state;
    use reverie::store::types::{StateDocument, StateKind};

    let ctx = test_context(test_config(), FakeEmbedder::new(), FakeChatBackend::streaming(&[]));
    seed_persona(&ctx.store, &persona("mei", "Mei", false));

    let write = |traits: Vec<String>| {
        let doc = StateDocument {
            dynamic_traits: traits,
            ..Default::default()
        };
        ctx.store
            .blocking(move |conn| upsert_state(conn, "mei", StateKind::Character, &doc))
            .unwrap()
    };

    let first = write(vec!["Shy around strangers".into()]);
    ctx.indexer
        .spawn_sync(first.removed_memories, first.inserted_memories.clone())
        .await
        .unwrap();
    let indexed = ctx.index.indexed_ids().await.unwrap();
    assert!(indexed.contains(&first.inserted_memories[0]));

    let second = write(vec!["Opens up over coffee".into()]);
    assert_eq!(second.removed_memories, first.inserted_memories);
    ctx.indexer
        .spawn_sync(second.removed_memories, second.inserted_memories.clone())
        .await
        .unwrap();
    let indexed = ctx.index.indexed_ids().await.unwrap();
    assert!(!indexed.contains(&first.inserted_memories[0]));
    assert!(indexed.contains(&second.inserted_memories[0]));
}
