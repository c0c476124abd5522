//! End-to-end knowledge-base lifecycle: index, search, re-index, clear,
//! and crash-safety around the staged index replacement.

use std::fs;

use meeseeks_core::config::MeeseeksConfig;
use meeseeks_knowledge::{CancelToken, IndexMode, KnowledgeService, TFIDF_MODEL_TAG};

fn write_page(service: &KnowledgeService, kb: &str, hash: &str, url: &str, text: &str) {
    let dir = service.store().pages_dir(kb);
    fs::create_dir_all(&dir).unwrap();
    let record = serde_json::json!({
        "url": url,
        "title": format!("Page {hash}"),
        "text": text,
        "sourceId": format!("src-{hash}"),
    });
    fs::write(dir.join(format!("{hash}.json")), record.to_string()).unwrap();
}

/// A small two-page KB: one page about animals, one about HTTP. A chunk
/// size of 40 forces sentence-level chunks so the HTTP terms repeat
/// across chunks and survive the document-frequency cutoff.
fn tiny_kb() -> (tempfile::TempDir, KnowledgeService) {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = MeeseeksConfig::default();
    config.chunk_size = 40;
    config.chunk_overlap = 10;
    let service = KnowledgeService::with_config(tmp.path(), &config);

    write_page(
        &service,
        "kb",
        "h1",
        "https://a.example/",
        "Cats are small carnivorous mammals. Dogs are loyal companions. Birds can fly.",
    );
    write_page(
        &service,
        "kb",
        "h2",
        "https://b.example/",
        "Servers respond to HTTP requests. Clients send HTTP requests.",
    );
    (tmp, service)
}

#[tokio::test]
async fn index_then_search_tiny_kb() {
    let (_tmp, service) = tiny_kb();

    let outcome = service
        .index_kb("kb", |_, _, _| {}, &CancelToken::new())
        .await;
    assert!(outcome.success, "index failed: {:?}", outcome.error);
    assert_eq!(outcome.mode, Some(IndexMode::Tfidf));
    assert!(outcome.chunk_count >= 3);
    assert!(service.is_indexed("kb"));

    // The persisted index carries the tf-idf tag and a real vocabulary.
    let index = service.store().load_index("kb").unwrap();
    assert_eq!(index.model, TFIDF_MODEL_TAG);
    assert!(index.dimensions > 0);
    let vocabulary = service.store().load_vocabulary("kb").unwrap();
    assert_eq!(vocabulary.dimensions(), index.dimensions);

    // Both top hits for an HTTP query come from the HTTP page.
    let results = service.search_kb("kb", "http request", 2);
    assert_eq!(results.len(), 2);
    assert!(results[0].score > 0.0);
    for result in &results {
        assert_eq!(result.chunk.page_hash, "h2");
        assert_eq!(result.chunk.page_url, "https://b.example/");
    }
    // Scores are non-increasing.
    assert!(results[0].score >= results[1].score);
}

#[tokio::test]
async fn zero_match_query_returns_zero_scores() {
    let (_tmp, service) = tiny_kb();
    let outcome = service
        .index_kb("kb", |_, _, _| {}, &CancelToken::new())
        .await;
    assert!(outcome.success);

    // "quantum" is nowhere in the vocabulary: the query embeds to the
    // zero vector and everything scores 0.0, but results still come back.
    let results = service.search_kb("kb", "quantum", 5);
    assert_eq!(results.len(), outcome.chunk_count.min(5));
    assert!(results.iter().all(|r| r.score == 0.0));
    // Ties resolve to ascending chunk id.
    let ids: Vec<usize> = results.iter().map(|r| r.chunk.id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
}

#[tokio::test]
async fn top_k_results_are_prefixes_of_each_other() {
    let (_tmp, service) = tiny_kb();
    service
        .index_kb("kb", |_, _, _| {}, &CancelToken::new())
        .await;

    let two = service.search_kb("kb", "http request", 2);
    let four = service.search_kb("kb", "http request", 4);
    assert!(two.len() <= four.len());
    for (a, b) in two.iter().zip(&four) {
        assert_eq!(a.chunk.id, b.chunk.id);
        assert_eq!(a.score, b.score);
    }
}

#[tokio::test]
async fn reindex_is_idempotent() {
    let (_tmp, service) = tiny_kb();

    let first = service
        .index_kb("kb", |_, _, _| {}, &CancelToken::new())
        .await;
    assert!(first.success);
    let bin_path = service.store().index_dir("kb").join("embeddings.bin");
    let first_len = fs::metadata(&bin_path).unwrap().len();
    let first_stats = service.index_stats("kb").unwrap();

    let second = service
        .index_kb("kb", |_, _, _| {}, &CancelToken::new())
        .await;
    assert!(second.success);
    let second_len = fs::metadata(&bin_path).unwrap().len();
    let second_stats = service.index_stats("kb").unwrap();

    assert_eq!(first.chunk_count, second.chunk_count);
    assert_eq!(first_stats.chunk_count, second_stats.chunk_count);
    assert_eq!(first_len, second_len);

    // Same corpus, same scores.
    let results = service.search_kb("kb", "http request", 2);
    assert_eq!(results.len(), 2);
    assert!(results[0].score > 0.0);
}

#[tokio::test]
async fn clear_index_removes_index_but_not_pages() {
    let (_tmp, service) = tiny_kb();
    service
        .index_kb("kb", |_, _, _| {}, &CancelToken::new())
        .await;
    assert!(service.is_indexed("kb"));

    service.clear_index("kb");
    assert!(!service.is_indexed("kb"));
    assert!(!service.store().index_dir("kb").exists());
    let stats = service.index_stats("kb").unwrap();
    assert!(!stats.indexed);
    assert_eq!(stats.chunk_count, 0);

    // Pages survive and the KB can be re-indexed from them.
    assert_eq!(service.store().load_pages("kb").unwrap().len(), 2);
    let outcome = service
        .index_kb("kb", |_, _, _| {}, &CancelToken::new())
        .await;
    assert!(outcome.success);
    assert!(service.is_indexed("kb"));

    // Clearing twice is fine.
    service.clear_index("kb");
    service.clear_index("kb");
    assert!(!service.is_indexed("kb"));
}

#[tokio::test]
async fn embeddings_file_size_matches_index_shape() {
    let (_tmp, service) = tiny_kb();
    let outcome = service
        .index_kb("kb", |_, _, _| {}, &CancelToken::new())
        .await;
    assert!(outcome.success);

    let index = service.store().load_index("kb").unwrap();
    let bin_len = fs::metadata(service.store().index_dir("kb").join("embeddings.bin"))
        .unwrap()
        .len() as usize;
    assert_eq!(bin_len, index.chunks.len() * index.dimensions * 4);
    assert_eq!(index.chunks.len(), outcome.chunk_count);

    // Chunk ids are dense and offsets are monotonic per page.
    for (i, chunk) in index.chunks.iter().enumerate() {
        assert_eq!(chunk.id, i);
        assert!(chunk.end_idx >= chunk.start_idx);
    }
}

#[tokio::test]
async fn crash_between_staging_and_publish_is_invisible() {
    let (_tmp, service) = tiny_kb();
    let outcome = service
        .index_kb("kb", |_, _, _| {}, &CancelToken::new())
        .await;
    assert!(outcome.success);
    let published = fs::read_to_string(service.store().index_dir("kb").join("chunks.json")).unwrap();

    // Simulate a writer that died after staging files but before the
    // rename: a populated index.new next to the live index.
    let staging = service.store().kb_dir("kb").join("index.new");
    fs::create_dir_all(&staging).unwrap();
    fs::write(staging.join("chunks.json"), "{\"partial\": true}").unwrap();
    fs::write(staging.join("embeddings.bin"), [1u8, 2, 3]).unwrap();

    // The previous generation is untouched and fully queryable.
    assert!(service.is_indexed("kb"));
    let results = service.search_kb("kb", "http request", 2);
    assert_eq!(results.len(), 2);
    let still = fs::read_to_string(service.store().index_dir("kb").join("chunks.json")).unwrap();
    assert_eq!(published, still);

    // The next indexing run sweeps the leftover staging away.
    let outcome = service
        .index_kb("kb", |_, _, _| {}, &CancelToken::new())
        .await;
    assert!(outcome.success);
    assert!(!staging.exists());
}

#[tokio::test]
async fn crash_before_any_publish_means_not_indexed() {
    let tmp = tempfile::tempdir().unwrap();
    let service = KnowledgeService::new(tmp.path());
    write_page(&service, "kb", "h1", "https://a.example/", "alpha beta gamma.");

    // Stage only; never rename, never touch the manifest.
    let staging = service.store().kb_dir("kb").join("index.new");
    fs::create_dir_all(&staging).unwrap();
    fs::write(staging.join("chunks.json"), "{}").unwrap();
    fs::write(staging.join("embeddings.bin"), [0u8; 4]).unwrap();

    assert!(!service.is_indexed("kb"));
    assert!(service.index_stats("kb").is_none());
    assert!(service.search_kb("kb", "alpha", 5).is_empty());
}

#[tokio::test]
async fn search_results_feed_the_condenser() {
    let (_tmp, service) = tiny_kb();
    service
        .index_kb("kb", |_, _, _| {}, &CancelToken::new())
        .await;

    let results = service.search_kb("kb", "http request", 2);
    let kb_content = KnowledgeService::build_context(&results);
    assert!(kb_content.contains("Source: https://b.example/"));
    assert!(kb_content.contains("## Page h2"));

    // Formatted context drops cleanly out of the system prompt when the
    // budget demands it.
    let req = meeseeks_knowledge::CondenseRequest {
        model_id: "gpt-4".into(),
        system_prompt: format!("Answer with context.\n\n{kb_content}\n\n{}", "pad ".repeat(7000)),
        user_prompt: "How do clients talk to servers?".into(),
        kb_content: Some(kb_content),
        search_result_count: results.len(),
        ..Default::default()
    };
    let condensed = meeseeks_knowledge::condense_context(&req);
    assert!(condensed.condensed);
    assert!(condensed.final_tokens <= condensed.original_tokens);
}
