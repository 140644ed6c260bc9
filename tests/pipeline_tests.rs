use std::time::Duration;

use futures::{StreamExt, stream};
use pushkind_matcher::domain::query::{Query, QueryCategory};
use pushkind_matcher::processing::embedding::SimilarityFilter;
use pushkind_matcher::processing::pipeline::{MatchPipeline, PipelineError};
use pushkind_matcher::processing::verification::{RetryPolicy, Verifier};
use pushkind_matcher::providers::GenerationError;
use pushkind_matcher::repository::{DieselRepository, DocumentReader};

mod common;

use common::{ScriptedGenerator, TableEmbedder, TestDb, at_similarity, document};

const ARTICLE: &str = "Rocket launch schedule";

fn no_wait() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        rate_limit_backoff: Duration::ZERO,
        transient_backoff: Duration::ZERO,
    }
}

fn embedder() -> TableEmbedder {
    TableEmbedder::new(&[
        (ARTICLE, vec![1.0, 0.0]),
        ("space launches", at_similarity(0.9)),
        ("orbital rockets", at_similarity(0.8)),
        ("cooking", at_similarity(0.2)),
    ])
}

fn queries() -> Vec<Query> {
    vec![
        Query::new("space launches", QueryCategory::Topic),
        Query::new("orbital rockets", QueryCategory::Question),
        Query::general("cooking"),
    ]
}

fn pipeline(
    generator: ScriptedGenerator,
    repo: DieselRepository,
) -> MatchPipeline<TableEmbedder, ScriptedGenerator, DieselRepository> {
    MatchPipeline::new(
        SimilarityFilter::new(embedder(), 5, 0.55),
        Verifier::new(generator, no_wait(), 1000),
        repo,
    )
}

#[tokio::test]
async fn verified_matches_are_persisted_with_scores_and_categories() {
    let db = TestDb::new();
    let generator = ScriptedGenerator::new(vec![Ok("1. yes\n2. no".to_string())]);
    let pipeline = pipeline(generator.clone(), db.repo());
    let queries = queries();

    let processed: Vec<_> = pipeline
        .process(
            stream::iter(vec![document("https://example.com/launch", ARTICLE, "")]),
            &queries,
        )
        .collect()
        .await;

    assert_eq!(generator.calls(), 1);
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].matches.len(), 1);

    let stored = db
        .repo()
        .find_document_by_url("https://example.com/launch")
        .expect("lookup")
        .expect("persisted");
    assert_eq!(stored.id, processed[0].id);
    assert_eq!(stored.matches.len(), 1);
    assert_eq!(stored.matches[0].query_text, "space launches");
    assert_eq!(stored.matches[0].category, "topic");
    assert!((stored.matches[0].similarity_score - 0.9).abs() < 0.005);
}

#[tokio::test]
async fn rejected_and_dissimilar_documents_are_not_stored() {
    let db = TestDb::new();
    let generator = ScriptedGenerator::new(vec![Ok("1. no\n2. no".to_string())]);
    let pipeline = pipeline(generator.clone(), db.repo());
    let queries = queries();

    let stats = pipeline
        .run(
            stream::iter(vec![
                document("https://example.com/launch", ARTICLE, ""),
                document("https://example.com/recipes", "Unrelated article", ""),
            ]),
            &queries,
            2,
        )
        .await
        .expect("run succeeds");

    assert_eq!(stats.documents, 2);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.below_similarity, 1);
    assert_eq!(stats.persisted, 0);
    assert_eq!(generator.calls(), 1);
    assert!(db.repo().list_recent_documents(10).expect("recent").is_empty());
}

#[tokio::test]
async fn reprocessing_a_url_keeps_one_document() {
    let db = TestDb::new();
    let generator = ScriptedGenerator::new(vec![
        Ok("1. yes\n2. no".to_string()),
        Ok("1. no\n2. yes".to_string()),
    ]);
    let pipeline = pipeline(generator, db.repo());
    let queries = queries();

    let first = pipeline
        .run(
            stream::iter(vec![document("https://example.com/launch", ARTICLE, "")]),
            &queries,
            1,
        )
        .await
        .expect("first run");
    let second = pipeline
        .run(
            stream::iter(vec![document(
                "https://example.com/launch",
                ARTICLE,
                "",
            )]),
            &queries,
            1,
        )
        .await
        .expect("second run");

    assert_eq!(first.persisted, 1);
    assert_eq!(second.persisted, 1);
    let stored = db.repo().list_recent_documents(10).expect("recent");
    assert_eq!(stored.len(), 1);
    let mut texts: Vec<_> = stored[0]
        .matches
        .iter()
        .map(|m| m.query_text.as_str())
        .collect();
    texts.sort();
    assert_eq!(texts, vec!["orbital rockets", "space launches"]);
}

#[tokio::test]
async fn provider_outage_is_reported_and_nothing_is_stored() {
    let db = TestDb::new();
    let generator = ScriptedGenerator::new(vec![
        Err(GenerationError::RateLimited("quota".into())),
        Err(GenerationError::RateLimited("quota".into())),
        Err(GenerationError::Transport("reset".into())),
    ]);
    let pipeline = pipeline(generator.clone(), db.repo());
    let queries = queries();

    let result = pipeline
        .run(
            stream::iter(vec![document("https://example.com/launch", ARTICLE, "")]),
            &queries,
            1,
        )
        .await;

    assert!(matches!(result, Err(PipelineError::ProviderUnavailable(1))));
    assert_eq!(generator.calls(), 3);
    assert!(db.repo().list_recent_documents(10).expect("recent").is_empty());
}
