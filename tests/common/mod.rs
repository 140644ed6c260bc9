//! Helpers for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pushkind_matcher::db::{DbPool, establish_connection_pool};
use pushkind_matcher::domain::document::{Document, VerifiedMatch};
use pushkind_matcher::processing::embedding::{Embedder, EmbeddingError};
use pushkind_matcher::providers::{
    ChannelError, GenerationError, MessageChannel, MessageFormat, TextGenerator,
};
use pushkind_matcher::repository::DieselRepository;
use tempfile::TempDir;

/// Temporary database used in integration tests.
pub struct TestDb {
    _dir: TempDir,
    pool: DbPool,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir.");
        let path = dir.path().join("test.db");
        let pool = establish_connection_pool(path.to_str().expect("utf-8 temp path"))
            .expect("Failed to establish SQLite connection.");
        TestDb { _dir: dir, pool }
    }

    pub fn pool(&self) -> DbPool {
        self.pool.clone()
    }

    pub fn repo(&self) -> DieselRepository {
        DieselRepository::new(self.pool())
    }
}

pub fn document(url: &str, title: &str, content: &str) -> Document {
    Document {
        title: title.to_string(),
        url: url.to_string(),
        source: "test-source".to_string(),
        content: content.to_string(),
        published_at: "2024-05-01".to_string(),
    }
}

pub fn verified(query: &str, score: f32) -> VerifiedMatch {
    VerifiedMatch {
        query_text: query.to_string(),
        similarity_score: score,
        verifier_response: "yes".to_string(),
        category: "general".to_string(),
    }
}

/// Unit vector whose cosine against `[1, 0]` is `score`.
pub fn at_similarity(score: f32) -> Vec<f32> {
    vec![score, (1.0 - score * score).max(0.0).sqrt()]
}

/// Fixed text-to-vector table; unknown texts embed to zero.
pub struct TableEmbedder(pub HashMap<String, Vec<f32>>);

impl TableEmbedder {
    pub fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self(
            entries
                .iter()
                .map(|(text, v)| (text.to_string(), v.clone()))
                .collect(),
        )
    }
}

impl Embedder for TableEmbedder {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|t| self.0.get(t).cloned().unwrap_or_else(|| vec![0.0, 0.0]))
            .collect())
    }
}

/// Replays canned replies and counts calls through a shared handle.
#[derive(Clone, Default)]
pub struct ScriptedGenerator {
    replies: Arc<Mutex<VecDeque<Result<String, GenerationError>>>>,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn complete(&self, _prompt: &str) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .expect("replies mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::Transport("no scripted reply".into())))
    }
}

/// Collects every message it is asked to send.
#[derive(Clone, Default)]
pub struct RecordingChannel {
    pub sent: Arc<Mutex<Vec<(String, MessageFormat)>>>,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<(String, MessageFormat)> {
        self.sent.lock().expect("sent mutex poisoned").clone()
    }
}

#[async_trait]
impl MessageChannel for RecordingChannel {
    async fn send(
        &self,
        _recipient: &str,
        text: &str,
        format: MessageFormat,
    ) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .expect("sent mutex poisoned")
            .push((text.to_string(), format));
        Ok(())
    }
}
