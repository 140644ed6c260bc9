use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use thiserror::Error;

use crate::domain::query::Query;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Failed to initialize embedding model: {0}")]
    Init(String),
    #[error("Failed to generate embedding: {0}")]
    Encode(String),
    #[error("Embedder returned {returned} vectors for {requested} texts")]
    Count { requested: usize, returned: usize },
}

/// Maps texts to unit vectors. Both sides of a comparison must come from the
/// same implementation.
pub trait Embedder: Send + Sync {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Local fastembed model. `TextEmbedding` needs exclusive access while it
/// runs, so calls are serialized.
pub struct FastTextEmbedder {
    model: Mutex<TextEmbedding>,
}

impl FastTextEmbedder {
    pub fn try_new() -> Result<Self, EmbeddingError> {
        Self::with_model(EmbeddingModel::BGELargeENV15)
    }

    pub fn with_model(model: EmbeddingModel) -> Result<Self, EmbeddingError> {
        let model = TextEmbedding::try_new(InitOptions::new(model))
            .map_err(|error| EmbeddingError::Init(format!("{error:?}")))?;
        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl Embedder for FastTextEmbedder {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| EmbeddingError::Encode("embedding model mutex poisoned".to_string()))?;
        let vectors = model
            .embed(texts.to_vec(), None)
            .map_err(|error| EmbeddingError::Encode(format!("{error:?}")))?;
        Ok(vectors.iter().map(|v| normalize_embedding(v)).collect())
    }
}

/// Normalize a vector to unit length.
///
/// Returns the original vector when the norm is zero.
pub(crate) fn normalize_embedding(vec: &[f32]) -> Vec<f32> {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        vec.to_vec()
    } else {
        vec.iter().map(|x| x / norm).collect()
    }
}

/// Cosine similarity of two unit vectors.
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[derive(Clone, Debug, PartialEq)]
pub struct RankedQuery {
    pub query: Query,
    pub score: f32,
}

/// Rank `queries` against `document_text` and keep the `top_k` best scoring
/// strictly above `threshold`. Equal scores keep their input order.
pub fn rank_queries<E>(
    embedder: &E,
    document_text: &str,
    queries: &[Query],
    top_k: usize,
    threshold: f32,
) -> Result<Vec<RankedQuery>, EmbeddingError>
where
    E: Embedder + ?Sized,
{
    if queries.is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }

    let mut texts = Vec::with_capacity(queries.len() + 1);
    texts.push(document_text.to_string());
    texts.extend(queries.iter().map(|q| q.text.clone()));

    let vectors = embedder.encode(&texts)?;
    if vectors.len() != texts.len() {
        return Err(EmbeddingError::Count {
            requested: texts.len(),
            returned: vectors.len(),
        });
    }

    let (document_vector, query_vectors) = vectors.split_at(1);
    let document_vector = &document_vector[0];

    let mut ranked: Vec<RankedQuery> = queries
        .iter()
        .zip(query_vectors)
        .map(|(query, vector)| RankedQuery {
            query: query.clone(),
            score: cosine(document_vector, vector),
        })
        .filter(|ranked| ranked.score > threshold)
        .collect();

    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(top_k);

    Ok(ranked)
}

/// First pipeline stage: cheap vector comparison.
pub struct SimilarityFilter<E> {
    embedder: E,
    top_k: usize,
    threshold: f32,
}

impl<E: Embedder> SimilarityFilter<E> {
    pub fn new(embedder: E, top_k: usize, threshold: f32) -> Self {
        Self {
            embedder,
            top_k,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn rank(
        &self,
        document_text: &str,
        queries: &[Query],
    ) -> Result<Vec<RankedQuery>, EmbeddingError> {
        rank_queries(
            &self.embedder,
            document_text,
            queries,
            self.top_k,
            self.threshold,
        )
    }
}
