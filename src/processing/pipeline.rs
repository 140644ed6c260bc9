use std::pin::pin;

use futures::future;
use futures::stream::{Stream, StreamExt};
use thiserror::Error;

use crate::domain::document::{Document, ProcessedDocument, VerifiedMatch};
use crate::domain::query::Query;
use crate::processing::embedding::{Embedder, SimilarityFilter};
use crate::processing::verification::{VerificationOutcome, Verifier};
use crate::providers::TextGenerator;
use crate::repository::DocumentWriter;

/// What happened to a single input document.
#[derive(Debug)]
pub enum DocumentOutcome {
    Persisted(ProcessedDocument),
    NoQueries,
    BelowSimilarity,
    EmbeddingFailed,
    VerificationFailed,
    Rejected,
    PersistFailed,
}

impl DocumentOutcome {
    pub fn into_processed(self) -> Option<ProcessedDocument> {
        match self {
            DocumentOutcome::Persisted(processed) => Some(processed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub documents: usize,
    pub persisted: usize,
    pub matches_persisted: usize,
    pub no_queries: usize,
    pub below_similarity: usize,
    pub embedding_failures: usize,
    pub verification_failures: usize,
    pub rejected: usize,
    pub persist_failures: usize,
}

impl PipelineStats {
    fn record(&mut self, outcome: &DocumentOutcome) {
        self.documents += 1;
        match outcome {
            DocumentOutcome::Persisted(processed) => {
                self.persisted += 1;
                self.matches_persisted += processed.matches.len();
            }
            DocumentOutcome::NoQueries => self.no_queries += 1,
            DocumentOutcome::BelowSimilarity => self.below_similarity += 1,
            DocumentOutcome::EmbeddingFailed => self.embedding_failures += 1,
            DocumentOutcome::VerificationFailed => self.verification_failures += 1,
            DocumentOutcome::Rejected => self.rejected += 1,
            DocumentOutcome::PersistFailed => self.persist_failures += 1,
        }
    }

    /// Documents that reached the verification stage.
    pub fn verification_calls(&self) -> usize {
        self.persisted + self.rejected + self.verification_failures + self.persist_failures
    }

    fn into_result(self) -> Result<Self, PipelineError> {
        if self.verification_failures > 0 && self.verification_failures == self.verification_calls()
        {
            return Err(PipelineError::ProviderUnavailable(self.verification_failures));
        }
        if self.embedding_failures > 0
            && self.embedding_failures == self.documents - self.no_queries
        {
            return Err(PipelineError::EmbedderUnavailable(self.embedding_failures));
        }
        Ok(self)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Generative model unavailable: all {0} verification calls failed")]
    ProviderUnavailable(usize),
    #[error("Embedding model unavailable: all {0} documents failed to embed")]
    EmbedderUnavailable(usize),
}

/// Similarity filter, then verification, then persistence, one document at a
/// time.
pub struct MatchPipeline<E, G, R> {
    filter: SimilarityFilter<E>,
    verifier: Verifier<G>,
    repo: R,
}

impl<E, G, R> MatchPipeline<E, G, R>
where
    E: Embedder,
    G: TextGenerator,
    R: DocumentWriter,
{
    pub fn new(filter: SimilarityFilter<E>, verifier: Verifier<G>, repo: R) -> Self {
        Self {
            filter,
            verifier,
            repo,
        }
    }

    /// Run both stages for `document` and persist it when at least one match
    /// survives verification.
    pub async fn process_document(&self, document: Document, queries: &[Query]) -> DocumentOutcome {
        if queries.is_empty() {
            log::debug!("No queries configured, skipping {}", document.url);
            return DocumentOutcome::NoQueries;
        }

        let ranked = match self.filter.rank(document.embedding_text(), queries) {
            Ok(ranked) => ranked,
            Err(error) => {
                log::error!("Failed to rank queries for {}: {error}", document.url);
                return DocumentOutcome::EmbeddingFailed;
            }
        };

        if ranked.is_empty() {
            log::debug!(
                "No query above {} similarity for '{}'",
                self.filter.threshold(),
                document.title
            );
            return DocumentOutcome::BelowSimilarity;
        }

        let candidates: Vec<String> = ranked.iter().map(|r| r.query.text.clone()).collect();
        let verdicts = self.verifier.verify(&document, &candidates).await;

        if verdicts.iter().any(VerificationOutcome::is_error) {
            return DocumentOutcome::VerificationFailed;
        }

        // Both stages preserve candidate order.
        let matches: Vec<VerifiedMatch> = ranked
            .into_iter()
            .zip(verdicts)
            .filter(|(_, verdict)| verdict.is_relevant)
            .map(|(ranked, verdict)| VerifiedMatch {
                query_text: ranked.query.text,
                similarity_score: ranked.score,
                verifier_response: verdict.raw_response,
                category: ranked.query.category.to_string(),
            })
            .collect();

        if matches.is_empty() {
            log::debug!("Verifier rejected every candidate for '{}'", document.title);
            return DocumentOutcome::Rejected;
        }

        match self.repo.upsert_document(&document, &matches) {
            Ok(id) => {
                log::info!(
                    "Saved '{}' ({}) with {} verified matches",
                    document.title,
                    document.url,
                    matches.len()
                );
                DocumentOutcome::Persisted(ProcessedDocument {
                    id,
                    document,
                    matches,
                })
            }
            Err(error) => {
                log::error!("Failed to save {}: {error}", document.url);
                DocumentOutcome::PersistFailed
            }
        }
    }

    /// Lazily process `documents` in order. Nothing past the item being
    /// polled is touched.
    pub fn outcomes<'a, S>(
        &'a self,
        documents: S,
        queries: &'a [Query],
    ) -> impl Stream<Item = DocumentOutcome> + 'a
    where
        S: Stream<Item = Document> + 'a,
    {
        documents.then(move |document| self.process_document(document, queries))
    }

    /// Persisted documents only, in input order.
    pub fn process<'a, S>(
        &'a self,
        documents: S,
        queries: &'a [Query],
    ) -> impl Stream<Item = ProcessedDocument> + 'a
    where
        S: Stream<Item = Document> + 'a,
    {
        self.outcomes(documents, queries)
            .filter_map(|outcome| future::ready(outcome.into_processed()))
    }

    /// Like [`Self::outcomes`] but keeps up to `workers` documents in flight.
    /// Results are still yielded in input order.
    pub fn outcomes_buffered<'a, S>(
        &'a self,
        documents: S,
        queries: &'a [Query],
        workers: usize,
    ) -> impl Stream<Item = DocumentOutcome> + 'a
    where
        S: Stream<Item = Document> + 'a,
    {
        documents
            .map(move |document| self.process_document(document, queries))
            .buffered(workers.max(1))
    }

    /// Drain `documents` and report counters. Fails only when the model
    /// provider (or the embedder) failed for every document that needed it.
    pub async fn run<S>(
        &self,
        documents: S,
        queries: &[Query],
        workers: usize,
    ) -> Result<PipelineStats, PipelineError>
    where
        S: Stream<Item = Document>,
    {
        let mut outcomes = pin!(self.outcomes_buffered(documents, queries, workers));
        let mut stats = PipelineStats::default();
        while let Some(outcome) = outcomes.next().await {
            stats.record(&outcome);
        }

        log::info!(
            "Finished pipeline run: documents={}, persisted={}, matches={}, below_similarity={}, rejected={}, no_queries={}, embedding_failures={}, verification_failures={}, persist_failures={}",
            stats.documents,
            stats.persisted,
            stats.matches_persisted,
            stats.below_similarity,
            stats.rejected,
            stats.no_queries,
            stats.embedding_failures,
            stats.verification_failures,
            stats.persist_failures
        );

        stats.into_result()
    }
}
