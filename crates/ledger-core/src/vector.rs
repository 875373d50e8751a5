use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{EmbeddedExpense, Expense};
use crate::storage::LedgerStore;

/// Score given to a row whose stored embedding cannot be decoded. Lower than
/// any real cosine similarity, so such rows sort last.
pub const UNREADABLE_SCORE: f32 = -1.0;

/// Nearest-neighbour lookup over expense embeddings.
///
/// The assistant only talks to this trait, so an indexed implementation can
/// replace the linear scan in [`VectorStore`].
pub trait Retriever: Send + Sync {
    /// Overwrite the embedding of one expense. Dimensionality is not checked.
    fn add_embedding(
        &self,
        expense_id: i64,
        vector: &[f32],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Top `k` expenses by descending similarity to `query`.
    fn search(&self, query: &[f32], k: usize) -> impl Future<Output = Result<Vec<Expense>>> + Send;
}

/// Brute-force retriever: scans every embedded expense on each query.
///
/// O(n·d) per search. Fine for a personal ledger of a few thousand rows.
pub struct VectorStore<S> {
    store: Arc<S>,
}

impl<S> Clone for VectorStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> VectorStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Like [`Retriever::search`] but keeps the similarity of each hit.
    pub async fn search_scored(&self, query: &[f32], k: usize) -> Result<Vec<(Expense, f32)>> {
        let rows = self.store.expenses_with_embedding().await?;
        let scanned = rows.len();
        let mut ranked = rank_by_similarity(query, rows);
        ranked.truncate(k);
        tracing::debug!(scanned, results = ranked.len(), "vector search");
        Ok(ranked)
    }
}

impl<S: LedgerStore> Retriever for VectorStore<S> {
    async fn add_embedding(&self, expense_id: i64, vector: &[f32]) -> Result<()> {
        self.store.update_expense_embedding(expense_id, vector).await
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Expense>> {
        Ok(self
            .search_scored(query, k)
            .await?
            .into_iter()
            .map(|(expense, _)| expense)
            .collect())
    }
}

/// Dot product over the product of Euclidean norms.
///
/// Only the overlapping prefix of two vectors of different length is
/// compared. A zero norm is replaced by 1, so a zero vector scores 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denominator = norm_a.sqrt() * norm_b.sqrt();
    let denominator = if denominator == 0.0 { 1.0 } else { denominator };
    dot / denominator
}

/// Score every row against `query` and sort by descending similarity.
///
/// Rows with an undecodable embedding get [`UNREADABLE_SCORE`]. Ties keep
/// their input order.
pub fn rank_by_similarity(query: &[f32], rows: Vec<EmbeddedExpense>) -> Vec<(Expense, f32)> {
    let mut scored: Vec<(Expense, f32)> = rows
        .into_iter()
        .map(|row| {
            let score = match serde_json::from_str::<Vec<f32>>(&row.embedding) {
                Ok(vector) => cosine_similarity(query, &vector),
                Err(e) => {
                    tracing::warn!(expense_id = row.expense.id, error = %e, "unreadable stored embedding");
                    UNREADABLE_SCORE
                }
            };
            (row.expense, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored
}
