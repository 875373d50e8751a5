//! Two-phase conversation with the language model.
//!
//! A turn starts in [`Phase::Extracting`]: the model is asked to turn the
//! user's text into `{amount, category, merchant}`. If that works the expense
//! is stored and the turn ends. Otherwise the text is treated as a question,
//! similar expenses are retrieved and a second generation in
//! [`Phase::RagGenerating`] produces the answer.

mod extract;
mod prompt;

pub use extract::{parse_extraction, ExtractedTransaction, Extraction};
pub use prompt::{extraction_messages, rag_messages, render_context, EMPTY_CONTEXT};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::config::LedgerConfig;
use crate::embedding::EmbeddingService;
use crate::error::{LedgerError, Result};
use crate::llm::{LanguageModel, LlmMessage};
use crate::model::{
    AiResponse, BudgetStatus, Currency, LoggedTransaction, NewExpense, PREDEFINED_CATEGORIES,
};
use crate::storage::LedgerStore;
use crate::vector::Retriever;

pub const MODEL_LOADING: &str = "Model is loading...";
pub const SAVE_FAILED: &str = "Failed to save expense.";
pub const EXTRACTION_FAILED: &str = "Failed to process your message.";
pub const SEARCH_FAILED: &str = "Failed to search your expenses.";
pub const ANSWER_FAILED: &str = "Failed to generate an answer.";
pub const NO_RESULT: &str = "Error processing request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Extracting,
    RagGenerating,
}

/// One outstanding model request. Its `id` must accompany the completion
/// or failure signal; a signal carrying any other id is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub id: u64,
    pub messages: Vec<LlmMessage>,
}

/// What the driver should do after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Submit these messages to the model and report back.
    Generate(Generation),
    /// The turn is over and this response has been published.
    Done(AiResponse),
    /// The signal did not apply: no turn in flight, a stale or repeated
    /// generation id, or another signal already being handled.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct AssistantSettings {
    /// Number of expenses retrieved as answer context.
    pub context_limit: usize,
    pub fallback_category: String,
    /// Replace categories outside the known set with the fallback.
    pub strict_categories: bool,
    pub currency: &'static Currency,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default_config())
    }
}

impl AssistantSettings {
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self {
            context_limit: config.assistant.context_limit.max(1),
            fallback_category: config.assistant.fallback_category.clone(),
            strict_categories: config.assistant.strict_categories,
            currency: config.currency.currency(),
        }
    }

    /// Canonical category for an extracted one.
    pub fn resolve_category(&self, extracted: Option<&str>, known: &[String]) -> String {
        let Some(name) = extracted else {
            return self.fallback_category.clone();
        };
        match known.iter().find(|k| k.eq_ignore_ascii_case(name)) {
            Some(canonical) => canonical.clone(),
            None if self.strict_categories => self.fallback_category.clone(),
            None => name.to_string(),
        }
    }
}

struct Turn {
    phase: Phase,
    query: String,
    categories: Vec<String>,
    /// Id of the generation the current phase waits for. Taken by the first
    /// signal that answers it.
    pending: Option<u64>,
}

struct Inner<M, S, R> {
    model: M,
    store: Arc<S>,
    retriever: R,
    embedder: EmbeddingService,
    settings: AssistantSettings,
    turn: Mutex<Turn>,
    /// Held from the start of a turn until its result is published.
    busy: AtomicBool,
    /// Held while a completion or failure signal is being handled.
    handling: AtomicBool,
    next_generation: AtomicU64,
    result: watch::Sender<Option<AiResponse>>,
    processing: watch::Sender<bool>,
}

/// Turns one user utterance into a stored transaction, an answer, or an
/// error. Cheap to clone; clones share the same state.
pub struct ExpenseAssistant<M, S, R> {
    inner: Arc<Inner<M, S, R>>,
}

impl<M, S, R> Clone for ExpenseAssistant<M, S, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M, S, R> ExpenseAssistant<M, S, R>
where
    M: LanguageModel,
    S: LedgerStore,
    R: Retriever,
{
    pub fn new(
        model: M,
        store: Arc<S>,
        retriever: R,
        embedder: EmbeddingService,
        settings: AssistantSettings,
    ) -> Self {
        let (result, _) = watch::channel(None);
        let (processing, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                model,
                store,
                retriever,
                embedder,
                settings,
                turn: Mutex::new(Turn {
                    phase: Phase::Idle,
                    query: String::new(),
                    categories: Vec::new(),
                    pending: None,
                }),
                busy: AtomicBool::new(false),
                handling: AtomicBool::new(false),
                next_generation: AtomicU64::new(1),
                result,
                processing,
            }),
        }
    }

    // -- Observable state --

    pub fn model(&self) -> &M {
        &self.inner.model
    }

    pub fn settings(&self) -> &AssistantSettings {
        &self.inner.settings
    }

    /// Last produced outcome, `None` while a turn is running.
    pub fn result(&self) -> Option<AiResponse> {
        self.inner.result.borrow().clone()
    }

    pub fn subscribe_result(&self) -> watch::Receiver<Option<AiResponse>> {
        self.inner.result.subscribe()
    }

    pub fn is_processing(&self) -> bool {
        *self.inner.processing.borrow()
    }

    pub fn subscribe_processing(&self) -> watch::Receiver<bool> {
        self.inner.processing.subscribe()
    }

    pub fn model_ready(&self) -> bool {
        self.inner.model.is_ready()
    }

    pub fn download_progress(&self) -> f32 {
        self.inner.model.download_progress()
    }

    pub async fn phase(&self) -> Phase {
        self.inner.turn.lock().await.phase
    }

    // -- Driving a turn --

    /// Run one turn to completion and return its outcome.
    pub async fn ask(&self, text: &str) -> Result<AiResponse> {
        let step = self.start_turn(text).await?;
        Ok(self
            .drive(step)
            .await
            .unwrap_or_else(|| AiResponse::error(NO_RESULT)))
    }

    /// Begin a turn. Validates state, records the query and returns the
    /// extraction prompt. If the model is not ready the error result is
    /// published and returned as [`Step::Done`] without any transition.
    ///
    /// Fails with [`LedgerError::Busy`] while another turn is in flight;
    /// nothing is published in that case.
    pub async fn start_turn(&self, text: &str) -> Result<Step> {
        let inner = &self.inner;
        if inner
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LedgerError::Busy);
        }

        if !inner.model.is_ready() {
            let response = AiResponse::error(MODEL_LOADING);
            inner.result.send_replace(Some(response.clone()));
            inner.busy.store(false, Ordering::SeqCst);
            return Ok(Step::Done(response));
        }

        inner.result.send_replace(None);
        inner.processing.send_replace(true);

        let categories = self.known_categories().await;
        let prompt = extraction_messages(text, &categories, &inner.settings.fallback_category);
        let id = self.next_generation_id();
        {
            let mut turn = inner.turn.lock().await;
            turn.phase = Phase::Extracting;
            turn.query = text.to_string();
            turn.categories = categories;
            turn.pending = Some(id);
        }
        tracing::debug!(phase = ?Phase::Extracting, generation = id, "turn started");
        Ok(Step::Generate(Generation {
            id,
            messages: prompt,
        }))
    }

    /// Feed the output of generation `id` into the machine.
    ///
    /// Only the first signal for the generation the current phase waits for
    /// is processed; repeats, stale ids and signals racing one already in
    /// progress return [`Step::Ignored`].
    pub async fn on_generation_complete(&self, id: u64, raw: &str) -> Step {
        let Some(phase) = self.claim_signal(id).await else {
            return Step::Ignored;
        };
        let (query, categories) = {
            let turn = self.inner.turn.lock().await;
            (turn.query.clone(), turn.categories.clone())
        };

        let step = match phase {
            Phase::Idle => Step::Ignored,
            Phase::Extracting => match parse_extraction(raw) {
                Extraction::Transaction(tx) => {
                    let response = self.record_transaction(tx, &query, &categories).await;
                    self.settle(response).await
                }
                Extraction::Query => self.begin_answer(&query).await,
            },
            Phase::RagGenerating => self.settle(AiResponse::message(raw)).await,
        };

        self.finish_signal(&step);
        step
    }

    /// Generation `id` failed. Ends the turn with an error result.
    pub async fn on_generation_failed(&self, id: u64, error: &LedgerError) -> Step {
        let Some(phase) = self.claim_signal(id).await else {
            return Step::Ignored;
        };
        let message = match phase {
            Phase::Idle => {
                self.finish_signal(&Step::Ignored);
                return Step::Ignored;
            }
            Phase::Extracting => EXTRACTION_FAILED,
            Phase::RagGenerating => ANSWER_FAILED,
        };
        tracing::warn!(phase = ?phase, generation = id, error = %error, "generation failed");
        let step = self.settle(AiResponse::error(message)).await;
        self.finish_signal(&step);
        step
    }

    /// Take the `handling` flag and consume the pending generation id.
    /// Returns the phase the signal applies to, or `None` when it must be
    /// ignored.
    async fn claim_signal(&self, id: u64) -> Option<Phase> {
        let inner = &self.inner;
        if inner
            .handling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(generation = id, "signal ignored: already handling one");
            return None;
        }

        let mut turn = inner.turn.lock().await;
        if turn.pending != Some(id) {
            drop(turn);
            inner.handling.store(false, Ordering::SeqCst);
            tracing::debug!(generation = id, "signal ignored: not the pending generation");
            return None;
        }
        turn.pending = None;
        Some(turn.phase)
    }

    fn finish_signal(&self, step: &Step) {
        self.inner.handling.store(false, Ordering::SeqCst);
        self.release_if_done(step);
    }

    fn next_generation_id(&self) -> u64 {
        self.inner.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    async fn drive(&self, mut step: Step) -> Option<AiResponse> {
        loop {
            step = match step {
                Step::Generate(Generation { id, messages }) => {
                    match self.inner.model.generate(messages).await {
                        Ok(raw) => self.on_generation_complete(id, &raw).await,
                        Err(e) => self.on_generation_failed(id, &e).await,
                    }
                }
                Step::Done(response) => return Some(response),
                Step::Ignored => return None,
            };
        }
    }

    /// Publish `response` and return to idle.
    async fn settle(&self, response: AiResponse) -> Step {
        let inner = &self.inner;
        {
            let mut turn = inner.turn.lock().await;
            turn.phase = Phase::Idle;
            turn.pending = None;
        }
        inner.result.send_replace(Some(response.clone()));
        inner.processing.send_replace(false);
        tracing::debug!(kind = response.kind(), "turn finished");
        Step::Done(response)
    }

    /// Let the next turn start once this one has settled.
    fn release_if_done(&self, step: &Step) {
        if matches!(step, Step::Done(_)) {
            self.inner.busy.store(false, Ordering::SeqCst);
        }
    }

    async fn known_categories(&self) -> Vec<String> {
        match self.inner.store.list_categories().await {
            Ok(categories) => categories.into_iter().map(|c| c.name).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "could not list categories, using predefined set");
                PREDEFINED_CATEGORIES
                    .iter()
                    .map(|(name, _, _)| name.to_string())
                    .collect()
            }
        }
    }

    /// Insert the expense, then attach its embedding and read the budget.
    /// Only the insert is allowed to fail the turn.
    async fn record_transaction(
        &self,
        tx: ExtractedTransaction,
        query: &str,
        categories: &[String],
    ) -> AiResponse {
        let inner = &self.inner;
        let category = inner
            .settings
            .resolve_category(tx.category.as_deref(), categories);
        let expense =
            NewExpense::new(tx.amount, category.clone(), query).with_merchant(tx.merchant.clone());

        let id = match inner.store.insert_expense(&expense).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(category = %category, error = %e, "failed to save expense");
                return AiResponse::error(SAVE_FAILED);
            }
        };

        // Second write. A failure leaves the expense without an embedding
        // until `reembed` runs.
        match inner.embedder.embed(query).await {
            Ok(vector) => {
                if let Err(e) = inner.retriever.add_embedding(id, &vector).await {
                    tracing::warn!(expense_id = id, error = %e, "failed to attach embedding");
                }
            }
            Err(e) => tracing::warn!(expense_id = id, error = %e, "failed to embed expense"),
        }

        let budget = self.budget_status(&category).await;
        tracing::info!(expense_id = id, category = %category, amount = tx.amount, "transaction recorded");

        AiResponse::Transaction {
            data: LoggedTransaction {
                amount: tx.amount,
                category,
                merchant: tx.merchant,
                id,
                budget,
            },
        }
    }

    async fn budget_status(&self, category: &str) -> Option<BudgetStatus> {
        let store = &self.inner.store;
        let limit = match store.category_budget_limit(category).await {
            Ok(limit) => limit?,
            Err(e) => {
                tracing::warn!(category = %category, error = %e, "budget lookup failed");
                return None;
            }
        };
        match store.month_to_date_spend(category).await {
            Ok(spend) => Some(BudgetStatus::new(limit, spend)),
            Err(e) => {
                tracing::warn!(category = %category, error = %e, "month-to-date spend failed");
                None
            }
        }
    }

    /// Switch to answer generation: retrieve context and build the prompt.
    async fn begin_answer(&self, query: &str) -> Step {
        let inner = &self.inner;
        let id = self.next_generation_id();
        {
            let mut turn = inner.turn.lock().await;
            turn.phase = Phase::RagGenerating;
            turn.pending = Some(id);
        }
        tracing::debug!(phase = ?Phase::RagGenerating, generation = id, "treating input as a question");

        let vector = match inner.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "failed to embed question");
                return self.settle(AiResponse::error(SEARCH_FAILED)).await;
            }
        };
        let hits = match inner
            .retriever
            .search(&vector, inner.settings.context_limit)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed");
                return self.settle(AiResponse::error(SEARCH_FAILED)).await;
            }
        };
        tracing::debug!(results = hits.len(), "retrieved answer context");

        let context = render_context(&hits, inner.settings.currency);
        Step::Generate(Generation {
            id,
            messages: rag_messages(query, &context),
        })
    }
}

impl<M, S, R> ExpenseAssistant<M, S, R>
where
    M: LanguageModel + 'static,
    S: LedgerStore + 'static,
    R: Retriever + 'static,
{
    /// Start a turn and return immediately; the outcome arrives through
    /// [`subscribe_result`](Self::subscribe_result).
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let step = self.start_turn(text).await?;
        if let Step::Generate(_) = step {
            let this = self.clone();
            tokio::spawn(async move {
                this.drive(step).await;
            });
        }
        Ok(())
    }
}
