#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use ledger_core::assistant::{AssistantSettings, ExpenseAssistant};
use ledger_core::embedding::EmbeddingService;
use ledger_core::error::{LedgerError, Result};
use ledger_core::llm::{LanguageModel, LlmMessage};
use ledger_core::model::Expense;
use ledger_core::storage::SqliteStorage;
use ledger_core::vector::{Retriever, VectorStore};

/// Language model that replays canned outputs and records every prompt.
pub struct ScriptedModel {
    ready: AtomicBool,
    responses: Mutex<VecDeque<std::result::Result<String, String>>>,
    prompts: Mutex<Vec<Vec<LlmMessage>>>,
    /// When set, each generation waits for one permit before answering.
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedModel {
    pub fn new<I, T>(outputs: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::scripted(outputs.into_iter().map(|o| Ok(o.into())).collect())
    }

    /// Outputs where `Err` makes that generation fail.
    pub fn scripted(outputs: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            ready: AtomicBool::new(true),
            responses: Mutex::new(outputs.into()),
            prompts: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn not_ready() -> Self {
        let model = Self::new(Vec::<String>::new());
        model.set_ready(false);
        model
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn push_output(&self, output: impl Into<String>) {
        self.responses.lock().unwrap().push_back(Ok(output.into()));
    }

    pub fn prompts(&self) -> Vec<Vec<LlmMessage>> {
        self.prompts.lock().unwrap().clone()
    }

    /// Content of the last message of the `n`th prompt.
    pub fn prompt_text(&self, n: usize) -> String {
        let prompts = self.prompts();
        prompts[n]
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

impl LanguageModel for ScriptedModel {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn download_progress(&self) -> f32 {
        if self.is_ready() {
            1.0
        } else {
            0.4
        }
    }

    async fn generate(&self, messages: Vec<LlmMessage>) -> Result<String> {
        self.prompts.lock().unwrap().push(messages);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| LedgerError::Llm(e.to_string()))?
                .forget();
        }
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(LedgerError::Llm(message)),
            None => Err(LedgerError::Llm("script exhausted".into())),
        }
    }
}

/// Retriever whose writes and/or searches fail.
pub struct FailingRetriever {
    pub fail_add: bool,
    pub fail_search: bool,
}

impl Retriever for FailingRetriever {
    async fn add_embedding(&self, _expense_id: i64, _vector: &[f32]) -> Result<()> {
        if self.fail_add {
            return Err(LedgerError::Storage("disk full".into()));
        }
        Ok(())
    }

    async fn search(&self, _query: &[f32], _k: usize) -> Result<Vec<Expense>> {
        if self.fail_search {
            return Err(LedgerError::Storage("index unavailable".into()));
        }
        Ok(Vec::new())
    }
}

pub type TestAssistant = ExpenseAssistant<ScriptedModel, SqliteStorage, VectorStore<SqliteStorage>>;

pub fn storage() -> Arc<SqliteStorage> {
    Arc::new(SqliteStorage::open_in_memory().expect("in-memory storage"))
}

/// Assistant over in-memory storage, linear-scan retrieval and hash embeddings.
pub fn assistant(model: ScriptedModel, storage: &Arc<SqliteStorage>) -> TestAssistant {
    assistant_with_settings(model, storage, AssistantSettings::default())
}

pub fn assistant_with_settings(
    model: ScriptedModel,
    storage: &Arc<SqliteStorage>,
    settings: AssistantSettings,
) -> TestAssistant {
    ExpenseAssistant::new(
        model,
        Arc::clone(storage),
        VectorStore::new(Arc::clone(storage)),
        EmbeddingService::hash(),
        settings,
    )
}

pub fn assistant_with_retriever<R: Retriever>(
    model: ScriptedModel,
    storage: &Arc<SqliteStorage>,
    retriever: R,
) -> ExpenseAssistant<ScriptedModel, SqliteStorage, R> {
    ExpenseAssistant::new(
        model,
        Arc::clone(storage),
        retriever,
        EmbeddingService::hash(),
        AssistantSettings::default(),
    )
}
