//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use catalog_ask::pipeline::{Orchestrator, Session};
use catalog_ask::{AskConfig, AskError, CompletionService, Result, RetryPolicy};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Reply used once the script runs out (explanations).
pub const DEFAULT_REPLY: &str = "Here is what I found.";

/// Completion service replaying canned replies and recording every prompt.
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new(replies: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Script of successful replies.
    pub fn replying(replies: &[&str]) -> Arc<Self> {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(DEFAULT_REPLY.to_string()))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Config without retries or the similar-records lookup.
pub fn test_config() -> AskConfig {
    AskConfig {
        retry: RetryPolicy::none(),
        similar_fallback: false,
        ..Default::default()
    }
}

/// In-memory session seeded with `sql`.
pub fn seeded(sql: &str) -> Session {
    let session = Session::in_memory().unwrap();
    session.connection().execute_batch(sql).unwrap();
    session
}

pub fn stock_session() -> Session {
    seeded(
        "CREATE TABLE stock (item TEXT, qty INTEGER);
         INSERT INTO stock VALUES ('Bolt', 5), ('Nut', 12);",
    )
}

pub fn items_session() -> Session {
    seeded(
        "CREATE TABLE items (name TEXT, price REAL, start_year INTEGER, end_year INTEGER);
         INSERT INTO items VALUES
            ('Widget', 9.5, 2000, 2010),
            ('bujia de iridio', 14.0, 2012, 2020),
            ('filtro de aceite', 6.25, 1995, 2005);",
    )
}

pub fn orchestrator(
    session: Session,
    script: &Arc<ScriptedCompletion>,
    config: &AskConfig,
) -> Orchestrator<Arc<ScriptedCompletion>> {
    Orchestrator::new(session, Arc::clone(script), config)
}

pub fn qty(orchestrator: &Orchestrator<Arc<ScriptedCompletion>>, item: &str) -> i64 {
    orchestrator
        .session()
        .connection()
        .query_row("SELECT qty FROM stock WHERE item = ?1", [item], |r| r.get(0))
        .unwrap()
}

pub fn completion_failure(message: &str) -> AskError {
    AskError::completion(message)
}
