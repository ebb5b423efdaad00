//! Question cycle orchestration.

use crate::config::AskConfig;
use crate::llm::{CompletionService, PromptBuilder, ResultExplainer};
use crate::otel::cycle_span;
use crate::pipeline::session::Session;
use crate::pipeline::state::CycleState;
use crate::sql::{lexer, GeneratedQuery, Sanitizer, StatementKind};
use crate::store::QueryExecutor;
use crate::types::{AskError, ExecutionOutcome, Result, Schema};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{Instrument, Span};
use uuid::Uuid;

/// Notice handed to the explainer when a stock change was refused.
const REFUSAL_NOTICE: &str =
    "The request was refused because there is not enough stock; nothing was changed.";

/// How a cycle was routed after sanitizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Statements were executed
    Executed,
    /// The question cannot be answered from this store
    Unanswerable,
    /// A stock change was refused
    Refused,
}

/// Something the user should see next to the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// The read returned no rows
    NoRows,
    /// Write statements matched no rows
    NothingChanged,
    StockRefused,
    /// No exact match; similar records are attached
    SimilarMatches { rows: usize },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRows => write!(f, "No results were found."),
            Self::NothingChanged => write!(f, "No records were changed."),
            Self::StockRefused => write!(f, "Not enough stock; nothing was changed."),
            Self::SimilarMatches { rows } => {
                write!(f, "No exact results. Showing {} similar matches.", rows)
            }
        }
    }
}

/// Result of one completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub cycle_id: Uuid,
    pub asked_at: DateTime<Utc>,
    pub question: String,
    /// Sanitized statement text (also set for sentinel replies)
    pub statement: Option<String>,
    pub route: Route,
    pub outcome: Option<ExecutionOutcome>,
    pub similar: Option<ExecutionOutcome>,
    pub explanation: String,
    pub warnings: Vec<Warning>,
    pub transitions: Vec<CycleState>,
}

/// What [`Orchestrator::handle`] hands back to the user-facing layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Answered(Answer),
    Failed {
        cycle_id: Uuid,
        question: String,
        /// User-facing message
        message: String,
        /// Statement that failed, if the failure came from execution
        statement: Option<String>,
        /// Resubmitting the question may succeed
        recoverable: bool,
        /// The session cannot be used any more
        fatal: bool,
        transitions: Vec<CycleState>,
    },
}

impl Reply {
    pub fn answer(&self) -> Option<&Answer> {
        match self {
            Self::Answered(answer) => Some(answer),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Failed { fatal: true, .. })
    }
}

/// Book-keeping for the cycle in flight.
struct Cycle {
    id: Uuid,
    span: Span,
    transitions: Vec<CycleState>,
    statement: Option<String>,
}

impl Cycle {
    fn new() -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            span: cycle_span(id),
            transitions: vec![CycleState::Idle],
            statement: None,
        }
    }
}

/// Runs questions through prompt, completion, sanitizing, execution and
/// explanation, one at a time.
pub struct Orchestrator<C> {
    session: Session,
    service: C,
    sanitizer: Sanitizer,
    executor: QueryExecutor,
    explainer: ResultExplainer,
    similar_fallback: bool,
    state: CycleState,
}

impl<C: CompletionService> Orchestrator<C> {
    pub fn new(session: Session, service: C, config: &AskConfig) -> Self {
        Self {
            session,
            service,
            sanitizer: Sanitizer::new().with_extremum_rows(config.expand_extremum_rows),
            executor: QueryExecutor::new(config.read_policy),
            explainer: ResultExplainer::new(config.preview_rows),
            similar_fallback: config.similar_fallback,
            state: CycleState::Idle,
        }
    }

    /// Current state; `Idle` between questions.
    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn service(&self) -> &C {
        &self.service
    }

    /// Give the session back, e.g. to close it explicitly.
    pub fn into_session(self) -> Session {
        self.session
    }

    /// Run one question; failures come back as [`Reply::Failed`].
    pub async fn handle(&mut self, question: &str) -> Reply {
        let mut cycle = Cycle::new();
        let span = cycle.span.clone();
        let result = self.run(&mut cycle, question).instrument(span).await;

        match result {
            Ok(answer) => Reply::Answered(answer),
            Err(e) => {
                self.fail(&mut cycle, &e);
                Reply::Failed {
                    cycle_id: cycle.id,
                    question: question.to_string(),
                    message: e.user_message(),
                    statement: e.statement_text().map(String::from).or(cycle.statement),
                    recoverable: e.is_recoverable(),
                    fatal: e.is_fatal_to_session(),
                    transitions: cycle.transitions,
                }
            }
        }
    }

    /// Run one question, returning the error itself on failure.
    ///
    /// # Errors
    ///
    /// Any stage error; the orchestrator is back in `Idle` and nothing was
    /// committed
    pub async fn try_ask(&mut self, question: &str) -> Result<Answer> {
        let mut cycle = Cycle::new();
        let span = cycle.span.clone();
        let result = self.run(&mut cycle, question).instrument(span).await;
        if let Err(e) = &result {
            self.fail(&mut cycle, e);
        }
        result
    }

    /// Generate and sanitize the statement for `question` without running it.
    pub async fn dry_run(&mut self, question: &str) -> Result<GeneratedQuery> {
        let mut cycle = Cycle::new();
        let span = cycle.span.clone();
        let result = self
            .generate(&mut cycle, question)
            .instrument(span)
            .await
            .map(|(_, query)| query);

        match &result {
            Ok(_) => self.state = CycleState::Idle,
            Err(e) => self.fail(&mut cycle, e),
        }
        result
    }

    async fn run(&mut self, cycle: &mut Cycle, question: &str) -> Result<Answer> {
        let asked_at = Utc::now();
        let (schema, query) = self.generate(cycle, question).await?;
        let mut warnings = Vec::new();

        let (route, statement, outcome, similar, explanation) = match query {
            GeneratedQuery::Unanswerable => {
                self.transition(cycle, CycleState::RoutingUnanswerable);
                self.transition(cycle, CycleState::Explaining);
                let explanation = self
                    .explainer
                    .suggest(&self.service, &schema, question)
                    .await?;
                (Route::Unanswerable, cycle.statement.clone(), None, None, explanation)
            }
            GeneratedQuery::InsufficientStock => {
                self.transition(cycle, CycleState::RoutingRefused);
                warnings.push(Warning::StockRefused);
                let statement = cycle.statement.clone().unwrap_or_default();
                let outcome = ExecutionOutcome::default();

                self.transition(cycle, CycleState::Explaining);
                let explanation = self
                    .explainer
                    .explain(&self.service, question, &statement, &outcome, Some(REFUSAL_NOTICE))
                    .await?;
                (Route::Refused, Some(statement), Some(outcome), None, explanation)
            }
            GeneratedQuery::Statements(text) => {
                self.transition(cycle, CycleState::Executing);
                let outcome = self.session.execute(&self.executor, &text)?;

                if outcome.rows.as_ref().is_some_and(|rows| rows.is_empty()) {
                    warnings.push(Warning::NoRows);
                } else if outcome.rows.is_none() && outcome.rows_affected == 0 {
                    warnings.push(Warning::NothingChanged);
                }

                let similar = self.find_similar(&schema, question, &text, &outcome).await;
                let notice = similar.as_ref().map(|s| {
                    warnings.push(Warning::SimilarMatches { rows: s.row_count() });
                    format!(
                        "No exact match was found, but {} similar records exist:\n{}",
                        s.row_count(),
                        s.render_table(self.explainer_preview())
                    )
                });

                self.transition(cycle, CycleState::Explaining);
                let explanation = self
                    .explainer
                    .explain(&self.service, question, &text, &outcome, notice.as_deref())
                    .await?;
                (Route::Executed, Some(text), Some(outcome), similar, explanation)
            }
        };

        self.transition(cycle, CycleState::Done);
        self.state = CycleState::Idle;
        tracing::info!(route = ?route, warnings = warnings.len(), "question answered");

        Ok(Answer {
            cycle_id: cycle.id,
            asked_at,
            question: question.to_string(),
            statement,
            route,
            outcome,
            similar,
            explanation,
            warnings,
            transitions: cycle.transitions.clone(),
        })
    }

    /// Prompt, completion and sanitizing; shared by answering and dry runs.
    async fn generate(&mut self, cycle: &mut Cycle, question: &str) -> Result<(Schema, GeneratedQuery)> {
        if question.trim().is_empty() {
            return Err(AskError::EmptyQuestion);
        }

        self.transition(cycle, CycleState::BuildingPrompt);
        let schema = self.session.schema()?.clone();
        let prompt = PromptBuilder::build(&schema, question);

        self.transition(cycle, CycleState::AwaitingCompletion);
        let raw = self.service.complete(&prompt).await?;

        self.transition(cycle, CycleState::Sanitizing);
        let sanitized = self.sanitizer.sanitize(&raw);
        if sanitized.is_empty() {
            return Err(AskError::EmptyCompletion);
        }
        cycle.statement = Some(sanitized.clone());

        Ok((schema, GeneratedQuery::classify(&sanitized)))
    }

    /// Looser LIKE search after a filtered read came back empty.
    ///
    /// Never fails the cycle; problems are logged and yield `None`.
    async fn find_similar(
        &mut self,
        schema: &Schema,
        question: &str,
        statement: &str,
        outcome: &ExecutionOutcome,
    ) -> Option<ExecutionOutcome> {
        let empty_read = outcome.rows.as_ref().is_some_and(|rows| rows.is_empty());
        if !self.similar_fallback || !empty_read || !lexer::has_top_level_keyword(statement, "WHERE") {
            return None;
        }

        let prompt = PromptBuilder::similar_records(schema, question, statement);
        let raw = match self.service.complete(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "similar-records completion failed");
                return None;
            }
        };

        let query = match GeneratedQuery::classify(&self.sanitizer.sanitize(&raw)) {
            GeneratedQuery::Statements(text) => text,
            _ => return None,
        };
        let statements = lexer::split_sql(&query);
        if statements.is_empty() || statements.iter().any(|s| StatementKind::of(s) != StatementKind::Read) {
            tracing::warn!(query = %query, "similar-records query is not read-only, skipped");
            return None;
        }

        match self.session.execute(&self.executor, &query) {
            Ok(similar) if similar.row_count() > 0 => {
                tracing::info!(rows = similar.row_count(), "found similar records");
                Some(similar)
            }
            Ok(_) => {
                tracing::info!("no similar records either");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "similar-records query failed");
                None
            }
        }
    }

    fn explainer_preview(&self) -> usize {
        self.explainer.preview_rows()
    }

    fn transition(&mut self, cycle: &mut Cycle, next: CycleState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(from = %self.state, to = %next, "cycle transition");
        cycle.span.record("cycle.state", next.as_str());
        cycle.transitions.push(next);
        self.state = next;
    }

    /// Record the failure and return to `Idle`.
    fn fail(&mut self, cycle: &mut Cycle, error: &AskError) {
        self.transition(cycle, CycleState::Failed);
        tracing::warn!(error = %error, recoverable = error.is_recoverable(), "question failed");
        self.state = CycleState::Idle;
    }
}
