//! Natural-language explanations of execution outcomes.

use crate::llm::completion::CompletionService;
use crate::types::{ExecutionOutcome, Result, Schema};

/// Rows shown to the completion service when none is configured.
pub const DEFAULT_PREVIEW_ROWS: usize = 20;

/// Turns outcomes back into prose through the completion service.
///
/// The reply is returned as-is; it is never parsed.
#[derive(Debug, Clone)]
pub struct ResultExplainer {
    preview_rows: usize,
}

impl Default for ResultExplainer {
    fn default() -> Self {
        Self::new(DEFAULT_PREVIEW_ROWS)
    }
}

impl ResultExplainer {
    pub fn new(preview_rows: usize) -> Self {
        Self { preview_rows }
    }

    pub fn preview_rows(&self) -> usize {
        self.preview_rows
    }

    /// Explain what executing `statement` did.
    ///
    /// `notice` is passed along verbatim (refusals, similar matches found).
    pub async fn explain<C: CompletionService + ?Sized>(
        &self,
        service: &C,
        question: &str,
        statement: &str,
        outcome: &ExecutionOutcome,
        notice: Option<&str>,
    ) -> Result<String> {
        let prompt = self.outcome_prompt(question, statement, outcome, notice);
        tracing::debug!(rows = outcome.row_count(), "requesting explanation");
        service.complete(&prompt).await
    }

    /// Suggest follow-up questions when there is nothing to explain.
    pub async fn suggest<C: CompletionService + ?Sized>(
        &self,
        service: &C,
        schema: &Schema,
        question: &str,
    ) -> Result<String> {
        let prompt = Self::suggestion_prompt(schema, question);
        tracing::debug!("requesting follow-up suggestions");
        service.complete(&prompt).await
    }

    pub fn outcome_prompt(
        &self,
        question: &str,
        statement: &str,
        outcome: &ExecutionOutcome,
        notice: Option<&str>,
    ) -> String {
        let result = match &outcome.rows {
            Some(rows) if !rows.is_empty() => {
                let mut table = outcome.render_table(self.preview_rows);
                if rows.len() > self.preview_rows {
                    table.push_str(&format!("(showing {} of {} rows)\n", self.preview_rows, rows.len()));
                }
                table
            }
            Some(_) => "The query returned no rows.\n".to_string(),
            None => String::new(),
        };

        let mut prompt = format!(
            "A user asked a question about a product database and this SQLite query was run for it.\n\n\
             Question: {}\n\n\
             Query:\n{}\n\n\
             Rows changed: {}\n",
            question, statement, outcome.rows_affected
        );
        if !result.is_empty() {
            prompt.push_str("\nResult:\n");
            prompt.push_str(&result);
        }
        if let Some(notice) = notice {
            prompt.push_str(&format!("\nNote: {}\n", notice));
        }
        prompt.push_str(
            "\nIn 1 to 3 plain sentences, tell the user whether the question was answered. \
             If the query changed data, more than 0 rows changed means the change succeeded. \
             If there are no results, say so clearly and suggest what the user could try next. \
             Do not mention SQL.\n",
        );
        prompt
    }

    pub fn suggestion_prompt(schema: &Schema, question: &str) -> String {
        format!(
            "A user asked a question that this product database cannot answer.\n\n\
             Database schema:\n{}\n\
             Question: {}\n\n\
             Briefly say that the question cannot be answered with this data, then propose \
             exactly three related questions the data can answer. Plain text only, one \
             question per line.\n",
            schema, question
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CellValue, TableSchema};

    fn rows(n: i64) -> ExecutionOutcome {
        ExecutionOutcome {
            columns: vec!["item".into(), "qty".into()],
            rows: Some(
                (0..n)
                    .map(|i| vec![CellValue::Text(format!("item{}", i)), CellValue::Integer(i)])
                    .collect(),
            ),
            rows_affected: 0,
            committed: false,
            statements: 1,
        }
    }

    #[test]
    fn test_outcome_prompt_caps_preview() {
        let prompt = ResultExplainer::new(2).outcome_prompt("q", "SELECT * FROM stock", &rows(5), None);
        assert!(prompt.contains("item1"));
        assert!(!prompt.contains("item2"));
        assert!(prompt.contains("(showing 2 of 5 rows)"));
    }

    #[test]
    fn test_outcome_prompt_reports_empty_result() {
        let prompt = ResultExplainer::default().outcome_prompt("q", "SELECT 1", &rows(0), None);
        assert!(prompt.contains("returned no rows"));
    }

    #[test]
    fn test_outcome_prompt_includes_notice_and_changes() {
        let outcome = ExecutionOutcome {
            rows_affected: 1,
            committed: true,
            statements: 1,
            ..Default::default()
        };
        let prompt = ResultExplainer::default().outcome_prompt(
            "sell 3 Bolt",
            "UPDATE stock SET qty = qty - 3 WHERE item = 'Bolt' AND qty >= 3",
            &outcome,
            Some("stock is insufficient"),
        );
        assert!(prompt.contains("Rows changed: 1"));
        assert!(prompt.contains("Note: stock is insufficient"));
        assert!(!prompt.contains("Result:"));
    }

    #[test]
    fn test_suggestion_prompt_asks_for_three() {
        let schema = Schema::new(vec![TableSchema::new("items", vec!["name".into()])]);
        let prompt = ResultExplainer::suggestion_prompt(&schema, "what is the weather?");
        assert!(prompt.contains("exactly three"));
        assert!(prompt.contains(&schema.to_string()));
        assert!(prompt.contains("what is the weather?"));
    }
}
