//! End-to-end question cycles against seeded stores and a scripted model.

mod common;

use catalog_ask::pipeline::{CycleState, Reply, Route, Warning};
use catalog_ask::types::CellValue;
use catalog_ask::{AskConfig, CompletionService};
use common::*;

#[tokio::test]
async fn test_unanswerable_in_any_casing_skips_executor() {
    for sentinel in ["cannot be answered", "```\nCANNOT BE ANSWERED\n```", "No se puede responder."] {
        let script = ScriptedCompletion::replying(&[sentinel, "1. a\n2. b\n3. c"]);
        let mut orchestrator = orchestrator(stock_session(), &script, &test_config());

        let answer = orchestrator.try_ask("what is the weather in Paris?").await.unwrap();

        assert_eq!(answer.route, Route::Unanswerable);
        assert!(answer.outcome.is_none());
        assert!(answer.transitions.contains(&CycleState::RoutingUnanswerable));
        assert!(!answer.transitions.contains(&CycleState::Executing));
        assert_eq!(answer.explanation, "1. a\n2. b\n3. c");

        let prompts = script.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("exactly three"));
        assert_eq!(qty(&orchestrator, "Bolt"), 5);
    }
}

#[tokio::test]
async fn test_range_attribute_matches_inclusively() {
    let script = ScriptedCompletion::replying(&[
        "SELECT name, price, start_year, end_year FROM items \
         WHERE name = 'Widget' AND start_year <= 2005 AND end_year >= 2005",
    ]);
    let mut orchestrator = orchestrator(items_session(), &script, &test_config());

    let answer = orchestrator.try_ask("is Widget available in 2005?").await.unwrap();

    let outcome = answer.outcome.unwrap();
    assert_eq!(outcome.row_count(), 1);
    assert_eq!(outcome.rows.unwrap()[0][0], CellValue::Text("Widget".into()));
    assert!(answer.warnings.is_empty());
}

#[tokio::test]
async fn test_sell_decrements_stock() {
    let script = ScriptedCompletion::replying(&[
        "UPDATE stock SET qty = qty - 3 WHERE item = 'Bolt' AND qty >= 3",
    ]);
    let mut orchestrator = orchestrator(stock_session(), &script, &test_config());

    let answer = orchestrator.try_ask("sell 3 Bolt").await.unwrap();

    let outcome = answer.outcome.unwrap();
    assert_eq!(outcome.rows_affected, 1);
    assert!(outcome.committed);
    assert!(outcome.rows.is_none());
    assert_eq!(qty(&orchestrator, "Bolt"), 2);
    assert!(script.prompts()[1].contains("Rows changed: 1"));
}

#[tokio::test]
async fn test_insufficient_stock_is_refused() {
    let script = ScriptedCompletion::replying(&["Insufficient stock"]);
    let mut orchestrator = orchestrator(stock_session(), &script, &test_config());

    let answer = orchestrator.try_ask("sell 10 Bolt").await.unwrap();

    assert_eq!(answer.route, Route::Refused);
    assert_eq!(answer.warnings, vec![Warning::StockRefused]);
    assert!(answer.transitions.contains(&CycleState::RoutingRefused));
    assert!(!answer.transitions.contains(&CycleState::Executing));
    assert_eq!(answer.outcome.unwrap().rows_affected, 0);
    assert_eq!(qty(&orchestrator, "Bolt"), 5);
    assert!(script.prompts()[1].contains("not enough stock"));
}

#[tokio::test]
async fn test_guarded_decrement_that_matches_nothing() {
    let script = ScriptedCompletion::replying(&[
        "UPDATE stock SET qty = qty - 10 WHERE item = 'Bolt' AND qty >= 10",
    ]);
    let mut orchestrator = orchestrator(stock_session(), &script, &test_config());

    let answer = orchestrator.try_ask("sell 10 Bolt").await.unwrap();

    assert_eq!(answer.route, Route::Executed);
    assert_eq!(answer.warnings, vec![Warning::NothingChanged]);
    assert!(!answer.outcome.unwrap().committed);
    assert_eq!(qty(&orchestrator, "Bolt"), 5);
}

#[tokio::test]
async fn test_superlative_returns_full_row() {
    let script = ScriptedCompletion::replying(&["```sql\nSELECT MAX(price) FROM items\n```"]);
    let mut orchestrator = orchestrator(items_session(), &script, &test_config());

    let answer = orchestrator.try_ask("what is the most expensive item?").await.unwrap();

    assert_eq!(
        answer.statement.as_deref(),
        Some("SELECT * FROM items WHERE price = (SELECT MAX(price) FROM items) LIMIT 1")
    );
    let outcome = answer.outcome.unwrap();
    assert_eq!(outcome.columns, vec!["name", "price", "start_year", "end_year"]);
    let rows = outcome.rows.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], CellValue::Text("bujia de iridio".into()));
}

#[tokio::test]
async fn test_multi_statement_batch_commits_once() {
    let script = ScriptedCompletion::replying(&[
        "UPDATE stock SET qty = qty - 1 WHERE item = 'Bolt'; SELECT * FROM stock;",
    ]);
    let mut orchestrator = orchestrator(stock_session(), &script, &test_config());

    let answer = orchestrator.try_ask("sell one Bolt and show the stock").await.unwrap();

    let outcome = answer.outcome.unwrap();
    assert_eq!(outcome.rows_affected, 1);
    assert_eq!(outcome.statements, 2);
    assert!(outcome.committed);
    assert_eq!(outcome.row_count(), 2);
    assert_eq!(qty(&orchestrator, "Bolt"), 4);
}

#[tokio::test]
async fn test_completion_failure_returns_to_idle() {
    let script = ScriptedCompletion::new(vec![Err(completion_failure("401 Unauthorized"))]);
    let mut orchestrator = orchestrator(stock_session(), &script, &test_config());

    let reply = orchestrator.handle("sell 3 Bolt").await;

    match reply {
        Reply::Failed { recoverable, fatal, statement, transitions, .. } => {
            assert!(!recoverable);
            assert!(!fatal);
            assert!(statement.is_none());
            assert_eq!(transitions.last(), Some(&CycleState::Failed));
            assert!(transitions.contains(&CycleState::AwaitingCompletion));
        }
        Reply::Answered(_) => panic!("expected failure"),
    }
    assert_eq!(orchestrator.state(), CycleState::Idle);
    assert_eq!(qty(&orchestrator, "Bolt"), 5);
}

#[tokio::test]
async fn test_statement_failure_rolls_back_and_reports_statement() {
    let script = ScriptedCompletion::replying(&[
        "UPDATE stock SET qty = 0 WHERE item = 'Bolt'; SELECT * FROM missing_table",
    ]);
    let mut orchestrator = orchestrator(stock_session(), &script, &test_config());

    let reply = orchestrator.handle("clear Bolt and show missing").await;

    match reply {
        Reply::Failed { statement, message, .. } => {
            assert_eq!(statement.as_deref(), Some("SELECT * FROM missing_table"));
            assert!(message.contains("SELECT * FROM missing_table"));
        }
        Reply::Answered(_) => panic!("expected failure"),
    }
    assert_eq!(orchestrator.state(), CycleState::Idle);
    assert_eq!(qty(&orchestrator, "Bolt"), 5);
}

#[tokio::test]
async fn test_empty_question_never_reaches_model() {
    let script = ScriptedCompletion::replying(&[]);
    let mut orchestrator = orchestrator(stock_session(), &script, &test_config());

    let reply = orchestrator.handle("   ").await;

    assert!(reply.answer().is_none());
    assert!(script.prompts().is_empty());
    assert_eq!(orchestrator.state(), CycleState::Idle);
}

#[tokio::test]
async fn test_empty_completion_fails_cycle() {
    let script = ScriptedCompletion::replying(&["```sql\n```"]);
    let mut orchestrator = orchestrator(stock_session(), &script, &test_config());

    let err = orchestrator.try_ask("how many bolts?").await.unwrap_err();
    assert!(matches!(err, catalog_ask::AskError::EmptyCompletion));
}

#[tokio::test]
async fn test_similar_records_after_empty_filtered_read() {
    let script = ScriptedCompletion::replying(&[
        "SELECT name, price FROM items WHERE name = 'bujia'",
        "SELECT name, price FROM items WHERE name LIKE '%bujia%'",
        "No exact match, but a similar item exists.",
    ]);
    let config = AskConfig {
        similar_fallback: true,
        ..test_config()
    };
    let mut orchestrator = orchestrator(items_session(), &script, &config);

    let answer = orchestrator.try_ask("price of bujia").await.unwrap();

    assert_eq!(answer.outcome.as_ref().unwrap().row_count(), 0);
    assert_eq!(
        answer.warnings,
        vec![Warning::NoRows, Warning::SimilarMatches { rows: 1 }]
    );
    assert_eq!(answer.similar.unwrap().row_count(), 1);

    let prompts = script.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[1].contains("LIKE"));
    assert!(prompts[2].contains("similar records"));
}

#[tokio::test]
async fn test_similar_records_query_must_be_read_only() {
    let script = ScriptedCompletion::replying(&[
        "SELECT name FROM items WHERE name = 'nothing'",
        "DELETE FROM items",
    ]);
    let config = AskConfig {
        similar_fallback: true,
        ..test_config()
    };
    let mut orchestrator = orchestrator(items_session(), &script, &config);

    let answer = orchestrator.try_ask("price of nothing").await.unwrap();

    assert!(answer.similar.is_none());
    assert_eq!(answer.warnings, vec![Warning::NoRows]);
    let count: i64 = orchestrator
        .session()
        .connection()
        .query_row("SELECT COUNT(*) FROM items", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_prompt_sees_tables_created_between_questions() {
    let script = ScriptedCompletion::replying(&["SELECT 1", "ok", "SELECT 1", "ok"]);
    let mut orchestrator = orchestrator(stock_session(), &script, &test_config());

    orchestrator.try_ask("first").await.unwrap();
    orchestrator
        .session()
        .connection()
        .execute_batch("CREATE TABLE suppliers (name TEXT, phone TEXT);")
        .unwrap();
    orchestrator.try_ask("second").await.unwrap();

    let prompts = script.prompts();
    assert!(!prompts[0].contains("suppliers"));
    assert!(prompts[2].contains("Table: suppliers"));
}

#[tokio::test]
async fn test_dry_run_does_not_execute() {
    let script = ScriptedCompletion::replying(&["DELETE FROM stock"]);
    let mut orchestrator = orchestrator(stock_session(), &script, &test_config());

    let query = orchestrator.dry_run("remove everything").await.unwrap();

    assert_eq!(
        query,
        catalog_ask::sql::GeneratedQuery::Statements("DELETE FROM stock".into())
    );
    assert_eq!(qty(&orchestrator, "Bolt"), 5);
    assert_eq!(orchestrator.state(), CycleState::Idle);
}

#[tokio::test]
async fn test_sell_with_returning_reports_new_quantity() {
    let script = ScriptedCompletion::replying(&[
        "UPDATE stock SET qty = qty - 3 WHERE item = 'Bolt' AND qty >= 3 RETURNING qty",
    ]);
    let mut orchestrator = orchestrator(stock_session(), &script, &test_config());

    let answer = orchestrator.try_ask("sell 3 Bolt").await.unwrap();

    assert_eq!(answer.route, Route::Executed);
    let outcome = answer.outcome.unwrap();
    assert_eq!(outcome.rows_affected, 1);
    assert!(outcome.committed);
    assert_eq!(outcome.rows.unwrap(), vec![vec![CellValue::Integer(2)]]);
    assert_eq!(qty(&orchestrator, "Bolt"), 2);
}

#[tokio::test]
async fn test_cte_prefixed_sell_is_committed() {
    let script = ScriptedCompletion::replying(&[
        "WITH s AS (SELECT 3 AS n) UPDATE stock SET qty = qty - (SELECT n FROM s) WHERE item = 'Bolt'",
    ]);
    let mut orchestrator = orchestrator(stock_session(), &script, &test_config());

    let answer = orchestrator.try_ask("sell 3 Bolt").await.unwrap();

    assert!(answer.outcome.unwrap().committed);
    assert!(answer.warnings.is_empty());
    assert_eq!(qty(&orchestrator, "Bolt"), 2);
}

#[tokio::test]
async fn test_stock_marker_in_a_literal_still_executes() {
    let script = ScriptedCompletion::replying(&[
        "SELECT item FROM stock WHERE item <> 'insufficient stock' ORDER BY item",
    ]);
    let mut orchestrator = orchestrator(stock_session(), &script, &test_config());
    assert_eq!(orchestrator.service().model(), "scripted");

    let answer = orchestrator.try_ask("list every item").await.unwrap();

    assert_eq!(answer.route, Route::Executed);
    assert!(answer.transitions.contains(&CycleState::Executing));
    assert_eq!(answer.outcome.unwrap().row_count(), 2);
}
