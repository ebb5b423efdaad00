//! Instruction prompts for query generation.

use crate::sql::sentinel::{INSUFFICIENT_STOCK, UNANSWERABLE};
use crate::types::Schema;

/// Renders generation prompts from a schema and a question.
///
/// Output is a pure function of the inputs.
pub struct PromptBuilder;

impl PromptBuilder {
    /// Prompt asking for the statement batch that answers `question`.
    pub fn build(schema: &Schema, question: &str) -> String {
        format!(
            r#"You translate questions about a product database into SQLite statements.

Database schema:
{schema}
Question: {question}

Write the SQLite statement(s) that answer the question.

Output contract:
- Reply with executable SQLite text only: no explanations, no prose, no code fences or other delimiters.
- Separate several statements with ";".

Rules:
1. Every result row that names an item must include its identifying column and its price or value column when the table has one.
2. For phrases of the form "X of Y", filter on X and Y as separate terms across the relevant columns, never as one literal substring.
3. Try both the singular and the plural form of every filter term.
4. For attributes stored as a start/end pair (for example year ranges), match inclusively: start <= Y AND end >= Y.
5. For superlative questions (most expensive, cheapest, largest stock) return the single qualifying row with all its columns, using ORDER BY ... LIMIT 1 or a subquery such as price = (SELECT MAX(price) FROM table). Never return a bare aggregate.
6. For requests to buy or sell N units, decrement the stock column by N only where enough stock exists: UPDATE table SET stock = stock - N WHERE <item filter> AND stock >= N. If the stock is known to be insufficient, reply with exactly: {stock}
7. If the question cannot be answered with this schema, reply with exactly: {unanswerable}
8. Treat an unfamiliar standalone word in the question (for example a part name) as a filter term.
9. Use only SQLite functions, and double-quote table or column names that contain spaces or special characters.
"#,
            schema = schema,
            question = question,
            stock = INSUFFICIENT_STOCK,
            unanswerable = UNANSWERABLE,
        )
    }

    /// Prompt asking for a looser `LIKE` query after `statement` found nothing.
    pub fn similar_records(schema: &Schema, question: &str, statement: &str) -> String {
        format!(
            r#"The following SQLite query returned no rows.

Database schema:
{schema}
Question: {question}

Query:
{statement}

Write one SELECT statement that finds records similar to what the question asks for.

Rules:
1. Use LIKE with % wildcards for partial matches on every text filter term.
2. Combine the terms with OR so that records matching any of them are returned.
3. Include the identifying column and the price or value column in each row.
4. Reply with executable SQLite text only, no prose and no code fences.
"#,
            schema = schema,
            question = question,
            statement = statement,
        )
    }
}
