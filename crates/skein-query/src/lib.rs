//! Query compiler for the skein issue engine.
//!
//! A small boolean/comparison language over issue fields, compiled either
//! into a structured filter the storage layer executes natively, or into an
//! over-approximating filter plus an in-memory predicate.
//!
//! ```
//! use skein_query::{CompileContext, compile};
//!
//! let ctx = CompileContext::at("2025-06-15T12:00:00Z".parse().unwrap());
//! let compiled = compile("status = open AND priority <= 1", &ctx).unwrap();
//! assert!(compiled.is_filter_only());
//! ```

pub mod ast;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod lower;
pub mod parser;

pub use ast::{CmpOp, Comparison, Expr, Field, Value};
pub use error::{QueryError, Result};
pub use eval::eval;
pub use lower::{CompileContext, CompiledQuery, Predicate, lower};
pub use parser::parse;

/// Parses and lowers a query in one step.
pub fn compile(query: &str, ctx: &CompileContext) -> Result<CompiledQuery> {
    lower(&parse(query)?, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::enums::Status;
    use skein_core::issue::{Issue, IssueBuilder};

    fn ctx() -> CompileContext {
        CompileContext::at("2025-06-15T12:00:00Z".parse().unwrap())
    }

    fn dataset() -> Vec<Issue> {
        let mut closed = IssueBuilder::new("closed item")
            .id("sk-q1")
            .priority(0)
            .build();
        closed.status = Status::Closed;
        closed.closed_at = Some("2025-06-10T00:00:00Z".parse().unwrap());

        vec![
            closed,
            IssueBuilder::new("open p0")
                .id("sk-q2")
                .priority(0)
                .labels(vec!["x".into()])
                .build(),
            IssueBuilder::new("open p3")
                .id("sk-q3")
                .priority(3)
                .labels(vec!["y".into()])
                .build(),
            IssueBuilder::new("in flight")
                .id("sk-q4")
                .priority(2)
                .status(Status::InProgress)
                .assignee("bot-1")
                .build(),
        ]
    }

    /// Property: filter+predicate equals plain AST evaluation, for every
    /// query shape the compiler distinguishes.
    #[test]
    fn filter_predicate_equivalence() {
        let queries = [
            "status = open",
            "status = open AND priority <= 1",
            "label = x OR label = y",
            "status = open OR priority > 1",
            "NOT status = closed",
            "priority >= 1 AND priority < 4",
            "assignee = bot-1",
            "NOT (status = open AND priority = 0)",
        ];
        let ctx = ctx();
        for query in queries {
            let expr = parse(query).unwrap();
            let compiled = compile(query, &ctx).unwrap();
            for issue in dataset() {
                let via_eval = eval(&expr, &issue, ctx.now);
                // The real pipeline runs the filter in SQL; here the filter
                // is exercised through the predicate contract: a filter-only
                // compile must agree with eval via admits() being true for
                // every eval-match (over-approximation soundness).
                if via_eval {
                    assert!(
                        compiled.admits(&issue),
                        "query '{query}' wrongly rejects {}",
                        issue.id
                    );
                }
                if compiled.is_filter_only() {
                    continue;
                }
                assert_eq!(
                    compiled.admits(&issue),
                    via_eval,
                    "query '{query}' predicate disagrees on {}",
                    issue.id
                );
            }
        }
    }

    #[test]
    fn compile_rejects_unknown_field() {
        let err = compile("priroty = 1", &ctx()).unwrap_err();
        assert!(matches!(err, QueryError::UnknownField { .. }));
    }
}
