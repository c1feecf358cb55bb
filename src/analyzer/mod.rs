//! Taint analysis core
//!
//! The pipeline for one file is: lex to a [`TokenStream`](crate::tokens),
//! resolve scopes, then run a [`StatementDriver`] once per sink policy.
//! Everything here is deterministic and allocation-light; the per-file state
//! lives for exactly one pass.

pub mod driver;
pub mod explain;
pub mod expression;
pub mod policy;
pub mod scope;
pub mod state;
pub mod table_names;

pub use driver::{Diagnostic, DiagnosticSeverity, StatementDriver};
pub use expression::ExpressionChecker;
pub use policy::{FunctionClass, SinkPolicy};
pub use scope::{ScopeId, ScopeResolver};
pub use state::TaintState;
