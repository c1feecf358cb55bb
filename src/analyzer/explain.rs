//! Assignment history explainer
//!
//! When a sink check fails, the finding alone ("unsafe variable `$sql`")
//! often leaves the author hunting backwards through the file. The explainer
//! walks the recorded assignment history of the offending variables and
//! renders the chain of unsafe assignments that led here, bounded so a
//! pathological file cannot blow up a single finding.

use crate::analyzer::expression::ExpressionChecker;
use crate::analyzer::policy::SinkPolicy;
use crate::analyzer::scope::ScopeResolver;
use crate::analyzer::state::TaintState;
use crate::tokens::{TokenKind, TokenStream};
use std::collections::HashSet;

/// Upper bound on explained assignments per finding.
const EXPLAIN_LIMIT: usize = 6;

pub struct Explainer<'a> {
    stream: &'a TokenStream,
    scopes: &'a ScopeResolver,
    policy: &'a SinkPolicy,
    checker: &'a ExpressionChecker<'a>,
}

impl<'a> Explainer<'a> {
    pub fn new(
        stream: &'a TokenStream,
        scopes: &'a ScopeResolver,
        policy: &'a SinkPolicy,
        checker: &'a ExpressionChecker<'a>,
    ) -> Self {
        Self {
            stream,
            scopes,
            policy,
            checker,
        }
    }

    /// Explain why the token at `pos` is unsafe: for each variable it
    /// depends on, find the assignments before `pos` in the same scope that
    /// made it unsafe, recursively, up to [`EXPLAIN_LIMIT`] steps.
    pub fn unwind_unsafe_assignments(&self, state: &TaintState, pos: usize) -> Vec<String> {
        let mut notes: Vec<String> = Vec::new();
        let mut queue: Vec<String> = self.checker.unsafe_variables(state, pos);
        let mut seen: HashSet<String> = queue.iter().cloned().collect();
        let scope = self.scopes.scope_of(pos);
        let mut budget = EXPLAIN_LIMIT;

        while budget > 0 {
            let var = match queue.pop() {
                Some(v) => v,
                None => break,
            };

            let history = self.stream_history(state, scope, &var, pos);
            if history.is_empty() {
                if !state.is_sanitized(scope, &var, self.policy)
                    && !self.policy.is_warning_parameter(&var)
                {
                    notes.push(format!("`{var}` is used without escaping."));
                }
                continue;
            }

            for assign_pos in history {
                if budget == 0 {
                    break;
                }
                let Some(unsafe_pos) = self.recheck_assignment(state, assign_pos) else {
                    continue;
                };
                budget -= 1;

                let line = self.stream.line(assign_pos);
                let end = self.stream.end_of_statement(assign_pos);
                let snippet = self.stream.clean_text(assign_pos, end);
                notes.push(format!("`{var}` assigned unsafely at line {line}: {snippet}"));

                for name in self.checker.confusables_in(assign_pos, end) {
                    notes.push(format!("Note: {name}() is not an escaping function."));
                }

                for dep in self.checker.unsafe_variables(state, unsafe_pos) {
                    if dep != var && seen.insert(dep.clone()) {
                        queue.push(dep);
                    }
                }
            }
        }

        dedupe_in_order(notes)
    }

    /// Assignment positions for `var` before `pos`, most recent first.
    fn stream_history(
        &self,
        state: &TaintState,
        scope: crate::analyzer::scope::ScopeId,
        var: &str,
        pos: usize,
    ) -> Vec<usize> {
        match state.find_assignments(scope, var) {
            Some(history) => history
                .keys()
                .rev()
                .copied()
                .filter(|&p| p < pos)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Re-evaluate the right-hand side of the assignment at `assign_pos`.
    /// Returns the unsafe token position, or `None` when that assignment
    /// was safe.
    fn recheck_assignment(&self, state: &TaintState, assign_pos: usize) -> Option<usize> {
        let op = self
            .stream
            .find_next(assign_pos, None, |k| matches!(k, TokenKind::Assign(_)))?;
        let rhs = self.stream.next_non_empty(op + 1)?;
        let mut hits = Vec::new();
        self.checker.check_expression(state, rhs, None, &mut hits)
    }
}

fn dedupe_in_order(notes: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    notes
        .into_iter()
        .filter(|n| seen.insert(n.clone()))
        .collect()
}
