//! Expression safety evaluation
//!
//! The heart of the analysis: a single left-to-right scan over an expression
//! that decides whether every value-producing token is safe for the sink at
//! hand. No AST; the scan walks the token stream directly, recursing only
//! into the argument lists of taint-neutral calls. Returns the position of
//! the first unsafe token, or `None` when the whole expression is safe.

use crate::analyzer::policy::{FunctionClass, SinkPolicy};
use crate::analyzer::scope::ScopeResolver;
use crate::analyzer::state::TaintState;
use crate::analyzer::table_names::looks_like_table_position;
use crate::tokens::{CastKind, TokenKind, TokenStream};
use regex::Regex;

/// Tokens the scan stops at. Everything else is structure or operators,
/// which produce no value of their own.
fn is_of_interest(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Variable
            | TokenKind::Ident
            | TokenKind::ConstString
            | TokenKind::InterpString
            | TokenKind::Heredoc
            | TokenKind::Cast(CastKind::Int)
            | TokenKind::Cast(CastKind::Bool)
    )
}

/// Immutable evaluation context for one file and one sink policy. Taint
/// state is passed per call so the driver keeps a single mutable owner.
pub struct ExpressionChecker<'a> {
    stream: &'a TokenStream,
    scopes: &'a ScopeResolver,
    policy: &'a SinkPolicy,
}

impl<'a> ExpressionChecker<'a> {
    pub fn new(stream: &'a TokenStream, scopes: &'a ScopeResolver, policy: &'a SinkPolicy) -> Self {
        Self {
            stream,
            scopes,
            policy,
        }
    }

    /// Exclusive end bound for the expression starting at `start`: the
    /// position of its terminating `;`/close tag, or one past its last
    /// token when it ends at a `,` or an enclosing close bracket.
    pub fn expression_end(&self, start: usize) -> usize {
        let eos = self.stream.end_of_statement(start);
        match self.stream.kind(eos) {
            Some(k) if k.ends_statement() => eos,
            _ => eos + 1,
        }
    }

    /// Scan `[start, end)` and return the first unsafe token position.
    /// `None` end means "to the end of this statement". Interpolated
    /// variables that sit in the table-name position of a query are pushed
    /// onto `table_hits` so the caller can downgrade severity.
    pub fn check_expression(
        &self,
        state: &TaintState,
        start: usize,
        end: Option<usize>,
        table_hits: &mut Vec<String>,
    ) -> Option<usize> {
        let end = end.unwrap_or_else(|| self.expression_end(start));
        let mut ptr = start;

        loop {
            ptr = self.stream.find_next(ptr, Some(end), is_of_interest)?;

            // A later `?` puts everything up to it in boolean context; the
            // condition of a ternary never reaches the sink. The short
            // `?:` form is the exception: there the condition IS the value.
            if let Some(q) = self
                .stream
                .find_next(ptr, Some(end), |k| k == TokenKind::Question)
            {
                let short_form = self
                    .stream
                    .next_non_empty(q + 1)
                    .and_then(|a| self.stream.kind(a))
                    == Some(TokenKind::Colon);
                if !short_form {
                    ptr = q + 1;
                    continue;
                }
            }

            match self.stream.kind(ptr)? {
                // (int) and (bool) casts neutralize whatever they apply to.
                TokenKind::Cast(_) => {
                    ptr = self.stream.end_of_statement(ptr) + 1;
                }

                TokenKind::ConstString => {
                    ptr += 1;
                }

                TokenKind::InterpString | TokenKind::Heredoc => {
                    if let Some(unsafe_ptr) = self.check_interpolation(state, ptr, table_hits) {
                        return Some(unsafe_ptr);
                    }
                    ptr += 1;
                }

                TokenKind::Variable => {
                    let (path, last) = self.stream.variable_path(ptr)?;
                    if self.policy.blessed_chains.iter().any(|c| *c == path) {
                        ptr = last + 1;
                        continue;
                    }
                    let scope = self.scopes.scope_of(ptr);
                    if state.is_sanitized(scope, &path, self.policy) {
                        ptr = last + 1;
                    } else {
                        return Some(ptr);
                    }
                }

                TokenKind::Ident => match self.check_ident(state, ptr, table_hits) {
                    IdentOutcome::Advance(next) => ptr = next,
                    IdentOutcome::Unsafe(pos) => return Some(pos),
                },

                _ => {
                    ptr += 1;
                }
            }

            if ptr >= end {
                return None;
            }
        }
    }

    /// Convenience wrapper: is the expression at `[start, end)` safe?
    pub fn expression_is_safe(
        &self,
        state: &TaintState,
        start: usize,
        end: Option<usize>,
        table_hits: &mut Vec<String>,
    ) -> bool {
        self.check_expression(state, start, end, table_hits)
            .is_none()
    }

    fn check_ident(
        &self,
        state: &TaintState,
        ptr: usize,
        table_hits: &mut Vec<String>,
    ) -> IdentOutcome {
        let name = match self.stream.text(ptr) {
            Some(n) => n.to_string(),
            None => return IdentOutcome::Unsafe(ptr),
        };

        if self.policy.is_safe_constant(&name) {
            return IdentOutcome::Advance(ptr + 1);
        }

        let next = self.stream.next_non_empty(ptr + 1);
        let next_kind = next.and_then(|n| self.stream.kind(n));
        let is_call = next_kind == Some(TokenKind::OpenParen);

        if !is_call {
            // Class names before `::`, bare defined constants: neither
            // carries attacker data on its own.
            return IdentOutcome::Advance(ptr + 1);
        }

        let after_call = self.stream.end_of_call(ptr).unwrap_or(ptr + 1);

        if name == "array_map" {
            // array_map('esc_sql', $x) escapes every element. Any other
            // callback gets no credit; scan the arguments normally.
            if let Some(params) = self.stream.call_parameters(ptr) {
                if let Some(first) = params.first() {
                    let callback = first.clean.trim_matches(['\'', '"']);
                    if self.policy.is_escaping(callback) {
                        return IdentOutcome::Advance(after_call);
                    }
                }
            }
            return IdentOutcome::Advance(ptr + 1);
        }

        if self.policy.is_parameterized_call(&name) {
            // prepare() escapes everything after the first argument via
            // placeholders; the query template itself still needs checking.
            let params = match self.stream.call_parameters(ptr) {
                Some(p) if !p.is_empty() => p,
                _ => return IdentOutcome::Unsafe(ptr),
            };
            let first = &params[0];
            if let Some(unsafe_ptr) =
                self.check_expression(state, first.start, Some(first.end + 1), table_hits)
            {
                return IdentOutcome::Unsafe(unsafe_ptr);
            }
            return IdentOutcome::Advance(after_call);
        }

        match self.policy.classify(&name) {
            Some(FunctionClass::Escaping) | Some(FunctionClass::ImplicitSafe) => {
                IdentOutcome::Advance(after_call)
            }
            Some(FunctionClass::Neutral) => {
                if let Some(params) = self.stream.call_parameters(ptr) {
                    for p in &params {
                        if let Some(unsafe_ptr) =
                            self.check_expression(state, p.start, Some(p.end + 1), table_hits)
                        {
                            return IdentOutcome::Unsafe(unsafe_ptr);
                        }
                    }
                }
                IdentOutcome::Advance(after_call)
            }
            // Confusable or unknown: the return value cannot be trusted.
            Some(FunctionClass::Confusable) | None => IdentOutcome::Unsafe(ptr),
        }
    }

    /// Check every variable interpolated into a double-quoted string or
    /// heredoc. A variable sitting exactly in the table-name position of a
    /// recognized query shape is recorded in `table_hits`; taint checking
    /// still applies to it.
    fn check_interpolation(
        &self,
        state: &TaintState,
        ptr: usize,
        table_hits: &mut Vec<String>,
    ) -> Option<usize> {
        let scope = self.scopes.scope_of(ptr);
        let text = self.stream.text(ptr)?.to_string();

        for var in self.stream.interpolated_variables(ptr) {
            let placeholder = format!("{:x}", md5::compute(var.as_bytes()));
            let substituted = substitute_variable(&text, &var, &placeholder);
            if looks_like_table_position(&substituted, &placeholder) {
                table_hits.push(var.clone());
            }
            if !state.is_sanitized(scope, &var, self.policy) {
                return Some(ptr);
            }
        }
        None
    }

    /// Human-readable rendering of the unsafe part of the expression whose
    /// first unsafe token is at `pos`.
    pub fn unsafe_expression_text(&self, state: &TaintState, pos: usize) -> String {
        match self.stream.kind(pos) {
            Some(TokenKind::InterpString) | Some(TokenKind::Heredoc) => {
                let scope = self.scopes.scope_of(pos);
                for var in self.stream.interpolated_variables(pos) {
                    if !state.is_sanitized(scope, &var, self.policy) {
                        return var;
                    }
                }
                self.stream.clean_text(pos, pos)
            }
            Some(TokenKind::Variable) => self
                .stream
                .variable_path(pos)
                .map(|(path, _)| path)
                .unwrap_or_default(),
            _ => {
                let end = self.stream.end_of_statement(pos);
                self.stream.clean_text(pos, end)
            }
        }
    }

    /// Variables an unsafe token position depends on, for the assignment
    /// explainer: the variable's own path, or every interpolated variable
    /// that is not sanitized.
    pub fn unsafe_variables(&self, state: &TaintState, pos: usize) -> Vec<String> {
        match self.stream.kind(pos) {
            Some(TokenKind::Variable) => self
                .stream
                .variable_path(pos)
                .map(|(path, _)| vec![path])
                .unwrap_or_default(),
            Some(TokenKind::InterpString) | Some(TokenKind::Heredoc) => {
                let scope = self.scopes.scope_of(pos);
                self.stream
                    .interpolated_variables(pos)
                    .into_iter()
                    .filter(|v| !state.is_sanitized(scope, v, self.policy))
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    /// Names of confusable functions mentioned anywhere in `[start, end]`.
    pub fn confusables_in(&self, start: usize, end: usize) -> Vec<String> {
        let mut out = Vec::new();
        let end = end.min(self.stream.len().saturating_sub(1));
        for i in start..=end {
            if self.stream.kind(i) == Some(TokenKind::Ident) {
                if let Some(name) = self.stream.text(i) {
                    if self.policy.is_confusable(name) && !out.iter().any(|n| n == name) {
                        out.push(name.to_string());
                    }
                }
            }
        }
        out
    }
}

enum IdentOutcome {
    Advance(usize),
    Unsafe(usize),
}

/// Replace every occurrence of one interpolated variable reference with a
/// placeholder, covering the `{$var}`, `${var}` and bare `$var` spellings.
fn substitute_variable(text: &str, var: &str, placeholder: &str) -> String {
    let escaped = regex::escape(var);
    let mut alternatives = vec![format!(r"\{{{escaped}\}}")];
    if let Some(name) = var.strip_prefix('$') {
        alternatives.push(format!(r"\$\{{{}\}}", regex::escape(name)));
    }
    // A word boundary stops `$id` from also matching inside `$identifier`.
    if var.ends_with(|c: char| c.is_alphanumeric() || c == '_') {
        alternatives.push(format!(r"{escaped}\b"));
    } else {
        alternatives.push(escaped);
    }

    match Regex::new(&alternatives.join("|")) {
        Ok(re) => re.replace_all(text, placeholder).into_owned(),
        Err(_) => text.replace(var, placeholder),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::scope::ScopeId;
    use crate::lexer::tokenize;

    fn setup(src: &str) -> (TokenStream, ScopeResolver) {
        let ts = tokenize(src).expect("lexes");
        let scopes = ScopeResolver::new(&ts);
        (ts, scopes)
    }

    fn first_var(ts: &TokenStream, name: &str) -> usize {
        ts.iter()
            .find(|(_, t)| t.kind == TokenKind::Variable && t.text == name)
            .map(|(i, _)| i)
            .expect("variable present")
    }

    #[test]
    fn test_literal_is_safe() {
        let (ts, scopes) = setup("<?php $q = 'SELECT 1';");
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let rhs = first_var(&ts, "$q") + 1;
        let mut hits = Vec::new();
        assert!(checker.expression_is_safe(&state, rhs, None, &mut hits));
    }

    #[test]
    fn test_untracked_variable_is_unsafe() {
        let (ts, scopes) = setup("<?php foo($id);");
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let pos = first_var(&ts, "$id");
        let mut hits = Vec::new();
        assert_eq!(
            checker.check_expression(&state, pos, Some(pos + 1), &mut hits),
            Some(pos)
        );
    }

    #[test]
    fn test_sanitized_variable_is_safe() {
        let (ts, scopes) = setup("<?php foo($id);");
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let mut state = TaintState::new();
        let pos = first_var(&ts, "$id");
        state.mark_sanitized(ScopeId::Global, "$id", 0);
        let mut hits = Vec::new();
        assert_eq!(
            checker.check_expression(&state, pos, Some(pos + 1), &mut hits),
            None
        );
    }

    #[test]
    fn test_escaping_call_is_safe() {
        let (ts, scopes) = setup("<?php $q = esc_sql($_GET['x']);");
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let rhs = first_var(&ts, "$q") + 1;
        let mut hits = Vec::new();
        assert!(checker.expression_is_safe(&state, rhs, None, &mut hits));
    }

    #[test]
    fn test_neutral_call_propagates_taint() {
        let (ts, scopes) = setup("<?php $q = implode(',', $ids);");
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let rhs = first_var(&ts, "$q") + 1;
        let mut hits = Vec::new();
        let unsafe_pos = checker.check_expression(&state, rhs, None, &mut hits);
        assert_eq!(unsafe_pos, Some(first_var(&ts, "$ids")));
    }

    #[test]
    fn test_neutral_call_with_safe_args_is_safe() {
        let (ts, scopes) = setup("<?php $q = implode(',', $ids);");
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let mut state = TaintState::new();
        state.mark_sanitized(ScopeId::Global, "$ids", 0);
        let rhs = first_var(&ts, "$q") + 1;
        let mut hits = Vec::new();
        assert!(checker.expression_is_safe(&state, rhs, None, &mut hits));
    }

    #[test]
    fn test_int_cast_is_safe() {
        let (ts, scopes) = setup("<?php $q = (int) $_GET['id'];");
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let rhs = first_var(&ts, "$q") + 1;
        let mut hits = Vec::new();
        assert!(checker.expression_is_safe(&state, rhs, None, &mut hits));
    }

    #[test]
    fn test_interpolated_tainted_variable_is_unsafe() {
        let (ts, scopes) = setup(r#"<?php $q = "SELECT * FROM x WHERE id = $id";"#);
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let rhs = first_var(&ts, "$q") + 1;
        let mut hits = Vec::new();
        let unsafe_pos = checker.check_expression(&state, rhs, None, &mut hits);
        assert!(unsafe_pos.is_some());
        assert_eq!(
            checker.unsafe_expression_text(&state, unsafe_pos.unwrap()),
            "$id"
        );
    }

    #[test]
    fn test_table_name_interpolation_recorded() {
        let (ts, scopes) = setup(r#"<?php $q = "SELECT * FROM {$table} WHERE id = 1";"#);
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let rhs = first_var(&ts, "$q") + 1;
        let mut hits = Vec::new();
        let unsafe_pos = checker.check_expression(&state, rhs, None, &mut hits);
        assert!(unsafe_pos.is_some());
        assert_eq!(hits, vec!["$table".to_string()]);
    }

    #[test]
    fn test_wpdb_table_property_is_safe() {
        let (ts, scopes) = setup(r#"<?php $q = "SELECT * FROM {$wpdb->posts} WHERE id = 1";"#);
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let rhs = first_var(&ts, "$q") + 1;
        let mut hits = Vec::new();
        assert!(checker.expression_is_safe(&state, rhs, None, &mut hits));
    }

    #[test]
    fn test_ternary_condition_not_checked() {
        let (ts, scopes) = setup("<?php $q = $dirty ? 'a' : 'b';");
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let rhs = first_var(&ts, "$q") + 1;
        let mut hits = Vec::new();
        assert!(checker.expression_is_safe(&state, rhs, None, &mut hits));
    }

    #[test]
    fn test_short_ternary_condition_is_checked() {
        let (ts, scopes) = setup("<?php $q = $dirty ?: 'b';");
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let rhs = first_var(&ts, "$q") + 1;
        let mut hits = Vec::new();
        assert_eq!(
            checker.check_expression(&state, rhs, None, &mut hits),
            Some(first_var(&ts, "$dirty"))
        );
    }

    #[test]
    fn test_prepare_checks_template_only() {
        let (ts, scopes) = setup(r#"<?php $wpdb->prepare("SELECT * FROM x WHERE id = %d", $id);"#);
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let start = first_var(&ts, "$wpdb");
        let mut hits = Vec::new();
        assert!(checker.expression_is_safe(&state, start, None, &mut hits));
    }

    #[test]
    fn test_prepare_with_tainted_template_is_unsafe() {
        let (ts, scopes) = setup("<?php $wpdb->prepare($sql, $id);");
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let start = first_var(&ts, "$wpdb");
        let mut hits = Vec::new();
        assert_eq!(
            checker.check_expression(&state, start, None, &mut hits),
            Some(first_var(&ts, "$sql"))
        );
    }

    #[test]
    fn test_prepare_without_arguments_is_unsafe() {
        let (ts, scopes) = setup("<?php $wpdb->prepare();");
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let start = first_var(&ts, "$wpdb");
        let mut hits = Vec::new();
        assert!(checker
            .check_expression(&state, start, None, &mut hits)
            .is_some());
    }

    #[test]
    fn test_array_map_with_escaping_callback() {
        let (ts, scopes) = setup("<?php $q = array_map('esc_sql', $ids);");
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let rhs = first_var(&ts, "$q") + 1;
        let mut hits = Vec::new();
        assert!(checker.expression_is_safe(&state, rhs, None, &mut hits));
    }

    #[test]
    fn test_array_map_with_unknown_callback() {
        let (ts, scopes) = setup("<?php $q = array_map('strtoupper', $ids);");
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let rhs = first_var(&ts, "$q") + 1;
        let mut hits = Vec::new();
        assert!(!checker.expression_is_safe(&state, rhs, None, &mut hits));
    }

    #[test]
    fn test_unknown_function_is_unsafe() {
        let (ts, scopes) = setup("<?php $q = my_mystery_fn($x);");
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let rhs = first_var(&ts, "$q") + 1;
        let mut hits = Vec::new();
        assert!(!checker.expression_is_safe(&state, rhs, None, &mut hits));
    }

    #[test]
    fn test_safe_constant() {
        let (ts, scopes) = setup("<?php $x = ARRAY_A;");
        let policy = SinkPolicy::sql();
        let checker = ExpressionChecker::new(&ts, &scopes, &policy);
        let state = TaintState::new();
        let rhs = first_var(&ts, "$x") + 1;
        let mut hits = Vec::new();
        assert!(checker.expression_is_safe(&state, rhs, None, &mut hits));
    }

    #[test]
    fn test_substitute_variable_word_boundary() {
        let out = substitute_variable("a $id and $identifier", "$id", "PH");
        assert_eq!(out, "a PH and $identifier");
    }

    #[test]
    fn test_substitute_variable_braced() {
        let out = substitute_variable("FROM {$wpdb->posts} x", "$wpdb->posts", "PH");
        assert_eq!(out, "FROM PH x");
    }
}
