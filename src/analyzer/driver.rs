//! Statement driver
//!
//! Single forward pass over one file's token stream for one sink policy.
//! The driver owns the mutable taint state: it records assignments and
//! foreach bindings as it encounters them, then checks every sink reached
//! later in the file against the state accumulated so far. Order matters
//! and is the point: a sanitizing assignment protects only the uses after
//! it.

use crate::analyzer::expression::ExpressionChecker;
use crate::analyzer::explain::Explainer;
use crate::analyzer::policy::SinkPolicy;
use crate::analyzer::scope::ScopeResolver;
use crate::analyzer::state::TaintState;
use crate::tokens::{AssignOp, Keyword, Param, TokenKind, TokenStream};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    Warning,
    Error,
}

/// One sink violation, before it is wrapped into a reportable finding.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub line: u32,
    pub rule_id: &'static str,
    pub message: String,
    pub unsafe_expression: String,
    pub notes: Vec<String>,
}

/// Runs one policy over one tokenized file.
pub struct StatementDriver<'a> {
    stream: &'a TokenStream,
    scopes: &'a ScopeResolver,
    policy: &'a SinkPolicy,
    checker: ExpressionChecker<'a>,
}

impl<'a> StatementDriver<'a> {
    pub fn new(stream: &'a TokenStream, scopes: &'a ScopeResolver, policy: &'a SinkPolicy) -> Self {
        let checker = ExpressionChecker::new(stream, scopes, policy);
        Self {
            stream,
            scopes,
            policy,
            checker,
        }
    }

    pub fn analyze(&self) -> Vec<Diagnostic> {
        let mut state = TaintState::new();
        let mut diagnostics = Vec::new();
        let suppressed = self.suppressed_lines();

        let mut pos = 0;
        while pos < self.stream.len() {
            match self.stream.kind(pos) {
                Some(TokenKind::Variable) => {
                    if self.track_assignment(&mut state, pos) {
                        pos += 1;
                        continue;
                    }
                    if let Some(diag) = self.check_method_sink(&state, pos) {
                        self.push_unless_suppressed(&mut diagnostics, &suppressed, diag);
                    }
                    pos += 1;
                }
                Some(TokenKind::Keyword(Keyword::Foreach)) => {
                    pos = self.track_foreach(&mut state, pos);
                }
                Some(TokenKind::Ident) if self.stream.text(pos) == Some("array_walk") => {
                    self.track_array_walk(&mut state, pos);
                    pos += 1;
                }
                Some(TokenKind::Keyword(kw)) if self.policy.is_sink_keyword(kw) => {
                    if let Some(diag) = self.check_output_sink(&state, pos, keyword_name(kw)) {
                        self.push_unless_suppressed(&mut diagnostics, &suppressed, diag);
                    }
                    pos += 1;
                }
                Some(TokenKind::OpenTagEcho) if self.policy.is_sink_keyword(Keyword::Echo) => {
                    if let Some(diag) = self.check_output_sink(&state, pos, "<?=") {
                        self.push_unless_suppressed(&mut diagnostics, &suppressed, diag);
                    }
                    pos += 1;
                }
                _ => pos += 1,
            }
        }

        diagnostics
    }

    /// Lines where findings are suppressed via a `phpcs:ignore` comment,
    /// either trailing the flagged line or standing alone on the line above
    /// it. A trailing comment covers only its own line.
    fn suppressed_lines(&self) -> HashSet<u32> {
        let mut lines = HashSet::new();
        let mut current_line = 0;
        let mut line_has_code = false;
        for (_, tok) in self.stream.iter() {
            if tok.line != current_line {
                current_line = tok.line;
                line_has_code = false;
            }
            if tok.kind == TokenKind::Comment && tok.text.contains("phpcs:ignore") {
                lines.insert(tok.line);
                if !line_has_code {
                    lines.insert(tok.line + 1);
                }
            }
            if !tok.kind.is_empty()
                && !matches!(
                    tok.kind,
                    TokenKind::OpenTag | TokenKind::CloseTag | TokenKind::InlineHtml
                )
            {
                line_has_code = true;
            }
        }
        lines
    }

    fn push_unless_suppressed(
        &self,
        diagnostics: &mut Vec<Diagnostic>,
        suppressed: &HashSet<u32>,
        diag: Diagnostic,
    ) {
        if suppressed.contains(&diag.line) {
            debug!(line = diag.line, "finding suppressed by phpcs:ignore");
            return;
        }
        diagnostics.push(diag);
    }

    /// If the variable at `pos` is the left-hand side of an assignment,
    /// update taint state and the assignment history. Returns whether an
    /// assignment was handled.
    fn track_assignment(&self, state: &mut TaintState, pos: usize) -> bool {
        let Some((path, last)) = self.stream.variable_path(pos) else {
            return false;
        };
        let Some(op_pos) = self.stream.next_non_empty(last + 1) else {
            return false;
        };
        let Some(TokenKind::Assign(op)) = self.stream.kind(op_pos) else {
            return false;
        };
        let Some(rhs) = self.stream.next_non_empty(op_pos + 1) else {
            return false;
        };

        let scope = self.scopes.scope_of(pos);
        let level = self.stream.level(pos);
        let mut hits = Vec::new();
        let safe = self
            .checker
            .check_expression(state, rhs, None, &mut hits)
            .is_none();

        if safe {
            // Appending a safe element says nothing about the rest of the
            // array; a concat-assign keeps whatever was there before.
            if op == AssignOp::Eq && !path.ends_with("[]") {
                state.mark_sanitized(scope, &path, level);
            }
        } else {
            state.mark_unsanitized(scope, &path, level);
        }

        let end = self.stream.end_of_statement(pos);
        state.record_assignment(scope, &path, pos, self.stream.clean_text(pos, end));
        true
    }

    /// `foreach ($source as $key => $value)`: loop variables take on the
    /// taint of the source expression.
    fn track_foreach(&self, state: &mut TaintState, pos: usize) -> usize {
        let Some(open) = self.stream.next_non_empty(pos + 1) else {
            return pos + 1;
        };
        if self.stream.kind(open) != Some(TokenKind::OpenParen) {
            return pos + 1;
        }
        let Some(close) = self.stream.matching(open) else {
            return pos + 1;
        };
        let Some(as_pos) = self.stream.find_next(open + 1, Some(close), |k| {
            k == TokenKind::Keyword(Keyword::As)
        }) else {
            return close + 1;
        };

        let mut hits = Vec::new();
        let source_safe = self
            .stream
            .next_non_empty(open + 1)
            .map(|start| {
                self.checker
                    .expression_is_safe(state, start, Some(as_pos), &mut hits)
            })
            .unwrap_or(false);

        let scope = self.scopes.scope_of(pos);
        let level = self.stream.level(pos);

        // `as $k => $v` binds taint to the value only; the key is an index.
        let value_start = self
            .stream
            .find_next(as_pos + 1, Some(close), |k| k == TokenKind::DoubleArrow)
            .map(|arrow| arrow + 1)
            .unwrap_or(as_pos + 1);
        let mut i = value_start;
        while i < close {
            if self.stream.kind(i) == Some(TokenKind::Variable) {
                if let Some((path, last)) = self.stream.variable_path(i) {
                    if source_safe {
                        state.mark_sanitized(scope, &path, level);
                    } else {
                        state.mark_unsanitized(scope, &path, level);
                    }
                    i = last + 1;
                    continue;
                }
            }
            i += 1;
        }

        close + 1
    }

    /// `array_walk($arr, 'esc_sql')` escapes every element in place.
    fn track_array_walk(&self, state: &mut TaintState, pos: usize) {
        let Some(params) = self.stream.call_parameters(pos) else {
            return;
        };
        if params.len() < 2 {
            return;
        }
        let callback = params[1].clean.trim_matches(['\'', '"']);
        if !self.policy.is_escaping(callback) {
            return;
        }
        let target = params[0].clean.trim_start_matches('&');
        if target.starts_with('$') {
            state.mark_sanitized(self.scopes.scope_of(pos), target, self.stream.level(pos));
        }
    }

    /// Method-call sink: `$wpdb->query($sql)` and friends. Only the first
    /// argument is a query; later arguments select output shape.
    fn check_method_sink(&self, state: &TaintState, pos: usize) -> Option<Diagnostic> {
        let (receiver, last) = self.stream.variable_path(pos)?;
        if !self.policy.is_sink_receiver(&receiver) {
            return None;
        }
        let arrow = self.stream.next_non_empty(last + 1)?;
        if self.stream.kind(arrow) != Some(TokenKind::ObjectOp) {
            return None;
        }
        let method_pos = self.stream.next_non_empty(arrow + 1)?;
        if self.stream.kind(method_pos) != Some(TokenKind::Ident) {
            return None;
        }
        let method = self.stream.text(method_pos)?.to_string();
        if !self.policy.is_sink_method(&method) {
            return None;
        }

        let params = self.stream.call_parameters(method_pos)?;
        let first = params.first()?;

        let mut hits = Vec::new();
        let unsafe_pos = self
            .checker
            .check_expression(state, first.start, Some(first.end + 1), &mut hits)?;

        let sink = format!("{receiver}->{method}()");
        Some(self.build_diagnostic(state, unsafe_pos, &sink, Some(first), &hits))
    }

    /// Keyword sink: `echo`, `print`, `exit(...)`, `<?=`.
    fn check_output_sink(&self, state: &TaintState, pos: usize, sink: &str) -> Option<Diagnostic> {
        if sink == "exit" {
            // Bare exit/die emits nothing.
            let next = self.stream.next_non_empty(pos + 1)?;
            if self.stream.kind(next) != Some(TokenKind::OpenParen) {
                return None;
            }
        }

        // Everything up to the statement end (or close tag for `<?=`) is
        // emitted, including comma-separated echo arguments.
        let end = self.stream.find_next(pos + 1, None, |k| k.ends_statement());
        let mut hits = Vec::new();
        let unsafe_pos = self.checker.check_expression(state, pos + 1, end, &mut hits)?;

        Some(self.build_diagnostic(state, unsafe_pos, sink, None, &hits))
    }

    fn build_diagnostic(
        &self,
        state: &TaintState,
        unsafe_pos: usize,
        sink: &str,
        first_param: Option<&Param>,
        table_hits: &[String],
    ) -> Diagnostic {
        let expr = self.checker.unsafe_expression_text(state, unsafe_pos);

        let warn_only = self.policy.is_warning_parameter(&expr)
            || table_hits.iter().any(|h| *h == expr)
            || first_param
                .map(|p| self.policy.is_warning_query(&p.clean))
                .unwrap_or(false);
        let severity = if warn_only {
            DiagnosticSeverity::Warning
        } else {
            DiagnosticSeverity::Error
        };

        let explainer = Explainer::new(self.stream, self.scopes, self.policy, &self.checker);
        let notes = explainer.unwind_unsafe_assignments(state, unsafe_pos);

        debug!(
            policy = self.policy.name,
            line = self.stream.line(unsafe_pos),
            expression = %expr,
            "unsafe sink parameter"
        );

        Diagnostic {
            severity,
            line: self.stream.line(unsafe_pos),
            rule_id: self.policy.rule_id,
            message: format!("Unescaped parameter `{expr}` used in {sink}"),
            unsafe_expression: expr,
            notes,
        }
    }
}

fn keyword_name(kw: Keyword) -> &'static str {
    match kw {
        Keyword::Echo => "echo",
        Keyword::Print => "print",
        Keyword::Exit => "exit",
        _ => "output",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn run_sql(src: &str) -> Vec<Diagnostic> {
        let ts = tokenize(src).expect("lexes");
        let scopes = ScopeResolver::new(&ts);
        let policy = SinkPolicy::sql();
        StatementDriver::new(&ts, &scopes, &policy).analyze()
    }

    fn run_output(src: &str) -> Vec<Diagnostic> {
        let ts = tokenize(src).expect("lexes");
        let scopes = ScopeResolver::new(&ts);
        let policy = SinkPolicy::output();
        StatementDriver::new(&ts, &scopes, &policy).analyze()
    }

    #[test]
    fn test_tainted_query_is_flagged() {
        let diags = run_sql(
            r#"<?php
$sql = "SELECT * FROM x WHERE id = $id";
$wpdb->query($sql);
"#,
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, DiagnosticSeverity::Error);
        assert_eq!(diags[0].rule_id, "UnescapedDBParameter");
        assert_eq!(diags[0].unsafe_expression, "$sql");
        assert!(!diags[0].notes.is_empty());
    }

    #[test]
    fn test_sanitized_then_used_is_clean() {
        let diags = run_sql(
            r#"<?php
$id = intval($_GET['id']);
$wpdb->query("SELECT * FROM x WHERE id = $id");
"#,
        );
        assert!(diags.is_empty());
    }

    #[test]
    fn test_prepare_covers_placeholders() {
        let diags = run_sql(
            r#"<?php
$wpdb->query($wpdb->prepare("SELECT * FROM x WHERE id = %d", $_GET['id']));
"#,
        );
        assert!(diags.is_empty());
    }

    #[test]
    fn test_use_before_sanitize_is_flagged() {
        let diags = run_sql(
            r#"<?php
$wpdb->query("SELECT * FROM x WHERE id = $id");
$id = intval($_GET['id']);
"#,
        );
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_conditional_sanitize_not_trusted() {
        let diags = run_sql(
            r#"<?php
$id = $_GET['id'];
if ($flag) { $id = intval($id); }
$wpdb->query("SELECT * FROM x WHERE id = $id");
"#,
        );
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_unconditional_sanitize_clears_taint() {
        let diags = run_sql(
            r#"<?php
$id = $_GET['id'];
$id = intval($id);
$wpdb->query("SELECT * FROM x WHERE id = $id");
"#,
        );
        assert!(diags.is_empty());
    }

    #[test]
    fn test_table_name_interpolation_is_warning() {
        let diags = run_sql(
            r#"<?php
$wpdb->query("SELECT * FROM {$table} WHERE id = 1");
"#,
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, DiagnosticSeverity::Warning);
    }

    #[test]
    fn test_show_query_is_warning() {
        let diags = run_sql(
            r#"<?php
$wpdb->query("SHOW COLUMNS FROM $thing");
"#,
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, DiagnosticSeverity::Warning);
    }

    #[test]
    fn test_phpcs_ignore_suppresses() {
        let diags = run_sql(
            r#"<?php
$wpdb->query($sql); // phpcs:ignore
"#,
        );
        assert!(diags.is_empty());
    }

    #[test]
    fn test_phpcs_ignore_on_previous_line_suppresses() {
        let diags = run_sql(
            r#"<?php
// phpcs:ignore
$wpdb->query($sql);
"#,
        );
        assert!(diags.is_empty());
    }

    #[test]
    fn test_trailing_ignore_covers_only_its_own_line() {
        let diags = run_sql(
            r#"<?php
$wpdb->query($a); // phpcs:ignore
$wpdb->query($b);
"#,
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].unsafe_expression, "$b");
    }

    #[test]
    fn test_foreach_propagates_taint() {
        let diags = run_sql(
            r#"<?php
foreach ($_POST['ids'] as $id) {
    $wpdb->query("SELECT * FROM x WHERE id = $id");
}
"#,
        );
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_foreach_over_safe_source_is_clean() {
        let diags = run_sql(
            r#"<?php
$ids = array_map('absint', $_POST['ids']);
foreach ($ids as $id) {
    $wpdb->query("SELECT * FROM x WHERE id = $id");
}
"#,
        );
        assert!(diags.is_empty());
    }

    #[test]
    fn test_foreach_binds_value_not_key() {
        let diags = run_sql(
            r#"<?php
$ids = array_map('absint', $_POST['ids']);
foreach ($ids as $k => $id) {
    $wpdb->query("SELECT * FROM x WHERE id = $id");
}
"#,
        );
        assert!(diags.is_empty());

        let diags = run_sql(
            r#"<?php
$ids = array_map('absint', $_POST['ids']);
foreach ($ids as $k => $id) {
    $wpdb->query("SELECT * FROM x WHERE id = $k");
}
"#,
        );
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_array_walk_sanitizes_in_place() {
        let diags = run_sql(
            r#"<?php
$ids = $_POST['ids'];
array_walk($ids, 'esc_sql');
$wpdb->query("SELECT * FROM x WHERE id IN ($ids)");
"#,
        );
        assert!(diags.is_empty());
    }

    #[test]
    fn test_concat_assign_does_not_sanitize() {
        let diags = run_sql(
            r#"<?php
$sql = $_GET['q'];
$sql .= " LIMIT 1";
$wpdb->query($sql);
"#,
        );
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_echo_tainted_variable() {
        let diags = run_output("<?php echo $_GET['name'];");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].rule_id, "UnescapedOutputParameter");
        assert_eq!(diags[0].severity, DiagnosticSeverity::Error);
    }

    #[test]
    fn test_echo_escaped_variable_is_clean() {
        let diags = run_output("<?php echo esc_html($_GET['name']);");
        assert!(diags.is_empty());
    }

    #[test]
    fn test_echo_comma_list_checks_every_argument() {
        let diags = run_output("<?php echo esc_html($a), $b;");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].unsafe_expression, "$b");
    }

    #[test]
    fn test_short_echo_tag() {
        let diags = run_output("<p><?= $name ?></p>");
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_bare_exit_is_clean() {
        let diags = run_output("<?php exit;");
        assert!(diags.is_empty());
    }

    #[test]
    fn test_exit_with_tainted_argument() {
        let diags = run_output("<?php exit($_GET['msg']);");
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_this_property_is_warning() {
        let diags = run_output("<?php echo $this->title;");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, DiagnosticSeverity::Warning);
    }

    #[test]
    fn test_closure_does_not_inherit_outer_sanitization() {
        let diags = run_sql(
            r#"<?php
$id = intval($_GET['id']);
$fn = function () use ($wpdb) {
    global $id;
    $wpdb->query("SELECT * FROM x WHERE id = $id");
};
"#,
        );
        assert_eq!(diags.len(), 1);
    }
}
