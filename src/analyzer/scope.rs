//! Scope resolution
//!
//! Maps a token position to the innermost enclosing function or closure.
//! Taint state is tracked flat per scope: a closure body deliberately does
//! NOT inherit sanitization from its enclosing scope, because a closure may
//! run at a different time and in a different context than where it was
//! defined. That asymmetry is inherited from the original analysis and is a
//! documented approximation, not an oversight.

use crate::tokens::{Keyword, TokenKind, TokenStream};

/// Opaque scope identifier: the position of the `function` keyword token of
/// the innermost enclosing function/closure, or the global sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeId {
    Global,
    Function(usize),
}

/// Resolves token positions to scopes. Pure: built once from the stream's
/// structural annotations, never mutated afterwards.
#[derive(Debug)]
pub struct ScopeResolver {
    /// (body_open, body_close, function_keyword_pos), innermost found by
    /// picking the narrowest containing span.
    spans: Vec<(usize, usize, usize)>,
}

impl ScopeResolver {
    pub fn new(stream: &TokenStream) -> Self {
        let mut spans = Vec::new();
        for (pos, tok) in stream.iter() {
            if tok.kind != TokenKind::Keyword(Keyword::Function) {
                continue;
            }
            if let Some((open, close)) = function_body(stream, pos) {
                spans.push((open, close, pos));
            }
        }
        Self { spans }
    }

    /// The innermost enclosing function/closure of `pos`, else global.
    pub fn scope_of(&self, pos: usize) -> ScopeId {
        let mut best: Option<(usize, usize)> = None;
        for &(open, close, fn_pos) in &self.spans {
            if pos > open && pos < close {
                let width = close - open;
                if best.map(|(w, _)| width < w).unwrap_or(true) {
                    best = Some((width, fn_pos));
                }
            }
        }
        match best {
            Some((_, fn_pos)) => ScopeId::Function(fn_pos),
            None => ScopeId::Global,
        }
    }
}

/// Locate the `{ ... }` body of the function declared at `fn_pos`. Returns
/// `None` for bodyless declarations (interface/abstract methods) and arrow
/// functions, which have no brace-delimited scope.
fn function_body(stream: &TokenStream, fn_pos: usize) -> Option<(usize, usize)> {
    // Parameter list: first `(` after the keyword (and optional name).
    let params_open = stream.find_next(fn_pos + 1, None, |k| k == TokenKind::OpenParen)?;
    let params_close = stream.matching(params_open)?;

    // Body opens at the next `{` before any `;`, possibly after a
    // `use (...)` clause or a return type.
    let mut i = params_close + 1;
    loop {
        let next = stream.next_non_empty(i)?;
        match stream.kind(next)? {
            TokenKind::OpenCurly => {
                let close = stream.matching(next)?;
                return Some((next, close));
            }
            TokenKind::Semicolon => return None,
            TokenKind::OpenParen => {
                // `use ($a, $b)` clause; skip it whole.
                i = stream.matching(next)? + 1;
            }
            _ => i = next + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn var_pos(stream: &TokenStream, name: &str) -> usize {
        stream
            .iter()
            .find(|(_, t)| t.kind == TokenKind::Variable && t.text == name)
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn test_global_scope() {
        let ts = tokenize("<?php $a = 1;").unwrap();
        let scopes = ScopeResolver::new(&ts);
        assert_eq!(scopes.scope_of(var_pos(&ts, "$a")), ScopeId::Global);
    }

    #[test]
    fn test_function_scope() {
        let ts = tokenize("<?php $a = 1; function f() { $b = 2; }").unwrap();
        let scopes = ScopeResolver::new(&ts);
        assert_eq!(scopes.scope_of(var_pos(&ts, "$a")), ScopeId::Global);
        assert!(matches!(
            scopes.scope_of(var_pos(&ts, "$b")),
            ScopeId::Function(_)
        ));
    }

    #[test]
    fn test_nested_closure_is_innermost() {
        let ts =
            tokenize("<?php function f() { $a = 1; $g = function () { $b = 2; }; }").unwrap();
        let scopes = ScopeResolver::new(&ts);
        let outer = scopes.scope_of(var_pos(&ts, "$a"));
        let inner = scopes.scope_of(var_pos(&ts, "$b"));
        assert!(matches!(outer, ScopeId::Function(_)));
        assert!(matches!(inner, ScopeId::Function(_)));
        assert_ne!(outer, inner);
    }

    #[test]
    fn test_closure_with_use_clause() {
        let ts = tokenize("<?php $g = function () use ($x) { $b = 2; };").unwrap();
        let scopes = ScopeResolver::new(&ts);
        assert!(matches!(
            scopes.scope_of(var_pos(&ts, "$b")),
            ScopeId::Function(_)
        ));
        // The use-clause variable itself is outside the body.
        assert_eq!(scopes.scope_of(var_pos(&ts, "$x")), ScopeId::Global);
    }
}
