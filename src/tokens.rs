//! Token model and stream navigation
//!
//! The analysis core never re-scans source text: it navigates an owned,
//! immutable `Vec<Token>` by position, through the bounds-checked helpers
//! on [`TokenStream`]. Bracket pairing is resolved once at construction;
//! all forward scans are statement-local (they stop at `;` or a close tag)
//! unless an explicit end bound is supplied.

use regex::Regex;
use std::sync::OnceLock;

/// Cast kinds. Only int and bool casts participate in the safety
/// analysis; the rest are tokenized for faithful navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Int,
    Bool,
    Float,
    Str,
    Array,
    Object,
    Unset,
}

/// Assignment operator shape. Concat-assign is tracked separately because
/// `$s .= $safe` never re-sanitizes `$s` (it combines with prior content).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Eq,
    ConcatEq,
    Other,
}

/// Keywords the driver and evaluator care about. Anything else
/// lexes as `Keyword(Other)` or a plain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Echo,
    Print,
    Exit,
    Foreach,
    As,
    Function,
    Fn,
    Use,
    Return,
    If,
    Elseif,
    Else,
    While,
    For,
    Global,
    Static,
    New,
    Class,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `$name`
    Variable,
    /// Bare name: function calls, constants, `true`/`null`, method names
    Ident,
    /// Single-quoted string or nowdoc; cannot interpolate
    ConstString,
    /// Double-quoted string; may interpolate variables
    InterpString,
    /// Heredoc body; may interpolate variables
    Heredoc,
    Number,
    Cast(CastKind),
    Assign(AssignOp),
    /// `->`
    ObjectOp,
    /// `::`
    DoubleColon,
    /// `=>`
    DoubleArrow,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    OpenCurly,
    CloseCurly,
    Comma,
    Semicolon,
    /// `?` (ternary)
    Question,
    /// `:` (ternary else)
    Colon,
    /// `.` concatenation
    Concat,
    /// `!`
    BooleanNot,
    /// Any other operator or punctuation
    Operator,
    Keyword(Keyword),
    Comment,
    Whitespace,
    /// `<?php`
    OpenTag,
    /// `<?=`, an implicit echo
    OpenTagEcho,
    /// `?>`
    CloseTag,
    InlineHtml,
}

impl TokenKind {
    /// Whitespace and comments are "empty" for navigation purposes.
    pub fn is_empty(&self) -> bool {
        matches!(self, TokenKind::Whitespace | TokenKind::Comment)
    }

    /// Tokens that terminate a statement-local forward scan.
    pub fn ends_statement(&self) -> bool {
        matches!(self, TokenKind::Semicolon | TokenKind::CloseTag)
    }
}

/// An immutable token produced by the lexer.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw source text, including delimiters for string tokens.
    pub text: String,
    /// 1-based source line.
    pub line: u32,
    /// Curly-brace nesting depth at this token. Top-level code is 0,
    /// a function body is 1, a conditional inside it is 2, and so on.
    pub level: u32,
}

/// An argument sub-range of a function call, as returned by
/// [`TokenStream::call_parameters`].
#[derive(Debug, Clone)]
pub struct Param {
    /// First non-empty token of the argument.
    pub start: usize,
    /// Last non-empty token of the argument (inclusive).
    pub end: usize,
    /// Normalized text rendering: comments dropped, whitespace collapsed.
    pub clean: String,
}

/// Ordered, 0-indexed token sequence with pre-resolved bracket pairing.
#[derive(Debug)]
pub struct TokenStream {
    tokens: Vec<Token>,
    /// For each bracket/paren/curly token, the position of its counterpart.
    matching: Vec<Option<usize>>,
}

impl TokenStream {
    pub fn new(tokens: Vec<Token>) -> Self {
        let matching = pair_brackets(&tokens);
        Self { tokens, matching }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn kind(&self, pos: usize) -> Option<TokenKind> {
        self.tokens.get(pos).map(|t| t.kind)
    }

    pub fn text(&self, pos: usize) -> Option<&str> {
        self.tokens.get(pos).map(|t| t.text.as_str())
    }

    pub fn line(&self, pos: usize) -> u32 {
        self.tokens.get(pos).map(|t| t.line).unwrap_or(0)
    }

    pub fn level(&self, pos: usize) -> u32 {
        self.tokens.get(pos).map(|t| t.level).unwrap_or(0)
    }

    /// Matching counterpart for a bracket/paren/curly token, if balanced.
    pub fn matching(&self, pos: usize) -> Option<usize> {
        self.matching.get(pos).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Token)> {
        self.tokens.iter().enumerate()
    }

    /// Next non-empty token at or after `pos`.
    pub fn next_non_empty(&self, pos: usize) -> Option<usize> {
        (pos..self.tokens.len()).find(|&i| !self.tokens[i].kind.is_empty())
    }

    /// Previous non-empty token at or before `pos`.
    pub fn prev_non_empty(&self, pos: usize) -> Option<usize> {
        if pos >= self.tokens.len() {
            return None;
        }
        (0..=pos).rev().find(|&i| !self.tokens[i].kind.is_empty())
    }

    /// Find the next token matching `pred` in `[from, end)`, statement-local:
    /// the scan also stops at `;` or a close tag. `end` is exclusive; `None`
    /// means "until the end of the statement".
    pub fn find_next<F>(&self, from: usize, end: Option<usize>, pred: F) -> Option<usize>
    where
        F: Fn(TokenKind) -> bool,
    {
        let limit = end.unwrap_or(self.tokens.len()).min(self.tokens.len());
        for i in from..limit {
            let kind = self.tokens[i].kind;
            if pred(kind) {
                return Some(i);
            }
            if kind.ends_statement() {
                return None;
            }
        }
        None
    }

    /// Position of the token that ends the statement containing `from`:
    /// the terminating `;` (or close tag), a `,` at the current paren depth,
    /// or the closing bracket of the enclosing group. Falls back to the last
    /// token when the statement is unterminated.
    pub fn end_of_statement(&self, from: usize) -> usize {
        let mut depth: i32 = 0;
        let mut i = from;
        while i < self.tokens.len() {
            match self.tokens[i].kind {
                TokenKind::OpenParen | TokenKind::OpenBracket | TokenKind::OpenCurly => depth += 1,
                TokenKind::CloseParen | TokenKind::CloseBracket | TokenKind::CloseCurly => {
                    if depth == 0 {
                        // Enclosing group closes; the statement ended just before.
                        return i.saturating_sub(1).max(from);
                    }
                    depth -= 1;
                }
                TokenKind::Semicolon | TokenKind::CloseTag => {
                    if depth == 0 {
                        return i;
                    }
                }
                TokenKind::Comma => {
                    if depth == 0 {
                        return i.saturating_sub(1).max(from);
                    }
                }
                _ => {}
            }
            i += 1;
        }
        self.tokens.len().saturating_sub(1)
    }

    /// Normalized rendering of `[start, end]`: comments dropped, whitespace
    /// runs collapsed to a single space, trimmed.
    pub fn clean_text(&self, start: usize, end: usize) -> String {
        let mut out = String::new();
        let end = end.min(self.tokens.len().saturating_sub(1));
        for i in start..=end {
            match self.tokens[i].kind {
                TokenKind::Comment => {}
                TokenKind::Whitespace => {
                    if !out.is_empty() && !out.ends_with(' ') {
                        out.push(' ');
                    }
                }
                _ => out.push_str(&self.tokens[i].text),
            }
        }
        out.trim().to_string()
    }

    /// Ordered argument sub-ranges of the call whose name token is at
    /// `ident_pos`. Returns `None` when no argument list can be found
    /// (malformed, or not a call at all).
    pub fn call_parameters(&self, ident_pos: usize) -> Option<Vec<Param>> {
        let open = self.next_non_empty(ident_pos + 1)?;
        if self.kind(open) != Some(TokenKind::OpenParen) {
            return None;
        }
        let close = self.matching(open)?;

        let mut params = Vec::new();
        let mut depth: i32 = 0;
        let mut chunk_start = open + 1;
        let mut i = open + 1;
        while i <= close {
            match self.tokens[i].kind {
                TokenKind::OpenParen | TokenKind::OpenBracket | TokenKind::OpenCurly => depth += 1,
                TokenKind::CloseParen | TokenKind::CloseBracket | TokenKind::CloseCurly
                    if i < close =>
                {
                    depth -= 1
                }
                _ => {}
            }
            let splits_here = (self.tokens[i].kind == TokenKind::Comma && depth == 0) || i == close;
            if splits_here {
                if let Some(start) = self.next_non_empty(chunk_start) {
                    if start < i {
                        if let Some(end) = self.prev_non_empty(i - 1) {
                            if end >= start {
                                params.push(Param {
                                    start,
                                    end,
                                    clean: self.clean_text(start, end),
                                });
                            }
                        }
                    }
                }
                chunk_start = i + 1;
            }
            i += 1;
        }
        Some(params)
    }

    /// Position just after the argument list of the call at `ident_pos`.
    pub fn end_of_call(&self, ident_pos: usize) -> Option<usize> {
        let open = self.next_non_empty(ident_pos + 1)?;
        if self.kind(open) != Some(TokenKind::OpenParen) {
            return None;
        }
        let close = self.matching(open)?;
        Some(close + 1)
    }

    /// Render the complex variable starting at `pos` as a normalized path
    /// string (`$row['id']`, `$obj->prop`), together with the position of
    /// the last token belonging to it. A trailing method call is not part
    /// of the variable (`$wpdb->prepare(` stops at `$wpdb`).
    pub fn variable_path(&self, pos: usize) -> Option<(String, usize)> {
        if self.kind(pos) != Some(TokenKind::Variable) {
            return None;
        }
        let mut out = self.tokens[pos].text.clone();
        let mut last = pos;
        let mut i = pos + 1;
        let mut limit = 200;

        while limit > 0 {
            limit -= 1;
            let next = match self.next_non_empty(i) {
                Some(n) => n,
                None => break,
            };
            match self.tokens[next].kind {
                TokenKind::OpenBracket => {
                    // Everything between the brackets is part of the path.
                    let close = match self.matching(next) {
                        Some(c) => c,
                        None => break, // unbalanced; stop here
                    };
                    for j in next..=close {
                        if !self.tokens[j].kind.is_empty() {
                            out.push_str(&self.tokens[j].text);
                        }
                    }
                    last = close;
                    i = close + 1;
                }
                TokenKind::ObjectOp | TokenKind::DoubleColon => {
                    let member = match self.next_non_empty(next + 1) {
                        Some(m) => m,
                        None => break,
                    };
                    match self.tokens[member].kind {
                        TokenKind::Ident => {
                            let ahead = self.next_non_empty(member + 1);
                            if ahead.map(|a| self.tokens[a].kind) == Some(TokenKind::OpenParen) {
                                // Method call; not part of the variable.
                                break;
                            }
                            out.push_str("->");
                            out.push_str(&self.tokens[member].text);
                            last = member;
                            i = member + 1;
                        }
                        TokenKind::Number => {
                            out.push('[');
                            out.push_str(&self.tokens[member].text);
                            out.push(']');
                            last = member;
                            i = member + 1;
                        }
                        _ => break,
                    }
                }
                _ => break,
            }
        }

        Some((out, last))
    }

    /// Interpolated variable names (`$var`, `{$obj->prop}`, `${name}`
    /// normalized to a leading `$`) inside a double-quoted string or
    /// heredoc token. Empty for any other token kind.
    pub fn interpolated_variables(&self, pos: usize) -> Vec<String> {
        match self.kind(pos) {
            Some(TokenKind::InterpString) | Some(TokenKind::Heredoc) => {
                extract_interpolated_variables(&self.tokens[pos].text)
            }
            _ => Vec::new(),
        }
    }
}

/// Variable references inside interpolated strings: `{$complex->expr}`,
/// `${name}`, and the simple `$name[idx]` / `$name->prop` syntax.
fn interp_var_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\{\$[^{}]+\}|\$\{[A-Za-z_]\w*\}|\$[A-Za-z_]\w*(?:->[A-Za-z_]\w*|\[[^\]\[]*\])*",
        )
        .expect("valid regex")
    })
}

fn extract_interpolated_variables(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for m in interp_var_regex().find_iter(text) {
        // Normalize variations like {$foo} and ${foo} to $foo.
        let var = format!("${}", m.as_str().trim_matches(['$', '{', '}']));
        out.push(var);
    }
    out
}

fn pair_brackets(tokens: &[Token]) -> Vec<Option<usize>> {
    let mut matching = vec![None; tokens.len()];
    let mut parens = Vec::new();
    let mut brackets = Vec::new();
    let mut curlies = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        match tok.kind {
            TokenKind::OpenParen => parens.push(i),
            TokenKind::OpenBracket => brackets.push(i),
            TokenKind::OpenCurly => curlies.push(i),
            TokenKind::CloseParen => {
                if let Some(open) = parens.pop() {
                    matching[open] = Some(i);
                    matching[i] = Some(open);
                }
            }
            TokenKind::CloseBracket => {
                if let Some(open) = brackets.pop() {
                    matching[open] = Some(i);
                    matching[i] = Some(open);
                }
            }
            TokenKind::CloseCurly => {
                if let Some(open) = curlies.pop() {
                    matching[open] = Some(i);
                    matching[i] = Some(open);
                }
            }
            _ => {}
        }
    }
    matching
}
