//! Compact PHP lexer
//!
//! Produces the positional token stream the analysis core consumes. This is
//! deliberately a subset lexer: it covers the constructs the taint analysis
//! navigates (variables, strings and interpolation, casts, call syntax,
//! assignment operators, comments for suppression checks) and lexes anything
//! else as a generic operator or keyword token. It never tries to validate
//! the program; unrecognized bytes degrade to single-character tokens.

use crate::tokens::{AssignOp, CastKind, Keyword, Token, TokenKind, TokenStream};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LexError {
    #[error("unterminated string starting on line {line}")]
    UnterminatedString { line: u32 },
    #[error("unterminated heredoc starting on line {line}")]
    UnterminatedHeredoc { line: u32 },
    #[error("unterminated block comment starting on line {line}")]
    UnterminatedComment { line: u32 },
}

/// Tokenize PHP source. Sources without any `<?php` / `<?=` open tag are
/// treated as bare PHP code, which keeps small snippets analyzable.
pub fn tokenize(source: &str) -> Result<TokenStream, LexError> {
    let mut lexer = Lexer::new(source);
    lexer.run()?;
    Ok(TokenStream::new(lexer.tokens))
}

struct Lexer<'a> {
    src: &'a [u8],
    text: &'a str,
    pos: usize,
    line: u32,
    level: u32,
    in_php: bool,
    tokens: Vec<Token>,
}

const CAST_NAMES: &[(&str, CastKind)] = &[
    ("int", CastKind::Int),
    ("integer", CastKind::Int),
    ("bool", CastKind::Bool),
    ("boolean", CastKind::Bool),
    ("float", CastKind::Float),
    ("double", CastKind::Float),
    ("real", CastKind::Float),
    ("string", CastKind::Str),
    ("binary", CastKind::Str),
    ("array", CastKind::Array),
    ("object", CastKind::Object),
    ("unset", CastKind::Unset),
];

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        // Bare snippets without an open tag start in PHP mode directly.
        let in_php = !text.contains("<?");
        Self {
            src: text.as_bytes(),
            text,
            pos: 0,
            line: 1,
            level: 0,
            in_php,
            tokens: Vec::new(),
        }
    }

    fn run(&mut self) -> Result<(), LexError> {
        while self.pos < self.src.len() {
            if self.in_php {
                self.lex_php_token()?;
            } else {
                self.lex_inline_html();
            }
        }
        Ok(())
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        let text = self.text[start..self.pos].to_string();
        let line = self.line;
        self.line += text.bytes().filter(|&b| b == b'\n').count() as u32;
        self.tokens.push(Token {
            kind,
            text,
            line,
            level: self.level,
        });
    }

    fn peek(&self, offset: usize) -> u8 {
        *self.src.get(self.pos + offset).unwrap_or(&0)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.text[self.pos..].starts_with(s)
    }

    fn lex_inline_html(&mut self) {
        let start = self.pos;
        while self.pos < self.src.len() && !self.starts_with("<?") {
            self.pos += 1;
        }
        if self.pos > start {
            self.push(TokenKind::InlineHtml, start);
        }
        if self.starts_with("<?=") {
            self.pos += 3;
            self.push(TokenKind::OpenTagEcho, self.pos - 3);
            self.in_php = true;
        } else if self.starts_with("<?php") {
            self.pos += 5;
            self.push(TokenKind::OpenTag, self.pos - 5);
            self.in_php = true;
        } else if self.starts_with("<?") {
            self.pos += 2;
            self.push(TokenKind::OpenTag, self.pos - 2);
            self.in_php = true;
        }
    }

    fn lex_php_token(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        let c = self.peek(0);

        // Whitespace
        if c.is_ascii_whitespace() {
            while self.pos < self.src.len() && self.peek(0).is_ascii_whitespace() {
                self.pos += 1;
            }
            self.push(TokenKind::Whitespace, start);
            return Ok(());
        }

        // Close tag
        if self.starts_with("?>") {
            self.pos += 2;
            self.push(TokenKind::CloseTag, start);
            self.in_php = false;
            return Ok(());
        }

        // Comments
        if self.starts_with("//") || c == b'#' {
            while self.pos < self.src.len() && self.peek(0) != b'\n' && !self.starts_with("?>") {
                self.pos += 1;
            }
            self.push(TokenKind::Comment, start);
            return Ok(());
        }
        if self.starts_with("/*") {
            self.pos += 2;
            while self.pos < self.src.len() && !self.starts_with("*/") {
                self.pos += 1;
            }
            if self.pos >= self.src.len() {
                return Err(LexError::UnterminatedComment { line: self.line });
            }
            self.pos += 2;
            self.push(TokenKind::Comment, start);
            return Ok(());
        }

        // Variables
        if c == b'$' && (self.peek(1).is_ascii_alphabetic() || self.peek(1) == b'_') {
            self.pos += 1;
            while self.peek(0).is_ascii_alphanumeric() || self.peek(0) == b'_' {
                self.pos += 1;
            }
            self.push(TokenKind::Variable, start);
            return Ok(());
        }

        // Strings
        if c == b'\'' {
            self.lex_quoted(b'\'')?;
            self.push(TokenKind::ConstString, start);
            return Ok(());
        }
        if c == b'"' {
            self.lex_quoted(b'"')?;
            self.push(TokenKind::InterpString, start);
            return Ok(());
        }
        if self.starts_with("<<<") {
            return self.lex_heredoc(start);
        }

        // Numbers
        if c.is_ascii_digit() {
            while self.peek(0).is_ascii_alphanumeric()
                || self.peek(0) == b'.'
                || self.peek(0) == b'_'
            {
                self.pos += 1;
            }
            self.push(TokenKind::Number, start);
            return Ok(());
        }

        // Identifiers and keywords
        if c.is_ascii_alphabetic() || c == b'_' {
            while self.peek(0).is_ascii_alphanumeric() || self.peek(0) == b'_' {
                self.pos += 1;
            }
            let word = &self.text[start..self.pos];
            self.push(classify_word(word), start);
            return Ok(());
        }

        // Cast: `(` whitespace* type-name whitespace* `)`
        if c == b'(' {
            if let Some((kind, end)) = self.try_cast() {
                self.pos = end;
                self.push(TokenKind::Cast(kind), start);
                return Ok(());
            }
        }

        // Brackets, tracking curly nesting depth
        match c {
            b'(' => {
                self.pos += 1;
                self.push(TokenKind::OpenParen, start);
                return Ok(());
            }
            b')' => {
                self.pos += 1;
                self.push(TokenKind::CloseParen, start);
                return Ok(());
            }
            b'[' => {
                self.pos += 1;
                self.push(TokenKind::OpenBracket, start);
                return Ok(());
            }
            b']' => {
                self.pos += 1;
                self.push(TokenKind::CloseBracket, start);
                return Ok(());
            }
            b'{' => {
                self.pos += 1;
                self.push(TokenKind::OpenCurly, start);
                self.level += 1;
                return Ok(());
            }
            b'}' => {
                self.pos += 1;
                self.level = self.level.saturating_sub(1);
                self.push(TokenKind::CloseCurly, start);
                return Ok(());
            }
            b',' => {
                self.pos += 1;
                self.push(TokenKind::Comma, start);
                return Ok(());
            }
            b';' => {
                self.pos += 1;
                self.push(TokenKind::Semicolon, start);
                return Ok(());
            }
            _ => {}
        }

        // Multi-character operators, longest first
        const OPS: &[(&str, OpClass)] = &[
            ("<=>", OpClass::Other),
            ("===", OpClass::Other),
            ("!==", OpClass::Other),
            ("**=", OpClass::AssignOther),
            ("<<=", OpClass::AssignOther),
            (">>=", OpClass::AssignOther),
            ("??=", OpClass::AssignOther),
            ("==", OpClass::Other),
            ("!=", OpClass::Other),
            ("<>", OpClass::Other),
            ("<=", OpClass::Other),
            (">=", OpClass::Other),
            ("->", OpClass::ObjectOp),
            ("=>", OpClass::DoubleArrow),
            ("::", OpClass::DoubleColon),
            ("++", OpClass::Other),
            ("--", OpClass::Other),
            ("+=", OpClass::AssignOther),
            ("-=", OpClass::AssignOther),
            ("*=", OpClass::AssignOther),
            ("/=", OpClass::AssignOther),
            ("%=", OpClass::AssignOther),
            ("&=", OpClass::AssignOther),
            ("|=", OpClass::AssignOther),
            ("^=", OpClass::AssignOther),
            (".=", OpClass::AssignConcat),
            ("&&", OpClass::Other),
            ("||", OpClass::Other),
            ("**", OpClass::Other),
            ("<<", OpClass::Other),
            (">>", OpClass::Other),
            ("??", OpClass::Other),
        ];
        for (op, class) in OPS {
            if self.starts_with(op) {
                self.pos += op.len();
                self.push(class.kind(), start);
                return Ok(());
            }
        }

        // Single-character operators
        self.pos += 1;
        let kind = match c {
            b'=' => TokenKind::Assign(AssignOp::Eq),
            b'.' => TokenKind::Concat,
            b'?' => TokenKind::Question,
            b':' => TokenKind::Colon,
            b'!' => TokenKind::BooleanNot,
            _ => TokenKind::Operator,
        };
        self.push(kind, start);
        Ok(())
    }

    fn lex_quoted(&mut self, quote: u8) -> Result<(), LexError> {
        let line = self.line;
        self.pos += 1;
        while self.pos < self.src.len() {
            match self.peek(0) {
                b'\\' => self.pos += 2,
                b if b == quote => {
                    self.pos += 1;
                    return Ok(());
                }
                _ => self.pos += 1,
            }
        }
        Err(LexError::UnterminatedString { line })
    }

    fn lex_heredoc(&mut self, start: usize) -> Result<(), LexError> {
        let line = self.line;
        self.pos += 3;
        // Optional nowdoc/heredoc quoting around the label.
        let nowdoc = self.peek(0) == b'\'';
        if self.peek(0) == b'\'' || self.peek(0) == b'"' {
            self.pos += 1;
        }
        let label_start = self.pos;
        while self.peek(0).is_ascii_alphanumeric() || self.peek(0) == b'_' {
            self.pos += 1;
        }
        let label = self.text[label_start..self.pos].to_string();
        if self.peek(0) == b'\'' || self.peek(0) == b'"' {
            self.pos += 1;
        }
        if label.is_empty() {
            // Not actually a heredoc; treat `<<<` as an operator.
            self.push(TokenKind::Operator, start);
            return Ok(());
        }
        // Scan line by line for the closing label.
        while self.pos < self.src.len() {
            // Advance to the start of the next line.
            while self.pos < self.src.len() && self.peek(0) != b'\n' {
                self.pos += 1;
            }
            if self.pos >= self.src.len() {
                return Err(LexError::UnterminatedHeredoc { line });
            }
            self.pos += 1;
            let line_start = self.pos;
            let mut p = line_start;
            while p < self.src.len() && (self.src[p] == b' ' || self.src[p] == b'\t') {
                p += 1;
            }
            if self.text[p..].starts_with(&label) {
                let after = p + label.len();
                let next = *self.src.get(after).unwrap_or(&0);
                if !next.is_ascii_alphanumeric() && next != b'_' {
                    self.pos = after;
                    let kind = if nowdoc {
                        TokenKind::ConstString
                    } else {
                        TokenKind::Heredoc
                    };
                    self.push(kind, start);
                    return Ok(());
                }
            }
        }
        Err(LexError::UnterminatedHeredoc { line })
    }

    /// Recognize `(int)`-style casts. Returns the cast kind and the byte
    /// position just past the closing paren.
    fn try_cast(&self) -> Option<(CastKind, usize)> {
        let mut p = self.pos + 1;
        while p < self.src.len() && (self.src[p] == b' ' || self.src[p] == b'\t') {
            p += 1;
        }
        let word_start = p;
        while p < self.src.len() && self.src[p].is_ascii_alphabetic() {
            p += 1;
        }
        let word = self.text[word_start..p].to_ascii_lowercase();
        while p < self.src.len() && (self.src[p] == b' ' || self.src[p] == b'\t') {
            p += 1;
        }
        if *self.src.get(p)? != b')' {
            return None;
        }
        let kind = CAST_NAMES
            .iter()
            .find(|(name, _)| *name == word)
            .map(|(_, k)| *k)?;
        Some((kind, p + 1))
    }
}

enum OpClass {
    Other,
    AssignOther,
    AssignConcat,
    ObjectOp,
    DoubleArrow,
    DoubleColon,
}

impl OpClass {
    fn kind(&self) -> TokenKind {
        match self {
            OpClass::Other => TokenKind::Operator,
            OpClass::AssignOther => TokenKind::Assign(AssignOp::Other),
            OpClass::AssignConcat => TokenKind::Assign(AssignOp::ConcatEq),
            OpClass::ObjectOp => TokenKind::ObjectOp,
            OpClass::DoubleArrow => TokenKind::DoubleArrow,
            OpClass::DoubleColon => TokenKind::DoubleColon,
        }
    }
}

fn classify_word(word: &str) -> TokenKind {
    let kw = match word.to_ascii_lowercase().as_str() {
        "echo" => Keyword::Echo,
        "print" => Keyword::Print,
        "exit" | "die" => Keyword::Exit,
        "foreach" => Keyword::Foreach,
        "as" => Keyword::As,
        "function" => Keyword::Function,
        "fn" => Keyword::Fn,
        "use" => Keyword::Use,
        "return" => Keyword::Return,
        "if" => Keyword::If,
        "elseif" => Keyword::Elseif,
        "else" => Keyword::Else,
        "while" => Keyword::While,
        "for" => Keyword::For,
        "global" => Keyword::Global,
        "static" => Keyword::Static,
        "new" => Keyword::New,
        "class" => Keyword::Class,
        "do" | "switch" | "case" | "break" | "continue" | "try" | "catch" | "finally"
        | "throw" | "namespace" | "extends" | "implements" | "public" | "protected"
        | "private" | "abstract" | "interface" | "trait" | "const" | "instanceof" => {
            Keyword::Other
        }
        _ => return TokenKind::Ident,
    };
    TokenKind::Keyword(kw)
}
