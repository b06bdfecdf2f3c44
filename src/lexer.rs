//! Tokenizer for the scene dialect.
//!
//! Byte-wise scanner with line/column tracking. Comments (`//` and `/* */`) are
//! skipped; everything else becomes a [`Token`] the parser consumes.

use crate::error::{VignetteError, VignetteResult};

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    // literals
    Num(f64),
    Str(String),
    Ident(String),

    // keywords
    Use,
    Export,
    Default,
    Const,
    Let,
    Function,
    Return,
    If,
    Else,
    True,
    False,
    Null,

    // punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,
    Question,

    // operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Assign,

    Eof,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

pub fn tokenize(source: &str) -> VignetteResult<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn run(mut self) -> VignetteResult<Vec<Token>> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia()?;
            let span = Span {
                line: self.line,
                col: self.col,
            };
            let Some(b) = self.peek() else {
                out.push(Token {
                    kind: TokenKind::Eof,
                    span,
                });
                return Ok(out);
            };

            let kind = match b {
                b'(' => self.single(TokenKind::LParen),
                b')' => self.single(TokenKind::RParen),
                b'{' => self.single(TokenKind::LBrace),
                b'}' => self.single(TokenKind::RBrace),
                b'[' => self.single(TokenKind::LBracket),
                b']' => self.single(TokenKind::RBracket),
                b',' => self.single(TokenKind::Comma),
                b';' => self.single(TokenKind::Semi),
                b':' => self.single(TokenKind::Colon),
                b'.' => self.single(TokenKind::Dot),
                b'?' => self.single(TokenKind::Question),
                b'+' => self.single(TokenKind::Plus),
                b'-' => self.single(TokenKind::Minus),
                b'*' => self.single(TokenKind::Star),
                b'/' => self.single(TokenKind::Slash),
                b'%' => self.single(TokenKind::Percent),
                b'!' => {
                    self.advance();
                    if self.peek() == Some(b'=') {
                        self.advance();
                        TokenKind::NotEq
                    } else {
                        TokenKind::Bang
                    }
                }
                b'<' => {
                    self.advance();
                    if self.peek() == Some(b'=') {
                        self.advance();
                        TokenKind::Le
                    } else {
                        TokenKind::Lt
                    }
                }
                b'>' => {
                    self.advance();
                    if self.peek() == Some(b'=') {
                        self.advance();
                        TokenKind::Ge
                    } else {
                        TokenKind::Gt
                    }
                }
                b'=' => {
                    self.advance();
                    if self.peek() == Some(b'=') {
                        self.advance();
                        TokenKind::EqEq
                    } else {
                        TokenKind::Assign
                    }
                }
                b'&' => {
                    self.advance();
                    if self.peek() == Some(b'&') {
                        self.advance();
                        TokenKind::AndAnd
                    } else {
                        return Err(self.err(span, "expected '&&'"));
                    }
                }
                b'|' => {
                    self.advance();
                    if self.peek() == Some(b'|') {
                        self.advance();
                        TokenKind::OrOr
                    } else {
                        return Err(self.err(span, "expected '||'"));
                    }
                }
                b'"' | b'\'' => self.string(span)?,
                b'0'..=b'9' => self.number(span)?,
                b if b.is_ascii_alphabetic() || b == b'_' => self.ident_or_keyword(),
                other => {
                    return Err(self.err(span, format!("unexpected character '{}'", other as char)));
                }
            };

            out.push(Token { kind, span });
        }
    }

    fn err(&self, span: Span, msg: impl Into<String>) -> VignetteError {
        VignetteError::validation(format!("{}:{}: {}", span.line, span.col, msg.into()))
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn skip_trivia(&mut self) -> VignetteResult<()> {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.advance();
                }
                Some(b'/') if self.peek2() == Some(b'/') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some(b'/') if self.peek2() == Some(b'*') => {
                    let span = Span {
                        line: self.line,
                        col: self.col,
                    };
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek() {
                            Some(b'*') if self.peek2() == Some(b'/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                self.advance();
                            }
                            None => return Err(self.err(span, "unterminated block comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn string(&mut self, span: Span) -> VignetteResult<TokenKind> {
        let quote = self.advance().unwrap_or(b'"');
        let mut bytes = Vec::new();
        loop {
            match self.advance() {
                None | Some(b'\n') => return Err(self.err(span, "unterminated string literal")),
                Some(b) if b == quote => {
                    let s = String::from_utf8(bytes)
                        .map_err(|_| self.err(span, "string literal is not valid utf-8"))?;
                    return Ok(TokenKind::Str(s));
                }
                Some(b'\\') => match self.advance() {
                    Some(b'n') => bytes.push(b'\n'),
                    Some(b't') => bytes.push(b'\t'),
                    Some(b'\\') => bytes.push(b'\\'),
                    Some(b'"') => bytes.push(b'"'),
                    Some(b'\'') => bytes.push(b'\''),
                    _ => return Err(self.err(span, "invalid escape sequence")),
                },
                Some(b) => bytes.push(b),
            }
        }
    }

    fn number(&mut self, span: Span) -> VignetteResult<TokenKind> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.advance();
        }
        if self.peek() == Some(b'.') && matches!(self.peek2(), Some(b'0'..=b'9')) {
            self.advance();
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let mark = self.pos;
            self.advance();
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.advance();
            }
            if matches!(self.peek(), Some(b'0'..=b'9')) {
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.advance();
                }
            } else {
                // not an exponent; back out to the bare number
                self.pos = mark;
            }
        }

        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| self.err(span, "number is not valid utf-8"))?;
        let v: f64 = text
            .parse()
            .map_err(|_| self.err(span, format!("invalid number literal '{text}'")))?;
        Ok(TokenKind::Num(v))
    }

    fn ident_or_keyword(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.advance();
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("");
        match text {
            "use" => TokenKind::Use,
            "export" => TokenKind::Export,
            "default" => TokenKind::Default,
            "const" => TokenKind::Const,
            "let" => TokenKind::Let,
            "function" => TokenKind::Function,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Ident(text.to_string()),
        }
    }
}
