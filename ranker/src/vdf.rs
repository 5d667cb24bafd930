//! Valve KeyValues ("VDF") text parser
//!
//! The game schema document (`items_game.txt`) is served in this format:
//! quoted or bare tokens, nested `{ }` blocks, `//` line comments and optional
//! `[$PLATFORM]` conditionals. Keys may repeat; lookups return the first match.

use crate::error::{Error, Result};
use std::iter::Peekable;
use std::str::Chars;

/// A parsed KeyValues node
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValues {
    Value(String),
    Block(Vec<(String, KeyValues)>),
}

impl KeyValues {
    /// First child with the given key
    pub fn get(&self, key: &str) -> Option<&KeyValues> {
        self.entries()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(KeyValues::as_str)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeyValues::Value(value) => Some(value),
            KeyValues::Block(_) => None,
        }
    }

    /// Children in document order; empty for a plain value
    pub fn entries(&self) -> &[(String, KeyValues)] {
        match self {
            KeyValues::Block(entries) => entries,
            KeyValues::Value(_) => &[],
        }
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Text(String),
    Open,
    Close,
    Eof,
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.trim_start_matches('\u{feff}').chars().peekable(),
            line: 1,
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Document {
            line: self.line,
            message: message.into(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    if lookahead.peek() != Some(&'/') {
                        return;
                    }
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('[') => {
                    // conditional suffix, e.g. [$WIN32]
                    while let Some(c) = self.bump() {
                        if c == ']' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia();
        match self.chars.peek().copied() {
            None => Ok(Token::Eof),
            Some('{') => {
                self.bump();
                Ok(Token::Open)
            }
            Some('}') => {
                self.bump();
                Ok(Token::Close)
            }
            Some('"') => {
                self.bump();
                self.quoted()
            }
            Some(_) => Ok(self.bare()),
        }
    }

    fn quoted(&mut self) -> Result<Token> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('"') => return Ok(Token::Text(out)),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn bare(&mut self) -> Token {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || c == '{' || c == '}' || c == '"' {
                break;
            }
            out.push(c);
            self.bump();
        }
        Token::Text(out)
    }
}

/// Parses a KeyValues document into its root block
pub fn parse(text: &str) -> Result<KeyValues> {
    let mut lexer = Lexer::new(text);
    parse_block(&mut lexer, false)
}

fn parse_block(lexer: &mut Lexer<'_>, nested: bool) -> Result<KeyValues> {
    let mut entries = Vec::new();
    loop {
        match lexer.next_token()? {
            Token::Eof if nested => return Err(lexer.error("unexpected end of document")),
            Token::Eof => return Ok(KeyValues::Block(entries)),
            Token::Close if nested => return Ok(KeyValues::Block(entries)),
            Token::Close => return Err(lexer.error("unbalanced '}'")),
            Token::Open => return Err(lexer.error("block without a key")),
            Token::Text(key) => {
                let value = match lexer.next_token()? {
                    Token::Text(value) => KeyValues::Value(value),
                    Token::Open => parse_block(lexer, true)?,
                    Token::Close | Token::Eof => {
                        return Err(lexer.error(format!("key '{}' has no value", key)))
                    }
                };
                entries.push((key, value));
            }
        }
    }
}
