//! Lexer for PL/0 sources.
//!
//! Lexing never fails. Characters outside the language are reported as
//! warnings and skipped, and the stream always ends with an `Eof` token.

use core::fmt;

use serde::Serialize;

use crate::diagnostic::Diagnostic;

/// Kind of a token produced by the lexer.
///
/// Keywords share one kind; the parser inspects `Token::text` to tell them
/// apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenKind {
    Keyword,
    Identifier,
    Number,
    Operator,   // + - * / = <> < <= > >=
    Comma,      // ,
    Semicolon,  // ;
    Equals,     // :=
    Parenthesis, // ( )
    End,        // .
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Keyword => "keyword",
            TokenKind::Identifier => "identifier",
            TokenKind::Number => "number",
            TokenKind::Operator => "operator",
            TokenKind::Comma => "comma",
            TokenKind::Semicolon => "semicolon",
            TokenKind::Equals => "':='",
            TokenKind::Parenthesis => "parenthesis",
            TokenKind::End => "'.'",
            TokenKind::Eof => "end of input",
        };
        f.write_str(name)
    }
}

/// The closed keyword set. Anything else identifier-shaped is an identifier.
pub const KEYWORDS: &[&str] = &[
    "const",
    "var",
    "procedure",
    "call",
    "begin",
    "end",
    "if",
    "then",
    "else",
    "endif",
    "while",
    "do",
    "endwhile",
    "for",
    "to",
    "endfor",
    "read",
    "write",
];

pub fn is_keyword(text: &str) -> bool {
    KEYWORDS.contains(&text)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize) -> Self {
        Token {
            kind,
            text: text.into(),
            line,
        }
    }

    pub fn is(&self, kind: TokenKind, text: &str) -> bool {
        self.kind == kind && self.text == text
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.is(TokenKind::Keyword, keyword)
    }
}

/// Result of lexing a source string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LexResult {
    pub tokens: Vec<Token>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Lex a source string into tokens plus warnings.
pub fn lex(source: &str) -> LexResult {
    let mut lexer = Lexer {
        chars: source.as_bytes(),
        index: 0,
        line: 1,
        diagnostics: Vec::new(),
    };
    lexer.run()
}

/// Lex a source string, keeping only the tokens.
pub fn tokenize(source: &str) -> Vec<Token> {
    lex(source).tokens
}

struct Lexer<'src> {
    chars: &'src [u8],
    index: usize,
    line: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    fn run(&mut self) -> LexResult {
        let mut tokens = Vec::new();

        while let Some(ch) = self.peek_char() {
            if ch == b'\n' {
                self.line += 1;
                self.consume_char();
                continue;
            }
            if ch.is_ascii_whitespace() {
                self.consume_char();
                continue;
            }
            if ch == b'/' && self.peek_next() == Some(b'/') {
                self.skip_comment();
                continue;
            }

            let token = match ch {
                b',' => self.single(TokenKind::Comma),
                b';' => self.single(TokenKind::Semicolon),
                b'.' => self.single(TokenKind::End),
                b'(' | b')' => self.single(TokenKind::Parenthesis),
                b'+' | b'-' | b'*' | b'/' | b'=' => self.single(TokenKind::Operator),
                b'<' => match self.peek_next() {
                    Some(b'=') | Some(b'>') => self.double(TokenKind::Operator),
                    _ => self.single(TokenKind::Operator),
                },
                b'>' => match self.peek_next() {
                    Some(b'=') => self.double(TokenKind::Operator),
                    _ => self.single(TokenKind::Operator),
                },
                b':' => {
                    if self.peek_next() == Some(b'=') {
                        self.double(TokenKind::Equals)
                    } else {
                        self.unexpected_char(ch)
                    }
                }
                b'0'..=b'9' => self.lex_number(),
                _ if ch.is_ascii_alphabetic() => self.lex_word(),
                _ => self.unexpected_char(ch),
            };

            if let Some(tok) = token {
                tokens.push(tok);
            }
        }

        tokens.push(Token::new(TokenKind::Eof, "", self.line));

        LexResult {
            tokens,
            diagnostics: core::mem::take(&mut self.diagnostics),
        }
    }

    fn single(&mut self, kind: TokenKind) -> Option<Token> {
        let start = self.index;
        self.consume_char();
        Some(self.token_from(kind, start))
    }

    fn double(&mut self, kind: TokenKind) -> Option<Token> {
        let start = self.index;
        self.consume_char();
        self.consume_char();
        Some(self.token_from(kind, start))
    }

    fn token_from(&self, kind: TokenKind, start: usize) -> Token {
        let text = String::from_utf8_lossy(&self.chars[start..self.index]);
        Token::new(kind, text, self.line)
    }

    fn unexpected_char(&mut self, ch: u8) -> Option<Token> {
        // Consume a whole UTF-8 sequence so the warning names the real character.
        let start = self.index;
        self.consume_char();
        if !ch.is_ascii() {
            while matches!(self.peek_char(), Some(b) if b & 0xC0 == 0x80) {
                self.consume_char();
            }
        }
        let text = String::from_utf8_lossy(&self.chars[start..self.index]);
        let diag = Diagnostic::warning(format!("unrecognized character '{text}'"), self.line)
            .with_code("W0001");
        if crate::log::is_verbose() {
            eprintln!("lexer: {diag}");
        }
        self.diagnostics.push(diag);
        None
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == b'\n' {
                break;
            }
            self.consume_char();
        }
    }

    fn lex_number(&mut self) -> Option<Token> {
        let start = self.index;
        while matches!(self.peek_char(), Some(b'0'..=b'9')) {
            self.consume_char();
        }
        Some(self.token_from(TokenKind::Number, start))
    }

    fn lex_word(&mut self) -> Option<Token> {
        let start = self.index;
        while matches!(self.peek_char(), Some(ch) if ch.is_ascii_alphanumeric()) {
            self.consume_char();
        }
        let mut token = self.token_from(TokenKind::Identifier, start);
        if is_keyword(&token.text) {
            token.kind = TokenKind::Keyword;
        }
        Some(token)
    }

    fn peek_char(&self) -> Option<u8> {
        self.chars.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.chars.get(self.index + 1).copied()
    }

    fn consume_char(&mut self) {
        if self.index < self.chars.len() {
            self.index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds_and_text(source: &str) -> Vec<(TokenKind, String)> {
        tokenize(source)
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn lexes_declaration_and_assignment() {
        use TokenKind::*;
        let tokens = kinds_and_text("var x; x := 1 + 2;");
        let expected = vec![
            (Keyword, "var"),
            (Identifier, "x"),
            (Semicolon, ";"),
            (Identifier, "x"),
            (Equals, ":="),
            (Number, "1"),
            (Operator, "+"),
            (Number, "2"),
            (Semicolon, ";"),
            (Eof, ""),
        ];
        let expected: Vec<_> = expected
            .into_iter()
            .map(|(k, t)| (k, t.to_string()))
            .collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn tracks_lines_across_newlines() {
        let tokens = tokenize("var x;\nx := 1;\n\nwrite x;");
        let lines: Vec<_> = tokens.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 1, 1, 2, 2, 2, 2, 4, 4, 4, 4]);
    }

    #[test]
    fn prefers_two_character_operators() {
        let tokens = kinds_and_text("a<=b >= c <> d < e > f");
        let ops: Vec<_> = tokens
            .into_iter()
            .filter(|(k, _)| *k == TokenKind::Operator)
            .map(|(_, t)| t)
            .collect();
        assert_eq!(ops, vec!["<=", ">=", "<>", "<", ">"]);
    }

    #[test]
    fn skips_comments_to_end_of_line() {
        let tokens = tokenize("x := 1; // x := 2;\ny := 3;");
        assert_eq!(tokens.len(), 9);
        assert_eq!(tokens[4].text, "y");
        assert_eq!(tokens[4].line, 2);
    }

    #[test]
    fn keeps_punctuation_distinct_from_operators() {
        use TokenKind::*;
        let kinds: Vec<_> = tokenize(", ; . ( )").into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![Comma, Semicolon, End, Parenthesis, Parenthesis, Eof]
        );
    }

    #[test]
    fn splits_words_and_numbers_by_maximal_munch() {
        let tokens = kinds_and_text("endwhile x1 12ab");
        assert_eq!(tokens[0], (TokenKind::Keyword, "endwhile".to_string()));
        assert_eq!(tokens[1], (TokenKind::Identifier, "x1".to_string()));
        assert_eq!(tokens[2], (TokenKind::Number, "12".to_string()));
        assert_eq!(tokens[3], (TokenKind::Identifier, "ab".to_string()));
    }

    #[test]
    fn reports_and_skips_unrecognized_characters() {
        let result = lex("x := 1 # 2;\ny : z;");
        assert_eq!(result.diagnostics.len(), 2);
        assert_eq!(result.diagnostics[0].line, 1);
        assert!(result.diagnostics[0].message.contains('#'));
        assert_eq!(result.diagnostics[1].line, 2);
        let texts: Vec<_> = result.tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["x", ":=", "1", "2", ";", "y", "z", ";", ""]);
    }

    #[test]
    fn always_ends_with_eof() {
        let tokens = tokenize("");
        assert_eq!(tokens, vec![Token::new(TokenKind::Eof, "", 1)]);
    }
}
