//! Cypher lexer: query text → tokens.
//!
//! Whitespace and `//`/`/* */` comments are skipped. Keywords are matched
//! case-insensitively; back-tick quoted names are always identifiers.

use crate::{Error, Result};

/// A token and the source text it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// Unescaped text: string contents, identifier or parameter name.
    pub text: String,
}

/// Byte range in the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    Match, Optional, Where, Return, With,
    Create, Merge, Delete, Detach, Set, Remove,
    Order, By, Skip, Limit, Asc, Desc, Distinct,
    And, Or, Not, Xor, Is, Null, True, False, In,
    As, On, Starts, Ends, Contains,

    // Literals
    Integer, Float, StringLiteral,

    Identifier, Parameter,

    // Punctuation
    LParen, RParen, LBracket, RBracket, LBrace, RBrace,
    Dot, Comma, Colon, Semicolon, Pipe, Star,
    Arrow,      // ->
    LeftArrow,  // <-
    Dash,       // -

    // Operators
    Eq, Neq, Lt, Lte, Gt, Gte,
    Plus, Slash, Percent, Caret,
    PlusEq,     // +=

    Eof,
}

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("MATCH", TokenKind::Match),
    ("OPTIONAL", TokenKind::Optional),
    ("WHERE", TokenKind::Where),
    ("RETURN", TokenKind::Return),
    ("WITH", TokenKind::With),
    ("CREATE", TokenKind::Create),
    ("MERGE", TokenKind::Merge),
    ("DELETE", TokenKind::Delete),
    ("DETACH", TokenKind::Detach),
    ("SET", TokenKind::Set),
    ("REMOVE", TokenKind::Remove),
    ("ORDER", TokenKind::Order),
    ("BY", TokenKind::By),
    ("SKIP", TokenKind::Skip),
    ("LIMIT", TokenKind::Limit),
    ("ASC", TokenKind::Asc),
    ("ASCENDING", TokenKind::Asc),
    ("DESC", TokenKind::Desc),
    ("DESCENDING", TokenKind::Desc),
    ("DISTINCT", TokenKind::Distinct),
    ("AND", TokenKind::And),
    ("OR", TokenKind::Or),
    ("NOT", TokenKind::Not),
    ("XOR", TokenKind::Xor),
    ("IS", TokenKind::Is),
    ("NULL", TokenKind::Null),
    ("TRUE", TokenKind::True),
    ("FALSE", TokenKind::False),
    ("IN", TokenKind::In),
    ("AS", TokenKind::As),
    ("ON", TokenKind::On),
    ("STARTS", TokenKind::Starts),
    ("ENDS", TokenKind::Ends),
    ("CONTAINS", TokenKind::Contains),
];

/// Two-character operators, tried before the single-character ones.
const DOUBLE: &[(&str, TokenKind)] = &[
    ("->", TokenKind::Arrow),
    ("<-", TokenKind::LeftArrow),
    ("<=", TokenKind::Lte),
    (">=", TokenKind::Gte),
    ("<>", TokenKind::Neq),
    ("!=", TokenKind::Neq),
    ("+=", TokenKind::PlusEq),
];

fn single(c: char) -> Option<TokenKind> {
    Some(match c {
        '(' => TokenKind::LParen,
        ')' => TokenKind::RParen,
        '[' => TokenKind::LBracket,
        ']' => TokenKind::RBracket,
        '{' => TokenKind::LBrace,
        '}' => TokenKind::RBrace,
        '.' => TokenKind::Dot,
        ',' => TokenKind::Comma,
        ':' => TokenKind::Colon,
        ';' => TokenKind::Semicolon,
        '|' => TokenKind::Pipe,
        '*' => TokenKind::Star,
        '-' => TokenKind::Dash,
        '=' => TokenKind::Eq,
        '<' => TokenKind::Lt,
        '>' => TokenKind::Gt,
        '+' => TokenKind::Plus,
        '/' => TokenKind::Slash,
        '%' => TokenKind::Percent,
        '^' => TokenKind::Caret,
        _ => return None,
    })
}

impl TokenKind {
    /// Keywords may still be used as property keys, map keys and labels.
    pub fn is_keyword(self) -> bool {
        KEYWORDS.iter().any(|&(_, kind)| kind == self)
    }
}

fn keyword(word: &str) -> Option<TokenKind> {
    KEYWORDS
        .iter()
        .find(|(kw, _)| kw.eq_ignore_ascii_case(word))
        .map(|&(_, kind)| kind)
}

fn syntax_error(position: usize, message: impl Into<String>) -> Error {
    Error::SyntaxError { position, message: message.into() }
}

/// Tokenize a Cypher query. The last token is always `Eof`.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer { input, pos: 0, tokens: Vec::new() };
    lexer.run()?;
    Ok(lexer.tokens)
}

struct Lexer<'a> {
    input: &'a str,
    /// Byte offset of the next unread character.
    pos: usize,
    tokens: Vec<Token>,
}

impl Lexer<'_> {
    fn rest(&self) -> &str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, start: usize, text: String) {
        self.tokens.push(Token { kind, span: Span { start, end: self.pos }, text });
    }

    fn run(&mut self) -> Result<()> {
        loop {
            self.skip_trivia()?;
            let start = self.pos;
            let Some(c) = self.peek() else { break };
            match c {
                '\'' | '"' => self.string(start, c)?,
                '`' => self.quoted_identifier(start)?,
                '$' => self.parameter(start)?,
                c if c.is_ascii_digit() => self.number(start),
                c if c.is_alphabetic() || c == '_' => self.word(start),
                _ => self.operator(start, c)?,
            }
        }
        self.push(TokenKind::Eof, self.input.len(), String::new());
        Ok(())
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            let rest = self.rest();
            if rest.starts_with("//") {
                let line = rest.find('\n').unwrap_or(rest.len());
                self.pos += line;
            } else if rest.starts_with("/*") {
                let close = rest[2..]
                    .find("*/")
                    .ok_or_else(|| syntax_error(self.pos, "Unterminated block comment"))?;
                self.pos += close + 4;
            } else if self.peek().is_some_and(char::is_whitespace) {
                self.bump();
            } else {
                return Ok(());
            }
        }
    }

    /// `'..'` or `".."` with backslash escapes.
    fn string(&mut self, start: usize, quote: char) -> Result<()> {
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(syntax_error(start, "Unterminated string literal")),
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some(c @ ('\\' | '\'' | '"')) => text.push(c),
                    Some(c) => {
                        text.push('\\');
                        text.push(c);
                    }
                    None => return Err(syntax_error(start, "Unterminated string literal")),
                },
                Some(c) => text.push(c),
            }
        }
        self.push(TokenKind::StringLiteral, start, text);
        Ok(())
    }

    /// `` `any name` `` with a doubled back-tick standing for one.
    fn quoted_identifier(&mut self, start: usize) -> Result<()> {
        self.bump();
        let mut name = String::new();
        loop {
            match self.bump() {
                None => return Err(syntax_error(start, "Unterminated quoted identifier")),
                Some('`') if self.peek() == Some('`') => {
                    self.bump();
                    name.push('`');
                }
                Some('`') => break,
                Some(c) => name.push(c),
            }
        }
        if name.is_empty() {
            return Err(syntax_error(start, "Empty quoted identifier"));
        }
        self.push(TokenKind::Identifier, start, name);
        Ok(())
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let from = self.pos;
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
        self.input[from..self.pos].to_string()
    }

    fn parameter(&mut self, start: usize) -> Result<()> {
        self.bump();
        let name = self.take_while(|c| c.is_alphanumeric() || c == '_');
        if name.is_empty() {
            return Err(syntax_error(start, "Expected parameter name after '$'"));
        }
        self.push(TokenKind::Parameter, start, name);
        Ok(())
    }

    /// Integer, or float when a `.` is followed by a digit (`1.5`, not `n.x`).
    fn number(&mut self, start: usize) {
        let mut text = self.take_while(|c| c.is_ascii_digit());
        let kind = if self.peek() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            text.push('.');
            text.push_str(&self.take_while(|c| c.is_ascii_digit()));
            TokenKind::Float
        } else {
            TokenKind::Integer
        };
        self.push(kind, start, text);
    }

    fn word(&mut self, start: usize) {
        let text = self.take_while(|c| c.is_alphanumeric() || c == '_');
        let kind = keyword(&text).unwrap_or(TokenKind::Identifier);
        self.push(kind, start, text);
    }

    fn operator(&mut self, start: usize, c: char) -> Result<()> {
        if let Some(&(text, kind)) = DOUBLE.iter().find(|(op, _)| self.rest().starts_with(op)) {
            self.pos += text.len();
            self.push(kind, start, text.to_string());
            return Ok(());
        }
        let kind = single(c).ok_or_else(|| syntax_error(start, format!("Unexpected character: '{c}'")))?;
        self.bump();
        self.push(kind, start, c.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(query: &str) -> Vec<TokenKind> {
        tokenize(query).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_node_pattern() {
        use TokenKind::*;
        assert_eq!(
            kinds("match (m:Movie) return m"),
            vec![Match, LParen, Identifier, Colon, Identifier, RParen, Return, Identifier, Eof]
        );
    }

    #[test]
    fn test_relationship_arrows() {
        use TokenKind::*;
        assert_eq!(
            kinds("(a)<-[:ACTED_IN]-(m)-->(x)"),
            vec![
                LParen, Identifier, RParen, LeftArrow, LBracket, Colon, Identifier, RBracket, Dash,
                LParen, Identifier, RParen, Dash, Arrow, LParen, Identifier, RParen, Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        use TokenKind::*;
        assert_eq!(kinds("<> != <= >= += < ="), vec![Neq, Neq, Lte, Gte, PlusEq, Lt, Eq, Eof]);
        assert!(matches!(tokenize("RETURN 1 ~ 2"), Err(Error::SyntaxError { position: 9, .. })));
    }

    #[test]
    fn test_string_literal_escapes() {
        let tokens = tokenize(r#"'it\'s "quoted"\n'"#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].text, "it's \"quoted\"\n");
    }

    #[test]
    fn test_parameter_span() {
        let tokens = tokenize("$title").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Parameter);
        assert_eq!(tokens[0].text, "title");
        assert_eq!(tokens[0].span, Span { start: 0, end: 6 });
    }

    #[test]
    fn test_quoted_identifier() {
        let tokens = tokenize("m.`release year` `odd``name`").unwrap();
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
        assert_eq!(tokens[2].text, "release year");
        assert_eq!(tokens[3].text, "odd`name");
        assert!(tokenize("``").is_err());
    }

    #[test]
    fn test_float_versus_property_access() {
        let tokens = tokenize("2.5 m.released 3.").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Float);
        assert_eq!(tokens[0].text, "2.5");
        assert_eq!(tokens[2].kind, TokenKind::Dot);
        assert_eq!(tokens[4].kind, TokenKind::Integer);
    }

    #[test]
    fn test_comments() {
        use TokenKind::*;
        assert_eq!(kinds("MATCH /* two\nlines */ (n) // tail\nRETURN n"), vec![
            Match, LParen, Identifier, RParen, Return, Identifier, Eof,
        ]);
    }

    #[test]
    fn test_unterminated_inputs() {
        assert!(tokenize("MATCH /* open").is_err());
        assert!(tokenize("RETURN 'open").is_err());
        assert!(tokenize("RETURN `open").is_err());
        assert!(tokenize("RETURN $").is_err());
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(keyword("Optional"), Some(TokenKind::Optional));
        assert_eq!(keyword("descending"), Some(TokenKind::Desc));
        assert_eq!(keyword("movie"), None);
        assert!(TokenKind::Contains.is_keyword());
        assert!(!TokenKind::Identifier.is_keyword());
    }
}
