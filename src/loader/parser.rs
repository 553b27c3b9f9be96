//! loader::parser
//!
//! Parser for `.verify` files.
//!
//! # Grammar
//!
//! ```text
//! file       := statement*
//! statement  := "verify" ("." segment)+ ";"?
//! segment    := ident ( "(" (value ("," value)* ","?)? ")" )?
//! value      := string | integer | "true" | "false" | regex | object
//! string     := '"' … '"' | "'" … "'"        (escapes: \" \' \\ \n \t)
//! regex      := "/" … "/" [imsx]*
//! object     := "{" ((ident | string) ":" value ("," …)* ","?)? "}"
//! ```
//!
//! Whitespace and newlines are insignificant. `//` and `#` start a comment
//! that runs to the end of the line.

use std::collections::BTreeMap;
use std::fmt;

use crate::engine::{Arg, RegexArg};

/// One `verify.…` chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// 1-based line of the `verify` keyword.
    pub line: usize,
    pub column: usize,
    pub segments: Vec<Segment>,
}

/// `name` or `name(args…)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub name: String,
    /// `None` for property access, `Some` for a call (possibly empty).
    pub args: Option<Vec<Arg>>,
}

impl Segment {
    pub fn is_call(&self) -> bool {
        self.args.is_some()
    }
}

/// Syntax error with a 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parse a whole verify file.
pub fn parse(source: &str) -> ParseResult<Vec<Statement>> {
    let mut cursor = Cursor::new(source);
    let mut statements = Vec::new();

    loop {
        cursor.skip_trivia();
        if cursor.at_end() {
            return Ok(statements);
        }
        statements.push(cursor.statement()?);
    }
}

struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Cursor {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn error<T>(&self, message: impl Into<String>) -> ParseResult<T> {
        Err(ParseError {
            line: self.line,
            column: self.column,
            message: message.into(),
        })
    }

    fn describe_next(&self) -> String {
        match self.peek() {
            Some(ch) => format!("'{}'", ch),
            None => "end of file".to_string(),
        }
    }

    fn expect(&mut self, expected: char) -> ParseResult<()> {
        if self.peek() == Some(expected) {
            self.bump();
            return Ok(());
        }
        self.error(format!("expected '{}', found {}", expected, self.describe_next()))
    }

    /// Skip whitespace and comments.
    fn skip_trivia(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.bump();
            } else if ch == '#' || (ch == '/' && self.peek_at(1) == Some('/')) {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    fn identifier(&mut self) -> ParseResult<String> {
        match self.peek() {
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' || ch == '$' => {}
            _ => return self.error(format!("expected identifier, found {}", self.describe_next())),
        }
        let mut name = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                name.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        Ok(name)
    }

    fn statement(&mut self) -> ParseResult<Statement> {
        let (line, column) = (self.line, self.column);
        let keyword = self.identifier()?;
        if keyword != "verify" {
            return Err(ParseError {
                line,
                column,
                message: format!("statements must start with \"verify\", found \"{}\"", keyword),
            });
        }

        let mut segments = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek() != Some('.') {
                break;
            }
            self.bump();
            self.skip_trivia();
            let name = self.identifier()?;
            self.skip_trivia();
            let args = if self.peek() == Some('(') {
                Some(self.arguments()?)
            } else {
                None
            };
            segments.push(Segment { name, args });
        }

        if segments.is_empty() {
            return self.error("expected '.' after \"verify\"");
        }
        if self.peek() == Some(';') {
            self.bump();
        }
        Ok(Statement {
            line,
            column,
            segments,
        })
    }

    fn arguments(&mut self) -> ParseResult<Vec<Arg>> {
        self.expect('(')?;
        let mut args = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some(')') {
                self.bump();
                return Ok(args);
            }
            args.push(self.value()?);
            self.skip_trivia();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(')') => {}
                _ => {
                    return self.error(format!(
                        "expected ',' or ')', found {}",
                        self.describe_next()
                    ))
                }
            }
        }
    }

    fn value(&mut self) -> ParseResult<Arg> {
        match self.peek() {
            Some('"') | Some('\'') => Ok(Arg::Str(self.string()?)),
            Some('/') => self.regex(),
            Some('{') => self.object(),
            Some(ch) if ch == '-' || ch.is_ascii_digit() => self.integer(),
            Some(ch) if ch.is_ascii_alphabetic() => {
                let (line, column) = (self.line, self.column);
                match self.identifier()?.as_str() {
                    "true" => Ok(Arg::Bool(true)),
                    "false" => Ok(Arg::Bool(false)),
                    other => Err(ParseError {
                        line,
                        column,
                        message: format!("unexpected identifier \"{}\"", other),
                    }),
                }
            }
            _ => self.error(format!("expected a value, found {}", self.describe_next())),
        }
    }

    fn string(&mut self) -> ParseResult<String> {
        let quote = match self.bump() {
            Some(q) => q,
            None => return self.error("expected string"),
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return self.error("unterminated string literal"),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c @ ('"' | '\'' | '\\')) => out.push(c),
                    Some(c) => return self.error(format!("unknown escape sequence \\{}", c)),
                    None => return self.error("unterminated string literal"),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    fn integer(&mut self) -> ParseResult<Arg> {
        let (line, column) = (self.line, self.column);
        let mut digits = String::new();
        if self.peek() == Some('-') {
            digits.push('-');
            self.bump();
        }
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() || ch == '_' {
                if ch != '_' {
                    digits.push(ch);
                }
                self.bump();
            } else {
                break;
            }
        }
        digits.parse::<i64>().map(Arg::Int).map_err(|_| ParseError {
            line,
            column,
            message: format!("invalid integer \"{}\"", digits),
        })
    }

    fn regex(&mut self) -> ParseResult<Arg> {
        let (line, column) = (self.line, self.column);
        self.expect('/')?;
        let mut source = String::new();
        let mut in_class = false;
        loop {
            match self.bump() {
                None | Some('\n') => return self.error("unterminated regex literal"),
                Some('\\') => match self.bump() {
                    Some('/') => source.push('/'),
                    Some(c) => {
                        source.push('\\');
                        source.push(c);
                    }
                    None => return self.error("unterminated regex literal"),
                },
                Some('[') => {
                    in_class = true;
                    source.push('[');
                }
                Some(']') => {
                    in_class = false;
                    source.push(']');
                }
                Some('/') if !in_class => break,
                Some(c) => source.push(c),
            }
        }

        let mut flags = String::new();
        while let Some(ch) = self.peek() {
            if !ch.is_ascii_alphabetic() {
                break;
            }
            if !matches!(ch, 'i' | 'm' | 's' | 'x') {
                return self.error(format!("unsupported regex flag '{}'", ch));
            }
            if !flags.contains(ch) {
                flags.push(ch);
            }
            self.bump();
        }

        RegexArg::new(&source, &flags)
            .map(Arg::Regex)
            .map_err(|err| ParseError {
                line,
                column,
                message: format!("invalid regex /{}/: {}", source, err),
            })
    }

    fn object(&mut self) -> ParseResult<Arg> {
        self.expect('{')?;
        let mut map = BTreeMap::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some('}') {
                self.bump();
                return Ok(Arg::Options(map));
            }
            let key = match self.peek() {
                Some('"') | Some('\'') => self.string()?,
                _ => self.identifier()?,
            };
            self.skip_trivia();
            self.expect(':')?;
            self.skip_trivia();
            let value = self.value()?;
            map.insert(key, value);
            self.skip_trivia();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some('}') => {}
                _ => {
                    return self.error(format!(
                        "expected ',' or '}}', found {}",
                        self.describe_next()
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(statement: &Statement) -> Vec<&str> {
        statement.segments.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn parses_chains_and_comments() {
        let source = r#"
            // top comment
            verify.file("package.json").exists();
            # hash comment
            verify.git
                .branch('main')
                .isCurrent()
            verify.dir("dist").not.exists();
        "#;

        let statements = parse(source).unwrap();

        assert_eq!(statements.len(), 3);
        assert_eq!(names(&statements[0]), vec!["file", "exists"]);
        assert_eq!(statements[0].line, 3);
        assert_eq!(names(&statements[1]), vec!["git", "branch", "isCurrent"]);
        assert!(!statements[1].segments[0].is_call());
        assert_eq!(
            statements[1].segments[1].args,
            Some(vec![Arg::Str("main".into())])
        );
        assert_eq!(names(&statements[2]), vec!["dir", "not", "exists"]);
    }

    #[test]
    fn parses_values() {
        let statements =
            parse(r#"verify.x("a\"b\n", -42, true, /foo\/bar/i, { timeoutMs: 1_000, "env": { A: 'b' } });"#)
                .unwrap();
        let args = statements[0].segments[0].args.clone().unwrap();

        assert_eq!(args[0], Arg::Str("a\"b\n".into()));
        assert_eq!(args[1], Arg::Int(-42));
        assert_eq!(args[2], Arg::Bool(true));
        let re = args[3].as_regex().unwrap();
        assert!(re.is_match("FOO/BAR"));
        assert_eq!(re.to_string(), "/foo/bar/i");
        let options = args[4].as_options().unwrap();
        assert_eq!(options["timeoutMs"], Arg::Int(1000));
        assert_eq!(
            options["env"].as_options().unwrap()["A"],
            Arg::Str("b".into())
        );
    }

    #[test]
    fn regex_class_may_contain_slash() {
        let statements = parse("verify.files(/[/]x/).lines({ max: 1 })").unwrap();
        let re = statements[0].segments[0].args.as_ref().unwrap()[0].clone();
        assert!(re.as_regex().unwrap().is_match("a/x"));
    }

    #[test]
    fn reports_positions() {
        let err = parse("verify.file(\"a\").exists();\nverify.file(\"b\" 3)").unwrap_err();
        assert_eq!((err.line, err.column), (2, 17));
        assert_eq!(err.message, "expected ',' or ')', found '3'");

        let err = parse("check.file(\"a\")").unwrap_err();
        assert_eq!(err.to_string(), "1:1: statements must start with \"verify\", found \"check\"");
    }

    #[test]
    fn rejects_bad_literals() {
        assert!(parse("verify.a(\"open").is_err());
        assert!(parse("verify.a(/x/g)").is_err());
        assert!(parse("verify.a(/(/)").is_err());
        assert!(parse("verify;").is_err());
        assert!(parse("verify.a(nope)").is_err());
    }

    #[test]
    fn empty_source_has_no_statements() {
        assert!(parse("  // nothing\n# here\n").unwrap().is_empty());
    }
}
