//! Tokenizer and recursive-descent parser for preprocessed config text.

use super::{HeaderAssignment, HeaderClass, HeaderValue, ParseError};
use camino::Utf8Path;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Number(f64),
    Str(String),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Colon,
    Semi,
    Comma,
    Eq,
    PlusEq,
    Other(char),
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    line: usize,
}

/// Parsed top level of a file
#[derive(Debug, Default)]
pub(crate) struct Body {
    pub classes: Vec<HeaderClass>,
    pub assignments: Vec<HeaderAssignment>,
}

pub(crate) fn parse(path: &Utf8Path, text: &str) -> Result<Body, ParseError> {
    let tokens = tokenize(path, text)?;
    let mut parser = Parser {
        path,
        tokens,
        pos: 0,
    };
    let body = parser.body(false)?;
    Ok(body)
}

fn tokenize(path: &Utf8Path, text: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    let mut line = 1;

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let start_line = line;
        let token = match c {
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ':' => Token::Colon,
            ';' => Token::Semi,
            ',' => Token::Comma,
            '=' => Token::Eq,
            '+' if chars.get(i + 1) == Some(&'=') => {
                i += 1;
                Token::PlusEq
            }
            '"' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(syntax_error(path, start_line, "unterminated string literal"));
                        }
                        Some('"') if chars.get(i + 1) == Some(&'"') => {
                            value.push('"');
                            i += 2;
                        }
                        Some('"') => break,
                        Some(&ch) => {
                            if ch == '\n' {
                                line += 1;
                            }
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                Token::Str(value)
            }
            c if is_word_char(c) || (matches!(c, '-' | '+') && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit() || *n == '.')) => {
                let start = i;
                let numeric = !(chars[start].is_ascii_alphabetic() || chars[start] == '_');
                i += 1;
                while i < chars.len() {
                    let ch = chars[i];
                    let exponent_sign =
                        numeric && matches!(ch, '-' | '+') && matches!(chars[i - 1], 'e' | 'E');
                    if is_word_char(ch) || exponent_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(Spanned {
                    token: classify_word(word),
                    line: start_line,
                });
                continue;
            }
            other => Token::Other(other),
        };
        tokens.push(Spanned {
            token,
            line: start_line,
        });
        i += 1;
    }
    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn classify_word(word: String) -> Token {
    let starts_numeric = word
        .trim_start_matches(['-', '+'])
        .starts_with(|c: char| c.is_ascii_digit() || c == '.');
    if !starts_numeric {
        return Token::Word(word);
    }
    if let Ok(n) = word.parse::<f64>() {
        return Token::Number(n);
    }
    let (negative, digits) = match word.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, word.trim_start_matches('+')),
    };
    if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        if let Ok(n) = i64::from_str_radix(hex, 16) {
            let n = n as f64;
            return Token::Number(if negative { -n } else { n });
        }
    }
    Token::Word(word)
}

fn syntax_error(path: &Utf8Path, line: usize, message: impl Into<String>) -> ParseError {
    ParseError::Syntax {
        path: path.to_path_buf(),
        line,
        message: message.into(),
    }
}

struct Parser<'a> {
    path: &'a Utf8Path,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |s| s.line)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        syntax_error(self.path, self.line(), message)
    }

    fn word(&mut self, what: &str) -> Result<String, ParseError> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w),
            Some(other) => {
                self.pos -= 1;
                Err(self.error(format!("expected {}, found {:?}", what, other)))
            }
            None => Err(self.error(format!("expected {}, found end of file", what))),
        }
    }

    /// Parse items until end of input (top level) or a closing brace (class body).
    fn body(&mut self, nested: bool) -> Result<Body, ParseError> {
        let mut body = Body::default();
        loop {
            match self.peek() {
                None if nested => return Err(self.error("unterminated class body")),
                None => return Ok(body),
                Some(Token::RBrace) if nested => return Ok(body),
                Some(Token::RBrace) => return Err(self.error("unexpected '}'")),
                Some(Token::Semi) => {
                    self.pos += 1;
                }
                Some(Token::Word(w)) if w == "class" => {
                    self.pos += 1;
                    body.classes.push(self.class()?);
                }
                Some(Token::Word(w)) if w == "delete" => {
                    self.pos += 1;
                    self.word("class name")?;
                    self.terminator()?;
                }
                Some(Token::Word(_)) => body.assignments.push(self.assignment()?),
                Some(other) => {
                    let message = format!("unexpected token {:?}", other);
                    return Err(self.error(message));
                }
            }
        }
    }

    fn class(&mut self) -> Result<HeaderClass, ParseError> {
        let name = self.word("class name")?;
        let extends = if self.eat(&Token::Colon) {
            Some(self.word("base class name")?)
        } else {
            None
        };

        let mut class = HeaderClass {
            name,
            extends,
            classes: Vec::new(),
            assignments: Vec::new(),
        };

        if self.eat(&Token::LBrace) {
            let body = self.body(true)?;
            if !self.eat(&Token::RBrace) {
                return Err(self.error("expected '}'"));
            }
            class.classes = body.classes;
            class.assignments = body.assignments;
        }
        self.terminator()?;
        Ok(class)
    }

    fn assignment(&mut self) -> Result<HeaderAssignment, ParseError> {
        let name = self.word("property name")?;
        let is_array = if self.eat(&Token::LBracket) {
            if !self.eat(&Token::RBracket) {
                return Err(self.error("expected ']'"));
            }
            true
        } else {
            false
        };

        let append = match self.next() {
            Some(Token::Eq) => false,
            Some(Token::PlusEq) if is_array => true,
            Some(other) => {
                self.pos -= 1;
                return Err(self.error(format!("expected '=' after '{}', found {:?}", name, other)));
            }
            None => return Err(self.error(format!("expected '=' after '{}'", name))),
        };

        let value = self.value(false)?;
        self.terminator()?;
        Ok(HeaderAssignment {
            name,
            is_array,
            append,
            value,
        })
    }

    /// `;` is required except directly before a closing brace or at end of input.
    fn terminator(&mut self) -> Result<(), ParseError> {
        if self.eat(&Token::Semi) {
            return Ok(());
        }
        match self.peek() {
            Some(Token::RBrace) | None => Ok(()),
            Some(other) => {
                let message = format!("expected ';', found {:?}", other);
                Err(self.error(message))
            }
        }
    }

    fn value(&mut self, in_array: bool) -> Result<HeaderValue, ParseError> {
        match self.peek() {
            Some(Token::LBrace) => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    if self.eat(&Token::RBrace) {
                        break;
                    }
                    if self.peek().is_none() {
                        return Err(self.error("unterminated array"));
                    }
                    items.push(self.value(true)?);
                    if !self.eat(&Token::Comma) {
                        if self.eat(&Token::RBrace) {
                            break;
                        }
                        return Err(self.error("expected ',' or '}' in array"));
                    }
                }
                Ok(HeaderValue::Array(items))
            }
            Some(Token::Str(_)) | Some(Token::Number(_)) if self.is_single_value(in_array) => {
                match self.next() {
                    Some(Token::Str(s)) => Ok(HeaderValue::String(s)),
                    Some(Token::Number(n)) => Ok(HeaderValue::Number(n)),
                    _ => Err(self.error("expected value")),
                }
            }
            _ => self.raw(in_array),
        }
    }

    /// A literal is only a standalone value if the next token ends the value.
    fn is_single_value(&self, in_array: bool) -> bool {
        match self.tokens.get(self.pos + 1).map(|s| &s.token) {
            None | Some(Token::Semi) | Some(Token::RBrace) => true,
            Some(Token::Comma) => in_array,
            _ => false,
        }
    }

    /// Unquoted expression text, up to the end of the value.
    fn raw(&mut self, in_array: bool) -> Result<HeaderValue, ParseError> {
        let mut parts = Vec::new();
        loop {
            match self.peek() {
                None | Some(Token::Semi) | Some(Token::RBrace) => break,
                Some(Token::Comma) if in_array => break,
                Some(Token::LBrace) => return Err(self.error("unexpected '{' in value")),
                Some(_) => {
                    if let Some(token) = self.next() {
                        parts.push(render(&token));
                    }
                }
            }
        }
        if parts.is_empty() {
            return Err(self.error("missing value"));
        }
        Ok(HeaderValue::Raw(parts.join(" ")))
    }
}

fn render(token: &Token) -> String {
    match token {
        Token::Word(w) => w.clone(),
        Token::Number(n) => n.to_string(),
        Token::Str(s) => format!("\"{}\"", s.replace('"', "\"\"")),
        Token::LBrace => "{".to_string(),
        Token::RBrace => "}".to_string(),
        Token::LBracket => "[".to_string(),
        Token::RBracket => "]".to_string(),
        Token::Colon => ":".to_string(),
        Token::Semi => ";".to_string(),
        Token::Comma => ",".to_string(),
        Token::Eq => "=".to_string(),
        Token::PlusEq => "+=".to_string(),
        Token::Other(c) => c.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(text: &str) -> Result<Body, ParseError> {
        parse(Utf8Path::new("config.cpp"), text)
    }

    #[test]
    fn test_nested_classes_and_values() {
        let body = parse_str(
            r#"
            class CfgPatches {
                class My_Addon {
                    units[] = {"My_Unit", "Other"};
                    requiredVersion = 1.62;
                    author = "Someone ""quoted""";
                };
            };
            class My_Unit: Base {};
            class Forward;
            "#,
        )
        .unwrap();

        assert_eq!(body.classes.len(), 3);
        let patches = &body.classes[0];
        assert_eq!(patches.name, "CfgPatches");
        let addon = &patches.classes[0];
        assert_eq!(addon.assignments.len(), 3);
        assert!(addon.assignments[0].is_array);
        assert_eq!(
            addon.assignments[0].value,
            HeaderValue::Array(vec![
                HeaderValue::String("My_Unit".to_string()),
                HeaderValue::String("Other".to_string()),
            ])
        );
        assert_eq!(addon.assignments[1].value, HeaderValue::Number(1.62));
        assert_eq!(
            addon.assignments[2].value,
            HeaderValue::String("Someone \"quoted\"".to_string())
        );
        assert_eq!(body.classes[1].extends.as_deref(), Some("Base"));
        assert!(body.classes[2].classes.is_empty());
    }

    #[test]
    fn test_numbers_and_raw_values() {
        let body = parse_str("a = -5; b = 1e-05; c = 0x1F; d = true; e = 2 * 3; f[] += {1, {2, 3}};").unwrap();
        let values: Vec<&HeaderValue> = body.assignments.iter().map(|a| &a.value).collect();

        assert_eq!(values[0], &HeaderValue::Number(-5.0));
        assert_eq!(values[1], &HeaderValue::Number(1e-05));
        assert_eq!(values[2], &HeaderValue::Number(31.0));
        assert_eq!(values[3], &HeaderValue::Raw("true".to_string()));
        assert_eq!(values[4], &HeaderValue::Raw("2 * 3".to_string()));
        assert!(body.assignments[5].append);
        assert_eq!(
            values[5],
            &HeaderValue::Array(vec![
                HeaderValue::Number(1.0),
                HeaderValue::Array(vec![HeaderValue::Number(2.0), HeaderValue::Number(3.0)]),
            ])
        );
    }

    #[test]
    fn test_missing_semicolon_before_brace_is_tolerated() {
        let body = parse_str("class A { x = 1 }").unwrap();
        assert_eq!(body.classes[0].assignments[0].name, "x");
    }

    #[test]
    fn test_unterminated_class_is_error() {
        let err = parse_str("class A {\n x = 1;\n").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn test_error_reports_line() {
        let err = parse_str("a = 1;\nb = 2;\nclass {\n").unwrap_err();
        match err {
            ParseError::Syntax { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_string_is_error() {
        assert!(parse_str("a = \"oops;\n").is_err());
    }

    #[test]
    fn test_delete_statement_skipped() {
        let body = parse_str("class A { delete B; x = 1; };").unwrap();
        assert_eq!(body.classes[0].assignments.len(), 1);
    }
}
