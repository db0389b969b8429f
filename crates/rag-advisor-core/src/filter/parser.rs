//! Text parser for filter expressions.
//!
//! Grammar (keywords are case-insensitive):
//!
//! ```text
//! expr    := or
//! or      := and (("OR" | "||") and)*
//! and     := unary (("AND" | "&&") unary)*
//! unary   := ("NOT" | "!") unary | primary
//! primary := "(" expr ")" | key op value
//! op      := "==" | "!=" | ">" | ">=" | "<" | "<=" | "IN" | "NIN" | "NOT IN"
//! value   := string | number | "true" | "false" | "[" value ("," value)* "]"
//! ```

use thiserror::Error;

use super::{Expression, Op, Value};

/// Deepest expression tree the parser will build. Parentheses, `NOT`, list
/// brackets and each extra `AND`/`OR` operand count one level.
pub const MAX_NESTING_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid filter expression at position {position}: {message}")]
pub struct FilterParseError {
    pub position: usize,
    pub message: String,
}

/// Parse the text form of a filter expression.
pub fn parse(input: &str) -> Result<Expression, FilterParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.chars().count(),
        depth: 0,
    };
    let expr = parser.or_expr()?;
    if let Some((tok, at)) = parser.peek_with_pos() {
        return Err(err(at, format!("unexpected {}", tok.describe())));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Op(Op),
    And,
    Or,
    Not,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("identifier '{}'", s),
            Token::Str(_) => "string literal".to_string(),
            Token::Int(_) | Token::Float(_) => "number".to_string(),
            Token::Bool(b) => format!("'{}'", b),
            Token::Op(op) => format!("'{}'", op.symbol()),
            Token::And => "'AND'".to_string(),
            Token::Or => "'OR'".to_string(),
            Token::Not => "'NOT'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::LBracket => "'['".to_string(),
            Token::RBracket => "']'".to_string(),
            Token::Comma => "','".to_string(),
        }
    }
}

fn err(position: usize, message: impl Into<String>) -> FilterParseError {
    FilterParseError {
        position,
        message: message.into(),
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, FilterParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
        let token = match two.as_str() {
            "==" => Some(Token::Op(Op::Eq)),
            "!=" => Some(Token::Op(Op::Ne)),
            ">=" => Some(Token::Op(Op::Gte)),
            "<=" => Some(Token::Op(Op::Lte)),
            "&&" => Some(Token::And),
            "||" => Some(Token::Or),
            _ => None,
        };
        if let Some(token) = token {
            tokens.push((token, start));
            i += 2;
            continue;
        }

        match c {
            '>' => tokens.push((Token::Op(Op::Gt), start)),
            '<' => tokens.push((Token::Op(Op::Lt), start)),
            '!' => tokens.push((Token::Not, start)),
            '(' => tokens.push((Token::LParen, start)),
            ')' => tokens.push((Token::RParen, start)),
            '[' => tokens.push((Token::LBracket, start)),
            ']' => tokens.push((Token::RBracket, start)),
            ',' => tokens.push((Token::Comma, start)),
            '\'' | '"' => {
                let (text, next) = read_string(&chars, i)?;
                tokens.push((Token::Str(text), start));
                i = next;
                continue;
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                let (token, next) = read_number(&chars, i)?;
                tokens.push((token, start));
                i = next;
                continue;
            }
            c if is_ident_start(c) => {
                let mut end = i;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                let word: String = chars[i..end].iter().collect();
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "IN" => Token::Op(Op::In),
                    "NIN" => Token::Op(Op::Nin),
                    "TRUE" => Token::Bool(true),
                    "FALSE" => Token::Bool(false),
                    _ => Token::Ident(word),
                };
                tokens.push((token, start));
                i = end;
                continue;
            }
            other => return Err(err(start, format!("unexpected character '{}'", other))),
        }
        i += 1;
    }

    Ok(tokens)
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), FilterParseError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                out.push(chars[i + 1]);
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(err(start, "unterminated string literal"))
}

fn read_number(chars: &[char], start: usize) -> Result<(Token, usize), FilterParseError> {
    let mut end = start;
    if matches!(chars[end], '-' | '+') {
        end += 1;
    }
    while end < chars.len()
        && (chars[end].is_ascii_digit() || matches!(chars[end], '.' | 'e' | 'E'))
    {
        // exponent sign
        let signed_exponent = matches!(chars[end], 'e' | 'E')
            && end + 1 < chars.len()
            && matches!(chars[end + 1], '-' | '+');
        if signed_exponent {
            end += 1;
        }
        end += 1;
    }
    let text: String = chars[start..end].iter().collect();
    if let Ok(int) = text.parse::<i64>() {
        return Ok((Token::Int(int), end));
    }
    match text.parse::<f64>() {
        Ok(float) => Ok((Token::Float(float), end)),
        Err(_) => Err(err(start, format!("invalid number '{}'", text))),
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_with_pos(&self) -> Option<(&Token, usize)> {
        self.tokens.get(self.pos).map(|(t, at)| (t, *at))
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, at)| *at).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), FilterParseError> {
        let at = self.position();
        match self.next() {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(err(
                at,
                format!("expected {}, found {}", expected.describe(), tok.describe()),
            )),
            None => Err(err(at, format!("expected {}", expected.describe()))),
        }
    }

    fn descend(&mut self) -> Result<(), FilterParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(err(
                self.position(),
                format!("expression nested deeper than {} levels", MAX_NESTING_DEPTH),
            ));
        }
        Ok(())
    }

    fn ascend(&mut self, levels: usize) {
        self.depth -= levels;
    }

    fn or_expr(&mut self) -> Result<Expression, FilterParseError> {
        let mut left = self.and_expr()?;
        let mut levels = 0;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            self.descend()?;
            levels += 1;
            let right = self.and_expr()?;
            left = left.or(right);
        }
        self.ascend(levels);
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expression, FilterParseError> {
        let mut left = self.unary()?;
        let mut levels = 0;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            self.descend()?;
            levels += 1;
            let right = self.unary()?;
            left = left.and(right);
        }
        self.ascend(levels);
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expression, FilterParseError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.descend()?;
            let inner = self.unary()?;
            self.ascend(1);
            return Ok(inner.not());
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expression, FilterParseError> {
        let at = self.position();
        match self.next() {
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.or_expr()?;
                self.expect(Token::RParen)?;
                self.ascend(1);
                Ok(inner)
            }
            Some(Token::Ident(key)) | Some(Token::Str(key)) => {
                let op = self.operator()?;
                let value = self.value()?;
                if matches!(op, Op::In | Op::Nin) && !matches!(value, Value::List(_)) {
                    return Err(err(at, format!("'{}' requires a list", op.symbol())));
                }
                Ok(Expression::compare(key, op, value))
            }
            Some(tok) => Err(err(at, format!("expected a key, found {}", tok.describe()))),
            None => Err(err(at, "unexpected end of expression")),
        }
    }

    fn operator(&mut self) -> Result<Op, FilterParseError> {
        let at = self.position();
        match self.next() {
            Some(Token::Op(op)) => Ok(op),
            Some(Token::Not) => match self.next() {
                Some(Token::Op(Op::In)) => Ok(Op::Nin),
                _ => Err(err(at, "expected 'IN' after 'NOT'")),
            },
            Some(tok) => Err(err(at, format!("expected an operator, found {}", tok.describe()))),
            None => Err(err(at, "expected an operator")),
        }
    }

    fn value(&mut self) -> Result<Value, FilterParseError> {
        let at = self.position();
        match self.next() {
            Some(Token::Str(s)) => Ok(Value::Str(s)),
            Some(Token::Int(i)) => Ok(Value::Int(i)),
            Some(Token::Float(f)) => Ok(Value::Float(f)),
            Some(Token::Bool(b)) => Ok(Value::Bool(b)),
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() == Some(&Token::RBracket) {
                    self.pos += 1;
                    return Ok(Value::List(items));
                }
                self.descend()?;
                loop {
                    items.push(self.value()?);
                    let at = self.position();
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RBracket) => break,
                        _ => return Err(err(at, "expected ',' or ']' in list")),
                    }
                }
                self.ascend(1);
                Ok(Value::List(items))
            }
            Some(tok) => Err(err(at, format!("expected a value, found {}", tok.describe()))),
            None => Err(err(at, "expected a value")),
        }
    }
}
