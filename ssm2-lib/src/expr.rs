//! Conversion formula parser and evaluator
//!
//! Catalog conversions are plain arithmetic over the raw reading `x`, e.g.
//! `x*100/255` or `(x-128)/2`. A formula is parsed once into an [`Expr`] tree
//! and evaluated for every sample.

use crate::error::Ssm2Error;

/// Name of the free variable bound to the raw reading.
pub const VARIABLE: &str = "x";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    Variable,
    Neg(Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

impl Expr {
    /// Parse a formula over [`VARIABLE`].
    pub fn parse(input: &str) -> Result<Expr, Ssm2Error> {
        let error = |message: String| Ssm2Error::Expression {
            expr: input.to_string(),
            message,
        };
        let tokens = lex(input).map_err(error)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_additive().map_err(error)?;
        if let Some(token) = parser.peek() {
            return Err(error(format!("unexpected trailing {:?}", token)));
        }
        Ok(expr)
    }

    /// Evaluate with `x` bound to `x`.
    pub fn evaluate(&self, x: f64) -> Result<f64, Ssm2Error> {
        match self {
            Expr::Literal(value) => Ok(*value),
            Expr::Variable => Ok(x),
            Expr::Neg(inner) => Ok(-inner.evaluate(x)?),
            Expr::Binary(left, op, right) => {
                let l = left.evaluate(x)?;
                let r = right.evaluate(x)?;
                match op {
                    BinOp::Add => Ok(l + r),
                    BinOp::Sub => Ok(l - r),
                    BinOp::Mul => Ok(l * r),
                    BinOp::Div => {
                        if r == 0.0 {
                            return Err(Ssm2Error::Evaluation(format!("division by zero (x = {})", x)));
                        }
                        Ok(l / r)
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Variable,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // exponent, as in 1.5E-3
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number `{}` at {}", text, start))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                if ident != VARIABLE {
                    return Err(format!("unknown identifier `{}` at {}", ident, start));
                }
                tokens.push(Token::Variable);
            }
            other => return Err(format!("unexpected character `{}` at {}", other, i)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn match_token(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut node = self.parse_multiplicative()?;
        loop {
            let op = if self.match_token(&Token::Plus) {
                BinOp::Add
            } else if self.match_token(&Token::Minus) {
                BinOp::Sub
            } else {
                break;
            };
            let right = self.parse_multiplicative()?;
            node = Expr::Binary(Box::new(node), op, Box::new(right));
        }
        Ok(node)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut node = self.parse_unary()?;
        loop {
            let op = if self.match_token(&Token::Star) {
                BinOp::Mul
            } else if self.match_token(&Token::Slash) {
                BinOp::Div
            } else {
                break;
            };
            let right = self.parse_unary()?;
            node = Expr::Binary(Box::new(node), op, Box::new(right));
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.match_token(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        if self.match_token(&Token::Plus) {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(Expr::Literal(value)),
            Some(Token::Variable) => Ok(Expr::Variable),
            Some(Token::LParen) => {
                let expr = self.parse_additive()?;
                if !self.match_token(&Token::RParen) {
                    return Err("missing closing parenthesis".to_string());
                }
                Ok(expr)
            }
            Some(token) => Err(format!("unexpected {:?}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}
