//! Recursive-descent, precedence-climbing parser over the token stream
//! from [`super::lexer`]. Precedence (loosest to tightest): `||`, `&&`,
//! equality, relational, additive, multiplicative, unary, primary.
//!
//! Parentheses are validated here, at parse time, not deferred to
//! evaluation: an unbalanced expression fails before a run ever starts.

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::lexer::{tokenize, LexError, Token};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token {0:?}")]
    UnexpectedToken(Token),
    #[error("unbalanced parentheses")]
    UnbalancedParens,
    #[error("expected an identifier after '.'")]
    ExpectedIdentAfterDot,
}

pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    check_balanced(&tokens)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(ParseError::UnexpectedToken(
            parser.tokens[parser.pos].clone(),
        ));
    }
    Ok(expr)
}

fn check_balanced(tokens: &[Token]) -> Result<(), ParseError> {
    let mut depth = 0i32;
    for t in tokens {
        match t {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth < 0 {
                    return Err(ParseError::UnbalancedParens);
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ParseError::UnbalancedParens);
    }
    Ok(())
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
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: &Token) -> Result<(), ParseError> {
        match self.advance() {
            Some(ref t) if t == want => Ok(()),
            Some(t) => Err(ParseError::UnexpectedToken(t)),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::OrOr)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_equality()?;
        while matches!(self.peek(), Some(Token::AndAnd)) {
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Bang) => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)))
            }
            Some(Token::Minus) => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.parse_ident_tail(name),
            Some(t) => Err(ParseError::UnexpectedToken(t)),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn parse_ident_tail(&mut self, name: String) -> Result<Expr, ParseError> {
        match name.as_str() {
            "true" => return Ok(Expr::Bool(true)),
            "false" => return Ok(Expr::Bool(false)),
            "null" => return Ok(Expr::Null),
            _ => {}
        }

        if matches!(self.peek(), Some(Token::LParen)) {
            self.advance();
            let mut args = Vec::new();
            if !matches!(self.peek(), Some(Token::RParen)) {
                loop {
                    args.push(self.parse_or()?);
                    if matches!(self.peek(), Some(Token::Comma)) {
                        self.advance();
                        continue;
                    }
                    break;
                }
            }
            self.expect(&Token::RParen)?;
            return Ok(Expr::Call(name, args));
        }

        let mut segments = vec![name];
        while matches!(self.peek(), Some(Token::Dot)) {
            self.advance();
            match self.advance() {
                Some(Token::Ident(seg)) => segments.push(seg),
                _ => return Err(ParseError::ExpectedIdentAfterDot),
            }
        }
        Ok(Expr::Path(segments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_path() {
        let expr = parse("inputs.foo.bar").unwrap();
        assert_eq!(
            expr,
            Expr::Path(vec!["inputs".into(), "foo".into(), "bar".into()])
        );
    }

    #[test]
    fn parses_comparison_with_precedence() {
        let expr = parse("inputs.number > 50 && inputs.flag").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::And,
                Box::new(Expr::Binary(
                    BinaryOp::Gt,
                    Box::new(Expr::Path(vec!["inputs".into(), "number".into()])),
                    Box::new(Expr::Number(50.0)),
                )),
                Box::new(Expr::Path(vec!["inputs".into(), "flag".into()])),
            )
        );
    }

    #[test]
    fn parses_function_call_with_args() {
        let expr = parse("contains(steps.s1.outputs.text, 'ok')").unwrap();
        assert_eq!(
            expr,
            Expr::Call(
                "contains".into(),
                vec![
                    Expr::Path(vec![
                        "steps".into(),
                        "s1".into(),
                        "outputs".into(),
                        "text".into()
                    ]),
                    Expr::Str("ok".into()),
                ]
            )
        );
    }

    #[test]
    fn unbalanced_parens_rejected() {
        let err = parse("(inputs.x > 1").unwrap_err();
        assert_eq!(err, ParseError::UnbalancedParens);
    }

    #[test]
    fn respects_parens_over_precedence() {
        let expr = parse("(inputs.a || inputs.b) && inputs.c").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::And,
                Box::new(Expr::Binary(
                    BinaryOp::Or,
                    Box::new(Expr::Path(vec!["inputs".into(), "a".into()])),
                    Box::new(Expr::Path(vec!["inputs".into(), "b".into()])),
                )),
                Box::new(Expr::Path(vec!["inputs".into(), "c".into()])),
            )
        );
    }

    #[test]
    fn unary_not_and_neg() {
        let expr = parse("!inputs.flag").unwrap();
        assert_eq!(
            expr,
            Expr::Unary(
                UnaryOp::Not,
                Box::new(Expr::Path(vec!["inputs".into(), "flag".into()]))
            )
        );
    }
}
