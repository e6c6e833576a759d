//! Token stream to [`Query`].
//!
//! Clauses and patterns are plain recursive descent. Expressions use
//! binding powers (a Pratt parser): every infix operator has a left and a
//! right power, and [`Parser::expr_bp`] keeps folding operators into the
//! left operand while their left power is at least the current minimum.
//!
//! Loosest to tightest: `OR`, `XOR`, `AND`, `NOT`, comparisons,
//! `IN` / `STARTS WITH` / `ENDS WITH` / `CONTAINS` / `IS [NOT] NULL`,
//! `+ -`, `* / %`, `^` (right-associative), unary minus, then property
//! access and label checks.

use crate::model::{Direction, Value};
use crate::{Error, Result};

use super::ast::*;
use super::lexer::{Token, TokenKind};

const NOT_POWER: u8 = 7;
const NULL_CHECK_POWER: u8 = 11;
const NEG_POWER: u8 = 19;
const ACCESS_POWER: u8 = 21;

/// Operator, left power and right power of an infix token. A right power
/// below the left one makes the operator right-associative.
fn infix(kind: TokenKind) -> Option<(BinOp, u8, u8)> {
    use TokenKind as T;
    let (op, power) = match kind {
        T::Or => (BinOp::Or, 1),
        T::Xor => (BinOp::Xor, 3),
        T::And => (BinOp::And, 5),
        T::Eq => (BinOp::Eq, 9),
        T::Neq => (BinOp::Ne, 9),
        T::Lt | T::LeftArrow => (BinOp::Lt, 9),
        T::Lte => (BinOp::Le, 9),
        T::Gt => (BinOp::Gt, 9),
        T::Gte => (BinOp::Ge, 9),
        T::In => (BinOp::In, 11),
        T::Starts => (BinOp::StartsWith, 11),
        T::Ends => (BinOp::EndsWith, 11),
        T::Contains => (BinOp::Contains, 11),
        T::Plus => (BinOp::Add, 13),
        T::Dash => (BinOp::Sub, 13),
        T::Star => (BinOp::Mul, 15),
        T::Slash => (BinOp::Div, 15),
        T::Percent => (BinOp::Mod, 15),
        T::Caret => return Some((BinOp::Pow, 18, 17)),
        _ => return None,
    };
    Some((op, power, power + 1))
}

/// Parse a token stream produced by [`super::lexer::tokenize`].
pub fn parse_query(tokens: &[Token]) -> Result<Query> {
    if tokens.is_empty() {
        return Err(error_at(0, "Empty statement"));
    }
    Parser { tokens, pos: 0 }.query()
}

fn error_at(position: usize, message: impl Into<String>) -> Error {
    Error::SyntaxError {
        position,
        message: message.into(),
    }
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    // Cursor

    fn peek(&self) -> &'t Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    /// The current token; the cursor never moves past the final `Eof`.
    fn bump(&mut self) -> &'t Token {
        let tok = self.peek();
        self.pos = (self.pos + 1).min(self.tokens.len());
        tok
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        let found = self.at(kind);
        if found {
            self.bump();
        }
        found
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&'t Token> {
        if self.at(kind) {
            return Ok(self.bump());
        }
        let tok = self.peek();
        Err(self.error(format!("Expected {kind:?}, got {:?} '{}'", tok.kind, tok.text)))
    }

    fn error(&self, message: impl Into<String>) -> Error {
        error_at(self.peek().span.start, message)
    }

    fn identifier(&mut self) -> Result<String> {
        Ok(self.expect(TokenKind::Identifier)?.text.clone())
    }

    fn optional_identifier(&mut self) -> Option<String> {
        self.at(TokenKind::Identifier).then(|| self.bump().text.clone())
    }

    /// Label, relationship type, property key or alias. Keywords are names
    /// here: `n.order`, `:Match` and `{limit: 1}` are all valid.
    fn name(&mut self) -> Result<String> {
        let tok = self.peek();
        if tok.kind == TokenKind::Identifier || tok.kind.is_keyword() {
            self.bump();
            Ok(tok.text.clone())
        } else {
            Err(self.error(format!("Expected a name, got {:?} '{}'", tok.kind, tok.text)))
        }
    }

    fn comma_separated<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let mut items = vec![item(self)?];
        while self.eat(TokenKind::Comma) {
            items.push(item(self)?);
        }
        Ok(items)
    }

    // Clauses

    fn at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof | TokenKind::Semicolon)
    }

    fn query(mut self) -> Result<Query> {
        let mut clauses = Vec::new();
        while !self.at_end() {
            if let Some(Clause::Return(_)) = clauses.last() {
                let tok = self.peek();
                return Err(self.error(format!(
                    "RETURN must be the last clause, found {:?} '{}'",
                    tok.kind, tok.text
                )));
            }
            clauses.push(self.clause()?);
        }
        if clauses.is_empty() {
            return Err(self.error("Empty statement"));
        }

        self.eat(TokenKind::Semicolon);
        if !self.at(TokenKind::Eof) {
            return Err(self.error(format!("Unexpected token after statement: {:?}", self.peek_kind())));
        }
        Ok(Query { clauses })
    }

    fn clause(&mut self) -> Result<Clause> {
        let tok = self.bump();
        match tok.kind {
            TokenKind::Match => self.match_clause(false),
            TokenKind::Optional => {
                self.expect(TokenKind::Match)?;
                self.match_clause(true)
            }
            TokenKind::Create => Ok(Clause::Create(self.comma_separated(Self::pattern)?)),
            TokenKind::Merge => self.merge_clause(),
            TokenKind::Set => Ok(Clause::Set(self.comma_separated(Self::set_item)?)),
            TokenKind::Remove => Ok(Clause::Remove(self.comma_separated(Self::remove_item)?)),
            TokenKind::Detach => {
                self.expect(TokenKind::Delete)?;
                self.delete_clause(true)
            }
            TokenKind::Delete => self.delete_clause(false),
            TokenKind::Return => Ok(Clause::Return(self.projection()?)),
            TokenKind::With => Err(error_at(tok.span.start, "WITH is not supported")),
            kind => Err(error_at(
                tok.span.start,
                format!("Unexpected token {kind:?} '{}' at start of clause", tok.text),
            )),
        }
    }

    fn match_clause(&mut self, optional: bool) -> Result<Clause> {
        let patterns = self.comma_separated(Self::pattern)?;
        let filter = if self.eat(TokenKind::Where) { Some(self.expr()?) } else { None };
        Ok(Clause::Match { optional, patterns, filter })
    }

    fn merge_clause(&mut self) -> Result<Clause> {
        let pattern = self.pattern()?;
        let (mut on_create, mut on_match) = (Vec::new(), Vec::new());
        while self.eat(TokenKind::On) {
            let actions = match self.peek_kind() {
                TokenKind::Create => &mut on_create,
                TokenKind::Match => &mut on_match,
                _ => return Err(self.error("Expected CREATE or MATCH after ON")),
            };
            self.bump();
            self.expect(TokenKind::Set)?;
            actions.extend(self.comma_separated(Self::set_item)?);
        }
        Ok(Clause::Merge { pattern, on_create, on_match })
    }

    fn delete_clause(&mut self, detach: bool) -> Result<Clause> {
        let targets = self.comma_separated(Self::expr)?;
        Ok(Clause::Delete { detach, targets })
    }

    fn set_item(&mut self) -> Result<SetItem> {
        let var = self.identifier()?;
        match self.peek_kind() {
            TokenKind::Dot => {
                self.bump();
                let key = self.name()?;
                self.expect(TokenKind::Eq)?;
                Ok(SetItem::Property { var, key, value: self.expr()? })
            }
            TokenKind::Eq | TokenKind::PlusEq => {
                let merge = self.bump().kind == TokenKind::PlusEq;
                Ok(SetItem::Properties { var, value: self.expr()?, merge })
            }
            TokenKind::Colon => {
                self.bump();
                Ok(SetItem::Label { var, label: self.name()? })
            }
            _ => Err(self.error("Expected '.', '=', '+=', or ':' after SET variable")),
        }
    }

    fn remove_item(&mut self) -> Result<RemoveItem> {
        let var = self.identifier()?;
        if self.eat(TokenKind::Dot) {
            Ok(RemoveItem::Property { var, key: self.name()? })
        } else if self.eat(TokenKind::Colon) {
            Ok(RemoveItem::Label { var, label: self.name()? })
        } else {
            Err(self.error("Expected '.' or ':' after REMOVE variable"))
        }
    }

    fn projection(&mut self) -> Result<Projection> {
        let distinct = self.eat(TokenKind::Distinct);
        let star = self.eat(TokenKind::Star);
        let items = if star { Vec::new() } else { self.comma_separated(Self::projected)? };

        let order_by = if self.eat(TokenKind::Order) {
            self.expect(TokenKind::By)?;
            self.comma_separated(Self::sort_key)?
        } else {
            Vec::new()
        };
        let skip = if self.eat(TokenKind::Skip) { Some(self.expr()?) } else { None };
        let limit = if self.eat(TokenKind::Limit) { Some(self.expr()?) } else { None };

        Ok(Projection { distinct, star, items, order_by, skip, limit })
    }

    fn projected(&mut self) -> Result<Projected> {
        let expr = self.expr()?;
        let alias = if self.eat(TokenKind::As) { Some(self.name()?) } else { None };
        Ok(Projected { expr, alias })
    }

    fn sort_key(&mut self) -> Result<SortKey> {
        let expr = self.expr()?;
        let descending = self.eat(TokenKind::Desc);
        if !descending {
            self.eat(TokenKind::Asc);
        }
        Ok(SortKey { expr, descending })
    }

    // Patterns

    fn pattern(&mut self) -> Result<Pattern> {
        let start = self.node_pattern()?;
        let mut hops = Vec::new();
        while self.at(TokenKind::Dash) || self.at(TokenKind::LeftArrow) {
            let rel = self.rel_pattern()?;
            let node = self.node_pattern()?;
            hops.push(Hop { rel, node });
        }
        Ok(Pattern { start, hops })
    }

    fn node_pattern(&mut self) -> Result<NodePattern> {
        self.expect(TokenKind::LParen)?;
        let var = self.optional_identifier();
        let mut labels = Vec::new();
        while self.eat(TokenKind::Colon) {
            labels.push(self.name()?);
        }
        let props = self.pattern_props()?;
        self.expect(TokenKind::RParen)?;
        Ok(NodePattern { var, labels, props })
    }

    /// `-[..]->`, `<-[..]-` or `-[..]-`; the bracket part may be left out.
    fn rel_pattern(&mut self) -> Result<RelPattern> {
        let incoming = self.eat(TokenKind::LeftArrow);
        if !incoming {
            self.expect(TokenKind::Dash)?;
        }

        let mut rel = RelPattern {
            var: None,
            types: Vec::new(),
            direction: Direction::Both,
            props: None,
        };
        if self.eat(TokenKind::LBracket) {
            rel.var = self.optional_identifier();
            if self.eat(TokenKind::Colon) {
                rel.types.push(self.name()?);
                while self.eat(TokenKind::Pipe) {
                    // `:A|:B` is accepted as well as `:A|B`
                    self.eat(TokenKind::Colon);
                    rel.types.push(self.name()?);
                }
            }
            if self.at(TokenKind::Star) {
                return Err(self.error("Variable-length relationships are not supported"));
            }
            rel.props = self.pattern_props()?;
            self.expect(TokenKind::RBracket)?;
        }

        let outgoing = self.eat(TokenKind::Arrow);
        if !outgoing {
            self.expect(TokenKind::Dash)?;
        }
        rel.direction = match (incoming, outgoing) {
            (false, true) => Direction::Outgoing,
            (true, false) => Direction::Incoming,
            _ => Direction::Both,
        };
        Ok(rel)
    }

    fn pattern_props(&mut self) -> Result<Option<Expr>> {
        match self.peek_kind() {
            TokenKind::LBrace => {
                self.bump();
                Ok(Some(Expr::Map(self.map_entries()?)))
            }
            TokenKind::Parameter => Ok(Some(Expr::Param(self.bump().text.clone()))),
            _ => Ok(None),
        }
    }

    // Expressions

    fn expr(&mut self) -> Result<Expr> {
        self.expr_bp(0)
    }

    fn expr_bp(&mut self, min_power: u8) -> Result<Expr> {
        let mut lhs = self.prefix()?;
        loop {
            let kind = self.peek_kind();
            match kind {
                TokenKind::Dot if ACCESS_POWER >= min_power => {
                    self.bump();
                    lhs = Expr::Prop(Box::new(lhs), self.name()?);
                    continue;
                }
                TokenKind::Colon if ACCESS_POWER >= min_power && matches!(lhs, Expr::Var(_)) => {
                    self.bump();
                    lhs = Expr::HasLabel(Box::new(lhs), self.name()?);
                    continue;
                }
                TokenKind::Is if NULL_CHECK_POWER >= min_power => {
                    self.bump();
                    let negated = self.eat(TokenKind::Not);
                    self.expect(TokenKind::Null)?;
                    lhs = Expr::IsNull(Box::new(lhs), negated);
                    continue;
                }
                _ => {}
            }

            let Some((op, left_power, right_power)) = infix(kind) else { break };
            if left_power < min_power {
                break;
            }
            self.bump();
            if matches!(kind, TokenKind::Starts | TokenKind::Ends) {
                self.expect(TokenKind::With)?;
            }
            let mut rhs = self.expr_bp(right_power)?;
            // `a<-1` lexes as an arrow
            if kind == TokenKind::LeftArrow {
                rhs = Expr::unary(UnaryOp::Neg, rhs);
            }
            lhs = Expr::binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr> {
        let tok = self.bump();
        let number_error = |what: &str| error_at(tok.span.start, format!("Invalid {what}"));
        Ok(match tok.kind {
            TokenKind::Not => Expr::unary(UnaryOp::Not, self.expr_bp(NOT_POWER)?),
            TokenKind::Dash => Expr::unary(UnaryOp::Neg, self.expr_bp(NEG_POWER)?),
            TokenKind::Plus => self.expr_bp(NEG_POWER)?,
            TokenKind::Integer => Expr::Const(Value::Int(tok.text.parse().map_err(|_| number_error("integer"))?)),
            TokenKind::Float => Expr::Const(Value::Float(tok.text.parse().map_err(|_| number_error("float"))?)),
            TokenKind::StringLiteral => Expr::Const(Value::String(tok.text.clone())),
            TokenKind::True => Expr::Const(Value::Bool(true)),
            TokenKind::False => Expr::Const(Value::Bool(false)),
            TokenKind::Null => Expr::Const(Value::Null),
            TokenKind::Parameter => Expr::Param(tok.text.clone()),
            TokenKind::LParen => {
                let inner = self.expr()?;
                self.expect(TokenKind::RParen)?;
                inner
            }
            TokenKind::LBracket => {
                let items = if self.at(TokenKind::RBracket) {
                    Vec::new()
                } else {
                    self.comma_separated(Self::expr)?
                };
                self.expect(TokenKind::RBracket)?;
                Expr::List(items)
            }
            TokenKind::LBrace => Expr::Map(self.map_entries()?),
            TokenKind::Identifier if self.eat(TokenKind::LParen) => self.call(tok)?,
            TokenKind::Identifier => Expr::Var(tok.text.clone()),
            kind => {
                return Err(error_at(
                    tok.span.start,
                    format!("Unexpected token in expression: {kind:?} '{}'", tok.text),
                ));
            }
        })
    }

    /// Arguments of `func(`, through the closing parenthesis.
    fn call(&mut self, func: &Token) -> Result<Expr> {
        let distinct = self.eat(TokenKind::Distinct);
        let args = if self.at(TokenKind::Star) {
            if !func.text.eq_ignore_ascii_case("count") {
                return Err(error_at(
                    func.span.start,
                    format!("'*' is only valid in count(*), not {}()", func.text),
                ));
            }
            self.bump();
            Vec::new()
        } else if self.at(TokenKind::RParen) {
            Vec::new()
        } else {
            self.comma_separated(Self::expr)?
        };
        self.expect(TokenKind::RParen)?;
        Ok(Expr::Call { func: func.text.clone(), distinct, args })
    }

    /// Entries after an opening `{`, through the closing brace.
    fn map_entries(&mut self) -> Result<Vec<(String, Expr)>> {
        if self.eat(TokenKind::RBrace) {
            return Ok(Vec::new());
        }
        let entries = self.comma_separated(|p| {
            let key = p.name()?;
            p.expect(TokenKind::Colon)?;
            Ok((key, p.expr()?))
        })?;
        self.expect(TokenKind::RBrace)?;
        Ok(entries)
    }
}
