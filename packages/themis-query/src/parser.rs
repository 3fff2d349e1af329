//! Recursive-descent AQL parser (spec §4.9) over the token stream from
//! `lexer`. Grammar errors raise `ParseError` with the offending token's
//! line/column, matching the teacher's convention of attaching source
//! position to user-facing errors (`DbError::ParseError`-shaped context).

use crate::ast::*;
use crate::lexer::{tokenize, Spanned, Token};
use themis_core::error::ThemisError;
use themis_core::value::Value;

pub fn parse(src: &str) -> Result<Query, ThemisError> {
    let tokens = tokenize(src).map_err(|(line, column)| ThemisError::ParseError {
        line,
        column,
        message: "unrecognized token".to_string(),
        token: None,
    })?;
    let mut parser = Parser { tokens, pos: 0 };
    let query = parser.parse_query()?;
    parser.expect_end()?;
    Ok(query)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn current_pos(&self) -> (u32, u32) {
        self.tokens
            .get(self.pos)
            .map(|s| (s.line, s.column))
            .unwrap_or_else(|| self.tokens.last().map(|s| (s.line, s.column + 1)).unwrap_or((1, 1)))
    }

    fn err(&self, message: impl Into<String>) -> ThemisError {
        let (line, column) = self.current_pos();
        ThemisError::ParseError {
            line,
            column,
            message: message.into(),
            token: self.peek().map(|t| format!("{t:?}")),
        }
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|s| s.token.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ThemisError> {
        match self.peek() {
            Some(t) if std::mem::discriminant(t) == std::mem::discriminant(expected) => {
                self.advance();
                Ok(())
            }
            _ => Err(self.err(format!("expected {expected:?}"))),
        }
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if matches!(self.peek(), Some(t) if std::mem::discriminant(t) == std::mem::discriminant(expected)) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_end(&self) -> Result<(), ThemisError> {
        if self.pos != self.tokens.len() {
            Err(self.err("unexpected trailing tokens"))
        } else {
            Ok(())
        }
    }

    fn expect_ident(&mut self) -> Result<String, ThemisError> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name),
            _ => Err(self.err("expected identifier")),
        }
    }

    fn parse_query(&mut self) -> Result<Query, ThemisError> {
        let mut ctes = Vec::new();
        if self.eat(&Token::With) {
            loop {
                let name = self.expect_ident()?;
                self.expect(&Token::As)?;
                self.expect(&Token::LParen)?;
                let body = self.parse_stmts()?;
                self.expect(&Token::RParen)?;
                ctes.push(Cte { name, body });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        let body = self.parse_stmts()?;
        Ok(Query { ctes, body })
    }

    fn parse_stmts(&mut self) -> Result<Vec<Stmt>, ThemisError> {
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Some(Token::For) => stmts.push(self.parse_for()?),
                Some(Token::Filter) => {
                    self.advance();
                    stmts.push(Stmt::Filter(self.parse_expr()?));
                }
                Some(Token::Let) => {
                    self.advance();
                    let var = self.expect_ident()?;
                    self.expect(&Token::Eq)?;
                    stmts.push(Stmt::Let { var, expr: self.parse_expr()? });
                }
                Some(Token::Sort) => {
                    self.advance();
                    let mut keys = Vec::new();
                    loop {
                        let expr = self.parse_expr()?;
                        let descending = if self.eat(&Token::Desc) {
                            true
                        } else {
                            self.eat(&Token::Asc);
                            false
                        };
                        keys.push(SortKey { expr, descending });
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    stmts.push(Stmt::Sort(keys));
                }
                Some(Token::Limit) => {
                    self.advance();
                    let a = self.parse_int_literal()?;
                    let (offset, count) = if self.eat(&Token::Comma) {
                        (a, self.parse_int_literal()?)
                    } else {
                        (0, a)
                    };
                    stmts.push(Stmt::Limit { offset, count });
                }
                Some(Token::Collect) => stmts.push(self.parse_collect()?),
                Some(Token::Return) => {
                    self.advance();
                    stmts.push(Stmt::Return(self.parse_expr()?));
                    break;
                }
                _ => return Err(self.err("expected a query clause")),
            }
        }
        Ok(stmts)
    }

    fn parse_int_literal(&mut self) -> Result<i64, ThemisError> {
        match self.advance() {
            Some(Token::IntLit(v)) => Ok(v),
            _ => Err(self.err("expected an integer literal")),
        }
    }

    fn parse_for(&mut self) -> Result<Stmt, ThemisError> {
        self.advance();
        let var = self.expect_ident()?;

        let mut edge_var = None;
        let mut path_var = None;
        if self.eat(&Token::Comma) {
            edge_var = Some(self.expect_ident()?);
            if self.eat(&Token::Comma) {
                path_var = Some(self.expect_ident()?);
            }
        }
        self.expect(&Token::In)?;

        if edge_var.is_some() || matches!(self.peek(), Some(Token::IntLit(_))) {
            return self.parse_traversal(var, edge_var, path_var);
        }

        let source = if matches!(self.peek(), Some(Token::LParen)) {
            self.advance();
            let sub = self.parse_query()?;
            self.expect(&Token::RParen)?;
            ForSource::Expr(Expr::SubqueryArray(Box::new(sub)))
        } else if let Some(Token::Ident(name)) = self.peek().cloned() {
            self.advance();
            ForSource::Collection(name)
        } else {
            ForSource::Expr(self.parse_expr()?)
        };

        Ok(Stmt::For { var, source })
    }

    fn parse_traversal(
        &mut self,
        vertex_var: String,
        edge_var: Option<String>,
        path_var: Option<String>,
    ) -> Result<Stmt, ThemisError> {
        let min_depth = self.parse_int_literal()? as u32;
        self.expect(&Token::DotDot)?;
        let max_depth = self.parse_int_literal()? as u32;
        let direction = match self.advance() {
            Some(Token::Outbound) => Direction::Outbound,
            Some(Token::Inbound) => Direction::Inbound,
            _ => return Err(self.err("expected OUTBOUND or INBOUND")),
        };
        let mut shortest_path_to = None;
        let start = if self.eat(&Token::ShortestPath) {
            let from = self.parse_unary()?;
            self.expect(&Token::To)?;
            let to = self.parse_unary()?;
            shortest_path_to = Some(Box::new(to));
            from
        } else {
            self.parse_unary()?
        };
        let collection = self.expect_ident()?;
        Ok(Stmt::For {
            var: vertex_var.clone(),
            source: ForSource::Traversal {
                vertex_var,
                edge_var,
                path_var,
                min_depth,
                max_depth,
                direction,
                start: Box::new(start),
                collection,
                shortest_path_to,
            },
        })
    }

    fn parse_collect(&mut self) -> Result<Stmt, ThemisError> {
        self.advance();
        let mut group_by = Vec::new();
        if matches!(self.peek(), Some(Token::Ident(_))) {
            loop {
                let name = self.expect_ident()?;
                self.expect(&Token::Eq)?;
                let expr = self.parse_expr()?;
                group_by.push((name, expr));
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        let into_var = if self.eat(&Token::Into) { Some(self.expect_ident()?) } else { None };
        let mut aggregates = Vec::new();
        if self.eat(&Token::Aggregate) {
            loop {
                let name = self.expect_ident()?;
                self.expect(&Token::Eq)?;
                let func_name = self.expect_ident()?;
                self.expect(&Token::LParen)?;
                let arg = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                let func = match func_name.to_ascii_uppercase().as_str() {
                    "COUNT" => AggFunc::Count,
                    "SUM" => AggFunc::Sum,
                    "AVG" => AggFunc::Avg,
                    "MIN" => AggFunc::Min,
                    "MAX" => AggFunc::Max,
                    other => return Err(self.err(format!("unknown aggregate function {other}"))),
                };
                aggregates.push((name, func, arg));
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        Ok(Stmt::Collect(CollectClause { group_by, into_var, aggregates }))
    }

    fn parse_expr(&mut self) -> Result<Expr, ThemisError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ThemisError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(Box::new(lhs), BinaryOp::Or, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ThemisError> {
        let mut lhs = self.parse_comparison()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(Box::new(lhs), BinaryOp::And, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ThemisError> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(BinaryOp::Eq),
            Some(Token::Ne) => Some(BinaryOp::Ne),
            Some(Token::Lt) => Some(BinaryOp::Lt),
            Some(Token::Le) => Some(BinaryOp::Le),
            Some(Token::Gt) => Some(BinaryOp::Gt),
            Some(Token::Ge) => Some(BinaryOp::Ge),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let rhs = self.parse_additive()?;
                Ok(Expr::Binary(Box::new(lhs), op, Box::new(rhs)))
            }
            None => Ok(lhs),
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ThemisError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ThemisError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ThemisError> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ThemisError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let field = self.expect_ident()?;
                expr = Expr::Field(Box::new(expr), field);
            } else if self.eat(&Token::LBracket) {
                let idx = self.parse_expr()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(idx));
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ThemisError> {
        match self.advance() {
            Some(Token::IntLit(v)) => Ok(Expr::Literal(Value::I64(v))),
            Some(Token::FloatLit(v)) => Ok(Expr::Literal(Value::F64(v))),
            Some(Token::StringLit(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::NullLit) => Ok(Expr::Literal(Value::Null)),
            Some(Token::TrueLit) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::FalseLit) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::BindVar(name)) => Ok(Expr::BindVar(name)),
            Some(Token::LParen) => {
                if matches!(self.peek(), Some(Token::For) | Some(Token::With)) {
                    let sub = self.parse_query()?;
                    self.expect(&Token::RParen)?;
                    return Ok(Expr::SubqueryArray(Box::new(sub)));
                }
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if !matches!(self.peek(), Some(Token::RBracket)) {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::Array(items))
            }
            Some(Token::LBrace) => {
                let mut fields = Vec::new();
                if !matches!(self.peek(), Some(Token::RBrace)) {
                    loop {
                        let key = match self.advance() {
                            Some(Token::Ident(s)) => s,
                            Some(Token::StringLit(s)) => s,
                            _ => return Err(self.err("expected object key")),
                        };
                        self.expect(&Token::Colon)?;
                        let value = self.parse_expr()?;
                        fields.push((key, value));
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBrace)?;
                Ok(Expr::Object(fields))
            }
            Some(Token::Any) | Some(Token::All) => {
                let any = matches!(self.tokens[self.pos - 1].token, Token::Any);
                let var = self.expect_ident()?;
                self.expect(&Token::In)?;
                let source = self.parse_expr()?;
                self.expect(&Token::Satisfies)?;
                let predicate = self.parse_expr()?;
                Ok(Expr::Quantifier {
                    any,
                    var,
                    source: Box::new(source),
                    predicate: Box::new(predicate),
                })
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Some(Token::RParen)) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&Token::RParen)?;
                    Ok(Expr::FunctionCall(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            _ => Err(self.err("expected an expression")),
        }
    }
}
