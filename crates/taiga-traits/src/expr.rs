//! Domain-expression parsing and compilation.
//!
//! User-supplied tree and area domains are simple boolean predicates over
//! named FIA columns (`STATUSCD == 1 AND DIA >= 5.0`). They are parsed into
//! an AST here and later compiled either to a columnar boolean expression
//! or to a parameterized SQL fragment, never string-interpolated into SQL.

use std::collections::BTreeSet;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TaigaError};
use crate::types::SqlValue;
use crate::validation::validate_sql_identifier;

/// Keywords that must never appear in a domain expression.
const FORBIDDEN_KEYWORDS: [&str; 12] = [
    "SELECT", "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "EXEC", "UNION", "INTO",
    "GRANT", "REVOKE",
];

/// A literal value in a domain predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// Integer literal.
    Int(i64),
    /// Floating-point literal.
    Float(f64),
    /// Single-quoted string literal.
    Str(String),
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    /// `==` (also accepts `=`).
    Eq,
    /// `!=` (also accepts `<>`).
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CmpOp {
    const fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Parsed domain-expression AST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainExpr {
    /// `<column> <op> <literal>`
    Cmp {
        /// Column name.
        column: String,
        /// Comparison operator.
        op: CmpOp,
        /// Right-hand literal.
        value: Literal,
    },
    /// `<column> IN (l1, l2, ...)`
    In {
        /// Column name.
        column: String,
        /// Allowed values.
        values: Vec<Literal>,
    },
    /// `<column> BETWEEN low AND high` (inclusive both ends).
    Between {
        /// Column name.
        column: String,
        /// Lower bound.
        low: Literal,
        /// Upper bound.
        high: Literal,
    },
    /// `<column> IS NULL` / `<column> IS NOT NULL`
    IsNull {
        /// Column name.
        column: String,
        /// True for `IS NOT NULL`.
        negated: bool,
    },
    /// Conjunction.
    And(Box<DomainExpr>, Box<DomainExpr>),
    /// Disjunction.
    Or(Box<DomainExpr>, Box<DomainExpr>),
}

impl DomainExpr {
    /// Parse a domain expression, rejecting anything that is not a simple
    /// boolean predicate over identifiers and literals.
    pub fn parse(input: &str) -> Result<Self> {
        screen_forbidden(input)?;
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(TaigaError::InvalidDomain(format!(
                "unexpected trailing input near '{:?}'",
                parser.tokens[parser.pos]
            )));
        }
        Ok(expr)
    }

    /// Compile to a Polars boolean expression.
    #[must_use]
    pub fn to_polars(&self) -> Expr {
        match self {
            Self::Cmp { column, op, value } => {
                let lhs = col(column.as_str());
                let rhs = literal_expr(value);
                match op {
                    CmpOp::Eq => lhs.eq(rhs),
                    CmpOp::Ne => lhs.neq(rhs),
                    CmpOp::Lt => lhs.lt(rhs),
                    CmpOp::Le => lhs.lt_eq(rhs),
                    CmpOp::Gt => lhs.gt(rhs),
                    CmpOp::Ge => lhs.gt_eq(rhs),
                }
            }
            Self::In { column, values } => col(column.as_str()).is_in(lit(literal_series(values))),
            Self::Between { column, low, high } => col(column.as_str())
                .gt_eq(literal_expr(low))
                .and(col(column.as_str()).lt_eq(literal_expr(high))),
            Self::IsNull { column, negated } => {
                if *negated {
                    col(column.as_str()).is_not_null()
                } else {
                    col(column.as_str()).is_null()
                }
            }
            Self::And(l, r) => l.to_polars().and(r.to_polars()),
            Self::Or(l, r) => l.to_polars().or(r.to_polars()),
        }
    }

    /// Compile to a parameterized SQL fragment. Literals are returned as
    /// bind values, one `?` placeholder each.
    #[must_use]
    pub fn to_sql(&self) -> (String, Vec<SqlValue>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.write_sql(&mut sql, &mut params);
        (sql, params)
    }

    fn write_sql(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
        match self {
            Self::Cmp { column, op, value } => {
                sql.push_str(column);
                sql.push(' ');
                sql.push_str(op.sql());
                sql.push_str(" ?");
                params.push(value.to_sql_value());
            }
            Self::In { column, values } => {
                sql.push_str(column);
                sql.push_str(" IN (");
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    sql.push('?');
                    params.push(v.to_sql_value());
                }
                sql.push(')');
            }
            Self::Between { column, low, high } => {
                sql.push_str(column);
                sql.push_str(" BETWEEN ? AND ?");
                params.push(low.to_sql_value());
                params.push(high.to_sql_value());
            }
            Self::IsNull { column, negated } => {
                sql.push_str(column);
                sql.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Self::And(l, r) => {
                sql.push('(');
                l.write_sql(sql, params);
                sql.push_str(" AND ");
                r.write_sql(sql, params);
                sql.push(')');
            }
            Self::Or(l, r) => {
                sql.push('(');
                l.write_sql(sql, params);
                sql.push_str(" OR ");
                r.write_sql(sql, params);
                sql.push(')');
            }
        }
    }

    /// All column names referenced by the expression.
    #[must_use]
    pub fn columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Cmp { column, .. }
            | Self::In { column, .. }
            | Self::Between { column, .. }
            | Self::IsNull { column, .. } => {
                out.insert(column.clone());
            }
            Self::And(l, r) | Self::Or(l, r) => {
                l.collect_columns(out);
                r.collect_columns(out);
            }
        }
    }

    /// Split a top-level conjunction into its conjuncts. OR-compounds stay
    /// whole so the query builders can mark them as non-push-downable.
    #[must_use]
    pub fn split_conjuncts(&self) -> Vec<Self> {
        match self {
            Self::And(l, r) => {
                let mut out = l.split_conjuncts();
                out.extend(r.split_conjuncts());
                out
            }
            other => vec![other.clone()],
        }
    }
}

impl Literal {
    fn to_sql_value(&self) -> SqlValue {
        match self {
            Self::Int(v) => SqlValue::Integer(*v),
            Self::Float(v) => SqlValue::Real(*v),
            Self::Str(v) => SqlValue::Text(v.clone()),
        }
    }
}

fn literal_expr(l: &Literal) -> Expr {
    match l {
        Literal::Int(v) => lit(*v),
        Literal::Float(v) => lit(*v),
        Literal::Str(v) => lit(v.clone()),
    }
}

/// Build a Series from an IN-list, promoting mixed numeric literals to f64.
fn literal_series(values: &[Literal]) -> Series {
    let any_str = values.iter().any(|v| matches!(v, Literal::Str(_)));
    if any_str {
        let vals: Vec<String> = values
            .iter()
            .map(|v| match v {
                Literal::Str(s) => s.clone(),
                Literal::Int(i) => i.to_string(),
                Literal::Float(f) => f.to_string(),
            })
            .collect();
        return Series::new("".into(), vals);
    }
    let any_float = values.iter().any(|v| matches!(v, Literal::Float(_)));
    if any_float {
        let vals: Vec<f64> = values
            .iter()
            .map(|v| match v {
                Literal::Float(f) => *f,
                Literal::Int(i) => *i as f64,
                Literal::Str(_) => unreachable!(),
            })
            .collect();
        Series::new("".into(), vals)
    } else {
        let vals: Vec<i64> = values
            .iter()
            .map(|v| match v {
                Literal::Int(i) => *i,
                _ => unreachable!(),
            })
            .collect();
        Series::new("".into(), vals)
    }
}

/// Reject comment sequences, statement separators, and SQL keywords before
/// any parsing happens.
fn screen_forbidden(input: &str) -> Result<()> {
    if input.contains(';') {
        return Err(TaigaError::InvalidDomain(
            "semicolons are not allowed".to_string(),
        ));
    }
    if input.contains("--") || input.contains("/*") || input.contains("*/") {
        return Err(TaigaError::InvalidDomain(
            "comment sequences are not allowed".to_string(),
        ));
    }
    // Word-boundary keyword scan over the raw text.
    let mut word = String::new();
    for ch in input.chars().chain(std::iter::once(' ')) {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            word.push(ch.to_ascii_uppercase());
        } else {
            if FORBIDDEN_KEYWORDS.contains(&word.as_str()) {
                return Err(TaigaError::InvalidDomain(format!(
                    "forbidden keyword '{word}'"
                )));
            }
            word.clear();
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    LParen,
    RParen,
    Comma,
    Op(CmpOp),
    And,
    Or,
    In,
    Between,
    Is,
    Not,
    Null,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += if chars.get(i + 1) == Some(&'=') { 2 } else { 1 };
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ne));
                    i += 2;
                } else {
                    return Err(TaigaError::InvalidDomain(
                        "unexpected '!' without '='".to_string(),
                    ));
                }
            }
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    tokens.push(Token::Op(CmpOp::Le));
                    i += 2;
                }
                Some('>') => {
                    tokens.push(Token::Op(CmpOp::Ne));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Op(CmpOp::Lt));
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                    i += 1;
                }
            }
            '\'' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            s.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                        None => {
                            return Err(TaigaError::InvalidDomain(
                                "unterminated string literal".to_string(),
                            ));
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '-' | '0'..='9' => {
                let start = i;
                if c == '-' {
                    i += 1;
                    if !matches!(chars.get(i), Some('0'..='9')) {
                        return Err(TaigaError::InvalidDomain(
                            "'-' must start a numeric literal".to_string(),
                        ));
                    }
                }
                let mut is_float = false;
                while let Some(ch) = chars.get(i) {
                    if ch.is_ascii_digit() {
                        i += 1;
                    } else if *ch == '.' && !is_float {
                        is_float = true;
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                if is_float {
                    let v = text.parse::<f64>().map_err(|_| {
                        TaigaError::InvalidDomain(format!("bad numeric literal '{text}'"))
                    })?;
                    tokens.push(Token::Float(v));
                } else {
                    let v = text.parse::<i64>().map_err(|_| {
                        TaigaError::InvalidDomain(format!("bad numeric literal '{text}'"))
                    })?;
                    tokens.push(Token::Int(v));
                }
            }
            'A'..='Z' | 'a'..='z' | '_' => {
                let start = i;
                while let Some(ch) = chars.get(i) {
                    if ch.is_ascii_alphanumeric() || *ch == '_' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let word: String = chars[start..i].iter().collect();
                match word.to_uppercase().as_str() {
                    "AND" => tokens.push(Token::And),
                    "OR" => tokens.push(Token::Or),
                    "IN" => tokens.push(Token::In),
                    "BETWEEN" => tokens.push(Token::Between),
                    "IS" => tokens.push(Token::Is),
                    "NOT" => tokens.push(Token::Not),
                    "NULL" => tokens.push(Token::Null),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            other => {
                return Err(TaigaError::InvalidDomain(format!(
                    "unexpected character '{other}'"
                )));
            }
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

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            other => Err(TaigaError::InvalidDomain(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<DomainExpr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = DomainExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<DomainExpr> {
        let mut left = self.parse_primary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.pos += 1;
            let right = self.parse_primary()?;
            left = DomainExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<DomainExpr> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.pos += 1;
            let inner = self.parse_or()?;
            self.expect(&Token::RParen)?;
            return Ok(inner);
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<DomainExpr> {
        let column = match self.next() {
            Some(Token::Ident(name)) => {
                validate_sql_identifier(&name)?;
                name
            }
            other => {
                return Err(TaigaError::InvalidDomain(format!(
                    "expected column name, found {other:?}"
                )));
            }
        };

        match self.next() {
            Some(Token::Op(op)) => {
                let value = self.parse_literal()?;
                Ok(DomainExpr::Cmp { column, op, value })
            }
            Some(Token::In) => {
                self.expect(&Token::LParen)?;
                let mut values = vec![self.parse_literal()?];
                while matches!(self.peek(), Some(Token::Comma)) {
                    self.pos += 1;
                    values.push(self.parse_literal()?);
                }
                self.expect(&Token::RParen)?;
                Ok(DomainExpr::In { column, values })
            }
            Some(Token::Between) => {
                let low = self.parse_literal()?;
                self.expect(&Token::And)?;
                let high = self.parse_literal()?;
                Ok(DomainExpr::Between { column, low, high })
            }
            Some(Token::Is) => {
                let negated = if matches!(self.peek(), Some(Token::Not)) {
                    self.pos += 1;
                    true
                } else {
                    false
                };
                self.expect(&Token::Null)?;
                Ok(DomainExpr::IsNull { column, negated })
            }
            other => Err(TaigaError::InvalidDomain(format!(
                "expected operator after '{column}', found {other:?}"
            ))),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        match self.next() {
            Some(Token::Int(v)) => Ok(Literal::Int(v)),
            Some(Token::Float(v)) => Ok(Literal::Float(v)),
            Some(Token::Str(v)) => Ok(Literal::Str(v)),
            other => Err(TaigaError::InvalidDomain(format!(
                "expected literal, found {other:?}"
            ))),
        }
    }
}
