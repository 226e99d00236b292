// SQL Parser
// This module converts a SELECT statement into a QueryDescriptor
// Tokens come from the sqlparser crate; the grammar on top of them is ours,
// because the dialect we accept (bareword literals, deferred join checks)
// is not one sqlparser's own parser understands.

use crate::error::{QueryError, QueryResult};
use crate::storage::ColumnKey;
use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Location, Token, Tokenizer, Word};
use std::cmp::Ordering;
use std::fmt;
use tracing::warn;

/// A parsed SELECT statement
///
/// Grammar (keywords are case-insensitive):
///
/// ```text
/// SELECT <field> (',' <field>)* FROM <table>
///   [ (INNER|LEFT|RIGHT) JOIN <table> ON <table.col> = <table.col> ]
///   [ WHERE <cond> ( (AND|OR) <cond> )* ]
///   [ GROUP BY <col> (',' <col>)* ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    /// Never empty
    pub fields: Vec<Field>,
    pub table: String,
    pub where_clauses: Vec<Predicate>,
    pub join: Option<JoinClause>,
    pub group_by: Option<Vec<String>>,
    /// Set when an aggregate is selected and there is no GROUP BY
    pub has_aggregate_without_group_by: bool,
}

impl QueryDescriptor {
    pub fn has_wildcard(&self) -> bool {
        self.fields.iter().any(|f| f.kind == FieldKind::Wildcard)
    }

    /// Every column the query reads, in first-mention order:
    /// selected columns, aggregate arguments, WHERE fields, GROUP BY fields
    pub fn referenced_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        let mut push = |column: &str| {
            if !columns.iter().any(|c| c == column) {
                columns.push(column.to_string());
            }
        };

        for field in &self.fields {
            if let Some(column) = field.column() {
                push(column);
            }
        }
        for predicate in &self.where_clauses {
            push(&predicate.field);
        }
        for column in self.group_by.iter().flatten() {
            push(column);
        }

        columns
    }
}

/// One entry of the SELECT list
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// The expression as written; aggregate results are keyed by it
    pub text: String,
    pub kind: FieldKind,
}

/// What a SELECT-list entry means, decided once at parse time
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// A column reference, or an expression we only know by its text
    Plain(String),
    /// `*`
    Wildcard,
    /// `COUNT(...)` - the argument is ignored
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
}

impl Field {
    pub fn is_aggregate(&self) -> bool {
        !matches!(self.kind, FieldKind::Plain(_) | FieldKind::Wildcard)
    }

    /// The column this field reads, if any
    pub fn column(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Plain(c)
            | FieldKind::Sum(c)
            | FieldKind::Avg(c)
            | FieldKind::Min(c)
            | FieldKind::Max(c) => Some(c),
            FieldKind::Count | FieldKind::Wildcard => None,
        }
    }
}

/// A single `field operator literal` comparison from a WHERE clause
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub operator: Operator,
    /// Raw literal text, coerced only when the predicate is evaluated
    pub literal: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl Operator {
    /// Apply the operator to the result of comparing two values
    /// `None` means the values cannot be compared: only `!=` holds then
    pub fn matches(self, ordering: Option<Ordering>) -> bool {
        match ordering {
            Some(ord) => match self {
                Operator::Eq => ord == Ordering::Equal,
                Operator::Ne => ord != Ordering::Equal,
                Operator::Gt => ord == Ordering::Greater,
                Operator::Lt => ord == Ordering::Less,
                Operator::Ge => ord != Ordering::Less,
                Operator::Le => ord != Ordering::Greater,
            },
            None => self == Operator::Ne,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
        };
        f.write_str(symbol)
    }
}

/// The kind of JOIN requested
///
/// Unknown join keywords are kept rather than rejected here; the executor
/// refuses them when it gets to the join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Unsupported(String),
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinKind::Inner => f.write_str("INNER"),
            JoinKind::Left => f.write_str("LEFT"),
            JoinKind::Right => f.write_str("RIGHT"),
            JoinKind::Unsupported(kind) => f.write_str(kind),
        }
    }
}

/// `ON left = right`, both sides written as `table.column`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinCondition {
    pub left: String,
    pub right: String,
}

impl JoinCondition {
    /// Make sure `left` names the base table's column
    /// `ON b.x = a.y` in `FROM a JOIN b` is turned around; anything
    /// else is kept as written
    pub fn oriented(&self, base_table: &str, join_table: &str) -> JoinCondition {
        let table_of = |column: &str| ColumnKey::parse(column).table;

        let reversed = base_table != join_table
            && table_of(&self.left).as_deref() == Some(join_table)
            && table_of(&self.right).as_deref() == Some(base_table);

        if reversed {
            JoinCondition {
                left: self.right.clone(),
                right: self.left.clone(),
            }
        } else {
            self.clone()
        }
    }
}

/// A join clause always carries both its table and its condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: String,
    pub condition: JoinCondition,
}

/// The query parser
pub struct QueryParser;

impl QueryParser {
    /// Parse a SELECT statement into a QueryDescriptor
    pub fn parse(sql: &str) -> QueryResult<QueryDescriptor> {
        let mut parser = Parser::new(sql)?;
        let query = parser.parse_select()?;
        parser.expect_end()?;
        Ok(query)
    }

    /// Parse the text of a WHERE clause (without the WHERE keyword)
    pub fn parse_conditions(text: &str) -> QueryResult<Vec<Predicate>> {
        let mut parser = Parser::new(text)?;
        let predicates = parser.parse_conditions()?;
        parser.expect_end()?;
        Ok(predicates)
    }
}

/// A token together with the text it was read from
#[derive(Debug, Clone)]
struct Lexeme {
    token: Token,
    text: String,
}

/// Recursive descent over the token stream
/// Whitespace tokens are kept so raw text can be rebuilt for fields and
/// literals, and skipped everywhere else.
struct Parser {
    lexemes: Vec<Lexeme>,
    pos: usize,
}

impl Parser {
    fn new(sql: &str) -> QueryResult<Self> {
        let dialect = GenericDialect {};
        let tokens = Tokenizer::new(&dialect, sql)
            .tokenize_with_location()
            .map_err(|e| QueryError::Parse(e.to_string()))?;

        let lexemes = tokens
            .into_iter()
            .map(|t| {
                let text = match &t.token {
                    // `!=` and `<>` share a token; keep the spelling that was used
                    Token::Neq => {
                        source_text(sql, t.span.start, 2).unwrap_or_else(|| "!=".to_string())
                    }
                    other => other.to_string(),
                };
                Lexeme {
                    token: t.token,
                    text,
                }
            })
            .collect();

        Ok(Self { lexemes, pos: 0 })
    }

    fn parse_select(&mut self) -> QueryResult<QueryDescriptor> {
        if !self.check_keyword(Keyword::SELECT) {
            return Err(QueryError::Parse("Invalid SELECT format".to_string()));
        }
        self.advance();

        let fields = self.parse_select_list()?;
        self.expect_keyword(Keyword::FROM)?;
        let table = self.expect_identifier("table name after FROM")?;

        let join = self.parse_join()?;

        let where_clauses = if self.check_keyword(Keyword::WHERE) {
            self.advance();
            self.parse_conditions()?
        } else {
            Vec::new()
        };

        let group_by = if self.check_keyword(Keyword::GROUP) {
            self.advance();
            self.expect_keyword(Keyword::BY)?;
            Some(self.parse_column_list()?)
        } else {
            None
        };

        let has_aggregate_without_group_by =
            group_by.is_none() && fields.iter().any(Field::is_aggregate);

        Ok(QueryDescriptor {
            fields,
            table,
            where_clauses,
            join,
            group_by,
            has_aggregate_without_group_by,
        })
    }

    /// Split the SELECT list on top-level commas, up to FROM
    fn parse_select_list(&mut self) -> QueryResult<Vec<Field>> {
        let mut fields = Vec::new();
        let mut start = self.pos;
        let mut depth = 0usize;

        loop {
            let Some(lexeme) = self.lexemes.get(self.pos) else {
                return Err(QueryError::Parse(
                    "Invalid SELECT format: expected FROM".to_string(),
                ));
            };
            match &lexeme.token {
                Token::Word(w) if depth == 0 && is_keyword(w, Keyword::FROM) => break,
                Token::Comma if depth == 0 => {
                    fields.push(classify_field(&self.lexemes[start..self.pos])?);
                    start = self.pos + 1;
                }
                Token::LParen => depth += 1,
                Token::RParen => depth = depth.saturating_sub(1),
                _ => {}
            }
            self.pos += 1;
        }

        fields.push(classify_field(&self.lexemes[start..self.pos])?);
        Ok(fields)
    }

    /// `[kind] JOIN table ON a.x = b.y`
    fn parse_join(&mut self) -> QueryResult<Option<JoinClause>> {
        let save = self.pos;
        let mut words = Vec::new();

        // Collect the words in front of JOIN; if there is no JOIN, rewind
        // and let the caller report whatever is there
        loop {
            match self.peek() {
                Some(Token::Word(w)) if is_keyword(w, Keyword::JOIN) => {
                    self.advance();
                    break;
                }
                Some(Token::Word(w))
                    if words.len() < 2
                        && !is_keyword(w, Keyword::WHERE)
                        && !is_keyword(w, Keyword::GROUP) =>
                {
                    words.push(w.value.to_uppercase());
                    self.advance();
                }
                _ => {
                    self.pos = save;
                    return Ok(None);
                }
            }
        }

        let words: Vec<&str> = words.iter().map(String::as_str).collect();
        let kind = match words.as_slice() {
            [] | ["INNER"] => JoinKind::Inner,
            ["LEFT"] | ["LEFT", "OUTER"] => JoinKind::Left,
            ["RIGHT"] | ["RIGHT", "OUTER"] => JoinKind::Right,
            other => JoinKind::Unsupported(other.join(" ")),
        };

        let table = self.expect_identifier("table name after JOIN")?;
        self.expect_keyword(Keyword::ON)?;
        let left = self.expect_qualified_column()?;
        match self.peek() {
            Some(Token::Eq) => self.advance(),
            _ => {
                return Err(QueryError::Parse(
                    "Invalid JOIN condition: expected '='".to_string(),
                ))
            }
        }
        let right = self.expect_qualified_column()?;

        Ok(Some(JoinClause {
            kind,
            table,
            condition: JoinCondition { left, right },
        }))
    }

    /// `cond ((AND | OR) cond)*`
    /// OR is accepted but every condition is combined with AND
    fn parse_conditions(&mut self) -> QueryResult<Vec<Predicate>> {
        let mut predicates = vec![self.parse_condition()?];

        loop {
            match self.peek() {
                Some(Token::Word(w)) if is_keyword(w, Keyword::AND) => self.advance(),
                Some(Token::Word(w)) if is_keyword(w, Keyword::OR) => {
                    warn!("OR in WHERE clause is evaluated as AND");
                    self.advance();
                }
                _ => break,
            }
            predicates.push(self.parse_condition()?);
        }

        Ok(predicates)
    }

    fn parse_condition(&mut self) -> QueryResult<Predicate> {
        let field = self
            .parse_column_ref()
            .ok_or_else(|| QueryError::Parse("Invalid WHERE clause format".to_string()))?;
        let operator = self.parse_operator()?;
        let literal = self.parse_literal()?;

        Ok(Predicate {
            field,
            operator,
            literal,
        })
    }

    fn parse_operator(&mut self) -> QueryResult<Operator> {
        self.skip_whitespace();
        let Some(lexeme) = self.lexemes.get(self.pos) else {
            return Err(QueryError::Parse(
                "Invalid WHERE clause format: missing operator".to_string(),
            ));
        };

        let operator = match (&lexeme.token, lexeme.text.as_str()) {
            (Token::Eq, _) => Operator::Eq,
            (Token::Neq, "!=") => Operator::Ne,
            (Token::Gt, _) => Operator::Gt,
            (Token::Lt, _) => Operator::Lt,
            (Token::GtEq, _) => Operator::Ge,
            (Token::LtEq, _) => Operator::Le,
            (Token::Neq | Token::DoubleEq | Token::Spaceship, text) => {
                return Err(QueryError::Unsupported(format!("operator '{}'", text)))
            }
            (_, text) => {
                return Err(QueryError::Parse(format!(
                    "Invalid WHERE clause format: expected an operator, found '{}'",
                    text
                )))
            }
        };

        self.pos += 1;
        Ok(operator)
    }

    /// Everything up to the next AND / OR / GROUP, as written
    fn parse_literal(&mut self) -> QueryResult<String> {
        let start = self.pos;
        while let Some(lexeme) = self.lexemes.get(self.pos) {
            if let Token::Word(w) = &lexeme.token {
                if is_keyword(w, Keyword::AND)
                    || is_keyword(w, Keyword::OR)
                    || is_keyword(w, Keyword::GROUP)
                {
                    break;
                }
            }
            if lexeme.token == Token::SemiColon {
                break;
            }
            self.pos += 1;
        }

        let literal = raw_text(&self.lexemes[start..self.pos]);
        if literal.is_empty() {
            return Err(QueryError::Parse(
                "Invalid WHERE clause format: missing value".to_string(),
            ));
        }
        Ok(literal)
    }

    fn parse_column_list(&mut self) -> QueryResult<Vec<String>> {
        let mut columns = Vec::new();
        loop {
            let column = self
                .parse_column_ref()
                .ok_or_else(|| QueryError::Parse("Invalid GROUP BY format".to_string()))?;
            columns.push(column);

            match self.peek() {
                Some(Token::Comma) => self.advance(),
                _ => break,
            }
        }
        Ok(columns)
    }

    /// `ident` or `ident.ident`
    fn parse_column_ref(&mut self) -> Option<String> {
        let first = match self.peek() {
            Some(Token::Word(w)) => w.value.clone(),
            _ => return None,
        };
        self.advance();

        if self.peek() == Some(&Token::Period) {
            let save = self.pos;
            self.advance();
            match self.peek() {
                Some(Token::Word(w)) => {
                    let column = format!("{}.{}", first, w.value);
                    self.advance();
                    return Some(column);
                }
                _ => self.pos = save,
            }
        }
        Some(first)
    }

    fn expect_qualified_column(&mut self) -> QueryResult<String> {
        match self.parse_column_ref() {
            Some(column) if ColumnKey::parse(&column).is_qualified() => Ok(column),
            _ => Err(QueryError::Parse(
                "Invalid JOIN condition: expected table.column".to_string(),
            )),
        }
    }

    fn expect_identifier(&mut self, what: &str) -> QueryResult<String> {
        match self.peek() {
            Some(Token::Word(w)) => {
                let name = w.value.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(QueryError::Parse(format!("expected {}", what))),
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> QueryResult<()> {
        if self.check_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(QueryError::Parse(format!("expected {:?}", keyword)))
        }
    }

    /// Only whitespace (and an optional `;`) may follow the statement
    fn expect_end(&mut self) -> QueryResult<()> {
        if self.peek() == Some(&Token::SemiColon) {
            self.advance();
        }
        self.skip_whitespace();
        match self.lexemes.get(self.pos) {
            None => Ok(()),
            Some(lexeme) => Err(QueryError::Parse(format!(
                "unexpected '{}'",
                lexeme.text
            ))),
        }
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if is_keyword(w, keyword))
    }

    fn skip_whitespace(&mut self) {
        while matches!(
            self.lexemes.get(self.pos).map(|l| &l.token),
            Some(Token::Whitespace(_))
        ) {
            self.pos += 1;
        }
    }

    /// The next non-whitespace token
    fn peek(&self) -> Option<&Token> {
        self.lexemes[self.pos.min(self.lexemes.len())..]
            .iter()
            .map(|l| &l.token)
            .find(|t| !matches!(t, Token::Whitespace(_)))
    }

    /// Move past the next non-whitespace token
    fn advance(&mut self) {
        self.skip_whitespace();
        if self.pos < self.lexemes.len() {
            self.pos += 1;
        }
    }
}

fn is_keyword(word: &Word, keyword: Keyword) -> bool {
    word.quote_style.is_none() && word.keyword == keyword
}

/// Rebuild the source text of a run of lexemes, trimmed
fn raw_text(lexemes: &[Lexeme]) -> String {
    lexemes
        .iter()
        .map(|l| l.text.as_str())
        .collect::<String>()
        .trim()
        .to_string()
}

/// `len` characters of `sql` starting at a tokenizer location
fn source_text(sql: &str, at: Location, len: usize) -> Option<String> {
    let line = sql.lines().nth((at.line as usize).checked_sub(1)?)?;
    let column = (at.column as usize).checked_sub(1)?;
    Some(line.chars().skip(column).take(len).collect())
}

/// Decide what a SELECT-list entry is
fn classify_field(lexemes: &[Lexeme]) -> QueryResult<Field> {
    let text = raw_text(lexemes);
    let tokens: Vec<&Token> = lexemes
        .iter()
        .map(|l| &l.token)
        .filter(|t| !matches!(t, Token::Whitespace(_)))
        .collect();

    let kind = match tokens.as_slice() {
        [] => {
            return Err(QueryError::Parse(
                "Invalid SELECT format: empty field".to_string(),
            ))
        }
        [Token::Mul] => FieldKind::Wildcard,
        [Token::Word(column)] => FieldKind::Plain(column.value.clone()),
        [Token::Word(table), Token::Period, Token::Word(column)] => {
            FieldKind::Plain(format!("{}.{}", table.value, column.value))
        }
        [Token::Word(func), Token::LParen, arg @ .., Token::RParen] => {
            classify_call(func, arg, &text)?
        }
        _ => {
            return Err(QueryError::Parse(format!(
                "Invalid field expression '{}'",
                text
            )))
        }
    };

    Ok(Field { text, kind })
}

/// `FUNC(arg)` - anything outside COUNT/SUM/AVG/MIN/MAX stays Plain
fn classify_call(func: &Word, arg: &[&Token], text: &str) -> QueryResult<FieldKind> {
    let name = func.value.to_uppercase();
    if !matches!(name.as_str(), "COUNT" | "SUM" | "AVG" | "MIN" | "MAX") {
        return Ok(FieldKind::Plain(text.to_string()));
    }

    let column = match arg {
        [Token::Mul] => None,
        [Token::Word(column)] => Some(column.value.clone()),
        [Token::Word(table), Token::Period, Token::Word(column)] => {
            Some(format!("{}.{}", table.value, column.value))
        }
        _ => {
            return Err(QueryError::Parse(format!(
                "Invalid aggregate argument in '{}'",
                text
            )))
        }
    };

    if name == "COUNT" {
        return Ok(FieldKind::Count);
    }

    let column = column.ok_or_else(|| {
        QueryError::Parse(format!("{} requires a column argument, found '{}'", name, text))
    })?;

    Ok(match name.as_str() {
        "SUM" => FieldKind::Sum(column),
        "AVG" => FieldKind::Avg(column),
        "MIN" => FieldKind::Min(column),
        _ => FieldKind::Max(column),
    })
}
