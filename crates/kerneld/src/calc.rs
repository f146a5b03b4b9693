//! Built-in arithmetic backend.
//!
//! A small expression language so the kernel is runnable and testable
//! without an external runtime: floating-point arithmetic, variables,
//! `print(expr)` writing to stdout, and `sleep(ms)` for exercising
//! long-running executions and interruption.
//!
//! Statements are separated by `;` or newlines; the value of the last
//! value-producing statement is the execution result.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};

use crate::backend::{
    Completeness, CompletionResult, ErrorReport, ExecutionBackend, ExecutionOutcome,
    ExecutionSuccess, InspectionResult, LanguageInfo, StdioCapture,
};

const BUILTINS: &[(&str, &str)] = &[
    ("print", "print(expr): evaluate expr and write it to stdout"),
    ("sleep", "sleep(ms): pause execution for the given number of milliseconds"),
];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Assign,
    Separator,
}

fn tokenize(code: &str) -> Result<Vec<Token>, ErrorReport> {
    let mut tokens = Vec::new();
    let mut chars = code.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' => {
                chars.next();
            }
            ';' | '\n' => {
                chars.next();
                tokens.push(Token::Separator);
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '^' => {
                chars.next();
                tokens.push(Token::Caret);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Assign);
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = literal.parse::<f64>().map_err(|_| {
                    ErrorReport::new("ParseError", format!("invalid number literal: {}", literal))
                })?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        name.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(name));
            }
            other => {
                return Err(ErrorReport::new(
                    "ParseError",
                    format!("unexpected character: {:?}", other),
                ));
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Var(String),
    Neg(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

#[derive(Debug, Clone)]
enum Stmt {
    Assign(String, Expr),
    Print(Expr),
    Sleep(Expr),
    Expr(Expr),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

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

    fn expect(&mut self, expected: &Token) -> Result<(), ErrorReport> {
        match self.advance() {
            Some(ref token) if token == expected => Ok(()),
            other => Err(ErrorReport::new(
                "ParseError",
                format!("expected {:?}, found {:?}", expected, other),
            )),
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>, ErrorReport> {
        let mut stmts = Vec::new();
        loop {
            while matches!(self.peek(), Some(Token::Separator)) {
                self.advance();
            }
            if self.peek().is_none() {
                break;
            }
            stmts.push(self.parse_stmt()?);
            match self.peek() {
                None => break,
                Some(Token::Separator) => {
                    self.advance();
                }
                Some(other) => {
                    return Err(ErrorReport::new(
                        "ParseError",
                        format!("unexpected token after statement: {:?}", other),
                    ));
                }
            }
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ErrorReport> {
        if let Some(Token::Ident(name)) = self.peek().cloned() {
            match self.tokens.get(self.pos + 1) {
                Some(Token::Assign) => {
                    self.advance();
                    self.advance();
                    let expr = self.parse_expr()?;
                    return Ok(Stmt::Assign(name, expr));
                }
                Some(Token::LParen) if name == "print" || name == "sleep" => {
                    self.advance();
                    self.advance();
                    let expr = self.parse_expr()?;
                    self.expect(&Token::RParen)?;
                    return Ok(if name == "print" {
                        Stmt::Print(expr)
                    } else {
                        Stmt::Sleep(expr)
                    });
                }
                _ => {}
            }
        }
        Ok(Stmt::Expr(self.parse_expr()?))
    }

    fn parse_expr(&mut self) -> Result<Expr, ErrorReport> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, ErrorReport> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // Unary minus binds looser than `^`, so `-2^2` is `-(2^2)`.
    fn parse_unary(&mut self) -> Result<Expr, ErrorReport> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.advance();
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_power()
    }

    // Right-associative exponentiation: `2^3^2` is `2^(3^2)`.
    fn parse_power(&mut self) -> Result<Expr, ErrorReport> {
        let base = self.parse_atom()?;
        if matches!(self.peek(), Some(Token::Caret)) {
            self.advance();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Bin(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_atom(&mut self) -> Result<Expr, ErrorReport> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::Ident(name)) => Ok(Expr::Var(name)),
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            other => Err(ErrorReport::new(
                "ParseError",
                format!("expected expression, found {:?}", other),
            )),
        }
    }
}

/// Render a value the way users expect to read it: integers without a
/// trailing `.0`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// The built-in arithmetic evaluator.
pub struct CalcBackend {
    variables: Mutex<HashMap<String, f64>>,
}

impl Default for CalcBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CalcBackend {
    pub fn new() -> Self {
        CalcBackend {
            variables: Mutex::new(HashMap::new()),
        }
    }

    fn eval(&self, expr: &Expr) -> Result<f64, ErrorReport> {
        match expr {
            Expr::Number(value) => Ok(*value),
            Expr::Var(name) => {
                let variables = self.variables.lock().unwrap();
                variables.get(name).copied().ok_or_else(|| {
                    ErrorReport::new("UndefVarError", format!("{} not defined", name))
                })
            }
            Expr::Neg(inner) => Ok(-self.eval(inner)?),
            Expr::Bin(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                match op {
                    BinOp::Add => Ok(lhs + rhs),
                    BinOp::Sub => Ok(lhs - rhs),
                    BinOp::Mul => Ok(lhs * rhs),
                    BinOp::Div => {
                        if rhs == 0.0 {
                            Err(ErrorReport::new(
                                "DivideError",
                                "division by zero".to_owned(),
                            ))
                        } else {
                            Ok(lhs / rhs)
                        }
                    }
                    BinOp::Rem => {
                        if rhs == 0.0 {
                            Err(ErrorReport::new(
                                "DivideError",
                                "remainder by zero".to_owned(),
                            ))
                        } else {
                            Ok(lhs % rhs)
                        }
                    }
                    BinOp::Pow => Ok(lhs.powf(rhs)),
                }
            }
        }
    }

    /// Identifier ending at `cursor_pos`, with its start offset. Cursor
    /// positions count characters, not bytes, so they are mapped onto char
    /// boundaries before slicing.
    fn prefix_at(code: &str, cursor_pos: usize) -> (usize, &str) {
        let byte_end = code
            .char_indices()
            .nth(cursor_pos)
            .map(|(i, _)| i)
            .unwrap_or(code.len());
        let upto = &code[..byte_end];
        let byte_start = upto
            .char_indices()
            .rev()
            .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_')
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        (upto[..byte_start].chars().count(), &upto[byte_start..])
    }
}

impl ExecutionBackend for CalcBackend {
    fn execute<'a>(
        &'a self,
        code: &'a str,
        io: &'a StdioCapture,
    ) -> BoxFuture<'a, ExecutionOutcome> {
        async move {
            let stmts = match tokenize(code).and_then(|tokens| Parser::new(tokens).parse_program())
            {
                Ok(stmts) => stmts,
                Err(report) => return ExecutionOutcome::Failed(report),
            };

            let mut last_value: Option<f64> = None;
            for stmt in stmts {
                match stmt {
                    Stmt::Assign(name, expr) => match self.eval(&expr) {
                        Ok(value) => {
                            self.variables.lock().unwrap().insert(name, value);
                            last_value = Some(value);
                        }
                        Err(report) => return ExecutionOutcome::Failed(report),
                    },
                    Stmt::Print(expr) => match self.eval(&expr) {
                        Ok(value) => {
                            io.write_stdout(&format!("{}\n", format_number(value)));
                            last_value = None;
                        }
                        Err(report) => return ExecutionOutcome::Failed(report),
                    },
                    Stmt::Sleep(expr) => match self.eval(&expr) {
                        Ok(millis) => {
                            tokio::time::sleep(Duration::from_millis(millis.max(0.0) as u64)).await;
                            last_value = None;
                        }
                        Err(report) => return ExecutionOutcome::Failed(report),
                    },
                    Stmt::Expr(expr) => match self.eval(&expr) {
                        Ok(value) => last_value = Some(value),
                        Err(report) => return ExecutionOutcome::Failed(report),
                    },
                }
            }

            ExecutionOutcome::Success(ExecutionSuccess {
                data: last_value.map(|value| json!({"text/plain": format_number(value)})),
                payloads: Vec::new(),
            })
        }
        .boxed()
    }

    fn language_info(&self) -> LanguageInfo {
        LanguageInfo {
            name: "calc".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            mimetype: "text/plain".to_owned(),
            file_extension: ".calc".to_owned(),
        }
    }

    fn complete(&self, code: &str, cursor_pos: usize) -> CompletionResult {
        let (start, prefix) = Self::prefix_at(code, cursor_pos);
        if prefix.is_empty() {
            return CompletionResult::default();
        }
        let mut matches: Vec<String> = BUILTINS
            .iter()
            .map(|(name, _)| (*name).to_owned())
            .chain(self.variables.lock().unwrap().keys().cloned())
            .filter(|name| name.starts_with(prefix))
            .collect();
        matches.sort();
        matches.dedup();
        CompletionResult {
            matches,
            cursor_start: start,
            cursor_end: cursor_pos,
        }
    }

    fn inspect(&self, code: &str, cursor_pos: usize) -> InspectionResult {
        let (_, name) = Self::prefix_at(code, cursor_pos);
        if let Some((_, doc)) = BUILTINS.iter().find(|(builtin, _)| *builtin == name) {
            return InspectionResult {
                found: true,
                data: json!({"text/plain": doc}),
            };
        }
        if let Some(value) = self.variables.lock().unwrap().get(name) {
            return InspectionResult {
                found: true,
                data: json!({"text/plain": format!("{} = {}", name, format_number(*value))}),
            };
        }
        InspectionResult::default()
    }

    fn is_complete(&self, code: &str) -> Completeness {
        let tokens = match tokenize(code) {
            Ok(tokens) => tokens,
            Err(_) => return Completeness::Invalid,
        };
        let mut depth: i32 = 0;
        for token in &tokens {
            match token {
                Token::LParen => depth += 1,
                Token::RParen => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return Completeness::Invalid;
            }
        }
        if depth > 0 {
            return Completeness::Incomplete;
        }
        match tokens.iter().rev().find(|t| !matches!(t, Token::Separator)) {
            Some(
                Token::Plus
                | Token::Minus
                | Token::Star
                | Token::Slash
                | Token::Percent
                | Token::Caret
                | Token::Assign,
            ) => Completeness::Incomplete,
            _ => Completeness::Complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(backend: &CalcBackend, code: &str) -> ExecutionOutcome {
        let io = StdioCapture::new(true);
        backend.execute(code, &io).await
    }

    fn result_text(outcome: &ExecutionOutcome) -> Option<String> {
        match outcome {
            ExecutionOutcome::Success(success) => success
                .data
                .as_ref()
                .map(|data| data["text/plain"].as_str().unwrap().to_owned()),
            ExecutionOutcome::Failed(_) => None,
        }
    }

    #[tokio::test]
    async fn test_basic_arithmetic() {
        let backend = CalcBackend::new();
        let outcome = run(&backend, "1+1").await;
        assert_eq!(result_text(&outcome), Some("2".to_owned()));
    }

    #[tokio::test]
    async fn test_operator_precedence() {
        let backend = CalcBackend::new();
        assert_eq!(result_text(&run(&backend, "2+3*4").await), Some("14".to_owned()));
        assert_eq!(result_text(&run(&backend, "(2+3)*4").await), Some("20".to_owned()));
        assert_eq!(result_text(&run(&backend, "2^3^2").await), Some("512".to_owned()));
        assert_eq!(result_text(&run(&backend, "-2^2").await), Some("-4".to_owned()));
    }

    #[tokio::test]
    async fn test_variables_persist_across_executions() {
        let backend = CalcBackend::new();
        run(&backend, "x = 6*7").await;
        let outcome = run(&backend, "x").await;
        assert_eq!(result_text(&outcome), Some("42".to_owned()));
    }

    #[tokio::test]
    async fn test_statements_yield_last_value() {
        let backend = CalcBackend::new();
        let outcome = run(&backend, "a = 1; b = 2; a + b").await;
        assert_eq!(result_text(&outcome), Some("3".to_owned()));
    }

    #[tokio::test]
    async fn test_print_writes_to_stdout_and_yields_no_value() {
        let backend = CalcBackend::new();
        let io = StdioCapture::new(true);
        let outcome = backend.execute("print(1+1)", &io).await;
        match outcome {
            ExecutionOutcome::Success(success) => assert!(success.data.is_none()),
            other => panic!("expected success, got {:?}", other),
        }
        let chunks = io.drain();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].1, "2\n");
    }

    #[tokio::test]
    async fn test_division_by_zero_fails() {
        let backend = CalcBackend::new();
        match run(&backend, "1/0").await {
            ExecutionOutcome::Failed(report) => {
                assert_eq!(report.ename, "DivideError");
                assert!(!report.traceback.is_empty());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undefined_variable_fails() {
        let backend = CalcBackend::new();
        match run(&backend, "nope + 1").await {
            ExecutionOutcome::Failed(report) => assert_eq!(report.ename, "UndefVarError"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_parse_error() {
        let backend = CalcBackend::new();
        match run(&backend, "1 +").await {
            ExecutionOutcome::Failed(report) => assert_eq!(report.ename, "ParseError"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fractional_formatting() {
        let backend = CalcBackend::new();
        assert_eq!(result_text(&run(&backend, "5/2").await), Some("2.5".to_owned()));
    }

    #[test]
    fn test_completion_matches_builtins_and_variables() {
        let backend = CalcBackend::new();
        backend.variables.lock().unwrap().insert("price".to_owned(), 1.0);

        let result = backend.complete("pr", 2);
        assert_eq!(result.matches, vec!["price", "print"]);
        assert_eq!(result.cursor_start, 0);
        assert_eq!(result.cursor_end, 2);
    }

    #[test]
    fn test_completion_mid_expression() {
        let backend = CalcBackend::new();
        let result = backend.complete("1 + sl", 6);
        assert_eq!(result.matches, vec!["sleep"]);
        assert_eq!(result.cursor_start, 4);
    }

    #[test]
    fn test_completion_cursor_inside_multibyte_text() {
        let backend = CalcBackend::new();
        // Cursor positions count characters; these must not slice mid-char.
        assert!(backend.complete("é", 1).matches.is_empty());
        let result = backend.complete("é + sl", 6);
        assert_eq!(result.matches, vec!["sleep"]);
        assert_eq!(result.cursor_start, 4);
        assert!(!backend.inspect("é", 1).found);
    }

    #[test]
    fn test_inspect_builtin_and_variable() {
        let backend = CalcBackend::new();
        backend.variables.lock().unwrap().insert("x".to_owned(), 42.0);

        let builtin = backend.inspect("sleep", 5);
        assert!(builtin.found);

        let var = backend.inspect("x", 1);
        assert!(var.found);
        assert_eq!(var.data["text/plain"], "x = 42");

        assert!(!backend.inspect("unknown", 7).found);
    }

    #[test]
    fn test_is_complete() {
        let backend = CalcBackend::new();
        assert_eq!(backend.is_complete("1+1"), Completeness::Complete);
        assert_eq!(backend.is_complete("(1+1"), Completeness::Incomplete);
        assert_eq!(backend.is_complete("1+"), Completeness::Incomplete);
        assert_eq!(backend.is_complete("1)"), Completeness::Invalid);
        assert_eq!(backend.is_complete("1 @ 2"), Completeness::Invalid);
    }
}
