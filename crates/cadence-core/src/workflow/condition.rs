//! Guard expressions for conditional steps.
//!
//! A guard is a conjunction of comparisons between a variable path and a
//! literal:
//!
//! ```text
//! priority == 'high' && ${task.estimate} <= 8 and approved == true
//! ```
//!
//! Paths may be bare (`task.estimate`) or wrapped (`${task.estimate}`).
//! Literals are numbers, single- or double-quoted strings, `true`, `false`,
//! and `null`. There is no `||`, no negation, no grouping, and nothing is
//! ever executed: guards are parsed into a small AST and interpreted.
//!
//! Evaluation fails closed. A missing variable or an ordering comparison
//! between mismatched types makes the whole guard `false`.

use std::fmt;
use std::str::FromStr;

use cadence_types::workflow::Variables;
use serde_json::Value;

use super::binder;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Reasons a guard expression fails to parse.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GuardError {
    #[error("guard expression is empty")]
    Empty,

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string literal starting at position {pos}")]
    UnterminatedString { pos: usize },

    #[error("unterminated '${{' placeholder starting at position {pos}")]
    UnterminatedPlaceholder { pos: usize },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("expected {expected}, found {found}")]
    Expected {
        expected: &'static str,
        found: String,
    },
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn is_ordering(self) -> bool {
        matches!(self, CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{n}"),
            Literal::Text(s) => write!(f, "'{s}'"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Null => f.write_str("null"),
        }
    }
}

/// One `path <op> literal` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub path: String,
    pub op: CompareOp,
    pub literal: Literal,
}

impl Comparison {
    fn evaluate(&self, variables: &Variables) -> bool {
        let Some(actual) = binder::lookup(variables, &self.path) else {
            tracing::warn!(path = %self.path, "guard references missing variable; treating as false");
            return false;
        };

        if self.op.is_ordering() {
            let ordering = match (actual, &self.literal) {
                (Value::Number(n), Literal::Number(l)) => {
                    n.as_f64().and_then(|n| n.partial_cmp(l))
                }
                (Value::String(s), Literal::Text(l)) => Some(s.as_str().cmp(l.as_str())),
                _ => None,
            };
            let Some(ordering) = ordering else {
                tracing::warn!(
                    path = %self.path,
                    op = %self.op,
                    literal = %self.literal,
                    "guard compares incompatible types; treating as false"
                );
                return false;
            };
            return match self.op {
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Le => ordering.is_le(),
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Ge => ordering.is_ge(),
                CompareOp::Eq | CompareOp::Ne => false,
            };
        }

        let equal = match (actual, &self.literal) {
            (Value::Number(n), Literal::Number(l)) => n.as_f64() == Some(*l),
            (Value::String(s), Literal::Text(l)) => s == l,
            (Value::Bool(b), Literal::Bool(l)) => b == l,
            (Value::Null, Literal::Null) => true,
            _ => false,
        };
        if self.op == CompareOp::Eq { equal } else { !equal }
    }
}

/// A parsed guard: every clause must hold.
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    clauses: Vec<Comparison>,
}

impl Guard {
    pub fn parse(expr: &str) -> Result<Self, GuardError> {
        let tokens = tokenize(expr)?;
        if tokens.is_empty() {
            return Err(GuardError::Empty);
        }
        let mut tokens = tokens.into_iter();
        let mut clauses = Vec::new();
        loop {
            let path = match tokens.next() {
                Some(Token::Path(p)) => p,
                other => return Err(expected("a variable path", other)),
            };
            let op = match tokens.next() {
                Some(Token::Op(op)) => op,
                other => return Err(expected("a comparison operator", other)),
            };
            let literal = match tokens.next() {
                Some(Token::Lit(l)) => l,
                other => return Err(expected("a literal", other)),
            };
            clauses.push(Comparison { path, op, literal });

            match tokens.next() {
                None => break,
                Some(Token::And) => continue,
                other => return Err(expected("'&&' or end of expression", other)),
            }
        }
        Ok(Self { clauses })
    }

    pub fn clauses(&self) -> &[Comparison] {
        &self.clauses
    }

    pub fn evaluate(&self, variables: &Variables) -> bool {
        self.clauses.iter().all(|c| c.evaluate(variables))
    }
}

impl FromStr for Guard {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Guard::parse(s)
    }
}

/// Parse and evaluate in one go. Unparsable guards evaluate to `false`.
pub fn evaluate(expr: &str, variables: &Variables) -> bool {
    match Guard::parse(expr) {
        Ok(guard) => guard.evaluate(variables),
        Err(e) => {
            tracing::warn!(expr, error = %e, "guard failed to parse; treating as false");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Op(CompareOp),
    Lit(Literal),
    And,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Path(p) => write!(f, "path '{p}'"),
            Token::Op(op) => write!(f, "operator '{op}'"),
            Token::Lit(l) => write!(f, "literal {l}"),
            Token::And => f.write_str("'&&'"),
        }
    }
}

fn expected(what: &'static str, found: Option<Token>) -> GuardError {
    GuardError::Expected {
        expected: what,
        found: found.map_or_else(|| "end of expression".to_string(), |t| t.to_string()),
    }
}

fn tokenize(expr: &str) -> Result<Vec<Token>, GuardError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '$' if next == Some('{') => {
                let start = i;
                let close = chars[i + 2..]
                    .iter()
                    .position(|&ch| ch == '}')
                    .ok_or(GuardError::UnterminatedPlaceholder { pos: start })?;
                let path: String = chars[i + 2..i + 2 + close].iter().collect();
                tokens.push(Token::Path(path.trim().to_string()));
                i += close + 3;
            }
            '\'' | '"' => {
                let start = i;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(GuardError::UnterminatedString { pos: start }),
                        Some('\\') => {
                            if let Some(&escaped) = chars.get(i + 1) {
                                text.push(escaped);
                            }
                            i += 2;
                        }
                        Some(&ch) if ch == c => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Lit(Literal::Text(text)));
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
            }
            '<' | '>' => {
                let with_eq = next == Some('=');
                let op = match (c, with_eq) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    ('>', false) => CompareOp::Gt,
                    _ => CompareOp::Ge,
                };
                tokens.push(Token::Op(op));
                i += if with_eq { 2 } else { 1 };
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while let Some(&ch) = chars.get(i) {
                    let sign_after_exponent =
                        (ch == '+' || ch == '-') && matches!(chars[i - 1], 'e' | 'E');
                    if ch.is_ascii_digit() || ch == '.' || ch == 'e' || ch == 'E' || sign_after_exponent {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| GuardError::InvalidNumber(text.clone()))?;
                tokens.push(Token::Lit(Literal::Number(n)));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while let Some(&ch) = chars.get(i) {
                    if ch.is_alphanumeric() || ch == '_' || ch == '.' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.as_str() {
                    w if w.eq_ignore_ascii_case("and") => Token::And,
                    "true" => Token::Lit(Literal::Bool(true)),
                    "false" => Token::Lit(Literal::Bool(false)),
                    "null" => Token::Lit(Literal::Null),
                    _ => Token::Path(word),
                };
                tokens.push(token);
            }
            other => return Err(GuardError::UnexpectedChar { ch: other, pos: i }),
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Variables {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    #[test]
    fn parses_conjunction_with_both_spellings() {
        let guard = Guard::parse("a == 1 && ${b.c} != 'x' and d >= -2.5").unwrap();
        let clauses = guard.clauses();
        assert_eq!(clauses.len(), 3);
        assert_eq!(clauses[0].path, "a");
        assert_eq!(clauses[1].path, "b.c");
        assert_eq!(clauses[1].literal, Literal::Text("x".to_string()));
        assert_eq!(clauses[2].op, CompareOp::Ge);
        assert_eq!(clauses[2].literal, Literal::Number(-2.5));
    }

    #[test]
    fn strict_equality_spelling_is_accepted() {
        let guard: Guard = "status === 'open' && n !== 3".parse().unwrap();
        assert_eq!(guard.clauses()[0].op, CompareOp::Eq);
        assert_eq!(guard.clauses()[1].op, CompareOp::Ne);
    }

    #[test]
    fn rejects_malformed_guards() {
        assert_eq!(Guard::parse("   "), Err(GuardError::Empty));
        assert!(matches!(
            Guard::parse("a == 'open"),
            Err(GuardError::UnterminatedString { .. })
        ));
        assert!(matches!(
            Guard::parse("${a == 1"),
            Err(GuardError::UnterminatedPlaceholder { .. })
        ));
        assert!(matches!(
            Guard::parse("a || b"),
            Err(GuardError::UnexpectedChar { ch: '|', .. })
        ));
        assert!(matches!(
            Guard::parse("a == 1 &&"),
            Err(GuardError::Expected { .. })
        ));
        assert!(matches!(
            Guard::parse("a b"),
            Err(GuardError::Expected { .. })
        ));
        assert!(matches!(
            Guard::parse("1 == a"),
            Err(GuardError::Expected { .. })
        ));
    }

    #[test]
    fn rejects_code_like_input() {
        assert!(Guard::parse("process.exit(1)").is_err());
        assert!(Guard::parse("a == 1; drop()").is_err());
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    #[test]
    fn equality_across_types() {
        let v = vars(json!({ "p": "high", "n": 5, "ok": true, "gone": null }));
        assert!(evaluate("p == 'high'", &v));
        assert!(evaluate("p == \"high\"", &v));
        assert!(evaluate("n == 5", &v));
        assert!(evaluate("n == 5.0", &v));
        assert!(evaluate("ok == true", &v));
        assert!(evaluate("gone == null", &v));
        assert!(evaluate("p != 'low'", &v));
        assert!(!evaluate("n == '5'", &v));
        assert!(evaluate("n != '5'", &v));
    }

    #[test]
    fn ordering_numbers_and_strings() {
        let v = vars(json!({ "n": 5, "s": "beta" }));
        assert!(evaluate("n < 6 && n <= 5 && n > 4 && n >= 5", &v));
        assert!(!evaluate("n > 5", &v));
        assert!(evaluate("s > 'alpha'", &v));
        assert!(!evaluate("s < 'alpha'", &v));
    }

    #[test]
    fn ordering_mismatched_types_is_false() {
        let v = vars(json!({ "n": 5, "s": "10" }));
        assert!(!evaluate("s < 20", &v));
        assert!(!evaluate("n > 'a'", &v));
    }

    #[test]
    fn missing_variable_fails_closed() {
        let v = vars(json!({ "a": 1 }));
        assert!(!evaluate("missing == 1", &v));
        assert!(!evaluate("missing != 1", &v));
        assert!(!evaluate("a == 1 && missing == 1", &v));
    }

    #[test]
    fn nested_and_wrapped_paths() {
        let v = vars(json!({ "task": { "priority": "high", "tags": ["x", "y"] } }));
        assert!(evaluate("${task.priority} == 'high'", &v));
        assert!(evaluate("task.tags.1 == 'y'", &v));
    }

    #[test]
    fn unparsable_guard_evaluates_false() {
        let v = vars(json!({ "a": 1 }));
        assert!(!evaluate("a ==", &v));
    }

    #[test]
    fn escaped_quotes_in_strings() {
        let v = vars(json!({ "title": "it's done" }));
        assert!(evaluate(r"title == 'it\'s done'", &v));
    }
}
