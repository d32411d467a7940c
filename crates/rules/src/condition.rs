//! Condition expressions combining named selections.
//!
//! Grammar (keywords are case-insensitive):
//!
//! ```text
//! expr    := or
//! or      := and ( "or" and )*
//! and     := not ( "and" not )*
//! not     := "not" not | primary
//! primary := "(" expr ")"
//!          | ( "1" | "any" | "all" ) "of" ( NAME | PREFIX* | "them" )
//!          | NAME
//! ```
//!
//! Names are resolved to selection indices at compile time, so an unknown
//! name is a load error rather than a silent non-match.

use crate::error::{Result, RuleError};

/// A compiled condition over selection indices.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Selection(usize),
    Not(Box<Condition>),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    /// Evaluate with a callback that reports whether selection `i` matched.
    pub fn eval(&self, selection: &mut impl FnMut(usize) -> bool) -> bool {
        match self {
            Self::Selection(i) => selection(*i),
            Self::Not(inner) => !inner.eval(selection),
            Self::And(parts) => parts.iter().all(|c| c.eval(selection)),
            Self::Or(parts) => parts.iter().any(|c| c.eval(selection)),
        }
    }

    /// Parse `expr` against the given selection names.
    pub fn parse(expr: &str, names: &[String]) -> Result<Self> {
        let tokens = tokenize(expr)?;
        if tokens.is_empty() {
            return Err(RuleError::Condition("empty condition".into()));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            names,
        };
        let condition = parser.or()?;
        if let Some(token) = parser.peek() {
            return Err(RuleError::Condition(format!(
                "unexpected {token:?} in '{expr}'"
            )));
        }
        Ok(condition)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    OneOf,
    AllOf,
    Name(String),
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let mut words = Vec::new();
    let mut current = String::new();

    for ch in expr.chars() {
        match ch {
            '(' | ')' => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
                words.push(ch.to_string());
            }
            '|' => {
                return Err(RuleError::Condition(format!(
                    "aggregation expressions are not supported: '{expr}'"
                )))
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }

    let mut tokens = Vec::with_capacity(words.len());
    let mut iter = words.into_iter().peekable();
    while let Some(word) = iter.next() {
        let lower = word.to_ascii_lowercase();
        let followed_by_of = iter
            .peek()
            .map(|next| next.eq_ignore_ascii_case("of"))
            .unwrap_or(false);

        let token = match lower.as_str() {
            "(" => Token::LParen,
            ")" => Token::RParen,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "1" | "any" if followed_by_of => {
                iter.next();
                Token::OneOf
            }
            "all" if followed_by_of => {
                iter.next();
                Token::AllOf
            }
            _ => Token::Name(word),
        };
        tokens.push(token);
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    names: &'a [String],
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn or(&mut self) -> Result<Condition> {
        let mut parts = vec![self.and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            parts.push(self.and()?);
        }
        Ok(collapse(parts, Condition::Or))
    }

    fn and(&mut self) -> Result<Condition> {
        let mut parts = vec![self.not()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            parts.push(self.not()?);
        }
        Ok(collapse(parts, Condition::And))
    }

    fn not(&mut self) -> Result<Condition> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Condition::Not(Box::new(self.not()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Condition> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    other => Err(RuleError::Condition(format!(
                        "expected ')', found {other:?}"
                    ))),
                }
            }
            Some(Token::OneOf) => Ok(collapse(self.quantified()?, Condition::Or)),
            Some(Token::AllOf) => Ok(collapse(self.quantified()?, Condition::And)),
            Some(Token::Name(name)) => self.lookup(&name).map(Condition::Selection),
            other => Err(RuleError::Condition(format!(
                "expected selection name, found {other:?}"
            ))),
        }
    }

    /// Selections targeted by `1 of` / `all of`.
    fn quantified(&mut self) -> Result<Vec<Condition>> {
        let target = match self.next() {
            Some(Token::Name(name)) => name,
            other => {
                return Err(RuleError::Condition(format!(
                    "expected selection pattern after 'of', found {other:?}"
                )))
            }
        };

        let indices: Vec<usize> = if target.eq_ignore_ascii_case("them") {
            // Underscore-prefixed selections are helpers, excluded from `them`.
            self.names
                .iter()
                .enumerate()
                .filter(|(_, n)| !n.starts_with('_'))
                .map(|(i, _)| i)
                .collect()
        } else if let Some(prefix) = target.strip_suffix('*') {
            self.names
                .iter()
                .enumerate()
                .filter(|(_, n)| n.starts_with(prefix))
                .map(|(i, _)| i)
                .collect()
        } else {
            vec![self.lookup(&target)?]
        };

        if indices.is_empty() {
            return Err(RuleError::Condition(format!(
                "'{target}' matches no selection"
            )));
        }
        Ok(indices.into_iter().map(Condition::Selection).collect())
    }

    fn lookup(&self, name: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| RuleError::Condition(format!("unknown selection '{name}'")))
    }
}

fn collapse(mut parts: Vec<Condition>, combine: fn(Vec<Condition>) -> Condition) -> Condition {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        combine(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn eval(condition: &Condition, matched: &[usize]) -> bool {
        condition.eval(&mut |i| matched.contains(&i))
    }

    #[test]
    fn single_name() {
        let c = Condition::parse("selection", &names(&["selection"])).unwrap();
        assert_eq!(c, Condition::Selection(0));
    }

    #[test]
    fn precedence_not_and_or() {
        let n = names(&["a", "b", "c"]);
        // a or (b and not c)
        let c = Condition::parse("a or b and not c", &n).unwrap();
        assert!(eval(&c, &[0]));
        assert!(eval(&c, &[1]));
        assert!(!eval(&c, &[1, 2]));
        assert!(!eval(&c, &[]));
    }

    #[test]
    fn parentheses_override_precedence() {
        let n = names(&["a", "b", "c"]);
        let c = Condition::parse("(a or b) and not c", &n).unwrap();
        assert!(eval(&c, &[0]));
        assert!(!eval(&c, &[0, 2]));
    }

    #[test]
    fn quantifiers() {
        let n = names(&["sel_brand", "sel_word", "filter", "_helper"]);

        let one = Condition::parse("1 of sel_*", &n).unwrap();
        assert!(eval(&one, &[1]));
        assert!(!eval(&one, &[2]));

        let all = Condition::parse("all of sel_* and not filter", &n).unwrap();
        assert!(eval(&all, &[0, 1]));
        assert!(!eval(&all, &[0]));
        assert!(!eval(&all, &[0, 1, 2]));

        let them = Condition::parse("all of them", &n).unwrap();
        assert!(eval(&them, &[0, 1, 2]));

        let any = Condition::parse("ANY OF them", &n).unwrap();
        assert!(!eval(&any, &[3]));
    }

    #[test]
    fn unknown_selection_is_an_error() {
        let err = Condition::parse("a and missing", &names(&["a"])).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn pattern_without_matches_is_an_error() {
        assert!(Condition::parse("1 of nothing*", &names(&["a"])).is_err());
    }

    #[test]
    fn aggregations_are_rejected() {
        let err = Condition::parse("a | count() > 5", &names(&["a"])).unwrap_err();
        assert!(err.to_string().contains("aggregation"));
    }

    #[test]
    fn dangling_tokens_are_rejected() {
        let n = names(&["a", "b"]);
        assert!(Condition::parse("a b", &n).is_err());
        assert!(Condition::parse("(a or b", &n).is_err());
        assert!(Condition::parse("", &n).is_err());
    }
}
