//! Formal s-expression syntax shared by facts, queries, rules and proofs.
//!
//! The oracle speaks this syntax when it translates natural language:
//! fact records look like `(: SYMPTOM1 (Presents patient1 fever))`, queries like
//! `(bc (DiagnosedWith $patient asthma))`. Symbols starting with `$` are
//! variables.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FormalError, FormalResult};

/// A parsed s-expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sexp {
    Symbol(String),
    List(Vec<Sexp>),
}

impl Sexp {
    /// Parse exactly one s-expression from `input`.
    ///
    /// A leading `!` (the "evaluate" marker some oracles prepend) is ignored.
    pub fn parse(input: &str) -> FormalResult<Self> {
        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix('!').unwrap_or(trimmed);
        let tokens = tokenize(trimmed);
        if tokens.is_empty() {
            return Err(FormalError::Empty);
        }
        let mut pos = 0;
        let expr = parse_tokens(&tokens, &mut pos)?;
        if pos < tokens.len() {
            let rest = tokens[pos..]
                .iter()
                .map(|t| t.text)
                .collect::<Vec<_>>()
                .join(" ");
            return Err(FormalError::Trailing { rest });
        }
        Ok(expr)
    }

    /// The symbol text, if this is a symbol.
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Sexp::Symbol(s) => Some(s),
            Sexp::List(_) => None,
        }
    }

    /// The list items, if this is a list.
    pub fn as_list(&self) -> Option<&[Sexp]> {
        match self {
            Sexp::List(items) => Some(items),
            Sexp::Symbol(_) => None,
        }
    }

    /// Head symbol of a list, if any.
    pub fn head(&self) -> Option<&str> {
        self.as_list()?.first()?.as_symbol()
    }
}

impl fmt::Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexp::Symbol(s) => f.write_str(s),
            Sexp::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}

struct Token<'a> {
    text: &'a str,
    offset: usize,
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in input.char_indices() {
        match c {
            '(' | ')' => {
                if let Some(s) = start.take() {
                    tokens.push(Token {
                        text: &input[s..i],
                        offset: s,
                    });
                }
                tokens.push(Token {
                    text: &input[i..i + 1],
                    offset: i,
                });
            }
            c if c.is_whitespace() => {
                if let Some(s) = start.take() {
                    tokens.push(Token {
                        text: &input[s..i],
                        offset: s,
                    });
                }
            }
            _ => {
                if start.is_none() {
                    start = Some(i);
                }
            }
        }
    }
    if let Some(s) = start {
        tokens.push(Token {
            text: &input[s..],
            offset: s,
        });
    }
    tokens
}

fn parse_tokens(tokens: &[Token<'_>], pos: &mut usize) -> FormalResult<Sexp> {
    let Some(tok) = tokens.get(*pos) else {
        return Err(FormalError::Empty);
    };
    *pos += 1;
    match tok.text {
        "(" => {
            let mut items = Vec::new();
            loop {
                match tokens.get(*pos) {
                    None => return Err(FormalError::Unbalanced { offset: tok.offset }),
                    Some(t) if t.text == ")" => {
                        *pos += 1;
                        return Ok(Sexp::List(items));
                    }
                    Some(_) => items.push(parse_tokens(tokens, pos)?),
                }
            }
        }
        ")" => Err(FormalError::Unbalanced { offset: tok.offset }),
        text => Ok(Sexp::Symbol(text.to_string())),
    }
}

/// Strip markdown code fences and surrounding backticks from oracle output.
pub fn strip_markup(raw: &str) -> String {
    let mut lines: Vec<&str> = raw
        .lines()
        .filter(|l| !l.trim_start().starts_with("```"))
        .collect();
    while lines.first().is_some_and(|l| l.trim().is_empty()) {
        lines.remove(0);
    }
    lines.join("\n").trim().trim_matches('`').trim().to_string()
}

// ---------------------------------------------------------------------------
// Terms and atoms
// ---------------------------------------------------------------------------

/// An argument of an atom: a constant token or a `$variable`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    Const(String),
    Var(String),
}

impl Term {
    /// Classify a symbol: `$name` is a variable, anything else a constant.
    pub fn from_symbol(symbol: &str) -> Self {
        match symbol.strip_prefix('$') {
            Some(name) => Term::Var(name.to_string()),
            None => Term::Const(symbol.to_string()),
        }
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Term::Var(_))
    }

    /// The constant text, if ground.
    pub fn as_const(&self) -> Option<&str> {
        match self {
            Term::Const(c) => Some(c),
            Term::Var(_) => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Const(c) => f.write_str(c),
            Term::Var(v) => write!(f, "${v}"),
        }
    }
}

/// A flat predicate application: `(Functor arg...)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Atom {
    pub functor: String,
    pub args: Vec<Term>,
}

impl Atom {
    pub fn new(functor: impl Into<String>, args: Vec<Term>) -> Self {
        Self {
            functor: functor.into(),
            args,
        }
    }

    /// Build a ground atom from constant tokens.
    pub fn ground(functor: impl Into<String>, args: &[&str]) -> Self {
        Self::new(
            functor,
            args.iter().map(|a| Term::Const((*a).to_string())).collect(),
        )
    }

    /// Parse an atom from text, e.g. `(DiagnosedWith $patient copd)`.
    ///
    /// A bare space-separated form without parentheses is also accepted.
    pub fn parse(input: &str) -> FormalResult<Self> {
        let trimmed = input.trim();
        if trimmed.starts_with('(') || trimmed.starts_with('!') {
            Self::from_sexp(&Sexp::parse(trimmed)?)
        } else {
            Self::from_sexp(&Sexp::parse(&format!("({trimmed})"))?)
        }
    }

    /// Convert a list of symbols into an atom.
    pub fn from_sexp(expr: &Sexp) -> FormalResult<Self> {
        let not_atom = || FormalError::NotAnAtom {
            expr: expr.to_string(),
        };
        let items = expr.as_list().ok_or_else(not_atom)?;
        let (head, rest) = items.split_first().ok_or_else(not_atom)?;
        let functor = head.as_symbol().ok_or_else(not_atom)?;
        if functor.starts_with('$') {
            return Err(not_atom());
        }
        let args = rest
            .iter()
            .map(|a| a.as_symbol().map(Term::from_symbol).ok_or_else(not_atom))
            .collect::<FormalResult<Vec<_>>>()?;
        Ok(Self::new(functor, args))
    }

    /// Whether every argument is a constant.
    pub fn is_ground(&self) -> bool {
        self.args.iter().all(|a| !a.is_var())
    }

    /// Variable names occurring in this atom.
    pub fn vars(&self) -> BTreeSet<&str> {
        self.args
            .iter()
            .filter_map(|a| match a {
                Term::Var(v) => Some(v.as_str()),
                Term::Const(_) => None,
            })
            .collect()
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.functor)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        f.write_str(")")
    }
}
