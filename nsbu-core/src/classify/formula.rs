//! Linear formulas over line codes and named references
//!
//! Two operand kinds exist: bare codes (`010 - 011`), used by calculated
//! entries over source amounts, and `@name` references, used by calculated
//! blocks over already computed totals.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sign {
    Plus,
    Minus,
}

impl Sign {
    pub fn apply(self, value: Decimal) -> Decimal {
        match self {
            Sign::Plus => value,
            Sign::Minus => -value,
        }
    }

    pub fn flip(self) -> Sign {
        match self {
            Sign::Plus => Sign::Minus,
            Sign::Minus => Sign::Plus,
        }
    }

    /// `Minus` when `negate` is set, composed with `self`
    pub fn times(self, negate: bool) -> Sign {
        if negate { self.flip() } else { self }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum Operand {
    Code(String),
    Ref(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Term {
    pub sign: Sign,
    pub operand: Operand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub struct Formula {
    pub terms: Vec<Term>,
}

impl Formula {
    pub fn parse(input: &str) -> Result<Self, String> {
        let mut terms = Vec::new();
        let mut chars = input.chars().peekable();
        let mut sign = None;

        while let Some(&ch) = chars.peek() {
            match ch {
                c if c.is_whitespace() => {
                    chars.next();
                }
                '+' | '-' => {
                    chars.next();
                    if sign.is_some() {
                        return Err(format!("repeated sign in '{}'", input));
                    }
                    sign = Some(if ch == '+' { Sign::Plus } else { Sign::Minus });
                }
                '@' => {
                    chars.next();
                    let mut name = String::new();
                    while let Some(&c) = chars.peek() {
                        if c.is_ascii_alphanumeric() || c == '_' {
                            name.push(c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if name.is_empty() {
                        return Err(format!("empty reference name in '{}'", input));
                    }
                    push_term(&mut terms, &mut sign, Operand::Ref(name), input)?;
                }
                c if c.is_ascii_digit() => {
                    let mut code = String::new();
                    while let Some(&c) = chars.peek() {
                        if c.is_ascii_digit() {
                            code.push(c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    push_term(&mut terms, &mut sign, Operand::Code(code), input)?;
                }
                other => {
                    return Err(format!("unexpected character '{}' in '{}'", other, input));
                }
            }
        }

        if sign.is_some() {
            return Err(format!("dangling sign in '{}'", input));
        }
        if terms.is_empty() {
            return Err("empty formula".to_string());
        }
        Ok(Self { terms })
    }

    pub fn evaluate(&self, mut lookup: impl FnMut(&Operand) -> Decimal) -> Decimal {
        self.terms
            .iter()
            .fold(Decimal::ZERO, |acc, t| {
                acc.saturating_add(t.sign.apply(lookup(&t.operand)))
            })
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().filter_map(|t| match &t.operand {
            Operand::Code(c) => Some(c.as_str()),
            Operand::Ref(_) => None,
        })
    }

    pub fn refs(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().filter_map(|t| match &t.operand {
            Operand::Ref(r) => Some(r.as_str()),
            Operand::Code(_) => None,
        })
    }
}

fn push_term(
    terms: &mut Vec<Term>,
    sign: &mut Option<Sign>,
    operand: Operand,
    input: &str,
) -> Result<(), String> {
    let sign = match sign.take() {
        Some(s) => s,
        None if terms.is_empty() => Sign::Plus,
        None => return Err(format!("missing operator before operand in '{}'", input)),
    };
    terms.push(Term { sign, operand });
    Ok(())
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            match (i, term.sign) {
                (0, Sign::Plus) => {}
                (0, Sign::Minus) => f.write_str("-")?,
                (_, Sign::Plus) => f.write_str(" + ")?,
                (_, Sign::Minus) => f.write_str(" - ")?,
            }
            match &term.operand {
                Operand::Code(c) => f.write_str(c)?,
                Operand::Ref(r) => write!(f, "@{}", r)?,
            }
        }
        Ok(())
    }
}

impl From<Formula> for String {
    fn from(formula: Formula) -> Self {
        formula.to_string()
    }
}
