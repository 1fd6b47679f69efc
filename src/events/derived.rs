//! Events computed from several native counters.

#![allow(missing_docs)]

use crate::{Error, Result};
use lazy_static::lazy_static;
use pest::iterators::{Pair, Pairs};
#[allow(deprecated)]
use pest::prec_climber::{Assoc, Operator, PrecClimber};
use pest::Parser;
use pest_derive::*;

/// Helper struct to parse infix formulas.
#[derive(Parser)]
#[grammar = "events/derived.pest"]
struct FormulaParser;

lazy_static! {
    /// `PrecClimber` used internally to parse an infix formula.
    #[allow(deprecated)]
    static ref CLIMBER: PrecClimber<Rule> = {
        PrecClimber::new(vec![
            Operator::new(Rule::add, Assoc::Left) | Operator::new(Rule::sub, Assoc::Left),
            Operator::new(Rule::mul, Assoc::Left) | Operator::new(Rule::div, Assoc::Left),
        ])
    };
}

/// How the natives of an event are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedKind {
    /// Value of the single native.
    NotDerived,
    /// Sum of all natives.
    Add,
    /// Events per second: `N1 * hz / N0`, `N0` counting cycles.
    Ps,
    /// Sum of `N1..` per second, `N0` counting cycles.
    AddPs,
    /// Value of the first native, the others only qualify it.
    Cmpd,
    /// `N0` minus every other native.
    Sub,
    /// Reverse polish formula.
    Postfix,
    /// Infix formula.
    Infix,
}

impl DerivedKind {
    /// Parse the name used in definition files.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "NOT_DERIVED" => DerivedKind::NotDerived,
            "DERIVED_ADD" => DerivedKind::Add,
            "DERIVED_PS" => DerivedKind::Ps,
            "DERIVED_ADD_PS" => DerivedKind::AddPs,
            "DERIVED_CMPD" => DerivedKind::Cmpd,
            "DERIVED_SUB" => DerivedKind::Sub,
            "DERIVED_POSTFIX" => DerivedKind::Postfix,
            "DERIVED_INFIX" => DerivedKind::Infix,
            _ => return None,
        })
    }

    /// Name used in definition files.
    pub fn name(self) -> &'static str {
        match self {
            DerivedKind::NotDerived => "NOT_DERIVED",
            DerivedKind::Add => "DERIVED_ADD",
            DerivedKind::Ps => "DERIVED_PS",
            DerivedKind::AddPs => "DERIVED_ADD_PS",
            DerivedKind::Cmpd => "DERIVED_CMPD",
            DerivedKind::Sub => "DERIVED_SUB",
            DerivedKind::Postfix => "DERIVED_POSTFIX",
            DerivedKind::Infix => "DERIVED_INFIX",
        }
    }

    /// Whether the first native alone identifies overflow of the event.
    pub fn overflows_on_first_native(self) -> bool {
        self == DerivedKind::NotDerived || self == DerivedKind::Cmpd
    }
}

/// Element of a formula in reverse polish order.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Value of native `N<i>`.
    Native(usize),
    /// Literal.
    Const(f64),
    /// Clock rate of the cpu in Hz (`#`).
    Hz,
    Add,
    Sub,
    Mul,
    Div,
}

/// Compiled formula of a `DERIVED_POSTFIX` or `DERIVED_INFIX` event.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    tokens: Vec<Token>,
}

impl Formula {
    /// Parse a `|` separated postfix formula such as `N0|N1|+|`.
    pub fn parse_postfix(input: &str) -> Result<Formula> {
        let tokens = input
            .split('|')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| -> Result<Token> {
                match t {
                    "+" => Ok(Token::Add),
                    "-" => Ok(Token::Sub),
                    "*" => Ok(Token::Mul),
                    "/" => Ok(Token::Div),
                    "#" => Ok(Token::Hz),
                    _ if t.starts_with('N') => Ok(Token::Native(t[1..].parse()?)),
                    _ => Ok(Token::Const(t.parse()?)),
                }
            })
            .collect::<Result<Vec<Token>>>()?;
        let formula = Formula { tokens };
        formula._validate()?;
        Ok(formula)
    }

    /// Parse an infix formula such as `(N0 + N1) / #`.
    pub fn parse_infix(input: &str) -> Result<Formula> {
        let mut pairs = FormulaParser::parse(Rule::formula, input)?;
        let expr = pairs
            .next()
            .and_then(|f| f.into_inner().next())
            .ok_or(Error::Invalid)?;
        let mut tokens = vec![];
        Formula::_compile(expr.into_inner(), &mut tokens)?;
        let formula = Formula { tokens };
        formula._validate()?;
        Ok(formula)
    }

    /// Recursive call transforming parsed `Pair` objects into postfix order.
    #[allow(deprecated)]
    fn _compile(expr: Pairs<Rule>, out: &mut Vec<Token>) -> Result<()> {
        let compiled: Result<Vec<Token>> = CLIMBER.climb(
            expr,
            |pair: Pair<Rule>| -> Result<Vec<Token>> {
                match pair.as_rule() {
                    Rule::num => Ok(vec![Token::Const(pair.as_str().parse()?)]),
                    Rule::native => Ok(vec![Token::Native(pair.as_str()[1..].parse()?)]),
                    Rule::hz => Ok(vec![Token::Hz]),
                    Rule::expr => {
                        let mut inner = vec![];
                        Formula::_compile(pair.into_inner(), &mut inner)?;
                        Ok(inner)
                    }
                    _ => Err(Error::Invalid),
                }
            },
            |lhs: Result<Vec<Token>>, op: Pair<Rule>, rhs: Result<Vec<Token>>| -> Result<Vec<Token>> {
                let mut lhs = lhs?;
                lhs.extend(rhs?);
                lhs.push(match op.as_rule() {
                    Rule::add => Token::Add,
                    Rule::sub => Token::Sub,
                    Rule::mul => Token::Mul,
                    Rule::div => Token::Div,
                    _ => return Err(Error::Invalid),
                });
                Ok(lhs)
            },
        );
        out.extend(compiled?);
        Ok(())
    }

    /// Check the formula leaves exactly one value on the stack.
    fn _validate(&self) -> Result<()> {
        let mut depth = 0usize;
        for t in &self.tokens {
            match t {
                Token::Native(_) | Token::Const(_) | Token::Hz => depth += 1,
                _ if depth >= 2 => depth -= 1,
                _ => return Err(Error::Invalid),
            }
        }
        if depth == 1 {
            Ok(())
        } else {
            Err(Error::Invalid)
        }
    }

    /// Highest native operand referenced.
    pub fn max_operand(&self) -> Option<usize> {
        self.tokens
            .iter()
            .filter_map(|t| match t {
                Token::Native(i) => Some(*i),
                _ => None,
            })
            .max()
    }

    /// The formula in `|` separated postfix notation.
    pub fn to_postfix(&self) -> String {
        self.tokens
            .iter()
            .map(|t| match t {
                Token::Native(i) => format!("N{}|", i),
                Token::Const(c) => format!("{}|", c),
                Token::Hz => "#|".into(),
                Token::Add => "+|".into(),
                Token::Sub => "-|".into(),
                Token::Mul => "*|".into(),
                Token::Div => "/|".into(),
            })
            .collect()
    }

    /// Evaluate with `values[i]` bound to `N<i>`.
    pub fn evaluate(&self, values: &[i64], hz: f64) -> i64 {
        let mut stack: Vec<f64> = Vec::with_capacity(self.tokens.len());
        for t in &self.tokens {
            let v = match t {
                Token::Native(i) => values.get(*i).copied().unwrap_or(0) as f64,
                Token::Const(c) => *c,
                Token::Hz => hz,
                op => {
                    let b = stack.pop().unwrap_or(0.0);
                    let a = stack.pop().unwrap_or(0.0);
                    match op {
                        Token::Add => a + b,
                        Token::Sub => a - b,
                        Token::Mul => a * b,
                        _ if b == 0.0 => 0.0,
                        _ => a / b,
                    }
                }
            };
            stack.push(v);
        }
        stack.pop().unwrap_or(0.0) as i64
    }
}

/// Recipe combining the native counts of an event into its value.
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    /// Combination rule.
    pub kind: DerivedKind,
    /// Formula for postfix and infix events.
    pub formula: Option<Formula>,
}

impl Default for Derived {
    fn default() -> Self {
        Derived {
            kind: DerivedKind::NotDerived,
            formula: None,
        }
    }
}

impl Derived {
    /// Combine native counts, `hz` being the clock rate used by per second kinds.
    pub fn evaluate(&self, values: &[i64], hz: f64) -> i64 {
        let per_second = |units: i64, cycles: i64| -> i64 {
            if cycles == 0 {
                0
            } else {
                (units as f64 * hz / cycles as f64) as i64
            }
        };
        let first = values.first().copied().unwrap_or(0);
        match self.kind {
            DerivedKind::NotDerived | DerivedKind::Cmpd => first,
            DerivedKind::Add => values.iter().sum(),
            DerivedKind::Sub => first - values.iter().skip(1).sum::<i64>(),
            DerivedKind::Ps => per_second(values.get(1).copied().unwrap_or(0), first),
            DerivedKind::AddPs => per_second(values.iter().skip(1).sum(), first),
            DerivedKind::Postfix | DerivedKind::Infix => self
                .formula
                .as_ref()
                .map(|f| f.evaluate(values, hz))
                .unwrap_or(0),
        }
    }
}
