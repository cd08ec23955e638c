//! Restricted condition grammar for rule scoping.
//!
//! A condition is a chain of comparisons `<identifier> <op> <literal>`
//! joined with `and` / `or`, where `and` binds tighter. Conditions are
//! parsed into an explicit [`Condition`] tree when the rule file is loaded
//! and evaluated against [`AttrRecord`]s afterwards; they are never handed
//! to the host language. The grammar has no parentheses, arithmetic, or
//! function calls on purpose.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use cityweave_rules_models::{BuildingClass, HouseholdType};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Comparison operators allowed in conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

impl CompareOp {
    /// The operator as written in rule files.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }

    #[allow(clippy::float_cmp)]
    fn holds_f64(self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Eq => left == right,
            Self::Ne => left != right,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Numeric literal, always carried as `f64`.
    Number(f64),
    /// Text literal, either a bare word or a quoted string.
    Text(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(text) => {
                let bare = !text.is_empty()
                    && text
                        .chars()
                        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
                if bare {
                    f.write_str(text)
                } else {
                    write!(f, "\"{text}\"")
                }
            }
        }
    }
}

/// Parsed condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// A single comparison.
    Compare {
        /// Attribute name resolved against the record at evaluation time.
        identifier: String,
        /// Comparison operator.
        op: CompareOp,
        /// Literal to compare against.
        literal: Literal,
    },
    /// All children must hold (`and`).
    All(Vec<Self>),
    /// At least one child must hold (`or`).
    Any(Vec<Self>),
}

impl Condition {
    /// Evaluates the condition against an attribute record.
    ///
    /// `and` / `or` short-circuit left to right, so an error in a branch
    /// that is never reached does not surface.
    ///
    /// # Errors
    ///
    /// Returns an error if an identifier is missing from the record, an
    /// ordering operator is applied to text, or the record value and the
    /// literal have different types. There is no silent default.
    pub fn evaluate(&self, record: &AttrRecord) -> Result<bool, EvaluationError> {
        match self {
            Self::All(children) => {
                for child in children {
                    if !child.evaluate(record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any(children) => {
                for child in children {
                    if child.evaluate(record)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Compare {
                identifier,
                op,
                literal,
            } => {
                let value =
                    record
                        .get(identifier)
                        .ok_or_else(|| EvaluationError::UnknownIdentifier {
                            identifier: identifier.clone(),
                        })?;
                match (value, literal) {
                    (AttrValue::Number(left), Literal::Number(right)) => {
                        Ok(op.holds_f64(*left, *right))
                    }
                    (AttrValue::Text(left), Literal::Text(right)) => match op {
                        CompareOp::Eq => Ok(left == right),
                        CompareOp::Ne => Ok(left != right),
                        other => Err(EvaluationError::OrderingOnText {
                            identifier: identifier.clone(),
                            op: *other,
                        }),
                    },
                    (AttrValue::Number(_), Literal::Text(_)) => {
                        Err(EvaluationError::TypeMismatch {
                            identifier: identifier.clone(),
                            found: "number",
                            expected: "text",
                        })
                    }
                    (AttrValue::Text(_), Literal::Number(_)) => {
                        Err(EvaluationError::TypeMismatch {
                            identifier: identifier.clone(),
                            found: "text",
                            expected: "number",
                        })
                    }
                }
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare {
                identifier,
                op,
                literal,
            } => write!(f, "{identifier} {op} {literal}"),
            Self::All(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    write!(f, "{child}")?;
                }
                Ok(())
            }
            Self::Any(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" or ")?;
                    }
                    write!(f, "{child}")?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for Condition {
    type Err = ConditionParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(input)?;
        Parser { tokens, pos: 0 }.parse()
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Error raised while parsing a condition string. Surfaces as a fatal
/// configuration error when the rule file is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionParseError {
    /// The condition string held no tokens.
    #[error("condition is empty")]
    Empty,
    /// A quoted literal was never closed.
    #[error("unterminated string literal")]
    UnterminatedString,
    /// A character outside the grammar was encountered.
    #[error("unexpected character '{0}' in condition")]
    UnexpectedCharacter(char),
    /// An operator-like token that is not one of `< <= > >= == !=`.
    #[error("invalid operator '{0}'")]
    InvalidOperator(String),
    /// A numeric literal failed to parse.
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    /// An identifier was expected at this position.
    #[error("expected identifier, found {0}")]
    ExpectedIdentifier(String),
    /// A comparison operator was expected after an identifier.
    #[error("expected comparison operator after '{0}'")]
    ExpectedOperator(String),
    /// A literal was expected after a comparison operator.
    #[error("expected literal in comparison on '{0}'")]
    ExpectedLiteral(String),
    /// Input continued past a complete condition.
    #[error("unexpected trailing input starting at {0}")]
    Trailing(String),
}

/// A value carried by an [`AttrRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Numeric attribute.
    Number(f64),
    /// Textual attribute.
    Text(String),
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<u32> for AttrValue {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<BuildingClass> for AttrValue {
    fn from(value: BuildingClass) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<HouseholdType> for AttrValue {
    fn from(value: HouseholdType) -> Self {
        Self::Text(value.to_string())
    }
}

/// Named attributes of one evaluation target (a building, a street, or a
/// household+building pair).
#[derive(Debug, Clone, Default)]
pub struct AttrRecord {
    values: BTreeMap<String, AttrValue>,
}

impl AttrRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts or replaces an attribute.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.values.insert(name.into(), value.into());
    }

    /// Looks up an attribute by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }
}

/// Error raised while evaluating a condition against a record. Per-rule
/// fail-soft: callers skip the rule and log, they do not abort the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    /// The condition references an attribute the record does not carry.
    #[error("unknown identifier '{identifier}'")]
    UnknownIdentifier {
        /// The missing attribute name.
        identifier: String,
    },
    /// Ordering operators are only defined for numbers.
    #[error("cannot apply '{op}' to text attribute '{identifier}'")]
    OrderingOnText {
        /// The attribute being compared.
        identifier: String,
        /// The ordering operator that was applied.
        op: CompareOp,
    },
    /// The record value and the literal have different types.
    #[error("type mismatch on '{identifier}': record has {found}, literal is {expected}")]
    TypeMismatch {
        /// The attribute being compared.
        identifier: String,
        /// Type found in the record.
        found: &'static str,
        /// Type of the literal.
        expected: &'static str,
    },
}

// ── Tokenizer ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    And,
    Or,
    Op(CompareOp),
    Number(f64),
    Text(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Ident(word) => format!("'{word}'"),
            Self::And => "'and'".to_string(),
            Self::Or => "'or'".to_string(),
            Self::Op(op) => format!("'{op}'"),
            Self::Number(value) => format!("'{value}'"),
            Self::Text(text) => format!("\"{text}\""),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConditionParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
        } else if ch == '"' || ch == '\'' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            for next in chars.by_ref() {
                if next == ch {
                    closed = true;
                    break;
                }
                text.push(next);
            }
            if !closed {
                return Err(ConditionParseError::UnterminatedString);
            }
            tokens.push(Token::Text(text));
        } else if matches!(ch, '<' | '>' | '=' | '!') {
            let mut op = String::new();
            while let Some(&next) = chars.peek() {
                if matches!(next, '<' | '>' | '=' | '!') {
                    op.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            let parsed = match op.as_str() {
                "<" => CompareOp::Lt,
                "<=" => CompareOp::Le,
                ">" => CompareOp::Gt,
                ">=" => CompareOp::Ge,
                "==" => CompareOp::Eq,
                "!=" => CompareOp::Ne,
                _ => return Err(ConditionParseError::InvalidOperator(op)),
            };
            tokens.push(Token::Op(parsed));
        } else if ch.is_ascii_digit() || ch == '-' || ch == '.' {
            let mut number = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_ascii_digit() || matches!(next, '.' | '-' | '+' | 'e' | 'E') {
                    number.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = number
                .parse::<f64>()
                .map_err(|_| ConditionParseError::InvalidNumber(number))?;
            tokens.push(Token::Number(value));
        } else if ch.is_ascii_alphabetic() || ch == '_' {
            let mut word = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    word.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(match word.as_str() {
                "and" => Token::And,
                "or" => Token::Or,
                _ => Token::Ident(word),
            });
        } else {
            return Err(ConditionParseError::UnexpectedCharacter(ch));
        }
    }

    if tokens.is_empty() {
        return Err(ConditionParseError::Empty);
    }
    Ok(tokens)
}

// ── Parser ───────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse(mut self) -> Result<Condition, ConditionParseError> {
        let condition = self.or_expr()?;
        match self.tokens.get(self.pos) {
            None => Ok(condition),
            Some(extra) => Err(ConditionParseError::Trailing(extra.describe())),
        }
    }

    fn or_expr(&mut self) -> Result<Condition, ConditionParseError> {
        let mut children = vec![self.and_expr()?];
        while matches!(self.tokens.get(self.pos), Some(Token::Or)) {
            self.pos += 1;
            children.push(self.and_expr()?);
        }
        if children.len() == 1 {
            Ok(children.swap_remove(0))
        } else {
            Ok(Condition::Any(children))
        }
    }

    fn and_expr(&mut self) -> Result<Condition, ConditionParseError> {
        let mut children = vec![self.comparison()?];
        while matches!(self.tokens.get(self.pos), Some(Token::And)) {
            self.pos += 1;
            children.push(self.comparison()?);
        }
        if children.len() == 1 {
            Ok(children.swap_remove(0))
        } else {
            Ok(Condition::All(children))
        }
    }

    fn comparison(&mut self) -> Result<Condition, ConditionParseError> {
        let identifier = match self.tokens.get(self.pos) {
            Some(Token::Ident(word)) => word.clone(),
            Some(other) => return Err(ConditionParseError::ExpectedIdentifier(other.describe())),
            None => return Err(ConditionParseError::ExpectedIdentifier("end of input".to_string())),
        };
        self.pos += 1;

        let op = match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => *op,
            _ => return Err(ConditionParseError::ExpectedOperator(identifier)),
        };
        self.pos += 1;

        let literal = match self.tokens.get(self.pos) {
            Some(Token::Number(value)) => Literal::Number(*value),
            Some(Token::Text(text)) => Literal::Text(text.clone()),
            Some(Token::Ident(word)) => Literal::Text(word.clone()),
            _ => return Err(ConditionParseError::ExpectedLiteral(identifier)),
        };
        self.pos += 1;

        Ok(Condition::Compare {
            identifier,
            op,
            literal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Condition {
        input.parse().unwrap()
    }

    #[test]
    fn parses_single_comparison() {
        let cond = parse("distance_to_center < 800");
        assert_eq!(
            cond,
            Condition::Compare {
                identifier: "distance_to_center".to_string(),
                op: CompareOp::Lt,
                literal: Literal::Number(800.0),
            }
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let cond = parse("a > 1 and b > 2 or c > 3");
        match cond {
            Condition::Any(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(&children[0], Condition::All(pair) if pair.len() == 2));
                assert!(matches!(&children[1], Condition::Compare { .. }));
            }
            other => panic!("expected Any at the root, got {other:?}"),
        }
    }

    #[test]
    fn bare_words_and_quotes_are_text_literals() {
        let bare = parse("building_class == apartments");
        let quoted = parse("building_class == \"apartments\"");
        assert_eq!(bare, quoted);

        let spaced = parse("road_class == 'living street'");
        assert!(matches!(
            spaced,
            Condition::Compare { literal: Literal::Text(text), .. } if text == "living street"
        ));
    }

    #[test]
    fn operators_without_spaces_parse() {
        let cond = parse("height>=20");
        assert!(matches!(
            cond,
            Condition::Compare {
                op: CompareOp::Ge,
                literal: Literal::Number(value),
                ..
            } if (value - 20.0).abs() < f64::EPSILON
        ));
    }

    #[test]
    fn numeric_evaluation() {
        let record = AttrRecord::new()
            .with("distance_to_center", 500.0)
            .with("height", 25.0);
        assert!(parse("distance_to_center < 800").evaluate(&record).unwrap());
        assert!(parse("distance_to_center < 800 and height > 20")
            .evaluate(&record)
            .unwrap());
        assert!(!parse("distance_to_center > 800 and height > 20")
            .evaluate(&record)
            .unwrap());
        assert!(parse("distance_to_center > 800 or height > 20")
            .evaluate(&record)
            .unwrap());
    }

    #[test]
    fn text_equality_evaluation() {
        let record = AttrRecord::new().with("building_class", BuildingClass::Apartments);
        assert!(parse("building_class == apartments").evaluate(&record).unwrap());
        assert!(parse("building_class != detached").evaluate(&record).unwrap());
        assert!(!parse("building_class == detached").evaluate(&record).unwrap());
    }

    #[test]
    fn unknown_identifier_is_an_error() {
        let record = AttrRecord::new().with("height", 10.0);
        let err = parse("floor_area > 100").evaluate(&record).unwrap_err();
        assert_eq!(
            err,
            EvaluationError::UnknownIdentifier {
                identifier: "floor_area".to_string()
            }
        );
    }

    #[test]
    fn ordering_on_text_is_an_error() {
        let record = AttrRecord::new().with("building_class", "apartments");
        let err = parse("building_class < zzz").evaluate(&record).unwrap_err();
        assert!(matches!(err, EvaluationError::OrderingOnText { .. }));
    }

    #[test]
    fn mixed_types_are_an_error() {
        let record = AttrRecord::new().with("height", 10.0);
        let err = parse("height == tall").evaluate(&record).unwrap_err();
        assert!(matches!(err, EvaluationError::TypeMismatch { .. }));
    }

    #[test]
    fn short_circuit_skips_unreachable_branches() {
        let record = AttrRecord::new().with("height", 25.0);
        // The right branch references a missing attribute but is never reached.
        assert!(parse("height > 20 or floor_area > 100")
            .evaluate(&record)
            .unwrap());
        assert!(!parse("height > 30 and floor_area > 100")
            .evaluate(&record)
            .unwrap());
    }

    #[test]
    fn malformed_conditions_fail_to_parse() {
        assert_eq!(
            "".parse::<Condition>().unwrap_err(),
            ConditionParseError::Empty
        );
        assert!(matches!(
            "height 20".parse::<Condition>().unwrap_err(),
            ConditionParseError::ExpectedOperator(_)
        ));
        assert!(matches!(
            "height >".parse::<Condition>().unwrap_err(),
            ConditionParseError::ExpectedLiteral(_)
        ));
        assert!(matches!(
            "height > 20 30".parse::<Condition>().unwrap_err(),
            ConditionParseError::Trailing(_)
        ));
        assert!(matches!(
            "height === 20".parse::<Condition>().unwrap_err(),
            ConditionParseError::InvalidOperator(_)
        ));
        assert!(matches!(
            "height > 'unclosed".parse::<Condition>().unwrap_err(),
            ConditionParseError::UnterminatedString
        ));
    }

    #[test]
    fn display_round_trips() {
        for input in [
            "distance_to_center < 800",
            "a > 1 and b <= 2",
            "a == x or b != y and c >= 3",
        ] {
            let cond = parse(input);
            let reparsed = parse(&cond.to_string());
            assert_eq!(cond, reparsed, "display of '{input}' did not round-trip");
        }
    }
}
