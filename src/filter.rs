//! Filter expressions and the predicate set that assigns tags to events.
//!
//! An expression is a list of clauses joined with `&&`, all of which must match:
//! - `key == value`, `key != value` compare an attribute's text,
//! - `key contains value` matches a substring,
//! - `key matches regex` matches a regular expression,
//! - a bare word matches if any attribute value contains it.
//!
//! A clause on a key that the event doesn't have never matches.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::types::{Attributes, EventTags};

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("empty filter expression")]
    Empty,
    #[error("clause `{0}` has no value")]
    MissingValue(String),
    #[error("invalid regex `{pattern}`: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Tags a predicate can drive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum Tag {
    Dimmed,
    Excluded,
    Highlighted,
    Bound,
}

impl Tag {
    pub fn flag(self) -> EventTags {
        match self {
            Tag::Dimmed => EventTags::DIMMED,
            Tag::Excluded => EventTags::EXCLUDED,
            Tag::Highlighted => EventTags::HIGHLIGHTED,
            Tag::Bound => EventTags::BOUND,
        }
    }

    /// Dimmed and excluded mean "doesn't match the filter", so a matching event gets them cleared.
    pub fn is_negated(self) -> bool {
        matches!(self, Tag::Dimmed | Tag::Excluded)
    }

    pub fn parse(name: &str) -> Option<Tag> {
        match name.trim().to_ascii_lowercase().as_str() {
            "dimmed" | "dim" => Some(Tag::Dimmed),
            "excluded" | "exclude" => Some(Tag::Excluded),
            "highlighted" | "highlight" => Some(Tag::Highlighted),
            "bound" => Some(Tag::Bound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MatchOperator {
    /// Always matches
    Any,
    /// Matches if the value is equal to the given string
    EqualTo,
    /// Matches if the value is not equal to the given string
    NotEqualTo,
    /// Matches if the value contains the given substring
    Contains,
    /// Matches if the value matches the given regular expression
    Matches,
}

#[derive(Debug, Clone)]
pub struct MatchCondition {
    pub operator: MatchOperator,
    pub value: String,
    regex: Option<Regex>,
}

impl MatchCondition {
    pub fn any() -> MatchCondition {
        MatchCondition {
            operator: MatchOperator::Any,
            value: String::new(),
            regex: None,
        }
    }

    pub fn new(operator: MatchOperator, value: &str) -> Result<MatchCondition, FilterError> {
        let regex = match operator {
            MatchOperator::Matches => {
                Some(Regex::new(value).map_err(|source| FilterError::InvalidRegex {
                    pattern: value.to_string(),
                    source,
                })?)
            }
            _ => None,
        };
        Ok(MatchCondition {
            operator,
            value: value.to_string(),
            regex,
        })
    }

    pub fn matches(&self, value: &str) -> bool {
        match self.operator {
            MatchOperator::Any => true,
            MatchOperator::EqualTo => value == self.value,
            MatchOperator::NotEqualTo => value != self.value,
            MatchOperator::Contains => value.contains(self.value.as_str()),
            MatchOperator::Matches => self
                .regex
                .as_ref()
                .map(|regex| regex.is_match(value))
                .unwrap_or(false),
        }
    }
}

/// One clause of an expression. Without a key the condition is tried on every attribute.
#[derive(Debug, Clone)]
pub struct AttributeCondition {
    pub key: Option<String>,
    pub condition: MatchCondition,
}

impl AttributeCondition {
    pub fn matches(&self, attributes: &Attributes) -> bool {
        match &self.key {
            Some(key) => attributes
                .get(key)
                .map(|value| self.condition.matches(value))
                .unwrap_or(false),
            None => attributes
                .values()
                .any(|value| self.condition.matches(value)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterExpression {
    text: String,
    clauses: Vec<AttributeCondition>,
}

impl FilterExpression {
    pub fn parse(text: &str) -> Result<FilterExpression, FilterError> {
        let clauses = text
            .split("&&")
            .map(str::trim)
            .filter(|clause| !clause.is_empty())
            .map(parse_clause)
            .collect::<Result<Vec<_>, _>>()?;
        if clauses.is_empty() {
            return Err(FilterError::Empty);
        }
        Ok(FilterExpression {
            text: text.trim().to_string(),
            clauses,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn matches(&self, attributes: &Attributes) -> bool {
        self.clauses
            .iter()
            .all(|clause| clause.matches(attributes))
    }
}

fn parse_clause(clause: &str) -> Result<AttributeCondition, FilterError> {
    const OPERATORS: [(&str, MatchOperator); 4] = [
        ("==", MatchOperator::EqualTo),
        ("!=", MatchOperator::NotEqualTo),
        (" contains ", MatchOperator::Contains),
        (" matches ", MatchOperator::Matches),
    ];

    for (token, operator) in OPERATORS {
        let Some((key, value)) = clause.split_once(token) else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if value.is_empty() {
            return Err(FilterError::MissingValue(clause.to_string()));
        }
        let key = match key {
            "" | "*" => None,
            key => Some(key.to_string()),
        };
        return Ok(AttributeCondition {
            key,
            condition: MatchCondition::new(operator, value)?,
        });
    }

    Ok(AttributeCondition {
        key: None,
        condition: MatchCondition::new(MatchOperator::Contains, clause)?,
    })
}

/// A predicate over an event's attributes.
#[derive(Clone)]
pub enum Predicate {
    Expression(FilterExpression),
    Custom(Arc<dyn Fn(&Attributes) -> bool + Send + Sync>),
}

impl Predicate {
    pub fn evaluate(&self, attributes: &Attributes) -> bool {
        match self {
            Predicate::Expression(expression) => expression.matches(attributes),
            Predicate::Custom(predicate) => predicate(attributes),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Expression(expression) => {
                f.debug_tuple("Expression").field(&expression.text()).finish()
            }
            Predicate::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Mapping from tag to predicate, at most one predicate per tag. Empty means no filtering.
#[derive(Debug, Clone, Default)]
pub struct PredicateSet {
    predicates: BTreeMap<Tag, Predicate>,
}

impl PredicateSet {
    pub fn new() -> PredicateSet {
        PredicateSet::default()
    }

    /// Build a set from textual expressions. Malformed expressions are logged and left out,
    /// the corresponding tag is then simply not driven by any predicate.
    pub fn from_expressions<'a>(
        expressions: impl IntoIterator<Item = (Tag, &'a str)>,
    ) -> PredicateSet {
        let mut set = PredicateSet::new();
        for (tag, text) in expressions {
            match FilterExpression::parse(text) {
                Ok(expression) => set.insert(tag, Predicate::Expression(expression)),
                Err(err) => tracing::warn!(
                    ?tag,
                    expression = text,
                    error = %err,
                    "ignoring malformed filter"
                ),
            }
        }
        set
    }

    pub fn insert(&mut self, tag: Tag, predicate: Predicate) {
        self.predicates.insert(tag, predicate);
    }

    pub fn insert_fn(
        &mut self,
        tag: Tag,
        predicate: impl Fn(&Attributes) -> bool + Send + Sync + 'static,
    ) {
        self.insert(tag, Predicate::Custom(Arc::new(predicate)));
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn get(&self, tag: Tag) -> Option<&Predicate> {
        self.predicates.get(&tag)
    }

    /// Tags for an event with these attributes.
    pub fn tags_for(&self, attributes: &Attributes) -> EventTags {
        let mut tags = EventTags::empty();
        for (tag, predicate) in &self.predicates {
            let matched = predicate.evaluate(attributes);
            tags.set(tag.flag(), matched != tag.is_negated());
        }
        tags
    }
}
