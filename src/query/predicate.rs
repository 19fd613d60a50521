//! Boolean predicates over tagsets
//!
//! Predicates select which series of a metric take part in a query. Leaves
//! match one tag against a literal list or a regex; `And`, `Or` and `Not`
//! combine them and short-circuit. A tag missing from the tagset never
//! matches a leaf.

use super::escape_identifier;
use crate::types::TagSet;
use regex::Regex;

/// A predicate tree
#[derive(Debug, Clone, Default)]
pub enum Predicate {
    /// Always true
    #[default]
    True,
    /// Always false
    False,
    /// All children hold
    And(Vec<Predicate>),
    /// Some child holds
    Or(Vec<Predicate>),
    /// Child does not hold
    Not(Box<Predicate>),
    /// Tag is present and equals one of the values
    ListMatch {
        /// Tag key
        tag: String,
        /// Accepted values
        values: Vec<String>,
    },
    /// Tag is present and the regex matches its value
    RegexMatch {
        /// Tag key
        tag: String,
        /// Compiled pattern
        regex: Regex,
    },
}

impl Predicate {
    /// `tag = value`
    pub fn equals(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Predicate::ListMatch {
            tag: tag.into(),
            values: vec![value.into()],
        }
    }

    /// Conjunction that flattens away `True` children
    pub fn all(predicates: Vec<Predicate>) -> Self {
        let mut kept: Vec<Predicate> = predicates
            .into_iter()
            .filter(|p| !matches!(p, Predicate::True))
            .collect();
        match kept.len() {
            0 => Predicate::True,
            1 => kept.remove(0),
            _ => Predicate::And(kept),
        }
    }

    /// Disjunction that flattens away `False` children
    pub fn any(predicates: Vec<Predicate>) -> Self {
        let mut kept: Vec<Predicate> = predicates
            .into_iter()
            .filter(|p| !matches!(p, Predicate::False))
            .collect();
        match kept.len() {
            0 => Predicate::False,
            1 => kept.remove(0),
            _ => Predicate::Or(kept),
        }
    }

    /// Negation
    pub fn negate(predicate: Predicate) -> Self {
        Predicate::Not(Box::new(predicate))
    }

    /// Evaluate against a tagset
    pub fn apply(&self, tagset: &TagSet) -> bool {
        match self {
            Predicate::True => true,
            Predicate::False => false,
            Predicate::And(children) => children.iter().all(|p| p.apply(tagset)),
            Predicate::Or(children) => children.iter().any(|p| p.apply(tagset)),
            Predicate::Not(child) => !child.apply(tagset),
            Predicate::ListMatch { tag, values } => tagset
                .get(tag)
                .is_some_and(|value| values.iter().any(|v| v == value)),
            Predicate::RegexMatch { tag, regex } => {
                tagset.get(tag).is_some_and(|value| regex.is_match(value))
            },
        }
    }

    /// Render back to query syntax
    pub fn query(&self) -> String {
        match self {
            Predicate::True => "true".to_string(),
            Predicate::False => "false".to_string(),
            Predicate::And(children) => format!(
                "({})",
                children.iter().map(Predicate::query).collect::<Vec<_>>().join(" and ")
            ),
            Predicate::Or(children) => format!(
                "({})",
                children.iter().map(Predicate::query).collect::<Vec<_>>().join(" or ")
            ),
            Predicate::Not(child) => format!("not {}", child.query()),
            Predicate::ListMatch { tag, values } if values.len() == 1 => {
                format!("{} = {:?}", escape_identifier(tag), values[0])
            },
            Predicate::ListMatch { tag, values } => format!(
                "{} in ({})",
                escape_identifier(tag),
                values.iter().map(|v| format!("{:?}", v)).collect::<Vec<_>>().join(", ")
            ),
            Predicate::RegexMatch { tag, regex } => {
                format!("{} match {:?}", escape_identifier(tag), regex.as_str())
            },
        }
    }

    /// True if this is the constant `True`
    pub fn is_true(&self) -> bool {
        matches!(self, Predicate::True)
    }
}
