//! JSON `where` constraints
//!
//! Callers of the HTTP API can restrict every metric reference in a query
//! without editing the query text. The constraint is a recursive object with
//! exactly one of these keys:
//!
//! ```json
//! {"all": [
//!     {"key_is": {"key": "dc", "value": "west"}},
//!     {"not": {"key_in": {"key": "host", "values": ["a", "b"]}}},
//!     {"any": [{"key_match": {"key": "app", "regex": "^mqe"}}]}
//! ]}
//! ```
//!
//! [`Constraint::to_predicate`] compiles it into a [`Predicate`] that is
//! and-ed with each reference's own predicate.

use super::predicate::Predicate;
use crate::error::{QueryError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// `{"key": k, "value": v}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyIs {
    /// Tag key
    #[serde(default)]
    pub key: String,
    /// Required value
    #[serde(default)]
    pub value: String,
}

/// `{"key": k, "values": [...]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyIn {
    /// Tag key
    #[serde(default)]
    pub key: String,
    /// Accepted values
    #[serde(default)]
    pub values: Vec<String>,
}

/// `{"key": k, "regex": r}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMatch {
    /// Tag key
    #[serde(default)]
    pub key: String,
    /// Pattern the value must match
    #[serde(default)]
    pub regex: String,
}

/// One node of a `where` constraint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// Negation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<Constraint>>,
    /// Conjunction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<Vec<Constraint>>,
    /// Disjunction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any: Option<Vec<Constraint>>,
    /// Tag equality
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_is: Option<KeyIs>,
    /// Tag membership
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_in: Option<KeyIn>,
    /// Tag regex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_match: Option<KeyMatch>,
}

/// Which key of a constraint object is set
enum Kind<'a> {
    Not(&'a Constraint),
    All(&'a [Constraint]),
    Any(&'a [Constraint]),
    KeyIs(&'a KeyIs),
    KeyIn(&'a KeyIn),
    KeyMatch(&'a KeyMatch),
}

impl Constraint {
    /// Parse from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| QueryError::InvalidConstraint(format!("invalid constraint: {}", e)))
    }

    fn kind(&self) -> Result<Kind<'_>> {
        let present: [(&str, Option<Kind<'_>>); 6] = [
            ("not", self.not.as_deref().map(Kind::Not)),
            ("all", self.all.as_deref().map(Kind::All)),
            ("any", self.any.as_deref().map(Kind::Any)),
            ("key_is", self.key_is.as_ref().map(Kind::KeyIs)),
            ("key_in", self.key_in.as_ref().map(Kind::KeyIn)),
            ("key_match", self.key_match.as_ref().map(Kind::KeyMatch)),
        ];

        let mut found: Option<(&str, Kind<'_>)> = None;
        for (name, kind) in present {
            let Some(kind) = kind else { continue };
            if let Some((previous, _)) = &found {
                return Err(QueryError::InvalidConstraint(format!(
                    "already had {:?} but tried to add {:?}",
                    previous, name
                )));
            }
            found = Some((name, kind));
        }
        found
            .map(|(_, kind)| kind)
            .ok_or_else(|| QueryError::InvalidConstraint("constraint has no contents".to_string()))
    }

    /// Compile into a predicate
    pub fn to_predicate(&self) -> Result<Predicate> {
        let no_key = |name: &str| {
            QueryError::InvalidConstraint(format!("key is given no value in {:?} constraint", name))
        };
        match self.kind()? {
            Kind::Not(child) => Ok(Predicate::negate(child.to_predicate()?)),
            Kind::All(children) => Ok(Predicate::And(
                children.iter().map(Constraint::to_predicate).collect::<Result<_>>()?,
            )),
            Kind::Any(children) => Ok(Predicate::Or(
                children.iter().map(Constraint::to_predicate).collect::<Result<_>>()?,
            )),
            Kind::KeyIs(KeyIs { key, value }) => {
                if key.is_empty() {
                    return Err(no_key("key_is"));
                }
                Ok(Predicate::equals(key.clone(), value.clone()))
            },
            Kind::KeyIn(KeyIn { key, values }) => {
                if key.is_empty() {
                    return Err(no_key("key_in"));
                }
                Ok(Predicate::ListMatch {
                    tag: key.clone(),
                    values: values.clone(),
                })
            },
            Kind::KeyMatch(KeyMatch { key, regex }) => {
                if key.is_empty() {
                    return Err(no_key("key_match"));
                }
                let regex = Regex::new(regex).map_err(|e| QueryError::InvalidRegex(e.to_string()))?;
                Ok(Predicate::RegexMatch {
                    tag: key.clone(),
                    regex,
                })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TagSet;

    fn compile(json: &str) -> Result<Predicate> {
        Constraint::from_json(json)?.to_predicate()
    }

    #[test]
    fn test_nested_constraint() {
        let predicate = compile(
            r#"{"all": [
                {"key_is": {"key": "dc", "value": "west"}},
                {"not": {"key_in": {"key": "host", "values": ["a", "b"]}}},
                {"any": [{"key_match": {"key": "app", "regex": "^mqe"}}]}
            ]}"#,
        )
        .unwrap();
        let tags = |host: &str| TagSet::from_pairs(&[("dc", "west"), ("host", host), ("app", "mqe-server")]);
        assert!(predicate.apply(&tags("c")));
        assert!(!predicate.apply(&tags("a")));
        assert!(!predicate.apply(&TagSet::from_pairs(&[("dc", "west"), ("host", "c")])));
    }

    #[test]
    fn test_empty_constraint() {
        assert_eq!(compile("{}").unwrap_err().to_string(), "constraint has no contents");
    }

    #[test]
    fn test_two_keys_rejected() {
        let err = compile(r#"{"not": {"key_is": {"key": "a", "value": "b"}}, "key_is": {"key": "a", "value": "b"}}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), r#"already had "not" but tried to add "key_is""#);
    }

    #[test]
    fn test_missing_key() {
        let err = compile(r#"{"key_is": {"value": "b"}}"#).unwrap_err();
        assert_eq!(err.to_string(), r#"key is given no value in "key_is" constraint"#);
    }

    #[test]
    fn test_bad_regex() {
        let err = compile(r#"{"key_match": {"key": "a", "regex": "("}}"#).unwrap_err();
        assert!(matches!(err, QueryError::InvalidRegex(_)));
    }
}
