use std::collections::BTreeMap;
use std::fmt;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

/// Equality-based label selector: `a=b,c!=d,e,!f`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let mut requirements = Vec::new();
        for term in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let req = if let Some((k, v)) = term.split_once("!=") {
                Requirement::NotEquals(label_key(k)?, v.trim().to_string())
            } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
                Requirement::Equals(label_key(k)?, v.trim().to_string())
            } else if let Some(k) = term.strip_prefix('!') {
                Requirement::NotExists(label_key(k)?)
            } else {
                Requirement::Exists(label_key(term)?)
            };
            requirements.push(req);
        }
        Ok(Self { requirements })
    }

    /// Selector requiring every given label to match exactly.
    pub fn from_labels<'a>(labels: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            requirements: labels
                .into_iter()
                .map(|(k, v)| Requirement::Equals(k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| match r {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        })
    }
}

fn label_key(raw: &str) -> Result<String, StoreError> {
    let key = raw.trim();
    if key.is_empty() || key.contains(|c: char| c.is_whitespace() || c == '!' || c == '=') {
        return Err(StoreError::Invalid(format!("bad label selector key '{}'", raw)));
    }
    Ok(key.to_string())
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .requirements
            .iter()
            .map(|r| match r {
                Requirement::Equals(k, v) => format!("{}={}", k, v),
                Requirement::NotEquals(k, v) => format!("{}!={}", k, v),
                Requirement::Exists(k) => k.clone(),
                Requirement::NotExists(k) => format!("!{}", k),
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}
