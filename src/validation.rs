//! Configuration validation
//!
//! Validation never stops at the first problem: every builder pushes what it
//! finds into [Issues] and the configuration is rejected once, with all of them.

use crate::{config::Config, Error, Result};
use std::{collections::HashMap, fmt::Display};

/// A single configuration problem
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationIssue {
    #[error("duplicate id `{0}`")]
    DuplicateId(String),
    #[error("`{owner}` references unknown {expected} `{reference}`")]
    UnknownReference {
        owner: String,
        expected: &'static str,
        reference: String,
    },
    #[error("`{owner}` {what} has {found} elements, expected {expected}")]
    DimensionMismatch {
        owner: String,
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("`{owner}` has unrecognized {field} `{value}`")]
    UnknownVariant {
        owner: String,
        field: &'static str,
        value: String,
    },
    #[error("`{owner}`: {reason}")]
    InvalidParameter { owner: String, reason: String },
    #[error("sensor `{sensor}` does not see source `{source_id}`")]
    NotVisible { sensor: String, source_id: String },
}

pub(crate) fn summary(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Collects validation issues
#[derive(Debug, Default)]
pub(crate) struct Issues(Vec<ValidationIssue>);
impl Issues {
    pub fn push(&mut self, issue: ValidationIssue) {
        self.0.push(issue);
    }
    pub fn unknown_reference<O: Display, R: Display>(
        &mut self,
        owner: O,
        expected: &'static str,
        reference: R,
    ) {
        self.push(ValidationIssue::UnknownReference {
            owner: owner.to_string(),
            expected,
            reference: reference.to_string(),
        })
    }
    pub fn invalid<O: Display, R: Display>(&mut self, owner: O, reason: R) {
        self.push(ValidationIssue::InvalidParameter {
            owner: owner.to_string(),
            reason: reason.to_string(),
        })
    }
    /// Parses a kind label, recording an issue if it is not recognized
    pub fn parse<T: std::str::FromStr>(
        &mut self,
        owner: &str,
        field: &'static str,
        value: &str,
    ) -> Option<T> {
        match value.parse::<T>() {
            Ok(kind) => Some(kind),
            Err(_) => {
                self.push(ValidationIssue::UnknownVariant {
                    owner: owner.to_string(),
                    field,
                    value: value.to_string(),
                });
                None
            }
        }
    }
    /// Checks that `found` matches `expected`
    pub fn dimension(
        &mut self,
        owner: &str,
        what: &'static str,
        expected: usize,
        found: usize,
    ) -> bool {
        if expected != found {
            self.push(ValidationIssue::DimensionMismatch {
                owner: owner.to_string(),
                what,
                expected,
                found,
            });
            false
        } else {
            true
        }
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    /// Consumes the issues, failing if there is any
    pub fn into_result(self) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(Error::ConfigValidation(self.0))
        }
    }
}

/// Configuration entity addressed by its id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Entity {
    Source(usize),
    Disturbance(usize),
    Dm(usize),
    Sensor(usize),
}

/// Index of the configuration ids; ids are unique across all entity types
#[derive(Debug, Default)]
pub(crate) struct Registry(HashMap<String, Entity>);
impl Registry {
    pub fn new(config: &Config, issues: &mut Issues) -> Self {
        let mut registry = Self::default();
        let ids = config
            .sources
            .iter()
            .enumerate()
            .map(|(i, s)| (&s.id, Entity::Source(i)))
            .chain(
                config
                    .disturbances
                    .iter()
                    .enumerate()
                    .map(|(i, d)| (&d.id, Entity::Disturbance(i))),
            )
            .chain(
                config
                    .dms
                    .iter()
                    .enumerate()
                    .map(|(i, d)| (&d.id, Entity::Dm(i))),
            )
            .chain(
                config
                    .sensors
                    .iter()
                    .enumerate()
                    .map(|(i, s)| (&s.id, Entity::Sensor(i))),
            );
        for (id, entity) in ids {
            if registry.0.insert(id.clone(), entity).is_some() {
                issues.push(ValidationIssue::DuplicateId(id.clone()));
            }
        }
        registry
    }
    pub fn get(&self, id: &str) -> Option<Entity> {
        self.0.get(id).copied()
    }
    pub fn source(&self, id: &str) -> Option<usize> {
        match self.get(id) {
            Some(Entity::Source(i)) => Some(i),
            _ => None,
        }
    }
    pub fn dm(&self, id: &str) -> Option<usize> {
        match self.get(id) {
            Some(Entity::Dm(i)) => Some(i),
            _ => None,
        }
    }
    pub fn sensor(&self, id: &str) -> Option<usize> {
        match self.get(id) {
            Some(Entity::Sensor(i)) => Some(i),
            _ => None,
        }
    }
}
