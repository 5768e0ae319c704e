//! Submission validation: shape, size and encoding checks.
//!
//! Runs before any external call. Design quality is not judged here.

use std::collections::HashSet;

use serde_json::Value;

use crate::config::AssessorConfig;
use crate::error::ValidationError;
use crate::model::{DeclaredComponent, RawSubmission, Submission, SubmissionMetadata};

/// Default upper bound on submission length, in characters.
pub const DEFAULT_MAX_SUBMISSION_CHARS: usize = 20_000;

/// Default upper bound on metadata text, in characters.
pub const DEFAULT_MAX_METADATA_CHARS: usize = 20_000;

#[derive(Debug, Clone, Copy)]
pub struct SubmissionValidator {
    max_chars: usize,
    max_metadata_chars: usize,
}

impl Default for SubmissionValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SUBMISSION_CHARS)
    }
}

impl SubmissionValidator {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            max_metadata_chars: DEFAULT_MAX_METADATA_CHARS,
        }
    }

    pub fn from_config(config: &AssessorConfig) -> Self {
        Self::new(config.max_submission_chars).with_max_metadata_chars(config.max_metadata_chars)
    }

    pub fn with_max_metadata_chars(mut self, max: usize) -> Self {
        self.max_metadata_chars = max;
        self
    }

    /// Turn raw input into a [`Submission`] or report the first failed constraint.
    ///
    /// Order of checks: encoding, emptiness, length, metadata size, metadata
    /// consistency. Length counts Unicode scalar values of the trimmed text.
    /// Metadata size counts every user-supplied string that reaches the
    /// prompt, property keys and values included.
    pub fn validate(&self, raw: &RawSubmission) -> Result<Submission, ValidationError> {
        let text = std::str::from_utf8(&raw.text).map_err(|e| ValidationError::InvalidEncoding {
            reason: format!("invalid UTF-8 at byte {}", e.valid_up_to()),
        })?;

        if let Some(pos) = text.find('\0') {
            return Err(ValidationError::InvalidEncoding {
                reason: format!("NUL character at byte {}", pos),
            });
        }

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Empty);
        }

        let len = trimmed.chars().count();
        if len > self.max_chars {
            return Err(ValidationError::TooLong {
                len,
                max: self.max_chars,
            });
        }

        let metadata = raw.metadata.clone().unwrap_or_default();
        let metadata_len = metadata_chars(&metadata);
        if metadata_len > self.max_metadata_chars {
            return Err(ValidationError::MetadataTooLong {
                len: metadata_len,
                max: self.max_metadata_chars,
            });
        }
        check_metadata(&metadata)?;

        Ok(Submission::new(trimmed.to_string(), metadata))
    }
}

fn chars(text: &str) -> usize {
    text.chars().count()
}

fn optional_chars(text: &Option<String>) -> usize {
    text.as_deref().map_or(0, chars)
}

fn component_chars(component: &DeclaredComponent) -> usize {
    let properties: usize = component
        .properties
        .iter()
        .map(|(key, value)| {
            chars(key)
                + match value {
                    Value::String(s) => chars(s),
                    other => chars(&other.to_string()),
                }
        })
        .sum();
    chars(&component.id)
        + chars(&component.kind)
        + chars(&component.label)
        + optional_chars(&component.description)
        + properties
}

fn metadata_chars(metadata: &SubmissionMetadata) -> usize {
    let components: usize = metadata.components.iter().map(component_chars).sum();
    let connections: usize = metadata
        .connections
        .iter()
        .map(|c| {
            chars(&c.source) + chars(&c.target) + optional_chars(&c.label) + optional_chars(&c.protocol)
        })
        .sum();
    let problem = metadata.problem.as_ref().map_or(0, |p| {
        chars(&p.title)
            + chars(&p.description)
            + optional_chars(&p.requirements)
            + optional_chars(&p.constraints)
            + optional_chars(&p.difficulty)
            + optional_chars(&p.category)
    });
    let key_points: usize = metadata.key_points.iter().map(String::as_str).map(chars).sum();

    components
        + connections
        + problem
        + key_points
        + optional_chars(&metadata.requirements)
        + optional_chars(&metadata.constraints)
        + optional_chars(&metadata.expected_scale)
}

fn check_metadata(metadata: &SubmissionMetadata) -> Result<(), ValidationError> {
    if metadata.components.is_empty() {
        return Ok(());
    }

    let mut ids = HashSet::new();
    for component in &metadata.components {
        if !ids.insert(component.id.as_str()) {
            return Err(ValidationError::DuplicateComponent {
                id: component.id.clone(),
            });
        }
    }

    for conn in &metadata.connections {
        for endpoint in [&conn.source, &conn.target] {
            if !ids.contains(endpoint.as_str()) {
                return Err(ValidationError::UnknownComponent {
                    connection: format!("{} -> {}", conn.source, conn.target),
                    component: endpoint.clone(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Connection, DeclaredComponent, ProblemContext};

    fn component(id: &str) -> DeclaredComponent {
        DeclaredComponent {
            id: id.to_string(),
            kind: "backend".to_string(),
            label: id.to_string(),
            description: None,
            properties: Default::default(),
        }
    }

    fn connection(source: &str, target: &str) -> Connection {
        Connection {
            source: source.to_string(),
            target: target.to_string(),
            label: None,
            protocol: None,
        }
    }

    #[test]
    fn empty_and_whitespace_are_rejected() {
        let v = SubmissionValidator::default();
        assert_eq!(v.validate(&RawSubmission::new("")), Err(ValidationError::Empty));
        assert_eq!(
            v.validate(&RawSubmission::new(" \n\t  ")),
            Err(ValidationError::Empty)
        );
    }

    #[test]
    fn length_limit_counts_characters_of_trimmed_text() {
        let v = SubmissionValidator::new(5);
        assert!(v.validate(&RawSubmission::new("  héllo  ")).is_ok());
        assert_eq!(
            v.validate(&RawSubmission::new("héllo!")),
            Err(ValidationError::TooLong { len: 6, max: 5 })
        );
    }

    #[test]
    fn invalid_encoding_is_rejected() {
        let v = SubmissionValidator::default();
        let err = v
            .validate(&RawSubmission::new(vec![b'o', b'k', 0xff, 0xfe]))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidEncoding { .. }));

        let err = v.validate(&RawSubmission::new("a\0b")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidEncoding { .. }));
    }

    #[test]
    fn submission_is_trimmed() {
        let v = SubmissionValidator::default();
        let s = v.validate(&RawSubmission::new("\n  API + Postgres  \n")).unwrap();
        assert_eq!(s.text(), "API + Postgres");
    }

    #[test]
    fn connections_must_reference_declared_components() {
        let v = SubmissionValidator::default();
        let metadata = SubmissionMetadata {
            components: vec![component("api"), component("db")],
            connections: vec![connection("api", "db"), connection("api", "cache")],
            ..Default::default()
        };
        let err = v
            .validate(&RawSubmission::new("design").with_metadata(metadata))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownComponent {
                connection: "api -> cache".to_string(),
                component: "cache".to_string(),
            }
        );
    }

    #[test]
    fn duplicate_component_ids_are_rejected() {
        let v = SubmissionValidator::default();
        let metadata = SubmissionMetadata {
            components: vec![component("api"), component("api")],
            ..Default::default()
        };
        let err = v
            .validate(&RawSubmission::new("design").with_metadata(metadata))
            .unwrap_err();
        assert_eq!(err, ValidationError::DuplicateComponent { id: "api".into() });
    }

    #[test]
    fn oversized_metadata_is_rejected_with_short_text() {
        let v = SubmissionValidator::new(100).with_max_metadata_chars(1_000);
        let metadata = SubmissionMetadata {
            problem: Some(ProblemContext {
                title: "URL shortener".to_string(),
                description: "x".repeat(500_000),
                requirements: None,
                constraints: None,
                difficulty: None,
                category: None,
            }),
            ..Default::default()
        };
        let err = v
            .validate(&RawSubmission::new("tiny").with_metadata(metadata))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::MetadataTooLong {
                len: 500_013,
                max: 1_000
            }
        );
    }

    #[test]
    fn metadata_size_counts_property_values() {
        let v = SubmissionValidator::default().with_max_metadata_chars(20);
        let mut api = component("api");
        api.properties
            .insert("notes".to_string(), serde_json::json!("é".repeat(10)));
        let metadata = SubmissionMetadata {
            components: vec![api.clone()],
            ..Default::default()
        };
        // id + kind + label + key + value = 3 + 7 + 3 + 5 + 10
        let err = v
            .validate(&RawSubmission::new("design").with_metadata(metadata))
            .unwrap_err();
        assert_eq!(err, ValidationError::MetadataTooLong { len: 28, max: 20 });

        api.properties
            .insert("notes".to_string(), serde_json::json!(1));
        let metadata = SubmissionMetadata {
            components: vec![api],
            ..Default::default()
        };
        let ok = SubmissionValidator::default()
            .with_max_metadata_chars(19)
            .validate(&RawSubmission::new("design").with_metadata(metadata));
        assert!(ok.is_ok());
    }

    #[test]
    fn connections_without_components_are_not_checked() {
        let v = SubmissionValidator::default();
        let metadata = SubmissionMetadata {
            connections: vec![connection("web", "api")],
            ..Default::default()
        };
        assert!(v
            .validate(&RawSubmission::new("design").with_metadata(metadata))
            .is_ok());
    }
}
