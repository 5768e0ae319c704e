//! Model output → [`Assessment`].
//!
//! Tolerated: prose or code fences around the JSON, field order, label case,
//! spaces/hyphens in labels, scores given as numeric strings (`"85"`, and
//! `"85/100"` or `"85%"` when the rubric maximum is 100), and three layouts
//! for per-criterion scores:
//!
//! ```text
//! "criteria": { "security": { "score": 70, "justification": "..." }, ... }
//! "criteria": [ { "name": "security", "score": 70, "justification": "..." }, ... ]
//! "scores": { "security": 70, ... }, "justifications": { "security": "..." }
//! ```
//!
//! Not tolerated: a missing or repeated rubric criterion, a score outside the
//! rubric range, a fraction on another scale (`"9/10"` against 0-100), a
//! missing overall score. Scores are never clamped or
//! defaulted.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ParseError, ParseFailure};
use crate::model::{
    Assessment, AssessmentMeta, CriterionScore, FeedbackItem, FeedbackType, RawModelResponse,
};
use crate::rubric::{normalize_label, RubricTemplate, ScoreRange};

const OVERALL_FIELD: &str = "overall_score";

/// Longest snippet of model output quoted in an error.
const MAX_PREVIEW: usize = 40;

#[derive(Debug, Clone)]
pub struct ResponseParser {
    rubric: Arc<RubricTemplate>,
    passing_score: f64,
}

impl ResponseParser {
    pub fn new(rubric: Arc<RubricTemplate>, passing_score: f64) -> Self {
        Self {
            rubric,
            passing_score,
        }
    }

    pub fn parse(&self, raw: &RawModelResponse) -> Result<Assessment, ParseError> {
        let root = extract_json_object(&raw.text)?;
        let root = unwrap_envelope(&root);
        let fields = Fields::new(root);
        let range = self.rubric.score_range;

        let entries = collect_entries(&fields)?;

        let mut criteria = BTreeMap::new();
        for criterion in &self.rubric.criteria {
            let mut matching = entries.iter().filter(|e| e.name == criterion.name);
            let entry = matching
                .next()
                .ok_or_else(|| ParseError::new(&criterion.name, ParseFailure::MissingCriterion))?;
            if matching.next().is_some() {
                return Err(ParseError::new(
                    &criterion.name,
                    ParseFailure::DuplicateCriterion,
                ));
            }

            let score = score_value(&criterion.name, entry.score, &range)?;
            criteria.insert(
                criterion.name.clone(),
                CriterionScore {
                    score,
                    justification: entry.justification.clone(),
                },
            );
        }

        let overall = fields
            .get_any(&[OVERALL_FIELD, "overall"])
            .ok_or_else(|| ParseError::new(OVERALL_FIELD, ParseFailure::MissingOverall))?;
        let overall_score = score_value(OVERALL_FIELD, Some(overall), &range)?;

        let summary = fields
            .get_any(&["summary", "overall_feedback"])
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        Ok(Assessment {
            overall_score,
            passed: overall_score >= self.passing_score,
            criteria,
            summary,
            feedback: feedback_items(&fields),
            strengths: string_list(&fields, "strengths"),
            improvements: string_list(&fields, "improvements"),
            missing_components: string_list(&fields, "missing_components"),
            suggestions: string_list(&fields, "suggestions"),
            meta: AssessmentMeta {
                assessment_id: Uuid::new_v4(),
                rubric_version: self.rubric.version.clone(),
                model: raw.model.clone(),
                gateway_attempts: raw.attempts,
                invocations: 1,
                processing_time_ms: raw.latency.as_millis() as u64,
                usage: raw.usage,
                assessed_at: Utc::now(),
            },
        })
    }
}

/// Object fields keyed by normalized label; first occurrence wins.
struct Fields<'a> {
    entries: Vec<(String, &'a Value)>,
}

impl<'a> Fields<'a> {
    fn new(map: &'a Map<String, Value>) -> Self {
        Self {
            entries: map
                .iter()
                .map(|(k, v)| (normalize_label(k), v))
                .collect(),
        }
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| *v)
    }

    fn get_any(&self, names: &[&str]) -> Option<&'a Value> {
        names.iter().find_map(|name| self.get(name))
    }

    fn has_scores(&self) -> bool {
        self.get("criteria").is_some() || self.get("scores").is_some()
    }
}

/// A per-criterion score as found in the response, before range checks.
struct Entry<'a> {
    name: String,
    score: Option<&'a Value>,
    justification: String,
}

/// First JSON object in the text. Prose and code fences around it are skipped.
fn extract_json_object(text: &str) -> Result<Map<String, Value>, ParseError> {
    let text = text.trim();
    let mut first_error = None;

    for (idx, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[idx..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(map))) => return Ok(map),
            Some(Ok(_)) | None => {}
            Some(Err(e)) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }

    if let Some(message) = first_error {
        return Err(ParseError::new(
            "response",
            ParseFailure::InvalidJson { message },
        ));
    }

    if serde_json::from_str::<Value>(text).is_ok() {
        return Err(ParseError::new("response", ParseFailure::NotAnObject));
    }

    Err(ParseError::new("response", ParseFailure::NoJson))
}

/// `{"assessment": {...}}` → the inner object, when the outer one has no scores.
fn unwrap_envelope(root: &Map<String, Value>) -> &Map<String, Value> {
    if Fields::new(root).has_scores() || root.len() != 1 {
        return root;
    }
    match root.values().next() {
        Some(Value::Object(inner)) if Fields::new(inner).has_scores() => inner,
        _ => root,
    }
}

fn collect_entries<'a>(fields: &Fields<'a>) -> Result<Vec<Entry<'a>>, ParseError> {
    let mut entries = Vec::new();

    if let Some(criteria) = fields.get("criteria") {
        match criteria {
            Value::Object(map) => {
                for (name, value) in map {
                    entries.push(entry_from_value(normalize_label(name), value));
                }
            }
            Value::Array(items) => {
                for item in items {
                    let Value::Object(obj) = item else {
                        continue;
                    };
                    let item_fields = Fields::new(obj);
                    let Some(name) = item_fields
                        .get_any(&["name", "criterion", "id"])
                        .and_then(Value::as_str)
                    else {
                        continue;
                    };
                    entries.push(Entry {
                        name: normalize_label(name),
                        score: item_fields.get("score"),
                        justification: justification(&item_fields),
                    });
                }
            }
            _ => return Err(ParseError::new("criteria", ParseFailure::MissingScores)),
        }
        return Ok(entries);
    }

    if let Some(Value::Object(scores)) = fields.get("scores") {
        let justifications = fields
            .get_any(&["justifications", "rationales"])
            .and_then(Value::as_object)
            .map(Fields::new);

        for (name, value) in scores {
            let name = normalize_label(name);
            let justification = justifications
                .as_ref()
                .and_then(|j| j.get(&name))
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            entries.push(Entry {
                name,
                score: Some(value),
                justification,
            });
        }
        return Ok(entries);
    }

    Err(ParseError::new("criteria", ParseFailure::MissingScores))
}

fn entry_from_value(name: String, value: &Value) -> Entry<'_> {
    match value {
        Value::Object(obj) => {
            let fields = Fields::new(obj);
            Entry {
                name,
                score: fields.get("score"),
                justification: justification(&fields),
            }
        }
        other => Entry {
            name,
            score: Some(other),
            justification: String::new(),
        },
    }
}

fn justification(fields: &Fields<'_>) -> String {
    fields
        .get_any(&["justification", "rationale", "reason", "comment"])
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn score_value(field: &str, value: Option<&Value>, range: &ScoreRange) -> Result<f64, ParseError> {
    let not_a_number = |value: String| ParseError::new(field, ParseFailure::NotANumber { value });

    let value = value.ok_or_else(|| not_a_number("<missing>".to_string()))?;
    let score = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_score_text(s, range),
        _ => None,
    }
    .filter(|s| s.is_finite())
    .ok_or_else(|| not_a_number(preview(value)))?;

    if !range.contains(score) {
        return Err(ParseError::new(
            field,
            ParseFailure::OutOfRange {
                value: score,
                min: range.min,
                max: range.max,
            },
        ));
    }
    Ok(score)
}

/// A bare number, or a fraction or percentage on the rubric's own scale:
/// `"85"`, `"85/100"` and `"85%"` all read as 85 when the maximum is 100.
/// `"9/10"` on that rubric is on another scale and reads as nothing.
fn parse_score_text(text: &str, range: &ScoreRange) -> Option<f64> {
    let text = text.trim();
    let (number, scale) = match text.split_once('/') {
        Some((head, denominator)) => (head, Some(denominator.trim().parse::<f64>().ok()?)),
        None => match text.strip_suffix('%') {
            Some(head) => (head, Some(100.0)),
            None => (text, None),
        },
    };
    if scale.is_some_and(|scale| scale != range.max) {
        return None;
    }
    number.trim().parse().ok()
}

fn preview(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() <= MAX_PREVIEW {
        text
    } else {
        let mut cut: String = text.chars().take(MAX_PREVIEW).collect();
        cut.push('…');
        cut
    }
}

fn string_list(fields: &Fields<'_>, name: &str) -> Vec<String> {
    fields
        .get(name)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn feedback_items(fields: &Fields<'_>) -> Vec<FeedbackItem> {
    let Some(items) = fields.get("feedback").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|obj| feedback_item(&Fields::new(obj)))
        .collect()
}

fn feedback_item(fields: &Fields<'_>) -> Option<FeedbackItem> {
    let message = fields.get("message")?.as_str()?.trim();
    if message.is_empty() {
        return None;
    }

    let kind = match fields.get("type").and_then(Value::as_str) {
        None => FeedbackType::Info,
        Some(t) => match normalize_label(t).as_str() {
            "success" => FeedbackType::Success,
            "warning" => FeedbackType::Warning,
            "error" => FeedbackType::Error,
            "info" => FeedbackType::Info,
            _ => return None,
        },
    };

    let category = fields
        .get("category")
        .and_then(Value::as_str)
        .map(normalize_label)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "general".to_string());

    let priority = match fields.get("priority") {
        None => 1,
        Some(Value::Number(n)) => n.as_u64()?,
        Some(Value::String(s)) => s.trim().parse().ok()?,
        Some(_) => return None,
    };
    if !(1..=5).contains(&priority) {
        return None;
    }

    Some(FeedbackItem {
        kind,
        message: message.to_string(),
        category,
        priority: priority as u8,
    })
}
