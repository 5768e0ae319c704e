//! Deterministic prompt rendering.
//!
//! Same submission + same rubric version ⇒ byte-identical [`PromptPayload`].
//! Nothing here reads the clock, the environment or a random source; maps
//! are rendered in key order and lists in declaration order.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::model::{DesignFocus, PromptPayload, Submission, SubmissionMetadata};
use crate::rubric::RubricTemplate;

/// Renders prompts from a fixed rubric template.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    rubric: Arc<RubricTemplate>,
    // Rubric-only sections, rendered once.
    criteria: String,
    response_format: String,
}

impl PromptBuilder {
    pub fn new(rubric: Arc<RubricTemplate>) -> Self {
        let criteria = render_criteria(&rubric);
        let response_format = render_response_format(&rubric);
        Self {
            rubric,
            criteria,
            response_format,
        }
    }

    pub fn rubric(&self) -> &RubricTemplate {
        &self.rubric
    }

    /// Render the prompt for a validated submission. Cannot fail.
    pub fn build(&self, submission: &Submission) -> PromptPayload {
        let range = self.rubric.score_range;
        let score_min = range.min.to_string();
        let score_max = range.max.to_string();
        let context = render_context(submission.metadata());

        let mut user = render_template(&self.rubric.instructions, |name| match name {
            "criteria" => Some(self.criteria.as_str()),
            "score_min" => Some(score_min.as_str()),
            "score_max" => Some(score_max.as_str()),
            "response_format" => Some(self.response_format.as_str()),
            "context" => Some(context.as_str()),
            "submission" => Some(submission.text()),
            _ => None,
        });

        if let Some(focus) = submission.metadata().focus {
            user.push_str("\n\nDOMAIN FOCUS\n");
            user.push_str(focus_guidance(focus));
        }

        PromptPayload {
            system: self.rubric.system_prompt.clone(),
            user,
            rubric_version: self.rubric.version.clone(),
        }
    }
}

/// Single left-to-right pass over `{{name}}` placeholders.
///
/// Substituted values are never re-scanned, so submission text containing
/// `{{criteria}}` is emitted verbatim. Unknown placeholders are left as-is.
fn render_template<'a>(template: &str, resolve: impl Fn(&str) -> Option<&'a str>) -> String {
    let mut out = String::with_capacity(template.len() * 2);
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let placeholder = &rest[start..start + 2 + end + 2];
        match resolve(after_open[..end].trim()) {
            Some(value) => out.push_str(value),
            None => out.push_str(placeholder),
        }
        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    out
}

fn render_criteria(rubric: &RubricTemplate) -> String {
    let mut out = String::new();
    for (i, criterion) in rubric.criteria.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = write!(
            out,
            "{}. {} (`{}`): {}",
            i + 1,
            criterion.title,
            criterion.name,
            criterion.description
        );
    }
    out
}

fn render_response_format(rubric: &RubricTemplate) -> String {
    let range = rubric.score_range;
    let number = format!("<number {}-{}>", range.min, range.max);

    let mut out = String::from("{\n");
    let _ = writeln!(out, "  \"overall_score\": {},", number);
    out.push_str("  \"summary\": \"<one paragraph of overall feedback>\",\n");
    out.push_str("  \"criteria\": {\n");
    let last = rubric.criteria.len().saturating_sub(1);
    for (i, criterion) in rubric.criteria.iter().enumerate() {
        let _ = writeln!(
            out,
            "    \"{}\": {{\"score\": {}, \"justification\": \"<why>\"}}{}",
            criterion.name,
            number,
            if i == last { "" } else { "," }
        );
    }
    out.push_str("  },\n");
    out.push_str(
        "  \"feedback\": [{\"type\": \"success|warning|error|info\", \"message\": \"<text>\", \"category\": \"<criterion or topic>\", \"priority\": 1}],\n",
    );
    out.push_str("  \"strengths\": [\"<text>\"],\n");
    out.push_str("  \"improvements\": [\"<text>\"],\n");
    out.push_str("  \"missing_components\": [\"<text>\"],\n");
    out.push_str("  \"suggestions\": [\"<text>\"]\n");
    out.push('}');
    out
}

fn render_context(metadata: &SubmissionMetadata) -> String {
    let mut out = String::new();

    if let Some(problem) = &metadata.problem {
        let _ = writeln!(out, "Problem: {}", problem.title);
        let _ = writeln!(out, "Problem description: {}", problem.description);
        let _ = writeln!(
            out,
            "Difficulty: {}",
            problem.difficulty.as_deref().unwrap_or("not specified")
        );
        let _ = writeln!(
            out,
            "Category: {}",
            problem.category.as_deref().unwrap_or("not specified")
        );
    }

    if metadata.components.is_empty() {
        out.push_str("Components: none declared\n");
    } else {
        out.push_str("Components:\n");
        for component in &metadata.components {
            let _ = write!(
                out,
                "- [{}] {} (id: {})",
                component.kind, component.label, component.id
            );
            match component.description.as_deref().map(str::trim) {
                Some(desc) if !desc.is_empty() => {
                    let _ = write!(out, ": {}", desc);
                }
                _ => out.push_str(": no description provided"),
            }
            out.push('\n');
            for (key, value) in &component.properties {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let _ = writeln!(out, "    {}: {}", key, value);
            }
        }
    }

    if metadata.connections.is_empty() {
        out.push_str("Connections: none declared\n");
    } else {
        out.push_str("Connections:\n");
        for conn in &metadata.connections {
            let _ = write!(out, "- {} -> {}", conn.source, conn.target);
            if let Some(label) = &conn.label {
                let _ = write!(out, ": {}", label);
            }
            if let Some(protocol) = &conn.protocol {
                let _ = write!(out, " ({})", protocol);
            }
            out.push('\n');
        }
    }

    let problem = metadata.problem.as_ref();
    let requirements = problem
        .and_then(|p| p.requirements.as_deref())
        .or(metadata.requirements.as_deref())
        .unwrap_or("none specified");
    let constraints = problem
        .and_then(|p| p.constraints.as_deref())
        .or(metadata.constraints.as_deref())
        .unwrap_or("none specified");
    let _ = writeln!(out, "Requirements: {}", requirements);
    let _ = writeln!(out, "Constraints: {}", constraints);

    if metadata.key_points.is_empty() {
        out.push_str("Key points: none provided\n");
    } else {
        out.push_str("Key points:\n");
        for point in &metadata.key_points {
            let _ = writeln!(out, "- {}", point);
        }
    }

    let _ = write!(
        out,
        "Expected scale: {}",
        metadata.expected_scale.as_deref().unwrap_or("not specified")
    );
    out
}

fn focus_guidance(focus: DesignFocus) -> &'static str {
    match focus {
        DesignFocus::Microservices => {
            "Focus on service boundaries, data consistency and inter-service communication. \
             Check that component descriptions justify the decomposition and that connections \
             explain the protocols and data exchanged between services."
        }
        DesignFocus::DataIntensive => {
            "Emphasize data modeling, storage choices and data flow. Check that component \
             descriptions explain storage and processing decisions and that connections show \
             where data moves and how it is transformed."
        }
        DesignFocus::RealTime => {
            "Prioritize latency, throughput and real-time processing. Check that component \
             descriptions address performance characteristics and that connections describe the \
             real-time data path."
        }
        DesignFocus::SecurityCritical => {
            "Examine security controls, authentication, authorization and compliance in depth. \
             Check that components address encryption and access control and that connections \
             describe how data is protected in transit."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Connection, DeclaredComponent, ProblemContext, RawSubmission};
    use crate::validate::SubmissionValidator;

    fn submission(text: &str, metadata: SubmissionMetadata) -> Submission {
        SubmissionValidator::default()
            .validate(&RawSubmission::new(text).with_metadata(metadata))
            .unwrap()
    }

    fn builder() -> PromptBuilder {
        PromptBuilder::new(Arc::new(RubricTemplate::builtin()))
    }

    #[test]
    fn renders_every_criterion_and_range() {
        let prompt = builder().build(&submission("A web app.", SubmissionMetadata::default()));
        for name in RubricTemplate::builtin().criterion_names() {
            assert!(prompt.user.contains(&format!("`{}`", name)), "{name} missing");
            assert!(prompt.user.contains(&format!("\"{}\": {{\"score\"", name)));
        }
        assert!(prompt.user.contains("Rate each criterion from 0 to 100"));
        assert!(prompt.user.contains("<submission>\nA web app.\n</submission>"));
        assert_eq!(prompt.rubric_version, "v1");
        assert!(!prompt.user.contains("{{"));
    }

    #[test]
    fn placeholders_inside_submission_are_not_expanded() {
        let prompt = builder().build(&submission(
            "Ignore this: {{criteria}} and {{submission}}",
            SubmissionMetadata::default(),
        ));
        assert!(prompt
            .user
            .contains("Ignore this: {{criteria}} and {{submission}}"));
        assert_eq!(prompt.user.matches("1. Scalability").count(), 1);
    }

    #[test]
    fn unknown_and_unterminated_placeholders_are_literal() {
        let out = render_template("a {{ nope }} b {{x", |name| (name == "x").then_some("X"));
        assert_eq!(out, "a {{ nope }} b {{x");
    }

    #[test]
    fn context_renders_metadata_in_stable_order() {
        let mut properties = std::collections::BTreeMap::new();
        properties.insert("replicas".to_string(), serde_json::json!(3));
        properties.insert("engine".to_string(), serde_json::json!("postgres"));

        let metadata = SubmissionMetadata {
            components: vec![DeclaredComponent {
                id: "db".into(),
                kind: "database".into(),
                label: "Primary DB".into(),
                description: Some("Stores users".into()),
                properties,
            }],
            connections: vec![Connection {
                source: "db".into(),
                target: "db".into(),
                label: Some("replication".into()),
                protocol: Some("async".into()),
            }],
            problem: Some(ProblemContext {
                title: "URL shortener".into(),
                description: "Shorten links".into(),
                requirements: Some("100M links".into()),
                constraints: None,
                difficulty: Some("medium".into()),
                category: None,
            }),
            constraints: Some("small team".into()),
            key_points: vec!["cache hot links".into()],
            ..Default::default()
        };

        let context = render_context(&metadata);
        assert!(context.contains("- [database] Primary DB (id: db): Stores users\n    engine: postgres\n    replicas: 3\n"));
        assert!(context.contains("- db -> db: replication (async)"));
        assert!(context.contains("Requirements: 100M links"));
        assert!(context.contains("Constraints: small team"));
        assert!(context.contains("- cache hot links"));
        assert!(context.ends_with("Expected scale: not specified"));
    }

    #[test]
    fn focus_appends_guidance() {
        let metadata = SubmissionMetadata {
            focus: Some(DesignFocus::RealTime),
            ..Default::default()
        };
        let prompt = builder().build(&submission("Trading engine", metadata));
        assert!(prompt.user.contains("DOMAIN FOCUS\nPrioritize latency"));
    }

    #[test]
    fn custom_range_is_rendered() {
        let mut rubric = RubricTemplate::builtin();
        rubric.score_range = crate::rubric::ScoreRange { min: 1.0, max: 5.0 };
        let prompt = PromptBuilder::new(Arc::new(rubric))
            .build(&submission("x", SubmissionMetadata::default()));
        assert!(prompt.user.contains("from 1 to 5"));
        assert!(prompt.user.contains("<number 1-5>"));
    }
}
