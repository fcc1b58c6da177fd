//! Ingest bridge (C8): build-log and retrospective conversion
//!
//! Converts two kinds of upstream record into [`FragmentInput`] ready for
//! [`crate::fragment::materialize`]. Both converters apply the tag
//! namespacing rule before returning.

use std::collections::HashSet;

use crate::fragment::FragmentInput;
use crate::types::{FragmentType, Provenance, SourceType};

/// A single build's outcome, as reported by an upstream build runner.
#[derive(Debug, Clone)]
pub struct BuildLogInput {
    /// Identifier of the build.
    pub build_id: String,
    /// Agent that ran the build.
    pub agent_id: String,
    /// Project the build belongs to.
    pub project_id: String,
    /// Whether the build succeeded.
    pub success: bool,
    /// Captured stdout/stderr, truncated to the first 500 characters when rendered.
    pub output: String,
    /// Error messages, if any.
    pub errors: Vec<String>,
    /// Build duration in milliseconds (not currently rendered into content,
    /// kept for callers that want it in `extra`).
    pub duration_ms: u64,
    /// Epoch ms when the build ran.
    pub timestamp: i64,
}

/// Rewrite `"agent:X"`, `"project:Y"`, `"domain:Z"` style tags to
/// `"agent-X"`, `"project-Y"`, `"domain-Z"`, then collapse duplicates.
#[must_use]
pub fn normalize_tags(tags: impl IntoIterator<Item = String>) -> HashSet<String> {
    const NAMESPACED_PREFIXES: [&str; 3] = ["agent:", "project:", "domain:"];

    tags.into_iter()
        .map(|tag| {
            for prefix in NAMESPACED_PREFIXES {
                if let Some(rest) = tag.strip_prefix(prefix) {
                    let dashed_prefix = &prefix[..prefix.len() - 1];
                    return format!("{dashed_prefix}-{rest}");
                }
            }
            tag
        })
        .collect()
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Convert a build log into a fragment input.
#[must_use]
pub fn build_log_to_fragment(input: BuildLogInput) -> FragmentInput {
    let status_word = if input.success { "SUCCESS" } else { "FAILURE" };
    let content = format!(
        "Build {}: {}\nOutput: {}\nErrors: {}",
        input.build_id,
        status_word,
        truncate_chars(&input.output, 500),
        input.errors.join(", ")
    );

    let tags = normalize_tags([
        "build".to_string(),
        if input.success { "success".to_string() } else { "failure".to_string() },
    ]);

    FragmentInput {
        content,
        fragment_type: Some(if input.success { FragmentType::Episodic } else { FragmentType::Procedural }),
        project_id: input.project_id.clone(),
        agent_id: input.agent_id.clone(),
        relevance: Some(if input.success { 0.6 } else { 0.9 }),
        confidence: Some(if input.success { 0.8 } else { 0.95 }),
        tags: Some(tags),
        provenance: Some(Provenance {
            source_type: SourceType::Build,
            source_id: input.build_id,
            timestamp: input.timestamp,
            originating_agent: input.agent_id,
            project: Some(input.project_id),
        }),
        ..Default::default()
    }
}

/// Convert a batch of retrospective insight strings into one fragment input
/// each.
#[must_use]
pub fn retrospective_to_fragments(
    insights: Vec<String>,
    agent_id: &str,
    project_id: &str,
    timestamp: i64,
) -> Vec<FragmentInput> {
    let tags = normalize_tags(["retrospective".to_string(), "insight".to_string()]);

    insights
        .into_iter()
        .map(|insight| FragmentInput {
            content: insight,
            fragment_type: Some(FragmentType::Semantic),
            project_id: project_id.to_string(),
            agent_id: agent_id.to_string(),
            relevance: Some(0.8),
            confidence: Some(0.7),
            tags: Some(tags.clone()),
            provenance: Some(Provenance {
                source_type: SourceType::Retrospective,
                source_id: String::new(),
                timestamp,
                originating_agent: agent_id.to_string(),
                project: Some(project_id.to_string()),
            }),
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_log_failure_renders_expected_content() {
        let input = BuildLogInput {
            build_id: "bld-1".to_string(),
            agent_id: "agent-1".to_string(),
            project_id: "proj-1".to_string(),
            success: false,
            output: "bootstrap failed".to_string(),
            errors: vec!["TypeError: undefined is not a function".to_string()],
            duration_ms: 1200,
            timestamp: 0,
        };

        let fragment_input = build_log_to_fragment(input);

        assert_eq!(fragment_input.fragment_type, Some(FragmentType::Procedural));
        assert_eq!(fragment_input.relevance, Some(0.9));
        assert!(fragment_input.content.starts_with("Build bld-1: FAILURE"));
        assert!(fragment_input.content.contains("TypeError"));
        let tags = fragment_input.tags.unwrap();
        assert!(tags.contains("build"));
        assert!(tags.contains("failure"));
        assert_eq!(fragment_input.provenance.unwrap().source_type, SourceType::Build);
    }

    #[test]
    fn build_log_success_uses_episodic_defaults() {
        let input = BuildLogInput {
            build_id: "bld-2".to_string(),
            agent_id: "a".to_string(),
            project_id: "p".to_string(),
            success: true,
            output: "ok".to_string(),
            errors: vec![],
            duration_ms: 10,
            timestamp: 0,
        };

        let fragment_input = build_log_to_fragment(input);
        assert_eq!(fragment_input.fragment_type, Some(FragmentType::Episodic));
        assert_eq!(fragment_input.relevance, Some(0.6));
        assert_eq!(fragment_input.confidence, Some(0.8));
    }

    #[test]
    fn retrospective_produces_one_fragment_per_insight() {
        let inputs = retrospective_to_fragments(
            vec!["insight one".to_string(), "insight two".to_string()],
            "agent-1",
            "proj-1",
            0,
        );
        assert_eq!(inputs.len(), 2);
        for input in &inputs {
            assert_eq!(input.fragment_type, Some(FragmentType::Semantic));
            assert_eq!(input.relevance, Some(0.8));
            let tags = input.tags.as_ref().unwrap();
            assert!(tags.contains("retrospective"));
            assert!(tags.contains("insight"));
        }
    }

    #[test]
    fn tag_namespacing_rewrites_and_dedups() {
        let tags = normalize_tags([
            "agent:alice".to_string(),
            "project:nova".to_string(),
            "domain:rust".to_string(),
            "plain".to_string(),
            "agent:alice".to_string(),
        ]);
        assert!(tags.contains("agent-alice"));
        assert!(tags.contains("project-nova"));
        assert!(tags.contains("domain-rust"));
        assert!(tags.contains("plain"));
        assert_eq!(tags.len(), 4);
    }
}
