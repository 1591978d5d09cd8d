//! Collapse queries and relevance predicates.
//!
//! A query is free text with optional scope filters:
//!
//! ```text
//! type:hypothesis agent:scout-7 latency regression
//! ```
//!
//! `type:` and `agent:` filters may repeat (any match passes); bare words
//! are keywords and must all appear in the thought's payload.

use crate::thought::{Thought, ThoughtType};
use crate::types::{AgentId, CollectiveError, Result};
use serde::{Deserialize, Serialize};

/// Parsed scope filters of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryScope {
    pub thought_types: Vec<ThoughtType>,
    pub agents: Vec<AgentId>,
    /// Lowercased keywords
    pub keywords: Vec<String>,
}

impl QueryScope {
    pub fn parse(text: &str) -> Result<Self> {
        let mut scope = QueryScope::default();

        for token in text.split_whitespace() {
            let Some((prefix, value)) = token.split_once(':') else {
                scope.keywords.push(token.to_lowercase());
                continue;
            };

            if value.is_empty() {
                return Err(CollectiveError::invalid_query(format!(
                    "empty value for '{}:'",
                    prefix
                )));
            }

            match prefix.to_lowercase().as_str() {
                "type" => {
                    let thought_type = value.parse::<ThoughtType>().map_err(|_| {
                        CollectiveError::invalid_query(format!("unknown thought type '{}'", value))
                    })?;
                    if !scope.thought_types.contains(&thought_type) {
                        scope.thought_types.push(thought_type);
                    }
                }
                "agent" => scope.agents.push(value.to_string()),
                other => {
                    return Err(CollectiveError::invalid_query(format!(
                        "unknown scope prefix '{}'",
                        other
                    )))
                }
            }
        }

        Ok(scope)
    }

    pub fn is_unrestricted(&self) -> bool {
        self.thought_types.is_empty() && self.agents.is_empty() && self.keywords.is_empty()
    }
}

/// A validated collapse request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollapseQuery {
    /// The query exactly as submitted; recorded on emitted patterns
    pub text: String,
    pub scope: QueryScope,
    pub min_coherence: f64,
}

impl CollapseQuery {
    pub fn new(text: impl Into<String>, min_coherence: f64) -> Result<Self> {
        let text = text.into();
        if !min_coherence.is_finite() || !(0.0..=1.0).contains(&min_coherence) {
            return Err(CollectiveError::invalid_query(format!(
                "min_coherence must be in [0, 1], got {}",
                min_coherence
            )));
        }
        let scope = QueryScope::parse(&text)?;
        Ok(Self {
            text,
            scope,
            min_coherence,
        })
    }
}

/// Decides which thoughts a query considers.
pub trait RelevancePredicate: Send + Sync {
    /// Reject queries this predicate cannot evaluate.
    fn validate(&self, _query: &CollapseQuery) -> Result<()> {
        Ok(())
    }

    /// Whether `thought` is in scope. An error excludes only this thought.
    fn is_relevant(&self, thought: &Thought, query: &CollapseQuery) -> Result<bool>;
}

/// Every thought is relevant regardless of the query.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchAll;

impl RelevancePredicate for MatchAll {
    fn is_relevant(&self, _thought: &Thought, _query: &CollapseQuery) -> Result<bool> {
        Ok(true)
    }
}

/// Applies the parsed [`QueryScope`]: type and agent filters, then
/// case-insensitive keyword containment over the payload text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeRelevance;

impl RelevancePredicate for ScopeRelevance {
    fn is_relevant(&self, thought: &Thought, query: &CollapseQuery) -> Result<bool> {
        let scope = &query.scope;

        if !scope.thought_types.is_empty() && !scope.thought_types.contains(&thought.thought_type) {
            return Ok(false);
        }
        if !scope.agents.is_empty() && !scope.agents.iter().any(|a| *a == thought.agent_id) {
            return Ok(false);
        }
        if scope.keywords.is_empty() {
            return Ok(true);
        }

        let text = payload_text(&thought.content)?.to_lowercase();
        Ok(scope.keywords.iter().all(|k| text.contains(k.as_str())))
    }
}

fn payload_text(content: &serde_json::Value) -> Result<String> {
    match content {
        serde_json::Value::String(s) => Ok(s.clone()),
        other => serde_json::to_string(other)
            .map_err(|e| CollectiveError::Internal(anyhow::anyhow!("payload render failed: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thought::NewThought;
    use crate::types::ThoughtId;
    use chrono::Utc;
    use serde_json::json;

    fn thought(agent: &str, thought_type: ThoughtType, content: serde_json::Value) -> Thought {
        NewThought::new(agent, thought_type, content, 0.5, vec![])
            .into_thought(ThoughtId(1), Utc::now())
    }

    #[test]
    fn test_parse_scope() {
        let scope = QueryScope::parse("type:hypothesis agent:scout Latency type:insight").unwrap();
        assert_eq!(
            scope.thought_types,
            vec![ThoughtType::Hypothesis, ThoughtType::Insight]
        );
        assert_eq!(scope.agents, vec!["scout".to_string()]);
        assert_eq!(scope.keywords, vec!["latency".to_string()]);
        assert!(QueryScope::parse("   ").unwrap().is_unrestricted());
    }

    #[test]
    fn test_invalid_queries() {
        assert!(matches!(
            QueryScope::parse("type:rumor"),
            Err(CollectiveError::InvalidQuery(_))
        ));
        assert!(matches!(
            QueryScope::parse("color:red"),
            Err(CollectiveError::InvalidQuery(_))
        ));
        assert!(QueryScope::parse("agent:").is_err());
        assert!(CollapseQuery::new("", 1.5).is_err());
        assert!(CollapseQuery::new("", f64::NAN).is_err());
        assert!(CollapseQuery::new("", 0.0).is_ok());
    }

    #[test]
    fn test_scope_relevance_filters() {
        let t = thought(
            "scout",
            ThoughtType::Hypothesis,
            json!({"note": "Latency spikes after deploy"}),
        );

        let check = |q: &str| {
            ScopeRelevance
                .is_relevant(&t, &CollapseQuery::new(q, 0.5).unwrap())
                .unwrap()
        };

        assert!(check(""));
        assert!(check("latency deploy"));
        assert!(!check("latency rollback"));
        assert!(check("type:hypothesis"));
        assert!(!check("type:concern"));
        assert!(check("agent:scout agent:other"));
        assert!(!check("agent:other"));
    }

    #[test]
    fn test_string_payload_is_matched_directly() {
        let t = thought("a", ThoughtType::Observation, json!("Disk pressure on node-3"));
        let query = CollapseQuery::new("disk node-3", 0.5).unwrap();
        assert!(ScopeRelevance.is_relevant(&t, &query).unwrap());
        assert!(MatchAll.is_relevant(&t, &CollapseQuery::new("nothing", 0.5).unwrap()).unwrap());
    }
}
