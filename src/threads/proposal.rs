//! Clustering proposal produced by the external inference call.
//!
//! Nothing in here is trusted: the shape is parsed with serde, and the
//! consistency rules live in [`super::validator`].

use serde::{Deserialize, Serialize};

/// Sentinel used by the model for "this node starts a new thread"
pub const NEW_THREAD_SENTINEL: &str = "NEW";

/// Where a proposal puts one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ThreadTarget {
    New,
    Existing(String),
}

impl From<String> for ThreadTarget {
    fn from(value: String) -> Self {
        if value == NEW_THREAD_SENTINEL {
            ThreadTarget::New
        } else {
            ThreadTarget::Existing(value)
        }
    }
}

impl From<ThreadTarget> for String {
    fn from(value: ThreadTarget) -> Self {
        match value {
            ThreadTarget::New => NEW_THREAD_SENTINEL.to_string(),
            ThreadTarget::Existing(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAssignment {
    pub node_index: usize,
    pub thread_id: ThreadTarget,
}

/// Metadata changes for an existing thread. Absent fields are left alone;
/// milestones are appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThreadPatch {
    pub thread_id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub current_phase: Option<String>,
    pub current_focus: Option<String>,
    pub milestones: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NewThreadDef {
    pub title: String,
    pub summary: String,
    pub current_phase: Option<String>,
    pub current_focus: Option<String>,
    pub node_indices: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusteringProposal {
    pub assignments: Vec<NodeAssignment>,
    pub thread_updates: Vec<ThreadPatch>,
    pub new_threads: Vec<NewThreadDef>,
}

impl ClusteringProposal {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Ids of existing threads named by assignments or patches, in first-seen order.
    pub fn referenced_thread_ids(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        let assigned = self.assignments.iter().filter_map(|a| match &a.thread_id {
            ThreadTarget::Existing(id) => Some(id.as_str()),
            ThreadTarget::New => None,
        });
        let patched = self.thread_updates.iter().map(|p| p.thread_id.as_str());

        assigned
            .chain(patched)
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_proposal() {
        let raw = r#"{
            "assignments": [
                {"nodeIndex": 0, "threadId": "thr_a"},
                {"nodeIndex": 1, "threadId": "NEW"}
            ],
            "threadUpdates": [
                {"threadId": "thr_a", "currentPhase": "debugging", "milestones": ["found root cause"]}
            ],
            "newThreads": [
                {"title": "Write docs", "summary": "README pass", "nodeIndices": [1]}
            ]
        }"#;

        let proposal = ClusteringProposal::from_json(raw).unwrap();

        assert_eq!(proposal.assignments.len(), 2);
        assert_eq!(proposal.assignments[0].thread_id, ThreadTarget::Existing("thr_a".to_string()));
        assert_eq!(proposal.assignments[1].thread_id, ThreadTarget::New);
        assert_eq!(proposal.thread_updates[0].current_phase.as_deref(), Some("debugging"));
        assert_eq!(proposal.thread_updates[0].title, None);
        assert_eq!(proposal.thread_updates[0].milestones, vec!["found root cause"]);
        assert_eq!(proposal.new_threads[0].node_indices, vec![1]);
        assert_eq!(proposal.new_threads[0].current_focus, None);
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let proposal = ClusteringProposal::from_json(r#"{"assignments": []}"#).unwrap();
        assert!(proposal.thread_updates.is_empty());
        assert!(proposal.new_threads.is_empty());
    }

    #[test]
    fn test_negative_index_is_a_parse_error() {
        let raw = r#"{"assignments": [{"nodeIndex": -1, "threadId": "NEW"}]}"#;
        assert!(ClusteringProposal::from_json(raw).is_err());
    }

    #[test]
    fn test_referenced_thread_ids_are_deduplicated() {
        let proposal = ClusteringProposal {
            assignments: vec![
                NodeAssignment { node_index: 0, thread_id: ThreadTarget::Existing("t1".into()) },
                NodeAssignment { node_index: 1, thread_id: ThreadTarget::New },
                NodeAssignment { node_index: 2, thread_id: ThreadTarget::Existing("t1".into()) },
            ],
            thread_updates: vec![
                ThreadPatch { thread_id: "t2".into(), ..Default::default() },
                ThreadPatch { thread_id: "t1".into(), ..Default::default() },
            ],
            new_threads: vec![],
        };

        assert_eq!(proposal.referenced_thread_ids(), vec!["t1", "t2"]);
    }
}
