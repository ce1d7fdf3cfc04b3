//! Structural checks on an untrusted clustering proposal.
//!
//! Runs before anything touches storage. Checks, in order:
//! 1. every node index in `[0, N)` has exactly one assignment
//! 2. new-thread definitions only list valid indices, each at most once overall
//! 3. NEW assignments and new-thread membership agree in both directions

use super::error::ValidationError;
use super::proposal::{ClusteringProposal, ThreadTarget};

pub fn validate_proposal(
    proposal: &ClusteringProposal,
    node_count: usize,
) -> Result<(), ValidationError> {
    if proposal.assignments.len() != node_count {
        return Err(ValidationError::AssignmentCountMismatch {
            expected: node_count,
            actual: proposal.assignments.len(),
        });
    }

    let mut targets: Vec<Option<&ThreadTarget>> = vec![None; node_count];
    for assignment in &proposal.assignments {
        let index = assignment.node_index;
        if index >= node_count {
            return Err(ValidationError::AssignmentIndexOutOfRange {
                index,
                len: node_count,
            });
        }
        if targets[index].is_some() {
            return Err(ValidationError::DuplicateAssignment { index });
        }
        targets[index] = Some(&assignment.thread_id);
    }

    if let Some(index) = targets.iter().position(Option::is_none) {
        return Err(ValidationError::MissingAssignment { index });
    }

    let mut claimed = vec![false; node_count];
    for (thread, def) in proposal.new_threads.iter().enumerate() {
        if def.node_indices.is_empty() {
            return Err(ValidationError::EmptyNewThread { thread });
        }
        for &index in &def.node_indices {
            if index >= node_count {
                return Err(ValidationError::NewThreadIndexOutOfRange {
                    thread,
                    index,
                    len: node_count,
                });
            }
            if claimed[index] {
                return Err(ValidationError::NodeClaimedTwice { index });
            }
            claimed[index] = true;
        }
    }

    for (index, target) in targets.iter().enumerate() {
        match (target, claimed[index]) {
            (Some(ThreadTarget::New), false) => {
                return Err(ValidationError::NewAssignmentWithoutThread { index });
            }
            (Some(ThreadTarget::Existing(thread_id)), true) => {
                return Err(ValidationError::ListedNodeNotAssignedNew {
                    index,
                    thread_id: thread_id.clone(),
                });
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threads::proposal::{NewThreadDef, NodeAssignment};

    fn existing(index: usize, id: &str) -> NodeAssignment {
        NodeAssignment {
            node_index: index,
            thread_id: ThreadTarget::Existing(id.to_string()),
        }
    }

    fn new(index: usize) -> NodeAssignment {
        NodeAssignment {
            node_index: index,
            thread_id: ThreadTarget::New,
        }
    }

    fn new_thread(indices: &[usize]) -> NewThreadDef {
        NewThreadDef {
            title: "X".to_string(),
            node_indices: indices.to_vec(),
            ..Default::default()
        }
    }

    fn proposal(assignments: Vec<NodeAssignment>, new_threads: Vec<NewThreadDef>) -> ClusteringProposal {
        ClusteringProposal {
            assignments,
            thread_updates: vec![],
            new_threads,
        }
    }

    #[test]
    fn test_valid_mixed_proposal() {
        let p = proposal(
            vec![existing(0, "t1"), existing(1, "t1"), new(2)],
            vec![new_thread(&[2])],
        );
        assert_eq!(validate_proposal(&p, 3), Ok(()));
    }

    #[test]
    fn test_assignment_order_does_not_matter() {
        let p = proposal(vec![new(1), existing(0, "t1")], vec![new_thread(&[1])]);
        assert_eq!(validate_proposal(&p, 2), Ok(()));
    }

    #[test]
    fn test_empty_batch_with_empty_proposal() {
        assert_eq!(validate_proposal(&ClusteringProposal::default(), 0), Ok(()));
    }

    #[test]
    fn test_too_few_and_too_many_assignments() {
        let short = proposal(vec![existing(0, "t1")], vec![]);
        assert_eq!(
            validate_proposal(&short, 2),
            Err(ValidationError::AssignmentCountMismatch { expected: 2, actual: 1 })
        );

        let long = proposal(vec![existing(0, "t1"), existing(1, "t1"), existing(2, "t1")], vec![]);
        assert_eq!(
            validate_proposal(&long, 2),
            Err(ValidationError::AssignmentCountMismatch { expected: 2, actual: 3 })
        );
    }

    #[test]
    fn test_duplicate_index_rejected() {
        // Right length, but index 1 is missing because 0 appears twice
        let p = proposal(vec![existing(0, "t1"), existing(0, "t2")], vec![]);
        assert_eq!(
            validate_proposal(&p, 2),
            Err(ValidationError::DuplicateAssignment { index: 0 })
        );
    }

    #[test]
    fn test_out_of_range_assignment_rejected() {
        let p = proposal(vec![existing(0, "t1"), existing(5, "t1")], vec![]);
        assert_eq!(
            validate_proposal(&p, 2),
            Err(ValidationError::AssignmentIndexOutOfRange { index: 5, len: 2 })
        );
    }

    #[test]
    fn test_new_thread_index_out_of_range() {
        let p = proposal(vec![new(0)], vec![new_thread(&[0, 3])]);
        assert_eq!(
            validate_proposal(&p, 1),
            Err(ValidationError::NewThreadIndexOutOfRange { thread: 0, index: 3, len: 1 })
        );
    }

    #[test]
    fn test_node_claimed_by_two_new_threads() {
        let p = proposal(vec![new(0), new(1)], vec![new_thread(&[0, 1]), new_thread(&[1])]);
        assert_eq!(
            validate_proposal(&p, 2),
            Err(ValidationError::NodeClaimedTwice { index: 1 })
        );
    }

    #[test]
    fn test_node_listed_twice_in_same_definition() {
        let p = proposal(vec![new(0)], vec![new_thread(&[0, 0])]);
        assert_eq!(
            validate_proposal(&p, 1),
            Err(ValidationError::NodeClaimedTwice { index: 0 })
        );
    }

    #[test]
    fn test_empty_new_thread_rejected() {
        let p = proposal(vec![existing(0, "t1")], vec![new_thread(&[])]);
        assert_eq!(
            validate_proposal(&p, 1),
            Err(ValidationError::EmptyNewThread { thread: 0 })
        );
    }

    #[test]
    fn test_new_assignment_without_definition() {
        let p = proposal(vec![existing(0, "t1"), new(1)], vec![]);
        assert_eq!(
            validate_proposal(&p, 2),
            Err(ValidationError::NewAssignmentWithoutThread { index: 1 })
        );
    }

    #[test]
    fn test_definition_member_not_assigned_new() {
        let p = proposal(vec![existing(0, "t1"), new(1)], vec![new_thread(&[0, 1])]);
        assert_eq!(
            validate_proposal(&p, 2),
            Err(ValidationError::ListedNodeNotAssignedNew {
                index: 0,
                thread_id: "t1".to_string()
            })
        );
    }
}
