use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::dom::NodeId;

use super::change_set::ChangeSet;

/// Update priority. Lower rank applies first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn rank(self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    /// The more urgent of the two.
    pub fn most_urgent(self, other: Priority) -> Priority {
        if other.rank() < self.rank() {
            other
        } else {
            self
        }
    }
}

/// A pending change set for one node.
#[derive(Debug, Clone)]
pub struct UpdateTask {
    pub node: NodeId,
    pub change_set: ChangeSet,
    pub priority: Priority,
    pub timestamp: Instant,
    /// Arrival order; breaks timestamp ties.
    pub(crate) sequence: u64,
}

impl UpdateTask {
    pub(crate) fn order_key(&self) -> (u8, Instant, u64) {
        (self.priority.rank(), self.timestamp, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_are_ordered() {
        assert!(Priority::Critical.rank() < Priority::High.rank());
        assert!(Priority::High.rank() < Priority::Normal.rank());
        assert!(Priority::Normal.rank() < Priority::Low.rank());
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn most_urgent_wins() {
        assert_eq!(Priority::Low.most_urgent(Priority::High), Priority::High);
        assert_eq!(Priority::Critical.most_urgent(Priority::Normal), Priority::Critical);
    }

    #[test]
    fn priorities_deserialize_lowercase() {
        let p: Priority = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(p, Priority::Critical);
    }
}
