// src/cohort.rs
//
// Cohort assignment: a worker's sequence number decides whether it provides
// or seeks. Pure predicate, evaluated once per run.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sequence number handed out by the rendezvous service (1-indexed)
pub type SequenceNumber = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Announces every workload identifier
    Provider,
    /// Looks up holders of every workload identifier
    Seeker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Provider => "provider",
            Role::Seeker => "seeker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider iff `seq <= nodes_providing`
///
/// `nodes_providing <= 0` makes every worker a seeker; a value at or above the
/// instance count makes every worker a provider. Both are valid runs.
pub fn assign_role(seq: SequenceNumber, nodes_providing: i64) -> Role {
    if seq <= nodes_providing {
        Role::Provider
    } else {
        Role::Seeker
    }
}

/// Provider and seeker sequence numbers for a swarm of `total` workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortSplit {
    pub providers: Vec<SequenceNumber>,
    pub seekers: Vec<SequenceNumber>,
}

impl CohortSplit {
    /// No seeker will run (every worker provides)
    pub fn is_all_provide(&self) -> bool {
        self.seekers.is_empty()
    }

    /// No provider will run (every worker seeks)
    pub fn is_all_seek(&self) -> bool {
        self.providers.is_empty()
    }
}

pub fn partition(total: usize, nodes_providing: i64) -> CohortSplit {
    let mut split = CohortSplit {
        providers: Vec::new(),
        seekers: Vec::new(),
    };
    for seq in 1..=total as SequenceNumber {
        match assign_role(seq, nodes_providing) {
            Role::Provider => split.providers.push(seq),
            Role::Seeker => split.seekers.push(seq),
        }
    }
    split
}
