//! Built-in conversation goals.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Simple => write!(f, "simple"),
            Complexity::Moderate => write!(f, "moderate"),
            Complexity::Complex => write!(f, "complex"),
        }
    }
}

/// What the simulated user is trying to get done.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Goal {
    pub id: &'static str,
    pub description: &'static str,
    pub success_criteria: Vec<&'static str>,
    pub domain: &'static str,
    pub complexity: Complexity,
}

static GOALS: LazyLock<BTreeMap<&'static str, Goal>> = LazyLock::new(|| {
    BTreeMap::from([
        (
            "specific-memory-recall",
            Goal {
                id: "specific-memory-recall",
                description: "Request a specific stored film fact (e.g., a movie's release year or lead actor).",
                success_criteria: vec![
                    "Assistant immediately searches for relevant knowledge.",
                    "Assistant provides the memory if found or clearly explains if not.",
                    "No unnecessary clarification for a clear query.",
                ],
                domain: "film",
                complexity: Complexity::Simple,
            },
        ),
        (
            "multi-turn-disambiguation",
            Goal {
                id: "multi-turn-disambiguation",
                description: "In a multi-turn dialog, clarify an ambiguous film request and deliver a precise answer.",
                success_criteria: vec![
                    "Assistant asks at most one short clarification when critical info is missing.",
                    "Assistant ultimately provides a precise answer to the original intent.",
                    "Avoids speculation; relies only on tool-returned data.",
                ],
                domain: "film",
                complexity: Complexity::Moderate,
            },
        ),
        (
            "preference-storage-accuracy",
            Goal {
                id: "preference-storage-accuracy",
                description: "Capture user film preference (favorite genre/actor) and echo it back accurately later.",
                success_criteria: vec![
                    "Assistant detects that a preference statement was given.",
                    "Stores it (addResource) and later recalls it consistently without distortion.",
                    "Does not conflate differing preferences.",
                ],
                domain: "film",
                complexity: Complexity::Moderate,
            },
        ),
    ])
});

/// Look up a goal by registry key.
pub fn goal(key: &str) -> Option<&'static Goal> {
    GOALS.get(key)
}

/// All goals as `(key, goal)`, ordered by key.
pub fn goals() -> impl Iterator<Item = (&'static str, &'static Goal)> {
    GOALS.iter().map(|(key, goal)| (*key, goal))
}
