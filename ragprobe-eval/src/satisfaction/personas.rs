//! Built-in simulated user personas.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// A simulated user. Every trait is in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Persona {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Tolerance for delays and indirection.
    pub patience: f32,
    /// Domain knowledge.
    pub expertise: f32,
    pub verbosity: f32,
    /// How much friction the user accepts before getting annoyed.
    pub frustration_tolerance: f32,
    pub clarity_of_communication: f32,
    /// Tendency to ask technical questions.
    pub technical_level: f32,
}

static PERSONAS: LazyLock<BTreeMap<&'static str, Persona>> = LazyLock::new(|| {
    BTreeMap::from([
        (
            "clarification_cooperative",
            Persona {
                id: "clarification-cooperative",
                name: "Clarification Cooperative",
                description: "Helpful user who provides good clarifications when asked.",
                patience: 0.8,
                expertise: 0.5,
                verbosity: 0.6,
                frustration_tolerance: 0.7,
                clarity_of_communication: 0.8,
                technical_level: 0.4,
            },
        ),
        (
            "impatient_minimalist",
            Persona {
                id: "impatient-minimalist",
                name: "Impatient Minimalist",
                description: "Terse, impatient user. Wants quick, concrete answers.",
                patience: 0.2,
                expertise: 0.6,
                verbosity: 0.2,
                frustration_tolerance: 0.3,
                clarity_of_communication: 0.6,
                technical_level: 0.5,
            },
        ),
        (
            "curious_novice",
            Persona {
                id: "curious-novice",
                name: "Curious Novice",
                description: "Curious beginner. Asks many questions, easily wanders, but cooperative.",
                patience: 0.7,
                expertise: 0.2,
                verbosity: 0.8,
                frustration_tolerance: 0.6,
                clarity_of_communication: 0.5,
                technical_level: 0.2,
            },
        ),
    ])
});

/// Look up a persona by registry key (e.g. `impatient_minimalist`).
pub fn persona(key: &str) -> Option<&'static Persona> {
    PERSONAS.get(key)
}

/// All personas as `(key, persona)`, ordered by key.
pub fn personas() -> impl Iterator<Item = (&'static str, &'static Persona)> {
    PERSONAS.iter().map(|(key, persona)| (*key, persona))
}
