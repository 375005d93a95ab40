//! User-satisfaction evaluation with simulated personas.

pub mod conversation;
pub mod goals;
pub mod judge;
pub mod personas;
pub mod runner;
pub mod simulator;

pub use conversation::Conversation;
pub use goals::{Complexity, Goal, goal, goals};
pub use judge::{TurnJudge, TurnMetric, TurnScores};
pub use personas::{Persona, persona, personas};
pub use runner::{
    ConversationReport, ConversationRunner, ConversationTurn, SatisfactionParams,
    SatisfactionRequest, SatisfactionSummary,
};
pub use simulator::UserSimulator;
