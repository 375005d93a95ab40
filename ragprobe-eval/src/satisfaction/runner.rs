//! Persona-driven conversation runs.
//!
//! A run alternates simulated user messages and target replies, judging the
//! full transcript after every reply and stopping as soon as the judge says
//! the goal was achieved or the requested number of turns is reached.

use ragprobe_core::{ChatTarget, RetryPolicy, with_retry};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::conversation::Conversation;
use super::goals::{Goal, goal};
use super::judge::{TurnJudge, TurnMetric};
use super::personas::{Persona, persona};
use super::simulator::UserSimulator;
use crate::error::{EvalError, EvalResult};
use crate::progress::{Phase, Progress, ProgressSink};
use crate::single_turn::CHAT_ERROR_MARKER;

pub const DEFAULT_PERSONA: &str = "clarification_cooperative";
pub const DEFAULT_GOAL: &str = "specific-memory-recall";

/// Satisfaction run parameters as received from a caller; every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SatisfactionParams {
    #[serde(default)]
    pub persona_id: Option<String>,
    #[serde(default)]
    pub goal_id: Option<String>,
    #[serde(default)]
    pub turns: Option<i64>,
}

/// A validated satisfaction run.
#[derive(Debug, Clone)]
pub struct SatisfactionRequest {
    pub persona_key: String,
    pub persona: &'static Persona,
    pub goal: &'static Goal,
    pub turns: usize,
}

impl SatisfactionParams {
    /// Resolve defaults and reject unknown ids or an out-of-range turn count.
    pub fn validate(&self, default_turns: usize, max_turns: usize) -> EvalResult<SatisfactionRequest> {
        let persona_key = self.persona_id.as_deref().unwrap_or(DEFAULT_PERSONA);
        let goal_key = self.goal_id.as_deref().unwrap_or(DEFAULT_GOAL);
        let turns = self.turns.unwrap_or(default_turns as i64);

        let persona =
            persona(persona_key).ok_or_else(|| EvalError::UnknownPersona(persona_key.to_string()))?;
        let goal = goal(goal_key).ok_or_else(|| EvalError::UnknownGoal(goal_key.to_string()))?;
        if turns < 1 || turns > max_turns as i64 {
            return Err(EvalError::TurnsOutOfRange {
                turns,
                max: max_turns,
            });
        }

        Ok(SatisfactionRequest {
            persona_key: persona_key.to_string(),
            persona,
            goal,
            turns: turns as usize,
        })
    }
}

/// Where a run is between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initial,
    AwaitingAssistant { turn: usize },
    Judged { turn: usize, goal_achieved: bool },
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub turn: usize,
    pub user_message: String,
    pub assistant_message: String,
    pub metrics: TurnMetric,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SatisfactionSummary {
    /// Percentage of judged turns where the goal counted as achieved.
    pub goal_achieved_rate: f64,
    pub avg_satisfaction: f64,
    pub avg_clarity: f64,
    pub avg_relevance: f64,
    pub avg_completeness: f64,
    pub total_frustration: u64,
}

impl SatisfactionSummary {
    pub fn from_metrics(metrics: &[TurnMetric]) -> Self {
        if metrics.is_empty() {
            return Self::default();
        }
        let n = metrics.len() as f64;
        let avg = |f: fn(&TurnMetric) -> f64| metrics.iter().map(f).sum::<f64>() / n;
        let hits = metrics.iter().filter(|m| m.goal_achieved).count() as f64;
        Self {
            goal_achieved_rate: hits / n * 100.0,
            avg_satisfaction: avg(|m| m.user_satisfaction_score),
            avg_clarity: avg(|m| m.clarity_score),
            avg_relevance: avg(|m| m.relevance_score),
            avg_completeness: avg(|m| m.completeness_score),
            total_frustration: metrics.iter().map(|m| u64::from(m.frustration_incidents)).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationReport {
    /// Persona slug.
    pub persona: String,
    pub goal: String,
    pub turns_requested: usize,
    pub summary: SatisfactionSummary,
    pub per_turn_metrics: Vec<TurnMetric>,
    pub conversation: Conversation,
    pub conversation_turns: Vec<ConversationTurn>,
}

pub struct ConversationRunner<'a> {
    simulator: UserSimulator<'a>,
    judge: TurnJudge<'a>,
    target: &'a dyn ChatTarget,
    ask_retry: RetryPolicy,
}

impl<'a> ConversationRunner<'a> {
    pub fn new(
        simulator: UserSimulator<'a>,
        judge: TurnJudge<'a>,
        target: &'a dyn ChatTarget,
        ask_retry: RetryPolicy,
    ) -> Self {
        Self {
            simulator,
            judge,
            target,
            ask_retry,
        }
    }

    async fn ask(&self, conversation: &Conversation, rid: Option<&str>) -> String {
        match with_retry(&self.ask_retry, "ask_application", || {
            self.target.chat(conversation.messages(), rid)
        })
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "Target chat failed during conversation");
                format!("{CHAT_ERROR_MARKER} {e}")
            }
        }
    }

    /// Run one conversation. Only a simulator failure aborts the run; target
    /// and judge failures are recorded in the transcript and metrics.
    pub async fn run(
        &self,
        request: &SatisfactionRequest,
        rid: Option<&str>,
        progress: &dyn ProgressSink,
    ) -> EvalResult<ConversationReport> {
        let persona = request.persona;
        let goal = request.goal;
        info!(
            persona = persona.id,
            goal = goal.id,
            turns = request.turns,
            "Starting simulated conversation"
        );

        let mut conversation = Conversation::new();
        let mut turns: Vec<ConversationTurn> = Vec::new();
        let mut user_message = String::new();
        let mut state = RunState::Initial;

        loop {
            state = match state {
                RunState::Initial => {
                    user_message = self.simulator.opening(persona, goal).await?;
                    conversation.push_user(user_message.clone());
                    RunState::AwaitingAssistant { turn: 1 }
                }
                RunState::AwaitingAssistant { turn } => {
                    let reply = self.ask(&conversation, rid).await;
                    conversation.push_assistant(reply.clone());

                    let metrics = self.judge.evaluate(persona, goal, &conversation).await.normalized();
                    let goal_achieved = metrics.goal_achieved;
                    info!(
                        turn,
                        satisfaction = metrics.user_satisfaction_score,
                        goal_achieved,
                        "Turn judged"
                    );
                    turns.push(ConversationTurn {
                        turn,
                        user_message: std::mem::take(&mut user_message),
                        assistant_message: reply,
                        metrics,
                    });
                    progress.report(Progress::new(turn, request.turns, Phase::Conversation));
                    RunState::Judged { turn, goal_achieved }
                }
                RunState::Judged { turn, goal_achieved } => {
                    if goal_achieved || turn >= request.turns {
                        RunState::Done
                    } else {
                        user_message = self.simulator.follow_up(persona, goal, &conversation).await?;
                        conversation.push_user(user_message.clone());
                        RunState::AwaitingAssistant { turn: turn + 1 }
                    }
                }
                RunState::Done => break,
            };
        }

        progress.report(Progress::new(request.turns, request.turns, Phase::Conversation));

        let per_turn_metrics: Vec<TurnMetric> = turns.iter().map(|t| t.metrics.clone()).collect();
        let summary = SatisfactionSummary::from_metrics(&per_turn_metrics);
        info!(
            turns_run = turns.len(),
            goal_achieved_rate = summary.goal_achieved_rate,
            "Conversation finished"
        );

        Ok(ConversationReport {
            persona: persona.id.to_string(),
            goal: goal.id.to_string(),
            turns_requested: request.turns,
            summary,
            per_turn_metrics,
            conversation,
            conversation_turns: turns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use pretty_assertions::assert_eq;
    use ragprobe_core::{MockChatTarget, MockCompletionProvider};

    fn params(persona: &str, goal: &str, turns: i64) -> SatisfactionParams {
        SatisfactionParams {
            persona_id: Some(persona.into()),
            goal_id: Some(goal.into()),
            turns: Some(turns),
        }
    }

    #[test]
    fn test_defaults_resolve() {
        let request = SatisfactionParams::default().validate(4, 12).unwrap();
        assert_eq!(request.persona_key, DEFAULT_PERSONA);
        assert_eq!(request.goal.id, DEFAULT_GOAL);
        assert_eq!(request.turns, 4);
    }

    #[test]
    fn test_validation_errors() {
        let err = params("nobody", DEFAULT_GOAL, 4).validate(4, 12).unwrap_err();
        assert_eq!(err.to_string(), "Unknown persona_id: nobody");
        let err = params(DEFAULT_PERSONA, "nothing", 4).validate(4, 12).unwrap_err();
        assert_eq!(err.to_string(), "Unknown goal_id: nothing");
        assert!(matches!(
            params(DEFAULT_PERSONA, DEFAULT_GOAL, 0).validate(4, 12),
            Err(EvalError::TurnsOutOfRange { turns: 0, .. })
        ));
        assert!(params(DEFAULT_PERSONA, DEFAULT_GOAL, 13).validate(4, 12).is_err());
        assert!(params(DEFAULT_PERSONA, DEFAULT_GOAL, 12).validate(4, 12).is_ok());
    }

    #[test]
    fn test_summary_of_no_turns_is_zero() {
        assert_eq!(SatisfactionSummary::from_metrics(&[]), SatisfactionSummary::default());
    }

    fn judge_json(goal_achieved: bool) -> String {
        format!(
            r#"{{"user_satisfaction_score":3,"clarity_score":3,"relevance_score":2,"completeness_score":3,"frustration_incidents":1,"goal_achieved":{goal_achieved},"reasoning":"ok"}}"#
        )
    }

    #[tokio::test]
    async fn test_run_stops_when_goal_achieved() {
        let sim_provider = MockCompletionProvider::new();
        sim_provider.queue_choices(vec!["When was Stalker released?".into()]);
        sim_provider.queue_text("And who directed it?");
        let judge_provider = MockCompletionProvider::new();
        judge_provider.queue_text(judge_json(false));
        judge_provider.queue_text(judge_json(true));
        let target = MockChatTarget::new();
        target.queue_reply("1979.");
        target.queue_reply("Andrei Tarkovsky.");

        let runner = ConversationRunner::new(
            UserSimulator::seeded(&sim_provider, "sim", RetryPolicy::once(), 1),
            TurnJudge::new(&judge_provider, "judge", RetryPolicy::once()),
            &target,
            RetryPolicy::once(),
        );
        let request = params("curious_novice", DEFAULT_GOAL, 4).validate(4, 12).unwrap();
        let report = runner.run(&request, Some("rid-1"), &NoProgress).await.unwrap();

        assert_eq!(report.per_turn_metrics.len(), 2);
        assert_eq!(report.conversation.len(), 4);
        assert_eq!(report.turns_requested, 4);
        assert_eq!(report.persona, "curious-novice");
        assert_eq!(report.summary.goal_achieved_rate, 50.0);
        assert_eq!(report.summary.total_frustration, 2);
        assert_eq!(report.summary.avg_satisfaction, 100.0);
        assert_eq!(report.conversation_turns[1].user_message, "And who directed it?");
        assert_eq!(report.conversation_turns[1].assistant_message, "Andrei Tarkovsky.");
        // The target sees the full history.
        assert_eq!(target.received()[1].len(), 3);
    }

    #[tokio::test]
    async fn test_target_failure_is_recorded_in_transcript() {
        let sim_provider = MockCompletionProvider::new();
        sim_provider.queue_choices(vec!["Hi".into()]);
        let judge_provider = MockCompletionProvider::with_response("not json");
        let target = MockChatTarget::failing(502);

        let runner = ConversationRunner::new(
            UserSimulator::seeded(&sim_provider, "sim", RetryPolicy::once(), 1),
            TurnJudge::new(&judge_provider, "judge", RetryPolicy::once()),
            &target,
            RetryPolicy::once(),
        );
        let request = params(DEFAULT_PERSONA, DEFAULT_GOAL, 1).validate(4, 12).unwrap();
        let report = runner.run(&request, None, &NoProgress).await.unwrap();
        assert_eq!(report.per_turn_metrics.len(), 1);
        assert!(report.conversation_turns[0].assistant_message.starts_with(CHAT_ERROR_MARKER));
        assert!(!report.per_turn_metrics[0].goal_achieved);
    }

    #[tokio::test]
    async fn test_simulator_failure_aborts_run() {
        let sim_provider = MockCompletionProvider::new();
        let judge_provider = MockCompletionProvider::new();
        let target = MockChatTarget::replying("hello");
        let runner = ConversationRunner::new(
            UserSimulator::seeded(&sim_provider, "sim", RetryPolicy::once(), 1),
            TurnJudge::new(&judge_provider, "judge", RetryPolicy::once()),
            &target,
            RetryPolicy::once(),
        );
        let request = SatisfactionParams::default().validate(4, 12).unwrap();
        let err = runner.run(&request, None, &NoProgress).await.unwrap_err();
        assert!(matches!(err, EvalError::Llm(_)));
        assert_eq!(target.call_count(), 0);
    }
}
