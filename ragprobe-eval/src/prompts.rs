//! Default prompt texts.
//!
//! Wording is not part of any contract; only the requested output formats
//! are relied on by the parsers.

use serde_json::json;

use crate::satisfaction::{Goal, Persona};

/// System prompt for golden pair generation.
pub fn dataset_system(num_pairs: usize) -> String {
    format!(
        "ROLE: You output STRICT JSON and nothing else. No prose, markdown, code fences or comments.\n\
         TASK: Write EXACTLY {num_pairs} distinct question-answer pairs about the supplied document.\n\
         RULES:\n\
         - Output a single JSON object with the exact schema {{\"pairs\":[{{\"question\":\"...\",\"answer\":\"...\"}}]}}\n\
         - The pairs array holds exactly the requested number of items.\n\
         - Every question is answerable from the document alone, without outside knowledge.\n\
         - Answers are short (at most 50 words) and faithful to the document.\n\
         - Use double quotes and valid UTF-8 JSON with no trailing commas or extra keys.\n"
    )
}

pub fn dataset_user(file_name: &str, content: &str) -> String {
    format!("Source file: {file_name}\n\nDocument content:\n{content}")
}

pub const CORRECTNESS_JUDGE: &str = "ROLE: Strict grader. Output JSON ONLY, without prose, markdown or code fences.\n\
Schema: {\"reasoning\":\"<at most 50 words>\",\"decision\":\"CORRECT|INCORRECT\"}\n\
CRITERIA:\n\
- CORRECT only when the candidate states every key fact of the ground truth and contradicts none of them.\n\
- Rephrasing is fine; invented facts are not.\n\
- Keep the reasoning under 50 words.";

pub const RELEVANCE_JUDGE: &str = "ROLE: Relevance grader. Output JSON ONLY, without prose, markdown or code fences.\n\
Schema: {\"reasoning\":\"<at most 50 words>\",\"decision\":\"RELEVANT|IRRELEVANT\"}\n\
CRITERIA:\n\
- RELEVANT only when the candidate answers the user's question directly and stays on topic.\n\
- Anything else is IRRELEVANT.\n\
- Keep the reasoning under 50 words.";

/// User message for both single-turn judges.
pub fn judge_user(question: &str, ground_truth: &str, candidate: &str) -> String {
    json!({
        "question": question,
        "ground_truth": ground_truth,
        "candidate_answer": candidate,
    })
    .to_string()
}

pub fn retrieval_query(document: &str) -> String {
    format!(
        "You are helping evaluate a retriever. Read the document below and write ONE natural \
         question a user might ask that this document answers.\n\
         Reply with the question only, in a single sentence, without any preface.\n\n\
         Document:\n{document}\n\nQuery:\n"
    )
}

fn persona_block(persona: &Persona) -> String {
    format!(
        "Persona:\n\
         - Name: {}\n\
         - Description: {}\n\
         - Patience: {:.2}\n\
         - Expertise: {:.2}\n\
         - Verbosity: {:.2}\n\
         - Frustration Tolerance: {:.2}\n\
         - Clarity: {:.2}\n\
         - Technical Level: {:.2}",
        persona.name,
        persona.description,
        persona.patience,
        persona.expertise,
        persona.verbosity,
        persona.frustration_tolerance,
        persona.clarity_of_communication,
        persona.technical_level,
    )
}

fn goal_block(goal: &Goal) -> String {
    format!(
        "User's Goal:\n\
         - {}\n\
         - Domain: {}\n\
         - Complexity: {}\n\
         - Success Criteria: {}",
        goal.description,
        goal.domain,
        goal.complexity,
        goal.success_criteria.join(", "),
    )
}

/// System instructions for the opening user message, with the sampled cues.
pub fn opening_system(style_cue: &str, topic_cue: &str, avoid: &[&str]) -> String {
    format!(
        "You play the USER opening a conversation with a film research assistant.\n\
         Write like a real person, not like a template.\n\
         Style for this message: {style_cue}.\n\
         Let the request touch on: {topic_cue}.\n\
         Do not mention any of these overused titles: {}.\n\
         Return only the message text, without a role label or quotation marks.",
        avoid.join(", ")
    )
}

pub fn opening_user(persona: &Persona, goal: &Goal) -> String {
    format!(
        "{}\n\n{}\n\nWrite the FIRST user message (1-3 sentences) that starts working toward the goal.",
        persona_block(persona),
        goal_block(goal),
    )
}

/// Prompt for a follow-up user message given the recent history.
pub fn follow_up(persona: &Persona, goal: &Goal, history: &str) -> String {
    let history = if history.is_empty() {
        "(no prior messages)"
    } else {
        history
    };
    format!(
        "You are simulating the USER in a dialogue with a Film Research Assistant.\n\n\
         {}\n\n{}\n\n\
         Conversation so far (last turns):\n{history}\n\n\
         Task:\n\
         Write ONLY the next USER message in 1-3 sentences that moves toward the goal and \
         reflects the persona traits above. Be practical and direct, with no meta commentary.\n\
         Return plain text only.",
        persona_block(persona),
        goal_block(goal),
    )
}

const TURN_RUBRIC: &str = "You are an evaluator. Assess the ASSISTANT's performance from the USER's perspective.\n\n\
Return STRICT JSON with keys:\n\
{\n\
  \"user_satisfaction_score\": 0|1|2|3,\n\
  \"clarity_score\": 0|1|2|3,\n\
  \"relevance_score\": 0|1|2|3,\n\
  \"completeness_score\": 0|1|2|3,\n\
  \"frustration_incidents\": integer >= 0,\n\
  \"goal_achieved\": true|false,\n\
  \"reasoning\": \"brief rationale (1-3 sentences)\"\n\
}\n\n\
Scoring (0..3):\n\
- Satisfaction: how helpful and responsive the assistant felt.\n\
- Clarity: structure, no ambiguity, no filler or hallucination.\n\
- Relevance: serves the user's goal and avoids tangents.\n\
- Completeness: nothing essential is missing.\n\n\
Frustration incidents: count the moments likely to annoy the user\n\
(irrelevant answers, needless deflection, repeated refusals).";

/// Prompt for the per-turn judge over the full transcript.
pub fn turn_judge(persona: &Persona, goal: &Goal, transcript: &str) -> String {
    format!(
        "Persona (user): {} - {}\n\n\
         Goal: {}\n\
         Success Criteria: {}\n\
         Domain: {}; Complexity: {}\n\n\
         Conversation so far:\n{transcript}\n\n\
         {TURN_RUBRIC}\n\
         Output JSON only.",
        persona.name,
        persona.description,
        goal.description,
        goal.success_criteria.join(", "),
        goal.domain,
        goal.complexity,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::satisfaction::{goal, persona};

    #[test]
    fn test_dataset_prompt_mentions_count_and_schema() {
        let prompt = dataset_system(7);
        assert!(prompt.contains("EXACTLY 7"));
        assert!(prompt.contains(r#"{"pairs":[{"question":"...","answer":"..."}]}"#));
    }

    #[test]
    fn test_judge_user_is_json() {
        let value: serde_json::Value =
            serde_json::from_str(&judge_user("q", "gt", "cand \"quoted\"")).unwrap();
        assert_eq!(value["candidate_answer"], "cand \"quoted\"");
    }

    #[test]
    fn test_follow_up_without_history() {
        let p = persona("curious_novice").unwrap();
        let g = goal("specific-memory-recall").unwrap();
        let prompt = follow_up(p, g, "");
        assert!(prompt.contains("(no prior messages)"));
        assert!(prompt.contains("Patience: 0.70"));
    }

    #[test]
    fn test_turn_judge_includes_transcript() {
        let p = persona("curious_novice").unwrap();
        let g = goal("specific-memory-recall").unwrap();
        let prompt = turn_judge(p, g, "USER: hi\n\nASSISTANT: hello");
        assert!(prompt.contains("ASSISTANT: hello"));
        assert!(prompt.contains("goal_achieved"));
    }
}
