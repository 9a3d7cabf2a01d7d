//! Question import for battle creation.
//!
//! Accepts the JSON array the teacher dashboard exports from its question bank

use serde_json::Value;

use crate::error::{BattleError, Result};
use crate::AnswerOption;

/// Colors assigned to answers that arrive without one, in answer order
const DEFAULT_COLORS: [&str; 4] = ["red", "blue", "yellow", "green"];

/// A question as submitted, before it gets a battle and a position
#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub prompt: String,
    pub answers: Vec<AnswerOption>,
    pub correct_index: u32,
}

/// Parse one answer option: {"text": "...", "color": "..."}
fn parse_answer(val: &Value, q: usize, a: usize) -> std::result::Result<AnswerOption, String> {
    let text = val.get("text")
        .and_then(|v| v.as_str())
        .ok_or(format!("Question {} answer {}: missing text", q, a))?;

    let color = val.get("color")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| DEFAULT_COLORS[a % DEFAULT_COLORS.len()].to_string());

    Ok(AnswerOption { text: text.to_string(), color })
}

fn parse_question(val: &Value, i: usize) -> std::result::Result<NewQuestion, String> {
    let prompt = val.get("prompt")
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or(format!("Question {}: missing prompt", i))?;

    let answers = val.get("answers")
        .and_then(|v| v.as_array())
        .ok_or(format!("Question {}: missing answers", i))?
        .iter()
        .enumerate()
        .map(|(a, v)| parse_answer(v, i, a))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if answers.len() < 2 {
        return Err(format!("Question {}: needs at least 2 answers, got {}", i, answers.len()));
    }

    let correct_index = val.get("correctIndex")
        .and_then(|v| v.as_u64())
        .ok_or(format!("Question {}: missing correctIndex", i))?;

    if correct_index as usize >= answers.len() {
        return Err(format!(
            "Question {}: correctIndex {} out of range for {} answers",
            i, correct_index, answers.len()
        ));
    }

    Ok(NewQuestion {
        prompt: prompt.to_string(),
        answers,
        correct_index: correct_index as u32,
    })
}

/// Parse a JSON array of questions, in display order
pub fn parse_questions(json_data: &str) -> Result<Vec<NewQuestion>> {
    let data: Value = serde_json::from_str(json_data)
        .map_err(|e| BattleError::InvalidInput(format!("Invalid JSON: {}", e)))?;

    let questions = data.as_array()
        .ok_or_else(|| BattleError::InvalidInput("Expected JSON array of questions".to_string()))?;

    questions.iter()
        .enumerate()
        .map(|(i, q)| parse_question(q, i).map_err(BattleError::InvalidInput))
        .collect()
}
