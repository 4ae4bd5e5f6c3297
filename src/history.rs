//! Conversation history windowing under a token budget.
//!
//! Past exchanges are stored with their token counts (computed once, when the
//! answer arrives). When a new prompt comes in, [`select_history`] walks the
//! exchanges from newest to oldest and keeps messages while they fit in the
//! budget left by [`BudgetConfig::history_budget`].

use log::trace;
use serde::{Deserialize, Serialize};

use crate::config::BudgetConfig;
use crate::core::{Tokenizer, TokenizerError};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message as sent to the completion service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A past prompt and its answer, with their token counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub prompt: String,
    pub prompt_tokens: usize,
    pub answer: String,
    pub answer_tokens: usize,
}

impl Exchange {
    /// Build an exchange, counting both sides with `tokenizer`.
    pub fn new(
        prompt: impl Into<String>,
        answer: impl Into<String>,
        tokenizer: &Tokenizer,
    ) -> Result<Self, TokenizerError> {
        let prompt = prompt.into();
        let answer = answer.into();
        Ok(Self {
            prompt_tokens: tokenizer.count_tokens(&prompt)?,
            answer_tokens: tokenizer.count_tokens(&answer)?,
            prompt,
            answer,
        })
    }

    pub fn total_tokens(&self) -> usize {
        self.prompt_tokens + self.answer_tokens
    }
}

/// Pick the most recent history that fits the budget.
///
/// `exchanges` must be ordered newest first. For each exchange the answer is
/// taken first, then the prompt; selection stops at the first message that
/// does not fit, so the result is always a contiguous tail of the
/// conversation. Exchanges with an empty prompt are skipped. The returned
/// messages are in chronological order.
pub fn select_history(
    exchanges: &[Exchange],
    prompt_tokens: usize,
    config: &BudgetConfig,
) -> Vec<Message> {
    let mut budget = config.history_budget(prompt_tokens);
    let mut selected = Vec::new();

    'outer: for exchange in exchanges
        .iter()
        .filter(|e| !e.prompt.is_empty())
        .take(config.max_exchanges)
    {
        for (role, content, tokens) in [
            (Role::Assistant, &exchange.answer, exchange.answer_tokens),
            (Role::User, &exchange.prompt, exchange.prompt_tokens),
        ] {
            if tokens > budget {
                trace!("history budget exhausted: {} left, next message needs {}", budget, tokens);
                break 'outer;
            }
            budget -= tokens;
            selected.push(Message::new(role, content.as_str()));
        }
    }

    selected.reverse();
    selected
}

/// Assemble the messages for a new completion request.
///
/// The optional system prompt and the new user prompt are counted with
/// `tokenizer` and charged against the budget before any history is chosen.
pub fn build_messages(
    system_prompt: Option<&str>,
    prompt: &str,
    exchanges: &[Exchange],
    tokenizer: &Tokenizer,
    config: &BudgetConfig,
) -> Result<Vec<Message>, TokenizerError> {
    let mut prompt_tokens = tokenizer.count_tokens(prompt)?;
    if let Some(system) = system_prompt {
        prompt_tokens += tokenizer.count_tokens(system)?;
    }

    let history = select_history(exchanges, prompt_tokens, config);
    let mut messages = Vec::with_capacity(history.len() + 2);
    if let Some(system) = system_prompt {
        messages.push(Message::new(Role::System, system));
    }
    messages.extend(history);
    messages.push(Message::new(Role::User, prompt));
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(prompt: &str, prompt_tokens: usize, answer: &str, answer_tokens: usize) -> Exchange {
        Exchange {
            prompt: prompt.to_string(),
            prompt_tokens,
            answer: answer.to_string(),
            answer_tokens,
        }
    }

    fn contents(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn everything_fits() {
        let exchanges = vec![exchange("q2", 10, "a2", 20), exchange("q1", 10, "a1", 20)];
        let messages = select_history(&exchanges, 0, &BudgetConfig::default());
        assert_eq!(contents(&messages), vec!["q1", "a1", "q2", "a2"]);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[test]
    fn stops_at_first_message_over_budget() {
        let config = BudgetConfig::builder()
            .context_window(200)
            .reserve(50)
            .build()
            .unwrap();
        // 150 tokens of budget: a3 (60) + q3 (40) fit, a2 (60) does not.
        let exchanges = vec![
            exchange("q3", 40, "a3", 60),
            exchange("q2", 5, "a2", 60),
            exchange("q1", 1, "a1", 1),
        ];
        let messages = select_history(&exchanges, 0, &config);
        assert_eq!(contents(&messages), vec!["q3", "a3"]);
    }

    #[test]
    fn answer_can_fit_without_its_prompt() {
        let config = BudgetConfig::builder()
            .context_window(100)
            .reserve(0)
            .build()
            .unwrap();
        let exchanges = vec![exchange("long question", 80, "short answer", 30)];
        let messages = select_history(&exchanges, 0, &config);
        assert_eq!(contents(&messages), vec!["short answer"]);
        assert_eq!(messages[0].role, Role::Assistant);
    }

    #[test]
    fn prompt_cost_reduces_budget() {
        let exchanges = vec![exchange("q", 100, "a", 100)];
        let config = BudgetConfig::default();
        assert_eq!(select_history(&exchanges, 3384, &config).len(), 2);
        assert_eq!(select_history(&exchanges, 3385, &config).len(), 1);
        assert!(select_history(&exchanges, 5000, &config).is_empty());
    }

    #[test]
    fn skips_empty_prompts_and_caps_exchanges() {
        let config = BudgetConfig::builder().max_exchanges(2).build().unwrap();
        let exchanges = vec![
            exchange("", 0, "voice-only", 3),
            exchange("q3", 1, "a3", 1),
            exchange("q2", 1, "a2", 1),
            exchange("q1", 1, "a1", 1),
        ];
        let messages = select_history(&exchanges, 0, &config);
        assert_eq!(contents(&messages), vec!["q2", "a2", "q3", "a3"]);
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::new(Role::Assistant, "hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }
}
