//! Generator collaborators backed by an [`LlmClient`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ChatMessage, ChatOptions, LlmClient, LlmError, LlmErrorKind};
use crate::cache::AnalysisKind;
use crate::collaborators::{
    AnalysisGenerator, CollaboratorError, SubjectData, TokenMetadata, TokenMetadataGenerator,
};

/// Longest ticker symbol we will propose.
const MAX_SYMBOL_LEN: usize = 6;

const PERSONAL_SYSTEM_PROMPT: &str = "You write short, playful personality readings for \
social media users based on what they wrote. Reply with a JSON object with keys \
\"summary\" (string) and \"traits\" (array of strings).";

const MATCHING_SYSTEM_PROMPT: &str = "You compare two social media users and judge how well \
they would get along. Reply with a JSON object with keys \"score\" (integer 0-100), \
\"summary\" (string) and \"highlights\" (array of strings).";

const TOKEN_SYSTEM_PROMPT: &str = "You invent a meme token for a social media user. Reply \
with a JSON object with keys \"name\", \"symbol\" and \"description\". The symbol is at most \
6 letters.";

async fn complete_json(
    client: &dyn LlmClient,
    model: &str,
    system: &str,
    user: String,
) -> Result<Value, LlmError> {
    let response = client
        .chat_completion(
            model,
            &[ChatMessage::system(system), ChatMessage::user(user)],
            ChatOptions {
                temperature: Some(0.7),
                max_tokens: Some(800),
                json_mode: true,
            },
        )
        .await?;

    let content = response
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| LlmError::new(LlmErrorKind::InvalidResponse, "Empty completion"))?;

    Ok(parse_json_content(&content))
}

/// Parse a completion as JSON, tolerating a fenced code block. Plain prose is
/// wrapped as `{"text": ...}`.
fn parse_json_content(content: &str) -> Value {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);
    serde_json::from_str(unfenced).unwrap_or_else(|_| json!({ "text": trimmed }))
}

/// Personal and matching analyses produced by an LLM.
pub struct LlmAnalysisGenerator {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl LlmAnalysisGenerator {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl AnalysisGenerator for LlmAnalysisGenerator {
    async fn generate(
        &self,
        kind: AnalysisKind,
        subject: &SubjectData,
        target: Option<&SubjectData>,
    ) -> Result<Value, CollaboratorError> {
        let (system, prompt) = match (kind, target) {
            (AnalysisKind::Matching, Some(target)) => (
                MATCHING_SYSTEM_PROMPT,
                format!(
                    "User A: @{}\nA wrote: {}\n\nUser B: @{}\nB wrote: {}",
                    subject.user_id, subject.text, target.user_id, target.text
                ),
            ),
            (AnalysisKind::Matching, None) => {
                return Err(CollaboratorError::Other(
                    "Matching analysis needs a target user".to_string(),
                ))
            }
            (AnalysisKind::Personal, _) => (
                PERSONAL_SYSTEM_PROMPT,
                format!("User: @{}\nThey wrote: {}", subject.user_id, subject.text),
            ),
        };

        tracing::debug!(kind = %kind, user_id = %subject.user_id, model = %self.model, "Requesting analysis");
        let payload = complete_json(self.client.as_ref(), &self.model, system, prompt).await?;
        Ok(payload)
    }
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    name: String,
    symbol: String,
    #[serde(default)]
    description: String,
}

/// Token name/symbol/description proposals produced by an LLM.
pub struct LlmTokenMetadataGenerator {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl LlmTokenMetadataGenerator {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

fn normalize_symbol(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .take(MAX_SYMBOL_LEN)
        .collect()
}

#[async_trait]
impl TokenMetadataGenerator for LlmTokenMetadataGenerator {
    async fn propose(&self, subject: &SubjectData) -> Result<TokenMetadata, CollaboratorError> {
        let prompt = format!("User: @{}\nThey wrote: {}", subject.user_id, subject.text);
        let value =
            complete_json(self.client.as_ref(), &self.model, TOKEN_SYSTEM_PROMPT, prompt).await?;

        let raw: RawMetadata = serde_json::from_value(value).map_err(|e| {
            CollaboratorError::InvalidResponse(format!("Token metadata not understood: {}", e))
        })?;
        let symbol = normalize_symbol(&raw.symbol);
        if raw.name.trim().is_empty() || symbol.is_empty() {
            return Err(CollaboratorError::InvalidResponse(
                "Token metadata missing name or symbol".to_string(),
            ));
        }

        Ok(TokenMetadata {
            name: raw.name.trim().to_string(),
            symbol,
            description: raw.description.trim().to_string(),
        })
    }
}
