//! Map-reduce summarization and structured extraction
//!
//! MAP condenses each sealed transcript chunk as soon as it arrives; REDUCE
//! combines the chunk summaries into the final note at stop time; EXTRACT
//! pulls structured meeting data out of the same summaries. The summarizer
//! holds chunk text only for the duration of a single call.

pub mod types;


use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::llm::{GenerationClient, LlmError};
use types::{meeting_data_schema, MeetingData};

/// Fixed stand-in summary for a chunk whose MAP call persistently failed.
pub const SUMMARY_PLACEHOLDER: &str = "[summary unavailable]";

/// Completion bound for per-chunk MAP summaries.
const MAP_NUM_PREDICT: u32 = 256;

/// Completion bound for the final REDUCE summary.
const REDUCE_NUM_PREDICT: u32 = 1024;

/// Completion bound for structured extraction.
const EXTRACT_NUM_PREDICT: u32 = 1024;

/// Slot that must appear in the chunk summary template.
const CHUNK_SLOT: &str = "{text}";

/// Slot that must appear in the final summary and extraction templates.
const SUMMARIES_SLOT: &str = "{summaries_text}";

/// User-supplied prompt templates for one session.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub chunk_summary: String,
    pub final_summary: String,
    pub data_extraction: String,
}

impl PromptTemplates {
    /// Reject templates whose fill slot is missing; a template without its
    /// slot would silently summarize nothing.
    pub fn validate(&self) -> Result<()> {
        let slot_re = regex::Regex::new(r"\{(\w+)\}").map_err(|e| EngineError::internal(e.to_string()))?;

        for (name, template, slot) in [
            ("chunk_summary_prompt", &self.chunk_summary, CHUNK_SLOT),
            ("final_summary_prompt", &self.final_summary, SUMMARIES_SLOT),
            ("data_extraction_prompt", &self.data_extraction, SUMMARIES_SLOT),
        ] {
            if template.trim().is_empty() {
                return Err(EngineError::invalid_request(format!("{name} must not be empty")));
            }
            let has_slot = slot_re
                .find_iter(template)
                .any(|m| m.as_str() == slot);
            if !has_slot {
                return Err(EngineError::invalid_request(format!(
                    "{name} must contain the {slot} placeholder"
                )));
            }
        }
        Ok(())
    }
}

/// LLM-backed summarizer for one session.
///
/// The semaphore is shared across sessions and bounds concurrent calls into
/// the local runtime; permits are granted in FIFO order.
pub struct Summarizer {
    client: Arc<dyn GenerationClient>,
    model: String,
    templates: PromptTemplates,
    llm_permits: Arc<Semaphore>,
}

impl Summarizer {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        model: String,
        templates: PromptTemplates,
        llm_permits: Arc<Semaphore>,
    ) -> Self {
        Self {
            client,
            model,
            templates,
            llm_permits,
        }
    }

    /// Summarize one transcript chunk.
    ///
    /// Transient failures get one retry; persistent failure is absorbed into
    /// the fixed placeholder so REDUCE can still run.
    pub async fn map(&self, chunk_text: &str) -> String {
        let prompt = self.templates.chunk_summary.replace(CHUNK_SLOT, chunk_text);

        match self.generate_with_retry(&prompt, MAP_NUM_PREDICT).await {
            Ok(summary) => {
                debug!(chars = summary.len(), "MAP summary produced");
                summary.trim().to_string()
            }
            Err(err) => {
                warn!(error = %err, "MAP call failed after retry, using placeholder");
                SUMMARY_PLACEHOLDER.to_string()
            }
        }
    }

    /// Combine all chunk summaries into the final summary.
    pub async fn reduce(&self, chunk_summaries: &[String]) -> Result<String> {
        let joined = chunk_summaries.join("\n\n");
        let prompt = self.templates.final_summary.replace(SUMMARIES_SLOT, &joined);

        let summary = self
            .generate_with_retry(&prompt, REDUCE_NUM_PREDICT)
            .await
            .map_err(|e| e.into_unavailable(&self.model))?;

        Ok(summary.trim().to_string())
    }

    /// Extract structured meeting data from the chunk summaries.
    ///
    /// First attempt is schema-constrained; a parse failure triggers one
    /// raw-JSON retry; a second failure degrades to empty data with an
    /// `EXTRACTION_FALLBACK` warning. Extraction never fails the session.
    pub async fn extract(&self, chunk_summaries: &[String]) -> MeetingData {
        let joined = chunk_summaries.join("\n\n");
        let prompt = self
            .templates
            .data_extraction
            .replace(SUMMARIES_SLOT, &joined);
        let schema = meeting_data_schema();

        let first = {
            let _permit = self.llm_permits.acquire().await;
            self.client
                .generate_structured(&self.model, &prompt, EXTRACT_NUM_PREDICT, &schema)
                .await
        };

        if let Some(data) = first.ok().as_deref().and_then(parse_meeting_data) {
            return data;
        }

        // Retry requesting raw JSON with an explicit instruction.
        let retry_prompt = format!("{prompt}\n\nReturn only valid JSON matching the schema.");
        let second = {
            let _permit = self.llm_permits.acquire().await;
            self.client
                .generate(&self.model, &retry_prompt, EXTRACT_NUM_PREDICT)
                .await
        };

        match second.ok().as_deref().and_then(parse_meeting_data) {
            Some(data) => data,
            None => {
                warn!(code = "EXTRACTION_FALLBACK", "structured extraction failed twice, returning empty data");
                MeetingData::empty()
            }
        }
    }

    async fn generate_with_retry(
        &self,
        prompt: &str,
        num_predict: u32,
    ) -> std::result::Result<String, LlmError> {
        let first = {
            let _permit = self.llm_permits.acquire().await;
            self.client.generate(&self.model, prompt, num_predict).await
        };

        match first {
            Ok(text) => Ok(text),
            Err(err) if err.is_transient() => {
                debug!(error = %err, "transient LLM failure, retrying once");
                let _permit = self.llm_permits.acquire().await;
                self.client.generate(&self.model, prompt, num_predict).await
            }
            Err(err) => Err(err),
        }
    }
}

/// Parse an LLM response into [`MeetingData`], tolerating markdown fences.
fn parse_meeting_data(raw: &str) -> Option<MeetingData> {
    let trimmed = strip_code_fence(raw.trim());
    serde_json::from_str::<MeetingData>(trimmed)
        .ok()
        .map(MeetingData::normalize)
}

fn strip_code_fence(text: &str) -> &str {
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}
