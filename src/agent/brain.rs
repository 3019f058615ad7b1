//! The agent brain: prompt assembly, model invocation, and structured
//! output aggregation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::messages::{AgentResponse, InboundMessage, MessageContext};
use crate::skills::{SkillDefinition, SkillsRegistry};

use super::prompt::PromptBuilder;
use super::provider::{ModelOutput, ModelProvider, ModelRequest, ToolDescriptor};

/// Brain configuration: retry budget for the model call.
#[derive(Debug, Clone)]
pub struct BrainConfig {
    pub bot_name: String,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// How many matching skills to inject per message.
    pub skill_limit: usize,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            bot_name: "switchboard".to_string(),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
            skill_limit: 3,
        }
    }
}

/// Programming errors; transient model failures degrade instead.
#[derive(Debug, Error)]
pub enum BrainError {
    #[error("agent brain used before initialization")]
    NotInitialized,
}

/// Processes messages against the model with tools, skills, and memory.
pub struct AgentBrain {
    provider: Arc<dyn ModelProvider>,
    skills: Arc<SkillsRegistry>,
    tool_catalog: Vec<ToolDescriptor>,
    config: BrainConfig,
    initialized: AtomicBool,
}

impl AgentBrain {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        skills: Arc<SkillsRegistry>,
        tool_catalog: Vec<ToolDescriptor>,
        config: BrainConfig,
    ) -> Self {
        Self {
            provider,
            skills,
            tool_catalog,
            config,
            initialized: AtomicBool::new(false),
        }
    }

    /// One-time initialization; `process` refuses to run before it.
    pub fn initialize(&self) {
        self.initialized.store(true, Ordering::SeqCst);
        info!(
            provider = self.provider.name(),
            tools = self.tool_catalog.len(),
            "agent brain initialized"
        );
    }

    /// Process one message and produce a structured response. Model
    /// failures degrade to an error-content response; they never fail
    /// the pipeline.
    #[instrument(skip(self, message, context), fields(message_id = %message.id))]
    pub async fn process(
        &self,
        message: &InboundMessage,
        context: &MessageContext,
    ) -> Result<AgentResponse, BrainError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(BrainError::NotInitialized);
        }

        let text = message.content();
        let matching_skills = if text.is_empty() {
            Vec::new()
        } else {
            self.skills.find_matching_skills(text, self.config.skill_limit)
        };

        let tools: Vec<ToolDescriptor> = self
            .tool_catalog
            .iter()
            .filter(|t| context.available_tools.contains(&t.name))
            .cloned()
            .collect();

        let system_prompt = self.build_prompt(context, &matching_skills, &tools);

        let request = ModelRequest {
            system_prompt,
            history: context.history.clone(),
            user_text: text.to_string(),
            tools,
        };

        let output = match self.complete_with_retries(&request).await {
            Ok(output) => output,
            Err(last_error) => {
                error!(%last_error, "model call failed after retries, degrading");
                let mut degraded = AgentResponse::default();
                degraded.add_error("The assistant is temporarily unavailable. Please try again.");
                degraded.skills_used = matching_skills.into_iter().map(|s| s.id).collect();
                return Ok(degraded);
            }
        };

        let mut response = aggregate_output(output);
        response.skills_used = matching_skills.into_iter().map(|s| s.id).collect();
        Ok(response)
    }

    fn build_prompt(
        &self,
        context: &MessageContext,
        skills: &[SkillDefinition],
        tools: &[ToolDescriptor],
    ) -> String {
        let mut builder = PromptBuilder::new().with_mode(context.prompt_mode);
        builder.set_context(format!("You are {}.", self.config.bot_name));
        if context.summary.is_some()
            || context.user_summary.is_some()
            || context.conversation_summary.is_some()
            || !context.history.is_empty()
        {
            builder.set_memory(
                context.summary.as_deref(),
                context.user_summary.as_deref(),
                context.conversation_summary.as_deref(),
                &context.history,
            );
        }
        builder.set_skills(skills);
        builder.set_tools(tools);
        if context.show_reasoning {
            builder.enable_reasoning();
        }
        builder.build()
    }

    async fn complete_with_retries(
        &self,
        request: &ModelRequest,
    ) -> Result<ModelOutput, super::provider::ProviderError> {
        let mut attempt = 0u32;
        loop {
            match self.provider.complete(request).await {
                Ok(output) => return Ok(output),
                Err(error) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(%error, attempt, "model call failed, retrying");
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Generate and register a new skill for `topic`. Best-effort: any
    /// failure returns `None`.
    #[instrument(skip(self, context))]
    pub async fn learn_skill(
        &self,
        topic: &str,
        context: &MessageContext,
    ) -> Option<SkillDefinition> {
        info!(topic, "learning new skill");

        let mut recent = String::new();
        for entry in context.history.iter().rev().take(5) {
            let truncated: String = entry.content.chars().take(200).collect();
            recent = format!("{}: {truncated}\n{recent}", entry.role);
        }

        let request = ModelRequest {
            system_prompt: "Generate a skill definition as a JSON object with keys: \
name, description, triggers (list of keywords), steps (list of strings), \
guidelines (list of strings). Return only the JSON."
                .to_string(),
            user_text: format!("Topic: {topic}\n\nRecent conversation:\n{recent}"),
            ..ModelRequest::default()
        };

        let output = match self.complete_with_retries(&request).await {
            Ok(output) => output,
            Err(error) => {
                warn!(%error, topic, "skill generation call failed");
                return None;
            }
        };

        let generated = parse_generated_skill(&output.text)?;
        let skill_id = generated.name.to_lowercase().replace(' ', "-");

        match self
            .skills
            .create_skill(
                &skill_id,
                &generated.name,
                &generated.description,
                generated.triggers,
                context.available_tools.iter().take(5).cloned().collect(),
                generated.steps,
                generated.guidelines,
            )
            .await
        {
            Ok(skill) => {
                info!(skill_id = %skill.id, topic, "skill learned");
                Some(skill)
            }
            Err(error) => {
                warn!(%error, topic, "generated skill could not be written");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeneratedSkill {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    triggers: Vec<String>,
    #[serde(default)]
    steps: Vec<String>,
    #[serde(default)]
    guidelines: Vec<String>,
}

fn parse_generated_skill(text: &str) -> Option<GeneratedSkill> {
    if let Ok(skill) = serde_json::from_str::<GeneratedSkill>(text) {
        return Some(skill);
    }
    let (start, end) = (text.find('{')?, text.rfind('}')?);
    if start >= end {
        return None;
    }
    serde_json::from_str::<GeneratedSkill>(&text[start..=end]).ok()
}

/// Fold the model's structured output into an `AgentResponse`: tool call
/// contents first, the final text last.
fn aggregate_output(output: ModelOutput) -> AgentResponse {
    let mut response = AgentResponse::default();

    for call in output.tool_calls {
        response.tools_called.push(call.tool_name.clone());
        response.contents.extend(call.contents);
        info!(tool = %call.tool_name, success = call.success, "tool result aggregated");
    }

    if !output.text.trim().is_empty() {
        response.add_text(output.text);
    }

    response.needs_learning = output.needs_learning;
    response.learning_topic = output.learning_topic;
    response
}
