//! Chat-completion clients and the two prompt roles built on them.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::AzureOpenAiConfig;
use crate::error::LlmError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

pub trait ChatModel {
    fn complete(
        &self,
        system: &str,
        user: &str,
        params: SamplingParams,
    ) -> Result<Completion, LlmError>;
}

impl<M: ChatModel + ?Sized> ChatModel for &M {
    fn complete(
        &self,
        system: &str,
        user: &str,
        params: SamplingParams,
    ) -> Result<Completion, LlmError> {
        (**self).complete(system, user, params)
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// First choice, trimmed. A `length` finish reason means the answer was cut off.
fn completion_from_response(response: ChatResponse) -> Result<Completion, LlmError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(LlmError::EmptyResponse)?;
    let text = choice.message.content.unwrap_or_default().trim().to_string();
    let input_tokens = response.usage.prompt_tokens;
    let output_tokens = response.usage.completion_tokens;
    if choice.finish_reason.as_deref() == Some("length") {
        return Err(LlmError::Truncated {
            partial: text,
            input_tokens,
            output_tokens,
        });
    }
    Ok(Completion {
        text,
        input_tokens,
        output_tokens,
    })
}

pub struct AzureOpenAiClient {
    client: Client,
    url: String,
    api_key: String,
}

impl AzureOpenAiClient {
    pub fn new(config: &AzureOpenAiConfig, timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(timeout).build()?;
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            config.endpoint.trim_end_matches('/'),
            config.deployment,
            config.api_version
        );
        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
        })
    }
}

impl ChatModel for AzureOpenAiClient {
    fn complete(
        &self,
        system: &str,
        user: &str,
        params: SamplingParams,
    ) -> Result<Completion, LlmError> {
        let request = ChatRequest {
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
        };
        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&request)
            .send()?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited(response.text().unwrap_or_default()));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let completion = completion_from_response(response.json()?)?;
        debug!(
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            "chat completion"
        );
        Ok(completion)
    }
}

/// Extracts structured invoice records from a ticket's LLM input.
pub struct EntityExtractor<M: ChatModel> {
    model: M,
    system_prompt: String,
}

impl<M: ChatModel> EntityExtractor<M> {
    pub const PARAMS: SamplingParams = SamplingParams {
        max_tokens: 2048,
        temperature: 1.0,
        top_p: 0.9,
    };

    pub fn new(model: M, system_prompt: String) -> Self {
        Self {
            model,
            system_prompt,
        }
    }

    pub fn extract_entities(&self, llm_input: &str) -> Result<Completion, LlmError> {
        self.model
            .complete(&self.system_prompt, llm_input, Self::PARAMS)
    }
}

/// Picks a subcategory for a ticket from its description alone.
pub struct SubcategoryClassifier<M: ChatModel> {
    model: M,
    system_prompt: String,
}

impl<M: ChatModel> SubcategoryClassifier<M> {
    pub const PARAMS: SamplingParams = SamplingParams {
        max_tokens: 256,
        temperature: 1.0,
        top_p: 0.9,
    };

    pub fn new(model: M, system_prompt: String) -> Self {
        Self {
            model,
            system_prompt,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// With `few_shot` the description is wrapped in the prompt's example format.
    pub fn get_subcategory(&self, description: &str, few_shot: bool) -> Result<Completion, LlmError> {
        let user = if few_shot {
            format!("Ticket description: {description}\nYour response:")
        } else {
            description.to_string()
        };
        self.model.complete(&self.system_prompt, &user, Self::PARAMS)
    }
}

/// Assemble the user message for entity extraction.
pub fn build_llm_input(description: &str, vendor_code: &str, attachments: &str) -> String {
    format!("TICKET DESCRIPTION: {description}\n\nTICKET VENDOR CODE: {vendor_code}\n\n{attachments}")
}
