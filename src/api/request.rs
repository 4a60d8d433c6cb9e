//! Inbound request structures

use crate::vision::ExpectedRange;
use serde::{Deserialize, Serialize};

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Generation knobs forwarded to the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Chat completion handed to a provider invoker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub task_type: String,
    pub messages: Vec<Message>,
    pub options: ChatOptions,
}

/// Image handed to a vision provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionRequest {
    /// Encoded image payload as received from the caller
    pub image_data: String,
    pub location: Option<String>,
}

/// Top-level action of a dispatch request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ChatCompletion,
    ImageRecognition,
    GetUsageStats,
    HealthCheck,
}

/// Task dispatch request as received from callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub action: Action,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,

    /// free_only | low_cost | balanced | premium
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,

    #[serde(default)]
    pub options: ChatOptions,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_range: Option<ExpectedRange>,
}

impl DispatchRequest {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            task_type: None,
            priority: None,
            messages: Vec::new(),
            options: ChatOptions::default(),
            image_data: None,
            location: None,
            expected_range: None,
        }
    }

    pub fn chat(task_type: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            task_type: Some(task_type.into()),
            messages,
            ..Self::new(Action::ChatCompletion)
        }
    }

    pub fn image(image_data: impl Into<String>, expected_range: Option<ExpectedRange>) -> Self {
        Self {
            image_data: Some(image_data.into()),
            expected_range,
            ..Self::new(Action::ImageRecognition)
        }
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}
