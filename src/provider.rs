//! Provider capability abstraction (spec §6.2, Design Notes §9
//! "Polymorphism over providers").
//!
//! Grounded on the teacher's `agent::provider::LLMProvider` trait (an
//! `async_trait` object passed around as `Arc<dyn LLMProvider>`); this
//! version narrows the surface to exactly the four operations spec.md
//! names so the core never depends on a concrete provider SDK.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResult {
    pub content: String,
    pub role: String,
    pub usage: Usage,
    pub finish_reason: String,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub detail: Option<String>,
}

/// The single capability set the core consumes (spec §9: "expose a single
/// capability set `{generate_completion, validate_model, list_models,
/// health_check}` and pass concrete implementations explicitly").
#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    async fn generate_completion(
        &self,
        provider: &str,
        model: &str,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<CompletionResult, String>;

    async fn validate_model(&self, provider: &str, model: &str) -> bool;

    fn list_models(&self, provider: &str) -> Vec<String>;

    async fn health_check(&self, provider: &str) -> HealthStatus;
}

/// Deterministic test/mock implementation, grounded on the teacher's
/// pattern of a `LoggingOptimizer`-style stand-in used in its own test
/// suite rather than a live provider. Echoes the last message so
/// end-to-end tests can assert on content without live network calls.
pub struct MockProviderRegistry {
    pub manifest: crate::manifest::Manifest,
    pub simulated_latency_ms: u64,
}

impl MockProviderRegistry {
    pub fn new(manifest: crate::manifest::Manifest) -> Self {
        Self { manifest, simulated_latency_ms: 5 }
    }
}

#[async_trait]
impl ProviderRegistry for MockProviderRegistry {
    async fn generate_completion(
        &self,
        provider: &str,
        model: &str,
        messages: &[ChatMessage],
        _params: &CompletionParams,
    ) -> Result<CompletionResult, String> {
        if self.manifest.model(model).is_none() {
            return Err(format!("unknown model {model} for provider {provider}"));
        }
        tokio::time::sleep(std::time::Duration::from_millis(self.simulated_latency_ms)).await;
        let last_user_content = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        Ok(CompletionResult {
            content: format!("[{provider}/{model}] {last_user_content}"),
            role: "assistant".to_string(),
            usage: Usage {
                prompt_tokens: last_user_content.len() as u32 / 4,
                completion_tokens: 32,
            },
            finish_reason: "stop".to_string(),
            execution_time_ms: self.simulated_latency_ms,
        })
    }

    async fn validate_model(&self, _provider: &str, model: &str) -> bool {
        self.manifest.model(model).is_some()
    }

    fn list_models(&self, provider: &str) -> Vec<String> {
        self.manifest
            .models_for_provider(provider)
            .map(|m| m.model_id.clone())
            .collect()
    }

    async fn health_check(&self, provider: &str) -> HealthStatus {
        let known = self.manifest.provider(provider).is_some();
        HealthStatus {
            healthy: known,
            detail: if known { None } else { Some("unknown provider".to_string()) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::default_manifest;

    #[tokio::test]
    async fn mock_provider_generates_a_deterministic_echo() {
        let registry = MockProviderRegistry::new(default_manifest());
        let result = registry
            .generate_completion(
                "openai",
                "gpt-4o-mini",
                &[ChatMessage { role: "user".to_string(), content: "hi".to_string() }],
                &CompletionParams::default(),
            )
            .await
            .unwrap();
        assert!(result.content.contains("hi"));
        assert_eq!(result.finish_reason, "stop");
    }

    #[tokio::test]
    async fn unknown_model_fails() {
        let registry = MockProviderRegistry::new(default_manifest());
        let result = registry
            .generate_completion("openai", "not-a-model", &[], &CompletionParams::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn health_check_reports_known_providers_healthy() {
        let registry = MockProviderRegistry::new(default_manifest());
        assert!(registry.health_check("openai").await.healthy);
        assert!(!registry.health_check("nonexistent").await.healthy);
    }

    #[test]
    fn list_models_filters_by_provider() {
        let registry = MockProviderRegistry::new(default_manifest());
        let models = registry.list_models("anthropic");
        assert!(models.iter().all(|m| m.starts_with("claude")));
        assert!(!models.is_empty());
    }
}
