//! Provider factory: builds the configured provider stack.
//!
//! Provider ids select an implementation: `anthropic` and `ollama` have
//! native adapters, every other id is treated as an OpenAI-compatible
//! endpoint. A configured `fallback_provider` wraps the primary in a
//! [`FallbackProvider`].

use chatloom_config::AppConfig;
use chatloom_core::error::ProviderError;
use chatloom_core::provider::{Provider, ToolDefinition};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::GenerationSettings;
use crate::anthropic::AnthropicProvider;
use crate::fallback::FallbackProvider;
use crate::ollama::OllamaProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Build the provider the engine talks to, including any fallback.
pub fn build_from_config(
    config: &AppConfig,
    tools: &[ToolDefinition],
) -> Result<Arc<dyn Provider>, ProviderError> {
    let primary = build_provider(&config.default_provider, config, tools)?;

    let Some(fallback_id) = config.fallback_provider.as_deref() else {
        info!(provider = %primary.name(), tools = tools.len(), "Provider ready");
        return Ok(Arc::from(primary));
    };

    let fallback = build_provider(fallback_id, config, tools)?;
    let provider = FallbackProvider::new(primary, fallback)
        .with_connect_timeout(Duration::from_secs(config.engine.connect_timeout_secs));
    info!(provider = %provider.name(), tools = tools.len(), "Provider ready with fallback");
    Ok(Arc::new(provider))
}

/// Build one provider by id.
pub fn build_provider(
    id: &str,
    config: &AppConfig,
    tools: &[ToolDefinition],
) -> Result<Box<dyn Provider>, ProviderError> {
    let provider_config = config.provider(id);

    let api_key = provider_config
        .and_then(|p| p.api_key.clone())
        .or_else(|| config.api_key.clone())
        .unwrap_or_default();

    let api_url = provider_config.and_then(|p| p.api_url.clone());
    let settings = generation_settings(id, config);

    let provider: Box<dyn Provider> = match id {
        "anthropic" => {
            require_key(id, &api_key);
            let mut p = AnthropicProvider::new(&api_key);
            if let Some(url) = api_url {
                p = p.with_base_url(url);
            }
            Box::new(p.with_settings(settings).with_tools(tools))
        }
        "ollama" => Box::new(
            OllamaProvider::new(api_url.as_deref())
                .with_settings(settings)
                .with_tools(tools),
        ),
        _ => {
            let base_url = match api_url.or_else(|| default_base_url(id)) {
                Some(url) => url,
                None => {
                    return Err(ProviderError::NotConfigured(format!(
                        "unknown provider '{id}' has no api_url configured"
                    )));
                }
            };
            if !is_local(&base_url) {
                require_key(id, &api_key);
            }
            Box::new(
                OpenAiCompatProvider::new(id, base_url, &api_key)
                    .with_settings(settings)
                    .with_tools(tools),
            )
        }
    };

    Ok(provider)
}

/// Model, sampling and connect settings for provider `id`.
fn generation_settings(id: &str, config: &AppConfig) -> GenerationSettings {
    GenerationSettings {
        model: config
            .provider(id)
            .and_then(|p| p.default_model.clone())
            .unwrap_or_else(|| config.default_model.clone()),
        temperature: config.default_temperature,
        max_tokens: config.default_max_tokens,
        connect_timeout: Duration::from_secs(config.engine.connect_timeout_secs),
    }
}

fn require_key(id: &str, api_key: &str) {
    if api_key.is_empty() {
        warn!(provider = id, "No API key configured; requests will likely be rejected");
    }
}

fn is_local(base_url: &str) -> bool {
    base_url.contains("localhost") || base_url.contains("127.0.0.1")
}

/// Get the default base URL for well-known OpenAI-compatible providers.
fn default_base_url(provider_name: &str) -> Option<String> {
    let url = match provider_name {
        "openai" => "https://api.openai.com/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "fireworks" => "https://api.fireworks.ai/inference/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1",
        _ => return None,
    };
    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatloom_config::ProviderConfig;
    use chatloom_core::tool::{ParameterKind, ToolParameter};

    fn catalog() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "web_search".into(),
            description: "Search".into(),
            parameters: vec![ToolParameter::new("query", ParameterKind::String, "q").required()],
        }]
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").unwrap().contains("openrouter.ai"));
        assert!(default_base_url("openai").unwrap().contains("api.openai.com"));
        assert!(default_base_url("mystery").is_none());
    }

    #[test]
    fn build_from_default_config() {
        let config = AppConfig::default();
        let provider = build_from_config(&config, &catalog()).unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.describe_tools()[0]["function"]["name"], "web_search");
    }

    #[test]
    fn factory_selects_native_adapters() {
        let config = AppConfig::default();
        let anthropic = build_provider("anthropic", &config, &catalog()).unwrap();
        assert_eq!(anthropic.name(), "anthropic");
        assert_eq!(anthropic.describe_tools()[0]["input_schema"]["type"], "object");

        let ollama = build_provider("ollama", &config, &[]).unwrap();
        assert_eq!(ollama.name(), "ollama");
    }

    #[test]
    fn unknown_provider_needs_url() {
        let mut config = AppConfig::default();
        assert!(matches!(
            build_provider("acme", &config, &[]),
            Err(ProviderError::NotConfigured(_))
        ));

        config.providers.insert(
            "acme".into(),
            ProviderConfig {
                api_url: Some("https://llm.acme.internal/v1".into()),
                ..ProviderConfig::default()
            },
        );
        assert_eq!(build_provider("acme", &config, &[]).unwrap().name(), "acme");
    }

    #[test]
    fn settings_follow_config() {
        let mut config = AppConfig::default();
        config.default_temperature = 0.2;
        config.default_max_tokens = 512;
        config.engine.connect_timeout_secs = 3;
        config.providers.insert(
            "ollama".into(),
            ProviderConfig {
                default_model: Some("llama3.2".into()),
                ..ProviderConfig::default()
            },
        );

        let ollama = generation_settings("ollama", &config);
        assert_eq!(ollama.model, "llama3.2");
        assert_eq!(ollama.temperature, 0.2);
        assert_eq!(ollama.max_tokens, 512);
        assert_eq!(ollama.connect_timeout, Duration::from_secs(3));

        let openai = generation_settings("openai", &config);
        assert_eq!(openai.model, config.default_model);
        assert_eq!(openai.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn fallback_wraps_primary() {
        let config = AppConfig {
            default_provider: "anthropic".into(),
            fallback_provider: Some("openai".into()),
            ..AppConfig::default()
        };
        let provider = build_from_config(&config, &catalog()).unwrap();
        assert_eq!(provider.name(), "anthropic+openai");
    }
}
