//! # Generative Text Service
//!
//! Trait seam over the generative model plus the Gemini REST implementation.
//! Reply prompts are assembled by the router; this module only turns a
//! finished prompt into text and hosts the reminder-content refinement
//! helper.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.2.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Reminder content refinement with original-content fallback
//! - 1.0.0: Initial Gemini client

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use serde_json::json;

/// Prompt-in, text-out generation.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Gemini REST API client (generateContent endpoint).
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    /// Persona/system instruction prepended to every request; may be empty.
    system_context: String,
    base_url: String,
}

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

impl GeminiClient {
    pub fn new(api_key: &str, model: &str, system_context: &str) -> Result<Self> {
        if api_key.is_empty() {
            bail!("Gemini API key must not be empty");
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("failed to build http client")?;
        info!("Gemini client configured for model {model}");
        Ok(GeminiClient {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            system_context: system_context.to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": 0.55 }
        });
        if !self.system_context.is_empty() {
            body["system_instruction"] = json!({ "parts": [{ "text": self.system_context }] });
        }

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .context("failed to reach Gemini")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("Gemini returned {status}: {detail}");
        }

        let data: serde_json::Value = response
            .json()
            .await
            .context("Gemini returned a non-JSON body")?;
        let text = data["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(anyhow!("Gemini returned an empty candidate"));
        }
        Ok(text.trim().to_string())
    }
}

/// Rewrite a raw reminder payload into a short actionable task description.
/// Best effort: any failure or empty result keeps the original content.
pub async fn refine_reminder_content(generator: &dyn TextGenerator, content: &str) -> String {
    if content.trim().is_empty() {
        return content.to_string();
    }
    let prompt = format!(
        "Transforme a seguinte frase em um lembrete conciso e acionável. Extraia a tarefa principal. \
         Por exemplo, de 'r la pelas horas que preciso separar umas roupas pra minha sogra?' \
         extraia 'separar umas roupas para a sogra'. \
         De 'me lembra de comprar leite horas' extraia 'comprar leite'.\n\n\
         Frase original: '{content}'\n\nLembrete conciso:"
    );
    match generator.generate(&prompt).await {
        Ok(refined) if !refined.trim().is_empty() => {
            info!("Refined reminder content: '{}' -> '{}'", content, refined.trim());
            refined.trim().to_string()
        }
        Ok(_) => content.to_string(),
        Err(e) => {
            warn!("Reminder content refinement failed, keeping original: {e:#}");
            content.to_string()
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted generator fake shared by session/router tests.

    use std::sync::Mutex;

    use super::*;

    pub struct FakeGenerator {
        replies: Mutex<Vec<String>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl FakeGenerator {
        /// Replies are handed out in order; when the script runs dry the
        /// generator starts failing, which exercises fallback paths.
        pub fn scripted(replies: &[&str]) -> Self {
            FakeGenerator {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            FakeGenerator::scripted(&[])
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow!("no scripted reply left"))
        }
    }

    #[tokio::test]
    async fn test_refine_falls_back_to_original_on_failure() {
        let generator = FakeGenerator::failing();
        let refined = refine_reminder_content(&generator, "comprar leite horas").await;
        assert_eq!(refined, "comprar leite horas");
    }

    #[tokio::test]
    async fn test_refine_uses_generated_text() {
        let generator = FakeGenerator::scripted(&["comprar leite"]);
        let refined = refine_reminder_content(&generator, "me lembra de comprar leite horas").await;
        assert_eq!(refined, "comprar leite");
    }
}
