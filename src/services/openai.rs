use reqwest::Client;
use serde_json::json;

use crate::config::Config;

pub struct OpenAiService;

impl OpenAiService {
    fn client() -> Client {
        Client::new()
    }

    fn api_key() -> Result<String, String> {
        Config::openai_api_key()
            .ok_or_else(|| "OPENAI_API_KEY not configured".to_string())
    }

    /// Generate business-plan sections for an idea. Returns the parsed JSON
    /// object the model produced.
    pub async fn generate_plan(
        idea: &str,
        industry: Option<&str>,
    ) -> Result<serde_json::Value, String> {
        if !Config::is_openai_enabled() {
            return Err("OpenAI is not enabled".to_string());
        }

        let body = json!({
            "model": Config::openai_model(),
            "response_format": { "type": "json_object" },
            "messages": [
                {
                    "role": "system",
                    "content": "You are a startup consultant. Answer with a JSON object whose keys are: executive_summary, problem, solution, market_analysis, business_model, go_to_market, financial_projections, risks. Each value is a short paragraph."
                },
                {
                    "role": "user",
                    "content": build_prompt(idea, industry)
                }
            ]
        });

        let res = Self::client()
            .post(format!("{}/chat/completions", Config::openai_base_url()))
            .bearer_auth(Self::api_key()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("OpenAI request failed: {}", e))?;

        if !res.status().is_success() {
            return Err(res.text().await.unwrap_or_else(|_| "OpenAI error".to_string()));
        }

        let completion: serde_json::Value = res
            .json()
            .await
            .map_err(|e| format!("OpenAI response unreadable: {}", e))?;

        parse_sections(&completion)
    }
}

pub fn build_prompt(idea: &str, industry: Option<&str>) -> String {
    match industry {
        Some(industry) => format!(
            "Write a business plan for this startup idea in the {} industry: {}",
            industry, idea
        ),
        None => format!("Write a business plan for this startup idea: {}", idea),
    }
}

/// Pull the JSON document out of a chat-completion response. The model is
/// asked for a JSON object, but the content still arrives as a string.
pub fn parse_sections(completion: &serde_json::Value) -> Result<serde_json::Value, String> {
    let content = completion["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| "OpenAI response missing content".to_string())?;

    serde_json::from_str(content)
        .map_err(|e| format!("OpenAI returned non-JSON content: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prompt_mentions_industry_when_given() {
        let p = build_prompt("dog walking app", Some("pet care"));
        assert!(p.contains("pet care"));
        assert!(p.contains("dog walking app"));
        assert!(!build_prompt("x", None).contains("industry"));
    }

    #[test]
    fn parse_sections_unwraps_the_content_string() {
        let completion = json!({
            "choices": [{
                "message": { "content": "{\"executive_summary\":\"We walk dogs.\"}" }
            }]
        });
        let sections = parse_sections(&completion).unwrap();
        assert_eq!(sections["executive_summary"], "We walk dogs.");
    }

    #[test]
    fn parse_sections_rejects_missing_or_non_json_content() {
        assert!(parse_sections(&json!({})).is_err());
        let bad = json!({
            "choices": [{ "message": { "content": "plain prose" } }]
        });
        assert!(parse_sections(&bad).is_err());
    }
}
