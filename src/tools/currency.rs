//! Currency conversion via exchangerate-api.com (v6 "latest" endpoint)

use crate::error::AssistantError;
use crate::models::{ToolInput, ToolOutput, ToolParam};
use crate::Result;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::Tool;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct LatestRatesResponse {
    result: String,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
    #[serde(default)]
    conversion_rates: HashMap<String, f64>,
}

pub struct CurrencyConversionTool {
    client: Client,
    api_key: String,
    base_url: String,
}

impl CurrencyConversionTool {
    pub fn new(api_key: &str, base_url: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(AssistantError::Config(
                "An API key is required for the currency converter".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.trim().to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the rate `base -> target` and apply it to `amount`.
    pub async fn convert(&self, base: &str, target: &str, amount: f64) -> Result<(f64, f64)> {
        let base = base.trim().to_uppercase();
        let target = target.trim().to_uppercase();
        let url = format!("{}/{}/latest/{}", self.base_url, self.api_key, base);

        debug!(base = %base, target = %target, "Requesting exchange rates");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                warn!(error = %e, "Exchange rate request failed");
                AssistantError::ToolError(format!("Request error: {}", redact(&e.to_string(), &self.api_key)))
            })?;

        let body: LatestRatesResponse = response.json().await.map_err(|e| {
            AssistantError::ToolError(format!("Request error: invalid JSON response: {}", e))
        })?;

        if body.result != "success" {
            return Err(AssistantError::ToolError(format!(
                "API Error: {}",
                body.error_type.as_deref().unwrap_or("Unknown")
            )));
        }

        let rate = *body
            .conversion_rates
            .get(&target)
            .ok_or_else(|| AssistantError::ToolError(format!("Currency {} not found", target)))?;

        Ok((rate, amount * rate))
    }
}

/// Keep the API key out of error messages shown to the model.
fn redact(message: &str, secret: &str) -> String {
    message.replace(secret, "***")
}

#[async_trait::async_trait]
impl Tool for CurrencyConversionTool {
    fn name(&self) -> &'static str {
        "currency_converter"
    }

    fn description(&self) -> &'static str {
        "Converts an amount from a base currency to a target currency using current \
         exchange rates, and reports the rate used."
    }

    fn inputs(&self) -> Vec<ToolParam> {
        vec![
            ToolParam {
                name: "base_currency",
                param_type: "string",
                description: "Base currency code (for example 'USD').",
                nullable: false,
            },
            ToolParam {
                name: "target_currency",
                param_type: "string",
                description: "Target currency code (for example 'EUR').",
                nullable: false,
            },
            ToolParam {
                name: "amount",
                param_type: "number",
                description: "Amount to convert. Defaults to 1.0.",
                nullable: true,
            },
        ]
    }

    fn output_type(&self) -> &'static str {
        "object"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let base = input.require_str("base_currency")?;
        let target = input.require_str("target_currency")?;
        let amount = match input.parameters.get("amount") {
            None | Some(serde_json::Value::Null) => 1.0,
            Some(value) => value.as_f64().ok_or_else(|| {
                AssistantError::InvalidToolInput("'amount' must be a number".to_string())
            })?,
        };

        let (rate, result) = self.convert(base, target, amount).await?;

        Ok(ToolOutput::success(json!({
            "conversion_rate": rate,
            "conversion_result": result,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATES_BODY: &str = r#"{
        "result": "success",
        "base_code": "USD",
        "conversion_rates": { "USD": 1.0, "RUB": 90.5, "EUR": 0.925 }
    }"#;

    #[test]
    fn test_requires_api_key() {
        assert!(matches!(
            CurrencyConversionTool::new("  ", "http://localhost"),
            Err(AssistantError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_converts_with_latest_rates() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/test-key/latest/USD")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(RATES_BODY)
            .create_async()
            .await;

        let tool = CurrencyConversionTool::new("test-key", &server.url()).unwrap();
        let output = tool
            .execute(&ToolInput::new(
                "currency_converter",
                json!({ "base_currency": "usd", "target_currency": "rub", "amount": 1000 }),
            ))
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(output.success);
        assert_eq!(output.data["conversion_rate"], json!(90.5));
        assert_eq!(output.data["conversion_result"], json!(90500.0));
    }

    #[tokio::test]
    async fn test_amount_defaults_to_one() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/k/latest/USD")
            .with_status(200)
            .with_body(RATES_BODY)
            .create_async()
            .await;

        let tool = CurrencyConversionTool::new("k", &server.url()).unwrap();
        let output = tool
            .execute(&ToolInput::new(
                "currency_converter",
                json!({ "base_currency": "USD", "target_currency": "EUR", "amount": null }),
            ))
            .await
            .unwrap();

        assert_eq!(output.data["conversion_result"], json!(0.925));
    }

    #[tokio::test]
    async fn test_unknown_target_currency() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/k/latest/USD")
            .with_status(200)
            .with_body(RATES_BODY)
            .create_async()
            .await;

        let tool = CurrencyConversionTool::new("k", &server.url()).unwrap();
        let err = tool.convert("USD", "XYZ", 1.0).await.unwrap_err();
        assert_eq!(err.to_string(), "Tool error: Currency XYZ not found");
    }

    #[tokio::test]
    async fn test_api_error_type_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/bad/latest/USD")
            .with_status(200)
            .with_body(r#"{ "result": "error", "error-type": "invalid-key" }"#)
            .create_async()
            .await;

        let tool = CurrencyConversionTool::new("bad", &server.url()).unwrap();
        let err = tool.convert("USD", "EUR", 1.0).await.unwrap_err();
        assert!(err.to_string().contains("API Error: invalid-key"));
    }

    #[tokio::test]
    async fn test_http_failure_hides_api_key() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/secret-key/latest/USD")
            .with_status(503)
            .create_async()
            .await;

        let tool = CurrencyConversionTool::new("secret-key", &server.url()).unwrap();
        let err = tool.convert("USD", "EUR", 1.0).await.unwrap_err().to_string();
        assert!(err.contains("Request error"));
        assert!(!err.contains("secret-key"));
    }
}
