// Built-in handler stubs
//
// The closed set of handlers registered at worker startup. These stand in
// for real integrations: they echo config, produce canned responses, and can
// simulate latency and failure for load and resilience testing.

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use flowmill_core::{Handler, HandlerRegistry, Result, Settings, TaskMessage, WorkflowError};

const IO_DELAY_MS: u64 = 100;
const EXTERNAL_DELAY_MS: (u64, u64) = (1000, 2000);
const LLM_DELAY_MS: (u64, u64) = (1500, 2500);
const DECISION_DELAY_MS: (u64, u64) = (10, 50);

const DEFAULT_LLM_MODEL: &str = "gpt-4";
const DEFAULT_LLM_TEMPERATURE: f64 = 0.7;
const DEFAULT_LLM_MAX_TOKENS: u64 = 1000;

/// Registry with every built-in handler registered
pub fn builtin_registry(settings: Arc<Settings>) -> HandlerRegistry {
    HandlerRegistry::builder()
        .handler(InputHandler {
            settings: settings.clone(),
        })
        .handler(OutputHandler {
            settings: settings.clone(),
        })
        .handler(LlmHandler {
            settings: settings.clone(),
        })
        .handler(ExternalServiceHandler {
            settings: settings.clone(),
        })
        .handler(DecisionHandler { settings })
        .build()
}

async fn simulated_delay(settings: &Settings, range_ms: (u64, u64)) {
    if !settings.worker_enable_delays {
        return;
    }
    let (min, max) = range_ms;
    let delay = if min >= max {
        min
    } else {
        rand::thread_rng().gen_range(min..=max)
    };
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

/// Seeds a run with its initial data
pub struct InputHandler {
    settings: Arc<Settings>,
}

#[async_trait]
impl Handler for InputHandler {
    fn name(&self) -> &str {
        "input"
    }

    async fn process(&self, task: &TaskMessage) -> Result<Value> {
        simulated_delay(&self.settings, (IO_DELAY_MS, IO_DELAY_MS)).await;
        let mut output = json!({ "initialized": true });
        if let (Some(out), Some(config)) = (output.as_object_mut(), task.config.as_object()) {
            for (key, value) in config {
                out.insert(key.clone(), value.clone());
            }
        }
        Ok(output)
    }
}

/// Terminal aggregation step
pub struct OutputHandler {
    settings: Arc<Settings>,
}

#[async_trait]
impl Handler for OutputHandler {
    fn name(&self) -> &str {
        "output"
    }

    async fn process(&self, task: &TaskMessage) -> Result<Value> {
        simulated_delay(&self.settings, (IO_DELAY_MS, IO_DELAY_MS)).await;
        Ok(json!({ "aggregated": true, "config": task.config }))
    }
}

/// Canned LLM call
pub struct LlmHandler {
    settings: Arc<Settings>,
}

const LLM_RESPONSES: &[&str] = &[
    "Based on the analysis, the recommended approach is to proceed with option A.",
    "The data suggests a positive correlation between the variables.",
    "I've summarized the key points from the document as requested.",
    "The workflow has been processed successfully with the provided parameters.",
];

#[async_trait]
impl Handler for LlmHandler {
    fn name(&self) -> &str {
        "call_llm"
    }

    async fn process(&self, task: &TaskMessage) -> Result<Value> {
        simulated_delay(&self.settings, LLM_DELAY_MS).await;

        if task.config["simulate_failure"].as_bool().unwrap_or(false) {
            return Err(WorkflowError::handler("simulated llm service failure"));
        }

        let prompt = task.config["prompt"].as_str().unwrap_or("No prompt provided");
        let model = task.config["model"].as_str().unwrap_or(DEFAULT_LLM_MODEL);
        let temperature = task.config["temperature"]
            .as_f64()
            .unwrap_or(DEFAULT_LLM_TEMPERATURE);
        let max_tokens = task.config["max_tokens"]
            .as_u64()
            .unwrap_or(DEFAULT_LLM_MAX_TOKENS);

        let mut rng = rand::thread_rng();
        let response = LLM_RESPONSES[rng.gen_range(0..LLM_RESPONSES.len())];
        let tokens_used = rng.gen_range(100..=max_tokens.max(101));

        Ok(json!({
            "model": model,
            "temperature": temperature,
            "max_tokens": max_tokens,
            "prompt": prompt,
            "response": response,
            "tokens_used": tokens_used,
        }))
    }
}

/// Mock outbound service call; URLs containing "fail" error out so retry and
/// DLQ paths can be exercised end-to-end
pub struct ExternalServiceHandler {
    settings: Arc<Settings>,
}

#[async_trait]
impl Handler for ExternalServiceHandler {
    fn name(&self) -> &str {
        "call_external_service"
    }

    async fn process(&self, task: &TaskMessage) -> Result<Value> {
        simulated_delay(&self.settings, EXTERNAL_DELAY_MS).await;

        let url = task.config["url"].as_str().unwrap_or("http://example.com/api");
        if url.contains("fail") {
            return Err(WorkflowError::handler(format!(
                "external service at {url} failed"
            )));
        }

        Ok(json!({
            "status_code": 200,
            "url": url,
            "data": {
                "id": rand::thread_rng().gen_range(1..=1000),
                "result": format!("Mock response from {url}"),
            },
        }))
    }
}

/// Boolean comparisons for conditional branching. Supports ==, !=, >, <,
/// >=, <=; numeric comparison falls back to false when either side fails to
/// parse.
pub struct DecisionHandler {
    settings: Arc<Settings>,
}

#[async_trait]
impl Handler for DecisionHandler {
    fn name(&self) -> &str {
        "decision"
    }

    async fn process(&self, task: &TaskMessage) -> Result<Value> {
        simulated_delay(&self.settings, DECISION_DELAY_MS).await;

        let value_a = render(&task.config["value_a"]);
        let value_b = render(&task.config["value_b"]);
        let operator = task.config["operator"].as_str().unwrap_or("==");

        let result = match operator {
            "==" => value_a.trim() == value_b.trim(),
            "!=" => value_a.trim() != value_b.trim(),
            ">" | "<" | ">=" | "<=" => {
                match (value_a.trim().parse::<f64>(), value_b.trim().parse::<f64>()) {
                    (Ok(a), Ok(b)) => match operator {
                        ">" => a > b,
                        "<" => a < b,
                        ">=" => a >= b,
                        _ => a <= b,
                    },
                    _ => false,
                }
            }
            _ => false,
        };

        Ok(json!({ "result": result }))
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
