//! Smoke test against a running deployment.

use harbor_backend::{
    wait_until_ready, BackendClient, BackendConfig, ChatMessage, Probe, ReadyPolicy,
};
use std::time::Duration;

const CHAT_MODEL: &str = "phi-3-mini-128k";
const CHAT_PROMPT: &str = "Say 'Hello World' and nothing else.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SmokeReport {
    pub passed: usize,
    pub total: usize,
}

impl SmokeReport {
    fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

pub(crate) async fn run(base_url: &str, api_key: Option<String>, wait_secs: u64) -> miette::Result<()> {
    let api_key = api_key.unwrap_or_else(|| BackendConfig::from_env().api_key);
    let client = BackendClient::new(base_url, api_key);

    println!("Testing deployment at: {}", base_url);
    println!("{}", "=".repeat(50));

    println!("Waiting for server to be ready...");
    wait_for_health(&client, Duration::from_secs(wait_secs))
        .await
        .map_err(|e| miette::miette!("Server did not become ready in time: {}", e))?;

    let report = run_checks(&client).await;

    println!("{}", "=".repeat(50));
    println!("Test Results: {}/{} tests passed", report.passed, report.total);

    if report.all_passed() {
        println!("All tests passed! Deployment is working correctly.");
        Ok(())
    } else {
        Err(miette::miette!(
            "{} of {} tests failed. Check the deployment.",
            report.total - report.passed,
            report.total
        ))
    }
}

async fn wait_for_health(client: &BackendClient, wait: Duration) -> Result<u32, harbor_backend::BackendError> {
    let policy = ReadyPolicy::fixed(Duration::from_secs(1), wait).with_report_every(10);
    wait_until_ready(policy, || {
        let client = client.clone();
        async move {
            match client.check_health().await {
                Ok(()) => Probe::Ready,
                Err(e) => Probe::Pending(e.to_string()),
            }
        }
    })
    .await
}

/// Health, model listing and a minimal chat completion, in that order.
pub(crate) async fn run_checks(client: &BackendClient) -> SmokeReport {
    let results = [
        check_health(client).await,
        check_models(client).await,
        check_chat(client).await,
    ];
    SmokeReport {
        passed: results.iter().filter(|ok| **ok).count(),
        total: results.len(),
    }
}

async fn check_health(client: &BackendClient) -> bool {
    match client.check_health().await {
        Ok(()) => {
            println!("[PASS] Health endpoint working");
            true
        }
        Err(e) => {
            println!("[FAIL] Health endpoint failed: {}", e);
            false
        }
    }
}

async fn check_models(client: &BackendClient) -> bool {
    match client.list_models().await {
        Ok(models) if !models.is_empty() => {
            println!("[PASS] Models endpoint working - {} models available", models.len());
            true
        }
        Ok(_) => {
            println!("[FAIL] Models endpoint returned an empty list");
            false
        }
        Err(e) => {
            println!("[FAIL] Models endpoint failed: {}", e);
            false
        }
    }
}

async fn check_chat(client: &BackendClient) -> bool {
    let messages = [ChatMessage::user(CHAT_PROMPT)];
    match client.chat(CHAT_MODEL, &messages, 10, 0.1).await {
        Ok(content) if !content.trim().is_empty() => {
            println!("[PASS] Chat endpoint working - Response: '{}'", content.trim());
            true
        }
        Ok(_) => {
            println!("[FAIL] Chat endpoint returned an empty message");
            false
        }
        Err(e) => {
            println!("[FAIL] Chat endpoint failed: {}", e);
            false
        }
    }
}
