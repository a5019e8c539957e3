//! Notification fan-out.
//!
//! Messages are delivered through zero or more providers; delivery
//! problems are logged and never fail the operation that triggered them.
//! A disabled system reports success unconditionally so notification
//! backpressure cannot break tool execution.

use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};

/// Urgency of a notification; providers map this onto their own scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Mapping used by the push provider (0-10 scale).
    fn push_level(self) -> u8 {
        match self {
            Priority::Low => 2,
            Priority::Normal => 5,
            Priority::High => 8,
            Priority::Critical => 10,
        }
    }
}

/// Routing category, used by the filter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    ToolSuccess,
    ToolFailure,
    ToolConfirmation,
    SecurityViolation,
    SystemError,
    AuditEvent,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::ToolSuccess,
        Category::ToolFailure,
        Category::ToolConfirmation,
        Category::SecurityViolation,
        Category::SystemError,
        Category::AuditEvent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::ToolSuccess => "tool_success",
            Category::ToolFailure => "tool_failure",
            Category::ToolConfirmation => "tool_confirmation",
            Category::SecurityViolation => "security_violation",
            Category::SystemError => "system_error",
            Category::AuditEvent => "audit_event",
        }
    }

    fn parse(s: &str) -> Option<Category> {
        Category::ALL.iter().copied().find(|c| c.as_str() == s)
    }
}

/// Provider-agnostic message format.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub category: Category,
    pub tool_name: Option<String>,
    pub metadata: Option<Value>,
}

impl Message {
    fn to_document(&self) -> Value {
        json!({
            "title": self.title,
            "message": self.body,
            "priority": self.priority,
            "category": self.category.as_str(),
            "tool_name": self.tool_name,
            "metadata": self.metadata.clone().unwrap_or_else(|| json!({})),
        })
    }
}

/// HTTP push provider: POSTs to `<base>/message?token=<token>`.
#[derive(Debug, Clone)]
pub struct PushProvider {
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
}

/// Generic webhook provider: POSTs the full message document.
#[derive(Debug, Clone)]
pub struct WebhookProvider {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

/// The concrete provider shapes, sharing `{send, available, name}`.
#[derive(Debug, Clone)]
pub enum Provider {
    Console,
    Push(PushProvider),
    Webhook(WebhookProvider),
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Console => "console",
            Provider::Push(_) => "push",
            Provider::Webhook(_) => "webhook",
        }
    }

    pub fn available(&self) -> bool {
        match self {
            Provider::Console => true,
            Provider::Push(p) => !p.base_url.is_empty() && !p.token.is_empty(),
            Provider::Webhook(w) => !w.url.is_empty(),
        }
    }

    pub async fn send(&self, client: &reqwest::Client, msg: &Message) -> bool {
        match self {
            Provider::Console => {
                // Low/normal priorities go through the structured log so the
                // stdio protocol stream is never polluted.
                let line = match &msg.tool_name {
                    Some(tool) => format!(
                        "[{}] {} (tool: {}): {}",
                        msg.category.as_str().to_uppercase(),
                        msg.title,
                        tool,
                        msg.body
                    ),
                    None => format!(
                        "[{}] {}: {}",
                        msg.category.as_str().to_uppercase(),
                        msg.title,
                        msg.body
                    ),
                };
                match msg.priority {
                    Priority::High | Priority::Critical => eprintln!("{line}"),
                    _ => tracing::info!(target: "opsgate::notify", "{line}"),
                }
                true
            }
            Provider::Push(p) => {
                let url = format!("{}/message?token={}", p.base_url, p.token);
                let payload = json!({
                    "title": msg.title,
                    "message": msg.body,
                    "priority": msg.priority.push_level(),
                    "extras": {
                        "category": msg.category.as_str(),
                        "tool_name": msg.tool_name,
                        "metadata": msg.metadata.clone().unwrap_or_else(|| json!({})),
                    },
                });
                match client
                    .post(&url)
                    .timeout(p.timeout)
                    .json(&payload)
                    .send()
                    .await
                {
                    Ok(resp) if resp.status().is_success() => true,
                    Ok(resp) => {
                        tracing::warn!(status = %resp.status(), "push provider rejected notification");
                        false
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "push notification failed");
                        false
                    }
                }
            }
            Provider::Webhook(w) => {
                let mut req = client.post(&w.url).timeout(w.timeout);
                for (name, value) in &w.headers {
                    req = req.header(name, value);
                }
                match req.json(&msg.to_document()).send().await {
                    Ok(resp) if resp.status().is_success() => true,
                    Ok(resp) => {
                        tracing::warn!(status = %resp.status(), "webhook rejected notification");
                        false
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "webhook notification failed");
                        false
                    }
                }
            }
        }
    }
}

/// Central fan-out: ordered providers plus category and tool filters.
pub struct Notifier {
    enabled: bool,
    providers: Vec<Provider>,
    categories: Vec<Category>,
    tools: Vec<String>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(
        enabled: bool,
        providers: Vec<Provider>,
        categories: Vec<Category>,
        tools: Vec<String>,
    ) -> Self {
        Self {
            enabled,
            providers,
            categories,
            tools,
            client: reqwest::Client::new(),
        }
    }

    /// A notifier that accepts everything and delivers nothing.
    pub fn disabled() -> Self {
        Self::new(false, Vec::new(), Category::ALL.to_vec(), Vec::new())
    }

    /// Build from the environment: `NOTIFICATION_PROVIDERS` (default
    /// `console,push`), `NOTIFICATION_CATEGORIES`, `NOTIFICATION_TOOLS`,
    /// plus provider credentials (`PUSH_URL`/`PUSH_TOKEN`,
    /// `WEBHOOK_URL`/`WEBHOOK_HEADERS`).
    pub fn from_env(enabled: bool) -> Self {
        if !enabled {
            return Self::disabled();
        }

        let provider_names = std::env::var("NOTIFICATION_PROVIDERS")
            .unwrap_or_else(|_| "console,push".to_string());
        let mut providers = Vec::new();
        for name in provider_names.split(',').map(|s| s.trim().to_lowercase()) {
            let provider = match name.as_str() {
                "console" => Some(Provider::Console),
                "push" => Some(Provider::Push(PushProvider {
                    base_url: std::env::var("PUSH_URL")
                        .unwrap_or_default()
                        .trim_end_matches('/')
                        .to_string(),
                    token: std::env::var("PUSH_TOKEN").unwrap_or_default(),
                    timeout: env_timeout("PUSH_TIMEOUT_SEC", 10),
                })),
                "webhook" => Some(Provider::Webhook(WebhookProvider {
                    url: std::env::var("WEBHOOK_URL").unwrap_or_default(),
                    headers: parse_webhook_headers(),
                    timeout: env_timeout("WEBHOOK_TIMEOUT_SEC", 10),
                })),
                "" => None,
                other => {
                    tracing::warn!(provider = other, "unknown notification provider");
                    None
                }
            };
            if let Some(p) = provider {
                if p.available() {
                    tracing::info!(provider = p.name(), "notification provider initialized");
                    providers.push(p);
                } else {
                    tracing::warn!(provider = p.name(), "notification provider not configured");
                }
            }
        }

        let categories = match std::env::var("NOTIFICATION_CATEGORIES") {
            Ok(raw) if !raw.trim().is_empty() => {
                let parsed: Vec<Category> = raw
                    .split(',')
                    .filter_map(|s| Category::parse(s.trim()))
                    .collect();
                if parsed.is_empty() {
                    Category::ALL.to_vec()
                } else {
                    parsed
                }
            }
            _ => Category::ALL.to_vec(),
        };

        let tools = std::env::var("NOTIFICATION_TOOLS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self::new(true, providers, categories, tools)
    }

    /// Deliver a message. Returns true when at least one provider accepted
    /// it, or unconditionally when the system is disabled or the message
    /// was filtered out.
    pub async fn send(&self, msg: &Message) -> bool {
        if !self.enabled {
            return true;
        }
        if !self.should_send(msg) {
            tracing::debug!(title = %msg.title, "notification filtered out");
            return true;
        }
        if self.providers.is_empty() {
            return true;
        }

        let mut delivered = 0usize;
        for provider in &self.providers {
            if provider.available() && provider.send(&self.client, msg).await {
                delivered += 1;
            }
        }
        if delivered == 0 {
            tracing::warn!(title = %msg.title, "all notification providers failed");
        }
        delivered > 0
    }

    fn should_send(&self, msg: &Message) -> bool {
        if !self.categories.contains(&msg.category) {
            return false;
        }
        if !self.tools.is_empty() {
            if let Some(tool) = &msg.tool_name {
                if !self.tools.contains(tool) {
                    return false;
                }
            }
        }
        true
    }

    pub async fn tool_success(&self, tool: &str, summary: &str, elapsed_ms: u64) -> bool {
        self.send(&Message {
            title: format!("Tool Success: {tool}"),
            body: format!("{summary} (completed in {elapsed_ms}ms)"),
            priority: Priority::Low,
            category: Category::ToolSuccess,
            tool_name: Some(tool.to_string()),
            metadata: Some(json!({"elapsed_ms": elapsed_ms})),
        })
        .await
    }

    pub async fn tool_failure(&self, tool: &str, error: &str, exit_code: i32) -> bool {
        self.send(&Message {
            title: format!("Tool Failed: {tool}"),
            body: format!("Error: {error} (exit code: {exit_code})"),
            priority: Priority::High,
            category: Category::ToolFailure,
            tool_name: Some(tool.to_string()),
            metadata: Some(json!({"exit_code": exit_code})),
        })
        .await
    }

    pub async fn tool_confirmation(&self, tool: &str, summary: &str) -> bool {
        self.send(&Message {
            title: format!("Confirmation Required: {tool}"),
            body: format!("{summary} - waiting for explicit confirmation"),
            priority: Priority::Normal,
            category: Category::ToolConfirmation,
            tool_name: Some(tool.to_string()),
            metadata: None,
        })
        .await
    }

    pub async fn security_violation(&self, kind: &str, details: &str) -> bool {
        self.send(&Message {
            title: format!("Security Violation: {kind}"),
            body: format!("Security violation detected: {details}"),
            priority: Priority::Critical,
            category: Category::SecurityViolation,
            tool_name: None,
            metadata: Some(json!({"violation_type": kind})),
        })
        .await
    }

    /// System status for health reporting.
    pub fn status(&self) -> Value {
        json!({
            "enabled": self.enabled,
            "providers": self
                .providers
                .iter()
                .map(|p| json!({"name": p.name(), "available": p.available()}))
                .collect::<Vec<_>>(),
            "category_filters": self
                .categories
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>(),
            "tool_filters": self.tools,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

fn env_timeout(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_secs),
    )
}

fn parse_webhook_headers() -> Vec<(String, String)> {
    let mut headers = vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("User-Agent".to_string(), "opsgate/0.3".to_string()),
    ];
    if let Ok(raw) = std::env::var("WEBHOOK_HEADERS") {
        match serde_json::from_str::<serde_json::Map<String, Value>>(&raw) {
            Ok(map) => {
                for (name, value) in map {
                    if let Some(v) = value.as_str() {
                        headers.push((name, v.to_string()));
                    }
                }
            }
            Err(_) => tracing::warn!("invalid WEBHOOK_HEADERS format, ignoring"),
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(category: Category, tool: Option<&str>) -> Message {
        Message {
            title: "t".to_string(),
            body: "b".to_string(),
            priority: Priority::Normal,
            category,
            tool_name: tool.map(String::from),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn disabled_notifier_reports_success() {
        let n = Notifier::disabled();
        assert!(n.send(&message(Category::ToolFailure, Some("x"))).await);
    }

    #[tokio::test]
    async fn category_filter_drops_without_failing() {
        let n = Notifier::new(
            true,
            vec![Provider::Console],
            vec![Category::SecurityViolation],
            Vec::new(),
        );
        // Filtered out, still reported as success.
        assert!(n.send(&message(Category::ToolSuccess, None)).await);
    }

    #[tokio::test]
    async fn tool_filter_applies_only_to_named_tools() {
        let n = Notifier::new(
            true,
            vec![Provider::Console],
            Category::ALL.to_vec(),
            vec!["disk_space".to_string()],
        );
        assert!(n.should_send(&message(Category::ToolSuccess, Some("disk_space"))));
        assert!(!n.should_send(&message(Category::ToolSuccess, Some("other"))));
        // Messages without a tool name bypass the tool filter.
        assert!(n.should_send(&message(Category::SystemError, None)));
    }

    #[tokio::test]
    async fn push_provider_posts_expected_payload() {
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .and(query_param("token", "tok"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let n = Notifier::new(
            true,
            vec![Provider::Push(PushProvider {
                base_url: server.uri(),
                token: "tok".to_string(),
                timeout: Duration::from_secs(5),
            })],
            Category::ALL.to_vec(),
            Vec::new(),
        );
        assert!(n.tool_failure("disk_space", "boom", 2).await);
    }

    #[tokio::test]
    async fn provider_failure_is_local() {
        let n = Notifier::new(
            true,
            vec![
                Provider::Push(PushProvider {
                    base_url: "http://127.0.0.1:9".to_string(),
                    token: "tok".to_string(),
                    timeout: Duration::from_millis(200),
                }),
                Provider::Console,
            ],
            Category::ALL.to_vec(),
            Vec::new(),
        );
        // Push fails, console still delivers.
        assert!(n.send(&message(Category::ToolFailure, Some("x"))).await);
    }

    #[test]
    fn status_reports_providers_and_filters() {
        let n = Notifier::new(
            true,
            vec![Provider::Console],
            Category::ALL.to_vec(),
            vec!["a".to_string()],
        );
        let status = n.status();
        assert_eq!(status["enabled"], true);
        assert_eq!(status["providers"][0]["name"], "console");
        assert_eq!(status["tool_filters"][0], "a");
    }
}
