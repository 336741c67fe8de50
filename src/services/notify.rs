use {
    crate::domain::error::FlowError,
    std::{future::Future, pin::Pin},
};

/// Boundary to the chat-bot collaborator. The pipeline only promises that
/// every buyer eventually hears an outcome; how the message reaches them is
/// the bot's problem.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        buyer_id: i64,
        message: &str,
        payload: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), FlowError>> + Send + '_>>;
}

/// Delivers outcomes to the chat-bot's callback endpoint.
pub struct BotApiNotifier {
    http: reqwest::Client,
    url: String,
}

impl BotApiNotifier {
    pub fn new(http: reqwest::Client, url: String) -> Self {
        Self { http, url }
    }
}

impl Notifier for BotApiNotifier {
    fn notify(
        &self,
        buyer_id: i64,
        message: &str,
        payload: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), FlowError>> + Send + '_>> {
        let body = serde_json::json!({
            "buyer_id": buyer_id,
            "message": message,
            "payload": payload,
        });
        Box::pin(async move {
            let resp = self
                .http
                .post(&self.url)
                .json(&body)
                .send()
                .await
                .map_err(|e| FlowError::Notify(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(FlowError::Notify(format!(
                    "bot callback answered {}",
                    resp.status()
                )));
            }
            Ok(())
        })
    }
}

/// Stand-in when no callback is configured. Outcomes still land in the
/// log, and the `notified` flag keeps the sweep from spinning.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(
        &self,
        buyer_id: i64,
        message: &str,
        _payload: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), FlowError>> + Send + '_>> {
        tracing::info!(buyer_id, message, "buyer notification (no callback configured)");
        Box::pin(async { Ok(()) })
    }
}
