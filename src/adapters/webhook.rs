use {
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::{error::FlowError, event::Provider},
        services::ingress::{self, IngestOutcome},
    },
    axum::{
        Json,
        extract::{Path, State},
        http::HeaderMap,
    },
};

/// `POST /webhooks/{provider}`: one route per payment back-end, selected
/// by the path tag. 200 means accepted-or-duplicate; verification failures
/// are 4xx (final for those bytes); internal trouble is 5xx so the
/// provider's retry machinery re-delivers.
pub async fn provider_webhook_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let provider = Provider::try_from(provider.as_str())
        .map_err(|_| FlowError::Validation(format!("unknown provider tag: {provider}")))?;

    let outcome = ingress::ingest(&state, provider, body.as_bytes(), &headers).await?;

    let status = match outcome {
        IngestOutcome::Confirmed(order_id) => {
            tracing::info!(provider = %provider, order_id = %order_id, "webhook confirmed payment");
            "confirmed"
        }
        IngestOutcome::Duplicate => {
            tracing::info!(provider = %provider, "duplicate delivery absorbed");
            "duplicate"
        }
        IngestOutcome::Ignored => "ignored",
        IngestOutcome::Orphaned => "held_for_review",
        IngestOutcome::AmountMismatch(order_id) => {
            tracing::warn!(provider = %provider, order_id = %order_id, "amount mismatch held for review");
            "held_for_review"
        }
    };
    Ok(Json(serde_json::json!({ "status": status })))
}
