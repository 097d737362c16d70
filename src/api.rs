//! HTTP surface
//!
//! JSON API for the storefront and operators, plus the signed webhook
//! endpoints the payment providers and the courier call.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::domain::services::PriceBreakdown;
use crate::gateway::PaymentGatewayAdapter;
use crate::service::{
    CancelRequest, ConfirmPaymentRequest, OrderService, PaymentConfirmation, PlaceOrderRequest, QuoteRequest,
    StatusUpdateRequest,
};
use crate::{CommerceError, Order};

/// Set by the upstream auth layer on customer requests.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OrderService>,
    pub card: Arc<dyn PaymentGatewayAdapter>,
    pub wallet: Arc<dyn PaymentGatewayAdapter>,
    pub cod: Arc<dyn PaymentGatewayAdapter>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "printshop-commerce"})) }))
        .route("/api/v1/quotes", post(quote))
        .route("/api/v1/orders", post(place_order))
        .route("/api/v1/orders/by-number/:number", get(get_order_by_number))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/payment", post(initiate_payment))
        .route("/api/v1/orders/:id/status", post(update_status))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/payments/confirm", post(confirm_payment))
        .route("/webhooks/card", post(card_webhook))
        .route("/webhooks/wallet", post(wallet_webhook))
        .route("/webhooks/cod", post(cod_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for CommerceError {
    fn into_response(self) -> Response {
        let status = match &self {
            CommerceError::InvalidCustomization(_)
            | CommerceError::QuantityTooLow { .. }
            | CommerceError::Validation(_)
            | CommerceError::SignatureInvalid
            | CommerceError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            CommerceError::OrderNotFound | CommerceError::ProductNotFound => StatusCode::NOT_FOUND,
            CommerceError::InvalidTransition { .. } | CommerceError::Conflict | CommerceError::AmountMismatch { .. } => {
                StatusCode::CONFLICT
            }
            CommerceError::PaymentNotInitiable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CommerceError::Provider(_) => StatusCode::BAD_GATEWAY,
            CommerceError::Storage(_) | CommerceError::Notification(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            "Internal error".to_string()
        } else {
            if matches!(self, CommerceError::InvalidTransition { .. } | CommerceError::Conflict) {
                tracing::warn!(error = %self, "Order write rejected");
            }
            self.to_string()
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

type ApiResult<T> = Result<T, CommerceError>;

async fn quote(State(s): State<AppState>, Json(r): Json<QuoteRequest>) -> ApiResult<Json<PriceBreakdown>> {
    Ok(Json(s.service.quote(&r).await?))
}

async fn place_order(State(s): State<AppState>, Json(r): Json<PlaceOrderRequest>) -> ApiResult<(StatusCode, Json<Order>)> {
    Ok((StatusCode::CREATED, Json(s.service.place_order(r).await?)))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.service.get(id).await?))
}

async fn get_order_by_number(State(s): State<AppState>, Path(number): Path<String>) -> ApiResult<Json<Order>> {
    Ok(Json(s.service.get_by_number(&number).await?))
}

async fn initiate_payment(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.service.initiate_payment(id).await?))
}

async fn update_status(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<StatusUpdateRequest>) -> ApiResult<Json<Order>> {
    Ok(Json(s.service.transition_status(id, r).await?))
}

async fn cancel_order(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<CancelRequest>) -> ApiResult<Json<Order>> {
    Ok(Json(s.service.cancel(id, r).await?))
}

async fn confirm_payment(State(s): State<AppState>, headers: HeaderMap, Json(r): Json<ConfirmPaymentRequest>) -> ApiResult<Response> {
    let Some(user_id) = headers.get(USER_ID_HEADER).and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty()) else {
        return Ok((StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": "Unauthorized"}))).into_response());
    };
    let confirmation: PaymentConfirmation = s.service.confirm_payment(user_id, &r).await?;
    Ok(Json(confirmation).into_response())
}

async fn card_webhook(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    handle_webhook(&s, s.card.as_ref(), &headers, &body).await
}

async fn wallet_webhook(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    handle_webhook(&s, s.wallet.as_ref(), &headers, &body).await
}

async fn cod_webhook(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    handle_webhook(&s, s.cod.as_ref(), &headers, &body).await
}

/// Providers retry anything but a 2xx, so only requests that will never
/// succeed (400) or writes that never happened (500) are refused.
async fn handle_webhook(state: &AppState, adapter: &dyn PaymentGatewayAdapter, headers: &HeaderMap, body: &[u8]) -> StatusCode {
    let provider = adapter.method();
    let signature = headers.get(adapter.signature_header()).and_then(|v| v.to_str().ok());

    let event = match adapter.verify(body, signature) {
        Ok(Some(event)) => event,
        Ok(None) => return StatusCode::OK,
        Err(CommerceError::SignatureInvalid) => {
            tracing::warn!(security = true, %provider, "Webhook signature verification failed");
            return StatusCode::BAD_REQUEST;
        }
        Err(e) => {
            tracing::warn!(%provider, error = %e, "Failed to parse webhook payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    match state.service.reconcile(&event).await {
        Ok(_) => StatusCode::OK,
        Err(e @ (CommerceError::Storage(_) | CommerceError::Conflict)) => {
            tracing::error!(%provider, correlation_id = %event.provider_correlation_id, error = %e, "Webhook could not be recorded");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Err(e) => {
            tracing::warn!(%provider, correlation_id = %event.provider_correlation_id, error = %e, "Webhook acknowledged without applying");
            StatusCode::OK
        }
    }
}
