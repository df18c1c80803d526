use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::users::UserRequest;
use super::ServiceError;
use crate::models::cards::{CardCreatedCallback, HolderCallback, RechargeCallback};
use crate::models::users::CardRequest;

#[derive(Clone)]
struct AppState {
    user_channel: mpsc::Sender<UserRequest>,
}

type ApiResponse = (StatusCode, Json<Value>);

fn error_response(err: ServiceError) -> ApiResponse {
    let status = match &err {
        ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        ServiceError::InsufficientFunds(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ServiceError::ExternalService(..) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (status, Json(json!({ "status": "error", "reason": err.to_string() })))
}

fn channel_closed() -> ApiResponse {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "status": "error", "reason": "service unavailable" })),
    )
}

async fn health() -> ApiResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

#[derive(Deserialize)]
struct RegisterPayload {
    address: String,
    sponsor_address: Option<String>,
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> ApiResponse {
    let (tx, rx) = oneshot::channel();
    let request = UserRequest::Register {
        address: payload.address,
        sponsor_address: payload.sponsor_address,
        response: tx,
    };
    if state.user_channel.send(request).await.is_err() {
        return channel_closed();
    }

    match rx.await {
        Ok(Ok(user)) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "user_id": user.id, "address": user.address })),
        ),
        Ok(Err(e)) => error_response(e),
        Err(_) => channel_closed(),
    }
}

#[derive(Deserialize)]
struct DepositPayload {
    user_id: i64,
    tx_hash: String,
    raw_amount: String,
    amount_cents: i64,
    last: i64,
}

async fn deposit(
    State(state): State<AppState>,
    Json(payload): Json<DepositPayload>,
) -> ApiResponse {
    let (tx, rx) = oneshot::channel();
    let request = UserRequest::Deposit {
        user_id: payload.user_id,
        tx_hash: payload.tx_hash,
        raw_amount: payload.raw_amount,
        amount_cents: payload.amount_cents,
        last: payload.last,
        response: tx,
    };
    if state.user_channel.send(request).await.is_err() {
        return channel_closed();
    }

    match rx.await {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({ "status": "success" }))),
        Ok(Err(e)) => error_response(e),
        Err(_) => channel_closed(),
    }
}

#[derive(Deserialize)]
struct TransferPayload {
    from_user_id: i64,
    to_address: String,
    amount_cents: i64,
}

async fn transfer(
    State(state): State<AppState>,
    Json(payload): Json<TransferPayload>,
) -> ApiResponse {
    let (tx, rx) = oneshot::channel();
    let request = UserRequest::Transfer {
        from_user_id: payload.from_user_id,
        to_address: payload.to_address,
        amount_cents: payload.amount_cents,
        response: tx,
    };
    if state.user_channel.send(request).await.is_err() {
        return channel_closed();
    }

    match rx.await {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({ "status": "success" }))),
        Ok(Err(e)) => error_response(e),
        Err(_) => channel_closed(),
    }
}

#[derive(Deserialize)]
struct WithdrawPayload {
    user_id: i64,
    amount_cents: i64,
    rel_amount_cents: i64,
    address: String,
}

async fn withdraw(
    State(state): State<AppState>,
    Json(payload): Json<WithdrawPayload>,
) -> ApiResponse {
    let (tx, rx) = oneshot::channel();
    let request = UserRequest::Withdraw {
        user_id: payload.user_id,
        amount_cents: payload.amount_cents,
        rel_amount_cents: payload.rel_amount_cents,
        address: payload.address,
        response: tx,
    };
    if state.user_channel.send(request).await.is_err() {
        return channel_closed();
    }

    match rx.await {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({ "status": "success" }))),
        Ok(Err(e)) => error_response(e),
        Err(_) => channel_closed(),
    }
}

// Cursor endpoint for the external deposit scanner.
async fn last_deposit_cursor(State(state): State<AppState>) -> ApiResponse {
    let (tx, rx) = oneshot::channel();
    if state
        .user_channel
        .send(UserRequest::LastDepositCursor { response: tx })
        .await
        .is_err()
    {
        return channel_closed();
    }

    match rx.await {
        Ok(Ok(last)) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "last": last })),
        ),
        Ok(Err(e)) => error_response(e),
        Err(_) => channel_closed(),
    }
}

async fn next_withdraw(State(state): State<AppState>) -> ApiResponse {
    let (tx, rx) = oneshot::channel();
    if state
        .user_channel
        .send(UserRequest::NextWithdraw { response: tx })
        .await
        .is_err()
    {
        return channel_closed();
    }

    match rx.await {
        Ok(Ok(withdraw)) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "withdraw": withdraw })),
        ),
        Ok(Err(e)) => error_response(e),
        Err(_) => channel_closed(),
    }
}

#[derive(Deserialize)]
struct WithdrawStatusPayload {
    withdraw_id: i64,
    from: String,
    to: String,
}

async fn update_withdraw_status(
    State(state): State<AppState>,
    Json(payload): Json<WithdrawStatusPayload>,
) -> ApiResponse {
    let (tx, rx) = oneshot::channel();
    let request = UserRequest::UpdateWithdrawStatus {
        withdraw_id: payload.withdraw_id,
        from: payload.from,
        to: payload.to,
        response: tx,
    };
    if state.user_channel.send(request).await.is_err() {
        return channel_closed();
    }

    match rx.await {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({ "status": "success" }))),
        Ok(Err(e)) => error_response(e),
        Err(_) => channel_closed(),
    }
}

async fn request_card(
    State(state): State<AppState>,
    Json(request): Json<CardRequest>,
) -> ApiResponse {
    let (tx, rx) = oneshot::channel();
    if state
        .user_channel
        .send(UserRequest::RequestCard { request, response: tx })
        .await
        .is_err()
    {
        return channel_closed();
    }

    match rx.await {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({ "status": "success" }))),
        Ok(Err(e)) => error_response(e),
        Err(_) => channel_closed(),
    }
}

async fn card_records(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResponse {
    let (tx, rx) = oneshot::channel();
    if state
        .user_channel
        .send(UserRequest::CardRecords { user_id, response: tx })
        .await
        .is_err()
    {
        return channel_closed();
    }

    match rx.await {
        Ok(Ok(records)) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "records": records })),
        ),
        Ok(Err(e)) => error_response(e),
        Err(_) => channel_closed(),
    }
}

// Callback endpoints only ack receipt; processing happens on the service
// side and unknown references are dropped there.
async fn holder_callback(
    State(state): State<AppState>,
    Json(callback): Json<HolderCallback>,
) -> ApiResponse {
    let _ = state
        .user_channel
        .send(UserRequest::HolderNotify { callback })
        .await;

    (StatusCode::OK, Json(json!({ "code": 200, "msg": "success" })))
}

async fn card_callback(
    State(state): State<AppState>,
    Json(callback): Json<CardCreatedCallback>,
) -> ApiResponse {
    let _ = state
        .user_channel
        .send(UserRequest::CardCreatedNotify { callback })
        .await;

    (StatusCode::OK, Json(json!({ "code": 200, "msg": "success" })))
}

async fn recharge_callback(
    State(state): State<AppState>,
    Json(callback): Json<RechargeCallback>,
) -> ApiResponse {
    let _ = state
        .user_channel
        .send(UserRequest::RechargeNotify { callback })
        .await;

    (StatusCode::OK, Json(json!({ "code": 200, "msg": "success" })))
}

pub async fn start_http_server(
    bind: &str,
    user_tx: mpsc::Sender<UserRequest>,
) -> Result<(), anyhow::Error> {
    let state = AppState { user_channel: user_tx };

    let app = Router::new()
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/deposit", post(deposit))
        .route("/deposits/last", get(last_deposit_cursor))
        .route("/transfer", post(transfer))
        .route("/withdraw", post(withdraw))
        .route("/withdrawals/next", get(next_withdraw))
        .route("/withdrawals/status", post(update_withdraw_status))
        .route("/card", post(request_card))
        .route("/card/records/{user_id}", get(card_records))
        .route("/callbacks/holder", post(holder_callback))
        .route("/callbacks/card", post(card_callback))
        .route("/callbacks/recharge", post(recharge_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    log::info!("HTTP server listening on {}", bind);
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_client_or_server_status() {
        let (status, _) = error_response(ServiceError::Validation("bad".to_string()));
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = error_response(ServiceError::InsufficientFunds(3));
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = error_response(ServiceError::ExternalService(
            "IssuerApi".to_string(),
            "products".to_string(),
            "down".to_string(),
        ));
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, _) = error_response(ServiceError::Database("boom".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn a_closed_service_channel_maps_to_service_unavailable() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let state = AppState { user_channel: tx };

        let (status, _) = last_deposit_cursor(State(state.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = card_records(State(state), Path(7)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
