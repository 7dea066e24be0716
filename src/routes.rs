use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};

use crate::error::ProbeResult;
use crate::ids::TestId;
use crate::queue_controller::QueueController;
use crate::types_api::{
    CancelTestApiResponse, InitializeTestResponse, QueueStatusEntryApi, QueueStatusQuery,
    StartTestRequest, StartTestResponse, StatusApiResponse,
};

pub fn api_routes(queue: Arc<QueueController>) -> Router {
    Router::new()
        .route("/api/tests", post(initialize_test).get(queue_status))
        .route("/api/tests/:id/start", post(start_test))
        .route("/api/tests/:id/status", get(status))
        .route("/api/tests/:id/cancel", post(cancel_test))
        .with_state(queue)
}

async fn initialize_test(
    State(queue): State<Arc<QueueController>>,
) -> ProbeResult<Json<InitializeTestResponse>> {
    let response = queue.initialize_test().await?;
    Ok(Json(InitializeTestResponse { test_id: response.test_id }))
}

async fn start_test(
    State(queue): State<Arc<QueueController>>,
    Path(test_id): Path<TestId>,
    Json(body): Json<StartTestRequest>,
) -> ProbeResult<Json<StartTestResponse>> {
    let test_type = body.test_type.clone();
    let response = queue.start_test(test_id, body.bucket, body.test_type).await?;
    Ok(Json(StartTestResponse { accepted: response.accepted, test_type, message: response.message }))
}

async fn status(
    State(queue): State<Arc<QueueController>>,
    Path(test_id): Path<TestId>,
) -> ProbeResult<Json<StatusApiResponse>> {
    let response = queue.status(test_id).await?;
    Ok(Json(StatusApiResponse {
        state: response.state,
        bucket: response.bucket,
        test_type: response.test_type,
        start_time: response.started_at,
        end_time: response.ended_at,
        success: response.success,
        error: response.error,
    }))
}

async fn cancel_test(
    State(queue): State<Arc<QueueController>>,
    Path(test_id): Path<TestId>,
) -> ProbeResult<Json<CancelTestApiResponse>> {
    let response = queue.cancel(test_id).await?;
    Ok(Json(CancelTestApiResponse { cancelled: response.cancelled, message: response.reason }))
}

async fn queue_status(
    State(queue): State<Arc<QueueController>>,
    Query(params): Query<QueueStatusQuery>,
) -> ProbeResult<Json<Vec<QueueStatusEntryApi>>> {
    let entries = queue.queue_status(params.test_id)?;
    Ok(Json(
        entries
            .into_iter()
            .map(|e| QueueStatusEntryApi { test_id: e.test_id, state: e.state, error: e.error })
            .collect(),
    ))
}
