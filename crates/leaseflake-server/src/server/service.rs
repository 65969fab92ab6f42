use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use leaseflake::{Error, LeasedGenerator};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinError;

/// State shared by every request handler.
#[derive(Clone, Debug)]
pub struct AppState {
    generator: Arc<LeasedGenerator>,
}

impl AppState {
    pub fn new(generator: LeasedGenerator) -> Self {
        Self {
            generator: Arc::new(generator),
        }
    }
}

/// Builds the HTTP routes:
///
/// - `GET /id`: a fresh ID as decimal text
/// - `GET /id/{id}`: the fields of an ID, as JSON
/// - `GET /health`: `ok`, or 503 once the worker lease is lost
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/id", get(next_id))
        .route("/id/{id}", get(decode_id))
        .route("/health", get(health))
        .with_state(state)
}

/// The fields packed into an ID under the server's layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedId {
    pub id: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    /// Seconds since the layout epoch.
    pub elapsed: u64,
    pub worker_id: u64,
    pub sequence: u64,
}

async fn next_id(State(state): State<AppState>) -> Result<String, ApiError> {
    let generator = Arc::clone(&state.generator);
    // A rollover can sleep until the next second; keep it off the reactor.
    let id = tokio::task::spawn_blocking(move || generator.generate()).await??;
    Ok(id.to_string())
}

async fn decode_id(State(state): State<AppState>, Path(id): Path<u64>) -> Json<DecodedId> {
    let layout = state.generator.generator().layout();
    Json(DecodedId {
        id,
        timestamp: layout.decode_timestamp(id),
        elapsed: layout.decode_elapsed(id),
        worker_id: layout.decode_worker(id),
        sequence: layout.decode_sequence(id),
    })
}

async fn health(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.generator.is_lease_lost() {
        (StatusCode::SERVICE_UNAVAILABLE, "lease lost")
    } else {
        (StatusCode::OK, "ok")
    }
}

/// A failed request, rendered as a status code and a plain-text reason.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match e {
            Error::LeaseLost { .. } | Error::ClockStalled { .. } | Error::StoreUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(error = %e, "id generation failed");
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<JoinError> for ApiError {
    fn from(e: JoinError) -> Self {
        tracing::error!(error = %e, "id generation task failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "id generation task failed".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leaseflake::{BitLayout, SequenceGenerator, SequenceStart, SystemClock, ThreadRandom};
    use tokio_util::sync::CancellationToken;

    fn state(worker_id: u64, lost: &CancellationToken) -> AppState {
        let generator = SequenceGenerator::new(
            BitLayout::default(),
            worker_id,
            SequenceStart::Fixed(0),
            SystemClock,
            ThreadRandom,
        )
        .unwrap();
        AppState::new(LeasedGenerator::new(generator, lost.clone().into()))
    }

    #[tokio::test]
    async fn issued_ids_decode_to_our_worker() {
        let lost = CancellationToken::new();
        let state = state(42, &lost);

        let first: u64 = next_id(State(state.clone())).await.unwrap().parse().unwrap();
        let second: u64 = next_id(State(state.clone())).await.unwrap().parse().unwrap();
        assert!(second > first);

        let Json(decoded) = decode_id(State(state), Path(second)).await;
        assert_eq!(decoded.id, second);
        assert_eq!(decoded.worker_id, 42);
        assert_eq!(
            decoded.timestamp,
            decoded.elapsed + leaseflake::DEFAULT_EPOCH
        );
    }

    #[tokio::test]
    async fn decode_matches_the_layout() {
        let lost = CancellationToken::new();
        let layout = BitLayout::default();
        let id = layout.compose(100, 5, 3);

        let Json(decoded) = decode_id(State(state(0, &lost)), Path(id)).await;
        assert_eq!(
            decoded,
            DecodedId {
                id,
                timestamp: layout.epoch() + 100,
                elapsed: 100,
                worker_id: 5,
                sequence: 3,
            }
        );

        let json = serde_json::to_value(&decoded).unwrap();
        assert_eq!(json["worker_id"], 5);
        assert_eq!(json["elapsed"], 100);
    }

    #[tokio::test]
    async fn lost_lease_fails_generation_and_health() {
        let lost = CancellationToken::new();
        let state = state(7, &lost);
        assert_eq!(health(State(state.clone())).await.0, StatusCode::OK);

        lost.cancel();
        assert_eq!(
            health(State(state.clone())).await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );

        let err = next_id(State(state)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.message.contains("worker id 7"));
    }

    #[test]
    fn clock_errors_are_internal() {
        let err = ApiError::from(Error::ClockMovedBackward { last: 10, now: 4 });
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.message.contains("6 seconds"));
    }
}
