//! HTTP surface over `ChainLedger`. Every ledger call runs on the blocking pool
//! because appends mine a block.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ledger_core::{
    Block, ChainLedger, Ledger, LedgerError, LedgerStore, TaskChange, TaskPatch, TaskSnapshot,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinError;
use tracing::{error, warn};

pub type SharedChain = ChainLedger<dyn LedgerStore>;

#[derive(Clone)]
pub struct AppState {
    pub chain: SharedChain,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum ActionIn {
    Create,
    Complete,
    Update,
    Delete,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxIn {
    action: ActionIn,
    task_id: Option<String>,
    #[serde(default)]
    task: TaskPatch,
    signing_key: Option<String>,
}

impl TxIn {
    fn into_change(self) -> Result<(TaskChange, Option<String>), ApiError> {
        let TxIn {
            action,
            task_id,
            task,
            signing_key,
        } = self;
        let change = match action {
            ActionIn::Create => {
                let title = task
                    .title
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| ApiError::BadRequest("Title is required".into()))?;
                let snapshot = task.apply(&TaskSnapshot::new(title));
                match task_id {
                    Some(task_id) => TaskChange::Create {
                        task_id,
                        task: snapshot,
                    },
                    None => TaskChange::create(snapshot),
                }
            }
            ActionIn::Complete => TaskChange::Complete {
                task_id: required(task_id)?,
            },
            ActionIn::Update => TaskChange::Update {
                task_id: required(task_id)?,
                patch: task,
            },
            ActionIn::Delete => TaskChange::Delete {
                task_id: required(task_id)?,
            },
        };
        Ok((change, signing_key))
    }
}

fn required(task_id: Option<String>) -> Result<String, ApiError> {
    task_id.ok_or_else(|| ApiError::BadRequest("taskId is required".into()))
}

#[derive(Serialize)]
struct MineOut {
    mined: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    block: Option<Block>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidationOut {
    is_valid: bool,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fault: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    BadRequest(String),
    Internal(String),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl From<JoinError> for ApiError {
    fn from(err: JoinError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                error!("internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            ApiError::Ledger(err) => {
                let status = match &err {
                    LedgerError::NotFound(_) | LedgerError::TaskNotFound { .. } => {
                        StatusCode::NOT_FOUND
                    }
                    LedgerError::AlreadyExists(_)
                    | LedgerError::TaskExists { .. }
                    | LedgerError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
                    LedgerError::MiningTimeout { .. } | LedgerError::MiningCancelled { .. } => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    LedgerError::Config(_) | LedgerError::Storage(_) => {
                        error!("ledger error: {err:#}");
                        return (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            Json(serde_json::json!({ "error": "Internal server error" })),
                        )
                            .into_response();
                    }
                };
                warn!("request failed: {err}");
                (status, err.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Run a ledger call off the async executor.
async fn blocking<T, F>(chain: &SharedChain, f: F) -> Result<T, ApiError>
where
    F: FnOnce(SharedChain) -> ledger_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let chain = chain.clone();
    Ok(tokio::task::spawn_blocking(move || f(chain)).await??)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(Health { status: "ok" }) }))
        .route("/ledgers", get(list_ledgers))
        .route("/ledgers/{user_id}", post(create_ledger).get(get_ledger))
        .route("/ledgers/{user_id}/tx", post(submit_tx))
        .route("/ledgers/{user_id}/mine", post(mine_pending))
        .route("/ledgers/{user_id}/validate", post(validate_ledger))
        .route("/ledgers/{user_id}/export", get(export_ledger))
        .with_state(state)
}

async fn list_ledgers(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(blocking(&state.chain, |chain| chain.list_users()).await?))
}

async fn create_ledger(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<(StatusCode, Json<Ledger>), ApiError> {
    let ledger = blocking(&state.chain, move |chain| chain.create_ledger(&user_id)).await?;
    Ok((StatusCode::CREATED, Json(ledger)))
}

async fn get_ledger(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Ledger>, ApiError> {
    Ok(Json(
        blocking(&state.chain, move |chain| chain.get_ledger(&user_id)).await?,
    ))
}

async fn submit_tx(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<TxIn>,
) -> Result<Json<Block>, ApiError> {
    let (change, signing_key) = body.into_change()?;
    let block = blocking(&state.chain, move |chain| {
        chain.record(&user_id, change, signing_key.as_deref())
    })
    .await?;
    Ok(Json(block))
}

async fn mine_pending(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<MineOut>, ApiError> {
    let block = blocking(&state.chain, move |chain| chain.mine_pending(&user_id)).await?;
    Ok(Json(MineOut {
        mined: block.is_some(),
        block,
    }))
}

async fn validate_ledger(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ValidationOut>, ApiError> {
    let fault = blocking(&state.chain, move |chain| chain.check_ledger(&user_id)).await?;
    Ok(Json(ValidationOut {
        is_valid: fault.is_none(),
        message: if fault.is_none() {
            "Blockchain is valid"
        } else {
            "Blockchain validation failed"
        },
        fault: fault.map(|f| f.to_string()),
    }))
}

async fn export_ledger(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let text = blocking(&state.chain, move |chain| chain.export_ledger(&user_id)).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use ledger_core::{LedgerConfig, MemoryStore, SaveOutcome};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn easy() -> LedgerConfig {
        LedgerConfig {
            difficulty: 1,
            ..LedgerConfig::default()
        }
    }

    fn app_on(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Router {
        router(AppState {
            chain: ChainLedger::new(store, config),
        })
    }

    fn app() -> Router {
        app_on(Arc::new(MemoryStore::new()), easy())
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (status, body) = call(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn ledger_lifecycle_over_http() {
        let app = app();
        let (status, ledger) = call(&app, "POST", "/ledgers/alice", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(ledger["totalBlocks"], 1);
        assert_eq!(ledger["blocks"][0]["previousHash"], "0");

        let (status, _) = call(&app, "POST", "/ledgers/alice", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, block) = call(
            &app,
            "POST",
            "/ledgers/alice/tx",
            Some(json!({
                "action": "CREATE",
                "taskId": "t1",
                "task": { "title": "Write", "priority": "high" },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(block["index"], 1);
        assert_eq!(block["transactions"][0]["payload"]["taskData"]["priority"], "high");

        let (status, block) = call(
            &app,
            "POST",
            "/ledgers/alice/tx",
            Some(json!({ "action": "COMPLETE", "taskId": "t1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(block["index"], 2);
        assert_eq!(block["transactions"][0]["payload"]["taskData"]["completed"], true);

        let (status, report) = call(&app, "POST", "/ledgers/alice/validate", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["isValid"], true);
        assert_eq!(report["message"], "Blockchain is valid");

        let (status, ledger) = call(&app, "GET", "/ledgers/alice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ledger["totalBlocks"], 3);

        let (status, exported) = call(&app, "GET", "/ledgers/alice/export", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(exported, ledger);

        let (status, mined) = call(&app, "POST", "/ledgers/alice/mine", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mined["mined"], false);

        let (_, users) = call(&app, "GET", "/ledgers", None).await;
        assert_eq!(users, json!(["alice"]));
    }

    #[tokio::test]
    async fn bad_requests_are_rejected() {
        let app = app();
        call(&app, "POST", "/ledgers/alice", None).await;

        let (status, body) = call(
            &app,
            "POST",
            "/ledgers/alice/tx",
            Some(json!({ "action": "CREATE", "task": {} })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Title is required");

        let (status, _) = call(
            &app,
            "POST",
            "/ledgers/alice/tx",
            Some(json!({ "action": "DELETE" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_ledger_and_task_are_not_found() {
        let app = app();
        let (status, _) = call(&app, "GET", "/ledgers/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &app,
            "POST",
            "/ledgers/ghost/tx",
            Some(json!({ "action": "CREATE", "task": { "title": "x" } })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        call(&app, "POST", "/ledgers/alice", None).await;
        let (status, _) = call(
            &app,
            "POST",
            "/ledgers/alice/tx",
            Some(json!({ "action": "UPDATE", "taskId": "nope", "task": { "title": "y" } })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_task_id_is_a_conflict() {
        let app = app();
        call(&app, "POST", "/ledgers/alice", None).await;
        let body = json!({ "action": "CREATE", "taskId": "t1", "task": { "title": "One" } });

        let (status, _) = call(&app, "POST", "/ledgers/alice/tx", Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let (status, err) = call(&app, "POST", "/ledgers/alice/tx", Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["error"], "task t1 already exists in ledger for user alice");

        let (_, ledger) = call(&app, "GET", "/ledgers/alice", None).await;
        assert_eq!(ledger["totalBlocks"], 2);
    }

    #[tokio::test]
    async fn mining_timeout_is_service_unavailable() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let fast = app_on(Arc::clone(&store), easy());
        let stuck = app_on(
            store,
            LedgerConfig {
                difficulty: 64,
                mining_timeout_ms: Some(0),
                ..LedgerConfig::default()
            },
        );

        let (status, _) = call(&stuck, "POST", "/ledgers/bob", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        call(&fast, "POST", "/ledgers/alice", None).await;
        let body = json!({ "action": "CREATE", "taskId": "t1", "task": { "title": "Slow" } });
        let (status, err) = call(&stuck, "POST", "/ledgers/alice/tx", Some(body)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(err["error"].as_str().unwrap().contains("timed out"));

        let (_, ledger) = call(&fast, "GET", "/ledgers/alice", None).await;
        assert_eq!(ledger["pendingTransactions"].as_array().unwrap().len(), 1);
        let (status, mined) = call(&fast, "POST", "/ledgers/alice/mine", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mined["mined"], true);
        assert_eq!(mined["block"]["index"], 1);
    }

    /// Moves the stored tip right before the first conditional save.
    struct RacingStore {
        inner: MemoryStore,
        raced: AtomicBool,
    }

    impl LedgerStore for RacingStore {
        fn get_ledger(&self, user_id: &str) -> anyhow::Result<Option<Ledger>> {
            self.inner.get_ledger(user_id)
        }

        fn save_ledger(
            &self,
            ledger: &Ledger,
            expected: Option<&str>,
        ) -> anyhow::Result<SaveOutcome> {
            if expected.is_some() && !self.raced.swap(true, Ordering::SeqCst) {
                if let Some(mut rival) = self.inner.get_ledger(&ledger.user_id)? {
                    rival.last_block_hash = "rival".into();
                    self.inner.save_ledger(&rival, expected)?;
                }
            }
            self.inner.save_ledger(ledger, expected)
        }

        fn list_users(&self) -> anyhow::Result<Vec<String>> {
            self.inner.list_users()
        }
    }

    #[tokio::test]
    async fn moved_tip_is_a_conflict() {
        let app = app_on(
            Arc::new(RacingStore {
                inner: MemoryStore::new(),
                raced: AtomicBool::new(false),
            }),
            easy(),
        );
        let (status, _) = call(&app, "POST", "/ledgers/alice", None).await;
        assert_eq!(status, StatusCode::CREATED);

        let body = json!({ "action": "CREATE", "task": { "title": "Late" } });
        let (status, err) = call(&app, "POST", "/ledgers/alice/tx", Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(err["error"].as_str().unwrap().contains("concurrent append"));

        let (_, ledger) = call(&app, "GET", "/ledgers/alice", None).await;
        assert_eq!(ledger["totalBlocks"], 1);
        assert_eq!(ledger["lastBlockHash"], "rival");
    }

    #[tokio::test]
    async fn encoded_user_ids_reach_their_own_ledger() {
        let app = app();
        let (status, ledger) = call(&app, "POST", "/ledgers/a%2Fb%3Fc", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(ledger["userId"], "a/b?c");

        let (status, _) = call(&app, "GET", "/ledgers/a%2Fb%3Fc", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, users) = call(&app, "GET", "/ledgers", None).await;
        assert_eq!(users, json!(["a/b?c"]));
    }
}
