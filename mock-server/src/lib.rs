//! In-process backend used by the client's integration tests.
//!
//! Serves one collection per pagination dialect, a flaky endpoint, an echo
//! endpoint and a lock table, so the client can be exercised over real HTTP.

use std::{
    collections::HashMap,
    ops::Range,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// Sizes of the served collections and how the flaky endpoint behaves.
#[derive(Clone, Debug)]
pub struct Fixture {
    pub groups: u32,
    pub job_templates: u32,
    pub deployments: u32,
    /// Items per page when the request does not ask for a size.
    pub page_size: usize,
    /// `GET /flaky` answers 500 this many times before succeeding.
    pub flaky_failures: u32,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            groups: 5,
            job_templates: 5,
            deployments: 5,
            page_size: 2,
            flaky_failures: 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeldLock {
    pub id: Uuid,
    #[serde(rename = "lockId")]
    pub lock_id: String,
    pub owner: String,
}

#[derive(Deserialize)]
pub struct LockRequest {
    pub owner: String,
}

#[derive(Deserialize)]
pub struct UnlockQuery {
    pub owner: Option<String>,
}

struct Backend {
    fixture: Fixture,
    flaky_remaining: AtomicU32,
    locks: RwLock<HashMap<String, HeldLock>>,
}

type Shared = Arc<Backend>;
type Params = Query<HashMap<String, String>>;

pub fn app() -> Router {
    app_with(Fixture::default())
}

pub fn app_with(fixture: Fixture) -> Router {
    let backend = Arc::new(Backend {
        flaky_remaining: AtomicU32::new(fixture.flaky_failures),
        fixture,
        locks: RwLock::new(HashMap::new()),
    });
    Router::new()
        .route("/groups", get(list_groups))
        .route("/groups/{id}", get(get_group))
        .route("/job_templates", get(list_job_templates))
        .route("/deployments", get(list_deployments))
        .route("/flaky", get(flaky))
        .route("/echo", post(echo))
        .route("/locks/{id}", put(create_lock).get(get_lock).delete(delete_lock))
        .with_state(backend)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with(listener, Fixture::default()).await
}

pub async fn run_with(listener: TcpListener, fixture: Fixture) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(fixture)).await
}

pub fn group(id: u32) -> Value {
    json!({ "id": id, "name": format!("group-{id}"), "path": format!("infra/group-{id}") })
}

pub fn job_template(id: u32) -> Value {
    json!({ "id": id, "name": format!("template-{id}") })
}

pub fn deployment(id: u32) -> Value {
    json!({ "id": id, "name": format!("deployment-{id}") })
}

fn param(params: &HashMap<String, String>, name: &str, default: usize) -> usize {
    params
        .get(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Index range of 1-based `page` when pages hold `size` items.
pub fn page_window(total: usize, page: usize, size: usize) -> Range<usize> {
    let start = page.saturating_sub(1).saturating_mul(size).min(total);
    start..start.saturating_add(size).min(total)
}

async fn list_groups(State(backend): State<Shared>, Query(params): Params) -> Response {
    let mut groups: Vec<Value> = (1..=backend.fixture.groups).map(group).collect();
    if let Some(search) = params.get("search") {
        groups.retain(|g| g["name"].as_str().is_some_and(|name| name.contains(search.as_str())));
    }
    let per_page = param(&params, "per_page", backend.fixture.page_size);
    let page = param(&params, "page", 1);
    let window = page_window(groups.len(), page, per_page);

    (
        [("X-Total", groups.len().to_string())],
        Json(groups[window].to_vec()),
    )
        .into_response()
}

async fn get_group(State(backend): State<Shared>, Path(id): Path<String>) -> Response {
    match id.parse::<u32>() {
        Ok(id) if (1..=backend.fixture.groups).contains(&id) => Json(group(id)).into_response(),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "404 Group Not Found" })),
        )
            .into_response(),
    }
}

async fn list_job_templates(State(backend): State<Shared>, Query(params): Params) -> Json<Value> {
    let total = backend.fixture.job_templates as usize;
    let page_size = param(&params, "page_size", backend.fixture.page_size);
    let page = param(&params, "page", 1);
    let results: Vec<Value> = page_window(total, page, page_size)
        .map(|i| job_template(i as u32 + 1))
        .collect();
    Json(json!({ "count": total, "results": results }))
}

async fn list_deployments(State(backend): State<Shared>, Query(params): Params) -> Json<Value> {
    let total = backend.fixture.deployments as usize;
    let size = backend.fixture.page_size;
    let skip = param(&params, "$skip", 0).min(total);
    let content: Vec<Value> = (skip..(skip + size).min(total))
        .map(|i| deployment(i as u32 + 1))
        .collect();
    Json(json!({
        "totalElements": total,
        "numberOfElements": content.len(),
        "size": size,
        "content": content,
    }))
}

async fn flaky(State(backend): State<Shared>) -> Response {
    let failing = backend
        .flaky_remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        (StatusCode::INTERNAL_SERVER_ERROR, "temporarily unavailable").into_response()
    } else {
        Json(json!({ "status": "ok" })).into_response()
    }
}

async fn echo(headers: HeaderMap, body: String) -> (StatusCode, Json<Value>) {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    (
        StatusCode::CREATED,
        Json(json!({ "contentType": content_type, "body": body })),
    )
}

async fn create_lock(
    State(backend): State<Shared>,
    Path(lock_id): Path<String>,
    Json(input): Json<LockRequest>,
) -> (StatusCode, Json<HeldLock>) {
    let mut locks = backend.locks.write().await;
    if let Some(held) = locks.get(&lock_id) {
        return (StatusCode::CONFLICT, Json(held.clone()));
    }
    let held = HeldLock {
        id: Uuid::new_v4(),
        lock_id: lock_id.clone(),
        owner: input.owner,
    };
    locks.insert(lock_id, held.clone());
    (StatusCode::CREATED, Json(held))
}

async fn get_lock(
    State(backend): State<Shared>,
    Path(lock_id): Path<String>,
) -> Result<Json<HeldLock>, StatusCode> {
    let locks = backend.locks.read().await;
    locks.get(&lock_id).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn delete_lock(
    State(backend): State<Shared>,
    Path(lock_id): Path<String>,
    Query(query): Query<UnlockQuery>,
) -> StatusCode {
    let mut locks = backend.locks.write().await;
    let owned = locks
        .get(&lock_id)
        .is_some_and(|held| query.owner.as_deref() == Some(held.owner.as_str()));
    if owned {
        locks.remove(&lock_id);
    }
    StatusCode::NO_CONTENT
}
