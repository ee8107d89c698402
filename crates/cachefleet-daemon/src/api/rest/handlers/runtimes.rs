//! Runtime status handlers

use crate::api::rest::state::AppState;
use crate::controller::ReconcileRecord;
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    Json,
};
use cachefleet_types::{
    CacheStateList, LabelSelector, NamespacedName, Runtime, RuntimePhase, RuntimeType,
};
use serde::Serialize;

/// One line of the runtime listing
#[derive(Debug, Serialize)]
pub struct RuntimeSummary {
    pub namespace: String,
    pub name: String,
    pub runtime_type: RuntimeType,
    pub replicas: u32,
    pub master_phase: RuntimePhase,
    pub worker_phase: RuntimePhase,
    pub fuse_phase: RuntimePhase,
    pub workers_ready: u32,
    pub cache_states: CacheStateList,
    pub deleting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileRecord>,
}

impl RuntimeSummary {
    fn new(runtime: &Runtime, reconcile: Option<ReconcileRecord>) -> Self {
        Self {
            namespace: runtime.namespace().to_string(),
            name: runtime.name().to_string(),
            runtime_type: runtime.runtime_type,
            replicas: runtime.replicas(),
            master_phase: runtime.status.master_phase,
            worker_phase: runtime.status.worker_phase,
            fuse_phase: runtime.status.fuse_phase,
            workers_ready: runtime.status.worker_number_ready,
            cache_states: runtime.status.cache_states.clone(),
            deleting: runtime.metadata.is_being_deleted(),
            reconcile,
        }
    }
}

/// A runtime in full, with the controller's view of it
#[derive(Debug, Serialize)]
pub struct RuntimeDetail {
    #[serde(flatten)]
    pub runtime: Runtime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileRecord>,
}

pub async fn list_runtimes(State(state): State<AppState>) -> ApiResult<Json<Vec<RuntimeSummary>>> {
    let runtimes = state
        .client
        .runtimes
        .list(None, &LabelSelector::everything())
        .await?;
    let summaries = runtimes
        .iter()
        .map(|runtime| RuntimeSummary::new(runtime, state.controller.record(&runtime.key())))
        .collect();
    Ok(Json(summaries))
}

pub async fn get_runtime(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<RuntimeDetail>> {
    let runtime = state.client.runtimes.get(&namespace, &name).await?;
    let reconcile = state
        .controller
        .record(&NamespacedName::new(namespace, name));
    Ok(Json(RuntimeDetail { runtime, reconcile }))
}

#[cfg(test)]
mod tests {
    use crate::api::rest::{create_router, AppState};
    use crate::config::{SchedulerConfig, ServerConfig};
    use crate::controller::Controller;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use cachefleet_engine::testing::{Fixture, NAME, NAMESPACE};
    use cachefleet_types::{NamespacedName, RuntimeType};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(fixture: &Fixture) -> (Router, Arc<Controller>) {
        let controller = Arc::new(Controller::new(
            fixture.ctx.clone(),
            SchedulerConfig::default(),
        ));
        let state = AppState::new(fixture.cluster.client(), controller.clone());
        (create_router(state, &ServerConfig::default()), controller)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_healthz() {
        let fixture = Fixture::new();
        let (app, _) = app(&fixture);

        let (status, body) = get(app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["managed_runtimes"], 0);
    }

    #[tokio::test]
    async fn test_list_runtimes_includes_reconcile_record() {
        let fixture = Fixture::new();
        fixture.add_nodes(2).await;
        fixture.add_runtime(RuntimeType::JuiceFs, 2).await;
        let (app, controller) = app(&fixture);
        controller.process(NamespacedName::new(NAMESPACE, NAME)).await;

        let (status, body) = get(app, "/api/v1/runtimes").await;
        assert_eq!(status, StatusCode::OK);
        let listed = body.as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["name"], NAME);
        assert_eq!(listed[0]["replicas"], 2);
        assert_eq!(listed[0]["reconcile"]["ready"], false);
    }

    #[tokio::test]
    async fn test_get_runtime() {
        let fixture = Fixture::new();
        fixture.add_runtime(RuntimeType::Alluxio, 1).await;
        let (app, _) = app(&fixture);

        let (status, body) = get(app, "/api/v1/runtimes/default/hbase").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metadata"]["name"], NAME);
        assert!(body.get("reconcile").is_none());
    }

    #[tokio::test]
    async fn test_get_missing_runtime_is_not_found() {
        let fixture = Fixture::new();
        let (app, _) = app(&fixture);

        let (status, body) = get(app, "/api/v1/runtimes/default/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }
}
