// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! HTTP surface: one render route and the four mutation routes per view.

use std::{collections::BTreeMap, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use treeview_app_core::{PathEvaluator, ViewRegistry};
use treeview_core::{
    render_view, Actor, Envelope, FilterState, KeyKind, MemoryRowStore, MutationCommand,
    ReconcileError, Reconciler, RenderError, Role, RowKey, StoreError,
};

/// Header carrying the caller's user id.
pub const USER_HEADER: &str = "x-user-id";
/// Header carrying the caller's role number.
pub const ROLE_HEADER: &str = "x-role";

/// Shared, read-mostly daemon state.
pub struct AppState {
    /// Row storage.
    pub store: MemoryRowStore,
    /// Loaded views.
    pub views: ViewRegistry,
    /// Formula evaluator.
    pub evaluator: PathEvaluator,
    /// Role of anonymous callers.
    pub public_role: Role,
}

/// Routes over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/views", get(list_views))
        .route("/views/:view/tree", get(tree_handler))
        .route("/views/:view/:action", post(mutation_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Actor from request headers; anonymous callers get the public role.
fn actor_from(headers: &HeaderMap, public_role: Role) -> Actor {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let role = header(ROLE_HEADER)
        .and_then(|r| r.trim().parse::<u32>().ok())
        .map_or(public_role, Role);
    match header(USER_HEADER).filter(|id| !id.is_empty()) {
        Some(id) => Actor::user(RowKey::from(id).coerce(KeyKind::Integer), role),
        None => Actor::public(role),
    }
}

fn unknown_view(view: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": format!("no view named `{view}`"), "kind": "not_found"})),
    )
        .into_response()
}

async fn list_views(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.views.names().map(str::to_owned).collect::<Vec<_>>())
}

async fn tree_handler(
    State(state): State<Arc<AppState>>,
    Path(view): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let Some(definition) = state.views.get(&view) else {
        return unknown_view(&view);
    };
    let actor = actor_from(&headers, state.public_role);
    let filter = FilterState::from_query(params);
    match render_view(&definition, &state.store, &state.evaluator, &actor, &filter) {
        Ok(tree) => (StatusCode::OK, Json(tree)).into_response(),
        Err(err) => {
            warn!(%view, %err, "render failed");
            let status = match &err {
                RenderError::NotFound { .. } | RenderError::Store(StoreError::NotFound { .. }) => {
                    StatusCode::NOT_FOUND
                }
                RenderError::Store(StoreError::Forbidden(_)) => StatusCode::FORBIDDEN,
                RenderError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({"error": err.to_string()}))).into_response()
        }
    }
}

fn status_for(err: &ReconcileError) -> StatusCode {
    match err {
        ReconcileError::ReadOnly | ReconcileError::NotAuthorized => StatusCode::FORBIDDEN,
        ReconcileError::NotFound(_) => StatusCode::NOT_FOUND,
        ReconcileError::Validation(_) => StatusCode::BAD_REQUEST,
        ReconcileError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn mutation_handler(
    State(state): State<Arc<AppState>>,
    Path((view, action)): Path<(String, String)>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    let Some(definition) = state.views.get(&view) else {
        return unknown_view(&view);
    };
    let actor = actor_from(&headers, state.public_role);
    let result = MutationCommand::from_route(&action, &payload, definition.schema.key_kind)
        .and_then(|command| {
            Reconciler::new(&definition, &state.store, &state.evaluator).reconcile(&command, &actor)
        });
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(err) => {
            info!(%view, %action, kind = err.kind(), %err, "mutation rejected");
            status_for(err)
        }
    };
    (status, Json(Envelope::from(result))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use treeview_core::{FieldInfo, FieldType, Row, TableSchema, ViewConfig, ViewDefinition};

    fn state() -> Arc<AppState> {
        let schema = TableSchema::new(
            "tasks",
            vec![
                FieldInfo::new("title", FieldType::String),
                FieldInfo::reference("parent", FieldType::Integer, "tasks"),
            ],
        );
        let rows = vec![
            Row::new().with("id", 1).with("title", "A").with("parent", Value::Null),
            Row::new().with("id", 2).with("title", "B").with("parent", 1),
        ];
        let store = MemoryRowStore::new().with_table(schema.clone(), rows);
        let mut views = ViewRegistry::new();
        views.insert(
            ViewDefinition::new("outline", ViewConfig::new("title", "parent"), schema).unwrap(),
        );
        Arc::new(AppState {
            store,
            views,
            evaluator: PathEvaluator::new(),
            public_role: Role::PUBLIC,
        })
    }

    async fn body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn admin() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ROLE_HEADER, "1".parse().unwrap());
        headers.insert(USER_HEADER, "1".parse().unwrap());
        headers
    }

    #[test]
    fn anonymous_callers_get_the_public_role() {
        let actor = actor_from(&HeaderMap::new(), Role(9));
        assert_eq!(actor, Actor::public(Role(9)));
        assert_eq!(actor_from(&admin(), Role::PUBLIC), Actor::user(1, Role::ADMIN));
    }

    #[tokio::test]
    async fn renders_tree() {
        let response = tree_handler(
            State(state()),
            Path("outline".into()),
            Query(BTreeMap::new()),
            HeaderMap::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body(response).await;
        let nodes = &json["forest"]["nodes"];
        assert_eq!(nodes[0]["label"], "A");
        assert_eq!(nodes[1]["label"], "B");
        assert_eq!(nodes[1]["parent"], 0);
    }

    #[tokio::test]
    async fn public_drag_drop_is_not_authorized() {
        let response = mutation_handler(
            State(state()),
            Path(("outline".into(), "drag_drop".into())),
            HeaderMap::new(),
            Json(json!({"id": 2})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body(response).await,
            json!({"error": "not authorized", "kind": "not_authorized"})
        );
    }

    #[tokio::test]
    async fn admin_drag_drop_detaches_to_root() {
        let state = state();
        let response = mutation_handler(
            State(state.clone()),
            Path(("outline".into(), "drag_drop".into())),
            admin(),
            Json(json!({"id": "2", "parent_id": "root"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, json!({"success": "ok"}));
        let rows = state.store.rows("tasks").unwrap();
        assert_eq!(rows[1].get("parent"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn unknown_view_is_404() {
        let response = mutation_handler(
            State(state()),
            Path(("nope".into(), "delete_node".into())),
            admin(),
            Json(json!({"id": 1})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
