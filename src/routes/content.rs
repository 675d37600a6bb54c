//! Content Routes
//!
//! CRUD over the site's bilingual content tables. Anyone can read published
//! rows; admins see drafts and are the only ones allowed to write.

use std::fmt;
use std::str::FromStr;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, patch, post},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::auth::middleware::require_admin;
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::session;

const DEFAULT_PAGE_SIZE: u64 = 50;
const MAX_PAGE_SIZE: u64 = 200;

/// Tables reachable through `/api/content/{table}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentTable {
    Activities,
    News,
    Gallery,
    Crafts,
    Projects,
    Scholarships,
}

impl ContentTable {
    pub const ALL: [ContentTable; 6] = [
        ContentTable::Activities,
        ContentTable::News,
        ContentTable::Gallery,
        ContentTable::Crafts,
        ContentTable::Projects,
        ContentTable::Scholarships,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentTable::Activities => "activities",
            ContentTable::News => "news",
            ContentTable::Gallery => "gallery",
            ContentTable::Crafts => "crafts",
            ContentTable::Projects => "projects",
            ContentTable::Scholarships => "scholarships",
        }
    }
}

impl fmt::Display for ContentTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentTable {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentTable::ALL
            .into_iter()
            .find(|table| table.as_str() == s)
            .ok_or_else(|| ApiError::NotFound(format!("Unknown content type: {s}")))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<u64>,
    /// Case-insensitive substring match against `title_en`
    pub search: Option<String>,
}

impl ListParams {
    fn page_size(&self) -> u64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

/// Escape `%`, `_` and `\` so user input matches literally inside a LIKE pattern
fn like_literal(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// GET /api/content/{table}
pub async fn list_content(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(table): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Value>>> {
    let table: ContentTable = table.parse()?;
    let db = state.database()?;

    let mut query = db
        .from(table.as_str())
        .order("created_at", false)
        .limit(params.page_size());
    if !session::is_admin(&jar, state.auth.jwt()) {
        query = query.eq("published", true);
    }
    if let Some(term) = params.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        query = query.ilike("title_en", &format!("%{}%", like_literal(term)));
    }

    let rows = query.exec::<Value>().await.into_rows()?;
    Ok(Json(rows))
}

/// GET /api/content/{table}/{id}
pub async fn get_content(
    State(state): State<AppState>,
    jar: CookieJar,
    Path((table, id)): Path<(String, Uuid)>,
) -> ApiResult<Json<Value>> {
    let table: ContentTable = table.parse()?;
    let db = state.database()?;

    let mut query = db.from(table.as_str()).eq("id", id);
    if !session::is_admin(&jar, state.auth.jwt()) {
        query = query.eq("published", true);
    }

    query
        .single()
        .exec::<Value>()
        .await
        .into_result()?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No {table} entry with id {id}")))
}

/// POST /api/content/{table}
///
/// Accepts one object or an array of objects with identical keys. Responds
/// with the stored row (or rows, for an array body).
pub async fn create_content(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(table): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let table: ContentTable = table.parse()?;
    let db = state.database()?;

    let many = body.is_array();
    let mut rows = db.from(table.as_str()).insert(&body).exec::<Value>().await.into_rows()?;
    tracing::info!(%table, count = rows.len(), user_id = %user.id, "Created content");

    let body = if many {
        Value::Array(rows)
    } else {
        rows.pop()
            .ok_or_else(|| ApiError::Internal("insert returned no row".to_string()))?
    };
    Ok((StatusCode::CREATED, Json(body)))
}

/// PATCH /api/content/{table}/{id}
pub async fn update_content(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((table, id)): Path<(String, Uuid)>,
    Json(mut patch): Json<Map<String, Value>>,
) -> ApiResult<Json<Value>> {
    let table: ContentTable = table.parse()?;
    let db = state.database()?;

    // The key and creation time are owned by the database
    patch.remove("id");
    patch.remove("created_at");
    if patch.is_empty() {
        return Err(ApiError::BadRequest("Nothing to update".to_string()));
    }

    let row = db
        .from(table.as_str())
        .update(&patch)
        .eq("id", id)
        .single()
        .exec::<Value>()
        .await
        .into_result()?
        .ok_or_else(|| ApiError::NotFound(format!("No {table} entry with id {id}")))?;

    tracing::info!(%table, %id, user_id = %user.id, "Updated content");
    Ok(Json(row))
}

/// DELETE /api/content/{table}/{id}
pub async fn delete_content(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((table, id)): Path<(String, Uuid)>,
) -> ApiResult<StatusCode> {
    let table: ContentTable = table.parse()?;
    let db = state.database()?;

    let deleted = db
        .from(table.as_str())
        .select("id")
        .delete()
        .eq("id", id)
        .exec::<Value>()
        .await
        .into_rows()?;
    if deleted.is_empty() {
        return Err(ApiError::NotFound(format!("No {table} entry with id {id}")));
    }

    tracing::info!(%table, %id, user_id = %user.id, "Deleted content");
    Ok(StatusCode::NO_CONTENT)
}

/// Content routes. Writes go through `require_admin`.
pub fn create_routes(state: &AppState) -> Router<AppState> {
    let admin = middleware::from_fn_with_state(state.clone(), require_admin);

    Router::new()
        .route(
            "/api/content/{table}",
            get(list_content).merge(post(create_content).route_layer(admin.clone())),
        )
        .route(
            "/api/content/{table}/{id}",
            get(get_content).merge(
                patch(update_content)
                    .delete(delete_content)
                    .route_layer(admin),
            ),
        )
}
