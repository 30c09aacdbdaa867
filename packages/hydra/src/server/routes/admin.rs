//! Admin endpoints: domain lifecycle and token rotation.
//!
//! Token rotation updates the durable record and both coordination-store
//! keys (the hash→domain cache and the per-domain current hash) so dispatch
//! sees the rotation within the cache TTL.

use axum::extract::{Extension, Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::common::hash_token;
use crate::models::Domain;
use crate::server::app::AppState;
use crate::server::auth::AuthContext;
use crate::server::error::ApiError;

fn require_admin(ctx: &AuthContext) -> Result<(), ApiError> {
    if !ctx.is_admin {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

fn generate_token() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

/// GET /admin/domains
pub async fn list_domains(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&ctx)?;
    let domains: Vec<Value> = Domain::list(&state.db)
        .await?
        .into_iter()
        .map(|doc| {
            json!({
                "domain": doc.domain,
                "display_name": doc.display_name,
                "description": doc.description,
            })
        })
        .collect();
    Ok(Json(json!({"domains": domains})))
}

#[derive(Deserialize)]
pub struct CreateDomainPayload {
    pub domain: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub token: Option<String>,
}

/// POST /admin/domains — create a domain; returns its initial token.
pub async fn create_domain(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<CreateDomainPayload>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&ctx)?;

    let domain = payload.domain.trim().to_string();
    if domain.is_empty() {
        return Err(ApiError::BadRequest("domain required".to_string()));
    }
    let display_name = payload.display_name.unwrap_or_else(|| domain.clone());
    let description = payload.description.unwrap_or_default();
    let token = payload.token.unwrap_or_else(generate_token);
    let token_hash = hash_token(&token);

    Domain::upsert(&domain, &display_name, &description, &token_hash, &state.db).await?;
    state.coord.add_domain(&domain).await?;
    state.coord.cache_token_domain(&token_hash, &domain).await?;
    state
        .coord
        .set_domain_token_hash(&domain, &token_hash)
        .await?;

    Ok(Json(json!({"ok": true, "domain": domain, "token": token})))
}

#[derive(Deserialize)]
pub struct UpdateDomainPayload {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub token: Option<String>,
}

/// PUT /admin/domains/:domain — update metadata, optionally rotating the
/// token to a caller-provided value.
pub async fn update_domain(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(domain): Path<String>,
    Json(payload): Json<UpdateDomainPayload>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&ctx)?;

    let existing = Domain::find(&domain, &state.db)
        .await?
        .ok_or(ApiError::NotFound("domain"))?;
    let display_name = payload
        .display_name
        .unwrap_or_else(|| existing.display_name.clone());
    let description = payload
        .description
        .unwrap_or_else(|| existing.description.clone());

    match &payload.token {
        Some(token) => {
            let token_hash = hash_token(token);
            state
                .coord
                .invalidate_token_cache(&existing.token_hash)
                .await?;
            Domain::upsert(&domain, &display_name, &description, &token_hash, &state.db).await?;
            state.coord.cache_token_domain(&token_hash, &domain).await?;
            state
                .coord
                .set_domain_token_hash(&domain, &token_hash)
                .await?;
        }
        None => {
            Domain::update_metadata(&domain, &display_name, &description, &state.db).await?;
        }
    }

    Ok(Json(json!({"ok": true, "domain": domain, "token": payload.token})))
}

/// POST /admin/domains/:domain/token — rotate to a fresh token.
pub async fn rotate_token(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(domain): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&ctx)?;

    let existing = Domain::find(&domain, &state.db)
        .await?
        .ok_or(ApiError::NotFound("domain"))?;
    let token = generate_token();
    let token_hash = hash_token(&token);

    Domain::rotate_token(&domain, &token_hash, &state.db)
        .await?
        .ok_or(ApiError::NotFound("domain"))?;
    state
        .coord
        .invalidate_token_cache(&existing.token_hash)
        .await?;
    state.coord.cache_token_domain(&token_hash, &domain).await?;
    state
        .coord
        .set_domain_token_hash(&domain, &token_hash)
        .await?;

    Ok(Json(json!({"ok": true, "domain": domain, "token": token})))
}

/// DELETE /admin/domains/:domain
pub async fn delete_domain(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(domain): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&ctx)?;

    if let Some(existing) = Domain::find(&domain, &state.db).await? {
        state
            .coord
            .invalidate_token_cache(&existing.token_hash)
            .await?;
    }
    Domain::delete(&domain, &state.db).await?;
    state.coord.remove_domain(&domain).await?;
    state.coord.clear_domain_token_hash(&domain).await?;

    Ok(Json(json!({"ok": true})))
}
