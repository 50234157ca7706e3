//! Product management

use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use serde_json::json;
use uuid::Uuid;

use super::{AuditContext, IdPath, Params, Payload, ensure_tenant, found};
use crate::{
    error::{ApiError, ApiResult},
    identity::Identity,
    models::{NewProduct, Page, PageWindow, Product, ProductQuery},
    state::AppState,
    validation::{check, validate_name},
};

const COMPONENT: &str = "products";

fn validate(product: &NewProduct) -> ApiResult<()> {
    check(validate_name("Product name", &product.name))?;
    check(validate_name("Product code", &product.code))?;
    check(validate_name("Category", &product.category))?;
    check(validate_name("Unit", &product.unit))
}

/// The caller must be allowed to change the project's organization
async fn ensure_project_access(
    state: &AppState,
    identity: &Identity,
    project_id: Uuid,
) -> ApiResult<()> {
    let project = state
        .project_repository
        .find_by_id(project_id)
        .await?
        .ok_or_else(|| ApiError::Validation("Project does not exist".to_string()))?;
    ensure_tenant(identity, project.organization_id)
}

async fn ensure_code_free(state: &AppState, code: &str, except: Option<Uuid>) -> ApiResult<()> {
    if state.product_repository.code_taken(code, except).await? {
        return Err(ApiError::Conflict("Product code already exists".to_string()));
    }
    Ok(())
}

pub async fn list(
    State(state): State<AppState>,
    WithRejection(query, _): Params<ProductQuery>,
) -> ApiResult<Json<Page<Product>>> {
    let window = PageWindow::new(query.page, query.page_size);
    let (products, total) = state.product_repository.list(&query, window).await?;
    Ok(Json(Page::new(window, total, products)))
}

pub async fn get(
    State(state): State<AppState>,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<Product>> {
    let product = found(state.product_repository.find_by_id(*id).await?, "Product")?;
    Ok(Json(product))
}

async fn create_product(
    state: &AppState,
    identity: &Identity,
    payload: &NewProduct,
) -> ApiResult<Product> {
    validate(payload)?;
    ensure_project_access(state, identity, payload.project_id).await?;
    ensure_code_free(state, &payload.code, None).await?;
    Ok(state.product_repository.create(payload).await?)
}

pub async fn create(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(Json(payload), _): Payload<NewProduct>,
) -> ApiResult<impl IntoResponse> {
    let result = create_product(&state, &identity, &payload).await;

    AuditContext {
        component: COMPONENT,
        action: "create_product",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::CREATED, |product| {
        format!("Created product {} ({})", product.name, product.code)
    })
    .await;

    result.map(|product| (StatusCode::CREATED, Json(product)))
}

async fn update_product(
    state: &AppState,
    identity: &Identity,
    id: Uuid,
    payload: &NewProduct,
) -> ApiResult<Product> {
    validate(payload)?;
    let current = found(state.product_repository.find_by_id(id).await?, "Product")?;
    ensure_project_access(state, identity, current.project_id).await?;
    if payload.project_id != current.project_id {
        ensure_project_access(state, identity, payload.project_id).await?;
    }
    ensure_code_free(state, &payload.code, Some(id)).await?;
    Ok(state.product_repository.update(id, payload).await?)
}

pub async fn update(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
    WithRejection(Json(payload), _): Payload<NewProduct>,
) -> ApiResult<Json<Product>> {
    let result = update_product(&state, &identity, *id, &payload).await;

    AuditContext {
        component: COMPONENT,
        action: "update_product",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |product| {
        format!("Updated product {} ({})", product.name, product.code)
    })
    .await;

    result.map(Json)
}

async fn delete_product(state: &AppState, identity: &Identity, id: Uuid) -> ApiResult<()> {
    let product = found(state.product_repository.find_by_id(id).await?, "Product")?;
    ensure_project_access(state, identity, product.project_id).await?;
    Ok(state.product_repository.soft_delete(id).await?)
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<serde_json::Value>> {
    let result = delete_product(&state, &identity, *id).await;

    AuditContext {
        component: COMPONENT,
        action: "delete_product",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |_| {
        format!("Deleted product {}", *id)
    })
    .await;

    result.map(|_| Json(json!({ "message": "Product deleted" })))
}

pub async fn purge(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<serde_json::Value>> {
    let result = state
        .product_repository
        .purge(*id)
        .await
        .map_err(ApiError::from);

    AuditContext {
        component: COMPONENT,
        action: "purge_product",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |_| {
        format!("Purged product {}", *id)
    })
    .await;

    result.map(|_| Json(json!({ "message": "Product purged" })))
}
