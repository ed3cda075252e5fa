//! Admin management of the prompts Dave is built from.
//!
//! Every edit appends a version; rollbacks move the current-version pointer. Both clear the
//! prompt manager's cache entry so the change is live on the next request.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    AppState,
    api::models::prompts::{
        CacheCleared, CategoryInfo, CategoryPrompts, ClearCacheQuery, GetPromptQuery, ListPromptsQuery, PromptCategoryList,
        PromptCreate, PromptList, PromptResponse, PromptRollback, PromptRolledBack, PromptUpdate, PromptUpdated,
    },
    auth::extractors::AdminAuth,
    db::models::prompts::{PromptCreateDBRequest, PromptListFilter, PromptVersionCreateDBRequest, PromptWithVersion},
    errors::{Error, Result},
};

/// Author recorded on versions written through the admin API.
const ADMIN_AUTHOR: &str = "admin";

async fn find_prompt(state: &AppState, raw_id: &str) -> Result<PromptWithVersion> {
    let not_found = || Error::NotFound {
        resource: "Prompt".to_string(),
        id: raw_id.to_string(),
    };
    let id = Uuid::parse_str(raw_id).map_err(|_| not_found())?;
    state.storage.prompts.get_by_id(id).await?.ok_or_else(not_found)
}

#[utoipa::path(
    get,
    path = "/admin/prompts",
    tag = "prompts",
    summary = "List prompts",
    params(ListPromptsQuery),
    responses(
        (status = 200, body = PromptList),
        (status = 401, description = "Admin authentication required"),
        (status = 403, description = "Admin access required")
    ),
    security(("ApiKeyAuth" = []), ("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn list_prompts(
    State(state): State<AppState>,
    _: AdminAuth,
    Query(query): Query<ListPromptsQuery>,
) -> Result<Json<PromptList>> {
    query.validate()?;
    let (prompts, total) = state
        .storage
        .prompts
        .list(&PromptListFilter {
            category: query.category.clone(),
            include_archived: query.include_archived,
            page: query.page,
            limit: query.limit,
        })
        .await?;

    Ok(Json(PromptList {
        items: prompts.into_iter().map(Into::into).collect(),
        total,
        page: query.page,
        limit: query.limit,
        has_more: query.page.saturating_mul(query.limit) < total,
    }))
}

#[utoipa::path(
    post,
    path = "/admin/prompts",
    tag = "prompts",
    summary = "Create a prompt",
    request_body = PromptCreate,
    responses(
        (status = 201, body = PromptResponse),
        (status = 400, description = "Invalid prompt"),
        (status = 409, description = "A prompt with this category and name already exists")
    ),
    security(("ApiKeyAuth" = []), ("BearerAuth" = []))
)]
#[instrument(skip_all, fields(category = %request.category, name = %request.name))]
pub async fn create_prompt(
    State(state): State<AppState>,
    _: AdminAuth,
    Json(request): Json<PromptCreate>,
) -> Result<(StatusCode, Json<PromptResponse>)> {
    request.validate()?;
    let created = state
        .storage
        .prompts
        .create(&PromptCreateDBRequest {
            category: request.category.clone(),
            name: request.name.clone(),
            description: request.description,
            content: request.content,
            variables_schema: request.variables_schema,
            created_by: ADMIN_AUTHOR.to_string(),
        })
        .await?;

    state
        .prompt_manager
        .clear_cache(Some(&request.category), Some(&request.name))
        .await;
    info!(prompt_id = %created.prompt.id, "Prompt created");

    Ok((StatusCode::CREATED, Json(created.into())))
}

#[utoipa::path(
    get,
    path = "/admin/prompts/categories",
    tag = "prompts",
    summary = "Prompt categories with counts",
    responses((status = 200, body = PromptCategoryList)),
    security(("ApiKeyAuth" = []), ("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn list_categories(State(state): State<AppState>, _: AdminAuth) -> Result<Json<PromptCategoryList>> {
    let categories = state.storage.prompts.categories().await?;
    Ok(Json(PromptCategoryList {
        categories: categories.into_iter().map(CategoryInfo::from).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/admin/prompts/{prompt_id}",
    tag = "prompts",
    summary = "Get a prompt",
    params(("prompt_id" = String, Path, description = "Prompt ID"), GetPromptQuery),
    responses(
        (status = 200, body = PromptResponse),
        (status = 404, description = "Prompt not found")
    ),
    security(("ApiKeyAuth" = []), ("BearerAuth" = []))
)]
#[instrument(skip(state, _auth))]
pub async fn get_prompt(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(prompt_id): Path<String>,
    Query(query): Query<GetPromptQuery>,
) -> Result<Json<PromptResponse>> {
    let prompt = find_prompt(&state, &prompt_id).await?;
    let id = prompt.prompt.id;

    let mut response = PromptResponse::from(prompt);
    if query.include_versions {
        let versions = state.storage.prompts.versions(id).await?;
        response.versions = Some(versions.into_iter().map(Into::into).collect());
    }
    Ok(Json(response))
}

/// Save new content as the prompt's next version.
#[utoipa::path(
    put,
    path = "/admin/prompts/{prompt_id}",
    tag = "prompts",
    summary = "Update a prompt",
    params(("prompt_id" = String, Path, description = "Prompt ID")),
    request_body = PromptUpdate,
    responses(
        (status = 200, body = PromptUpdated),
        (status = 400, description = "Invalid update"),
        (status = 404, description = "Prompt not found")
    ),
    security(("ApiKeyAuth" = []), ("BearerAuth" = []))
)]
#[instrument(skip(state, _auth, update))]
pub async fn update_prompt(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(prompt_id): Path<String>,
    Json(update): Json<PromptUpdate>,
) -> Result<Json<PromptUpdated>> {
    update.validate()?;
    let prompt = find_prompt(&state, &prompt_id).await?.prompt;

    let version = state
        .storage
        .prompts
        .create_version(&PromptVersionCreateDBRequest {
            prompt_id: prompt.id,
            content: update.content,
            commit_message: Some(update.commit_message),
            variables_schema: update.variables_schema,
            created_by: ADMIN_AUTHOR.to_string(),
        })
        .await?;

    state
        .prompt_manager
        .clear_cache(Some(&prompt.category), Some(&prompt.name))
        .await;
    info!(
        prompt = %format!("{}/{}", prompt.category, prompt.name),
        version = version.version_number,
        "Prompt updated"
    );

    Ok(Json(PromptUpdated {
        status: "updated".to_string(),
        prompt_id: prompt.id,
        version: version.into(),
    }))
}

/// Make an earlier version current again.
#[utoipa::path(
    post,
    path = "/admin/prompts/{prompt_id}/rollback",
    tag = "prompts",
    summary = "Roll back a prompt",
    params(("prompt_id" = String, Path, description = "Prompt ID")),
    request_body = PromptRollback,
    responses(
        (status = 200, body = PromptRolledBack),
        (status = 400, description = "Version does not belong to the prompt"),
        (status = 404, description = "Prompt not found")
    ),
    security(("ApiKeyAuth" = []), ("BearerAuth" = []))
)]
#[instrument(skip(state, _auth))]
pub async fn rollback_prompt(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(prompt_id): Path<String>,
    Json(rollback): Json<PromptRollback>,
) -> Result<Json<PromptRolledBack>> {
    let prompt = find_prompt(&state, &prompt_id).await?.prompt;

    if !state.storage.prompts.rollback(prompt.id, rollback.version_id).await? {
        return Err(Error::BadRequest {
            message: format!("Version {} not found for prompt {}", rollback.version_id, prompt.id),
        });
    }

    state
        .prompt_manager
        .clear_cache(Some(&prompt.category), Some(&prompt.name))
        .await;
    info!(prompt_id = %prompt.id, version_id = %rollback.version_id, "Prompt rolled back");

    Ok(Json(PromptRolledBack {
        status: "rolled_back".to_string(),
        prompt_id: prompt.id,
        version_id: rollback.version_id,
    }))
}

#[utoipa::path(
    get,
    path = "/admin/prompts/category/{category}",
    tag = "prompts",
    summary = "Prompts in a category",
    params(("category" = String, Path, description = "Prompt category")),
    responses((status = 200, body = CategoryPrompts)),
    security(("ApiKeyAuth" = []), ("BearerAuth" = []))
)]
#[instrument(skip(state, _auth))]
pub async fn prompts_in_category(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(category): Path<String>,
) -> Result<Json<CategoryPrompts>> {
    let prompts = state.storage.prompts.list_by_category(&category).await?;
    Ok(Json(CategoryPrompts {
        category,
        total: prompts.len(),
        prompts: prompts.into_iter().map(Into::into).collect(),
    }))
}

/// Clear one cached prompt, a category, or everything.
#[utoipa::path(
    post,
    path = "/admin/prompts/cache/clear",
    tag = "prompts",
    summary = "Clear the prompt cache",
    params(ClearCacheQuery),
    responses((status = 200, body = CacheCleared)),
    security(("ApiKeyAuth" = []), ("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn clear_cache(
    State(state): State<AppState>,
    _: AdminAuth,
    Query(query): Query<ClearCacheQuery>,
) -> Json<CacheCleared> {
    state
        .prompt_manager
        .clear_cache(query.category.as_deref(), query.name.as_deref())
        .await;
    Json(CacheCleared {
        status: "cleared".to_string(),
        category: query.category,
        name: query.name,
    })
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::json;

    use crate::{api::models::prompts::PromptResponse, test_utils::*};

    async fn create(app: &TestServer, name: &str, content: &str) -> PromptResponse {
        let response = app
            .post("/api/v1/admin/prompts")
            .add_header("x-api-key", TEST_ADMIN_KEY)
            .json(&json!({ "category": "dave_system", "name": name, "content": content }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json()
    }

    #[tokio::test]
    async fn test_admin_key_required() {
        let app = create_test_app(ScriptedModel::default());
        app.get("/api/v1/admin/prompts").await.assert_status(StatusCode::UNAUTHORIZED);
        app.get("/api/v1/admin/prompts")
            .add_header("x-api-key", TEST_API_KEY)
            .await
            .assert_status(StatusCode::FORBIDDEN);
        app.get("/api/v1/admin/prompts")
            .add_header("authorization", format!("Bearer {TEST_ADMIN_KEY}"))
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn test_list_page_bounds() {
        let app = create_test_app(ScriptedModel::default());
        create(&app, "base_personality", "You are Dave.").await;

        app.get("/api/v1/admin/prompts")
            .add_query_param("page", i64::MAX)
            .add_header("x-api-key", TEST_ADMIN_KEY)
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let response = app
            .get("/api/v1/admin/prompts")
            .add_query_param("page", 10_000)
            .add_query_param("limit", 100)
            .add_header("x-api-key", TEST_ADMIN_KEY)
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"], json!([]));
        assert_eq!(body["has_more"], false);
    }

    #[tokio::test]
    async fn test_create_list_and_duplicate() {
        let app = create_test_app(ScriptedModel::default());
        let created = create(&app, "base_personality", "You are Dave.").await;
        assert_eq!(created.current_version.as_ref().unwrap().version_number, 1);
        create(&app, "employer_mode", "Help employers.").await;

        let body: serde_json::Value = app
            .get("/api/v1/admin/prompts")
            .add_query_param("limit", 1)
            .add_header("x-api-key", TEST_ADMIN_KEY)
            .await
            .json();
        assert_eq!(body["total"], 2);
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
        assert_eq!(body["has_more"], true);

        let body: serde_json::Value = app
            .get("/api/v1/admin/prompts/categories")
            .add_header("x-api-key", TEST_ADMIN_KEY)
            .await
            .json();
        assert_eq!(body["categories"], json!([{ "category": "dave_system", "prompt_count": 2, "description": null }]));

        app.post("/api/v1/admin/prompts")
            .add_header("x-api-key", TEST_ADMIN_KEY)
            .json(&json!({ "category": "dave_system", "name": "employer_mode", "content": "again" }))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_update_rollback_and_cache() {
        let app = create_test_app(ScriptedModel::default());
        let prompt = create(&app, "welcome_message", "Hi {{ user_type }}!").await;
        let first_version = prompt.current_version.unwrap().id;
        let path = format!("/api/v1/admin/prompts/{}", prompt.id);

        // Warm the cache through the prompt report
        let report: serde_json::Value = app
            .get("/health/debug/prompts")
            .add_header("x-api-key", TEST_ADMIN_KEY)
            .await
            .json();
        assert_eq!(report["dave_system/welcome_message"]["status"], "found");

        app.put(&path)
            .add_header("x-api-key", TEST_ADMIN_KEY)
            .json(&json!({ "content": "Welcome!", "commit_message": "" }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let updated: serde_json::Value = app
            .put(&path)
            .add_header("x-api-key", TEST_ADMIN_KEY)
            .json(&json!({ "content": "Welcome back!", "commit_message": "Shorter greeting" }))
            .await
            .json();
        assert_eq!(updated["status"], "updated");
        assert_eq!(updated["version"]["version_number"], 2);
        assert_eq!(updated["version"]["created_by"], "admin");

        let detail: PromptResponse = app
            .get(&path)
            .add_query_param("include_versions", true)
            .add_header("x-api-key", TEST_ADMIN_KEY)
            .await
            .json();
        assert_eq!(detail.current_version.unwrap().content, "Welcome back!");
        assert_eq!(detail.versions.unwrap().len(), 2);

        let rolled: serde_json::Value = app
            .post(&format!("{path}/rollback"))
            .add_header("x-api-key", TEST_ADMIN_KEY)
            .json(&json!({ "version_id": first_version }))
            .await
            .json();
        assert_eq!(rolled["status"], "rolled_back");

        let stranger = uuid::Uuid::new_v4();
        let response = app
            .post(&format!("{path}/rollback"))
            .add_header("x-api-key", TEST_ADMIN_KEY)
            .json(&json!({ "version_id": stranger }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json();
        assert_eq!(body["detail"], format!("Version {stranger} not found for prompt {}", prompt.id));

        let body: serde_json::Value = app
            .get("/api/v1/admin/prompts/category/dave_system")
            .add_header("x-api-key", TEST_ADMIN_KEY)
            .await
            .json();
        assert_eq!(body["total"], 1);
        assert_eq!(body["prompts"][0]["current_version"]["content"], "Hi {{ user_type }}!");

        let cleared: serde_json::Value = app
            .post("/api/v1/admin/prompts/cache/clear")
            .add_query_param("category", "dave_system")
            .add_header("x-api-key", TEST_ADMIN_KEY)
            .await
            .json();
        assert_eq!(cleared, json!({ "status": "cleared", "category": "dave_system", "name": null }));
    }

    #[tokio::test]
    async fn test_unknown_prompt() {
        let app = create_test_app(ScriptedModel::default());
        for path in ["/api/v1/admin/prompts/not-a-uuid".to_string(), format!("/api/v1/admin/prompts/{}", uuid::Uuid::new_v4())] {
            let response = app.get(&path).add_header("x-api-key", TEST_ADMIN_KEY).await;
            response.assert_status(StatusCode::NOT_FOUND);
            let body: serde_json::Value = response.json();
            assert_eq!(body["detail"], "Prompt not found");
        }
    }
}
