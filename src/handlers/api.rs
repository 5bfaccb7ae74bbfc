//! JSON API under `/api/1`.

use super::session::ApiUser;
use super::{blocking, AppState};
use crate::error::{AppError, AppResult};
use crate::models::api::{AttackForm, AttackResponse, ClassifyForm, ConfusionForm, LabelForm};
use crate::models::auth::{CreateUserParams, UpdateUserParams, User};
use crate::models::report::{ConfusionMatrix, CreateReportRequest};
use crate::services::classifiers::Prediction;
use crate::services::orchestrator::RunOptions;
use crate::services::registry::{parse_id, Descriptor};
use crate::services::reports::confusion_matrix;
use crate::services::users::UserChanges;
use crate::utils::imaging::decode_base64_image;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Form, Json, Router,
};
use serde_json::{json, Value};
use tracing::warn;

/// Number of predictions returned by the classify endpoint.
const TOP_N: usize = 5;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/datasets/all", get(all_datasets))
        .route("/datasets/labels/:dataset_id", get(dataset_labels).put(dataset_label))
        .route("/datasets/:dataset_id", get(get_dataset).put(get_dataset))
        .route("/classifiers/all", get(all_classifiers))
        .route("/classifiers/classify", put(classify))
        .route("/classifiers/:classifier_id", get(get_classifier))
        .route("/attacks/all", get(all_attacks))
        .route("/attacks/run", put(run_attack))
        .route("/attacks/:attack_id", get(get_attack))
        .route("/reports/confusion_matrix", put(confusion))
        .route("/reports/all", get(all_reports))
        .route("/reports/", post(create_report))
        .route("/reports/:report_id", get(get_report).delete(delete_report))
        .route("/users/", get(all_users).post(create_user))
        .route("/users/:user_id", get(get_user).put(update_user).delete(delete_user))
}

/// Accounts can only be changed by their own session.
fn same_user(me: &User, user_id: i64) -> AppResult<()> {
    if me.id != user_id {
        warn!(user = me.id, target = user_id, "Change to a foreign account refused");
        return Err(AppError::Forbidden);
    }
    Ok(())
}

// Datasets

async fn all_datasets(State(state): State<AppState>) -> Json<Vec<Descriptor>> {
    Json(state.datasets.all())
}

async fn get_dataset(State(state): State<AppState>, Path(dataset_id): Path<String>) -> AppResult<Json<Descriptor>> {
    Ok(Json(state.datasets.get(&dataset_id)?.descriptor.clone()))
}

async fn dataset_labels(State(state): State<AppState>, Path(dataset_id): Path<String>) -> AppResult<Json<Vec<String>>> {
    Ok(Json(state.datasets.get(&dataset_id)?.labels.all().to_vec()))
}

async fn dataset_label(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
    Form(form): Form<LabelForm>,
) -> AppResult<Json<String>> {
    let dataset = state.datasets.get(&dataset_id)?;
    Ok(Json(dataset.labels.get(&form.class_id)?.to_string()))
}

// Classifiers

async fn all_classifiers(State(state): State<AppState>) -> Json<Vec<Descriptor>> {
    Json(state.orchestrator.classifiers().all())
}

async fn get_classifier(
    State(state): State<AppState>,
    Path(classifier_id): Path<String>,
) -> AppResult<Json<Descriptor>> {
    Ok(Json(state.orchestrator.classifiers().get(&classifier_id)?.descriptor.clone()))
}

async fn classify(State(state): State<AppState>, Form(form): Form<ClassifyForm>) -> AppResult<Json<Vec<Prediction>>> {
    state.orchestrator.classifiers().get(&form.classifier_id)?;

    let orchestrator = state.orchestrator.clone();
    let predictions = blocking(move || {
        let image = decode_base64_image(&form.image_data)?;
        orchestrator.classify(&image, &form.classifier_id, TOP_N)
    })
    .await?;
    Ok(Json(predictions))
}

// Attacks

async fn all_attacks(State(state): State<AppState>) -> Json<Vec<Descriptor>> {
    Json(state.orchestrator.attacks().all())
}

async fn get_attack(State(state): State<AppState>, Path(attack_id): Path<String>) -> AppResult<Json<Descriptor>> {
    Ok(Json(state.orchestrator.attacks().get(&attack_id)?.descriptor.clone()))
}

async fn run_attack(State(state): State<AppState>, Form(form): Form<AttackForm>) -> AppResult<Json<AttackResponse>> {
    state.orchestrator.classifiers().get(&form.classifier_id)?;
    state.orchestrator.attacks().get(&form.attack_id)?;
    let options = RunOptions {
        robust: form.robust(),
        scale: form.scale()?,
        ..Default::default()
    };

    let orchestrator = state.orchestrator.clone();
    let run = blocking(move || {
        let image = decode_base64_image(&form.image_data)?;
        orchestrator.run_attack(&image, &form.classifier_id, &form.attack_id, &options)
    })
    .await?;
    Ok(Json(AttackResponse::from(&run)))
}

// Reports

async fn confusion(Form(form): Form<ConfusionForm>) -> AppResult<Json<ConfusionMatrix>> {
    Ok(Json(confusion_matrix(&form.before(), &form.after())?))
}

async fn all_reports(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let reports = state.reports.dao().get_all().await?;
    Ok(Json(json!({ "reports": reports })))
}

async fn create_report(
    State(state): State<AppState>,
    Json(req): Json<CreateReportRequest>,
) -> AppResult<impl IntoResponse> {
    let report = state
        .reports
        .create_report(req.classifier_id, &req.pretrained_classifier, req.data)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "report": report }))))
}

async fn get_report(State(state): State<AppState>, Path(report_id): Path<String>) -> AppResult<Json<Value>> {
    let report = state.reports.get_report(parse_id(&report_id, "report")?).await?;
    Ok(Json(json!({ "report": report })))
}

async fn delete_report(
    State(state): State<AppState>,
    ApiUser(me): ApiUser,
    Path(report_id): Path<String>,
) -> AppResult<StatusCode> {
    let report = state.reports.get_report(parse_id(&report_id, "report")?).await?;
    let owner = state.db.classifiers().get(report.classifier_id).await?;
    if owner.map(|c| c.user_id) != Some(me.id) {
        warn!(user = me.id, report = report.id, "Delete of a foreign report refused");
        return Err(AppError::Forbidden);
    }

    let files = state.storage.report_files(&report);
    state.reports.delete_report(report.id).await?;
    state.storage.remove_all(files).await;
    Ok(StatusCode::NO_CONTENT)
}

// Users

async fn all_users(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let users = state.users.dao().get_all().await?;
    Ok(Json(json!({ "users": users })))
}

async fn create_user(
    State(state): State<AppState>,
    Query(params): Query<CreateUserParams>,
) -> AppResult<impl IntoResponse> {
    let (Some(username), Some(email), Some(password)) = (params.username, params.email, params.password) else {
        return Err(AppError::BadRequest("Bad Request. Check parameters.".to_string()));
    };

    let user = state.users.create_user(&username, &email, &password).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "The user was created successfully.", "user": user })),
    ))
}

async fn get_user(State(state): State<AppState>, Path(user_id): Path<String>) -> AppResult<Json<Value>> {
    let user = state.users.get_user(parse_id(&user_id, "user")?).await?;
    Ok(Json(json!({ "user": user })))
}

async fn update_user(
    State(state): State<AppState>,
    ApiUser(me): ApiUser,
    Path(user_id): Path<String>,
    Query(params): Query<UpdateUserParams>,
) -> AppResult<Json<Value>> {
    let user_id = parse_id(&user_id, "user")?;
    same_user(&me, user_id)?;
    let changes = UserChanges {
        username: params.username,
        email: params.email,
        image_file: None,
        ..Default::default()
    };
    let user = state.users.update_user(user_id, changes).await?;
    Ok(Json(json!({ "user": user })))
}

async fn delete_user(
    State(state): State<AppState>,
    ApiUser(me): ApiUser,
    Path(user_id): Path<String>,
) -> AppResult<StatusCode> {
    same_user(&me, parse_id(&user_id, "user")?)?;

    let files = state.storage.user_files(&me).await?;
    state.users.delete_user(me.id).await?;
    state.auth.revoke_user(me.id).await;
    state.storage.remove_all(files).await;
    Ok(StatusCode::NO_CONTENT)
}
