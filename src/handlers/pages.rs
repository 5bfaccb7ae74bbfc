//! Server-rendered pages.

use super::forms::{FormErrors, MultipartForm, Upload};
use super::session::{end_session, flash, safe_next, start_session, take_flashes, CurrentUser, Flash, MaybeUser};
use super::{blocking, render, AppState};
use crate::db::Page;
use crate::error::AppError;
use crate::models::api::AttackResponse;
use crate::models::auth::{LoginRequest, RegisterRequest, UpdateAccountRequest, User};
use crate::models::classifier::{allowed_extension, Classifier, UploadClassifierForm, MODEL_EXTENSIONS};
use crate::models::report::{Report, ReportData};
use crate::services::classifiers::Prediction;
use crate::services::orchestrator::RunOptions;
use crate::services::registry::Descriptor;
use crate::services::reports::build_report;
use crate::services::users::UserChanges;
use crate::utils::imaging::{save_image, save_model, ImageExt};
use askama::Template;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::header,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use tower_cookies::Cookies;
use tracing::{info, warn};
use validator::Validate;

const REPORTS_PER_PAGE: u32 = 5;
const CLASSIFIERS_PER_PAGE: u32 = 5;
const PROFILE_PICTURE_SIZE: (u32, u32) = (125, 125);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/home", get(home))
        .route("/about", get(about))
        .route("/register", get(register_page).post(register_handler))
        .route("/login", get(login_page).post(login_handler))
        .route("/logout", get(logout_handler))
        .route("/account", get(account_page).post(account_handler))
        .route("/classifiers/classify", get(classify_page).post(classify_handler))
        .route("/classifiers/upload", get(upload_page).post(upload_handler))
        .route("/classifiers/:classifier_id", get(classifier_page))
        .route("/classifiers/delete/:classifier_id", post(delete_classifier))
        .route("/classifiers/download/:classifier_id", get(download_classifier))
        .route("/attacks/visualize", get(visualize_page).post(visualize_handler))
        .route("/reports/new", get(new_report_page).post(new_report_handler))
        .route("/reports/all", get(all_reports))
        .route("/reports/:report_id", get(report_page))
}

// Templates

#[derive(Template)]
#[template(path = "home.html")]
struct HomeTemplate {
    title: &'static str,
    user: Option<User>,
    flashes: Vec<Flash>,
    datasets: Vec<Descriptor>,
    classifiers: Vec<Descriptor>,
    attacks: Vec<Descriptor>,
}

#[derive(Template)]
#[template(path = "about.html")]
struct AboutTemplate {
    title: &'static str,
    user: Option<User>,
    flashes: Vec<Flash>,
}

#[derive(Template)]
#[template(path = "register.html")]
struct RegisterTemplate {
    title: &'static str,
    user: Option<User>,
    flashes: Vec<Flash>,
    errors: Vec<String>,
    username: String,
    email: String,
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    title: &'static str,
    user: Option<User>,
    flashes: Vec<Flash>,
    errors: Vec<String>,
    email: String,
    next: String,
}

#[derive(Template)]
#[template(path = "account.html")]
struct AccountTemplate {
    title: &'static str,
    user: Option<User>,
    flashes: Vec<Flash>,
    errors: Vec<String>,
    account: User,
    classifiers: Page<Classifier>,
}

#[derive(Template)]
#[template(path = "predict.html")]
struct PredictTemplate {
    title: &'static str,
    user: Option<User>,
    flashes: Vec<Flash>,
    errors: Vec<String>,
    classifiers: Vec<Descriptor>,
    selected: String,
    image_file: Option<String>,
    predictions: Vec<Prediction>,
}

#[derive(Template)]
#[template(path = "upload_model.html")]
struct UploadTemplate {
    title: &'static str,
    user: Option<User>,
    flashes: Vec<Flash>,
    errors: Vec<String>,
    name: String,
    extensions: String,
}

#[derive(Template)]
#[template(path = "model.html")]
struct ModelTemplate {
    title: String,
    user: Option<User>,
    flashes: Vec<Flash>,
    model: Classifier,
    reports: Vec<Report>,
}

#[derive(Template)]
#[template(path = "visualize_attack.html")]
struct VisualizeTemplate {
    title: &'static str,
    user: Option<User>,
    flashes: Vec<Flash>,
    errors: Vec<String>,
    classifiers: Vec<Descriptor>,
    attacks: Vec<Descriptor>,
    result: Option<AttackView>,
}

struct AttackView {
    classifier: String,
    attack: String,
    images: AttackResponse,
    mime: &'static str,
    original_label: String,
    result_label: String,
    success: bool,
}

#[derive(Template)]
#[template(path = "new_report.html")]
struct NewReportTemplate {
    title: &'static str,
    user: Option<User>,
    flashes: Vec<Flash>,
    errors: Vec<String>,
    classifiers: Vec<Descriptor>,
    attacks: Vec<Descriptor>,
    owned: Vec<Classifier>,
}

#[derive(Template)]
#[template(path = "reports.html")]
struct ReportsTemplate {
    title: &'static str,
    user: Option<User>,
    flashes: Vec<Flash>,
    reports: Page<Report>,
}

#[derive(Template)]
#[template(path = "visualize_report.html")]
struct ReportTemplate {
    title: &'static str,
    user: Option<User>,
    flashes: Vec<Flash>,
    report: Report,
    model: Classifier,
    data: ReportData,
    reports_url: String,
    rows: Vec<ReportRow>,
    matrix: Vec<(String, Vec<usize>)>,
}

/// One attacked image of a report.
struct ReportRow {
    original: String,
    result: String,
    difference: String,
    before: String,
    after: String,
}

impl ReportRow {
    fn changed(&self) -> bool {
        self.before != self.after
    }
}

fn report_rows(data: &ReportData) -> Vec<ReportRow> {
    data.images
        .iter()
        .zip(data.y_before.iter().zip(&data.y_after))
        .map(|(images, (before, after))| ReportRow {
            original: images.original.clone(),
            result: images.result.clone(),
            difference: images.difference.clone(),
            before: before.clone(),
            after: after.clone(),
        })
        .collect()
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate {
    title: &'static str,
    user: Option<User>,
    flashes: Vec<Flash>,
    status: u16,
    message: String,
}

/// Errors on HTML pages render as a page, not as JSON.
pub struct PageError(AppError);

impl<E: Into<AppError>> From<E> for PageError {
    fn from(e: E) -> Self {
        PageError(e.into())
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let status = self.0.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "page failed");
        }
        let template = ErrorTemplate {
            title: "Error",
            user: None,
            flashes: Vec::new(),
            status: status.as_u16(),
            message: self.0.public_message(),
        };
        (status, render(template)).into_response()
    }
}

type PageResult = Result<Response, PageError>;

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct NextQuery {
    next: Option<String>,
}

fn owned_by(model: &Classifier, user: &User) -> Result<(), PageError> {
    if model.user_id != user.id {
        warn!(user = user.id, classifier = model.id, "Access to a foreign classifier");
        return Err(AppError::Forbidden.into());
    }
    Ok(())
}

async fn find_classifier(state: &AppState, classifier_id: i64) -> Result<Classifier, PageError> {
    state
        .db
        .classifiers()
        .get(classifier_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("classifier {classifier_id} does not exist")).into())
}

// General

async fn home(State(state): State<AppState>, MaybeUser(user): MaybeUser, cookies: Cookies) -> Response {
    render(HomeTemplate {
        title: "Home",
        user,
        flashes: take_flashes(&cookies),
        datasets: state.datasets.all(),
        classifiers: state.orchestrator.classifiers().all(),
        attacks: state.orchestrator.attacks().all(),
    })
}

async fn about(MaybeUser(user): MaybeUser, cookies: Cookies) -> Response {
    render(AboutTemplate {
        title: "About",
        user,
        flashes: take_flashes(&cookies),
    })
}

// Accounts

async fn register_page(MaybeUser(user): MaybeUser, cookies: Cookies) -> Response {
    if user.is_some() {
        return Redirect::to("/home").into_response();
    }
    render(RegisterTemplate {
        title: "Register",
        user,
        flashes: take_flashes(&cookies),
        errors: Vec::new(),
        username: String::new(),
        email: String::new(),
    })
}

async fn register_handler(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    cookies: Cookies,
    Form(req): Form<RegisterRequest>,
) -> PageResult {
    if user.is_some() {
        return Ok(Redirect::to("/home").into_response());
    }

    let mut errors = FormErrors::default();
    if let Err(e) = req.validate() {
        errors.extend_validation(&e);
    }
    if state.db.users().get_by_username(req.username.trim()).await?.is_some() {
        errors.push("Username already exists!");
    }
    if state.db.users().get_by_email(req.email.trim()).await?.is_some() {
        errors.push("Account with email already exists!");
    }

    if errors.is_empty() {
        match state.users.create_user(&req.username, &req.email, &req.password).await {
            Ok(_) => {
                flash(&cookies, "success", "Your account has been created! You are now able to log in");
                return Ok(Redirect::to("/login").into_response());
            }
            Err(AppError::Conflict(message) | AppError::Unprocessable(message)) => errors.push(message),
            Err(e) => return Err(e.into()),
        }
    }

    Ok(render(RegisterTemplate {
        title: "Register",
        user: None,
        flashes: take_flashes(&cookies),
        errors: errors.into_vec(),
        username: req.username,
        email: req.email,
    }))
}

async fn login_page(MaybeUser(user): MaybeUser, cookies: Cookies, Query(query): Query<NextQuery>) -> Response {
    if user.is_some() {
        return Redirect::to("/home").into_response();
    }
    render(LoginTemplate {
        title: "Login",
        user,
        flashes: take_flashes(&cookies),
        errors: Vec::new(),
        email: String::new(),
        next: query.next.unwrap_or_default(),
    })
}

async fn login_handler(State(state): State<AppState>, cookies: Cookies, Form(req): Form<LoginRequest>) -> PageResult {
    let mut errors = FormErrors::default();
    if let Err(e) = req.validate() {
        errors.extend_validation(&e);
    } else {
        let response = state.auth.login(&req).await?;
        if let Some(token) = response.token {
            start_session(&cookies, token, response.expires_in, state.config.security.secure_cookies);
            let target = safe_next(req.next.as_deref()).unwrap_or("/home");
            return Ok(Redirect::to(target).into_response());
        }
        flash(&cookies, "danger", response.message);
    }

    Ok(render(LoginTemplate {
        title: "Login",
        user: None,
        flashes: take_flashes(&cookies),
        errors: errors.into_vec(),
        email: req.email,
        next: req.next.unwrap_or_default(),
    }))
}

async fn logout_handler(State(state): State<AppState>, cookies: Cookies) -> impl IntoResponse {
    if let Some(token) = end_session(&cookies) {
        state.auth.logout(&token).await;
    }
    Redirect::to("/home")
}

async fn account_view(state: &AppState, user: User, cookies: &Cookies, errors: Vec<String>, page: u32) -> PageResult {
    let classifiers = state
        .db
        .classifiers()
        .list_by_user(user.id, page, CLASSIFIERS_PER_PAGE)
        .await?;
    Ok(render(AccountTemplate {
        title: "Account",
        user: Some(user.clone()),
        flashes: take_flashes(cookies),
        errors,
        account: user,
        classifiers,
    }))
}

async fn account_page(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    cookies: Cookies,
    Query(query): Query<PageQuery>,
) -> PageResult {
    account_view(&state, user, &cookies, Vec::new(), query.page.unwrap_or(1)).await
}

async fn account_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    cookies: Cookies,
    multipart: Multipart,
) -> PageResult {
    let form = MultipartForm::read(multipart).await?;
    let req = UpdateAccountRequest {
        username: form.text("username").unwrap_or_default().to_string(),
        email: form.text("email").unwrap_or_default().to_lowercase(),
    };

    let mut errors = FormErrors::default();
    if let Err(e) = req.validate() {
        errors.extend_validation(&e);
    }
    if req.username != user.username && state.db.users().get_by_username(&req.username).await?.is_some() {
        errors.push("Username already taken!");
    }
    if req.email != user.email && state.db.users().get_by_email(&req.email).await?.is_some() {
        errors.push("Account with email already exists!");
    }
    let picture = form.file("picture");
    if picture.is_some_and(|p| !p.is_image()) {
        errors.push("Profile pictures have to be jpg, jpeg or png files.");
    }
    if !errors.is_empty() {
        return account_view(&state, user, &cookies, errors.into_vec(), 1).await;
    }

    let image_file = match picture {
        Some(upload) => {
            let upload = upload.clone();
            let dir = state.config.storage.dir(&state.config.storage.profile_pictures_dir);
            let name = blocking(move || {
                let image = upload.decode_image()?;
                save_image(&image, &dir, Some(PROFILE_PICTURE_SIZE), ImageExt::Jpeg)
            })
            .await?;
            Some(name)
        }
        None => None,
    };

    let changes = UserChanges {
        username: Some(req.username),
        email: Some(req.email),
        image_file,
        ..Default::default()
    };
    match state.users.update_user(user.id, changes).await {
        Ok(updated) => {
            if updated.image_file != user.image_file {
                if let Some(old) = state.storage.profile_picture(&user.image_file) {
                    state.storage.remove_all(vec![old]).await;
                }
            }
            flash(&cookies, "success", "Your account has been updated!");
            Ok(Redirect::to("/account").into_response())
        }
        Err(AppError::Conflict(message) | AppError::Unprocessable(message)) => {
            account_view(&state, user, &cookies, vec![message], 1).await
        }
        Err(e) => Err(e.into()),
    }
}

// Classifiers

fn predict_template(
    state: &AppState,
    user: User,
    cookies: &Cookies,
    errors: Vec<String>,
    selected: String,
) -> PredictTemplate {
    PredictTemplate {
        title: "Classify an image.",
        user: Some(user),
        flashes: take_flashes(cookies),
        errors,
        classifiers: state.orchestrator.classifiers().all(),
        selected,
        image_file: None,
        predictions: Vec::new(),
    }
}

async fn classify_page(State(state): State<AppState>, CurrentUser(user): CurrentUser, cookies: Cookies) -> Response {
    render(predict_template(&state, user, &cookies, Vec::new(), String::new()))
}

async fn classify_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    cookies: Cookies,
    multipart: Multipart,
) -> PageResult {
    let mut form = MultipartForm::read(multipart).await?;
    let mut errors = FormErrors::default();
    let classifier_id = errors
        .require(form.text("model"), "Please choose a model.")
        .map(str::to_string);
    let upload = form.take_files("image").into_iter().next();
    match &upload {
        None => errors.push("Please choose an image."),
        Some(u) if !u.is_image() => errors.push("Images have to be jpg, jpeg or png files."),
        Some(_) => {}
    }

    let (Some(classifier_id), Some(upload), true) = (classifier_id, upload, errors.is_empty()) else {
        return Ok(render(predict_template(&state, user, &cookies, errors.into_vec(), String::new())));
    };

    let orchestrator = state.orchestrator.clone();
    let storage = state.config.storage.clone();
    let id = classifier_id.clone();
    let (predictions, image_file) = blocking(move || {
        let image = upload.decode_image()?;
        let predictions = orchestrator.classify(&image, &id, 5)?;
        let dir = storage.dir(&storage.tmp_dir);
        let image_file = save_image(&image, &dir, Some((storage.max_width, storage.max_height)), ImageExt::Jpeg)?;
        Ok((predictions, image_file))
    })
    .await?;

    flash(&cookies, "success", "Done!");
    let mut template = predict_template(&state, user, &cookies, Vec::new(), classifier_id);
    template.image_file = Some(image_file);
    template.predictions = predictions;
    Ok(render(template))
}

fn upload_template(user: User, cookies: &Cookies, errors: Vec<String>, name: String) -> UploadTemplate {
    UploadTemplate {
        title: "Upload Model",
        user: Some(user),
        flashes: take_flashes(cookies),
        errors,
        name,
        extensions: MODEL_EXTENSIONS.join(", "),
    }
}

async fn upload_page(CurrentUser(user): CurrentUser, cookies: Cookies) -> Response {
    render(upload_template(user, &cookies, Vec::new(), String::new()))
}

async fn upload_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    cookies: Cookies,
    multipart: Multipart,
) -> PageResult {
    let form = MultipartForm::read(multipart).await?;
    let details = UploadClassifierForm {
        name: form.text("name").unwrap_or_default().to_string(),
    };

    let mut errors = FormErrors::default();
    if let Err(e) = details.validate() {
        errors.extend_validation(&e);
    }
    let model: Option<&Upload> = form.file("model");
    match model {
        None => errors.push("Please choose a model file."),
        Some(m) if !allowed_extension(&m.file_name, &MODEL_EXTENSIONS) => {
            errors.push(format!("Model files have to be one of: {}.", MODEL_EXTENSIONS.join(", ")))
        }
        Some(_) => {}
    }
    let (Some(model), true) = (model, errors.is_empty()) else {
        return Ok(render(upload_template(user, &cookies, errors.into_vec(), details.name)));
    };

    let dir = state.config.storage.dir(&state.config.storage.models_dir);
    let path = save_model(&model.bytes, &model.file_name, &dir).await?;
    let classifier = state
        .db
        .classifiers()
        .add(&details.name, &path.to_string_lossy(), user.id)
        .await?;
    info!(user = user.id, classifier = classifier.id, "Model uploaded");

    flash(&cookies, "success", "Model uploaded! You can now analyze it!");
    Ok(Redirect::to("/account").into_response())
}

async fn classifier_page(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    cookies: Cookies,
    Path(classifier_id): Path<i64>,
) -> PageResult {
    let model = find_classifier(&state, classifier_id).await?;
    owned_by(&model, &user)?;
    let reports = state.reports.dao().list_by_classifier(model.id).await?;

    Ok(render(ModelTemplate {
        title: model.name.clone(),
        user: Some(user),
        flashes: take_flashes(&cookies),
        model,
        reports,
    }))
}

async fn delete_classifier(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    cookies: Cookies,
    Path(classifier_id): Path<i64>,
) -> PageResult {
    let model = find_classifier(&state, classifier_id).await?;
    owned_by(&model, &user)?;

    let files = state.storage.classifier_files(&model).await?;
    state.db.classifiers().delete(model.id).await?;
    state.storage.remove_all(files).await;
    info!(user = user.id, classifier = model.id, "Model deleted");

    flash(&cookies, "success", "Your model has been deleted!");
    Ok(Redirect::to("/account").into_response())
}

async fn download_classifier(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(classifier_id): Path<i64>,
) -> PageResult {
    let model = find_classifier(&state, classifier_id).await?;
    owned_by(&model, &user)?;

    let bytes = match tokio::fs::read(&model.file_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound("the model file is gone".to_string()).into())
        }
        Err(e) => return Err(e.into()),
    };
    let file_name = match crate::utils::imaging::extension_of(&model.file_path) {
        Some(ext) => format!("{}.{ext}", model.name),
        None => model.name.clone(),
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
        ],
        bytes,
    )
        .into_response())
}

// Attacks

fn visualize_template(state: &AppState, user: User, cookies: &Cookies, errors: Vec<String>) -> VisualizeTemplate {
    VisualizeTemplate {
        title: "Visualize an attack.",
        user: Some(user),
        flashes: take_flashes(cookies),
        errors,
        classifiers: state.orchestrator.classifiers().all(),
        attacks: state.orchestrator.attacks().all(),
        result: None,
    }
}

async fn visualize_page(State(state): State<AppState>, CurrentUser(user): CurrentUser, cookies: Cookies) -> Response {
    render(visualize_template(&state, user, &cookies, Vec::new()))
}

async fn visualize_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    cookies: Cookies,
    multipart: Multipart,
) -> PageResult {
    let mut form = MultipartForm::read(multipart).await?;
    let mut errors = FormErrors::default();
    let classifier_id = errors.require(form.text("model"), "Please choose a model.").map(str::to_string);
    let attack_id = errors.require(form.text("attack"), "Please choose an attack.").map(str::to_string);
    let upload = form.take_files("image").into_iter().next();
    match &upload {
        None => errors.push("Please choose an image."),
        Some(u) if !u.is_image() => errors.push("Images have to be jpg, jpeg or png files."),
        Some(_) => {}
    }

    let (Some(classifier_id), Some(attack_id), Some(upload), true) =
        (classifier_id, attack_id, upload, errors.is_empty())
    else {
        return Ok(render(visualize_template(&state, user, &cookies, errors.into_vec())));
    };

    let orchestrator = state.orchestrator.clone();
    let classifier = orchestrator.classifiers().get(&classifier_id)?.descriptor.name.clone();
    let attack = orchestrator.attacks().get(&attack_id)?.descriptor.name.clone();
    let options = RunOptions::default();
    let mime = options.ext.mime();
    let run = blocking(move || {
        let image = upload.decode_image()?;
        orchestrator.run_attack(&image, &classifier_id, &attack_id, &options)
    })
    .await?;

    let mut template = visualize_template(&state, user, &cookies, Vec::new());
    template.result = Some(AttackView {
        classifier,
        attack,
        images: AttackResponse::from(&run),
        mime,
        success: run.success.first().copied().unwrap_or(false),
        original_label: run.original_label.label,
        result_label: run.result_label.label,
    });
    Ok(render(template))
}

// Reports

async fn new_report_view(state: &AppState, user: User, cookies: &Cookies, errors: Vec<String>) -> PageResult {
    let owned = state.db.users().get_classifiers(user.id).await?;
    Ok(render(NewReportTemplate {
        title: "Reports",
        user: Some(user),
        flashes: take_flashes(cookies),
        errors,
        classifiers: state.orchestrator.classifiers().all(),
        attacks: state.orchestrator.attacks().all(),
        owned,
    }))
}

async fn new_report_page(State(state): State<AppState>, CurrentUser(user): CurrentUser, cookies: Cookies) -> PageResult {
    new_report_view(&state, user, &cookies, Vec::new()).await
}

async fn new_report_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    cookies: Cookies,
    multipart: Multipart,
) -> PageResult {
    let mut form = MultipartForm::read(multipart).await?;
    let mut errors = FormErrors::default();
    let classifier_id = errors.require(form.text("model"), "Please choose a model.").map(str::to_string);
    let attack_id = errors.require(form.text("attack"), "Please choose an attack.").map(str::to_string);
    let owner_id = errors
        .require(form.text("classifier"), "Please choose one of your classifiers to file the report under.")
        .map(str::parse::<i64>);
    let uploads = form.take_files("images");
    if uploads.is_empty() {
        errors.push("Please choose at least one image.");
    } else if uploads.iter().any(|u| !u.is_image()) {
        errors.push("Images have to be jpg, jpeg or png files.");
    }

    let (Some(classifier_id), Some(attack_id), Some(owner_id), true) =
        (classifier_id, attack_id, owner_id, errors.is_empty())
    else {
        return new_report_view(&state, user, &cookies, errors.into_vec()).await;
    };
    let owner_id = owner_id.map_err(|_| AppError::Unprocessable("classifier id has to be an integer".to_string()))?;
    let owner = find_classifier(&state, owner_id).await?;
    owned_by(&owner, &user)?;

    let orchestrator = state.orchestrator.clone();
    let pretrained = orchestrator.classifiers().get(&classifier_id)?.descriptor.name.clone();
    let dir = state.config.storage.dir(&state.config.storage.reports_dir);
    let data = blocking(move || {
        let images = uploads.iter().map(Upload::decode_image).collect::<Result<Vec<_>, _>>()?;
        let options = RunOptions::default();
        let outcome = build_report(&orchestrator, &images, &classifier_id, &attack_id, &options)?;
        outcome.save(&dir, options.ext.extension())
    })
    .await?;

    let value = serde_json::to_value(&data).map_err(|e| AppError::Internal(e.to_string()))?;
    let report = state.reports.create_report(owner.id, &pretrained, value).await?;

    flash(&cookies, "success", "Your report has been created!");
    Ok(Redirect::to(&format!("/reports/{}", report.id)).into_response())
}

async fn all_reports(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    cookies: Cookies,
    Query(query): Query<PageQuery>,
) -> PageResult {
    let reports = state
        .reports
        .dao()
        .list_by_user(user.id, query.page.unwrap_or(1), REPORTS_PER_PAGE)
        .await?;
    Ok(render(ReportsTemplate {
        title: "Reports",
        user: Some(user),
        flashes: take_flashes(&cookies),
        reports,
    }))
}

async fn report_page(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    cookies: Cookies,
    Path(report_id): Path<i64>,
) -> PageResult {
    let report = state.reports.get_report(report_id).await?;
    let model = find_classifier(&state, report.classifier_id).await?;
    owned_by(&model, &user)?;

    let data: ReportData = serde_json::from_value(report.data.0.clone())
        .map_err(|e| AppError::Internal(format!("report {report_id} holds unreadable data: {e}")))?;
    let reports_url = format!("/static/{}", state.config.storage.reports_dir);
    let rows = report_rows(&data);
    let matrix = data
        .confusion_matrix
        .labels
        .iter()
        .cloned()
        .zip(data.confusion_matrix.matrix.iter().cloned())
        .collect();

    Ok(render(ReportTemplate {
        title: "Visualize Report.",
        user: Some(user),
        flashes: take_flashes(&cookies),
        report,
        model,
        data,
        reports_url,
        rows,
        matrix,
    }))
}
