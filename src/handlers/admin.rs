//! Back office: search and edit every user, classifier and report.

use super::pages::PageError;
use super::session::{flash, take_flashes, CurrentUser, Flash};
use super::{render, AppState};
use crate::db::Page;
use crate::error::AppError;
use crate::models::auth::User;
use crate::models::classifier::UploadClassifierForm;
use crate::models::report::UpdateReportRequest;
use crate::services::registry::parse_id;
use crate::services::users::UserChanges;
use askama::Template;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::request::Parts,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Form, Router,
};
use serde::Deserialize;
use std::str::FromStr;
use tower_cookies::Cookies;
use tracing::{info, warn};
use validator::Validate;

const ROWS_PER_PAGE: u32 = 20;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin", get(|| async { Redirect::to("/admin/users") }))
        .route("/admin/:section", get(list_page))
        .route("/admin/:section/:id", get(edit_page).post(edit_handler))
}

/// A logged-in admin. Other users get a 403 page.
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            warn!(user = user.id, path = %parts.uri.path(), "Back office refused");
            return Err(PageError::from(AppError::Forbidden).into_response());
        }
        Ok(AdminUser(user))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Users,
    Classifiers,
    Reports,
}

impl Section {
    fn name(self) -> &'static str {
        match self {
            Section::Users => "users",
            Section::Classifiers => "classifiers",
            Section::Reports => "reports",
        }
    }

    fn columns(self) -> Vec<&'static str> {
        match self {
            Section::Users => vec!["Username", "Email", "Admin", "Joined"],
            Section::Classifiers => vec!["Name", "File", "Owner", "Uploaded"],
            Section::Reports => vec!["Pretrained classifier", "Classifier", "Date"],
        }
    }
}

impl FromStr for Section {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "users" => Ok(Section::Users),
            "classifiers" => Ok(Section::Classifiers),
            "reports" => Ok(Section::Reports),
            other => Err(AppError::NotFound(format!("no admin section {other}"))),
        }
    }
}

struct Tab {
    name: &'static str,
    active: bool,
}

/// One table row: the record id and its rendered cells.
struct Row {
    id: i64,
    cells: Vec<String>,
}

/// One input of the edit form.
struct Field {
    name: &'static str,
    label: &'static str,
    value: String,
    kind: &'static str,
}

impl Field {
    fn text(name: &'static str, label: &'static str, value: &str) -> Self {
        Self { name, label, value: value.to_string(), kind: "text" }
    }

    fn checked(&self) -> bool {
        self.kind == "checkbox" && !self.value.is_empty()
    }
}

#[derive(Template)]
#[template(path = "admin_list.html")]
struct ListTemplate {
    title: &'static str,
    user: Option<User>,
    flashes: Vec<Flash>,
    tabs: Vec<Tab>,
    section: &'static str,
    columns: Vec<&'static str>,
    rows: Page<Row>,
    query: String,
}

#[derive(Template)]
#[template(path = "admin_edit.html")]
struct EditTemplate {
    title: &'static str,
    user: Option<User>,
    flashes: Vec<Flash>,
    errors: Vec<String>,
    section: &'static str,
    id: i64,
    fields: Vec<Field>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
    page: Option<u32>,
}

/// Every editable field of every section; the section picks its own.
/// Unticked checkboxes are simply absent.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EditForm {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
    is_admin: Option<String>,
    name: Option<String>,
    pretrained_classifier: Option<String>,
}

fn rows<T>(page: Page<T>, row: impl Fn(&T) -> Row) -> Page<Row> {
    Page {
        items: page.items.iter().map(row).collect(),
        page: page.page,
        per_page: page.per_page,
        total: page.total,
    }
}

async fn list_page(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    cookies: Cookies,
    Path(section): Path<String>,
    Query(search): Query<SearchQuery>,
) -> Result<Response, PageError> {
    let section = section.parse::<Section>()?;
    let query = search.q.unwrap_or_default();
    let page = search.page.unwrap_or(1);

    let found = match section {
        Section::Users => rows(state.db.users().search(&query, page, ROWS_PER_PAGE).await?, |u| Row {
            id: u.id,
            cells: vec![
                u.username.clone(),
                u.email.clone(),
                if u.is_admin { "yes" } else { "" }.to_string(),
                u.created_at.format("%Y-%m-%d").to_string(),
            ],
        }),
        Section::Classifiers => rows(state.db.classifiers().search(&query, page, ROWS_PER_PAGE).await?, |c| Row {
            id: c.id,
            cells: vec![
                c.name.clone(),
                c.file_name().to_string(),
                c.user_id.to_string(),
                c.upload_date.format("%Y-%m-%d").to_string(),
            ],
        }),
        Section::Reports => rows(state.db.reports().search(&query, page, ROWS_PER_PAGE).await?, |r| Row {
            id: r.id,
            cells: vec![
                r.pretrained_classifier.clone(),
                r.classifier_id.to_string(),
                r.date.format("%Y-%m-%d %H:%M").to_string(),
            ],
        }),
    };

    Ok(render(ListTemplate {
        title: "Admin",
        user: Some(admin),
        flashes: take_flashes(&cookies),
        tabs: [Section::Users, Section::Classifiers, Section::Reports]
            .into_iter()
            .map(|s| Tab { name: s.name(), active: s == section })
            .collect(),
        section: section.name(),
        columns: section.columns(),
        rows: found,
        query,
    }))
}

/// Current values of the record's editable fields.
async fn fields(state: &AppState, section: Section, id: i64) -> Result<Vec<Field>, PageError> {
    let missing = || AppError::NotFound(format!("{} {id} does not exist", section.name()));
    let fields = match section {
        Section::Users => {
            let user = state.db.users().get_by_id(id).await?.ok_or_else(missing)?;
            vec![
                Field::text("username", "Username", &user.username),
                Field::text("email", "Email", &user.email),
                Field { name: "password", label: "New password", value: String::new(), kind: "password" },
                Field {
                    name: "is_admin",
                    label: "Admin",
                    value: if user.is_admin { "on" } else { "" }.to_string(),
                    kind: "checkbox",
                },
            ]
        }
        Section::Classifiers => {
            let model = state.db.classifiers().get(id).await?.ok_or_else(missing)?;
            vec![Field::text("name", "Name", &model.name)]
        }
        Section::Reports => {
            let report = state.reports.get_report(id).await?;
            vec![Field::text("pretrained_classifier", "Pretrained classifier", &report.pretrained_classifier)]
        }
    };
    Ok(fields)
}

fn edit_view(admin: User, cookies: &Cookies, section: Section, id: i64, fields: Vec<Field>, errors: Vec<String>) -> Response {
    render(EditTemplate {
        title: "Admin",
        user: Some(admin),
        flashes: take_flashes(cookies),
        errors,
        section: section.name(),
        id,
        fields,
    })
}

async fn edit_page(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    cookies: Cookies,
    Path((section, id)): Path<(String, String)>,
) -> Result<Response, PageError> {
    let section = section.parse::<Section>()?;
    let id = parse_id(&id, section.name())?;
    let fields = fields(&state, section, id).await?;
    Ok(edit_view(admin, &cookies, section, id, fields, Vec::new()))
}

async fn apply(state: &AppState, section: Section, id: i64, form: EditForm) -> Result<(), AppError> {
    match section {
        Section::Users => {
            let changes = UserChanges {
                username: form.username.map(|u| u.trim().to_string()),
                email: form.email.map(|e| e.trim().to_lowercase()),
                password: form.password.filter(|p| !p.is_empty()),
                is_admin: Some(form.is_admin.is_some()),
                ..Default::default()
            };
            state.users.update_user(id, changes).await?;
        }
        Section::Classifiers => {
            let name = form.name.unwrap_or_default().trim().to_string();
            let mut model = state
                .db
                .classifiers()
                .get(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("classifiers {id} does not exist")))?;
            UploadClassifierForm { name: name.clone() }.validate()?;
            model.name = name;
            state.db.classifiers().update(&model).await?;
        }
        Section::Reports => {
            let name = form.pretrained_classifier.unwrap_or_default().trim().to_string();
            if name.is_empty() {
                return Err(AppError::Unprocessable("Pretrained classifier is required.".to_string()));
            }
            let changes = UpdateReportRequest {
                pretrained_classifier: Some(name),
                ..Default::default()
            };
            state.reports.update_report(id, changes).await?;
        }
    }
    Ok(())
}

async fn edit_handler(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    cookies: Cookies,
    Path((section, id)): Path<(String, String)>,
    Form(form): Form<EditForm>,
) -> Result<Response, PageError> {
    let section = section.parse::<Section>()?;
    let id = parse_id(&id, section.name())?;

    match apply(&state, section, id, form).await {
        Ok(()) => {
            info!(admin = admin.id, section = section.name(), id, "Record edited");
            flash(&cookies, "success", "Changes saved.");
            Ok(Redirect::to(&format!("/admin/{}/{id}", section.name())).into_response())
        }
        Err(AppError::Conflict(message) | AppError::Unprocessable(message)) => {
            let fields = fields(&state, section, id).await?;
            Ok(edit_view(admin, &cookies, section, id, fields, vec![message]))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections() {
        assert_eq!("users".parse::<Section>().unwrap(), Section::Users);
        assert_eq!("reports".parse::<Section>().unwrap().name(), "reports");
        assert!(matches!("secrets".parse::<Section>(), Err(AppError::NotFound(_))));
        assert_eq!(Section::Classifiers.columns().len(), 4);
    }

    #[test]
    fn test_checkbox_field() {
        let on = Field { name: "is_admin", label: "Admin", value: "on".into(), kind: "checkbox" };
        assert!(on.checked());
        assert!(!Field::text("name", "Name", "on").checked());
    }
}
