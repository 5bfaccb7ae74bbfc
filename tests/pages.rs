mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::*;
use tower::ServiceExt;

async fn register_and_login(app: &TestApp, username: &str, email: &str) -> String {
    let response = app
        .router
        .clone()
        .oneshot(form(
            "POST",
            "/register",
            &[
                ("username", username),
                ("email", email),
                ("password", "hunter2"),
                ("confirm_password", "hunter2"),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");

    login(app, email, "hunter2").await
}

#[tokio::test]
async fn test_home_lists_registries() {
    let app = test_app().await;
    let response = app.router.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("ImageNet"));
    assert!(html.contains("FastGradientSignMethod"));
    assert!(html.contains("RGB"));
}

#[tokio::test]
async fn test_protected_page_redirects_to_login() {
    let app = test_app().await;
    let response = app.router.clone().oneshot(get("/reports/all?page=2")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login?next=%2Freports%2Fall%3Fpage%3D2");
    let flash = set_cookie(&response, "flash").expect("flash cookie");

    let response = app
        .router
        .clone()
        .oneshot(with_cookie(get("/login"), &flash))
        .await
        .unwrap();
    let html = body_text(response).await;
    assert!(html.contains("Please log in to access this page."));
}

#[tokio::test]
async fn test_register_login_account() {
    let app = test_app().await;
    let session = register_and_login(&app, "nina", "nina@example.com").await;

    let response = app
        .router
        .clone()
        .oneshot(with_cookie(get("/account"), &session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("nina@example.com"));
    assert!(html.contains("No models yet."));

    let response = app
        .router
        .clone()
        .oneshot(with_cookie(get("/logout"), &session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let response = app
        .router
        .clone()
        .oneshot(with_cookie(get("/account"), &session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn test_session_cookie_is_secure() {
    let app = test_app().await;
    app.state.users.create_user("abe", "abe@example.com", "pw").await.unwrap();

    let response = app
        .router
        .clone()
        .oneshot(form("POST", "/login", &[("email", "abe@example.com"), ("password", "pw")]))
        .await
        .unwrap();
    let cookie = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("session="))
        .unwrap()
        .to_string();
    assert!(cookie.contains("Secure"));
    assert!(cookie.contains("HttpOnly"));
}

#[tokio::test]
async fn test_login_ignores_offsite_next() {
    let app = test_app().await;
    app.state.users.create_user("bea", "bea@example.com", "pw").await.unwrap();

    for next in ["/\\evil.com", "//evil.com", "https://evil.com"] {
        let response = app
            .router
            .clone()
            .oneshot(form(
                "POST",
                "/login",
                &[("email", "bea@example.com"), ("password", "pw"), ("next", next)],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/home");
    }
}

#[tokio::test]
async fn test_register_rejects_duplicates() {
    let app = test_app().await;
    register_and_login(&app, "omar", "omar@example.com").await;

    let response = app
        .router
        .clone()
        .oneshot(form(
            "POST",
            "/register",
            &[
                ("username", "omar"),
                ("email", "omar@example.com"),
                ("password", "pw"),
                ("confirm_password", "pw"),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("Username already exists!"));
    assert!(html.contains("Account with email already exists!"));
}

#[tokio::test]
async fn test_login_failure_and_next() {
    let app = test_app().await;
    register_and_login(&app, "pia", "pia@example.com").await;

    let response = app
        .router
        .clone()
        .oneshot(form("POST", "/login", &[("email", "pia@example.com"), ("password", "nope")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Login unsuccessful"));

    let response = app
        .router
        .clone()
        .oneshot(form(
            "POST",
            "/login",
            &[
                ("email", "pia@example.com"),
                ("password", "hunter2"),
                ("next", "/reports/all"),
                ("remember", "on"),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(location(&response), "/reports/all");
}

#[tokio::test]
async fn test_foreign_classifier_is_forbidden() {
    let app = test_app().await;
    let owner = app.state.users.create_user("quin", "quin@example.com", "pw").await.unwrap();
    let model = app.state.db.classifiers().add("theirs", "x.h5", owner.id).await.unwrap();
    let session = register_and_login(&app, "ravi", "ravi@example.com").await;

    let response = app
        .router
        .clone()
        .oneshot(with_cookie(get(&format!("/classifiers/{}", model.id)), &session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .router
        .clone()
        .oneshot(with_cookie(form("POST", &format!("/classifiers/delete/{}", model.id), &[]), &session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(app.state.db.classifiers().get(model.id).await.unwrap().is_some());

    let response = app
        .router
        .clone()
        .oneshot(with_cookie(get("/classifiers/12345"), &session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

fn multipart(uri: &str, cookie: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
    let boundary = "loki-test-boundary";
    let mut body = Vec::new();
    for (name, file_name, content) in parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        match file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes()),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap();
    with_cookie(request, cookie)
}

#[tokio::test]
async fn test_upload_report_and_delete() {
    let app = test_app().await;
    let session = register_and_login(&app, "sam", "sam@example.com").await;

    let response = app
        .router
        .clone()
        .oneshot(multipart(
            "/classifiers/upload",
            &session,
            &[("name", None, b"tiny"), ("model", Some("tiny.exe"), b"weights")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Model files have to be one of"));

    let response = app
        .router
        .clone()
        .oneshot(multipart(
            "/classifiers/upload",
            &session,
            &[("name", None, b"tiny"), ("model", Some("tiny.h5"), b"weights")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/account");

    let user = app.state.db.users().get_by_username("sam").await.unwrap().unwrap();
    let model = app.state.db.users().get_classifiers(user.id).await.unwrap().remove(0);
    assert!(std::path::Path::new(&model.file_path).is_file());

    let response = app
        .router
        .clone()
        .oneshot(with_cookie(get(&format!("/classifiers/download/{}", model.id)), &session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"weights");

    let red = solid_png([150, 100, 100]);
    let blue = solid_png([40, 40, 200]);
    let model_id = model.id.to_string();
    let response = app
        .router
        .clone()
        .oneshot(multipart(
            "/reports/new",
            &session,
            &[
                ("model", None, b"0"),
                ("attack", None, b"1"),
                ("classifier", None, model_id.as_bytes()),
                ("images", Some("red.png"), &red),
                ("images", Some("blue.png"), &blue),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let report_url = location(&response);
    assert!(report_url.starts_with("/reports/"));

    let response = app
        .router
        .clone()
        .oneshot(with_cookie(get(&report_url), &session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("FastGradientSignMethod on RGB"));
    assert!(html.contains("Confusion matrix"));

    let response = app
        .router
        .clone()
        .oneshot(with_cookie(get("/reports/all"), &session))
        .await
        .unwrap();
    assert!(body_text(response).await.contains(&report_url));

    let report = app.state.db.reports().get_all().await.unwrap().remove(0);
    let images = app.state.storage.report_files(&report);
    assert_eq!(images.len(), 6);
    assert!(images.iter().all(|p| p.is_file() && p.starts_with(app.dir.path())));

    let response = app
        .router
        .clone()
        .oneshot(with_cookie(form("POST", &format!("/classifiers/delete/{}", model.id), &[]), &session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(!std::path::Path::new(&model.file_path).exists());
    assert!(images.iter().all(|p| !p.exists()));
    assert!(app.state.db.reports().get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_visualize_attack_page() {
    let app = test_app().await;
    let session = register_and_login(&app, "tess", "tess@example.com").await;
    let red = solid_png([150, 100, 100]);

    let response = app
        .router
        .clone()
        .oneshot(multipart(
            "/attacks/visualize",
            &session,
            &[("model", None, b"0"), ("attack", None, b"1"), ("image", Some("red.png"), &red)],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("data:image/jpeg;base64,"));
    assert!(html.contains("Fooled"));
}
