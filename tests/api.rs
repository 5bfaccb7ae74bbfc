mod common;

use axum::http::StatusCode;
use common::*;
use loki::utils::imaging::decode_base64_image;
use serde_json::{json, Value};
use tower::ServiceExt;

fn assert_descriptors(list: &Value, expected: usize) {
    let items = list.as_array().unwrap();
    assert_eq!(items.len(), expected);
    for item in items {
        let keys: Vec<&String> = item.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 2);
        assert!(item["name"].is_string());
        assert!(item["paper"].is_string());
    }
}

#[tokio::test]
async fn test_listings_expose_name_and_paper() {
    let app = test_app().await;

    let response = app.router.clone().oneshot(get("/api/1/datasets/all")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let datasets = body_json(response).await;
    assert_descriptors(&datasets, 1);
    assert_eq!(datasets[0]["name"], "ImageNet");

    let response = app.router.clone().oneshot(get("/api/1/classifiers/all")).await.unwrap();
    assert_descriptors(&body_json(response).await, 1);

    let response = app.router.clone().oneshot(get("/api/1/attacks/all")).await.unwrap();
    let attacks = body_json(response).await;
    assert_descriptors(&attacks, 7);
    assert_eq!(attacks[0]["name"], "LinfDeepFool");
    assert_eq!(attacks[1]["name"], "FastGradientSignMethod");
    assert_eq!(attacks[6]["name"], "L2CarliniWagner");

    let response = app.router.clone().oneshot(get("/api/1/attacks/5")).await.unwrap();
    assert_eq!(body_json(response).await["name"], "Spatial Attack");
}

#[tokio::test]
async fn test_bad_ids() {
    let app = test_app().await;

    for registry in ["datasets", "classifiers", "attacks", "datasets/labels"] {
        let response = app
            .router
            .clone()
            .oneshot(get(&format!("/api/1/{registry}/10")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{registry}/10");

        let response = app
            .router
            .clone()
            .oneshot(get(&format!("/api/1/{registry}/donneleC")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY, "{registry}/donneleC");
    }
}

#[tokio::test]
async fn test_dataset_labels() {
    let app = test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(form("PUT", "/api/1/datasets/labels/0", &[("class_id", "1")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!("goldfish"));

    let response = app
        .router
        .clone()
        .oneshot(form("PUT", "/api/1/datasets/labels/0", &[("class_id", "1000")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.router.clone().oneshot(get("/api/1/datasets/labels/0")).await.unwrap();
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1000);

    let response = app
        .router
        .clone()
        .oneshot(form("PUT", "/api/1/datasets/0", &[]))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["paper"], "https://arxiv.org/abs/1409.0575");
}

#[tokio::test]
async fn test_classify() {
    let app = test_app().await;
    let image = solid_base64([30, 40, 220]);

    let response = app
        .router
        .clone()
        .oneshot(form(
            "PUT",
            "/api/1/classifiers/classify",
            &[("image_data", &image), ("classifier_id", "0")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let predictions = body_json(response).await;
    let predictions = predictions.as_array().unwrap();
    assert_eq!(predictions.len(), 3);
    assert_eq!(predictions[0]["label"], "blue");
    assert_eq!(predictions[0]["index"], 2);
    assert!(predictions[0]["percentage"].as_f64().unwrap() > 50.0);

    let response = app
        .router
        .clone()
        .oneshot(form(
            "PUT",
            "/api/1/classifiers/classify",
            &[("image_data", &image), ("classifier_id", "10")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bad_base64_is_unprocessable() {
    let app = test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(form(
            "PUT",
            "/api/1/classifiers/classify",
            &[("image_data", "not base64 at all!"), ("classifier_id", "0")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .router
        .clone()
        .oneshot(form(
            "PUT",
            "/api/1/attacks/run",
            &[("image_data", "aGVsbG8="), ("classifier_id", "0"), ("attack_id", "1")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_run_attack() {
    let app = test_app().await;
    let image = solid_base64([150, 100, 100]);

    let response = app
        .router
        .clone()
        .oneshot(form(
            "PUT",
            "/api/1/attacks/run",
            &[("image_data", &image), ("classifier_id", "0"), ("attack_id", "1")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let run = body_json(response).await;
    assert_eq!(run["success"], json!([true]));
    assert_eq!(run["epsilons"], json!([0.3]));

    let images: Vec<&str> = ["original_image", "result_image", "difference_image"]
        .iter()
        .map(|key| run[*key].as_str().unwrap())
        .collect();
    for image in &images {
        decode_base64_image(image).unwrap();
    }
    assert_ne!(images[0], images[1]);
    assert_ne!(images[1], images[2]);
    assert_ne!(images[0], images[2]);

    for (attack, expected) in [("10", StatusCode::NOT_FOUND), ("donneleC", StatusCode::UNPROCESSABLE_ENTITY)] {
        let response = app
            .router
            .clone()
            .oneshot(form(
                "PUT",
                "/api/1/attacks/run",
                &[("image_data", &image), ("classifier_id", "0"), ("attack_id", attack)],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), expected);
    }
}

#[tokio::test]
async fn test_run_attack_robust() {
    let app = test_app().await;
    let image = solid_base64([150, 100, 100]);

    let response = app
        .router
        .clone()
        .oneshot(form(
            "PUT",
            "/api/1/attacks/run",
            &[
                ("image_data", &image),
                ("classifier_id", "0"),
                ("attack_id", "3"),
                ("robust", "true"),
                ("scale", "0.5"),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let run = body_json(response).await;
    assert_eq!(run["epsilons"].as_array().unwrap().len(), 20);
    assert_eq!(run["success"].as_array().unwrap().len(), 20);
    let original = decode_base64_image(run["original_image"].as_str().unwrap()).unwrap();
    assert_eq!(original.width(), 50);
}

#[tokio::test]
async fn test_confusion_matrix() {
    let app = test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(form(
            "PUT",
            "/api/1/reports/confusion_matrix",
            &[("y_before", "dog,cat,dog"), ("y_after", "dog,dog,cat")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cm = body_json(response).await;
    assert_eq!(cm["labels"], json!(["cat", "dog"]));
    assert_eq!(cm["matrix"], json!([[0, 1], [1, 1]]));

    let response = app
        .router
        .clone()
        .oneshot(form(
            "PUT",
            "/api/1/reports/confusion_matrix",
            &[("y_before", "dog,cat"), ("y_after", "dog")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_users_api() {
    let app = test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(form("POST", "/api/1/users/?username=kim", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let create = "/api/1/users/?username=kim&email=kim%40example.com&password=cat";
    let response = app.router.clone().oneshot(form("POST", create, &[])).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let user_id = body_json(response).await["user"]["id"].as_i64().unwrap();

    let response = app.router.clone().oneshot(form("POST", create, &[])).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .router
        .clone()
        .oneshot(form(
            "POST",
            "/api/1/users/?username=lee&email=lee%40example.com&password=cat",
            &[],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.router.clone().oneshot(get("/api/1/users/")).await.unwrap();
    let users = body_json(response).await;
    let users = users["users"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|u| u.get("password_hash").is_none()));

    let hashes: Vec<String> = app
        .state
        .db
        .users()
        .get_all()
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.password_hash)
        .collect();
    assert_ne!(hashes[0], hashes[1]);

    let kim = login(&app, "kim@example.com", "cat").await;
    let response = app
        .router
        .clone()
        .oneshot(with_cookie(
            form("PUT", &format!("/api/1/users/{user_id}?username=kimmy"), &[]),
            &kim,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["user"]["username"], "kimmy");

    let response = app
        .router
        .clone()
        .oneshot(with_cookie(empty("DELETE", &format!("/api/1/users/{user_id}")), &kim))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // the deleted account's session is gone too
    let response = app
        .router
        .clone()
        .oneshot(with_cookie(empty("DELETE", &format!("/api/1/users/{user_id}")), &kim))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.router.clone().oneshot(get(&format!("/api/1/users/{user_id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = app.router.clone().oneshot(get("/api/1/users/donneleC")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let response = app
        .router
        .clone()
        .oneshot(get("/api/1/users/99999999999999999999"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_account_changes_need_own_session() {
    let app = test_app().await;
    let victim = app.state.users.create_user("val", "val@example.com", "pw").await.unwrap();
    app.state.db.classifiers().add("theirs", "x.h5", victim.id).await.unwrap();
    app.state.users.create_user("wes", "wes@example.com", "pw").await.unwrap();
    let wes = login(&app, "wes@example.com", "pw").await;
    let victim_url = format!("/api/1/users/{}", victim.id);

    let response = app.router.clone().oneshot(empty("DELETE", &victim_url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = app
        .router
        .clone()
        .oneshot(form("PUT", &format!("{victim_url}?username=owned"), &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .clone()
        .oneshot(with_cookie(empty("DELETE", &victim_url), &wes))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app
        .router
        .clone()
        .oneshot(with_cookie(form("PUT", &format!("{victim_url}?username=owned"), &[]), &wes))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let left = app.state.db.users().get_classifiers(victim.id).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(app.state.users.get_user(victim.id).await.unwrap().username, "val");
}

#[tokio::test]
async fn test_reports_api() {
    let app = test_app().await;
    let user = app.state.users.create_user("mia", "mia@example.com", "pw").await.unwrap();
    let classifier = app.state.db.classifiers().add("mine", "x.h5", user.id).await.unwrap();

    let body = json!({"classifier_id": 999, "pretrained_classifier": "RGB", "data": {}});
    let response = app
        .router
        .clone()
        .oneshot(json_request("POST", "/api/1/reports/", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = json!({
        "classifier_id": classifier.id,
        "pretrained_classifier": "RGB",
        "data": {"y_before": ["red"], "y_after": ["green"]}
    });
    let response = app
        .router
        .clone()
        .oneshot(json_request("POST", "/api/1/reports/", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let report = body_json(response).await;
    let report_id = report["report"]["id"].as_i64().unwrap();
    assert_eq!(report["report"]["data"]["y_after"][0], "green");

    let response = app.router.clone().oneshot(get("/api/1/reports/all")).await.unwrap();
    assert_eq!(body_json(response).await["reports"].as_array().unwrap().len(), 1);

    let delete = || empty("DELETE", &format!("/api/1/reports/{report_id}"));
    let response = app.router.clone().oneshot(delete()).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.state.users.create_user("ned", "ned@example.com", "pw").await.unwrap();
    let ned = login(&app, "ned@example.com", "pw").await;
    let response = app.router.clone().oneshot(with_cookie(delete(), &ned)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let mia = login(&app, "mia@example.com", "pw").await;
    let response = app.router.clone().oneshot(with_cookie(delete(), &mia)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app.router.clone().oneshot(with_cookie(delete(), &mia)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/api/1/reports/{report_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
