use std::sync::{Arc, Mutex};

use axum::{
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use shared::domain::{QuestionId, SubmissionStatus};
use tokio::net::TcpListener;

use super::*;

#[test]
fn socket_url_rewrites_http_schemes() {
    assert_eq!(
        quiz_socket_url("http://localhost:8000", QuizId(7)).unwrap(),
        "ws://localhost:8000/ws/quiz/7/"
    );
    assert_eq!(
        quiz_socket_url("https://quiz.example.org/", QuizId(12)).unwrap(),
        "wss://quiz.example.org/ws/quiz/12/"
    );
}

#[test]
fn socket_url_refuses_other_schemes() {
    assert!(quiz_socket_url("ftp://example.org", QuizId(1)).is_err());
    assert!(quiz_socket_url("example.org", QuizId(1)).is_err());
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

type Captured<T> = Arc<Mutex<Option<T>>>;

fn unit(quiz: i64, question: i64) -> UnitKey {
    UnitKey::new(QuizId(quiz), QuestionId(question))
}

#[tokio::test]
async fn submit_sends_csrf_header_and_returns_the_echoed_id() {
    let captured: Captured<(Option<String>, SubmitRequest)> = Arc::default();
    let app = Router::new().route(
        "/quizzes/7/question/3/submit/",
        post({
            let captured = Arc::clone(&captured);
            move |headers: HeaderMap, Json(body): Json<SubmitRequest>| async move {
                let token = headers
                    .get(CSRF_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                *captured.lock().unwrap() = Some((token, body));
                Json(SubmitResponse {
                    submission_id: SubmissionId(42),
                })
            }
        }),
    );
    let base = serve(app).await;

    let backend = HttpBackend::new(&base, "csrf-xyz").unwrap();
    let id = backend.submit(unit(7, 3), "print(1)").await.unwrap();

    assert_eq!(id, SubmissionId(42));
    let (token, body) = captured.lock().unwrap().take().unwrap();
    assert_eq!(token.as_deref(), Some("csrf-xyz"));
    assert_eq!(body.code, "print(1)");
}

#[tokio::test]
async fn submit_rejection_carries_the_server_message() {
    let app = Router::new().route(
        "/quizzes/7/question/3/submit/",
        post(|| async {
            (
                StatusCode::BAD_REQUEST,
                Json(ApiError::new("solution too long")),
            )
        }),
    );
    let base = serve(app).await;

    let backend = HttpBackend::new(&base, "").unwrap();
    let err = backend.submit(unit(7, 3), "x").await.unwrap_err();

    match err {
        BackendError::Rejected(message) => assert_eq!(message, "solution too long"),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn submit_against_a_dead_server_is_a_network_error() {
    let backend = HttpBackend::new("http://127.0.0.1:1", "").unwrap();
    let err = backend.submit(unit(1, 1), "x").await.unwrap_err();
    assert!(matches!(err, BackendError::Network(_)));
}

#[tokio::test]
async fn status_fetch_decodes_terminal_results() {
    let app = Router::new().route(
        "/quizzes/submission/42/status/",
        get(|| async {
            Json(StatusResponse {
                status: SubmissionStatus::Failed,
                is_correct: Some(false),
                error_log: Some("assertion failed on case 2".into()),
            })
        }),
    );
    let base = serve(app).await;

    let backend = HttpBackend::new(&base, "").unwrap();
    let response = backend.submission_status(SubmissionId(42)).await.unwrap();

    assert_eq!(response.status, SubmissionStatus::Failed);
    assert_eq!(response.is_correct, Some(false));
    assert_eq!(
        response.error_log.as_deref(),
        Some("assertion failed on case 2")
    );
}

#[tokio::test]
async fn finish_posts_the_force_flag_and_returns_the_opaque_outcome() {
    let captured: Captured<FinishRequest> = Arc::default();
    let app = Router::new().route(
        "/quizzes/7/finish/",
        post({
            let captured = Arc::clone(&captured);
            move |Json(body): Json<FinishRequest>| async move {
                *captured.lock().unwrap() = Some(body);
                Json(serde_json::json!({ "redirect_url": "/quizzes/7/results/" }))
            }
        }),
    );
    let base = serve(app).await;

    let backend = HttpBackend::new(&base, "token").unwrap();
    let answers = serde_json::json!({ "3": "print(1)" });
    let outcome = backend.finish(QuizId(7), &answers, true).await.unwrap();

    assert_eq!(outcome["redirect_url"], "/quizzes/7/results/");
    let body = captured.lock().unwrap().take().unwrap();
    assert!(body.force);
    assert_eq!(body.answers, answers);
}

#[tokio::test]
async fn unread_count_fetch_returns_the_badge_value() {
    let app = Router::new().route(
        "/quizzes/help-requests/unread-count/",
        get(|| async { Json(UnreadCountResponse { unread_count: 12 }) }),
    );
    let base = serve(app).await;

    let backend = HttpBackend::new(&base, "").unwrap();
    assert_eq!(backend.unread_count().await.unwrap(), 12);
}
