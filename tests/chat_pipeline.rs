mod common;

use axum::http::StatusCode;
use common::{call, chat, school_app};
use serde_json::json;

#[tokio::test]
async fn student_asking_about_a_classmate_is_blocked() {
    let app = school_app();
    let v = chat(&app, 2, "Mostra as notas do João").await;
    assert_eq!(v["blocked"], true);
    assert_eq!(v["intent"], "blocked");
    assert!(v["tool_result"].is_null());
    assert!(!v["response"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn student_sees_only_own_grades() {
    let app = school_app();
    let v = chat(&app, 2, "Quero ver as minhas notas").await;
    assert_eq!(v["blocked"], false);
    assert_eq!(v["intent"], "query_grades");
    let grades = v["tool_result"]["grades"].as_array().unwrap();
    assert_eq!(grades.len(), 2);
    assert!(grades.iter().all(|g| g["owner_student_id"] == 2));
    assert!(v["response"]
        .as_str()
        .unwrap()
        .starts_with("Notas de João Silva:"));
}

#[tokio::test]
async fn student_summary_is_pinned_to_self() {
    let app = school_app();
    let v = chat(&app, 2, "Qual é a minha média?").await;
    assert_eq!(v["intent"], "summary");
    assert_eq!(v["tool_result"]["student"]["id"], 2);
    assert_eq!(v["tool_result"]["average"], 15.0);
    assert!(v["response"]
        .as_str()
        .unwrap()
        .contains("Média geral: 15.0"));
}

#[tokio::test]
async fn teacher_gets_class_report() {
    let app = school_app();
    let v = chat(&app, 1, "Relatório da turma 10A").await;
    assert_eq!(v["intent"], "class_report");
    let stats = &v["tool_result"]["class_statistics"];
    assert_eq!(stats["mean"], 15.0);
    assert_eq!(stats["median"], 15.0);
    assert!(v["response"]
        .as_str()
        .unwrap()
        .starts_with("Relatório da turma 10A:"));
}

#[tokio::test]
async fn teacher_adds_grade_and_student_sees_it() {
    let app = school_app();
    let v = chat(
        &app,
        1,
        "Adicionar nota 18,5 ao João em Matemática, turma 10A, módulo 3, teste 3",
    )
    .await;
    assert_eq!(v["blocked"], false, "{v}");
    assert_eq!(v["intent"], "add_grade");
    let eval = &v["tool_result"]["evaluation"];
    assert_eq!(eval["owner_student_id"], 2);
    assert_eq!(eval["last_modified_by"], 1);
    assert_eq!(eval["value"], 18.5);
    assert_eq!(eval["module"], "Módulo 3");

    let mine = chat(&app, 2, "Quero ver as minhas notas").await;
    assert_eq!(mine["tool_result"]["total_grades"], 3);
}

#[tokio::test]
async fn missing_value_asks_for_it() {
    let app = school_app();
    let v = chat(
        &app,
        1,
        "Adicionar nota ao João em Matemática, turma 10A, módulo 3, teste 3",
    )
    .await;
    assert_eq!(v["blocked"], false);
    assert_eq!(v["intent"], "add_grade");
    assert!(v["tool_result"].is_null());
    assert_eq!(v["response"], "Por favor, especifique: valor da nota");

    let (_, grades) = call(
        &app,
        "POST",
        "/tools/grades/query",
        Some(json!({"requester_id": 1, "student_id": 2})),
    )
    .await;
    assert_eq!(grades["total_grades"], 2);
}

#[tokio::test]
async fn unknown_grade_is_a_validation_error() {
    let app = school_app();
    let v = chat(&app, 1, "Atualizar nota 404 para 12").await;
    assert_eq!(v["blocked"], false);
    assert_eq!(v["error"], "Erro de validação: Nota 404 não encontrado(a).");
    assert_eq!(v["response"], v["error"]);
}

#[tokio::test]
async fn unknown_user_is_refused() {
    let app = school_app();
    let v = chat(&app, 99, "Quero ver as minhas notas").await;
    assert_eq!(v["blocked"], true);
    assert_eq!(v["response"], "Utilizador não encontrado no sistema.");
}

#[tokio::test]
async fn greeting_gets_help() {
    let app = school_app();
    let v = chat(&app, 3, "Olá, bom dia").await;
    assert_eq!(v["intent"], "fallback");
    assert!(v["response"]
        .as_str()
        .unwrap()
        .starts_with("Posso ajudá-lo com:"));
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let app = school_app();
    let (status, body) = call(
        &app,
        "POST",
        "/agent/chat",
        Some(json!({"user_id": 2, "message": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "ValidationError");
}

#[tokio::test]
async fn deletion_requests_in_any_phrasing_are_blocked() {
    let app = school_app();
    for msg in [
        "Please remove João's last grade",
        "Remove the last two grades of Maria",
        "elimina o registo da avaliação 3",
        "quero apagar a última nota lançada do João",
    ] {
        let v = chat(&app, 1, msg).await;
        assert_eq!(v["blocked"], true, "{msg}");
        assert_eq!(v["intent"], "blocked", "{msg}");
        assert!(v["tool_result"].is_null());
    }
    let (_, v) = call(
        &app,
        "POST",
        "/tools/grades/query",
        Some(json!({"requester_id": 3, "student_id": 3})),
    )
    .await;
    assert_eq!(v["total_grades"], 1);
}
