//! End-to-end local runs against a mocked API.

use std::path::Path;

use crunch_core::binder::{Signature, Value};
use crunch_core::config::Environment;
use crunch_core::loader::{UserCodeError, UserModule};
use crunch_core::runner::{CodeSource, LocalRun, LocalRunInputs};
use crunch_core::table::read_table;
use crunch_core::{Column, RunnerError, Table};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const X: &str = "id,moon,f1\n1,40,0.3\n1,41,0.1\n1,42,0.2\n";
const Y: &str = "id,moon,target\n1,40,1.0\n1,41,1.0\n1,42,0.0\n";
const EXAMPLE: &str = "id,moon,prediction\n1,42,0.0\n";

async fn mount_file(server: &MockServer, name: &str, content: &'static str) -> serde_json::Value {
    Mock::given(method("GET"))
        .and(path(format!("/files/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(content))
        .mount(server)
        .await;

    json!({
        "url": format!("{}/files/{name}?sig=1", server.uri()),
        "size": content.len(),
        "signed": true
    })
}

async fn mock_api(server: &MockServer, checks: serde_json::Value) {
    let data_files = json!({
        "X": mount_file(server, "X.csv", X).await,
        "y": mount_file(server, "y.csv", Y).await,
        "example_prediction": mount_file(server, "example_prediction.csv", EXAMPLE).await,
    });

    Mock::given(method("GET"))
        .and(path("/v1/competitions/demo/rounds/@current/phases/submission/data-release"))
        .and(query_param("pushToken", "push-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embargo": 1,
            "numberOfFeatures": 1,
            "columnNames": {
                "id": "id",
                "moon": "moon",
                "targets": [{"id": 1, "name": "target", "input": "target", "output": "prediction"}]
            },
            "splits": [
                {"key": 40, "group": "TRAIN"},
                {"key": 41, "group": "TRAIN"},
                {"key": 42, "group": "TEST"}
            ],
            "dataFiles": data_files
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/competitions/demo/checks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(checks))
        .mount(server)
        .await;
}

fn project(dir: &Path) {
    let dot = dir.join(".crunchdao");
    std::fs::create_dir_all(&dot).unwrap();
    std::fs::write(
        dot.join("project"),
        r#"{"competitionName": "demo", "userId": "42", "projectName": "my-model"}"#,
    )
    .unwrap();
    std::fs::write(dot.join("token"), "push-123\n").unwrap();
}

fn module(prediction: f64) -> UserModule {
    UserModule::builder("test")
        .entrypoint("train", Signature::named(["model_directory_path"]), |arguments| {
            let directory = arguments
                .get("model_directory_path")
                .and_then(Value::as_path)
                .ok_or_else(|| UserCodeError::Internal("no model directory".into()))?;
            std::fs::write(directory.join("model.pkl"), b"weights")
                .map_err(|e| UserCodeError::Internal(e.to_string()))?;
            Ok(None)
        })
        .entrypoint("infer", Signature::named(["current_moon"]), move |arguments| {
            let moon = arguments
                .get("current_moon")
                .and_then(Value::as_integer)
                .ok_or_else(|| UserCodeError::Internal("no moon".into()))?;
            let table = Table::new(vec![
                Column::int("id", [1]),
                Column::int("moon", [moon]),
                Column::float("prediction", [prediction]),
            ])
            .map_err(|e| UserCodeError::Internal(e.to_string()))?;
            Ok(Some(table))
        })
        .build()
}

fn inputs(dir: &Path, server: &MockServer, prediction: f64) -> LocalRunInputs {
    let mut inputs = LocalRunInputs::new(dir, CodeSource::Module(module(prediction)));
    inputs.environment = Environment {
        api_base_url: format!("{}/", server.uri()),
        ..Environment::default()
    };
    inputs
}

#[tokio::test]
async fn test_single_key_happy_path() {
    let server = MockServer::start().await;
    mock_api(&server, json!([{"function": "NANS", "scope": "ROOT", "order": 0}])).await;

    let dir = TempDir::new().unwrap();
    project(dir.path());

    let summary = LocalRun::new(inputs(dir.path(), &server, 0.5))
        .execute()
        .await
        .expect("run failed");

    assert_eq!(summary.prediction_path, dir.path().join("data/prediction.parquet"));
    assert_eq!(summary.report.iterations, 1);
    assert_eq!(summary.report.trained_keys, vec![42]);
    assert!(summary.finished_at >= summary.started_at);
    assert!(dir.path().join("resources/model.pkl").exists());

    let prediction = read_table(&summary.prediction_path).unwrap();
    assert_eq!(prediction.num_rows(), 1);
    assert_eq!(prediction.column_names(), vec!["id", "moon", "prediction"]);
    assert_eq!(prediction.column("moon").unwrap().keys().unwrap(), vec![Some(42)]);
    assert_eq!(prediction.column("prediction").unwrap().cell(0).as_f64(), Some(0.5));

    // Staged files use their legacy names.
    assert!(dir.path().join("data/X.csv").exists());
    assert!(dir.path().join("data/example_prediction.csv").exists());
}

#[tokio::test]
async fn test_failed_check_keeps_artifact() {
    let server = MockServer::start().await;
    mock_api(&server, json!([{"function": "NANS", "scope": "ROOT", "order": 0}])).await;

    let dir = TempDir::new().unwrap();
    project(dir.path());

    let err = LocalRun::new(inputs(dir.path(), &server, f64::NAN))
        .execute()
        .await
        .unwrap_err();

    match &err {
        RunnerError::Check(check) => {
            assert_eq!(check.function, "NANS");
            assert_eq!(check.message, "NaNs detected");
            assert_eq!(check.moon, None);
        }
        other => panic!("expected a check error, got {other:?}"),
    }
    assert_eq!(err.exit_code(), crunch_core::errors::exit::USER_FAILURE);
    assert!(dir.path().join("data/prediction.parquet").exists());
}

#[tokio::test]
async fn test_skip_checks() {
    let server = MockServer::start().await;
    mock_api(&server, json!([{"function": "NANS", "scope": "ROOT", "order": 0}])).await;

    let dir = TempDir::new().unwrap();
    project(dir.path());

    let mut inputs = inputs(dir.path(), &server, f64::NAN);
    inputs.skip_checks = true;
    inputs.streaming = true;
    inputs.prediction_path = Some(dir.path().join("out/prediction.csv"));

    let summary = LocalRun::new(inputs).execute().await.expect("run failed");
    assert!(summary.prediction_path.ends_with("out/prediction.csv"));
    assert!(summary.prediction_path.exists());
}

#[tokio::test]
async fn test_missing_token_is_config_error() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    project(dir.path());
    std::fs::remove_file(dir.path().join(".crunchdao/token")).unwrap();

    let err = LocalRun::new(inputs(dir.path(), &server, 0.5))
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::Config(_)));
    assert_eq!(err.exit_code(), crunch_core::errors::exit::CONFIG_ERROR);
}
