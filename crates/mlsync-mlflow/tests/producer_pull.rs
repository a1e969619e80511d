use mlsync_core::{FieldValue, Producer, ReportFormat};
use mlsync_mlflow::{MlflowApi, MlflowProducer};
use std::thread;

const FORMAT_YAML: &str = "\
elements:
  status:
    alias: status
    type: select
    tag: info
  accuracy:
    alias: Accuracy
    type: float
    tag: metrics
  lr:
    alias: Learning Rate
    type: float
    tag: params
policies:
  info: ignore
  metrics: add
  params: ignore
  tags: ignore
";

fn canned_response(url: &str) -> String {
    if url.contains("experiments/list") {
        r#"{"experiments": [
            {"experiment_id": "0", "name": "CIFAR10", "lifecycle_stage": "active"},
            {"experiment_id": "1", "name": "empty", "lifecycle_stage": "active"}
        ]}"#
        .to_string()
    } else if url.contains("runs/search") {
        // Only experiment 0 has runs; the stub ignores the request body and
        // alternates by call order instead, so keep experiment 1 empty here.
        r#"{"runs": [{
            "info": {"run_id": "r1", "status": "FINISHED"},
            "data": {
                "metrics": [{"key": "accuracy", "value": 0.98}],
                "params": [{"key": "lr", "value": "0.01"}],
                "tags": [{"key": "mlflow.user", "value": "kartik"}]
            }
        }]}"#
        .to_string()
    } else if url.contains("metrics/get-history") {
        r#"{"metrics": [
            {"key": "accuracy", "value": 0.5, "timestamp": 100, "step": 0},
            {"key": "accuracy", "value": 0.98, "timestamp": 200, "step": 1}
        ]}"#
        .to_string()
    } else {
        "{}".to_string()
    }
}

fn start_stub_server() -> String {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    thread::spawn(move || {
        let mut seen_run_searches = 0;
        for request in server.incoming_requests() {
            let body = if request.url().contains("runs/search") {
                seen_run_searches += 1;
                if seen_run_searches > 1 {
                    // Second searched experiment has no runs.
                    r#"{"runs": []}"#.to_string()
                } else {
                    canned_response(request.url())
                }
            } else {
                canned_response(request.url())
            };
            let response = tiny_http::Response::from_string(body).with_header(
                tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                    .unwrap(),
            );
            let _ = request.respond(response);
        }
    });
    format!("http://127.0.0.1:{port}/api")
}

#[test]
fn pull_formats_a_report_from_the_rest_api() {
    let root = start_stub_server();
    let format = ReportFormat::from_yaml(FORMAT_YAML).unwrap();
    let producer = MlflowProducer::new(MlflowApi::new(root), format);

    let report = producer.pull(false).unwrap();

    let experiment = report.get("CIFAR10").unwrap();
    assert_eq!(experiment.id, "0");
    assert_eq!(
        experiment.fields.get("lifecycle_stage"),
        Some(&FieldValue::Str("active".into()))
    );
    let run = &experiment.runs["r1"];
    assert_eq!(run.get("Accuracy").unwrap().value, FieldValue::Float(0.98));
    assert_eq!(
        run.get("status").unwrap().value,
        FieldValue::Str("FINISHED".into())
    );
    assert_eq!(run.get("uid").unwrap().value, FieldValue::Str("r1".into()));
    // The run-less experiment is pruned before the report surfaces.
    assert!(report.get("empty").is_none());
}

#[test]
fn detailed_pull_attaches_metric_history() {
    let root = start_stub_server();
    let format = ReportFormat::from_yaml(FORMAT_YAML).unwrap();
    let producer = MlflowProducer::new(MlflowApi::new(root), format);

    let report = producer.pull(true).unwrap();

    let run = &report.get("CIFAR10").unwrap().runs["r1"];
    let history = run.get("Accuracy").unwrap().history.as_ref().unwrap();
    assert_eq!(history.values, vec![0.5, 0.98]);
    assert_eq!(history.steps, vec![0, 1]);
}
