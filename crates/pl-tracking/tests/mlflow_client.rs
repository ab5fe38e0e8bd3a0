use parking_lot::Mutex;
use pl_tracking::{ArtifactDownloader, MlflowClient, ModelRegistry, TrackingClient, TrackingConfig};
use pl_types::{PlError, RunInfo, TrackingError, APPROVAL_TAG};
use std::sync::Arc;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    target: String,
    body: String,
}

type Handler = Arc<dyn Fn(&Recorded) -> (u16, String) + Send + Sync>;
type Log = Arc<Mutex<Vec<Recorded>>>;

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

async fn serve(mut socket: TcpStream, handler: Handler, log: Log) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_header_end(&buf) {
            break end;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let mut request_line = head.split_whitespace();
    let recorded = Recorded {
        method: request_line.next().unwrap_or_default().to_string(),
        target: request_line.next().unwrap_or_default().to_string(),
        body: String::from_utf8_lossy(&buf[header_end..]).to_string(),
    };
    let (status, body) = handler(&recorded);
    log.lock().push(recorded);

    let response = format!(
        "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

async fn fake_server(handler: Handler) -> (MlflowClient, Log) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let server_log = log.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let handler = handler.clone();
            let log = server_log.clone();
            tokio::spawn(async move {
                let _ = serve(socket, handler, log).await;
            });
        }
    });

    let config = TrackingConfig::new(&format!("http://{addr}")).unwrap();
    (MlflowClient::new(&config).unwrap(), log)
}

#[tokio::test]
async fn creates_missing_experiment() {
    let (client, log) = fake_server(Arc::new(|req: &Recorded| {
        if req.target.starts_with("/api/2.0/mlflow/experiments/get-by-name") {
            (
                404,
                r#"{"error_code":"RESOURCE_DOES_NOT_EXIST","message":"no such experiment"}"#.into(),
            )
        } else if req.target == "/api/2.0/mlflow/experiments/create" {
            (200, r#"{"experiment_id":"7"}"#.into())
        } else {
            (500, "{}".into())
        }
    }))
    .await;

    let id = client.get_or_create_experiment("Iris Classification").await.unwrap();
    assert_eq!(id, "7");

    let log = log.lock();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].method, "POST");
    assert!(log[1].body.contains("Iris Classification"));
}

#[tokio::test]
async fn nested_run_carries_parent_tag() {
    let (client, log) = fake_server(Arc::new(|req: &Recorded| {
        assert_eq!(req.target, "/api/2.0/mlflow/runs/create");
        (
            200,
            r#"{"run":{"info":{"run_id":"child1","run_name":"merry-owl-3","experiment_id":"7","artifact_uri":"mlflow-artifacts:/7/child1/artifacts"}}}"#.into(),
        )
    }))
    .await;

    let run = client.start_run("7", None, Some("parent0")).await.unwrap();
    assert_eq!(run.run_name, "merry-owl-3");
    assert_eq!(run.parent_run_id.as_deref(), Some("parent0"));

    let body: serde_json::Value = serde_json::from_str(&log.lock()[0].body).unwrap();
    let tags = body["tags"].as_array().unwrap();
    assert!(tags
        .iter()
        .any(|t| t["key"] == "mlflow.parentRunId" && t["value"] == "parent0"));
}

#[tokio::test]
async fn parses_registered_models() {
    let (client, _log) = fake_server(Arc::new(|req: &Recorded| {
        assert!(req.target.starts_with("/api/2.0/mlflow/registered-models/search"));
        (
            200,
            r#"{"registered_models":[
                {"name":"Iris Classification Model","latest_versions":[
                    {"name":"Iris Classification Model","version":"3","source":"mlflow-artifacts:/7/r3/artifacts/model","run_id":"r3",
                     "tags":[{"key":"validation_status","value":"approved"}],"creation_timestamp":1700000000000}
                ]},
                {"name":"Other","latest_versions":[]}
            ]}"#
            .into(),
        )
    }))
    .await;

    let models = client.search_registered_models().await.unwrap();
    assert_eq!(models.len(), 2);
    let version = &models[0].latest_versions[0];
    assert_eq!(version.version, 3);
    assert_eq!(version.tags.get(APPROVAL_TAG).map(String::as_str), Some("approved"));
    assert!(version.created_at.is_some());
    assert!(models[1].latest_versions.is_empty());
}

#[tokio::test]
async fn api_errors_keep_status_and_code() {
    let (client, _log) = fake_server(Arc::new(|_: &Recorded| {
        (500, r#"{"error_code":"INTERNAL_ERROR","message":"boom"}"#.into())
    }))
    .await;

    let err = client
        .set_model_version_tag("m", 1, APPROVAL_TAG, "pending")
        .await
        .unwrap_err();
    match err {
        PlError::Tracking(TrackingError::Api {
            status, message, ..
        }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "INTERNAL_ERROR: boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn downloads_proxied_tree() {
    let (client, _log) = fake_server(Arc::new(|req: &Recorded| {
        match req.target.as_str() {
            "/api/2.0/mlflow-artifacts/artifacts?path=7%2Fr3%2Fartifacts%2Fmodel" => (
                200,
                r#"{"files":[{"path":"MLmodel","is_dir":false,"file_size":12},{"path":"data","is_dir":true}]}"#.into(),
            ),
            "/api/2.0/mlflow-artifacts/artifacts?path=7%2Fr3%2Fartifacts%2Fmodel%2Fdata" => (
                200,
                r#"{"files":[{"path":"model/data/weights.json","is_dir":false,"file_size":2}]}"#.into(),
            ),
            "/api/2.0/mlflow-artifacts/artifacts/7/r3/artifacts/model/MLmodel" => {
                (200, "flavor: test".into())
            }
            "/api/2.0/mlflow-artifacts/artifacts/7/r3/artifacts/model/data/weights.json" => {
                (200, "{}".into())
            }
            _ => (404, "{}".into()),
        }
    }))
    .await;

    let out = tempdir().unwrap();
    let root = client
        .download_artifacts("mlflow-artifacts:/7/r3/artifacts/model", out.path())
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(root.join("MLmodel")).unwrap(), "flavor: test");
    assert_eq!(std::fs::read_to_string(root.join("data/weights.json")).unwrap(), "{}");
}

#[tokio::test]
async fn uploads_artifacts_through_proxy() {
    let (client, log) = fake_server(Arc::new(|_: &Recorded| (200, "{}".into()))).await;

    let local = tempdir().unwrap();
    std::fs::create_dir_all(local.path().join("nested")).unwrap();
    std::fs::write(local.path().join("MLmodel"), "flavor").unwrap();
    std::fs::write(local.path().join("nested/model.json"), "{\"c\":1}").unwrap();

    let run = RunInfo {
        run_id: "r1".into(),
        run_name: "parent".into(),
        experiment_id: "7".into(),
        artifact_uri: "mlflow-artifacts:/7/r1/artifacts".into(),
        parent_run_id: None,
    };
    client.log_artifacts(&run, local.path(), "model").await.unwrap();

    let mut puts: Vec<(String, String)> = log
        .lock()
        .iter()
        .filter(|r| r.method == "PUT")
        .map(|r| (r.target.clone(), r.body.clone()))
        .collect();
    puts.sort();
    assert_eq!(
        puts,
        vec![
            (
                "/api/2.0/mlflow-artifacts/artifacts/7/r1/artifacts/model/MLmodel".to_string(),
                "flavor".to_string()
            ),
            (
                "/api/2.0/mlflow-artifacts/artifacts/7/r1/artifacts/model/nested/model.json"
                    .to_string(),
                "{\"c\":1}".to_string()
            ),
        ]
    );
}
