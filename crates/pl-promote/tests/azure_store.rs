use parking_lot::Mutex;
use pl_promote::{AzureBlobStore, BlobStore, ConnectionString};
use pl_types::{PlError, StorageError};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Recorded {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
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
    let headers: Vec<(String, String)> = head
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
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
        headers,
        body: buf[header_end..].to_vec(),
    };
    let (status, body) = handler(&recorded);
    log.lock().push(recorded);

    let response = format!(
        "HTTP/1.1 {status} X\r\nContent-Type: application/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

async fn fake_azure(handler: Handler) -> (AzureBlobStore, Log) {
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

    let connection = ConnectionString::parse(&format!(
        "BlobEndpoint=http://{addr}/devstoreaccount1;SharedAccessSignature=sv=2021-08-06&sig=abc"
    ))
    .unwrap();
    (AzureBlobStore::new(&connection, "models").unwrap(), log)
}

#[tokio::test]
async fn puts_block_blob_with_sas() {
    let (store, log) = fake_azure(Arc::new(|_: &Recorded| (201, String::new()))).await;

    store
        .upload_blob("iris_v3/data/model.json", b"{\"c\":0.5}".to_vec(), true)
        .await
        .unwrap();

    let log = log.lock();
    assert_eq!(log.len(), 1);
    let req = &log[0];
    assert_eq!(req.method, "PUT");
    assert_eq!(
        req.target,
        "/devstoreaccount1/models/iris_v3/data/model.json?sv=2021-08-06&sig=abc"
    );
    assert_eq!(req.header("x-ms-blob-type"), Some("BlockBlob"));
    assert!(req.header("x-ms-version").is_some());
    assert_eq!(req.header("If-None-Match"), None);
    assert_eq!(req.body, b"{\"c\":0.5}");
}

#[tokio::test]
async fn no_overwrite_sends_precondition_and_maps_conflict() {
    let (store, log) = fake_azure(Arc::new(|_: &Recorded| {
        (
            409,
            "<?xml version=\"1.0\"?><Error><Code>BlobAlreadyExists</Code></Error>".into(),
        )
    }))
    .await;

    let err = store
        .upload_blob("iris_v3/MLmodel", b"x".to_vec(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, PlError::Storage(StorageError::AlreadyExists { .. })));
    assert_eq!(log.lock()[0].header("If-None-Match"), Some("*"));
}

#[tokio::test]
async fn service_errors_carry_blob_and_code() {
    let (store, _log) = fake_azure(Arc::new(|_: &Recorded| {
        (
            403,
            "<?xml version=\"1.0\"?><Error><Code>AuthorizationFailure</Code></Error>".into(),
        )
    }))
    .await;

    let err = store
        .upload_blob("iris_v3/MLmodel", b"x".to_vec(), true)
        .await
        .unwrap_err();
    match err {
        PlError::Storage(StorageError::Upload { blob, message }) => {
            assert_eq!(blob, "iris_v3/MLmodel");
            assert!(message.contains("403"));
            assert!(message.contains("AuthorizationFailure"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
