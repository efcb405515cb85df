use std::sync::{Arc, Mutex};
use std::time::Duration;

use harbor::config::ServerConfig;
use harbor::http::{ConnectionState, Handler, Request, Response, ServerConnection};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

/// Records every dispatched request and every reported connection error.
#[derive(Default)]
struct Recorder {
    requests: Mutex<Vec<Request>>,
    logs: Mutex<Vec<String>>,
}

impl Recorder {
    fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    fn logs(&self) -> Vec<String> {
        self.logs.lock().unwrap().clone()
    }
}

impl Handler for Recorder {
    fn handle(&self, request: &Request, response: &mut Response) {
        self.requests.lock().unwrap().push(request.clone());
        response.set_header("Content-Type", "text/plain");
        response.append_body(format!("{} {}|", request.method, request.target));
        response.append_body(request.body.clone().freeze());
    }

    fn log(&self, message: &str) {
        self.logs.lock().unwrap().push(message.to_string());
    }
}

fn serve(config: &ServerConfig) -> (DuplexStream, Arc<Recorder>, tokio::task::JoinHandle<()>) {
    let (client, server) = duplex(4096);
    let recorder = Arc::new(Recorder::default());
    let task = ServerConnection::new(server, recorder.clone(), config).start();
    (client, recorder, task)
}

/// Writes each piece separately, pausing so the server sees distinct reads.
async fn send_pieces(client: &mut DuplexStream, pieces: &[&[u8]]) {
    for piece in pieces {
        client.write_all(piece).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn read_response(client: &mut DuplexStream) -> String {
    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

fn body_of(response: &str) -> &str {
    response.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or("")
}

#[tokio::test]
async fn test_get_in_single_read() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    client
        .write_all(b"GET /hello HTTP/1.1\r\nHost: test\r\n\r\n")
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Connection: close\r\n"));
    assert_eq!(body_of(&response), "GET /hello|");

    let requests = recorder.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header("host"), Some("test"));
    assert!(recorder.logs().is_empty());
}

#[tokio::test]
async fn test_head_split_across_reads() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    send_pieces(&mut client, &[b"GET /sp", b"lit HTTP/1.1\r\nHo", b"st: x\r\n", b"\r\n"]).await;
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert_eq!(body_of(&response), "GET /split|");
    assert_eq!(recorder.requests().len(), 1);
}

#[tokio::test]
async fn test_post_body_in_same_read_as_head() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    client
        .write_all(b"POST /submit HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello")
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert_eq!(body_of(&response), "POST /submit|hello");
    assert_eq!(&recorder.requests()[0].body[..], b"hello");
}

#[tokio::test]
async fn test_post_body_split_across_reads() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    send_pieces(
        &mut client,
        &[b"PUT /item HTTP/1.1\r\nContent-Length: 11\r\n\r\nhel", b"lo wo", b"rld"],
    )
    .await;
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert_eq!(body_of(&response), "PUT /item|hello world");
    assert_eq!(&recorder.requests()[0].body[..], b"hello world");
}

#[tokio::test]
async fn test_body_is_trimmed_to_content_length() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    client
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcdef")
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert_eq!(&recorder.requests()[0].body[..], b"abc");
    assert_eq!(body_of(&response), "POST /|abc");
}

#[tokio::test]
async fn test_zero_content_length_dispatches_once() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    client
        .write_all(b"POST /empty HTTP/1.1\r\nContent-Length: 0\r\n\r\n")
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    let requests = recorder.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].body.is_empty());
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
}

#[tokio::test]
async fn test_get_ignores_content_length() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    client
        .write_all(b"GET / HTTP/1.1\r\nContent-Length: 4\r\n\r\n")
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(recorder.requests()[0].body.is_empty());
}

#[tokio::test]
async fn test_malformed_request_gets_400() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    client.write_all(b"BOGUS / HTTP/1.1\r\n\r\n").await.unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(recorder.requests().is_empty());
}

#[tokio::test]
async fn test_post_without_content_length_gets_400() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    client
        .write_all(b"POST /upload HTTP/1.1\r\nHost: x\r\n\r\nbody")
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(recorder.requests().is_empty());
}

#[tokio::test]
async fn test_invalid_content_length_gets_400() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    client
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n")
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(recorder.requests().is_empty());
}

#[tokio::test]
async fn test_eof_mid_body_closes_without_response() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    send_pieces(&mut client, &[b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc"]).await;
    client.shutdown().await.unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert!(response.is_empty());
    assert!(recorder.requests().is_empty());
    assert_eq!(recorder.logs().len(), 1);
}

#[tokio::test]
async fn test_eof_mid_head_is_reported() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    send_pieces(&mut client, &[b"GET / HTTP/1.1\r\nHost:"]).await;
    client.shutdown().await.unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert!(response.is_empty());
    assert!(recorder.requests().is_empty());
    assert_eq!(recorder.logs().len(), 1);
}

#[tokio::test]
async fn test_immediate_eof_is_silent() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    client.shutdown().await.unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert!(response.is_empty());
    assert!(recorder.requests().is_empty());
    assert!(recorder.logs().is_empty());
}

#[tokio::test]
async fn test_one_byte_read_buffer() {
    let config = ServerConfig {
        read_buffer_size: 1,
        ..ServerConfig::default()
    };
    let (mut client, recorder, task) = serve(&config);

    client
        .write_all(b"PATCH /tiny HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcdEXTRA")
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert_eq!(body_of(&response), "PATCH /tiny|abcd");
    assert_eq!(recorder.requests().len(), 1);
}

#[tokio::test]
async fn test_header_limit_rejects_oversized_head() {
    let config = ServerConfig {
        max_header_bytes: 64,
        ..ServerConfig::default()
    };
    let (mut client, recorder, task) = serve(&config);

    let head = format!("GET / HTTP/1.1\r\nX-Big: {}\r\n\r\n", "a".repeat(200));
    client.write_all(head.as_bytes()).await.unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(recorder.requests().is_empty());
}

#[tokio::test]
async fn test_new_connection_starts_reading() {
    let (_client, server) = duplex(64);
    let conn = ServerConnection::new(server, Arc::new(Recorder::default()), &ServerConfig::default());
    assert_eq!(conn.state(), ConnectionState::Reading);
}

#[tokio::test]
async fn test_closure_handler() {
    let (mut client, server) = duplex(1024);
    let handler = Arc::new(|_req: &Request, res: &mut Response| {
        res.append_body("from closure");
    });
    let task = ServerConnection::new(server, handler, &ServerConfig::default()).start();

    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert_eq!(body_of(&response), "from closure");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_connections() {
    let recorder = Arc::new(Recorder::default());
    let mut clients = Vec::new();

    for i in 0..50 {
        let (mut client, server) = duplex(1024);
        ServerConnection::new(server, recorder.clone(), &ServerConfig::default()).start();

        clients.push(tokio::spawn(async move {
            let body = format!("payload-{}", i);
            let head = format!("POST /c/{} HTTP/1.1\r\nContent-Length: {}\r\n\r\n", i, body.len());
            client.write_all(head.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            client.write_all(body.as_bytes()).await.unwrap();

            let response = read_response(&mut client).await;
            assert_eq!(body_of(&response), format!("POST /c/{}|{}", i, body));
        }));
    }

    for client in clients {
        client.await.unwrap();
    }
    assert_eq!(recorder.requests().len(), 50);
}

#[tokio::test]
async fn test_absurd_content_length_gets_413() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    client
        .write_all(b"POST /x HTTP/1.1\r\nHost: y\r\nContent-Length: 100000000000000\r\n\r\nab")
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    assert!(recorder.requests().is_empty());
}

#[tokio::test]
async fn test_body_limit_is_inclusive() {
    let config = ServerConfig {
        max_body_bytes: 4,
        ..ServerConfig::default()
    };

    let (mut client, recorder, task) = serve(&config);
    client
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcd")
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();
    assert_eq!(body_of(&response), "POST /|abcd");
    assert_eq!(recorder.requests().len(), 1);

    let (mut client, recorder, task) = serve(&config);
    client
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nabcde")
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();
    assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    assert!(recorder.requests().is_empty());
}

#[tokio::test]
async fn test_signed_content_length_gets_400() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    client
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: +3\r\n\r\nabc")
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(recorder.requests().is_empty());
}

#[tokio::test]
async fn test_body_larger_than_read_buffer() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    let body: Vec<u8> = (0..5000u32).map(|i| b'a' + (i % 26) as u8).collect();
    let head = format!("POST /big HTTP/1.1\r\nContent-Length: {}\r\n\r\n", body.len());
    client.write_all(head.as_bytes()).await.unwrap();
    for piece in body.chunks(700) {
        client.write_all(piece).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let response = read_response(&mut client).await;
    task.await.unwrap();

    let requests = recorder.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(&requests[0].body[..], &body[..]);
    assert_eq!(body_of(&response).len(), "POST /big|".len() + body.len());
}

#[tokio::test]
async fn test_head_response_has_no_body() {
    let (mut client, recorder, task) = serve(&ServerConfig::default());

    client.write_all(b"HEAD /h HTTP/1.1\r\n\r\n").await.unwrap();
    let response = read_response(&mut client).await;
    task.await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    // Length of the body a GET would have produced: "HEAD /h|"
    assert!(response.contains("Content-Length: 8\r\n"));
    assert!(response.ends_with("\r\n\r\n"));
    assert_eq!(recorder.requests().len(), 1);
}
