use bytes::Bytes;
use harbor::http::response::{Response, ResponseBuilder, StatusCode};
use harbor::http::writer::{ResponseWriter, to_buffers};

fn wire(response: &Response) -> String {
    let mut out = Vec::new();
    for buf in to_buffers(response) {
        out.extend_from_slice(&buf);
    }
    String::from_utf8(out).unwrap()
}

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::Created.as_u16(), 201);
    assert_eq!(StatusCode::NoContent.as_u16(), 204);
    assert_eq!(StatusCode::Found.as_u16(), 302);
    assert_eq!(StatusCode::BadRequest.as_u16(), 400);
    assert_eq!(StatusCode::NotFound.as_u16(), 404);
    assert_eq!(StatusCode::MethodNotAllowed.as_u16(), 405);
    assert_eq!(StatusCode::InternalServerError.as_u16(), 500);
    assert_eq!(StatusCode::ServiceUnavailable.as_u16(), 503);
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    assert_eq!(StatusCode::NoContent.reason_phrase(), "No Content");
    assert_eq!(StatusCode::BadRequest.reason_phrase(), "Bad Request");
    assert_eq!(StatusCode::NotFound.reason_phrase(), "Not Found");
    assert_eq!(
        StatusCode::InternalServerError.reason_phrase(),
        "Internal Server Error"
    );
}

#[test]
fn test_response_builder_with_headers() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/plain")
        .header("X-Custom", "value")
        .body("test")
        .build();

    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert_eq!(response.header("X-Custom"), Some("value"));
    assert_eq!(response.header("Content-Length"), Some("4"));
}

#[test]
fn test_response_builder_preserves_custom_content_length() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Length", "999")
        .body("test")
        .build();

    assert_eq!(response.header("Content-Length"), Some("999"));
    assert_eq!(response.headers.len(), 1);
}

#[test]
fn test_response_builder_segments() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .body("Hello, ")
        .chunk("World")
        .chunk("")
        .chunk("!")
        .build();

    assert_eq!(response.body.len(), 3);
    assert_eq!(response.body_len(), 13);
    assert_eq!(response.body_bytes(), b"Hello, World!");
}

#[test]
fn test_response_builder_empty_body() {
    let response = ResponseBuilder::new(StatusCode::Ok).build();

    assert_eq!(response.body_len(), 0);
    assert_eq!(response.header("Content-Length"), Some("0"));
}

#[test]
fn test_set_header_replaces_case_insensitively() {
    let mut response = Response::default();
    response.add_header("x-id", "1");
    response.add_header("X-Id", "2");
    response.set_header("X-ID", "3");

    assert_eq!(response.headers.len(), 1);
    assert_eq!(response.header("x-id"), Some("3"));
}

#[test]
fn test_stock_reply_bad_request() {
    let response = Response::bad_request();

    assert_eq!(response.status, StatusCode::BadRequest);
    assert_eq!(response.header("Content-Type"), Some("text/html"));
    let body = String::from_utf8(response.body_bytes()).unwrap();
    assert!(body.contains("400 Bad Request"));
    assert_eq!(response.header("Content-Length"), Some(body.len().to_string().as_str()));
}

#[test]
fn test_stock_reply_without_body() {
    let response = Response::stock_reply(StatusCode::NoContent);
    assert_eq!(response.body_len(), 0);
    assert_eq!(response.header("Content-Length"), None);
}

#[test]
fn test_to_buffers_wire_format() {
    let mut response = Response::new(StatusCode::Created);
    response.set_header("Content-Type", "text/plain");
    response.append_body("abc");
    response.append_body("def");

    let text = wire(&response);
    assert_eq!(
        text,
        "HTTP/1.1 201 Created\r\nContent-Type: text/plain\r\nContent-Length: 6\r\nConnection: close\r\n\r\nabcdef"
    );
}

#[test]
fn test_to_buffers_shares_body_segments() {
    let segment = Bytes::from(vec![7u8; 4096]);
    let mut response = Response::default();
    response.append_body(segment.clone());

    let buffers = to_buffers(&response);
    assert_eq!(buffers.len(), 2);
    assert_eq!(buffers[1].as_ptr(), segment.as_ptr());
}

#[test]
fn test_to_buffers_omits_body_for_no_content() {
    let mut response = Response::new(StatusCode::NoContent);
    response.append_body("ignored");

    let text = wire(&response);
    assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
    assert!(!text.contains("Content-Length"));
    assert!(text.ends_with("\r\n\r\n"));
}

#[tokio::test]
async fn test_response_writer_writes_everything() {
    let response = Response::ok("payload");
    let mut writer = ResponseWriter::new(&response);
    let expected = writer.remaining();

    let mut out: Vec<u8> = Vec::new();
    writer.write_to_stream(&mut out).await.unwrap();

    assert_eq!(writer.written(), expected);
    assert_eq!(writer.remaining(), 0);
    assert!(out.ends_with(b"\r\n\r\npayload"));
}
