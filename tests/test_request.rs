use harbor::http::request::{ContentLengthError, Header, Method, Request, RequestBuilder};

fn request_with(headers: &[(&str, &str)]) -> Request {
    Request {
        method: Method::POST,
        target: "/api".to_string(),
        version: "HTTP/1.1".to_string(),
        headers: headers.iter().map(|(k, v)| Header::new(*k, *v)).collect(),
        body: Default::default(),
    }
}

#[test]
fn test_request_header_retrieval() {
    let req = request_with(&[("Host", "example.com"), ("Content-Type", "application/json")]);

    assert_eq!(req.header("Host"), Some("example.com"));
    assert_eq!(req.header("content-type"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
}

#[test]
fn test_request_content_length_parsing() {
    let req = request_with(&[("Content-Length", "42")]);
    assert_eq!(req.content_length().map(|r| r.ok()), Some(Some(42)));
}

#[test]
fn test_request_content_length_missing() {
    let req = request_with(&[]);
    assert!(req.content_length().is_none());
}

#[test]
fn test_request_content_length_invalid() {
    for value in ["not-a-number", "-1", "", "12abc"] {
        let req = request_with(&[("Content-Length", value)]);
        assert!(matches!(req.content_length(), Some(Err(_))), "value {:?}", value);
    }
}

#[test]
fn test_request_content_length_rejects_signs_and_overflow() {
    for value in ["+5", "5 5", "0x10"] {
        let req = request_with(&[("Content-Length", value)]);
        assert_eq!(req.content_length(), Some(Err(ContentLengthError::NotDigits)), "value {:?}", value);
    }

    let req = request_with(&[("Content-Length", "99999999999999999999999999")]);
    assert_eq!(req.content_length(), Some(Err(ContentLengthError::Overflow)));
}

#[test]
fn test_request_content_length_case_insensitive() {
    let req = request_with(&[("content-length", " 7 ")]);
    assert_eq!(req.content_length().map(|r| r.ok()), Some(Some(7)));
}

#[test]
fn test_request_method_equality() {
    assert_eq!(Method::GET, Method::GET);
    assert_ne!(Method::GET, Method::POST);
}

#[test]
fn test_request_method_from_string() {
    assert_eq!(Method::from_str("GET"), Some(Method::GET));
    assert_eq!(Method::from_str("POST"), Some(Method::POST));
    assert_eq!(Method::from_str("CONNECT"), Some(Method::CONNECT));
    assert_eq!(Method::from_str("INVALID"), None);
    assert_eq!(Method::from_str("get"), None); // Case-sensitive
}

#[test]
fn test_methods_expecting_body() {
    assert!(Method::POST.expects_body());
    assert!(Method::PUT.expects_body());
    assert!(Method::PATCH.expects_body());
    assert!(!Method::GET.expects_body());
    assert!(!Method::DELETE.expects_body());
    assert!(!Method::HEAD.expects_body());
}

#[test]
fn test_request_builder() {
    let req = RequestBuilder::new()
        .method(Method::PUT)
        .target("/item/1")
        .header("X-A", "1")
        .header("X-A", "2")
        .body("payload")
        .build()
        .unwrap();

    assert_eq!(req.version, "HTTP/1.1");
    assert_eq!(req.header_all("x-a").collect::<Vec<_>>(), ["1", "2"]);
    assert_eq!(&req.body[..], b"payload");
}

#[test]
fn test_request_builder_requires_method_and_target() {
    assert!(RequestBuilder::new().target("/").build().is_err());
    assert!(RequestBuilder::new().method(Method::GET).build().is_err());
}
