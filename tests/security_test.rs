// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 安全回归测试
//!
//! 以常见攻击报文请求真实运行的服务器，确认不会越过网站根目录、
//! 不会被畸形报文打挂，也不会把请求内容反射进响应头。

use std::{fs, net::SocketAddr, time::Duration};

use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use webserver::{Server, ServerConfig};

/// 根目录之外放一个 `secret.txt`，用来检测路径遍历
async fn start(dirs: bool) -> (TempDir, SocketAddr) {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("secret.txt"), "top secret").unwrap();
    let www = dir.path().join("www");
    fs::create_dir(&www).unwrap();
    fs::write(www.join("index.html"), "hi").unwrap();

    let config = ServerConfig::new()
        .root(www.to_str().unwrap())
        .addr("127.0.0.1:0")
        .dirs(dirs);
    let server = Server::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (dir, addr)
}

/// 写入失败（服务器提前关闭连接）时仍尝试读取已经返回的内容
async fn send_request(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let _ = stream.write_all(request).await;
    let mut buffer = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buffer)).await;
    String::from_utf8_lossy(&buffer).to_string()
}

/// 从原始响应字符串中提取 HTTP 状态码
fn extract_status_code(response: &str) -> u16 {
    response
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_path_traversal_simple() {
    let (_dir, addr) = start(false).await;
    for path in ["/../secret.txt", "/../../secret.txt", "/a/../../secret.txt", "//../secret.txt"] {
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
        let response = send_request(addr, request.as_bytes()).await;
        assert_eq!(extract_status_code(&response), 404, "{}", path);
        assert!(!response.contains("top secret"));
    }
}

#[tokio::test]
async fn test_path_traversal_encoded() {
    let (_dir, addr) = start(true).await;
    for path in ["/%2e%2e%2fsecret.txt", "/..%2fsecret.txt", "/%2e%2e/%2e%2e/secret.txt"] {
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
        let response = send_request(addr, request.as_bytes()).await;
        assert_eq!(extract_status_code(&response), 404, "{}", path);
        assert!(!response.contains("top secret"));
    }
}

#[tokio::test]
async fn test_listing_cannot_escape_root() {
    let (_dir, addr) = start(true).await;
    let response = send_request(addr, b"GET /../ HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    // 被收敛到根目录，返回的是 index.html
    assert_eq!(extract_status_code(&response), 200);
    assert!(!response.contains("secret.txt"));
}

#[tokio::test]
async fn test_null_byte_injection() {
    let (_dir, addr) = start(false).await;
    for request in [
        &b"GET /index.html\0.jpg HTTP/1.1\r\nHost: localhost\r\n\r\n"[..],
        &b"GET /index.html%00.jpg HTTP/1.1\r\nHost: localhost\r\n\r\n"[..],
    ] {
        let response = send_request(addr, request).await;
        assert_eq!(extract_status_code(&response), 400);
    }
}

#[tokio::test]
async fn test_backslash_rejected() {
    let (_dir, addr) = start(false).await;
    let response = send_request(addr, b"GET /..%5csecret.txt HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert_eq!(extract_status_code(&response), 400);
}

#[tokio::test]
async fn test_non_utf8_request() {
    let (_dir, addr) = start(false).await;
    let response = send_request(addr, b"GET /\xff\xfe HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert_eq!(extract_status_code(&response), 400);
}

#[tokio::test]
async fn test_oversized_header() {
    let (_dir, addr) = start(false).await;
    let attack = format!(
        "GET / HTTP/1.1\r\nHost: localhost\r\nX-Custom: {}\r\n\r\n",
        "X".repeat(20000)
    );
    let response = send_request(addr, attack.as_bytes()).await;
    // 服务器可能在读完请求前就关闭连接，此时客户端读不到响应
    assert_ne!(extract_status_code(&response), 200);

    // 服务器仍然正常工作
    let response = send_request(addr, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert_eq!(extract_status_code(&response), 200);
}

#[tokio::test]
async fn test_malformed_http_version() {
    let (_dir, addr) = start(false).await;
    for attack in [
        "GET / HTTP/999.999\r\nHost: localhost\r\n\r\n",
        "GET / HTTP/A.B\r\nHost: localhost\r\n\r\n",
        "GET / INVALID\r\nHost: localhost\r\n\r\n",
    ] {
        let response = send_request(addr, attack.as_bytes()).await;
        assert_eq!(extract_status_code(&response), 400, "{:?}", attack);
    }
}

#[tokio::test]
async fn test_missing_host_header() {
    let (_dir, addr) = start(false).await;
    let response = send_request(addr, b"GET / HTTP/1.0\r\n\r\n").await;
    assert_eq!(extract_status_code(&response), 200);
}

#[tokio::test]
async fn test_crlf_injection() {
    let (_dir, addr) = start(false).await;
    for attack in [
        "GET /\r\nX-Injected: header HTTP/1.1\r\nHost: localhost\r\n\r\n",
        "GET /%0d%0aX-Injected:%20header HTTP/1.1\r\nHost: localhost\r\n\r\n",
    ] {
        let response = send_request(addr, attack.as_bytes()).await;
        let head = response.split("\r\n\r\n").next().unwrap_or_default();
        assert!(!head.contains("X-Injected"), "CRLF 注入应该被防止");
    }
}

#[tokio::test]
async fn test_special_characters_in_path() {
    let (_dir, addr) = start(false).await;
    for request in [
        "GET /<script>alert('xss')</script> HTTP/1.1\r\nHost: localhost\r\n\r\n",
        "GET /'; DROP TABLE users-- HTTP/1.1\r\nHost: localhost\r\n\r\n",
        "GET /${{7*7}} HTTP/1.1\r\nHost: localhost\r\n\r\n",
    ] {
        let status = extract_status_code(&send_request(addr, request.as_bytes()).await);
        assert!(status == 400 || status == 404, "status={} for {:?}", status, request);
    }
}

#[tokio::test]
async fn test_client_closes_without_request() {
    let (_dir, addr) = start(false).await;
    drop(TcpStream::connect(addr).await.unwrap());
    let response = send_request(addr, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert_eq!(extract_status_code(&response), 200);
}
