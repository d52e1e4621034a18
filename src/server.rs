// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 服务器流水线
//!
//! 根据 [`ServerConfig`] 组装处理链：
//!
//! ```text
//! RequestLogger -> HostRedirect -> FileServer
//!     -> RestrictedFileSystem (未开启目录列表时)
//!     -> CachingFileSystem (cache > 0 时)
//!     -> DirFileSystem(root)
//! ```
//!
//! 然后在配置的地址上监听 HTTP，或在同时给出证书与私钥时监听 HTTPS。
//! 每个连接由一个 tokio 任务处理，处理链本身是阻塞的，运行在 `spawn_blocking` 上。
//! 启动失败以错误返回，是否退出进程由调用方决定。

use std::{
    fs::File as StdFile,
    io::{self, BufReader, Read},
    net::SocketAddr,
    sync::Arc,
};

use bytes::Bytes;
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    sync::mpsc,
    time::timeout,
};
use tokio_rustls::{rustls, TlsAcceptor};

use crate::{
    cache::CachingFileSystem,
    config::ServerConfig,
    exception::Exception,
    handler::{FileServer, Handler},
    logger::RequestLogger,
    param::{DEFAULT_MAX_CACHE_FILE_SIZE, MAX_HEADER_SIZE, REQUEST_READ_TIMEOUT, STREAM_CHUNK_SIZE},
    redirect::HostRedirect,
    request::Request,
    response::Response,
    restrict::RestrictedFileSystem,
    vfs::{DirFileSystem, File, FileSystem},
};

/// 按配置组装文件系统层
pub fn build_filesystem(config: &ServerConfig) -> Box<dyn FileSystem> {
    let mut fs: Box<dyn FileSystem> = Box::new(DirFileSystem::new(config.www_root()));
    if !config.cache_timeout().is_zero() {
        fs = Box::new(
            CachingFileSystem::new(fs, config.cache_timeout())
                .with_max_file_size(config.cache_file_size_limit()),
        );
    }
    if !config.allow_dirs() {
        fs = Box::new(RestrictedFileSystem::new(fs, config.directory_policy()));
    }
    fs
}

/// 按配置组装完整的处理链。缓存上限同时是分块发送的阈值，`0` 时退回默认值。
pub fn build_handler(config: &ServerConfig, tls: bool) -> Box<dyn Handler> {
    let threshold = match config.cache_file_size_limit() {
        0 => DEFAULT_MAX_CACHE_FILE_SIZE,
        limit => limit,
    };
    let handler = FileServer::new(build_filesystem(config)).with_stream_threshold(threshold);
    let handler = HostRedirect::new(handler, config.redirect_table().clone()).with_tls(tls);
    Box::new(RequestLogger::new(handler))
}

/// 从 PEM 文件加载证书链与私钥
pub fn load_tls(cert_path: &str, key_path: &str) -> io::Result<TlsAcceptor> {
    let mut cert_reader = BufReader::new(StdFile::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no certificate found in {}", cert_path),
        ));
    }

    let mut key_reader = BufReader::new(StdFile::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no private key found in {}", key_path),
        )
    })?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut tls_config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(io::Error::other)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(io::Error::other)?;
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

pub struct Server {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    handler: Arc<dyn Handler>,
}

impl Server {
    /// 加载 TLS 凭据并绑定端口。失败时返回带有地址与原因的 `Exception::Listen`。
    pub async fn bind(config: &ServerConfig) -> Result<Self, Exception> {
        let socket = config.socket_addr()?;
        let listen_error = |source: io::Error| Exception::Listen {
            addr: config.listen_addr().to_string(),
            source,
        };

        let acceptor = match config.tls_paths()? {
            Some((cert, key)) => Some(load_tls(cert, key).map_err(listen_error)?),
            None => None,
        };

        let listener = TcpListener::bind(socket).await.map_err(listen_error)?;
        let handler: Arc<dyn Handler> = Arc::from(build_handler(config, acceptor.is_some()));

        info!(
            "{}服务端将在{}上监听Socket连接",
            if acceptor.is_some() { "HTTPS" } else { "HTTP" },
            socket
        );
        Ok(Self {
            listener,
            acceptor,
            handler,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn is_tls(&self) -> bool {
        self.acceptor.is_some()
    }

    /// 主事件循环，持续接收新连接并分发到 tokio 线程池
    pub async fn run(self) {
        let mut id: u128 = 0;
        loop {
            let (stream, remote) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("接受连接失败：{}", e);
                    continue;
                }
            };
            debug!("[ID{}]TCP连接已建立：{}", id, remote);

            let handler = Arc::clone(&self.handler);
            let acceptor = self.acceptor.clone();
            tokio::spawn(async move {
                let result = match acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => handle_connection(tls_stream, remote, id, handler).await,
                        Err(e) => {
                            warn!("[ID{}]TLS握手失败：{}", id, e);
                            return;
                        }
                    },
                    None => handle_connection(stream, remote, id, handler).await,
                };
                if let Err(e) = result {
                    debug!("[ID{}]连接处理中断：{}", id, e);
                }
            });
            id += 1;
        }
    }
}

/// 读取请求头（到空行为止），超过大小或时限时返回 `RequestTooLarge`
async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Option<Vec<u8>>, Exception> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return match buffer.is_empty() {
                true => Ok(None),
                false => Err(Exception::RequestTooLarge),
            };
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_head_end(&buffer) {
            buffer.truncate(end);
            return Ok(Some(buffer));
        }
        if buffer.len() > MAX_HEADER_SIZE {
            return Err(Exception::RequestTooLarge);
        }
    }
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

async fn handle_connection<S>(
    mut stream: S,
    remote: SocketAddr,
    id: u128,
    handler: Arc<dyn Handler>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = match timeout(REQUEST_READ_TIMEOUT, read_head(&mut stream)).await {
        Ok(Ok(Some(head))) => head,
        // 客户端主动关闭连接
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(Exception::Io(e))) => return Err(e),
        Ok(Err(e)) => {
            let code = status_for_exception(&e);
            warn!("[ID{}]读取请求失败：{}，返回{}", id, e, code);
            return write_response(&mut stream, Response::from_status_code(code, &[], false), id).await;
        }
        Err(_) => {
            warn!("[ID{}]读取请求超时，返回408", id);
            return write_response(&mut stream, Response::from_status_code(408, &[], false), id).await;
        }
    };

    let request = match Request::try_from(&head, id) {
        Ok(req) => req.with_remote_addr(remote),
        Err(e) => {
            let code = status_for_exception(&e);
            warn!("[ID{}]解析HTTP请求失败：{}，返回{}", id, e, code);
            return write_response(&mut stream, Response::from_status_code(code, &[], false), id).await;
        }
    };

    let response = match tokio::task::spawn_blocking(move || handler.serve(&request)).await {
        Ok(response) => response,
        Err(e) => {
            error!("[ID{}]处理请求的任务异常退出：{}", id, e);
            Response::from_status_code(500, &[], false)
        }
    };
    write_response(&mut stream, response, id).await
}

/// 报文问题返回 400，其余视为服务器内部错误
fn status_for_exception(e: &Exception) -> u16 {
    match e.is_bad_request() {
        true => 400,
        false => 500,
    }
}

/// 写出响应头与内存中的响应体，再分块发送流式响应体，最后关闭连接
async fn write_response<S: AsyncWrite + Unpin>(stream: &mut S, mut response: Response, id: u128) -> io::Result<()> {
    stream.write_all(&response.as_bytes()).await?;
    if let Some(file) = response.take_stream() {
        let sent = send_stream(stream, file, response.content_length()).await?;
        if sent < response.content_length() {
            warn!(
                "[ID{}]文件在发送过程中变短，仅发送了{}/{} bytes",
                id,
                sent,
                response.content_length()
            );
        }
    }
    stream.flush().await?;
    stream.shutdown().await
}

/// 在阻塞线程上按块读取文件，经通道交给异步端写出。返回实际写出的字节数。
async fn send_stream<S: AsyncWrite + Unpin>(stream: &mut S, file: Box<dyn File>, len: u64) -> io::Result<u64> {
    let (tx, mut rx) = mpsc::channel::<io::Result<Bytes>>(4);
    let reader = tokio::task::spawn_blocking(move || {
        let mut file = file.take(len);
        loop {
            let mut chunk = vec![0u8; STREAM_CHUNK_SIZE];
            let chunk = match file.read(&mut chunk) {
                Ok(0) => return,
                Ok(n) => {
                    chunk.truncate(n);
                    Ok(Bytes::from(chunk))
                }
                Err(e) => Err(e),
            };
            let failed = chunk.is_err();
            // 接收端已关闭说明客户端断开，不再继续读取
            if tx.blocking_send(chunk).is_err() || failed {
                return;
            }
        }
    });

    let mut sent = 0;
    while let Some(chunk) = rx.recv().await {
        let chunk = chunk?;
        stream.write_all(&chunk).await?;
        sent += chunk.len() as u64;
    }
    reader.await.map_err(io::Error::other)?;
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{param::HttpRequestMethod, restrict::DirectoryPolicy};
    use std::{fs, time::Duration};
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.html"), "hi").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("a.txt"), "aaa").unwrap();
        dir
    }

    fn config(dir: &TempDir) -> ServerConfig {
        ServerConfig::new().root(dir.path().to_str().unwrap())
    }

    fn status(handler: &dyn Handler, path: &str) -> u16 {
        handler.serve(&Request::new(HttpRequestMethod::Get, path)).status_code()
    }

    #[test]
    fn test_exception_status() {
        assert_eq!(status_for_exception(&Exception::RequestTooLarge), 400);
        assert_eq!(status_for_exception(&Exception::InvalidPath), 400);
        assert_eq!(status_for_exception(&Exception::Config("x".to_string())), 500);
    }

    #[tokio::test]
    async fn test_write_response_streams_file() {
        let dir = TempDir::new().unwrap();
        let content: Vec<u8> = (0..STREAM_CHUNK_SIZE * 2 + 100).map(|i| (i % 251) as u8).collect();
        fs::write(dir.path().join("big.bin"), &content).unwrap();
        let file = DirFileSystem::new(dir.path()).open("/big.bin").unwrap();
        let response = Response::from_stream(file, content.len() as u64, "application/octet-stream", false);

        let mut output = Vec::new();
        write_response(&mut output, response, 0).await.unwrap();
        let head_end = find_head_end(&output).unwrap();
        assert!(String::from_utf8_lossy(&output[..head_end]).contains(&format!("Content-Length: {}", content.len())));
        assert_eq!(&output[head_end..], &content[..]);
    }

    #[tokio::test]
    async fn test_stream_stops_at_length() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "0123456789").unwrap();
        let file = DirFileSystem::new(dir.path()).open("/a.txt").unwrap();

        let mut output = Vec::new();
        let sent = send_stream(&mut output, file, 4).await.unwrap();
        assert_eq!(sent, 4);
        assert_eq!(output, b"0123");
    }

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(18));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n"), None);
    }

    #[test]
    fn test_default_pipeline_is_lenient() {
        let dir = fixture();
        let handler = build_handler(&config(&dir), false);
        assert_eq!(status(handler.as_ref(), "/"), 200);
        assert_eq!(status(handler.as_ref(), "/sub/"), 403);
        assert_eq!(status(handler.as_ref(), "/sub/a.txt"), 200);
    }

    #[test]
    fn test_strict_pipeline_rejects_root() {
        let dir = fixture();
        let handler = build_handler(&config(&dir).dir_policy(DirectoryPolicy::Strict), false);
        assert_eq!(status(handler.as_ref(), "/"), 403);
        assert_eq!(status(handler.as_ref(), "/index.html"), 200);
    }

    #[test]
    fn test_dirs_pipeline_lists() {
        let dir = fixture();
        let handler = build_handler(&config(&dir).dirs(true).cache(Duration::from_secs(5)), false);
        assert_eq!(status(handler.as_ref(), "/sub/"), 200);
    }

    #[test]
    fn test_pipeline_redirects_before_files() {
        let dir = fixture();
        let handler = build_handler(&config(&dir).redirect("old.example.com", "new.example.com"), false);
        let request = Request::new(HttpRequestMethod::Get, "/nope").with_host("old.example.com");
        assert_eq!(handler.serve(&request).status_code(), 302);
    }

    #[test]
    fn test_load_tls_missing_files() {
        assert_eq!(load_tls("/nonexistent/cert.pem", "/nonexistent/key.pem").err().unwrap().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_load_tls_rejects_non_pem() {
        let dir = TempDir::new().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        fs::write(&cert, "not a certificate").unwrap();
        fs::write(&key, "not a key").unwrap();
        let err = load_tls(cert.to_str().unwrap(), key.to_str().unwrap()).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_load_tls_self_signed() {
        let dir = TempDir::new().unwrap();
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        fs::write(&cert_path, cert.pem()).unwrap();
        fs::write(&key_path, key_pair.serialize_pem()).unwrap();
        assert!(load_tls(cert_path.to_str().unwrap(), key_path.to_str().unwrap()).is_ok());
    }
}
