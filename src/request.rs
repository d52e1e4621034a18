// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 负责将 TCP 流中读取的请求头字节解析为强类型的 `Request` 结构体。它涵盖了：
//! 1. 请求行（Request-Line）的解析（方法、目标、版本）。
//! 2. 路由所需标头（`Host`、`Accept`、`Accept-Encoding`、`User-Agent`）的提取。
//! 3. 条件请求与范围请求标头（`If-Modified-Since`、`Range`）的解析。
//! 4. 请求路径的百分号解码。

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use log::{debug, error};
use percent_encoding::percent_decode_str;

use crate::{exception::Exception, param::*};

/// 表示一个 HTTP 请求的元数据。请求体不会被读取。
#[derive(Debug, Clone)]
pub struct Request {
    /// 全局请求 ID，用于在多线程环境下追踪日志
    id: u128,
    method: HttpRequestMethod,
    /// 客户端发送的原始请求目标（路径 + 查询字符串，未解码）
    target: String,
    /// 解码后的路径部分
    path: String,
    version: HttpVersion,
    host: String,
    user_agent: String,
    accept_encoding: Vec<HttpEncoding>,
    accept: Option<String>,
    range: Option<ByteRange>,
    if_modified_since: Option<DateTime<Utc>>,
    remote_addr: Option<SocketAddr>,
}

/// 单段字节范围（RFC 7233）。多段范围不支持，按未携带 `Range` 处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-` 或 `bytes=start-end`（含 end）
    From(u64, Option<u64>),
    /// `bytes=-n`：最后 n 个字节
    Suffix(u64),
}

impl ByteRange {
    /// 解析 `Range` 标头的值，格式不正确时返回 `None`
    pub fn parse(value: &str) -> Option<Self> {
        let spec = value.trim().strip_prefix("bytes=")?.trim();
        if spec.contains(',') {
            return None;
        }
        let (start, end) = spec.split_once('-')?;
        match (start.trim(), end.trim()) {
            ("", "") => None,
            ("", n) => n.parse().ok().map(ByteRange::Suffix),
            (s, "") => s.parse().ok().map(|s| ByteRange::From(s, None)),
            (s, e) => {
                let (s, e) = (s.parse().ok()?, e.parse().ok()?);
                (s <= e).then_some(ByteRange::From(s, Some(e)))
            }
        }
    }

    /// 针对长度为 `len` 的文件求出实际的闭区间 `(start, end)`；无法满足时返回 `None`
    pub fn resolve(&self, len: u64) -> Option<(u64, u64)> {
        match *self {
            ByteRange::From(start, _) if start >= len => None,
            ByteRange::From(start, end) => Some((start, end.map_or(len - 1, |e| e.min(len - 1)))),
            ByteRange::Suffix(0) => None,
            ByteRange::Suffix(_) if len == 0 => None,
            ByteRange::Suffix(n) => Some((len - n.min(len), len - 1)),
        }
    }
}

/// 解析 HTTP 日期（IMF-fixdate），例如 `Sun, 06 Nov 1994 08:49:37 GMT`
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

impl Request {
    /// 从原始字节缓冲区尝试构建 `Request` 实例。
    ///
    /// # 参数
    /// * `buffer` - 从网络 Socket 读取的请求头数据。
    /// * `id` - 全局请求 ID。
    ///
    /// # 错误处理
    /// 如果请求格式不符合 HTTP 规范或使用了不支持的方法/版本，将返回相应的 `Exception`。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let request_string = match std::str::from_utf8(buffer) {
            Ok(string) => string,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let mut request_lines = request_string.split(CRLF);
        let first_line = request_lines.next().unwrap_or_default();
        let first_line_parts: Vec<&str> = first_line.split(' ').collect();

        if first_line_parts.len() != 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, first_line);
            return Err(Exception::UnSupportedRequestMethod);
        }

        let method_str = first_line_parts[0].to_uppercase();
        let method = match method_str.as_str() {
            "GET" => HttpRequestMethod::Get,
            "HEAD" => HttpRequestMethod::Head,
            "OPTIONS" => HttpRequestMethod::Options,
            "POST" => HttpRequestMethod::Post,
            "PUT" => HttpRequestMethod::Put,
            "DELETE" => HttpRequestMethod::Delete,
            _ => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, &method_str);
                return Err(Exception::UnSupportedRequestMethod);
            }
        };

        let version_str = first_line_parts[2].to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            "HTTP/1.0" => HttpVersion::V1_0,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        let target = first_line_parts[1].to_string();
        let raw_path = target.split('?').next().unwrap_or_default();
        let path = match percent_decode_str(raw_path).decode_utf8() {
            Ok(p) => p.into_owned(),
            Err(_) => {
                error!("[ID{}]请求路径无法解码：{}", id, raw_path);
                return Err(Exception::InvalidPath);
            }
        };

        let mut host = String::new();
        let mut user_agent = String::new();
        let mut accept_encoding = vec![];
        let mut accept = None;
        let mut range = None;
        let mut if_modified_since = None;
        for line in request_lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match name.trim().to_lowercase().as_str() {
                "host" => host = value.to_string(),
                "user-agent" => user_agent = value.to_string(),
                "accept" => accept = Some(value.to_string()),
                "range" => {
                    range = ByteRange::parse(value);
                    if range.is_none() {
                        debug!("[ID{}]忽略无法识别的Range：{}", id, value);
                    }
                }
                "if-modified-since" => if_modified_since = parse_http_date(value),
                // 只要包含关键词即视为支持
                "accept-encoding" => {
                    if value.contains("gzip") {
                        accept_encoding.push(HttpEncoding::Gzip);
                    }
                    if value.contains("deflate") {
                        accept_encoding.push(HttpEncoding::Deflate);
                    }
                    if value.contains("br") {
                        accept_encoding.push(HttpEncoding::Br);
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            id,
            method,
            target,
            path,
            version,
            host,
            user_agent,
            accept_encoding,
            accept,
            range,
            if_modified_since,
            remote_addr: None,
        })
    }

    /// 直接构造请求，主要用于在处理器链上做测试或内部转发。
    pub fn new(method: HttpRequestMethod, target: &str) -> Self {
        let raw_path = target.split('?').next().unwrap_or_default();
        Self {
            id: 0,
            method,
            target: target.to_string(),
            path: percent_decode_str(raw_path).decode_utf8_lossy().into_owned(),
            version: HttpVersion::V1_1,
            host: String::new(),
            user_agent: String::new(),
            accept_encoding: vec![],
            accept: None,
            range: None,
            if_modified_since: None,
            remote_addr: None,
        }
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_accept(mut self, accept: &str) -> Self {
        self.accept = Some(accept.to_string());
        self
    }

    pub fn with_accept_encoding(mut self, accept_encoding: Vec<HttpEncoding>) -> Self {
        self.accept_encoding = accept_encoding;
        self
    }

    /// 以 `Range` 标头的原始值设置范围，无法解析时清空
    pub fn with_range(mut self, value: &str) -> Self {
        self.range = ByteRange::parse(value);
        self
    }

    pub fn with_if_modified_since(mut self, value: &str) -> Self {
        self.if_modified_since = parse_http_date(value);
        self
    }
}

// --- Getter 访问器实现 ---

impl Request {
    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn version(&self) -> &HttpVersion {
        &self.version
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 获取原始请求目标（路径 + 查询字符串，保持客户端发送时的编码）
    pub fn target(&self) -> &str {
        &self.target
    }

    /// 获取未解码的路径部分
    pub fn raw_path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }

    /// 获取解码后的请求路径（不含查询参数）
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 获取查询字符串（不含 `?`）
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, q)| q)
    }

    /// 获取 `Host` 标头，端口部分按客户端发送时保留
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// 获取客户端支持的压缩算法列表
    pub fn accept_encoding(&self) -> &[HttpEncoding] {
        &self.accept_encoding
    }

    pub fn accept(&self) -> Option<&str> {
        self.accept.as_deref()
    }

    /// 客户端是否要求 JSON 形式的数据（用于目录列表）
    pub fn wants_json(&self) -> bool {
        self.accept().is_some_and(|a| a.contains("application/json"))
    }

    pub fn range(&self) -> Option<ByteRange> {
        self.range
    }

    pub fn if_modified_since(&self) -> Option<DateTime<Utc>> {
        self.if_modified_since
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}
