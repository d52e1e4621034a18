// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 基于 Host 的重定向
//!
//! 请求的 `Host` 标头命中重定向表时，直接返回 302，`Location` 指向映射后的主机，
//! 路径与查询字符串保持不变；否则原样交给被包装的处理器。

use std::collections::HashMap;

use log::info;

use crate::{handler::Handler, param::HttpRequestMethod, request::Request, response::Response};

pub struct HostRedirect<H> {
    inner: H,
    table: HashMap<String, String>,
    scheme: &'static str,
}

impl<H: Handler> HostRedirect<H> {
    pub fn new(inner: H, table: HashMap<String, String>) -> Self {
        Self {
            inner,
            table,
            scheme: "http",
        }
    }

    /// 监听 TLS 时重定向目标使用 https
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.scheme = if tls { "https" } else { "http" };
        self
    }
}

impl<H: Handler> Handler for HostRedirect<H> {
    fn serve(&self, request: &Request) -> Response {
        if self.table.is_empty() {
            return self.inner.serve(request);
        }
        match self.table.get(request.host()) {
            Some(to) => {
                let location = format!("{}://{}{}", self.scheme, to, request.target());
                info!("[ID{}]{} 重定向到 {}", request.id(), request.host(), location);
                Response::redirect(302, &location, request.method() == HttpRequestMethod::Head)
            }
            None => self.inner.serve(request),
        }
    }
}
