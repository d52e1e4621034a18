// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求处理器
//!
//! [`Handler`] 是处理器链的公共接口，重定向层与日志层都包装另一个 `Handler`。
//! [`FileServer`] 是链条末端的静态文件响应器，通过 [`FileSystem`] 查找文件。

use std::{
    io::{self, Read, Seek, SeekFrom},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use log::{debug, error, warn};

use crate::{
    param::{HttpRequestMethod, DEFAULT_MAX_CACHE_FILE_SIZE, INDEX_FILE},
    request::Request,
    response::{get_mime, Response},
    util::{dir_to_json, HtmlBuilder},
    vfs::{File, FileInfo, FileSystem},
};

pub trait Handler: Send + Sync {
    fn serve(&self, request: &Request) -> Response;
}

impl<T: Handler + ?Sized> Handler for Box<T> {
    fn serve(&self, request: &Request) -> Response {
        (**self).serve(request)
    }
}

impl<T: Handler + ?Sized> Handler for Arc<T> {
    fn serve(&self, request: &Request) -> Response {
        (**self).serve(request)
    }
}

/// 文件系统错误到 HTTP 状态码的映射
pub fn status_for_error(err: &io::Error) -> u16 {
    match err.kind() {
        io::ErrorKind::NotFound => 404,
        io::ErrorKind::PermissionDenied => 403,
        io::ErrorKind::InvalidInput => 400,
        _ => 500,
    }
}

pub struct FileServer<F> {
    fs: F,
    stream_threshold: u64,
}

impl<F: FileSystem> FileServer<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            stream_threshold: DEFAULT_MAX_CACHE_FILE_SIZE,
        }
    }

    /// 超过 `threshold` 字节的文件不读入内存，由监听循环分块发送且不压缩
    pub fn with_stream_threshold(mut self, threshold: u64) -> Self {
        self.stream_threshold = threshold;
        self
    }

    fn serve_path(&self, request: &Request, head_only: bool) -> io::Result<Response> {
        let path = request.path();
        let mut file = self.fs.open(path)?;
        let info = file.stat()?;
        if !info.is_dir() {
            return self.serve_file(file, &info, request, head_only);
        }

        // 目录必须以 `/` 结尾，否则页面中的相对链接会指向上一级
        if !path.ends_with('/') {
            let location = match request.query() {
                Some(q) => format!("{}/?{}", request.raw_path(), q),
                None => format!("{}/", request.raw_path()),
            };
            debug!("[ID{}]目录路径缺少结尾的/，重定向到{}", request.id(), location);
            return Ok(Response::redirect(301, &location, head_only));
        }

        if let Ok(index) = self.fs.open(&format!("{}{}", path, INDEX_FILE)) {
            let index_info = index.stat()?;
            if !index_info.is_dir() {
                return self.serve_file(index, &index_info, request, head_only);
            }
        }

        debug!("[ID{}]生成目录列表：{}", request.id(), path);
        let mut entries = file.read_dir()?;
        let (content, mime) = match request.wants_json() {
            true => (dir_to_json(path, &mut entries), "application/json"),
            false => (HtmlBuilder::from_dir(path, &mut entries).build(), "text/html;charset=utf-8"),
        };
        Ok(Response::from_content(content.into_bytes(), mime, request.accept_encoding(), head_only)?
            .with_last_modified(info.modified()))
    }

    fn serve_file(
        &self,
        mut file: Box<dyn File>,
        info: &FileInfo,
        request: &Request,
        head_only: bool,
    ) -> io::Result<Response> {
        let id = request.id();
        let mime = get_mime(info.name());
        let total = info.len();

        // HTTP 日期只精确到秒
        if let Some(since) = request.if_modified_since() {
            let modified: DateTime<Utc> = info.modified().into();
            if modified.timestamp() <= since.timestamp() {
                debug!("[ID{}]{}未修改，返回304", id, info.name());
                return Ok(Response::from_status_code(304, &[], head_only).with_last_modified(info.modified()));
            }
        }

        let (start, count) = match request.range() {
            None => (0, total),
            Some(range) => match range.resolve(total) {
                Some((start, end)) => (start, end - start + 1),
                None => {
                    warn!("[ID{}]请求的范围超出文件{}的长度{}，返回416", id, info.name(), total);
                    return Ok(Response::from_status_code(416, request.accept_encoding(), head_only)
                        .with_unsatisfied_range(total));
                }
            },
        };
        let partial = request.range().is_some();
        if start > 0 {
            file.seek(SeekFrom::Start(start))?;
        }

        let response = if count > self.stream_threshold {
            debug!("[ID{}]文件{}共{} bytes，分块发送{} bytes", id, info.name(), total, count);
            Response::from_stream(file, count, mime, head_only)
        } else {
            let mut content = Vec::with_capacity(count as usize);
            file.take(count).read_to_end(&mut content)?;
            debug!("[ID{}]读取文件{}，{} bytes，MIME类型: {}", id, info.name(), content.len(), mime);
            // 部分内容不压缩，Content-Range 按原始字节计算
            let accept_encoding = if partial { &[][..] } else { request.accept_encoding() };
            Response::from_content(content, mime, accept_encoding, head_only)?
        };

        let response = match partial {
            true => response.with_content_range(start, start + count - 1, total),
            false => response,
        };
        Ok(response.with_accept_ranges().with_last_modified(info.modified()))
    }
}

impl<F: FileSystem> Handler for FileServer<F> {
    fn serve(&self, request: &Request) -> Response {
        let id = request.id();
        let accept_encoding = request.accept_encoding();
        let head_only = match request.method() {
            HttpRequestMethod::Get => false,
            HttpRequestMethod::Head => true,
            HttpRequestMethod::Options => return Response::from_status_code(204, accept_encoding, false),
            method => {
                warn!("[ID{}]不支持的请求方法{}，返回405", id, method);
                return Response::from_status_code(405, accept_encoding, false);
            }
        };

        match self.serve_path(request, head_only) {
            Ok(response) => response,
            Err(e) => {
                let code = status_for_error(&e);
                match code {
                    500 => error!("[ID{}]处理{}时出错：{}", id, request.path(), e),
                    _ => warn!("[ID{}]请求的路径：{} 返回{}：{}", id, request.path(), code, e),
                }
                Response::from_status_code(code, accept_encoding, head_only)
            }
        }
    }
}
