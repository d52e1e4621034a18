use crate::{
    param::*,
    util::{escape_html, HtmlBuilder},
    vfs::File,
};

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use bytes::Bytes;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::debug;

use std::{
    fmt,
    io::{self, Write},
    time::SystemTime,
};

/// 不读入内存、由监听循环分块发送的文件响应体。句柄已定位到起始位置。
pub struct FileBody(Box<dyn File>);

impl fmt::Debug for FileBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FileBody")
    }
}

#[derive(Debug)]
pub struct Response {
    status_code: u16,
    information: String,
    content_type: Option<String>,
    content_length: u64,
    date: DateTime<Utc>,
    last_modified: Option<DateTime<Utc>>,
    content_encoding: Option<HttpEncoding>,
    location: Option<String>,
    server_name: String,
    allow: Option<Vec<HttpRequestMethod>>,
    accept_ranges: bool,
    content_range: Option<String>,
    content: Option<Bytes>,
    stream: Option<FileBody>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            content_length: 0,
            date: Utc::now(),
            last_modified: None,
            content_encoding: None,
            location: None,
            server_name: SERVER_NAME.to_string(),
            allow: None,
            accept_ranges: false,
            content_range: None,
            content: None,
            stream: None,
        }
    }

    /// 以文件或生成的内容构造 200 响应，按客户端能力压缩文本类内容。
    /// `head_only` 时保留 `Content-Length` 但不携带响应体。
    pub fn from_content(
        content: Vec<u8>,
        mime: &str,
        accept_encoding: &[HttpEncoding],
        head_only: bool,
    ) -> io::Result<Self> {
        let mut response = Self::new();
        response.content_encoding = match should_skip_compression(mime) {
            true => None,
            false => decide_encoding(accept_encoding),
        };
        let compressed = compress(content, response.content_encoding)?;
        response.content_length = compressed.len() as u64;
        response.content_type = Some(mime.to_string());
        if !head_only {
            response.content = Some(Bytes::from(compressed));
        }
        Ok(response)
    }

    /// 大文件响应：`len` 字节从 `file` 的当前位置分块发送，不压缩。
    pub fn from_stream(file: Box<dyn File>, len: u64, mime: &str, head_only: bool) -> Self {
        let mut response = Self::new();
        response.content_type = Some(mime.to_string());
        response.content_length = len;
        if !head_only {
            response.stream = Some(FileBody(file));
        }
        response
    }

    /// 状态页响应。204 只携带 `Allow`，304 没有响应体，其余状态生成 HTML 说明页。
    pub fn from_status_code(code: u16, accept_encoding: &[HttpEncoding], head_only: bool) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        match code {
            204 => {
                response.allow = Some(ALLOWED_METHODS.to_vec());
                return response;
            }
            304 => return response,
            _ => {}
        }
        if code == 405 {
            response.allow = Some(ALLOWED_METHODS.to_vec());
        }
        let content = match code {
            403 => HtmlBuilder::from_status_code(403, Some(r"<h2>噢！</h2><p>你没有权限访问该路径。</p>")),
            404 => HtmlBuilder::from_status_code(404, Some(r"<h2>噢！</h2><p>你指定的网页无法找到。</p>")),
            405 => HtmlBuilder::from_status_code(
                405,
                Some(r"<h2>噢！</h2><p>本服务器仅支持GET、HEAD与OPTIONS方法。</p>"),
            ),
            500 => HtmlBuilder::from_status_code(500, Some(r"<h2>噢！</h2><p>服务器出现了一个内部错误。</p>")),
            _ => HtmlBuilder::from_status_code(code, None),
        }
        .build();
        response.content_encoding = decide_encoding(accept_encoding);
        let bytes = match compress(content.clone().into_bytes(), response.content_encoding) {
            Ok(b) => b,
            Err(_) => {
                response.content_encoding = None;
                content.into_bytes()
            }
        };
        response.content_length = bytes.len() as u64;
        response.content_type = Some("text/html;charset=utf-8".to_string());
        if !head_only {
            response.content = Some(Bytes::from(bytes));
        }
        response
    }

    /// 重定向响应。`Location` 原样写出，说明页中的链接经过转义。
    pub fn redirect(code: u16, location: &str, head_only: bool) -> Self {
        let note = format!(
            r#"<a href="{}">{}</a>"#,
            escape_html(location),
            STATUS_CODES.get(&code).copied().unwrap_or("Redirect")
        );
        let content = HtmlBuilder::from_status_code(code, Some(&note)).build();
        let mut response = Self::new();
        response.set_code(code);
        response.location = Some(location.to_string());
        response.content_length = content.len() as u64;
        response.content_type = Some("text/html;charset=utf-8".to_string());
        if !head_only {
            response.content = Some(Bytes::from(content));
        }
        response
    }

    /// 标记为 206，`start..=end` 是本次返回的部分，`total` 是文件总长
    pub fn with_content_range(mut self, start: u64, end: u64, total: u64) -> Self {
        self.set_code(206);
        self.content_range = Some(format!("bytes {}-{}/{}", start, end, total));
        self
    }

    /// 416 响应需要告知客户端文件总长
    pub fn with_unsatisfied_range(mut self, total: u64) -> Self {
        self.content_range = Some(format!("bytes */{}", total));
        self
    }

    pub fn with_accept_ranges(mut self) -> Self {
        self.accept_ranges = true;
        self
    }

    /// 取出需要分块发送的文件句柄
    pub fn take_stream(&mut self) -> Option<Box<dyn File>> {
        self.stream.take().map(|FileBody(file)| file)
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    pub fn with_last_modified(mut self, modified: SystemTime) -> Self {
        self.last_modified = Some(modified.into());
        self
    }

    fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = STATUS_CODES.get(&code).copied().unwrap_or("Unknown").to_string();
        self
    }

    /// 状态行、标头与内存中的响应体。流式响应体由调用方通过 [`Response::take_stream`] 另行发送。
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut header = format!("HTTP/1.1 {} {}{}", self.status_code, self.information, CRLF);
        if let Some(t) = &self.content_type {
            header.push_str(&format!("Content-Type: {}{}", t, CRLF));
        }
        if let Some(e) = self.content_encoding {
            header.push_str(&format!("Content-Encoding: {}{}", e, CRLF));
        }
        header.push_str(&format!("Content-Length: {}{}", self.content_length, CRLF));
        header.push_str(&format!("Date: {}{}", format_date(&self.date), CRLF));
        if let Some(m) = &self.last_modified {
            header.push_str(&format!("Last-Modified: {}{}", format_date(m), CRLF));
        }
        if self.accept_ranges {
            header.push_str(&format!("Accept-Ranges: bytes{}", CRLF));
        }
        if let Some(r) = &self.content_range {
            header.push_str(&format!("Content-Range: {}{}", r, CRLF));
        }
        if let Some(l) = &self.location {
            header.push_str(&format!("Location: {}{}", l, CRLF));
        }
        header.push_str(&format!("Server: {}{}", self.server_name, CRLF));
        if let Some(a) = &self.allow {
            let methods: Vec<String> = a.iter().map(|m| m.to_string()).collect();
            header.push_str(&format!("Allow: {}{}", methods.join(", "), CRLF));
        }
        header.push_str(&format!("Connection: close{}", CRLF));
        header.push_str(CRLF);

        let mut bytes = header.into_bytes();
        if let Some(c) = &self.content {
            bytes.extend_from_slice(c);
        }
        bytes
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_encoding(&self) -> Option<HttpEncoding> {
        self.content_encoding
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn content_range(&self) -> Option<&str> {
        self.content_range.as_deref()
    }
}

/// HTTP 日期格式（IMF-fixdate）
fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn compress(data: Vec<u8>, mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    let original_size = data.len();
    let result = match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Br) => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
        None => Ok(data),
    };

    if let (Some(mode), Ok(compressed)) = (mode, &result) {
        debug!(
            "压缩完成: {}, 原始大小: {} bytes, 压缩后: {} bytes",
            mode,
            original_size,
            compressed.len()
        );
    }

    result
}

fn should_skip_compression(mime_type: &str) -> bool {
    let skip_types = [
        "image/",
        "video/",
        "audio/",
        "font/",
        "application/zip",
        "application/x-7z-compressed",
        "application/gzip",
        "application/pdf",
        "application/wasm",
        "application/x-tar",
        "application/octet-stream",
    ];

    skip_types.iter().any(|&skip_type| mime_type.starts_with(skip_type))
        && !mime_type.starts_with("image/svg")
}

/// 优先级：gzip > br > deflate
fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    [HttpEncoding::Gzip, HttpEncoding::Br, HttpEncoding::Deflate]
        .into_iter()
        .find(|e| accept_encoding.contains(e))
}

/// 根据文件名后缀判断 MIME 类型
pub fn get_mime(filename: &str) -> &'static str {
    let extension = match filename.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => return "application/octet-stream",
    };
    MIME_TYPES.get(extension.as_str()).copied().unwrap_or("application/octet-stream")
}
