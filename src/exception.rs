// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了 Web 服务器在启动与请求处理生命周期中可能出现的各类异常情况。
//!
//! ## 设计意图
//! - **错误分类**：涵盖了协议解析错误、配置错误（命令行、TOML、Rhai 脚本）以及监听失败。
//! - **语义映射**：请求解析类错误由监听循环转化为 `400 Bad Request`；配置与监听类错误
//!   由入口函数决定是否终止进程，库内部从不主动退出。
//! - 文件系统层的错误统一使用 `std::io::Error`，不在此处重复定义。

use std::io;

use thiserror::Error;

/// 服务器启动或处理请求过程中发生的异常类型。
#[derive(Debug, Error)]
pub enum Exception {
    /// 客户端发送的请求字节流无法解析为合法的 UTF-8 字符串。
    #[error("Request bytes can't be parsed in UTF-8")]
    RequestIsNotUtf8,
    /// 请求行格式不正确，或使用了服务器无法识别的 HTTP 方法。
    #[error("Unsupported request method")]
    UnSupportedRequestMethod,
    /// 客户端使用了服务器不支持的 HTTP 协议版本。
    #[error("Unsupported HTTP version")]
    UnsupportedHttpVersion,
    /// 请求路径无法解码（非法的百分号编码或非 UTF-8 序列）。对应 `400 Bad Request`。
    #[error("Invalid path (400)")]
    InvalidPath,
    /// 请求头过大或在超时前未能读取完整。
    #[error("Request header is incomplete or too large")]
    RequestTooLarge,
    /// 配置不合法：重定向映射、时长、地址、TLS 参数等。
    #[error("{0}")]
    Config(String),
    /// Rhai 配置脚本解析或执行失败。
    #[error("script error: {0}")]
    Script(String),
    /// 端口绑定或 TLS 凭据加载失败。
    #[error("Failed to start server on {addr:?}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Exception {
    /// 是否属于请求报文本身的问题（应以 400 响应客户端）。
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Exception::RequestIsNotUtf8
                | Exception::UnSupportedRequestMethod
                | Exception::UnsupportedHttpVersion
                | Exception::InvalidPath
                | Exception::RequestTooLarge
        )
    }
}
