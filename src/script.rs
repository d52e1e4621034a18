// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! Rhai 配置脚本。
//!
//! 脚本需要定义无参函数 `build()`，返回 `server()` 构建出的配置值：
//!
//! ```rhai
//! fn build() {
//!     server()
//!         .root("www")
//!         .addr(":8443")
//!         .tls("cert.pem", "key.pem")
//!         .cache("30s")
//!         .redirect("old.example.com", "new.example.com")
//! }
//! ```
//!
//! `build()` 可以用 `throw` 报告错误；返回其他类型的值同样视为配置错误。

use std::{fs, path::Path};

use log::debug;
use rhai::{Dynamic, Engine, EvalAltResult, ImmutableString, Scope};

use crate::{
    config::{parse_duration, ServerConfig},
    exception::Exception,
    restrict::DirectoryPolicy,
};

pub type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

/// 注册了配置构建函数的脚本引擎
pub fn engine() -> Engine {
    let mut engine = Engine::new();
    engine.register_type_with_name::<ServerConfig>("ServerConfig");

    engine.register_fn("server", ServerConfig::new);
    engine.register_fn("root", |c: ServerConfig, root: ImmutableString| c.root(root.as_str()));
    engine.register_fn("addr", |c: ServerConfig, addr: ImmutableString| c.addr(addr.as_str()));
    engine.register_fn(
        "tls",
        |c: ServerConfig, cert: ImmutableString, key: ImmutableString| c.tls(cert.as_str(), key.as_str()),
    );
    engine.register_fn(
        "cache",
        |c: ServerConfig, timeout: ImmutableString| -> ScriptResult<ServerConfig> {
            let timeout = parse_duration(timeout.as_str()).map_err(|e| e.to_string())?;
            Ok(c.cache(timeout))
        },
    );
    engine.register_fn("dirs", |c: ServerConfig, dirs: bool| c.dirs(dirs));
    engine.register_fn("dirs", |c: ServerConfig, dirs: ImmutableString| {
        c.dirs(dirs.trim().eq_ignore_ascii_case("true"))
    });
    engine.register_fn("strict", |c: ServerConfig| c.dir_policy(DirectoryPolicy::Strict));
    engine.register_fn(
        "redirect",
        |c: ServerConfig, from: ImmutableString, to: ImmutableString| c.redirect(from.as_str(), to.as_str()),
    );
    engine.register_fn(
        "max_cache_file_size",
        |c: ServerConfig, size: i64| -> ScriptResult<ServerConfig> {
            let size = u64::try_from(size).map_err(|_| format!("Invalid file size: {}", size))?;
            Ok(c.max_cache_file_size(size))
        },
    );
    engine.register_fn(
        "workers",
        |c: ServerConfig, threads: i64| -> ScriptResult<ServerConfig> {
            let threads = usize::try_from(threads).map_err(|_| format!("Invalid thread count: {}", threads))?;
            Ok(c.worker_threads(threads))
        },
    );

    engine
}

/// 求值脚本源码，调用其中的 `build()` 得到配置
pub fn eval_script(source: &str) -> Result<ServerConfig, Exception> {
    let engine = engine();
    let ast = engine
        .compile(source)
        .map_err(|e| Exception::Script(format!("parse error: {}", e)))?;

    let has_build = ast
        .iter_functions()
        .any(|f| f.name == "build" && f.params.is_empty());
    if !has_build {
        return Err(Exception::Config("No build function in config.".to_string()));
    }

    let mut scope = Scope::new();
    let result = engine
        .call_fn::<Dynamic>(&mut scope, &ast, "build", ())
        .map_err(|e| Exception::Script(e.to_string()))?;

    let type_name = engine.map_type_name(result.type_name()).to_string();
    match result.try_cast::<ServerConfig>() {
        Some(config) => {
            debug!("配置脚本求值完成：{:?}", config);
            Ok(config)
        }
        None => Err(Exception::Config(format!(
            "Unexpected return type from build: {}",
            type_name
        ))),
    }
}

pub fn load_script(path: impl AsRef<Path>) -> Result<ServerConfig, Exception> {
    let source = fs::read_to_string(path)?;
    eval_script(&source)
}
