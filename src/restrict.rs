// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 目录访问限制层
//!
//! `RestrictedFileSystem` 包装另一个 [`FileSystem`]，拒绝把目录句柄交给上层，
//! 从而禁止列出目录内容。被拒绝时返回 `PermissionDenied`（对应 403），
//! 并在返回错误前关闭底层句柄。普通文件及其错误原样透传。

use std::io;

use log::debug;
use serde_derive::{Deserialize, Serialize};

use crate::{
    param::INDEX_FILE,
    vfs::{join_path, File, FileSystem},
};

/// 目录访问策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryPolicy {
    /// 任何目录都被拒绝
    Strict,
    /// 目录下存在 `index.html` 时允许打开，否则拒绝
    #[default]
    Lenient,
}

pub struct RestrictedFileSystem<F> {
    inner: F,
    policy: DirectoryPolicy,
}

impl<F: FileSystem> RestrictedFileSystem<F> {
    pub fn new(inner: F, policy: DirectoryPolicy) -> Self {
        Self { inner, policy }
    }

    fn has_index(&self, dir: &str) -> bool {
        match self.inner.open(&join_path(dir, INDEX_FILE)) {
            Ok(index) => index.stat().is_ok_and(|info| !info.is_dir()),
            Err(_) => false,
        }
    }
}

fn forbidden(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        format!("directory access denied: {}", name),
    )
}

impl<F: FileSystem> FileSystem for RestrictedFileSystem<F> {
    fn open(&self, name: &str) -> io::Result<Box<dyn File>> {
        let file = self.inner.open(name)?;
        let info = match file.stat() {
            Ok(info) => info,
            Err(e) => {
                drop(file);
                return Err(e);
            }
        };
        if !info.is_dir() {
            return Ok(file);
        }

        let allowed = match self.policy {
            DirectoryPolicy::Strict => false,
            DirectoryPolicy::Lenient => self.has_index(name),
        };
        if allowed {
            return Ok(file);
        }
        drop(file);
        debug!("拒绝访问目录：{}（策略：{:?}）", name, self.policy);
        Err(forbidden(name))
    }
}
