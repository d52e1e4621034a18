// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 虚拟文件系统模块
//!
//! 定义"按路径打开文件"这一能力接口，使请求处理与物理存储解耦。
//! 缓存层、目录限制层都实现并包装 [`FileSystem`]，按所有权逐层组合：
//! 每个装饰器独占它所包装的那一层。
//!
//! 错误统一使用 `std::io::Error`：
//! - `NotFound`：路径不存在（对应 404）
//! - `PermissionDenied`：目录访问被拒绝（对应 403）
//! - `InvalidInput`：路径中含有非法字符（对应 400）
//! - 其他：读取失败（对应 500）
//!
//! 关闭文件即 `Drop`：透传句柄释放底层的系统资源，缓存句柄不持有任何系统资源。

use std::{
    fs,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

/// 文件元数据快照，与打开它的句柄无关，可以自由复制。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    name: String,
    len: u64,
    is_dir: bool,
    modified: SystemTime,
}

impl FileInfo {
    pub fn new(name: &str, len: u64, is_dir: bool, modified: SystemTime) -> Self {
        Self {
            name: name.to_string(),
            len,
            is_dir,
            modified,
        }
    }

    fn from_metadata(name: &str, metadata: &fs::Metadata) -> Self {
        Self::new(
            name,
            metadata.len(),
            metadata.is_dir(),
            metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        )
    }

    /// 文件的基本名（不含目录部分），根目录为 `/`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }
}

/// 已打开的文件句柄。
pub trait File: Read + Seek + Send {
    fn stat(&self) -> io::Result<FileInfo>;

    /// 列出目录内容。对普通文件调用会返回错误。
    fn read_dir(&mut self) -> io::Result<Vec<FileInfo>>;
}

/// 按名称打开文件的能力接口。名称是以 `/` 分隔的路径。
#[cfg_attr(test, mockall::automock)]
pub trait FileSystem: Send + Sync {
    fn open(&self, name: &str) -> io::Result<Box<dyn File>>;
}

impl<T: FileSystem + ?Sized> FileSystem for Box<T> {
    fn open(&self, name: &str) -> io::Result<Box<dyn File>> {
        (**self).open(name)
    }
}

impl<T: FileSystem + ?Sized> FileSystem for Arc<T> {
    fn open(&self, name: &str) -> io::Result<Box<dyn File>> {
        (**self).open(name)
    }
}

/// 将名称规整为以 `/` 开头的路径：消除 `.`、`..` 与重复的 `/`，
/// `..` 在根目录处被截断，因此结果永远不会越出根目录。末尾的 `/` 不保留。
pub fn clean_path(name: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in name.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    format!("/{}", parts.join("/"))
}

/// 将目录路径与其下的文件名拼接
pub fn join_path(dir: &str, name: &str) -> String {
    clean_path(&format!("{}/{}", dir, name))
}

fn base_name(cleaned: &str) -> &str {
    match cleaned.rsplit('/').next() {
        Some("") | None => "/",
        Some(name) => name,
    }
}

/// 以本地目录为根的文件系统。
#[derive(Debug, Clone)]
pub struct DirFileSystem {
    root: PathBuf,
}

impl DirFileSystem {
    /// 空字符串表示当前目录
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = if root.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            root
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> io::Result<(PathBuf, String)> {
        if name.contains('\0') || name.contains('\\') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid character in file path: {:?}", name),
            ));
        }
        let cleaned = clean_path(name);
        let path = self.root.join(cleaned.trim_start_matches('/'));
        Ok((path, cleaned))
    }
}

impl FileSystem for DirFileSystem {
    fn open(&self, name: &str) -> io::Result<Box<dyn File>> {
        let (path, cleaned) = self.resolve(name)?;
        let metadata = fs::metadata(&path)?;
        let name = base_name(&cleaned).to_string();
        if metadata.is_dir() {
            return Ok(Box::new(DiskDir {
                info: FileInfo::from_metadata(&name, &metadata),
                path,
            }));
        }
        let file = fs::File::open(&path)?;
        Ok(Box::new(DiskFile { file, name }))
    }
}

/// 磁盘上普通文件的透传句柄。
struct DiskFile {
    file: fs::File,
    name: String,
}

impl Read for DiskFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for DiskFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl File for DiskFile {
    fn stat(&self) -> io::Result<FileInfo> {
        let metadata = self.file.metadata()?;
        Ok(FileInfo::from_metadata(&self.name, &metadata))
    }

    fn read_dir(&mut self) -> io::Result<Vec<FileInfo>> {
        Err(io::Error::other(format!("{} is not a directory", self.name)))
    }
}

/// 磁盘上目录的句柄。只能列目录，不能读取内容。
struct DiskDir {
    path: PathBuf,
    info: FileInfo,
}

impl Read for DiskDir {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::other(format!("{} is a directory", self.info.name())))
    }
}

impl Seek for DiskDir {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Ok(0)
    }
}

impl File for DiskDir {
    fn stat(&self) -> io::Result<FileInfo> {
        Ok(self.info.clone())
    }

    fn read_dir(&mut self) -> io::Result<Vec<FileInfo>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            // 跟随符号链接；悬空链接退回到链接本身的元数据
            let metadata = match fs::metadata(entry.path()) {
                Ok(m) => m,
                Err(_) => entry.metadata()?,
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(FileInfo::from_metadata(&name, &metadata));
        }
        Ok(entries)
    }
}
