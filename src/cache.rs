// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 文件缓存层
//!
//! `CachingFileSystem` 包装另一个 [`FileSystem`]，把中小文件整体读入内存，
//! 在 `timeout` 之内直接以内存句柄返回。
//!
//! 并发约定：
//! - 查找只持有读锁，且只覆盖一次 map 访问；
//! - 读取底层文件时不持有任何锁；
//! - 插入只持有写锁，且仅在没有新鲜条目时插入（先到者胜出）。
//!   两个并发的未命中请求可能各自读取一次底层文件，但 map 中同一路径最多只有一个条目，
//!   落败的一方改用已存在的条目。
//! - 条目在完整构造后才进入 map，读者不会看到半成品；条目不可变，只会被整体替换。
//!
//! 目录与读取失败永远不会被缓存。

use std::{
    collections::HashMap,
    io::{self, Cursor, Read, Seek, SeekFrom},
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, Instant},
};

use bytes::Bytes;
use log::debug;

use crate::{
    param::DEFAULT_MAX_CACHE_FILE_SIZE,
    vfs::{clean_path, File, FileInfo, FileSystem},
};

struct CacheEntry {
    content: Bytes,
    info: FileInfo,
    created_at: Instant,
}

impl CacheEntry {
    fn from_reader<R: Read + ?Sized>(reader: &mut R, info: FileInfo) -> io::Result<Self> {
        let mut buf = Vec::with_capacity(info.len() as usize);
        reader.read_to_end(&mut buf)?;
        Ok(Self {
            content: Bytes::from(buf),
            info,
            created_at: Instant::now(),
        })
    }

    fn is_fresh(&self, timeout: Duration) -> bool {
        self.created_at.elapsed() <= timeout
    }

    fn file(&self) -> CachedFile {
        CachedFile {
            cursor: Cursor::new(self.content.clone()),
            info: self.info.clone(),
        }
    }
}

/// 内存中的文件句柄：共享条目的字节缓冲，各自维护独立的读取位置。
pub struct CachedFile {
    cursor: Cursor<Bytes>,
    info: FileInfo,
}

impl Read for CachedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for CachedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl File for CachedFile {
    fn stat(&self) -> io::Result<FileInfo> {
        Ok(self.info.clone())
    }

    fn read_dir(&mut self) -> io::Result<Vec<FileInfo>> {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a directory", self.info.name()),
        ))
    }
}

pub struct CachingFileSystem<F> {
    inner: F,
    timeout: Duration,
    max_file_size: u64,
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
}

impl<F: FileSystem> CachingFileSystem<F> {
    /// `timeout` 为零时不应安装缓存层，由调用方决定。
    pub fn new(inner: F, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            max_file_size: DEFAULT_MAX_CACHE_FILE_SIZE,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// 大于 `max_file_size` 的文件直接透传，不进入缓存。`0` 表示不限制。
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// 当前 map 中的条目数（包括已过期但尚未被替换的条目）
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn should_cache(&self, file_size: u64) -> bool {
        self.max_file_size == 0 || file_size <= self.max_file_size
    }

    fn lookup(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).filter(|e| e.is_fresh(self.timeout)).cloned()
    }

    /// 插入新条目，除非已有新鲜条目；返回最终留在 map 中的那一个。
    fn insert(&self, key: String, entry: CacheEntry) -> Arc<CacheEntry> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(&key) {
            if existing.is_fresh(self.timeout) {
                return Arc::clone(existing);
            }
        }
        let entry = Arc::new(entry);
        entries.insert(key, Arc::clone(&entry));
        entry
    }
}

impl<F: FileSystem> FileSystem for CachingFileSystem<F> {
    fn open(&self, name: &str) -> io::Result<Box<dyn File>> {
        let key = clean_path(name);
        if let Some(entry) = self.lookup(&key) {
            debug!("缓存命中：{}", key);
            return Ok(Box::new(entry.file()));
        }

        let mut file = self.inner.open(name)?;
        let info = file.stat()?;
        if info.is_dir() {
            return Ok(file);
        }
        if !self.should_cache(info.len()) {
            debug!("文件过大({} bytes)，跳过缓存：{}", info.len(), key);
            return Ok(file);
        }

        let entry = CacheEntry::from_reader(file.as_mut(), info)?;
        drop(file);
        debug!("缓存未命中，已读入 {} bytes：{}", entry.content.len(), key);
        let entry = self.insert(key, entry);
        Ok(Box::new(entry.file()))
    }
}
