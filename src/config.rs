use std::{
    collections::HashMap,
    fs,
    net::{SocketAddr, ToSocketAddrs},
    path::Path,
    time::Duration,
};

use log::warn;
use serde_derive::{Deserialize, Serialize};

use crate::{
    exception::Exception,
    param::{DEFAULT_ADDR, DEFAULT_MAX_CACHE_FILE_SIZE},
    restrict::DirectoryPolicy,
};

/// 服务器配置。可由命令行、TOML 文件或 Rhai 脚本构建，交给流水线后不再修改。
///
/// 各个 setter 消耗并返回新的配置值，便于链式调用。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    root: String,
    addr: String,
    tls_cert: Option<String>,
    tls_key: Option<String>,
    #[serde(with = "duration_str")]
    cache: Duration,
    dirs: bool,
    dir_policy: DirectoryPolicy,
    redirects: HashMap<String, String>,
    max_cache_file_size: u64,
    worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: String::new(),
            addr: DEFAULT_ADDR.to_string(),
            tls_cert: None,
            tls_key: None,
            cache: Duration::ZERO,
            dirs: false,
            dir_policy: DirectoryPolicy::default(),
            redirects: HashMap::new(),
            max_cache_file_size: DEFAULT_MAX_CACHE_FILE_SIZE,
            worker_threads: 0,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml(filename: impl AsRef<Path>) -> Result<Self, Exception> {
        let filename = filename.as_ref();
        let str_val = fs::read_to_string(filename)?;
        let config: ServerConfig = toml::from_str(&str_val)
            .map_err(|e| Exception::Config(format!("{}: {}", filename.display(), e)))?;
        if config.cache.is_zero() {
            warn!("配置文件中的cache为0，文件缓存已禁用");
        }
        Ok(config)
    }

    pub fn root(mut self, root: &str) -> Self {
        self.root = root.to_string();
        self
    }

    pub fn addr(mut self, addr: &str) -> Self {
        self.addr = addr.to_string();
        self
    }

    pub fn tls(mut self, cert: &str, key: &str) -> Self {
        self.tls_cert = Some(cert.to_string()).filter(|s| !s.is_empty());
        self.tls_key = Some(key.to_string()).filter(|s| !s.is_empty());
        self
    }

    pub fn cache(mut self, timeout: Duration) -> Self {
        self.cache = timeout;
        self
    }

    pub fn dirs(mut self, dirs: bool) -> Self {
        self.dirs = dirs;
        self
    }

    pub fn dir_policy(mut self, policy: DirectoryPolicy) -> Self {
        self.dir_policy = policy;
        self
    }

    pub fn redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(from.to_string(), to.to_string());
        self
    }

    pub fn redirects(mut self, redirects: HashMap<String, String>) -> Self {
        self.redirects.extend(redirects);
        self
    }

    pub fn max_cache_file_size(mut self, size: u64) -> Self {
        self.max_cache_file_size = size;
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }
}

impl ServerConfig {
    pub fn www_root(&self) -> &str {
        &self.root
    }

    pub fn listen_addr(&self) -> &str {
        &self.addr
    }

    /// 证书与私钥路径；两者都未设置时返回 `None`，只设置其一视为配置错误
    pub fn tls_paths(&self) -> Result<Option<(&str, &str)>, Exception> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Ok(Some((cert, key))),
            (None, None) => Ok(None),
            _ => Err(Exception::Config(
                "TLS requires both a certificate and a key".to_string(),
            )),
        }
    }

    pub fn cache_timeout(&self) -> Duration {
        self.cache
    }

    pub fn allow_dirs(&self) -> bool {
        self.dirs
    }

    pub fn directory_policy(&self) -> DirectoryPolicy {
        self.dir_policy
    }

    pub fn redirect_table(&self) -> &HashMap<String, String> {
        &self.redirects
    }

    pub fn cache_file_size_limit(&self) -> u64 {
        self.max_cache_file_size
    }

    /// 为 0 时使用 CPU 核心数
    pub fn worker_thread_count(&self) -> usize {
        match self.worker_threads {
            0 => num_cpus::get(),
            n => n,
        }
    }

    /// 解析监听地址。`:8080` 表示监听所有网卡。
    pub fn socket_addr(&self) -> Result<SocketAddr, Exception> {
        let addr = match self.addr.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{}", port),
            None => self.addr.clone(),
        };
        addr.to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| Exception::Config(format!("Invalid listen address: {:?}", self.addr)))
    }
}

/// 解析时长，如 `0`、`500ms`、`1s`、`2m`、`1h 30m`。
/// 负值表示禁用缓存，结果为零。
pub fn parse_duration(value: &str) -> Result<Duration, Exception> {
    let value = value.trim();
    let (negative, magnitude) = match value.strip_prefix('-') {
        Some(rest) => (true, rest.trim()),
        None => (false, value),
    };
    let duration = match magnitude {
        "0" => Duration::ZERO,
        _ => humantime::parse_duration(magnitude)
            .map_err(|e| Exception::Config(format!("Invalid duration {:?}: {}", value, e)))?,
    };
    Ok(if negative { Duration::ZERO } else { duration })
}

/// 解析 `from~to,from~to` 形式的重定向映射，两侧空白会被去除。
pub fn parse_redirects(value: &str) -> Result<HashMap<String, String>, Exception> {
    let mut redirects = HashMap::new();
    for mapping in value.split(',') {
        let parts: Vec<&str> = mapping.split('~').collect();
        if parts.len() != 2 {
            return Err(Exception::Config(format!("Invalid mapping: {:?}", mapping)));
        }
        redirects.insert(parts[0].trim().to_string(), parts[1].trim().to_string());
    }
    Ok(redirects)
}

mod duration_str {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = String::deserialize(deserializer)?;
        super::parse_duration(&value).map_err(D::Error::custom)
    }
}
