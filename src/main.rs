// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 静态文件服务器
//!
//! 读取命令行参数或配置文件，组装文件系统流水线，然后在 tokio 运行时上监听 HTTP(S)。
//! 配置错误打印到标准错误，监听失败写入日志，两种情况都以退出码 1 结束。

use std::{collections::HashMap, path::Path, process::ExitCode, time::Duration};

use clap::{builder::BoolishValueParser, ArgAction, Parser};
use log::{error, info, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};
use tokio::runtime::Builder;

use webserver::{
    config::{parse_duration, parse_redirects},
    exception::Exception,
    restrict::DirectoryPolicy,
    script::load_script,
    Server, ServerConfig,
};

const DEFAULT_LOG_CONFIG: &str = "config/log4rs.yaml";

#[derive(Parser, Debug)]
#[command(version, about = "Serve a directory over HTTP or HTTPS")]
struct Cli {
    /// 网站根目录
    #[arg(long, default_value = "")]
    root: String,

    /// 监听地址，`:8080` 表示所有网卡
    #[arg(long, default_value = ":8080")]
    addr: String,

    /// TLS 证书（PEM）
    #[arg(long, default_value = "")]
    tlscert: String,

    /// TLS 私钥（PEM）
    #[arg(long, default_value = "")]
    tlskey: String,

    /// 缓存时长，如 30s、5m；0 表示不缓存
    #[arg(long, default_value = "0", value_parser = parse_duration)]
    cache: Duration,

    /// 允许列出目录，可写作 `--dirs` 或 `--dirs=false`
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    dirs: bool,

    /// 禁止访问所有目录，即使其中有 index.html
    #[arg(long)]
    strict: bool,

    /// 重定向映射，形如 from~to,from~to；可以重复给出，后出现的同名映射覆盖前者
    #[arg(long)]
    redirects: Vec<String>,

    /// 配置文件：.toml 按 TOML 解析，其余按 Rhai 脚本求值。指定后忽略其他选项
    #[arg(long)]
    config: Option<String>,

    /// log4rs 配置文件
    #[arg(long, default_value = DEFAULT_LOG_CONFIG)]
    log_config: String,
}

impl Cli {
    fn into_config(self) -> Result<ServerConfig, Exception> {
        if let Some(path) = &self.config {
            return match Path::new(path).extension().and_then(|e| e.to_str()) {
                Some("toml") => ServerConfig::from_toml(path),
                _ => load_script(path),
            };
        }

        let mut config = ServerConfig::new()
            .root(&self.root)
            .addr(&self.addr)
            .tls(&self.tlscert, &self.tlskey)
            .cache(self.cache)
            .dirs(self.dirs);
        if self.strict {
            config = config.dir_policy(DirectoryPolicy::Strict);
        }
        if !self.redirects.is_empty() {
            let mut table = HashMap::new();
            for redirects in &self.redirects {
                table.extend(parse_redirects(redirects)?);
            }
            config = config.redirects(table);
        }
        Ok(config)
    }
}

/// 优先使用 YAML 日志配置，文件不存在时退回到控制台输出
fn init_logging(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if Path::new(path).exists() {
        log4rs::init_file(path, Default::default())?;
        return Ok(());
    }

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l:<5})} {m}{n}",
        )))
        .build();
    let config = log4rs::Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))?;
    log4rs::init_config(config)?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_config) {
        eprintln!("无法初始化日志系统：{}", e);
        return ExitCode::FAILURE;
    }

    let config = match cli.into_config().and_then(|config| {
        config.tls_paths()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("配置已载入");
    info!("www root: {:?}", config.www_root());

    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_thread_count())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建tokio运行时：{}", e);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let server = match Server::bind(&config).await {
            Ok(server) => server,
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        };

        tokio::select! {
            _ = server.run() => ExitCode::SUCCESS,
            _ = tokio::signal::ctrl_c() => {
                info!("收到停机信号，正在退出...");
                ExitCode::SUCCESS
            }
        }
    })
}
