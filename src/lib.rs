// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

pub mod cache;
pub mod config;
pub mod exception;
pub mod handler;
pub mod logger;
pub mod param;
pub mod redirect;
pub mod request;
pub mod response;
pub mod restrict;
pub mod script;
pub mod server;
pub mod util;
pub mod vfs;

pub use cache::CachingFileSystem;
pub use config::ServerConfig;
pub use exception::Exception;
pub use handler::{FileServer, Handler};
pub use logger::RequestLogger;
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use redirect::HostRedirect;
pub use request::Request;
pub use response::Response;
pub use restrict::{DirectoryPolicy, RestrictedFileSystem};
pub use server::Server;
pub use util::HtmlBuilder;
pub use vfs::{DirFileSystem, File, FileInfo, FileSystem};
