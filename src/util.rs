// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use chrono::{DateTime, Local};
use serde_json::json;

use crate::{param::STATUS_CODES, vfs::FileInfo};

pub struct HtmlBuilder {
    title: String,
    css: String,
    body: String,
}

impl HtmlBuilder {
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let title = format!("{}", code);
        let css = r"
            body {
                width: 35em;
                margin: 0 auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
            }
            "
        .to_string();
        let description = match note {
            Some(n) => n,
            None => STATUS_CODES.get(&code).copied().unwrap_or("Unknown Status"),
        };
        let body = format!(
            r"
            <h1>{}</h1>
            <p>{}</p>
            ",
            code, description
        );
        Self { title, css, body }
    }

    /// 根据目录项生成文件列表页面。`path` 为请求路径，条目会先被排序。
    pub fn from_dir(path: &str, entries: &mut [FileInfo]) -> Self {
        let mut body = String::new();
        sort_dir_entries(entries);

        let path_trimmed = path.strip_suffix('/').unwrap_or(path);
        body.push_str(&format!("<h1>{}的文件列表</h1><hr>", escape_html(path_trimmed)));
        body.push_str("<table>");
        body.push_str(
            r#"
            <tr>
                <td>文件名</td>
                <td>大小</td>
                <td>修改时间</td>
            </tr>
            <tr>
                <td><a href="../">..</a></td>
                <td></td>
                <td></td>
            </tr>
            "#,
        );
        for entry in entries.iter() {
            let local_time: DateTime<Local> = entry.modified().into();
            let formatted_time = local_time.format("%Y-%m-%d %H:%M:%S %Z").to_string();
            let filename = escape_html(entry.name());

            if entry.is_dir() {
                body.push_str(&format!(
                    r#"
                    <tr>
                        <td><a href="{0}/">{0}/</a></td>
                        <td>文件夹</td>
                        <td>{1}</td>
                    </tr>
                    "#,
                    &filename, &formatted_time
                ));
            } else {
                body.push_str(&format!(
                    r#"
                    <tr>
                        <td><a href="{0}">{0}</a></td>
                        <td>{1}</td>
                        <td>{2}</td>
                    </tr>
                    "#,
                    &filename,
                    format_file_size(entry.len()),
                    &formatted_time
                ));
            }
        }
        body.push_str("</table>");
        let title = format!("{}的文件列表", escape_html(path));
        let css = r"
            table {
                border-collapse: collapse;
                width: 100%;
            }

            td {
                padding: 8px;
                white-space: pre-wrap;
                border: none;
            }"
        .to_string();
        HtmlBuilder { title, css, body }
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!DOCTYPE html>
            <html>
                <head>
                    <meta charset="utf-8">
                    <title>{}</title>
                    <style>{}</style>
                </head>
                <body>
                {}
                </body>
            </html>"##,
            self.title, self.css, self.body
        )
    }
}

/// 目录列表的 JSON 形式，供 `Accept: application/json` 的客户端使用。
pub fn dir_to_json(path: &str, entries: &mut [FileInfo]) -> String {
    sort_dir_entries(entries);
    let items: Vec<serde_json::Value> = entries
        .iter()
        .map(|entry| {
            let modified: DateTime<Local> = entry.modified().into();
            json!({
                "name": entry.name(),
                "is_dir": entry.is_dir(),
                "size": entry.len(),
                "modified": modified.to_rfc3339(),
            })
        })
        .collect();
    json!({ "path": path, "entries": items }).to_string()
}

pub fn format_file_size(size: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < units.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.1} {}", size, units[unit_index])
}

/// 文件夹排在前面，同类按名称排序
fn sort_dir_entries(entries: &mut [FileInfo]) {
    entries.sort_by(|a, b| b.is_dir().cmp(&a.is_dir()).then_with(|| a.name().cmp(b.name())));
}

pub(crate) fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
