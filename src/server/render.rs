//! HTML rendering of the index page

use super::index::IndexView;
use crate::cluster::{ResourceKind, ResourceSummary};
use std::fmt::Write;

/// Escape text for HTML element content and attribute values
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn index_page(view: &IndexView) -> String {
    let mut page = String::with_capacity(8 * 1024);
    let _ = write!(
        page,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{host}</title>\n<style>{style}</style>\n</head>\n\
         <body style=\"background-color: {color}\">\n<h1>{host}</h1>\n",
        host = escape(&view.hostname),
        style = STYLE,
        color = escape(&view.color),
    );

    status_section(&mut page, view);
    resources_section(&mut page, view);
    config_section(&mut page, view);
    files_section(&mut page, view);
    headers_section(&mut page, view);
    env_section(&mut page, view);

    page.push_str("</body>\n</html>\n");
    page
}

const STYLE: &str = "body{font-family:sans-serif;margin:2em}\
table{border-collapse:collapse;margin-bottom:1em}\
td,th{border:1px solid #999;padding:2px 6px;text-align:left}\
.warning{color:#b00}.dangerous{color:#b00;font-weight:bold}\
pre{background:#eee;padding:.5em}";

fn warning(page: &mut String, message: &str) {
    let _ = writeln!(page, "<p class=\"warning\">{}</p>", escape(message));
}

fn status_section(page: &mut String, view: &IndexView) {
    page.push_str("<h2>Status</h2>\n<ul>\n");
    let _ = writeln!(page, "<li>Page hits: {} (<a href=\"/metrics\">metrics</a>)</li>", view.hits);
    match (&view.redis_host, &view.redis_key) {
        (Some(host), Some(key)) => {
            let _ = writeln!(
                page,
                "<li>Hits stored in redis {} under key {}</li>",
                escape(host),
                escape(key)
            );
        }
        _ => page.push_str("<li>Hits counted in process</li>\n"),
    }
    let _ = writeln!(
        page,
        "<li>Ready: {} ({})</li>",
        if view.ready { "yes" } else { "no" },
        view.phase.as_str()
    );
    if view.failure_probability > 0.0 {
        let _ = writeln!(
            page,
            "<li>Failure probability: {:.2}</li>",
            view.failure_probability
        );
    }
    let _ = writeln!(page, "<li>Remote address: {}</li>", escape(&view.remote_addr));
    let _ = writeln!(page, "<li>Command: <code>{}</code></li>", escape(&view.command));
    page.push_str("</ul>\n");

    if let Some(err) = &view.redis_error {
        warning(page, err);
    }
}

fn resources_section(page: &mut String, view: &IndexView) {
    let _ = writeln!(page, "<h2>Kubernetes namespace {}</h2>", escape(&view.namespace));
    if let Some(host) = &view.kubernetes_host {
        let _ = writeln!(page, "<p>API server: {}</p>", escape(host));
    }
    if let Some(err) = &view.kubernetes_error {
        warning(page, err);
    }

    for kind in ResourceKind::ALL {
        resource_table(page, kind, view.resources.get(kind));
    }
}

fn resource_table(page: &mut String, kind: ResourceKind, items: &[ResourceSummary]) {
    let _ = writeln!(page, "<h3>{}</h3>", kind.as_str());
    if items.is_empty() {
        page.push_str("<p>none</p>\n");
        return;
    }

    page.push_str("<table>\n<tr><th>Name</th><th>Status</th><th>Detail</th><th></th></tr>\n");
    for item in items {
        let _ = writeln!(
            page,
            "<tr><td>{name}</td><td>{status}</td><td>{detail}</td>\
             <td><a href=\"/kubernetes/delete/{kind}/{name}\">delete</a></td></tr>",
            name = escape(&item.name),
            status = escape(&item.status),
            detail = escape(&item.detail),
            kind = kind.short_name(),
        );
    }
    page.push_str("</table>\n");
}

fn config_section(page: &mut String, view: &IndexView) {
    let _ = writeln!(page, "<h2>Config file {}</h2>", escape(&view.config_path));
    match (&view.config_file, &view.config_error) {
        (Some(content), _) => {
            let _ = writeln!(page, "<pre>{}</pre>", escape(content));
        }
        (None, Some(err)) => warning(page, err),
        (None, None) => {}
    }
}

fn files_section(page: &mut String, view: &IndexView) {
    let _ = writeln!(page, "<h2>Persistent files in {}</h2>", escape(&view.persistent_dir));
    if view.persistent_files.is_empty() {
        page.push_str("<p>none</p>\n");
        return;
    }
    page.push_str("<ul>\n");
    for file in &view.persistent_files {
        let _ = writeln!(page, "<li>{}</li>", escape(file));
    }
    page.push_str("</ul>\n");
}

fn headers_section(page: &mut String, view: &IndexView) {
    page.push_str("<h2>Request headers</h2>\n<table>\n");
    for header in &view.headers {
        let _ = writeln!(
            page,
            "<tr><td>{}</td><td>{}</td></tr>",
            escape(&header.name),
            escape(&header.value)
        );
    }
    page.push_str("</table>\n");
}

fn env_section(page: &mut String, view: &IndexView) {
    page.push_str("<h2>Environment</h2>\n<table>\n");
    for var in &view.env {
        let class = if var.dangerous { " class=\"dangerous\"" } else { "" };
        let _ = writeln!(
            page,
            "<tr{}><td>{}</td><td>{}</td></tr>",
            class,
            escape(&var.name),
            escape(&var.value)
        );
    }
    page.push_str("</table>\n");
}
