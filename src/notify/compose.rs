//! Notification content: subject line, plain-text and HTML bodies.
//!
//! Every piece of scraped text is escaped before it lands in the HTML body;
//! titles and summaries come straight from a third-party page.

use crate::models::NewsItem;
use crate::utils::display_publish_time;
use chrono::{DateTime, Local};
use html_escape::{encode_double_quoted_attribute, encode_text};
use std::fmt::Write;

const RULE_WIDTH: usize = 50;

/// Rendered notification ready for a transport.
#[derive(Debug, Clone)]
pub struct Composed {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Render a notification for `items`, stamped with `now`.
pub fn compose(
    items: &[NewsItem],
    subject: Option<&str>,
    source_url: &str,
    now: DateTime<Local>,
) -> Composed {
    let stamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
    Composed {
        subject: subject
            .map(str::to_string)
            .unwrap_or_else(|| default_subject(items.len(), &stamp)),
        text: text_body(items, source_url, &stamp),
        html: html_body(items, source_url, &stamp),
    }
}

pub fn default_subject(count: usize, stamp: &str) -> String {
    format!("【政府新闻推送】发现 {count} 条新新闻 - {stamp}")
}

pub fn text_body(items: &[NewsItem], source_url: &str, stamp: &str) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();
    let _ = writeln!(out, "政府新闻推送");
    let _ = writeln!(out, "发现 {} 条新新闻", items.len());
    let _ = writeln!(out, "更新时间: {stamp}\n");
    let _ = writeln!(out, "{rule}\n");

    for (index, item) in items.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", index + 1, item.title);
        let _ = writeln!(
            out,
            "   发布时间: {}",
            display_publish_time(item.publish_time.as_deref())
        );
        if !item.summary.is_empty() {
            let _ = writeln!(out, "   摘要: {}", item.summary);
        }
        let _ = writeln!(out, "   链接: {}\n", item.link);
    }

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "数据来源: {source_url}");
    out
}

pub fn html_body(items: &[NewsItem], source_url: &str, stamp: &str) -> String {
    let mut entries = String::new();
    for item in items {
        let link = encode_double_quoted_attribute(&item.link);
        let title = encode_text(&item.title);
        let published = encode_text(&display_publish_time(item.publish_time.as_deref())).into_owned();
        let summary = if item.summary.is_empty() {
            String::new()
        } else {
            format!(
                r#"<p style="color: #666; font-size: 14px; margin-top: 5px;">{}</p>"#,
                encode_text(&item.summary)
            )
        };
        let _ = write!(
            entries,
            r#"
        <div style="margin-bottom: 20px; padding-bottom: 20px; border-bottom: 1px solid #eee;">
          <h3 style="margin: 0 0 10px 0; font-size: 16px;">
            <a href="{link}" style="color: #1890ff; text-decoration: none;">{title}</a>
          </h3>
          <p style="color: #999; font-size: 12px; margin: 5px 0;">发布时间: {published}</p>
          {summary}
          <p style="margin-top: 10px;">
            <a href="{link}" style="color: #1890ff; text-decoration: none; font-size: 14px;">查看原文 →</a>
          </p>
        </div>"#
        );
    }

    let source_attr = encode_double_quoted_attribute(source_url);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', 'PingFang SC', 'Microsoft YaHei', sans-serif; line-height: 1.6; color: #333; max-width: 800px; margin: 0 auto; padding: 20px;">
  <div style="background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: white; padding: 20px; border-radius: 8px; margin-bottom: 30px;">
    <h1 style="margin: 0; font-size: 24px;">政府新闻推送</h1>
    <p style="margin: 10px 0 0 0; opacity: 0.9;">发现 {count} 条新新闻</p>
    <p style="margin: 5px 0 0 0; opacity: 0.8; font-size: 14px;">{stamp}</p>
  </div>
  <div style="background: #f9f9f9; padding: 20px; border-radius: 8px;">{entries}
  </div>
  <div style="margin-top: 30px; padding-top: 20px; border-top: 1px solid #eee; text-align: center; color: #999; font-size: 12px;">
    <p>此邮件由政府新闻监控系统自动发送</p>
    <p>数据来源: <a href="{source_attr}" style="color: #1890ff;">中国政府网</a></p>
  </div>
</body>
</html>
"#,
        count = items.len(),
    )
}
