//! 詳細ページHTMLの解析
//!
//! サーバー側で描画済みのHTMLから構造化フィールドを取り出す。ブラウザは使わない。

use std::collections::BTreeMap;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::HarvestError;
use crate::types::KEY_BODY;

const TITLE_SELECTOR: &str = ".detail-title, .article-title, h2, h3";
const CODE_SELECTOR: &str = ".detail-code, .project-code";
const CONTENT_SELECTOR: &str = ".ewb-article-info, .article-content, .detail-content, .content-box";
const MAIN_SELECTOR: &str = ".ewb-article, .article, .main-content, main";

const MAX_KEY_CHARS: usize = 30;
const MAX_VALUE_CHARS: usize = 500;
const MAX_BODY_CHARS: usize = 3000;

pub struct DetailParser {
    title: Selector,
    code: Selector,
    rows: Selector,
    cells: Selector,
    content: Selector,
    main: Selector,
    code_prefix: Regex,
    info_time: Regex,
    numbered_kv: Regex,
}

impl DetailParser {
    pub fn new() -> Result<Self, HarvestError> {
        Ok(Self {
            title: selector(TITLE_SELECTOR)?,
            code: selector(CODE_SELECTOR)?,
            rows: selector("table tr")?,
            cells: selector("td, th")?,
            content: selector(CONTENT_SELECTOR)?,
            main: selector(MAIN_SELECTOR)?,
            code_prefix: regex(r"^项目编号[：:]\s*")?,
            info_time: regex(r"【信息时间[：:]?\s*(\d{4}[-/]\d{2}[-/]\d{2})")?,
            numbered_kv: regex(r"[一二三四五六七八九十\d]+[、.．]\s*([^：:]+)[：:]\s*([^\n]+)")?,
        })
    }

    /// 1ページ分のフィールドを取り出す。何も取れなければ`RecordParse`
    pub fn parse(&self, html: &str) -> Result<BTreeMap<String, String>, HarvestError> {
        let document = Html::parse_document(html);
        let mut result = BTreeMap::new();

        if let Some(el) = document.select(&self.title).next() {
            result.insert("页面标题".to_string(), stripped_text(el));
        }

        if let Some(el) = document.select(&self.code).next() {
            let text = stripped_text(el);
            result.insert(
                "项目编号".to_string(),
                self.code_prefix.replace(&text, "").into_owned(),
            );
        }

        let body_text: String = document.root_element().text().collect();
        if let Some(caps) = self.info_time.captures(&body_text) {
            result.insert("信息时间".to_string(), caps[1].to_string());
        }

        for row in document.select(&self.rows) {
            let cells: Vec<ElementRef> = row.select(&self.cells).collect();
            if cells.len() == 2 {
                let key = clean_key(&stripped_text(cells[0]));
                if !key.is_empty() && key.chars().count() < MAX_KEY_CHARS {
                    result.insert(key, stripped_text(cells[1]));
                }
            } else if cells.len() >= 4 && cells.len() % 2 == 0 {
                for pair in cells.chunks(2) {
                    let key = clean_key(&stripped_text(pair[0]));
                    let value = stripped_text(pair[1]);
                    if !key.is_empty() && key.chars().count() < MAX_KEY_CHARS && !value.is_empty() {
                        result.insert(key, value);
                    }
                }
            }
        }

        let content = document.select(&self.content).next();
        if let Some(el) = content {
            let text: String = el.text().collect();
            for caps in self.numbered_kv.captures_iter(&text) {
                let key = caps[1].trim();
                let value = caps[2].trim();
                if !key.is_empty()
                    && key.chars().count() < MAX_KEY_CHARS
                    && value.chars().count() < MAX_VALUE_CHARS
                    && !result.contains_key(key)
                {
                    result.insert(key.to_string(), value.to_string());
                }
            }
        }

        if let Some(el) = content.or_else(|| document.select(&self.main).next()) {
            let body: String = stripped_text(el).chars().take(MAX_BODY_CHARS).collect();
            result.insert(KEY_BODY.to_string(), body);
        }

        if result.is_empty() {
            return Err(HarvestError::RecordParse(
                "構造化フィールドが見つかりません".to_string(),
            ));
        }
        Ok(result)
    }
}

/// 前後の空白を除いたテキストノードを連結する
fn stripped_text(el: ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn clean_key(key: &str) -> String {
    key.replace(['：', ':'], "")
}

fn selector(css: &str) -> Result<Selector, HarvestError> {
    Selector::parse(css).map_err(|e| HarvestError::Config(format!("selector {}: {:?}", css, e)))
}

fn regex(pattern: &str) -> Result<Regex, HarvestError> {
    Regex::new(pattern).map_err(|e| HarvestError::Config(format!("regex {}: {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(html: &str) -> Result<BTreeMap<String, String>, HarvestError> {
        DetailParser::new().unwrap().parse(html)
    }

    #[test]
    fn test_extracts_basic_fields() {
        let html = r#"
        <html>
          <body>
            <h2 class="detail-title">测试公告</h2>
            <table>
              <tr><td>采购人：</td><td>重庆某单位</td></tr>
            </table>
            <div class="article-content">
              一、成交金额：100万元
            </div>
          </body>
        </html>
        "#;
        let parsed = parse(html).unwrap();
        assert_eq!(parsed.get("页面标题").map(String::as_str), Some("测试公告"));
        assert_eq!(parsed.get("采购人").map(String::as_str), Some("重庆某单位"));
        assert_eq!(parsed.get("成交金额").map(String::as_str), Some("100万元"));
        assert!(parsed.contains_key("正文内容"));
    }

    #[test]
    fn test_project_code_info_time_and_wide_rows() {
        let html = r#"
        <html><body>
          <div class="detail-code">项目编号：CQ-2026-001</div>
          <p>【信息时间：2026-01-05 10:00】</p>
          <table>
            <tr><th>成交人</th><td>某公司</td><th>地址：</th><td></td></tr>
          </table>
          <main>正文</main>
        </body></html>
        "#;
        let parsed = parse(html).unwrap();
        assert_eq!(parsed["项目编号"], "CQ-2026-001");
        assert_eq!(parsed["信息时间"], "2026-01-05");
        assert_eq!(parsed["成交人"], "某公司");
        assert!(!parsed.contains_key("地址"));
        assert_eq!(parsed["正文内容"], "正文");
    }

    #[test]
    fn test_table_value_wins_over_numbered_line() {
        let html = r#"
        <table><tr><td>成交金额</td><td>99万元</td></tr></table>
        <div class="content-box">一、成交金额：100万元
二、供应商名称：某公司</div>
        "#;
        let parsed = parse(html).unwrap();
        assert_eq!(parsed["成交金额"], "99万元");
        assert_eq!(parsed["供应商名称"], "某公司");
    }

    #[test]
    fn test_body_is_truncated() {
        let long = "字".repeat(5000);
        let html = format!(r#"<div class="detail-content">{}</div>"#, long);
        let parsed = parse(&html).unwrap();
        assert_eq!(parsed["正文内容"].chars().count(), 3000);
    }

    #[test]
    fn test_empty_page_is_parse_error() {
        let err = parse("<html><body><p>nothing</p></body></html>").unwrap_err();
        assert!(matches!(err, HarvestError::RecordParse(_)));
    }
}
