//! 検索APIレスポンスの解析

use serde_json::Value;

use crate::error::HarvestError;
use crate::types::LinkRecord;

/// 検索API 1ページ分
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub records: Vec<LinkRecord>,
    /// `totalcount`（返ってこなければ`None`）
    pub total: Option<usize>,
}

/// `getFullTextDataNew`のレスポンスを解析する
///
/// `content`はオブジェクトの場合とJSON文字列の場合がある。
pub fn parse_search_response(data: &Value, base_url: &str) -> Result<SearchPage, HarvestError> {
    let code = data.get("code").and_then(as_i64);
    if code != Some(200) {
        return Err(HarvestError::Api(format!(
            "code={} msg={}",
            code.map(|c| c.to_string()).unwrap_or_else(|| "none".into()),
            data.get("msg").and_then(Value::as_str).unwrap_or_default()
        )));
    }

    let content = match data.get("content") {
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
            .map_err(|e| HarvestError::Api(format!("content is not JSON: {}", e)))?,
        Some(obj @ Value::Object(_)) => obj.clone(),
        _ => return Err(HarvestError::Api("content missing".into())),
    };

    let result = content.get("result").cloned().unwrap_or(Value::Null);
    let records = result
        .get("records")
        .and_then(Value::as_array)
        .map(|records| records.iter().map(|r| clean_record(r, base_url)).collect())
        .unwrap_or_default();
    let total = result
        .get("totalcount")
        .and_then(as_i64)
        .and_then(|t| usize::try_from(t).ok());

    Ok(SearchPage { records, total })
}

/// APIの1レコードを[`LinkRecord`]に整形する
pub fn clean_record(record: &Value, base_url: &str) -> LinkRecord {
    let link = text(record, "linkurl");
    let detail_url = if link.is_empty() || link.starts_with("http") {
        link
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            link.trim_start_matches('/')
        )
    };

    LinkRecord {
        title: text(record, "title").trim().to_string(),
        publish_date: text(record, "pubinwebdate"),
        biz_type: text(record, "categorytype"),
        region: text(record, "infoc"),
        record_id: text(record, "newid"),
        detail_url,
    }
}

fn text(record: &Value, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BASE: &str = "https://www.cqggzy.com";

    #[test]
    fn test_parse_with_json_string_content() {
        let data = json!({
            "code": 200,
            "content": "{\"result\": {\"records\": [{\"title\": \" a \", \"newid\": \"n1\"}], \"totalcount\": \"1\"}}"
        });
        let page = parse_search_response(&data, BASE).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].title, "a");
        assert_eq!(page.total, Some(1));
    }

    #[test]
    fn test_parse_with_object_content() {
        let data = json!({
            "code": 200,
            "content": {"result": {"records": [], "totalcount": 0}}
        });
        let page = parse_search_response(&data, BASE).unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.total, Some(0));
    }

    #[test]
    fn test_invalid_json_content_is_api_error() {
        let data = json!({"code": 200, "content": "{bad json"});
        let err = parse_search_response(&data, BASE).unwrap_err();
        assert!(matches!(err, HarvestError::Api(_)));
    }

    #[test]
    fn test_non_200_code_is_api_error() {
        let data = json!({"code": 500, "msg": "busy"});
        let err = parse_search_response(&data, BASE).unwrap_err();
        assert!(err.to_string().contains("busy"));
    }

    #[test]
    fn test_clean_record() {
        let raw = json!({
            "title": "  某项目成交结果公示 ",
            "pubinwebdate": "2026-01-05",
            "categorytype": "工程建设",
            "infoc": "渝北区",
            "newid": "8a1b",
            "linkurl": "/jyxx/004001/20260105/8a1b.html"
        });
        let link = clean_record(&raw, BASE);
        assert_eq!(link.title, "某项目成交结果公示");
        assert_eq!(link.record_id, "8a1b");
        assert_eq!(
            link.detail_url,
            "https://www.cqggzy.com/jyxx/004001/20260105/8a1b.html"
        );

        let no_link = clean_record(&json!({"newid": "x"}), BASE);
        assert_eq!(no_link.detail_url, "");
    }
}
