//! 収集対象の型定義
//!
//! 永続化されるJSONは既存の出力ファイルと同じ中国語キーを使う。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const KEY_SEQ: &str = "序号";
pub const KEY_TITLE: &str = "标题";
pub const KEY_PUBLISH_DATE: &str = "发布日期";
pub const KEY_BIZ_TYPE: &str = "业务类型";
pub const KEY_REGION: &str = "区域";
pub const KEY_RECORD_ID: &str = "记录ID";
pub const KEY_DETAIL_URL: &str = "详情链接";
pub const KEY_ERROR: &str = "错误";
pub const KEY_BODY: &str = "正文内容";

/// 検索APIから得た詳細ページへのリンク
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    #[serde(rename = "标题", default)]
    pub title: String,
    #[serde(rename = "发布日期", default)]
    pub publish_date: String,
    #[serde(rename = "业务类型", default)]
    pub biz_type: String,
    #[serde(rename = "区域", default)]
    pub region: String,
    #[serde(rename = "记录ID")]
    pub record_id: String,
    #[serde(rename = "详情链接", default)]
    pub detail_url: String,
}

/// 詳細ページ1件分の構造化データ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRecord {
    #[serde(rename = "序号")]
    pub seq: usize,
    #[serde(rename = "记录ID")]
    pub record_id: String,
    #[serde(rename = "标题", default)]
    pub title: String,
    #[serde(rename = "发布日期", default)]
    pub publish_date: String,
    #[serde(rename = "业务类型", default)]
    pub biz_type: String,
    #[serde(rename = "区域", default)]
    pub region: String,
    #[serde(rename = "详情链接", default)]
    pub detail_url: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl DetailRecord {
    /// 一覧のメタデータと解析結果を結合する
    ///
    /// 解析結果に一覧と同名のキーがあれば解析結果を優先する。
    /// 序号・记录ID・详情链接は常に一覧側の値。
    pub fn merge(seq: usize, link: &LinkRecord, mut fields: BTreeMap<String, String>) -> Self {
        let mut take = |key: &str, fallback: &str| {
            fields
                .remove(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };
        let title = take(KEY_TITLE, &link.title);
        let publish_date = take(KEY_PUBLISH_DATE, &link.publish_date);
        let biz_type = take(KEY_BIZ_TYPE, &link.biz_type);
        let region = take(KEY_REGION, &link.region);

        for reserved in [KEY_SEQ, KEY_RECORD_ID, KEY_DETAIL_URL] {
            fields.remove(reserved);
        }

        Self {
            seq,
            record_id: link.record_id.clone(),
            title,
            publish_date,
            biz_type,
            region,
            detail_url: link.detail_url.clone(),
            fields,
        }
    }

    /// CSV出力用に全列を1つのマップにまとめる
    pub fn to_row(&self) -> BTreeMap<String, String> {
        let mut row = self.fields.clone();
        row.insert(KEY_SEQ.to_string(), self.seq.to_string());
        row.insert(KEY_RECORD_ID.to_string(), self.record_id.clone());
        row.insert(KEY_TITLE.to_string(), self.title.clone());
        row.insert(KEY_PUBLISH_DATE.to_string(), self.publish_date.clone());
        row.insert(KEY_BIZ_TYPE.to_string(), self.biz_type.clone());
        row.insert(KEY_REGION.to_string(), self.region.clone());
        row.insert(KEY_DETAIL_URL.to_string(), self.detail_url.clone());
        row
    }
}

/// 再試行を使い切ってスキップしたレコード
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRecord {
    pub record_id: String,
    pub detail_url: String,
    pub reason: String,
}

/// 業務類型ごとの件数（空は「未知」）
pub fn count_by_biz_type<'a, I>(types: I) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for t in types {
        let key = if t.is_empty() { "未知" } else { t };
        *counts.entry(key.to_string()).or_default() += 1;
    }
    let mut sorted: Vec<_> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}
