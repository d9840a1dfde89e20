//! 絞り込み条件と検索APIボディの組み立て

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::config::FacetFields;
use crate::error::HarvestError;

pub const DEFAULT_INFO_TYPE: &str = "交易结果";
const ALL_LABEL: &str = "全部";
const TIME_FIELD: &str = "webdate";

/// 発布時間の選択肢
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimePeriod {
    Today,
    ThreeDays,
    Week,
    Month,
    #[default]
    ThreeMonths,
    HalfYear,
    Year,
    All,
}

impl TimePeriod {
    /// 遡る日数。`Today`は当日のみで0、`All`は無制限
    pub fn days(self) -> Option<u64> {
        match self {
            TimePeriod::Today => Some(0),
            TimePeriod::ThreeDays => Some(3),
            TimePeriod::Week => Some(7),
            TimePeriod::Month => Some(30),
            TimePeriod::ThreeMonths => Some(90),
            TimePeriod::HalfYear => Some(182),
            TimePeriod::Year => Some(365),
            TimePeriod::All => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimePeriod::Today => "今天",
            TimePeriod::ThreeDays => "近三天",
            TimePeriod::Week => "近一周",
            TimePeriod::Month => "近一月",
            TimePeriod::ThreeMonths => "近三月",
            TimePeriod::HalfYear => "近半年",
            TimePeriod::Year => "近一年",
            TimePeriod::All => ALL_LABEL,
        }
    }

    /// `[start 00:00:00, today 23:59:59]`
    pub fn range(self, today: NaiveDate) -> Option<(String, String)> {
        let days = self.days()?;
        let start = today
            .checked_sub_days(chrono::Days::new(days))
            .unwrap_or(NaiveDate::MIN);
        Some((
            format!("{} 00:00:00", start.format("%Y-%m-%d")),
            format!("{} 23:59:59", today.format("%Y-%m-%d")),
        ))
    }
}

impl FromStr for TimePeriod {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let period = match s.trim() {
            "" => TimePeriod::default(),
            "今天" | "当天" => TimePeriod::Today,
            "近三天" => TimePeriod::ThreeDays,
            "近一周" => TimePeriod::Week,
            "近一月" => TimePeriod::Month,
            "近三月" => TimePeriod::ThreeMonths,
            "近半年" => TimePeriod::HalfYear,
            "近一年" => TimePeriod::Year,
            ALL_LABEL => TimePeriod::All,
            other => {
                return Err(HarvestError::Config(format!(
                    "未対応の発布時間: {} (今天/近三天/近一周/近一月/近三月/近半年/近一年/全部)",
                    other
                )))
            }
        };
        Ok(period)
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 検索条件（5つの独立した絞り込み）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterQuery {
    pub keyword: String,
    pub region: Option<String>,
    pub biz_type: Option<String>,
    pub info_type: Option<String>,
    pub time_period: TimePeriod,
}

impl Default for FilterQuery {
    fn default() -> Self {
        Self {
            keyword: String::new(),
            region: None,
            biz_type: None,
            info_type: Some(DEFAULT_INFO_TYPE.to_string()),
            time_period: TimePeriod::default(),
        }
    }
}

impl FilterQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = keyword.into().trim().to_string();
        self
    }

    pub fn with_region(mut self, region: impl AsRef<str>) -> Self {
        self.region = facet(region.as_ref());
        self
    }

    pub fn with_biz_type(mut self, biz_type: impl AsRef<str>) -> Self {
        self.biz_type = facet(biz_type.as_ref());
        self
    }

    pub fn with_info_type(mut self, info_type: impl AsRef<str>) -> Self {
        self.info_type = facet(info_type.as_ref());
        self
    }

    pub fn with_time_period(mut self, period: TimePeriod) -> Self {
        self.time_period = period;
        self
    }

    /// 捕捉したテンプレートに条件とページ位置を当てはめる
    ///
    /// 条件で管理するフィールドのconditionは置き換え、それ以外は残す。
    pub fn search_body(
        &self,
        template: &Value,
        fields: &FacetFields,
        page: usize,
        page_size: usize,
        today: NaiveDate,
    ) -> Value {
        let mut body: Map<String, Value> = template.as_object().cloned().unwrap_or_default();

        body.insert("pn".to_string(), json!(page));
        body.insert("rn".to_string(), json!(page_size));
        body.insert("wd".to_string(), json!(self.keyword));

        let managed = [&fields.region, &fields.biz_type, &fields.info_type];
        let mut conditions = array_field(&body, "condition");
        conditions.retain(|c| match field_name(c) {
            Some(name) => !managed.iter().any(|m| m.as_str() == name),
            None => true,
        });
        for (field, value) in [
            (&fields.region, &self.region),
            (&fields.biz_type, &self.biz_type),
            (&fields.info_type, &self.info_type),
        ] {
            if let Some(value) = value {
                conditions.push(json!({
                    "fieldName": field,
                    "equal": value,
                    "notEqual": null,
                    "equalList": null,
                    "notEqualList": null,
                    "isLike": true,
                    "likeType": 2
                }));
            }
        }
        body.insert("condition".to_string(), non_empty(conditions));

        let mut times = array_field(&body, "time");
        times.retain(|t| field_name(t) != Some(TIME_FIELD));
        if let Some((start, end)) = self.time_period.range(today) {
            times.push(json!({
                "fieldName": TIME_FIELD,
                "startTime": start,
                "endTime": end
            }));
        }
        body.insert("time".to_string(), non_empty(times));

        Value::Object(body)
    }
}

/// 空文字と「全部」は絞り込みなし
fn facet(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value == ALL_LABEL {
        None
    } else {
        Some(value.to_string())
    }
}

fn array_field(body: &Map<String, Value>, key: &str) -> Vec<Value> {
    body.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn field_name(entry: &Value) -> Option<&str> {
    entry.get("fieldName").and_then(Value::as_str)
}

fn non_empty(entries: Vec<Value>) -> Value {
    if entries.is_empty() {
        Value::Null
    } else {
        Value::Array(entries)
    }
}
