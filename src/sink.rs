//! 詳細結果の永続化
//!
//! 1件ごとに`details.jsonl`へ追記する。最終的なJSON・CSVは
//! ジャーナルからリンク順に書き出すので、再実行しても同じ内容になる。

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::HarvestError;
use crate::storage::write_json_atomic;
use crate::types::{
    DetailRecord, LinkRecord, KEY_BIZ_TYPE, KEY_BODY, KEY_DETAIL_URL, KEY_ERROR,
    KEY_PUBLISH_DATE, KEY_REGION, KEY_SEQ, KEY_TITLE,
};

/// CSVの先頭に固定で並べる列
const LEADING_COLUMNS: &[&str] = &[
    KEY_SEQ,
    KEY_TITLE,
    KEY_PUBLISH_DATE,
    KEY_BIZ_TYPE,
    KEY_REGION,
    KEY_DETAIL_URL,
];
/// CSVの末尾に置く列（この順）
const TRAILING_COLUMNS: &[&str] = &[KEY_ERROR, KEY_BODY];

pub struct ResultSink {
    journal_path: PathBuf,
    journal: File,
    records: HashMap<String, DetailRecord>,
}

impl ResultSink {
    /// ジャーナルを開き、既存の結果を読み込む
    ///
    /// 同じIDが複数行あれば後の行を採用する。書きかけの最終行は捨てる。
    pub fn open(journal_path: impl Into<PathBuf>) -> Result<Self, HarvestError> {
        let journal_path = journal_path.into();
        if let Some(parent) = journal_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut records = HashMap::new();
        if journal_path.exists() {
            // 書きかけの行は文字の途中で切れていることがあるのでバイト列のまま読む
            let mut reader = BufReader::new(File::open(&journal_path)?);
            let mut line = Vec::new();
            let mut lineno = 0;
            loop {
                line.clear();
                if reader.read_until(b'\n', &mut line)? == 0 {
                    break;
                }
                lineno += 1;
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                match serde_json::from_slice::<DetailRecord>(&line) {
                    Ok(record) => {
                        records.insert(record.record_id.clone(), record);
                    }
                    Err(e) => warn!(
                        "Skipping unreadable journal line {} in {:?}: {}",
                        lineno,
                        journal_path,
                        e
                    ),
                }
            }
        }

        let mut journal = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&journal_path)?;
        terminate_last_line(&mut journal)?;

        debug!("Journal {:?}: {} records", journal_path, records.len());
        Ok(Self {
            journal_path,
            journal,
            records,
        })
    }

    pub fn contains(&self, record_id: &str) -> bool {
        self.records.contains_key(record_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, record_id: &str) -> Option<&DetailRecord> {
        self.records.get(record_id)
    }

    /// 1件を追記する。戻った時点でOSには渡っている
    pub fn persist(&mut self, record: DetailRecord) -> Result<(), HarvestError> {
        let line = serde_json::to_string(&record)?;
        writeln!(self.journal, "{}", line)?;
        self.journal.flush()?;
        self.records.insert(record.record_id.clone(), record);
        Ok(())
    }

    /// ディスクまで同期する。進捗の保存より先に呼ぶ
    pub fn sync(&mut self) -> Result<(), HarvestError> {
        self.journal.sync_data()?;
        Ok(())
    }

    /// リンク順に並べた結果。リンク集合にないものは含めない
    pub fn ordered<'a>(&'a self, links: &[LinkRecord]) -> Vec<&'a DetailRecord> {
        let mut seen = HashSet::new();
        links
            .iter()
            .filter(|link| seen.insert(link.record_id.as_str()))
            .filter_map(|link| self.records.get(&link.record_id))
            .collect()
    }

    /// `details.json`と`details.csv`を書き出す。書き出した件数を返す
    pub fn export(
        &self,
        links: &[LinkRecord],
        json_path: &Path,
        csv_path: &Path,
    ) -> Result<usize, HarvestError> {
        let ordered = self.ordered(links);
        write_json_atomic(json_path, &ordered)?;
        write_csv(csv_path, &ordered)?;

        info!(
            "Exported {} records to {:?} and {:?} (journal {:?})",
            ordered.len(),
            json_path,
            csv_path,
            self.journal_path
        );
        Ok(ordered.len())
    }
}

/// 前回の書き込みが途中で切れていれば改行を補う
fn terminate_last_line(file: &mut File) -> Result<(), HarvestError> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        file.write_all(b"\n")?;
    }
    Ok(())
}

/// 固定列、その他の列（名前順）、错误、正文内容の順
fn csv_columns(records: &[&DetailRecord]) -> Vec<String> {
    let mut extras = BTreeSet::new();
    let mut trailing_present = HashSet::new();
    for record in records {
        for key in record.to_row().into_keys() {
            if TRAILING_COLUMNS.contains(&key.as_str()) {
                trailing_present.insert(key);
            } else if !LEADING_COLUMNS.contains(&key.as_str()) {
                extras.insert(key);
            }
        }
    }

    let mut columns: Vec<String> = LEADING_COLUMNS.iter().map(|c| c.to_string()).collect();
    columns.extend(extras);
    columns.extend(
        TRAILING_COLUMNS
            .iter()
            .filter(|c| trailing_present.contains(**c))
            .map(|c| c.to_string()),
    );
    columns
}

/// Excelで開けるようにBOM付きUTF-8で書く
fn write_csv(path: &Path, records: &[&DetailRecord]) -> Result<(), HarvestError> {
    let columns = csv_columns(records);
    let tmp = path.with_extension("csv.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all("\u{feff}".as_bytes())?;

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(&columns)?;
        for record in records {
            let row = record.to_row();
            writer.write_record(
                columns
                    .iter()
                    .map(|c| row.get(c).map(String::as_str).unwrap_or("")),
            )?;
        }
        let file = writer
            .into_inner()
            .map_err(|e| HarvestError::Persistence(e.into_error()))?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
