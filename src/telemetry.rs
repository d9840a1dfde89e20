use tracing_subscriber::EnvFilter;

/// `RUST_LOG`がなければ既定のフィルタでログを初期化する
pub fn init(debug: bool) {
    let default = if debug {
        "debug,chromiumoxide=info"
    } else {
        "info,trade_result_scraper=debug"
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .try_init();
}

/// カレントディレクトリの`.env`を環境変数に読み込む（既存の値は上書きしない）
pub fn load_env_file() {
    let Ok(content) = std::fs::read_to_string(".env") else {
        return;
    };
    for line in content.lines() {
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('\'').trim_matches('"');
            if !key.starts_with('#') && !key.is_empty() && std::env::var_os(key).is_none() {
                std::env::set_var(key, value);
            }
        }
    }
}
