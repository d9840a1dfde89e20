//! 公共資源交易結果スクレイパー CLI
//!
//! 実行方法:
//! ```
//! cargo run -- links -t 近三月
//! cargo run -- details --concurrency 10
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use trade_result_scraper::{
    telemetry, FilterQuery, HarvestConfig, HarvestError, HarvestService, TimePeriod,
};

#[derive(Parser, Debug)]
#[command(name = "trade-result-scraper", version, about = "公共資源交易結果の収集")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// 出力ディレクトリ
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// 同時取得数（1〜20）
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// ブラウザを表示する
    #[arg(long, global = true)]
    headful: bool,

    /// デバッグログとスクリーンショット
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 検索結果のリンクを収集して links.json に保存
    Links {
        /// キーワード
        #[arg(short = 'k', long, default_value = "")]
        keyword: String,
        /// 区域（全部 = 指定なし）
        #[arg(short = 'r', long, default_value = "全部")]
        region: String,
        /// 業務類型（全部 = 指定なし）
        #[arg(short = 'b', long, default_value = "全部")]
        biz_type: String,
        /// 信息類型
        #[arg(short = 'i', long, default_value = trade_result_scraper::DEFAULT_INFO_TYPE)]
        info_type: String,
        /// 発布時間（今天/近三天/近一周/近一月/近三月/近半年/近一年/全部）
        #[arg(short = 't', long, default_value = "近三月")]
        time_period: TimePeriod,
    },
    /// links.json の詳細を取得して details.json / details.csv に保存
    Details,
}

fn build_config(args: &CommonArgs) -> HarvestConfig {
    let mut config = HarvestConfig::from_env();
    if let Some(dir) = &args.output_dir {
        config = config.with_output_dir(dir);
    }
    if let Some(n) = args.concurrency {
        config = config.with_concurrency(n);
    }
    if args.headful {
        config = config.with_headless(false);
    }
    if args.debug {
        config = config.with_debug(true);
    }
    config
}

async fn run(cli: Cli) -> Result<(), HarvestError> {
    let service = HarvestService::new(build_config(&cli.common))?;

    match cli.command {
        Command::Links {
            keyword,
            region,
            biz_type,
            info_type,
            time_period,
        } => {
            let query = FilterQuery::new()
                .with_keyword(keyword)
                .with_region(region)
                .with_biz_type(biz_type)
                .with_info_type(info_type)
                .with_time_period(time_period);

            let result = service.discover(query).await?;
            info!(
                "{} links saved to {:?}",
                result.links.len(),
                result.links_path
            );
        }
        Command::Details => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Ctrl-C received, finishing in-flight requests...");
                    on_signal.cancel();
                }
            });

            let report = service.harvest(cancel).await?;
            if report.cancelled {
                info!(
                    "Stopped with {}/{} done; run details again to resume",
                    report.completed(),
                    report.total
                );
            }
            for failed in &report.failed {
                warn!("Failed: {} ({})", failed.detail_url, failed.reason);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::load_env_file();
    let cli = Cli::parse();
    telemetry::init(cli.common.debug);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
