//! 선물 트레이딩 엔진 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 설정 파일 + .env의 API 키로 실행
//! sentinel run --config config/sentinel.toml
//!
//! # 심볼/레버리지/간격 재정의, 테스트넷
//! sentinel run --symbol ETHUSDT --leverage 5 --interval 1h --testnet
//!
//! # 1회 정합 후 원장 출력
//! sentinel sync --json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use sentinel_cli::commands::{run::run_engine, sync::sync_ledger, ConfigOverrides};
use sentinel_core::Timeframe;

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(about = "Binance USDⓈ-M 선물 포지션/보호 주문 관리 엔진", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 엔진 실행 (Ctrl-C/SIGTERM까지)
    Run(EngineArgs),

    /// 거래소 상태로 1회 정합 후 원장 출력
    Sync {
        #[command(flatten)]
        engine: EngineArgs,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct EngineArgs {
    /// 설정 파일 (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 거래 심볼 (예: BTCUSDT)
    #[arg(short, long)]
    symbol: Option<String>,

    /// 레버리지
    #[arg(short, long)]
    leverage: Option<u32>,

    /// 캔들 간격 (예: 15m, 1h)
    #[arg(short, long)]
    interval: Option<Timeframe>,

    /// 테스트넷 사용
    #[arg(long)]
    testnet: bool,
}

impl From<EngineArgs> for ConfigOverrides {
    fn from(args: EngineArgs) -> Self {
        Self {
            config_path: args.config,
            symbol: args.symbol,
            leverage: args.leverage,
            interval: args.interval,
            testnet: args.testnet,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env가 없어도 무방
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run_engine(args.into()).await,
        Commands::Sync { engine, json } => sync_ledger(engine.into(), json).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
