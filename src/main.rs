// author: kodeholic
//
// tmcall — mini-telemeet headless 통화 클라이언트 CLI
//
// 사용법:
//   tmcall [--server URL] [--name NAME] --token TOKEN ROOM_ID
//
// 예시:
//   tmcall --token tok room-42                     # 기본 서버로 room-42 참가
//   tmcall --server ws://10.0.0.5:8080/ws --token tok --name dr.kim room-42
//
// 상태 전이를 컬러로 스트리밍하며, Ctrl-C로 정상 종료(stop)합니다.

use clap::Parser;
use colored::Colorize;
use rand::Rng;
use std::sync::Arc;

use mini_telemeet::config;
use mini_telemeet::media::SyntheticMediaDevices;
use mini_telemeet::session::{CallConfig, CallSession, CallStatus};
use mini_telemeet::signaling::WsConnector;
use mini_telemeet::utils::current_timestamp;

// ----------------------------------------------------------------------------
// [CLI 인자]
// ----------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name    = "tmcall",
    about   = "mini-telemeet 1:1 teleconsultation 통화 클라이언트",
    version,
)]
struct Cli {
    /// 시그널링 서버 URL
    #[arg(long, default_value = config::DEFAULT_SIGNALING_URL)]
    server: String,

    /// 표시 이름 (생략 시 guest_XXXX 자동 생성)
    #[arg(long)]
    name: Option<String>,

    /// Bearer 자격증명 (생략 시 NotAuthenticated 상태로 종료)
    #[arg(long, short = 't')]
    token: Option<String>,

    /// 참가할 룸 ID
    room_id: String,
}

// ----------------------------------------------------------------------------
// [메인]
// ----------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    // 환경 변수 기반 로깅 초기화 (기본값: info)
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let name = cli.name.unwrap_or_else(|| {
        format!("guest_{:04}", rand::thread_rng().gen_range(0..10_000))
    });

    println!("{}", "─".repeat(70).dimmed());
    println!(
        "  {} {}  room:{}  name:{}  {}",
        "tmcall".bold().cyan(),
        "▶".green(),
        cli.room_id.bright_white(),
        name.bright_white(),
        cli.server.dimmed(),
    );
    println!("{}", "─".repeat(70).dimmed());

    let session = CallSession::new(
        CallConfig::new(&cli.server, &name),
        Arc::new(SyntheticMediaDevices::new()),
        Arc::new(WsConnector),
    );
    let mut status_rx = session.status();

    session.start(&cli.room_id, cli.token.as_deref()).await;
    print_status(&status_rx.borrow().clone());

    // 상태 전이 스트리밍 — 터미널 상태 또는 Ctrl-C에서 종료
    loop {
        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow().clone();
                print_status(&status);
                match status {
                    CallStatus::Failed(_) | CallStatus::NotAuthenticated => break,
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("  {} 종료 요청 수신 — teardown", "·".yellow());
                break;
            }
        }
    }

    session.stop().await;
    println!("{}", "─".repeat(70).dimmed());
    println!("  통화 세션 종료");
}

// ----------------------------------------------------------------------------
// [상태 출력]
// ----------------------------------------------------------------------------

fn print_status(status: &CallStatus) {
    let label = match status {
        CallStatus::Initializing     => "initializing".dimmed().to_string(),
        CallStatus::NotAuthenticated => "not-authenticated".bright_red().bold().to_string(),
        CallStatus::Joining          => "joining".bright_cyan().to_string(),
        CallStatus::Ready            => "ready".bright_yellow().to_string(),
        CallStatus::Connecting       => "connecting".bright_magenta().to_string(),
        CallStatus::Connected        => "connected".bright_green().bold().to_string(),
        CallStatus::Failed(reason)   => format!("{} {}", "failed".bright_red().bold(), reason.dimmed()),
    };
    println!("  {} {}", format_ts(current_timestamp()).dimmed(), label);
}

/// Unix millis → "HH:MM:SS.mmm" (UTC 표시)
fn format_ts(ts_ms: u64) -> String {
    let secs   = ts_ms / 1000;
    let millis = ts_ms % 1000;

    let total_secs_today = secs % 86400;
    let hh = total_secs_today / 3600;
    let mm = (total_secs_today % 3600) / 60;
    let ss = total_secs_today % 60;

    format!("{:02}:{:02}:{:02}.{:03}", hh, mm, ss, millis)
}
