use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use stepflow::engine::{EngineEvent, ScenarioOutcome, StepStatus, write_report};
use stepflow::{StepRegistry, SuiteRunner, load_suite_from_file};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "stepflow")]
#[command(about = "시나리오 단위 드라이버 생명주기를 관리하는 BDD 실행기")]
#[command(version)]
struct Cli {
    /// debug 로그를 출력한다.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 스위트를 실행한다.
    Run {
        /// 스위트 YAML 파일 경로.
        suite: PathBuf,
        /// 동시에 실행할 시나리오 수. 스위트 설정보다 우선한다.
        #[arg(short, long, env = "STEPFLOW_PARALLEL")]
        parallel: Option<usize>,
        /// 이 태그가 있는 시나리오만 실행한다.
        #[arg(short, long)]
        tag: Option<String>,
        /// JSON 보고서 경로. 스위트 설정보다 우선한다.
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
    /// 스위트를 실행하지 않고 검사한다.
    Validate {
        /// 스위트 YAML 파일 경로.
        suite: PathBuf,
    },
}

/// 로그 설정 후 하위 명령을 실행하는 진입점이다.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let result = match cli.command {
        Command::Run {
            suite,
            parallel,
            tag,
            report,
        } => run(suite, parallel, tag, report).await,
        Command::Validate { suite } => validate(suite),
    };
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("오류: {err:#}");
            ExitCode::from(2)
        }
    }
}

/// 스위트를 실행하고 모든 시나리오가 통과했는지 반환한다.
async fn run(
    path: PathBuf,
    parallel: Option<usize>,
    tag: Option<String>,
    report_path: Option<PathBuf>,
) -> anyhow::Result<bool> {
    let suite = load_suite_from_file(&path)
        .with_context(|| format!("스위트 로딩 실패: {}", path.display()))?;
    let registry = StepRegistry::with_builtin()?;
    let problems = suite.validate(&registry);
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("  - {problem}");
        }
        anyhow::bail!("스위트 검사에서 {}개의 문제가 발견되었습니다.", problems.len());
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let mut runner = SuiteRunner::from_suite(&suite, registry)?
        .with_tag_filter(tag)
        .with_events(tx)
        .with_cancel(cancel.clone());
    if let Some(parallel) = parallel {
        runner = runner.with_parallelism(parallel);
    }

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("중단 요청을 받았습니다. 드라이버 정리 후 종료합니다.");
            signal_token.cancel();
        }
    });
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let report = runner.run_suite(&suite.name, &suite.scenarios).await;
    drop(runner);
    let _ = printer.await;

    if let Some(path) = report_path.or_else(|| suite.settings.report_path.clone()) {
        write_report(&report, &path).await?;
        info!("보고서 저장: {}", path.display());
    }
    println!(
        "\n{}: 통과 {} / 실패 {} ({}ms)",
        report.suite, report.passed, report.failed, report.duration_ms
    );
    Ok(report.is_success())
}

/// 스위트를 검사하고 문제가 없는지 반환한다.
fn validate(path: PathBuf) -> anyhow::Result<bool> {
    let suite = load_suite_from_file(&path)
        .with_context(|| format!("스위트 로딩 실패: {}", path.display()))?;
    let registry = StepRegistry::with_builtin()?;
    let mut problems = suite.validate(&registry);
    if let Err(err) = suite.build_hooks() {
        if problems.is_empty() {
            problems.push(err);
        }
    }
    if problems.is_empty() {
        println!(
            "{}: 시나리오 {}개, 드라이버 {}개 검사 완료",
            suite.name,
            suite.scenarios.len(),
            suite.drivers.len()
        );
        return Ok(true);
    }
    for problem in &problems {
        println!("  - {problem}");
    }
    Ok(false)
}

/// 이벤트를 한 줄씩 출력한다.
fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::ScenarioStarted { scenario, tags } => {
            println!("\n▶ {scenario} {}", tags.join(" "));
        }
        EngineEvent::StepStarted { .. } => {}
        EngineEvent::StepLog {
            scenario,
            step,
            line,
        } => println!("    [{scenario}#{step}] {line}"),
        EngineEvent::StepFinished {
            scenario,
            step,
            status,
        } => {
            let mark = match status {
                StepStatus::Passed => "✓".to_string(),
                StepStatus::Failed(message) => format!("✗ {message}"),
                StepStatus::Skipped(reason) => format!("- {reason}"),
                StepStatus::Pending | StepStatus::Running => return,
            };
            println!("  [{scenario}#{step}] {mark}");
        }
        EngineEvent::ScenarioFinished { scenario, outcome } => {
            let label = match outcome {
                ScenarioOutcome::Passed => "통과",
                ScenarioOutcome::Failed => "실패",
                ScenarioOutcome::Cancelled => "중단",
            };
            println!("◀ {scenario}: {label}");
        }
        EngineEvent::SuiteFinished { .. } => {}
    }
}
