use facet::Facet;
use figue as args;
use threadlens::tools::{TOOL_THREAD_INFO, TOOL_THREAD_STACK_INFO, call_tool};
use threadlens::{DiagnosticEngine, EngineConfig, Host};
use tracing::info;

mod scenarios;

type AnyResult<T> = Result<T, String>;

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    /// Number of diagnostic rounds to run against the scenario.
    #[facet(args::named, default)]
    repeat: Option<u32>,
    /// Print the JSON tool envelopes instead of the text blocks.
    #[facet(args::named, default)]
    json: bool,
    #[facet(args::subcommand)]
    command: CommandKind,
}

#[derive(Facet, Debug)]
#[repr(u8)]
enum CommandKind {
    IdleWorkers,
    MutexLockOrderInversion,
    TimedLockInversion,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run() -> AnyResult<()> {
    let cli = parse_cli()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _main = threadlens_threads::register_thread_guard("main");
    let config = EngineConfig::from_env().map_err(|e| format!("invalid configuration: {e}"))?;
    let engine = DiagnosticEngine::new(Host::live(), config);

    match cli.command {
        CommandKind::IdleWorkers => scenarios::idle_workers::run().await?,
        CommandKind::MutexLockOrderInversion => scenarios::mutex_lock_order_inversion::run().await?,
        CommandKind::TimedLockInversion => scenarios::timed_lock_inversion::run().await?,
    }
    info!(scenario = ?cli.command, "scenario ready");

    let rounds = cli.repeat.unwrap_or(1).max(1);
    for round in 1..=rounds {
        if rounds > 1 {
            println!("--- round {round}/{rounds} ---");
        }
        for tool in [TOOL_THREAD_INFO, TOOL_THREAD_STACK_INFO] {
            let response = call_tool(&engine, tool).await;
            if cli.json {
                println!("{}", response.to_json()?);
            } else {
                println!("{}", response.text().unwrap_or_default());
            }
            if response.is_error {
                return Err(format!("{tool} failed"));
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn parse_cli() -> AnyResult<Cli> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("threadlens-examples")
                .description("Run threadlens scenarios and print the diagnostics")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();

    args::Driver::new(figue_config)
        .run()
        .into_result()
        .map(|v| v.value)
        .map_err(|e| e.to_string())
}
