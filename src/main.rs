//! CLI entry point for the tickload driver.

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use tickload::{Endpoint, Runner, RunnerConfig, SessionConfig};

struct CliConfig {
    endpoint: Endpoint,
    runner: RunnerConfig,
    session: SessionConfig,
}

fn parse_args() -> Result<CliConfig, String> {
    let args: Vec<String> = std::env::args().collect();

    let mut addr = "ws://localhost:8080".to_string();
    let mut virtual_users: usize = 1;
    let mut iterations: usize = 1;
    let mut max_concurrent: usize = 256;
    let mut stagger_ms: u64 = 0;
    let mut interval_ms: u64 = 1000;
    let mut duration_ms: u64 = 5000;

    fn take(args: &[String], i: &mut usize, flag: &str) -> Result<String, String> {
        *i += 1;
        args.get(*i)
            .cloned()
            .ok_or_else(|| format!("{flag} requires a value"))
    }

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-a" | "--addr" => {
                addr = take(&args, &mut i, "--addr")?;
            }
            "-u" | "--vus" => {
                virtual_users = take(&args, &mut i, "--vus")?
                    .parse()
                    .map_err(|_| "--vus expects a number".to_string())?;
            }
            "-n" | "--iterations" => {
                iterations = take(&args, &mut i, "--iterations")?
                    .parse()
                    .map_err(|_| "--iterations expects a number".to_string())?;
            }
            "--max-concurrent" => {
                max_concurrent = take(&args, &mut i, "--max-concurrent")?
                    .parse()
                    .map_err(|_| "--max-concurrent expects a number".to_string())?;
            }
            "--stagger-ms" => {
                stagger_ms = take(&args, &mut i, "--stagger-ms")?
                    .parse()
                    .map_err(|_| "--stagger-ms expects milliseconds".to_string())?;
            }
            "--interval-ms" => {
                interval_ms = take(&args, &mut i, "--interval-ms")?
                    .parse()
                    .map_err(|_| "--interval-ms expects milliseconds".to_string())?;
            }
            "--duration-ms" => {
                duration_ms = take(&args, &mut i, "--duration-ms")?
                    .parse()
                    .map_err(|_| "--duration-ms expects milliseconds".to_string())?;
            }
            "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                return Err(format!("Unknown argument: {other} (see --help)"));
            }
        }
        i += 1;
    }

    let endpoint = Endpoint::parse(&addr).map_err(|e| e.to_string())?;

    Ok(CliConfig {
        endpoint,
        runner: RunnerConfig::new()
            .with_virtual_users(virtual_users)
            .with_iterations(iterations)
            .with_max_concurrent(max_concurrent)
            .with_stagger(Duration::from_millis(stagger_ms)),
        session: SessionConfig::new()
            .with_send_interval(Duration::from_millis(interval_ms))
            .with_session_duration(Duration::from_millis(duration_ms)),
    })
}

fn print_help() {
    println!("tickload - WebSocket subscriber load driver");
    println!();
    println!("USAGE:");
    println!("    tickload [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -a, --addr <ADDR>          Target address [default: ws://localhost:8080]");
    println!("    -u, --vus <N>              Virtual users [default: 1]");
    println!("    -n, --iterations <N>       Iterations per virtual user [default: 1]");
    println!("        --max-concurrent <N>   Max simultaneously open sessions [default: 256]");
    println!("        --stagger-ms <MS>      Delay between virtual-user starts [default: 0]");
    println!("        --interval-ms <MS>     Subscribe period [default: 1000]");
    println!("        --duration-ms <MS>     Open-to-close session length [default: 5000]");
    println!("        --help                 Show this help");
    println!();
    println!("EXAMPLES:");
    println!("    # One smoke-test session against a local server");
    println!("    tickload");
    println!();
    println!("    # 500 subscribers, three sessions each");
    println!("    tickload -a ws://10.0.0.7:8080 -u 500 -n 3");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match parse_args() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Error: {message}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        endpoint = %config.endpoint,
        vus = config.runner.virtual_users,
        iterations = config.runner.iterations,
        "starting run"
    );

    let runner = Runner::new(config.endpoint)
        .with_session_config(config.session)
        .with_runner_config(config.runner);
    let summary = runner.run().await;

    println!();
    print!("{}", summary.ledger);
    println!(
        "iterations: {}  sent: {}  received: {}  handshake failures: {}",
        summary.iterations,
        summary.messages_sent,
        summary.server_messages,
        summary.handshake_failures
    );
    if summary.passed() {
        println!("✓ all checks passed");
    } else {
        println!("✗ some checks failed");
    }
}
