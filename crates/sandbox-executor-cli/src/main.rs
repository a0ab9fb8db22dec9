use std::io::{self, Read};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sandbox_executor_core::config::Config;
use sandbox_executor_core::providers::local::LocalProvider;
use sandbox_executor_core::providers::Provider;
use sandbox_executor_core::registry::ProviderRegistry;
use sandbox_executor_core::types::{ExecutionRequest, ProviderKind, Runtime};
use sandbox_executor_core::Client;

/// Warm-pool sandbox executor smoke-test tool.
#[derive(Parser, Debug)]
#[command(name = "sandbox-executor-cli", about = "Exercise the sandbox executor end-to-end")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a snippet of code through the local warm pool.
    Run {
        /// Read source from file instead of stdin.
        #[arg(long)]
        file: Option<std::path::PathBuf>,
        /// Runtime tag, e.g. python:3.11, node:20, go:1.21.
        #[arg(long, default_value = "python:3.11")]
        runtime: String,
        /// Timeout in milliseconds.
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
    },
    /// Pre-warm `count` containers for a runtime.
    WarmUp {
        #[arg(long, default_value = "python:3.11")]
        runtime: String,
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Print the local provider's pool status for a runtime.
    Status {
        #[arg(long, default_value = "python:3.11")]
        runtime: String,
    },
}

fn parse_runtime(s: &str) -> Runtime {
    match s {
        "python:3.11" => Runtime::Python311,
        "python:3.12" => Runtime::Python312,
        "node:20" => Runtime::Node20,
        "node:22" => Runtime::Node22,
        "go:1.21" => Runtime::Go121,
        "go:1.22" => Runtime::Go122,
        "rust:latest" => Runtime::RustLatest,
        "java:17" => Runtime::Java17,
        "java:21" => Runtime::Java21,
        other => {
            eprintln!("unknown runtime '{other}', defaulting to python:3.11");
            Runtime::Python311
        }
    }
}

fn read_code(file: Option<std::path::PathBuf>) -> String {
    match file {
        Some(path) => std::fs::read_to_string(&path).unwrap_or_else(|e| {
            eprintln!("error reading file: {e}");
            std::process::exit(1);
        }),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).unwrap_or_else(|e| {
                eprintln!("error reading stdin: {e}");
                std::process::exit(1);
            });
            buf
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("error loading config: {e}");
        std::process::exit(1);
    });

    let provider = LocalProvider::new(config).unwrap_or_else(|e| {
        eprintln!("error connecting to docker: {e}");
        std::process::exit(1);
    });

    match args.command {
        Command::Run {
            file,
            runtime,
            timeout_ms,
        } => {
            let runtime = parse_runtime(&runtime);
            let code = read_code(file);
            let registry = Arc::new(ProviderRegistry::new());
            registry.register(Arc::new(provider));
            registry.set_default(ProviderKind::LocalDocker).await;
            let client = Client::new(registry, ProviderKind::LocalDocker, false);

            let mut request = match ExecutionRequest::new(code, runtime) {
                Ok(r) => r,
                Err(e) => {
                    println!("{}", serde_json::json!({"error": e.to_string()}));
                    return;
                }
            };
            request.timeout_ms = timeout_ms;

            match client.execute(request).await {
                Ok(result) => println!("{}", serde_json::to_string(&result).expect("serializable")),
                Err(e) => println!("{}", serde_json::json!({"error": e.to_string()})),
            }
        }
        Command::WarmUp { runtime, count } => {
            let runtime = parse_runtime(&runtime);
            match provider.warm_up(runtime, count).await {
                Ok(created) => println!("{}", serde_json::json!({"created": created})),
                Err(e) => println!("{}", serde_json::json!({"error": e.to_string()})),
            }
        }
        Command::Status { runtime } => {
            let runtime = parse_runtime(&runtime);
            let status = provider.pool().status(runtime).await;
            println!("{}", serde_json::to_string(&status).expect("serializable"));
        }
    }
}
