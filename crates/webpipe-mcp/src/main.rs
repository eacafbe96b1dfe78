use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;

use webpipe::orchestrator;
use webpipe::state::AppState;
use webpipe::tools::build_registry;
use webpipe::transport;

#[derive(Parser, Debug)]
#[command(name = "webpipe")]
#[command(about = "Product-research tool runtime (MCP SSE server + research CLI)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the MCP SSE transport (tool registry served over HTTP).
    Serve(ServeCmd),
    /// Run the research orchestrator against a free-form shopping prompt.
    Research(ResearchCmd),
    /// Diagnose configuration/launch issues (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct ServeCmd {
    /// Host to bind. Falls back to MCP_HOST, then 127.0.0.1.
    #[arg(long, env = "MCP_HOST", default_value = "127.0.0.1")]
    host: String,
    /// Port to bind. Falls back to MCP_PORT, then 8787.
    #[arg(long, env = "MCP_PORT", default_value_t = 8787)]
    port: u16,
}

#[derive(clap::Args, Debug)]
struct ResearchCmd {
    /// Free-form shopping prompt, e.g. "mechanical keyboard under $100".
    prompt: String,
    /// Suppress progress lines on stderr; print only the final JSON.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = false)]
    quiet: bool,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

fn has_env(k: &str) -> bool {
    std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let app = Arc::new(AppState::new());
            let registry = Arc::new(build_registry());
            let router = transport::router(app, registry);
            let addr = format!("{}:{}", args.host, args.port);
            eprintln!("webpipe: MCP SSE transport listening on http://{addr}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            axum::serve(listener, router).await?;
        }
        Commands::Research(args) => {
            let app = AppState::new();
            let quiet = args.quiet;
            let options = orchestrator::run(&app, &args.prompt, |update| {
                if !quiet {
                    eprintln!("webpipe: {update}");
                }
            })
            .await?;
            println!("{}", serde_json::to_string_pretty(&options)?);
        }
        Commands::Doctor(args) => {
            let t0 = std::time::Instant::now();
            let mut checks: Vec<serde_json::Value> = Vec::new();

            checks.push(serde_json::json!({
                "name": "mcp_host_port",
                "ok": true,
                "message": format!(
                    "MCP_HOST={} MCP_PORT={}",
                    std::env::var("MCP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                    std::env::var("MCP_PORT").unwrap_or_else(|_| "8787".to_string()),
                ),
            }));

            let node_path_configured = has_env("WEBPIPE_NODE_PATH") || has_env("WEBPIPE_NODE");
            let render_disabled = has_env("WEBPIPE_RENDER_DISABLE");
            checks.push(serde_json::json!({
                "name": "driven_browser_runtime",
                "ok": true,
                "message": if render_disabled {
                    "driven-browser runtime disabled via WEBPIPE_RENDER_DISABLE"
                } else if node_path_configured {
                    "custom Node path configured for the driven-browser runtime"
                } else {
                    "driven-browser runtime will use `node` from PATH"
                },
                "node_path_configured": node_path_configured,
                "render_disabled": render_disabled,
            }));

            let registry = build_registry();
            let tool_count = registry.list().len();
            checks.push(serde_json::json!({
                "name": "tool_registry",
                "ok": tool_count > 0,
                "message": format!("{tool_count} tools registered"),
                "tool_count": tool_count,
            }));

            let ok = checks.iter().all(|c| c["ok"].as_bool().unwrap_or(false));
            let payload = serde_json::json!({
                "schema_version": 1,
                "kind": "doctor",
                "ok": ok,
                "name": "webpipe",
                "version": env!("CARGO_PKG_VERSION"),
                "platform": {
                    "os": std::env::consts::OS,
                    "arch": std::env::consts::ARCH,
                },
                "elapsed_ms": t0.elapsed().as_millis(),
                "checks": checks,
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => {
                    println!("webpipe {} (ok={})", env!("CARGO_PKG_VERSION"), ok);
                    for check in &checks {
                        println!(
                            "{}: ok={} {}",
                            check["name"].as_str().unwrap_or(""),
                            check["ok"].as_bool().unwrap_or(false),
                            check["message"].as_str().unwrap_or(""),
                        );
                    }
                }
                _ => println!("{payload}"),
            }
        }
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "webpipe",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("webpipe {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{v}"),
            }
        }
    }

    Ok(())
}
