//! `opshound chat` — Interactive or single-message chat mode.
//!
//! The catalog ships empty here: diagnostic tools (log search, ticket
//! lookup, pipeline status) are registered by the surrounding
//! deployment through the library API. A bare `opshound chat` still
//! answers from the model alone.

use opshound_agent::{ExchangeEvent, Orchestrator};
use opshound_config::AppConfig;
use opshound_core::tool::ToolCatalog;
use opshound_telemetry::MetricsRecorder;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

pub async fn run(message: Option<String>, plain: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    OPSHOUND_API_KEY=sk-ant-...");
        eprintln!("    ANTHROPIC_API_KEY=sk-ant-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let endpoint = Arc::new(opshound_endpoint::from_config(&config)?);
    let catalog = Arc::new(ToolCatalog::new());
    let metrics = Arc::new(MetricsRecorder::with_latency_capacity(
        config.telemetry.latency_samples,
    ));

    let agent = Orchestrator::new(endpoint, catalog, Arc::clone(&metrics))
        .with_config(&config.orchestrator)
        .with_max_tokens(config.endpoint.max_tokens);

    if let Some(msg) = message {
        // Single message mode
        exchange(&agent, &msg, None, plain).await;
        return Ok(());
    }

    // Interactive mode
    println!("opshound — diagnostics assistant ({})", config.model);
    println!("Type a question, /usage for metrics, /quit to exit.");
    println!();

    let mut transcript = None;
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/usage" => {
                let snapshot = metrics.snapshot();
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                continue;
            }
            _ => {}
        }

        transcript = Some(exchange(&agent, line, transcript, plain).await);
        println!();
    }

    metrics.log_summary();
    Ok(())
}

/// Run one exchange, printing output as it arrives, and return the
/// transcript for continuation.
async fn exchange(
    agent: &Orchestrator,
    message: &str,
    prior: Option<opshound_core::transcript::Transcript>,
    plain: bool,
) -> opshound_core::transcript::Transcript {
    if plain {
        let result = agent.submit(message, prior).await;
        println!("{}", result.reply);
        if !result.tools_used.is_empty() {
            eprintln!("  [tools: {}]", result.tools_used.join(", "));
        }
        return result.transcript;
    }

    let (tx, mut rx) = mpsc::channel(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ExchangeEvent::Token { text } => {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                ExchangeEvent::ToolStart { name, .. } => {
                    eprintln!("\n  · running {name}…");
                }
                ExchangeEvent::ToolEnd {
                    name,
                    is_error,
                    truncated,
                    ..
                } => {
                    if is_error {
                        eprintln!("  · {name} failed");
                    } else if truncated {
                        eprintln!("  · {name} done (truncated)");
                    }
                }
                ExchangeEvent::Error { message, .. } => {
                    eprintln!("\n{message}");
                }
                _ => {}
            }
        }
    });

    let result = agent.submit_streaming(message, prior, tx).await;
    let _ = printer.await;
    println!();

    if result.hit_limit {
        // The fallback reply never streamed as tokens; print it whole.
        println!("{}", result.reply);
    }
    result.transcript
}
