//! Warden: trust-and-safety layer for an AI assistant backend.
//!
//! The transport layer embeds the library crates directly; this binary wires
//! them from configuration and exposes offline commands for operators.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod demo;
mod state;

use state::AppState;
use warden_core::WardenConfig;
use warden_guard::REFUSAL_MESSAGE;

fn resolve_config_path() -> PathBuf {
    std::env::var("WARDEN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("warden.json"))
}

/// Read the argument as a file path, or stdin when absent or `-`.
fn read_input(arg: Option<&str>) -> anyhow::Result<String> {
    match arg {
        Some(path) if path != "-" => std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("Failed to read {}", path)),
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

fn read_json(arg: Option<&str>) -> anyhow::Result<Value> {
    let raw = read_input(arg)?;
    serde_json::from_str(&raw).context("Input is not valid JSON")
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_help() {
    println!("Warden: consent, PII, prompt-injection and tool-call safety");
    println!();
    println!("Usage: warden <command> [args]");
    println!();
    println!("Commands:");
    println!("  scan [text...]              Scan a message for prompt injection (stdin if no text)");
    println!("  anonymize [--drop] [file]   Anonymize a JSON payload (keys kept unless --drop)");
    println!("  sanitize <prompt> [context] Prepare prompt/context JSON files for a model provider");
    println!("  probe [text...]             Report whether text contains PII");
    println!("  demo                        Run a scripted walk-through of every component");
    println!("  help                        Show this help message");
    println!();
    println!("Configuration: $WARDEN_CONFIG or ./warden.json, overridden by WARDEN_* variables.");
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so command output stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");
    let rest: Vec<&str> = args.iter().skip(2).map(String::as_str).collect();

    if matches!(command, "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }

    let config_path = resolve_config_path();
    let config = WardenConfig::load(&config_path)
        .with_context(|| format!("Invalid configuration at {}", config_path.display()))?;
    let state = AppState::new(config)?;
    info!(
        request_ttl_secs = state.config.consent.request_ttl_secs,
        cache_ttl_secs = state.config.gateway.cache_ttl_secs,
        guard_patterns = state.guard.pattern_count(),
        "Warden initialised"
    );

    match command {
        "scan" => {
            let message = if rest.is_empty() {
                read_input(None)?
            } else {
                rest.join(" ")
            };
            let verdict = state.guard.scan(message.trim(), "cli", None);
            if verdict.is_safe() {
                println!("safe");
            } else {
                println!("unsafe");
                println!("{}", REFUSAL_MESSAGE);
                std::process::exit(2);
            }
        }
        "anonymize" => {
            let drop_keys = rest.first() == Some(&"--drop");
            let file = rest.iter().copied().find(|a| *a != "--drop");
            let payload = read_json(file)?;
            let result = state.anonymizer.anonymize(&payload, !drop_keys);
            print_json(&result)?;
        }
        "sanitize" => {
            let Some(prompt_path) = rest.first().copied() else {
                eprintln!("Usage: warden sanitize <prompt.json> [context.json]");
                std::process::exit(1);
            };
            let prompt = read_json(Some(prompt_path))?;
            let context = rest.get(1).map(|p| read_json(Some(*p))).transpose()?;
            let sanitized = state.anonymizer.sanitize_for_llm(&prompt, context.as_ref());
            print_json(&sanitized)?;
        }
        "probe" => {
            let text = if rest.is_empty() {
                read_input(None)?
            } else {
                rest.join(" ")
            };
            println!("{}", state.anonymizer.is_pii_present(&text));
        }
        "demo" => {
            let report = demo::run(&state)?;
            print_json(&report)?;
        }
        other => {
            eprintln!("Unknown command: {}. Use 'warden help' for usage.", other);
            std::process::exit(1);
        }
    }

    Ok(())
}
