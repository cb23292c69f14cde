use anyhow::{Context, Result};
use backstop::circuit_breaker::ResilienceRegistry;
use backstop::config::BackstopConfig;
use backstop::degradation::{DegradationCoordinator, Operation, Outcome};
use backstop::init_tracing;
use backstop::probe::{self, ExporterProbe, ProbeReport};
use serde_json::json;
use std::collections::HashMap;
use std::env;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        None | Some("check") => run_check(args.get(1).map(String::as_str)).await,
        Some("status") => run_status(args.get(1).map(String::as_str)).await,
        Some("reset") => match args.get(1) {
            Some(service) => run_reset(args.get(2).map(String::as_str), service).await,
            None => {
                eprintln!("Usage: backstop reset <service> [config_file]");
                process::exit(2);
            }
        },
        Some("help") | Some("--help") => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("backstop error: {:#}", e);
        process::exit(1);
    }
}

fn print_usage() {
    println!("Usage: backstop [command]");
    println!();
    println!("Commands:");
    println!("  check [config_file]           Probe configured backends through the resilience layer (default)");
    println!("  status [config_file]          Probe backends, then print the circuit breaker table");
    println!("  reset <service> [config_file] Probe backends, then force the named breaker closed");
    println!();
    println!("Without a config file, the stock local telemetry stack is probed.");
}

fn load_config(path: Option<&str>) -> Result<BackstopConfig> {
    let config = match path {
        Some(p) => BackstopConfig::from_file(p)
            .with_context(|| format!("failed to load configuration from {}", p))?,
        None => BackstopConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Build the registry and run every configured probe through it
async fn probe_all(
    config: &BackstopConfig,
) -> Result<(Arc<ResilienceRegistry>, HashMap<String, Outcome<ProbeReport>>)> {
    let client =
        probe::build_client(config.probe.timeout()).context("failed to build probe client")?;

    let registry = Arc::new(ResilienceRegistry::with_defaults(
        config.defaults.circuit_breaker.clone(),
        config.defaults.retry.clone(),
    ));

    let mut primaries: HashMap<String, Operation<ProbeReport>> = HashMap::new();
    let mut fallbacks: HashMap<String, Operation<ProbeReport>> = HashMap::new();
    for service in &config.services {
        registry.get_or_create(
            &service.name,
            service.circuit_breaker.clone(),
            service.retry.clone(),
        );

        let primary = ExporterProbe::from_service(client.clone(), service);
        if let Some(endpoint) = &service.fallback_endpoint {
            fallbacks.insert(
                service.name.clone(),
                primary.clone().with_endpoint(endpoint.clone()).into_operation(),
            );
        }
        primaries.insert(service.name.clone(), primary.into_operation());
    }

    let coordinator = DegradationCoordinator::new(registry.clone());
    let outcomes = coordinator.execute_with_fallback(primaries, fallbacks).await;
    Ok((registry, outcomes))
}

async fn run_check(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let (registry, outcomes) = probe_all(&config).await?;

    println!("Backend health:");
    let mut names: Vec<&String> = outcomes.keys().collect();
    names.sort();
    for name in names {
        println!("  {}: {}", name, outcomes[name].status_label());
    }
    println!();

    print_breaker_table(&registry).await;

    let report = build_report(&outcomes, &registry).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_status(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let (registry, _outcomes) = probe_all(&config).await?;
    print_breaker_table(&registry).await;
    Ok(())
}

async fn run_reset(config_path: Option<&str>, service: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let (registry, _outcomes) = probe_all(&config).await?;

    if registry.reset(service).await {
        println!("Reset circuit breaker for {}", service);
    } else {
        println!("No circuit breaker found for {}", service);
    }
    print_breaker_table(&registry).await;
    Ok(())
}

async fn print_breaker_table(registry: &ResilienceRegistry) {
    let mut statuses = registry.all_statuses().await;
    if statuses.is_empty() {
        println!("No services being monitored");
        return;
    }
    statuses.sort_by(|a, b| a.service.cmp(&b.service));

    println!("Circuit breakers:");
    for status in statuses {
        print!("  {}: {}", status.service, status.state);
        if status.failure_count > 0 {
            print!(" (failures: {})", status.failure_count);
        }
        println!();
    }
    println!();
}

async fn build_report(
    outcomes: &HashMap<String, Outcome<ProbeReport>>,
    registry: &ResilienceRegistry,
) -> serde_json::Value {
    let mut services = serde_json::Map::new();
    for (name, outcome) in outcomes {
        let entry = match outcome {
            Outcome::Success(report) => json!({
                "status": "success",
                "result": report,
            }),
            Outcome::FallbackSuccess {
                result,
                original_error,
            } => json!({
                "status": "fallback_success",
                "fallback_result": result,
                "original_error": original_error.to_string(),
            }),
            Outcome::Failed {
                error,
                fallback_error,
            } => json!({
                "status": "failed",
                "error": error.to_string(),
                "fallback_error": fallback_error.as_ref().map(|e| e.to_string()),
            }),
        };
        services.insert(name.clone(), entry);
    }

    let mut breakers = serde_json::Map::new();
    for status in registry.all_statuses().await {
        breakers.insert(
            status.service.clone(),
            json!({
                "state": status.state,
                "failure_count": status.failure_count,
                "seconds_since_last_failure": status.seconds_since_last_failure(),
            }),
        );
    }

    json!({ "services": services, "breakers": breakers })
}
