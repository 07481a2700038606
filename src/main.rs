mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use clap::Parser;
use measurements_core::config::Config;
use measurements_core::db::{build_pool, build_redis_pool};
use measurements_core::telemetry::parse_batches;
use measurements_core::{HistoryOptions, IngestOptions, MeasurementService};
use serde::Serialize;
use std::io::Read;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,measurements_core=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let endpoint = normalize_otlp_http_endpoint(endpoint);
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "measurements-core"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_payload(path: &std::path::Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut payload = Vec::new();
        std::io::stdin()
            .read_to_end(&mut payload)
            .context("failed to read measurements from stdin")?;
        return Ok(payload);
    }
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(&config)?;

    let pool = build_pool(
        &config.database_url,
        config.db_pool_size,
        config.db_acquire_timeout(),
    )
    .await
    .context("failed to connect to postgres")?;
    let redis = build_redis_pool(&config.redis_url, config.redis_pool_size)?;
    let service = MeasurementService::connect(&config, pool, redis);

    match cli.command {
        Commands::Ingest(args) => {
            let mut payload = read_payload(&args.file)?;
            let batches = parse_batches(&mut payload)?;
            let outcome = service
                .ingest_measurements(
                    batches,
                    IngestOptions {
                        skip_dedup: args.skip_dedup,
                    },
                )
                .await?;
            tracing::info!(
                projects = outcome.updated_projects.len(),
                variables_created = outcome.metrics.variables_created,
                measurements_created = outcome.metrics.measurements_created,
                "ingested measurements"
            );
            print_json(&outcome)?;
        }
        Commands::History(args) => {
            let options = HistoryOptions {
                project_id: args.project,
                variable: args.variable,
                start: args.start,
                end: args.end,
                interval: args.interval,
                aggregation: args.aggregation,
                missing_value_strategy: args.missing,
                timezone: args.timezone,
            };
            if args.wire {
                print_json(&service.history_wire(&options).await?)?;
            } else {
                print_json(&service.history(&options).await?)?;
            }
        }
        Commands::Latest(args) => {
            let point = service
                .latest(&args.project, &args.variable, args.before)
                .await?;
            print_json(&point)?;
        }
        Commands::Current(args) => {
            let values = service.current_values(&args.project).await?;
            let liveness = service.liveness(&args.project).await?;
            print_json(&serde_json::json!({
                "values": values,
                "liveness": liveness,
            }))?;
        }
    }

    Ok(())
}
