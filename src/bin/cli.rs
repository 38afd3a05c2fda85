//! Bucketstore CLI
//!
//! Command-line interface for Bucketstore operations:
//! - Inspect registered blocks
//! - Run series and label queries
//! - Trigger a sync pass
//! - Seed a local bucket with demo blocks

use anyhow::{bail, Context};
use bucketstore::block::{BlockBuilder, BlockId, Chunk, Labels, TimeRange};
use bucketstore::bucket::ObjectStoreBucket;
use bucketstore::config::generate_default_config;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "bucketstore-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Query and inspect a Bucketstore block gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// API server URL
    #[arg(long, default_value = "http://localhost:10905", global = true)]
    pub api_url: String,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered blocks
    Blocks,

    /// Fetch series matching a selector
    Series {
        /// Selector, e.g. '{job="api"}'
        selector: String,
        /// Start time (ms since epoch)
        #[arg(long)]
        start: Option<i64>,
        /// End time (ms since epoch)
        #[arg(long)]
        end: Option<i64>,
    },

    /// List values of a label
    LabelValues {
        /// Label name
        name: String,
        /// Restrict to series matching this selector
        #[arg(short, long = "match")]
        selector: Option<String>,
        #[arg(long)]
        start: Option<i64>,
        #[arg(long)]
        end: Option<i64>,
    },

    /// List label names
    Labels {
        /// Restrict to series matching this selector
        #[arg(short, long = "match")]
        selector: Option<String>,
        #[arg(long)]
        start: Option<i64>,
        #[arg(long)]
        end: Option<i64>,
    },

    /// Show store bounds and external label sets
    Info,

    /// Run a sync pass now
    Sync,

    /// Write demo blocks into a local bucket directory
    Demo {
        /// Bucket root directory
        #[arg(long, default_value = "./bucket")]
        path: PathBuf,
        /// Key prefix inside the bucket
        #[arg(long, default_value = "")]
        prefix: String,
        /// Number of blocks to write
        #[arg(long, default_value = "3")]
        blocks: usize,
        /// Series per block
        #[arg(long, default_value = "10")]
        series: usize,
    },

    /// Print a default configuration file
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let json_output = cli.format == "json";

    match cli.command {
        Commands::Blocks => {
            let data = get_json(&client, &format!("{}/api/v1/blocks", cli.api_url), &[]).await?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&data)?);
                return Ok(());
            }

            let blocks = data["blocks"].as_array().cloned().unwrap_or_default();
            if blocks.is_empty() {
                println!("No blocks registered.");
                return Ok(());
            }

            println!(
                "{:<28} {:<22} {:<22} {:>8} {}",
                "ID", "Min Time", "Max Time", "Series", "External Labels"
            );
            println!("{}", "-".repeat(100));
            for block in blocks {
                println!(
                    "{:<28} {:<22} {:<22} {:>8} {}",
                    block["id"].as_str().unwrap_or("?"),
                    format_ms(block["min_time"].as_i64()),
                    format_ms(block["max_time"].as_i64()),
                    block["num_series"].as_u64().unwrap_or(0),
                    format_labels(&block["external_labels"]),
                );
            }
        }

        Commands::Series {
            selector,
            start,
            end,
        } => {
            let params = query_params(Some(selector), start, end);
            let data = get_json(&client, &format!("{}/api/v1/series", cli.api_url), &params).await?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&data)?);
                return Ok(());
            }

            let series = data["data"].as_array().cloned().unwrap_or_default();
            for s in &series {
                let chunks = s["chunks"].as_array().map(|c| c.len()).unwrap_or(0);
                println!("{} ({} chunks)", format_labels(&s["labels"]), chunks);
            }
            println!();
            println!("{} series", series.len());
        }

        Commands::LabelValues {
            name,
            selector,
            start,
            end,
        } => {
            let params = query_params(selector, start, end);
            let url = format!("{}/api/v1/label/{}/values", cli.api_url, name);
            print_list(&get_json(&client, &url, &params).await?, json_output)?;
        }

        Commands::Labels {
            selector,
            start,
            end,
        } => {
            let params = query_params(selector, start, end);
            let url = format!("{}/api/v1/labels", cli.api_url);
            print_list(&get_json(&client, &url, &params).await?, json_output)?;
        }

        Commands::Info => {
            let data = get_json(&client, &format!("{}/api/v1/info", cli.api_url), &[]).await?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&data)?);
                return Ok(());
            }

            println!("Bucketstore at {}", cli.api_url);
            println!("  Blocks:   {}", data["blocks"].as_u64().unwrap_or(0));
            println!("  Min time: {}", format_ms(data["min_time"].as_i64()));
            println!("  Max time: {}", format_ms(data["max_time"].as_i64()));
            if let Some(sets) = data["label_sets"].as_array() {
                println!("  Label sets:");
                for set in sets {
                    println!("    {}", format_labels(set));
                }
            }
        }

        Commands::Sync => {
            let response = client
                .post(format!("{}/api/v1/sync", cli.api_url))
                .send()
                .await
                .with_context(|| format!("Cannot connect to Bucketstore API at {}", cli.api_url))?;
            let data: serde_json::Value = response.json().await?;

            if data["status"] != "success" {
                bail!("Sync failed: {}", data["error"].as_str().unwrap_or("unknown error"));
            }
            let result = &data["result"];
            println!(
                "Sync completed in {}ms: {} listed, {} added, {} removed, {} failed",
                result["duration_ms"].as_u64().unwrap_or(0),
                result["listed"].as_u64().unwrap_or(0),
                result["added"].as_u64().unwrap_or(0),
                result["removed"].as_u64().unwrap_or(0),
                result["failed"].as_u64().unwrap_or(0),
            );
        }

        Commands::Demo {
            path,
            prefix,
            blocks,
            series,
        } => {
            write_demo_blocks(&path, &prefix, blocks, series).await?;
        }

        Commands::Config => {
            print!("{}", generate_default_config());
        }
    }

    Ok(())
}

fn query_params(
    selector: Option<String>,
    start: Option<i64>,
    end: Option<i64>,
) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(selector) = selector {
        params.push(("match", selector));
    }
    if let Some(start) = start {
        params.push(("start", start.to_string()));
    }
    if let Some(end) = end {
        params.push(("end", end.to_string()));
    }
    params
}

async fn get_json(
    client: &reqwest::Client,
    url: &str,
    params: &[(&'static str, String)],
) -> anyhow::Result<serde_json::Value> {
    let response = client
        .get(url)
        .query(params)
        .send()
        .await
        .with_context(|| format!("Cannot connect to Bucketstore API at {}", url))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        bail!("Request failed ({}): {}", status, text);
    }

    Ok(response.json().await?)
}

fn print_list(data: &serde_json::Value, json_output: bool) -> anyhow::Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(data)?);
        return Ok(());
    }
    for item in data["data"].as_array().into_iter().flatten() {
        println!("{}", item.as_str().unwrap_or_default());
    }
    Ok(())
}

fn format_ms(ms: Option<i64>) -> String {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_labels(labels: &serde_json::Value) -> String {
    let pairs: Vec<String> = labels
        .as_object()
        .into_iter()
        .flatten()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}

/// Two-hour blocks ending now, one per replica
async fn write_demo_blocks(
    path: &Path,
    prefix: &str,
    blocks: usize,
    series: usize,
) -> anyhow::Result<()> {
    const BLOCK_MS: i64 = 2 * 3600 * 1000;
    const CHUNK_MS: i64 = 30 * 60 * 1000;

    let bucket = ObjectStoreBucket::local(path, prefix)
        .with_context(|| format!("Cannot open bucket at {:?}", path))?;
    let now = Utc::now().timestamp_millis();

    for b in 0..blocks {
        let max_time = now - (b as i64) * BLOCK_MS;
        let min_time = max_time - BLOCK_MS + 1;
        let id = BlockId::generate(u64::try_from(max_time).unwrap_or_default());

        let mut builder = BlockBuilder::new(id, TimeRange::new(min_time, max_time))
            .external_label("replica", format!("r{}", b % 2))
            .source("demo");

        for s in 0..series {
            let labels = Labels::from_pairs([
                ("__name__", "demo_requests_total".to_string()),
                ("instance", format!("host-{}", s)),
                ("job", if s % 2 == 0 { "api" } else { "worker" }.to_string()),
            ]);
            let chunks = (0..BLOCK_MS / CHUNK_MS)
                .map(|c| {
                    let start = min_time + c * CHUNK_MS;
                    Chunk {
                        min_time: start,
                        max_time: (start + CHUNK_MS - 1).min(max_time),
                        data: format!("demo:{}:{}:{}", b, s, c).into_bytes(),
                    }
                })
                .collect();
            builder.add_series(labels, chunks);
        }

        let meta = builder.upload(&bucket).await?;
        println!(
            "Wrote block {} [{} .. {}] with {} series",
            meta.ulid,
            format_ms(Some(meta.min_time)),
            format_ms(Some(meta.max_time)),
            meta.stats.num_series
        );
    }

    Ok(())
}
