mod logging;

use std::{
    fs,
    path::{Path, PathBuf},
};

use alloy_primitives::Address;
use anyhow::{Context, Result};
use bundle_planner::{setup_bundle, BundleOutput, BundlingOptions, NetworkRegistry};
use bundle_types::{DeclarativeOperation, LedgerSnapshot};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Plan a bundle from a scenario file and write the encoded calls as JSON.
///
/// The scenario holds a ledger snapshot, the declarative operations, the
/// receiver of leftovers and (optionally) bundling options.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Scenario JSON (`snapshot`, `operations`, `receiver`, `options`).
    #[arg(long)]
    scenario: PathBuf,

    /// Network registry file (TOML/JSON/YAML). Built-in networks are used when omitted.
    #[arg(long, env = "BUNDLER_NETWORKS")]
    networks: Option<PathBuf>,

    /// Path to write the planned bundle.
    #[arg(long, default_value = "bundle.json")]
    out: PathBuf,

    /// Bare level (eg, debug) or a full tracing filter directive.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

#[derive(Debug, Deserialize)]
struct Scenario {
    snapshot: LedgerSnapshot,
    operations: Vec<DeclarativeOperation>,
    receiver: Address,
    #[serde(default)]
    options: BundlingOptions,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(&cli.log_level, cli.json_logs);

    let scenario = read_scenario(&cli.scenario)?;
    let registry = match cli.networks.as_deref() {
        Some(path) => NetworkRegistry::load(Some(path))
            .with_context(|| format!("failed loading networks from {}", path.display()))?,
        None => NetworkRegistry::builtin(),
    };

    let output = setup_bundle(
        &scenario.operations,
        &scenario.snapshot,
        scenario.receiver,
        &registry,
        &scenario.options,
    )
    .with_context(|| format!("failed planning bundle for {}", cli.scenario.display()))?;

    let bundler = registry
        .addresses(scenario.snapshot.chain_id())
        .ok()
        .and_then(|addresses| addresses.bundler);
    let hash = format!("0x{}", hex::encode(output.bundle.bundle_hash()));
    write_json_atomic(&cli.out, &render(&scenario, &output, bundler, &hash)?)?;

    println!(
        "Planned {} calls ({} permits) -> {} [{}]",
        output.bundle.len(),
        output.bundle.authorizations.len(),
        cli.out.display(),
        hash
    );
    Ok(())
}

fn read_scenario(path: &Path) -> Result<Scenario> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed parsing JSON in {}", path.display()))
}

fn render(
    scenario: &Scenario,
    output: &BundleOutput,
    bundler: Option<Address>,
    hash: &str,
) -> Result<Value> {
    let now = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string());

    Ok(json!({
        "chain_id": scenario.snapshot.chain_id(),
        "block": scenario.snapshot.block(),
        "receiver": scenario.receiver,
        "bundler": bundler,
        "generated_at": now,
        "bundle_hash": hash,
        "value": output.bundle.value(),
        "operations": serde_json::to_value(&output.operations).context("failed serialising operations")?,
        "calls": serde_json::to_value(&output.bundle.calls).context("failed serialising calls")?,
        "authorizations": serde_json::to_value(&output.bundle.authorizations)
            .context("failed serialising authorizations")?,
    }))
}

fn write_json_atomic(path: &Path, value: &Value) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.exists() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating directory {}", parent.display()))?;
    }

    let serialised = serde_json::to_string_pretty(value).context("failed serialising bundle JSON")?;
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, serialised.as_bytes())
        .with_context(|| format!("failed writing temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("failed replacing {}", path.display()))?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
