use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use tracing::{info, warn};

use ruleflow_core::catalog::{load_catalog, save_catalog};
use ruleflow_core::config::CoreConfig;
use ruleflow_core::serde_utils::write_pretty_json;
use ruleflow_engine::{run_batch, sanitize_routes, DataSet, NoopResolver, RuleRepository};
use ruleflow_verify::{DisabledGenerator, Verifier};

use crate::{RunArgs, VerifyArgs};

/// Exit code for missing input files.
const EXIT_NOT_FOUND: u8 = 2;

/// Verifies every rule of a catalogue and writes the enriched copy.
///
/// Rules that cannot be verified are flagged `manual_review`, which is
/// a warning, not a failure: the process only exits non-zero when no
/// rule verified at all.
pub async fn verify_command(args: VerifyArgs) -> anyhow::Result<u8> {
    if !args.rules.is_file() {
        eprintln!("Error: file not found: {}", args.rules.display());
        return Ok(EXIT_NOT_FOUND);
    }

    let config = CoreConfig::from_env().context("loading configuration")?;
    let mut rules = load_catalog(&args.rules).context("loading rule catalogue")?;
    info!(count = rules.len(), path = %args.rules.display(), "loaded rule catalogue");

    let generator = DisabledGenerator;
    let verifier = Verifier::new(&generator).with_limits(
        config.max_verification_attempts,
        Duration::from_millis(config.retry_backoff_ms),
    );
    let report = verifier.verify_catalog(&mut rules, args.concurrency).await;

    let output = args
        .output
        .unwrap_or_else(|| suffixed_path(&args.rules, "_verified", "json"));
    save_catalog(&output, &rules).context("writing enriched catalogue")?;

    println!("{} -> {}", report.summary(), output.display());
    if !report.manual_review_ids.is_empty() {
        warn!(
            count = report.manual_review,
            ids = ?report.manual_review_ids,
            "rules need manual attention"
        );
        println!(
            "Warning: {} rule(s) flagged for manual review: {}",
            report.manual_review,
            report.manual_review_ids.join(", ")
        );
    }

    if report.all_failed() {
        eprintln!("Error: no rule passed verification");
        return Ok(1);
    }
    Ok(0)
}

/// Walks the rule graph for every (starting rule, data row) pair and
/// writes the execution report.
pub async fn run_command(args: RunArgs) -> anyhow::Result<u8> {
    for path in [&args.rules, &args.data] {
        if !path.is_file() {
            eprintln!("Error: file not found: {}", path.display());
            return Ok(EXIT_NOT_FOUND);
        }
    }

    let mut rules = load_catalog(&args.rules).context("loading rule catalogue")?;
    info!(count = rules.len(), "loaded rule catalogue");

    let sanitize_report = sanitize_routes(&mut rules, &NoopResolver).await;
    if sanitize_report.dropped > 0 || sanitize_report.cycles_broken > 0 {
        info!(
            dropped = sanitize_report.dropped,
            cycles = sanitize_report.cycles_broken,
            "sanitized rule graph"
        );
    }

    let repo = Arc::new(RuleRepository::from_rules(rules)?);
    let data = Arc::new(DataSet::load(&args.data)?);
    info!(
        rules = data.rule_count(),
        rows = data.total_rows(),
        "loaded data rows"
    );

    let starting_rules = match &args.starting_order {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading starting order {}", path.display()))?;
            serde_json::from_str::<Vec<String>>(&raw).context("parsing starting order")?
        }
        None => {
            let roots = repo.starting_rules();
            info!(count = roots.len(), "auto-detected starting rules");
            roots
        }
    };

    if starting_rules.is_empty() {
        eprintln!("Error: no starting rules to execute");
        return Ok(1);
    }

    let report = run_batch(
        repo,
        data,
        &starting_rules,
        args.num_rows.max(1),
        args.workers,
    )
    .await;

    if !args.quiet {
        print_summary(&report);
    }

    let output = args.output.unwrap_or_else(|| {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        suffixed_path(&args.rules, &format!("_execution_{timestamp}"), "json")
    });
    write_pretty_json(&output, &report)
        .with_context(|| format!("writing execution report {}", output.display()))?;
    println!("{} -> {}", report.summary(), output.display());

    if report.total_runs == 0 {
        eprintln!("Error: no runs were executed");
        return Ok(1);
    }
    if report.all_failed() {
        eprintln!("Error: every run failed before its first step");
        return Ok(1);
    }
    Ok(0)
}

fn suffixed_path(input: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("output");
    input.with_file_name(format!("{stem}{suffix}.{extension}"))
}

fn print_summary(report: &ruleflow_engine::ExecutionReport) {
    println!("EXECUTION SUMMARY");
    println!("  {:<14} {:<5} {:<7} Path", "Start Rule", "Row", "Steps");
    for result in &report.results {
        let mut path = result.path();
        if path.len() > 60 {
            path.truncate(57);
            path.push_str("...");
        }
        println!(
            "  {:<14} {:<5} {:<7} {}",
            result.start_rule, result.data_row_index, result.total_steps, path
        );
    }
}
