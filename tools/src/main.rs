//! sar-runner: headless runner for the SAR screening pipeline.
//!
//! Usage:
//!   sar-runner --data-dir ./data --out ./out --top-n 5 --seed 42
//!   sar-runner --reviewer interactive --db run.db
//!   sar-runner --decisions decisions.json --json

use anyhow::{Context, Result};
use sar_core::{
    case::CaseState,
    case_loader::load_csv_data,
    clock::PipelineClock,
    config::PipelineConfig,
    decision_gate_stage::{InteractiveReviewer, PolicyReviewer, Reviewer, ScriptedReviewer},
    engine::PipelineEngine,
    metrics::{format_usd, PipelineMetrics},
    store::SarStore,
};
use std::env;
use std::io;
use std::path::Path;

#[derive(serde::Serialize)]
struct RunSummary<'a> {
    run_id: &'a str,
    seed: u64,
    report: String,
    audit_log: Option<String>,
    filings: Vec<String>,
    metrics: &'a PipelineMetrics,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let data_dir = str_arg(&args, "--data-dir").unwrap_or("./data");
    let out_dir = str_arg(&args, "--out").unwrap_or("./out");
    let db = str_arg(&args, "--db").unwrap_or(":memory:");
    let reviewer_kind = str_arg(&args, "--reviewer").unwrap_or("policy");
    let decisions = str_arg(&args, "--decisions");
    let json_mode = args.iter().any(|a| a == "--json");

    let config = PipelineConfig::load(data_dir)?;
    let top_n = parse_arg(&args, "--top-n", config.top_n);

    if !json_mode {
        println!("SAR screening pipeline: sar-runner");
        println!("  seed:      {seed}");
        println!("  top_n:     {top_n}");
        println!("  data_dir:  {data_dir}");
        println!("  out:       {out_dir}");
        println!("  db:        {db}");
        println!();
    }

    let reviewer: Box<dyn Reviewer> = match (decisions, reviewer_kind) {
        (Some(path), _) => Box::new(
            ScriptedReviewer::from_file(Path::new(path))
                .with_context(|| format!("cannot load decisions from {path}"))?,
        ),
        (None, "interactive") => Box::new(InteractiveReviewer::new(io::stdin().lock(), io::stdout())),
        (None, "policy") => Box::new(PolicyReviewer::new(config.review_policy.clone())),
        (None, other) => anyhow::bail!("unknown reviewer '{other}' (expected policy or interactive)"),
    };

    let store = SarStore::open(db)?;
    store.migrate()?;

    let run_id = format!("run-{seed}-{}", chrono::Utc::now().format("%Y%m%d%H%M%S%3f"));
    let out = Path::new(out_dir);
    let mut engine = PipelineEngine::build(
        run_id.clone(),
        seed,
        store,
        &config,
        reviewer,
        out,
        PipelineClock::system(),
    )?;

    let data = load_csv_data(Path::new(data_dir))?;
    engine.run(&data, top_n)?;
    let (metrics, report) = engine.finish(out)?;

    let filings: Vec<String> = engine
        .cases()
        .iter()
        .filter_map(|c| c.filing.as_ref())
        .map(|f| f.path.display().to_string())
        .collect();

    if json_mode {
        let summary = RunSummary {
            run_id: &run_id,
            seed,
            report: report.display().to_string(),
            audit_log: engine.audit().path().map(|p| p.display().to_string()),
            filings,
            metrics: &metrics,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&engine, &metrics, &report, &filings);
    }
    Ok(())
}

fn print_summary(engine: &PipelineEngine, m: &PipelineMetrics, report: &Path, filings: &[String]) {
    println!("=== CASES ===");
    for ctx in engine.cases() {
        let (level, conf) = ctx
            .assessment
            .as_ref()
            .map(|a| (a.risk_level.as_str(), a.confidence_score))
            .unwrap_or(("-", 0.0));
        println!(
            "  #{:<2} {:<12} {:<8} conf {:.2}  {}",
            ctx.seq,
            ctx.case.customer.customer_id,
            level,
            conf,
            ctx.state()
        );
    }
    let pending = engine
        .cases()
        .iter()
        .filter(|c| c.state() == CaseState::Approved)
        .count();

    println!();
    println!("=== RUN SUMMARY ===");
    println!("  run_id:          {}", engine.run_id);
    println!("  screened:        {}", m.total_cases);
    println!("  approved:        {} ({:.1}%)", m.approved, m.approval_rate * 100.0);
    println!("  rejected:        {} ({:.1}%)", m.rejected, m.rejection_rate * 100.0);
    println!("  filed:           {}", m.filed);
    if pending > 0 {
        println!("  approved, unfiled: {pending}");
    }
    println!("  fallbacks:       {} risk, {} narrative", m.risk_fallbacks, m.narrative_fallbacks);
    println!("  load failures:   {}", m.load_failures);

    println!();
    println!("=== COST AVOIDANCE ===");
    println!("  theoretical:     {}", format_usd(m.cost.theoretical_cost));
    println!("  actual:          {}", format_usd(m.cost.actual_cost));
    println!("  net savings:     {}", format_usd(m.cost.net_savings));
    println!("  reduction:       {:.1}%", m.cost.cost_reduction * 100.0);

    println!();
    println!("  report:          {}", report.display());
    if let Some(audit) = engine.audit().path() {
        println!("  audit log:       {}", audit.display());
    }
    for f in filings {
        println!("  filed:           {f}");
    }
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
