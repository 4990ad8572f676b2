//! Minimal CLI for tallying sealed proposal batches.
//!
//! This binary loads a batch file, applies the configured quorum, and prints
//! either the decision or every step of the scan.  It can also recompute and
//! seal batch digests.

use quorum_tally::{
    batch::digest_to_hex, init_tracing, read_batch_file, write_batch_file, AggregatorConfig,
    BatchOptions, Decision, ParsedBatch, Proposal, ScanStep,
};
use serde_json::Value;
use std::{env, path::PathBuf};
use tracing::info;

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn print_help() {
    println!("Usage: tally <aggregate|scan|digest|seal> ...");
    println!("  aggregate <batch> [--quorum N] [--config FILE] [--no-digest] [--json]");
    println!("  scan <batch> [--quorum N] [--config FILE] [--no-digest] [--json]");
    println!("  digest <batch>");
    println!("  seal <input> <output>");
}

fn main() {
    let mut args = env::args().skip(1);
    let command = args.next();
    match command.as_deref() {
        Some("aggregate") => cmd_aggregate(args.collect()),
        Some("scan") => cmd_scan(args.collect()),
        Some("digest") => cmd_digest(args.collect()),
        Some("seal") => cmd_seal(args.collect()),
        Some("-h") | Some("--help") => print_help(),
        _ => {
            eprintln!("Usage: tally <aggregate|scan|digest|seal> ...");
            std::process::exit(1);
        }
    }
}

struct RunArgs {
    batch: PathBuf,
    quorum: Option<usize>,
    config: Option<PathBuf>,
    no_digest: bool,
    json: bool,
}

fn parse_run_args(args: Vec<String>) -> RunArgs {
    let mut batch: Option<PathBuf> = None;
    let mut quorum: Option<usize> = None;
    let mut config: Option<PathBuf> = None;
    let mut no_digest = false;
    let mut json = false;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--quorum" => {
                let value = iter
                    .next()
                    .unwrap_or_else(|| fatal("--quorum expects a value"));
                quorum = Some(
                    value
                        .parse()
                        .unwrap_or_else(|_| fatal(&format!("invalid quorum: {value}"))),
                );
            }
            "--config" => {
                config = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| fatal("--config expects a value")),
                ));
            }
            "--no-digest" => no_digest = true,
            "--json" => json = true,
            value => {
                if batch.is_none() && !value.starts_with("--") {
                    batch = Some(PathBuf::from(value));
                } else {
                    fatal(&format!("unknown argument: {value}"));
                }
            }
        }
    }
    RunArgs {
        batch: batch.unwrap_or_else(|| fatal("missing batch path")),
        quorum,
        config,
        no_digest,
        json,
    }
}

fn load_config(args: &RunArgs) -> AggregatorConfig {
    let mut config = match &args.config {
        Some(path) => AggregatorConfig::load(path)
            .unwrap_or_else(|err| fatal(&format!("config error: {err}"))),
        None => AggregatorConfig::default(),
    };
    config
        .apply_env()
        .unwrap_or_else(|err| fatal(&format!("config error: {err}")));
    if let Some(quorum) = args.quorum {
        config.quorum = quorum;
    }
    if args.no_digest {
        config.require_digest = false;
    }
    if let Err(err) = init_tracing(config.log_format) {
        eprintln!("tracing already initialised: {err}");
    }
    config
}

fn load_batch(args: &RunArgs, options: BatchOptions) -> ParsedBatch<Value> {
    read_batch_file(&args.batch, options).unwrap_or_else(|err| {
        fatal(&format!(
            "failed to load batch {}: {err}",
            args.batch.display()
        ))
    })
}

fn cmd_aggregate(args: Vec<String>) {
    let args = parse_run_args(args);
    let config = load_config(&args);
    let aggregator = config
        .aggregator()
        .unwrap_or_else(|err| fatal(&format!("config error: {err}")));
    let batch = load_batch(&args, config.batch_options());
    info!(
        batch = %args.batch.display(),
        proposals = batch.proposals.len(),
        quorum = aggregator.quorum().get(),
        "aggregating batch"
    );
    let decision = aggregator.decide(&batch.proposals);
    if args.json {
        let rendered = serde_json::to_string_pretty(&decision)
            .unwrap_or_else(|err| fatal(&format!("failed to encode decision: {err}")));
        println!("{rendered}");
        return;
    }
    match decision {
        Decision::Reached {
            position,
            id,
            votes,
            timestamp_ms,
            value,
        } => {
            println!("quorum reached at position {position}: id={id} votes={votes}");
            println!("timestamp_ms={timestamp_ms} value={value}");
        }
        Decision::NoQuorum {
            scanned,
            distinct_ids,
            leader,
        } => {
            println!("no quorum after {scanned} proposals ({distinct_ids} distinct ids)");
            if let Some((id, votes)) = leader {
                println!("leading id={id} votes={votes}");
            }
        }
    }
}

fn cmd_scan(args: Vec<String>) {
    let args = parse_run_args(args);
    let config = load_config(&args);
    let aggregator = config
        .aggregator()
        .unwrap_or_else(|err| fatal(&format!("config error: {err}")));
    let batch = load_batch(&args, config.batch_options());
    if !args.json {
        println!(
            "{:>8} | {:>20} | {:>6} | {:<7} | value",
            "position", "id", "votes", "quorum"
        );
    }
    for step in aggregator.scan(batch.proposals.iter().map(Proposal::borrowed)) {
        let line = render_step(&step, args.json)
            .unwrap_or_else(|err| fatal(&format!("failed to encode step: {err}")));
        println!("{line}");
    }
}

fn render_step(step: &ScanStep<&Value>, json: bool) -> Result<String, serde_json::Error> {
    if json {
        return serde_json::to_string(step);
    }
    Ok(format!(
        "{:>8} | {:>20} | {:>6} | {:<7} | {}",
        step.position,
        step.id,
        step.votes,
        if step.reached { "reached" } else { "-" },
        step.value
    ))
}

fn cmd_digest(args: Vec<String>) {
    let [path]: [String; 1] = args
        .try_into()
        .unwrap_or_else(|_| fatal("Usage: tally digest <batch>"));
    let path = PathBuf::from(path);
    let batch: ParsedBatch<Value> = read_batch_file(
        &path,
        BatchOptions {
            require_digest: false,
        },
    )
    .unwrap_or_else(|err| fatal(&format!("failed to load batch {}: {err}", path.display())));
    println!("proposals: {}", batch.proposals.len());
    println!("digest: {}", digest_to_hex(&batch.digest));
    println!("sealed: {}", batch.sealed);
}

fn cmd_seal(args: Vec<String>) {
    let [input, output]: [String; 2] = args
        .try_into()
        .unwrap_or_else(|_| fatal("Usage: tally seal <input> <output>"));
    let input = PathBuf::from(input);
    let output = PathBuf::from(output);
    let batch: ParsedBatch<Value> = read_batch_file(
        &input,
        BatchOptions {
            require_digest: false,
        },
    )
    .unwrap_or_else(|err| fatal(&format!("failed to load batch {}: {err}", input.display())));
    let digest = write_batch_file(&output, &batch.proposals)
        .unwrap_or_else(|err| fatal(&format!("failed to write {}: {err}", output.display())));
    println!("sealed {} proposals", batch.proposals.len());
    println!("digest: {}", digest_to_hex(&digest));
    println!("output: {}", output.display());
}
