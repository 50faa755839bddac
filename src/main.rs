mod capture;
mod config;
mod error;
mod forwarder;
mod ingest;
mod logging;
mod metrics;
mod model;
mod ops;
mod redact;
mod triage;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use chrono::{DateTime, Utc};

use capture::{metadata, rotator, Filter, Reader};
use config::{ForwarderConfig, ReceiverConfig};
use error::LogtapError;
use metrics::Registry;

#[derive(Parser)]
#[command(name = "logtap", version, about = "Ephemeral log mirror for Kubernetes load-testing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the receiver: accept pushed batches, write a capture directory
    Serve {
        #[arg(long)]
        listen_addr: Option<String>,

        #[arg(long)]
        capture_dir: Option<PathBuf>,

        #[arg(long)]
        disk_cap_bytes: Option<u64>,

        /// Log directory for the rolling file appender (daemon mode)
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Run the forwarder sidecar: tail pod containers and push to a receiver
    Forward {
        #[arg(long)]
        target: Option<String>,

        #[arg(long)]
        session: Option<String>,

        #[arg(long)]
        pod_name: Option<String>,

        #[arg(long)]
        namespace: Option<String>,

        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Print entries matching a filter, with optional surrounding context
    Grep {
        capture_dir: PathBuf,

        /// Regex to match against the message body
        #[arg(long)]
        pattern: Option<String>,

        #[arg(long)]
        from: Option<DateTime<Utc>>,

        #[arg(long)]
        to: Option<DateTime<Utc>>,

        /// Repeatable label=value constraint
        #[arg(long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,

        /// Lines of context around each match
        #[arg(short = 'C', long, default_value_t = 0)]
        context: usize,
    },

    /// Write a new capture directory containing only entries a filter matches
    Slice {
        capture_dir: PathBuf,
        dest: PathBuf,

        #[arg(long)]
        from: Option<DateTime<Utc>>,

        #[arg(long)]
        to: Option<DateTime<Utc>>,

        #[arg(long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,

        #[arg(long)]
        grep: Option<String>,
    },

    /// Byte-copy N capture directories into one, sorted by `from`
    Merge {
        dest: PathBuf,

        /// Source capture directories (at least one)
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },

    /// Export entries as JSONL or CSV
    Export {
        capture_dir: PathBuf,

        #[arg(long, default_value = "jsonl")]
        format: String,

        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(long)]
        from: Option<DateTime<Utc>>,

        #[arg(long)]
        to: Option<DateTime<Utc>>,

        #[arg(long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,
    },

    /// Parallel scan: totals, error timeline, top signatures, talkers
    Triage {
        capture_dir: PathBuf,

        #[arg(long, default_value_t = 0)]
        jobs: usize,

        #[arg(long, default_value_t = 60)]
        window_secs: u64,

        #[arg(long, default_value_t = 50)]
        top: usize,

        /// Also run cross-service correlation over the same capture
        #[arg(long)]
        correlate: bool,
    },

    /// Compare two captures, or a baseline against a current run
    Diff {
        a: PathBuf,
        b: PathBuf,

        /// Score `b` against `a` as a baseline and emit a pass/fail verdict
        #[arg(long)]
        baseline: bool,

        /// With --baseline, exit 6 instead of 0 if the verdict is a regression
        #[arg(long, requires = "baseline")]
        fail_on_regression: bool,
    },

    /// Enforce a capture directory's disk cap, evicting the oldest files
    Gc {
        capture_dir: PathBuf,

        #[arg(long)]
        disk_cap_bytes: u64,
    },
}

fn parse_label(s: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected label in key=value form, got {s:?}"))?;
    Ok((k.to_string(), v.to_string()))
}

fn build_filter(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    labels: &[(String, String)],
    grep: Option<&str>,
) -> anyhow::Result<Filter> {
    let mut filter = Filter {
        from,
        to,
        ..Filter::default()
    };
    for (k, v) in labels {
        filter.labels.insert(k.clone(), v.clone());
    }
    if let Some(pattern) = grep {
        filter.grep = Some(regex::Regex::new(pattern).context("compiling grep pattern")?);
    }
    Ok(filter)
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err:#}");
            LogtapError::classify(err).exit_code()
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve {
            listen_addr,
            capture_dir,
            disk_cap_bytes,
            log_dir,
        } => {
            let _guard = logging::init(true, log_dir.as_deref())?;
            let config = ReceiverConfig::from_env()?.with_overrides(
                listen_addr.as_deref(),
                capture_dir.as_deref(),
                disk_cap_bytes,
            );
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(ingest::serve::run(config))?;
        }

        Commands::Forward {
            target,
            session,
            pod_name,
            namespace,
            log_dir,
        } => {
            let _guard = logging::init(true, log_dir.as_deref())?;
            let config = ForwarderConfig::from_env()?.with_overrides(
                target.as_deref(),
                session.as_deref(),
                pod_name.as_deref(),
                namespace.as_deref(),
            );
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(forwarder::run(config))?;
        }

        Commands::Grep {
            capture_dir,
            pattern,
            from,
            to,
            labels,
            context,
        } => {
            let _guard = logging::init(false, None)?;
            let reader = Reader::open(&capture_dir)?;
            let filter = build_filter(from, to, &labels, pattern.as_deref())?;
            let lines = ops::grep(&reader, &filter, context)?;
            for line in &lines {
                println!(
                    "{} [{}] {}",
                    line.entry.ts.to_rfc3339(),
                    match line.role {
                        ops::grep::LineRole::Match => "match",
                        ops::grep::LineRole::Before => "before",
                        ops::grep::LineRole::After => "after",
                    },
                    line.entry.msg
                );
            }
        }

        Commands::Slice {
            capture_dir,
            dest,
            from,
            to,
            labels,
            grep,
        } => {
            let _guard = logging::init(false, None)?;
            let filter = build_filter(from, to, &labels, grep.as_deref())?;
            let written = ops::slice(&capture_dir, &dest, &filter)?;
            println!("{{\"written\": {written}}}");
        }

        Commands::Merge { dest, sources } => {
            let _guard = logging::init(false, None)?;
            let source_refs: Vec<&std::path::Path> = sources.iter().map(|p| p.as_path()).collect();
            let written = ops::merge(&source_refs, &dest)?;
            println!("{{\"written\": {written}}}");
        }

        Commands::Export {
            capture_dir,
            format,
            out,
            from,
            to,
            labels,
        } => {
            let _guard = logging::init(false, None)?;
            let reader = Reader::open(&capture_dir)?;
            let filter = build_filter(from, to, &labels, None)?;

            let stdout;
            let file;
            let sink: Box<dyn std::io::Write> = match &out {
                Some(path) => {
                    file = std::fs::File::create(path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    Box::new(file)
                }
                None => {
                    stdout = std::io::stdout();
                    Box::new(stdout)
                }
            };

            let count = match format.as_str() {
                "jsonl" => {
                    let mut writer = ops::JsonlWriter::new(sink);
                    ops::export::export_all(&reader, &filter, &mut writer)?
                }
                "csv" => {
                    let mut writer = ops::CsvWriter::new(sink);
                    ops::export::export_all(&reader, &filter, &mut writer)?
                }
                other => {
                    return Err(LogtapError::Usage(format!(
                        "unknown export format {other:?}, use jsonl or csv"
                    ))
                    .into())
                }
            };
            eprintln!("exported {count} entries");
        }

        Commands::Triage {
            capture_dir,
            jobs,
            window_secs,
            top,
            correlate,
        } => {
            let _guard = logging::init(false, None)?;
            let config = triage::TriageConfig {
                jobs: if jobs > 0 { jobs } else { num_cpus::get() },
                window: Duration::from_secs(window_secs),
                top,
            };
            let shard = triage::scan::run(&capture_dir, &config)?;

            let top_signatures: Vec<_> = shard
                .top_signatures(config.top)
                .into_iter()
                .map(|(sig, stats)| serde_json::json!({"signature": sig, "count": stats.count, "first_seen": stats.first_seen}))
                .collect();
            let peak = triage::windows::peak_error_window(&shard.per_window_errors, config.window, 5);
            let steady = triage::windows::steady_state(&shard.per_window_errors, config.window, 5);
            let incident_start = triage::windows::incident_start(&shard.signatures, config.window);

            let mut output = serde_json::json!({
                "total": shard.total,
                "errors": shard.errors,
                "top_signatures": top_signatures,
                "peak_error_window": peak,
                "steady_state": steady,
                "incident_start": incident_start,
            });

            if correlate {
                let report = triage::correlate::correlate(
                    &capture_dir,
                    triage::correlate::DEFAULT_WINDOW,
                    triage::correlate::DEFAULT_MAX_LAG,
                )?;
                output["correlation"] = serde_json::to_value(&report)?;
            }

            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Commands::Diff {
            a,
            b,
            baseline,
            fail_on_regression,
        } => {
            let _guard = logging::init(false, None)?;
            if baseline {
                let result = ops::baseline_diff(&a, &b)?;
                println!("{}", serde_json::to_string_pretty(&result)?);
                if fail_on_regression && result.verdict == ops::diff::Verdict::Regression {
                    return Err(LogtapError::FindingsThreshold(format!(
                        "baseline regression: error rate changed {:+.1}%",
                        result.error_rate_change_pct
                    ))
                    .into());
                }
            } else {
                let result = ops::diff_captures(&a, &b)?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }

        Commands::Gc {
            capture_dir,
            disk_cap_bytes,
        } => {
            let _guard = logging::init(false, None)?;
            let metrics = Registry::new();
            let meta = metadata::read(&capture_dir)?;
            let evicted = rotator::enforce_disk_cap(&capture_dir, disk_cap_bytes, 0, &metrics)?;
            println!(
                "{{\"evicted\": {}, \"was_live\": {}}}",
                evicted.len(),
                meta.is_live()
            );
        }
    }

    Ok(())
}
