// receipts.rs - Receipt subcommands: verify, tail, query.

use chrono::{DateTime, Utc};
use clap::Subcommand;
use mathison_gateway::{open_ledger, GovernanceConfig};
use mathison_receipts::{ChainReport, Decision, Receipt, ReceiptQuery};

#[derive(Subcommand)]
pub enum ReceiptCommands {
    /// Verify the receipt hash chain and signatures.
    Verify {
        /// Only verify the last N receipts.
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Show the most recent receipts.
    Tail {
        /// Number of receipts to show.
        #[arg(short, default_value = "10")]
        n: usize,
    },
    /// Filter receipts.
    Query {
        /// Only receipts for this job id.
        #[arg(long)]
        job: Option<String>,
        /// Only receipts at this stage (e.g., "ACTION_GATE", "BOOT").
        #[arg(long)]
        stage: Option<String>,
        /// Only receipts with this decision (allow, deny, transform).
        #[arg(long)]
        decision: Option<String>,
        /// Only receipts at or after this RFC 3339 time.
        #[arg(long)]
        since: Option<String>,
        /// Only receipts at or before this RFC 3339 time.
        #[arg(long)]
        until: Option<String>,
        /// Keep only the last N matches.
        #[arg(long)]
        last: Option<usize>,
        /// Print matches as JSON lines.
        #[arg(long)]
        json: bool,
    },
}

pub fn execute(cmd: &ReceiptCommands, config: &GovernanceConfig) -> anyhow::Result<()> {
    if !config.receipts_path.exists() {
        println!("No receipt ledger found at {}", config.receipts_path.display());
        return Ok(());
    }
    let ledger = open_ledger(config)?;

    match cmd {
        ReceiptCommands::Verify { tail } => {
            let report = match tail {
                Some(n) => ledger.validate_tail(*n)?,
                None => ledger.validate_chain()?,
            };
            print_report(&report);
            if !report.valid {
                anyhow::bail!("Receipt chain integrity check failed");
            }
        }

        ReceiptCommands::Tail { n } => {
            let receipts = ledger.query(&ReceiptQuery::new().last(*n))?;
            print_table(&receipts);
        }

        ReceiptCommands::Query {
            job,
            stage,
            decision,
            since,
            until,
            last,
            json,
        } => {
            let mut query = ReceiptQuery::new().between(
                since.as_deref().map(parse_time).transpose()?,
                until.as_deref().map(parse_time).transpose()?,
            );
            if let Some(job) = job {
                query = query.job(job);
            }
            if let Some(stage) = stage {
                query = query.stage(stage);
            }
            if let Some(decision) = decision {
                let decision: Decision = decision.parse().map_err(anyhow::Error::msg)?;
                query = query.decision(decision);
            }
            if let Some(n) = last {
                query = query.last(*n);
            }

            let receipts = ledger.query(&query)?;
            if *json {
                for receipt in &receipts {
                    println!("{}", serde_json::to_string(receipt)?);
                }
            } else {
                print_table(&receipts);
            }
        }
    }

    Ok(())
}

fn parse_time(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| anyhow::anyhow!("invalid time '{}': {}", s, e))?
        .with_timezone(&Utc))
}

fn print_report(report: &ChainReport) {
    if report.valid {
        println!(
            "Receipt chain verified: {} of {} receipt(s) checked, chain intact.",
            report.checked, report.total
        );
        return;
    }
    println!(
        "INTEGRITY VIOLATIONS: {} in {} receipt(s) checked",
        report.violations.len(),
        report.checked
    );
    for v in &report.violations {
        println!("  [{}] {:?}", v.index, v.kind);
        println!("    Expected: {}", v.expected);
        println!("    Actual:   {}", v.actual);
    }
    println!();
    println!("The receipt ledger may have been tampered with.");
}

fn print_table(receipts: &[Receipt]) {
    if receipts.is_empty() {
        println!("No receipts.");
        return;
    }
    println!(
        "{:<6} {:<20} {:<14} {:<16} {:<20} {:<10} NOTES",
        "SEQ", "TIMESTAMP", "JOB", "STAGE", "ACTION", "DECISION"
    );
    println!("{}", "-".repeat(110));
    for r in receipts {
        println!(
            "{:<6} {:<20} {:<14} {:<16} {:<20} {:<10} {}",
            r.sequence_number,
            r.timestamp.format("%Y-%m-%d %H:%M:%S"),
            truncate(&r.job_id, 14),
            truncate(&r.stage, 16),
            truncate(&r.action, 20),
            r.decision.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
            r.notes.as_deref().unwrap_or(""),
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}~", kept)
    }
}
