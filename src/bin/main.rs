// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::{Args as ClapArgs, Parser};
use crossbeam::channel;
use csv::{ReaderBuilder, Trim, Writer};
use point_ledger::{
    MemoryPointHistoryStore, MemoryUserPointStore, PointError, PointPolicy, PointService,
    PolicyError, UserId,
};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Point Ledger - Replay charge/use CSV files
///
/// Reads operations from a CSV file, applies them concurrently against one
/// in-memory ledger, and writes the resulting balances to stdout.
#[derive(Parser, Debug)]
#[command(name = "point-ledger")]
#[command(about = "Replays point charge/use CSVs against a concurrent ledger", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: type,user,amount
    /// Example: cargo run -- operations.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Number of worker threads applying operations
    #[arg(short, long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    workers: u16,

    /// Give up on a user lock after this many milliseconds (waits forever if unset)
    #[arg(long, value_name = "MS")]
    lock_timeout_ms: Option<u64>,

    /// Write the history log instead of the balances
    #[arg(long)]
    history: bool,

    #[command(flatten)]
    policy: PolicyArgs,
}

/// Policy thresholds, all overridable.
#[derive(ClapArgs, Debug)]
struct PolicyArgs {
    #[arg(long, default_value_t = PointPolicy::DEFAULT.min_amount_per_charge)]
    min_amount_per_charge: i64,

    #[arg(long, default_value_t = PointPolicy::DEFAULT.charge_unit, value_parser = clap::value_parser!(i64).range(1..))]
    charge_unit: i64,

    #[arg(long, default_value_t = PointPolicy::DEFAULT.max_amount_per_charge)]
    max_amount_per_charge: i64,

    #[arg(long, default_value_t = PointPolicy::DEFAULT.max_total_amount)]
    max_total_amount: i64,

    #[arg(long, default_value_t = PointPolicy::DEFAULT.use_unit, value_parser = clap::value_parser!(i64).range(1..))]
    use_unit: i64,

    #[arg(long, default_value_t = PointPolicy::DEFAULT.min_amount_per_use)]
    min_amount_per_use: i64,
}

impl TryFrom<PolicyArgs> for PointPolicy {
    type Error = PolicyError;

    fn try_from(args: PolicyArgs) -> Result<Self, Self::Error> {
        PointPolicy::new(
            args.min_amount_per_charge,
            args.charge_unit,
            args.max_amount_per_charge,
            args.max_total_amount,
            args.use_unit,
            args.min_amount_per_use,
        )
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let service = PointPolicy::try_from(args.policy).and_then(|policy| {
        PointService::new(MemoryUserPointStore::new(), MemoryPointHistoryStore::new(), policy)
    });
    let mut service = match service {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Invalid policy: {}", e);
            process::exit(1);
        }
    };
    if let Some(ms) = args.lock_timeout_ms {
        service = service.with_lock_timeout(Duration::from_millis(ms));
    }

    let summary = replay(&service, BufReader::new(file), usize::from(args.workers));
    info!(
        applied = summary.applied,
        rejected = summary.rejected,
        skipped = summary.skipped,
        "replay finished"
    );

    let written = if args.history {
        write_histories(&service, std::io::stdout())
    } else {
        write_balances(&service, std::io::stdout())
    };
    if let Err(e) = written {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, user, amount`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    op_type: String,
    user: u64,
    amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Charge { user_id: UserId, amount: i64 },
    Use { user_id: UserId, amount: i64 },
}

impl CsvRecord {
    /// Returns `None` for unknown operation types.
    fn into_operation(self) -> Option<Operation> {
        let user_id = UserId(self.user);
        let amount = self.amount;
        match self.op_type.to_lowercase().as_str() {
            "charge" => Some(Operation::Charge { user_id, amount }),
            "use" => Some(Operation::Use { user_id, amount }),
            _ => None,
        }
    }
}

impl Operation {
    fn apply(self, service: &PointService) -> Result<(), PointError> {
        match self {
            Operation::Charge { user_id, amount } => service.charge(user_id, amount).map(|_| ()),
            Operation::Use { user_id, amount } => service.use_points(user_id, amount).map(|_| ()),
        }
    }
}

/// Counts of what happened to each input row.
#[derive(Debug, Default, PartialEq, Eq)]
struct ReplaySummary {
    applied: usize,
    rejected: usize,
    skipped: usize,
}

/// Replays operations from a CSV reader across `workers` threads.
///
/// Rows are parsed on the calling thread and handed to the workers through a
/// bounded channel. Operations on the same user may be applied in any order
/// relative to each other; each is still applied atomically. Malformed rows
/// are skipped and rejected operations are counted, neither stops the replay.
///
/// # CSV Format
///
/// ```csv
/// type,user,amount
/// charge,1,5000
/// use,1,1200
/// ```
fn replay<R: Read>(service: &PointService, reader: R, workers: usize) -> ReplaySummary {
    let applied = AtomicUsize::new(0);
    let rejected = AtomicUsize::new(0);
    let mut skipped = 0;

    let (sender, receiver) = channel::bounded::<Operation>(workers * 64);

    thread::scope(|scope| {
        for _ in 0..workers {
            let receiver = receiver.clone();
            let (applied, rejected) = (&applied, &rejected);
            scope.spawn(move || {
                for operation in receiver {
                    match operation.apply(service) {
                        Ok(()) => applied.fetch_add(1, Ordering::Relaxed),
                        Err(_) => rejected.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
        drop(receiver);

        let mut rdr = ReaderBuilder::new()
            .trim(Trim::All)
            .has_headers(true)
            .from_reader(reader);

        for result in rdr.deserialize::<CsvRecord>() {
            let operation = match result {
                Ok(record) => record.into_operation(),
                Err(e) => {
                    warn!("skipping malformed row: {e}");
                    None
                }
            };
            let Some(operation) = operation else {
                skipped += 1;
                continue;
            };
            if sender.send(operation).is_err() {
                break;
            }
        }
        // Closing the channel lets the workers drain and exit.
        drop(sender);
    });

    ReplaySummary {
        applied: applied.into_inner(),
        rejected: rejected.into_inner(),
        skipped,
    }
}

/// Writes every balance as `user,point,updated_at`, ordered by user.
fn write_balances<W: Write>(service: &PointService, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for point in service.user_points().select_all() {
        wtr.serialize(point)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes every history record as `id,user,amount,type,updated_at`, ordered by id.
fn write_histories<W: Write>(service: &PointService, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for history in service.histories().select_all() {
        wtr.serialize(history)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run(csv: &str, workers: usize) -> (PointService, ReplaySummary) {
        let service = PointService::in_memory();
        let summary = replay(&service, Cursor::new(csv), workers);
        (service, summary)
    }

    #[test]
    fn replay_simple_charge() {
        let (service, summary) = run("type,user,amount\ncharge,1,5000\n", 1);

        assert_eq!(summary.applied, 1);
        assert_eq!(service.get_user_point(UserId(1)).unwrap().point, 5_000);
    }

    #[test]
    fn replay_charge_then_use_single_worker() {
        let csv = "type,user,amount\n\
                   charge,1,5000\n\
                   use,1,1200\n";
        let (service, summary) = run(csv, 1);

        assert_eq!(
            summary,
            ReplaySummary {
                applied: 2,
                rejected: 0,
                skipped: 0
            }
        );
        assert_eq!(service.get_user_point(UserId(1)).unwrap().point, 3_800);
    }

    #[test]
    fn replay_with_whitespace_and_case() {
        let (service, _) = run("type,user,amount\n CHARGE , 2 , 3000 \n", 2);
        assert_eq!(service.get_user_point(UserId(2)).unwrap().point, 3_000);
    }

    #[test]
    fn replay_skips_malformed_rows() {
        let csv = "type,user,amount\n\
                   charge,1,1000\n\
                   refund,1,1000\n\
                   charge,abc,1000\n\
                   charge,2,2000\n";
        let (service, summary) = run(csv, 2);

        assert_eq!(summary.applied, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(service.user_points().select_all().len(), 2);
    }

    #[test]
    fn replay_counts_rejections() {
        let csv = "type,user,amount\n\
                   charge,1,500\n\
                   use,2,100\n";
        let (service, summary) = run(csv, 2);

        assert_eq!(summary.rejected, 2);
        assert!(service.histories().select_all().is_empty());
    }

    #[test]
    fn replay_concurrent_charges_on_one_user() {
        let mut csv = String::from("type,user,amount\n");
        for _ in 0..200 {
            csv.push_str("charge,7,1000\n");
        }
        let (service, summary) = run(&csv, 8);

        assert_eq!(summary.applied, 200);
        assert_eq!(service.get_user_point(UserId(7)).unwrap().point, 200_000);
        assert_eq!(service.get_point_histories(UserId(7)).unwrap().len(), 200);
    }

    #[test]
    fn write_balances_to_csv() {
        let csv = "type,user,amount\n\
                   charge,2,2000\n\
                   charge,1,1000\n";
        let (service, _) = run(csv, 1);

        let mut output = Vec::new();
        write_balances(&service, &mut output).unwrap();
        let output = String::from_utf8(output).unwrap();
        let mut lines = output.lines();

        assert_eq!(lines.next(), Some("user,point,updated_at"));
        assert!(lines.next().unwrap().starts_with("1,1000,"));
        assert!(lines.next().unwrap().starts_with("2,2000,"));
    }

    #[test]
    fn write_histories_to_csv() {
        let csv = "type,user,amount\n\
                   charge,1,3000\n\
                   use,1,500\n";
        let (service, _) = run(csv, 1);

        let mut output = Vec::new();
        write_histories(&service, &mut output).unwrap();
        let output = String::from_utf8(output).unwrap();
        let mut lines = output.lines();

        assert_eq!(lines.next(), Some("id,user,amount,type,updated_at"));
        assert!(lines.next().unwrap().starts_with("1,1,3000,CHARGE,"));
        assert!(lines.next().unwrap().starts_with("2,1,500,USE,"));
    }

    #[test]
    fn policy_args_override_defaults() {
        let args = Args::parse_from([
            "point-ledger",
            "ops.csv",
            "--workers",
            "2",
            "--max-total-amount",
            "50000",
        ]);
        assert_eq!(args.workers, 2);

        let policy = PointPolicy::try_from(args.policy).unwrap();
        assert_eq!(policy.max_total_amount, 50_000);
        assert_eq!(policy.charge_unit, PointPolicy::DEFAULT.charge_unit);
    }

    #[test]
    fn policy_args_reject_non_positive_floor() {
        let args = Args::parse_from(["point-ledger", "ops.csv", "--min-amount-per-use", "0"]);
        assert_eq!(
            PointPolicy::try_from(args.policy),
            Err(PolicyError::NonPositiveFloor {
                name: "min_amount_per_use",
                value: 0
            })
        );
    }
}
