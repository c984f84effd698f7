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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use lending_ledger::{
    ItemDetails, ItemId, Ledger, LedgerConfig, LedgerError, NewItem, ReservationId, Requester,
    Role, UserId,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

/// Lending Ledger - Replay catalog operations from a CSV file
///
/// Reads operations from a CSV file and outputs item states to stdout.
/// Supports add, claim, resolve, adjust and delete.
#[derive(Parser, Debug)]
#[command(name = "lending-ledger")]
#[command(about = "Replays lending operations and prints item capacity", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: op,user,role,target,value,label
    /// Example: cargo run -- operations.csv > items.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// How long one attempt waits for a contended item lock
    #[arg(long, default_value_t = LedgerConfig::DEFAULT_LOCK_TIMEOUT_MS)]
    lock_timeout_ms: u64,

    /// How many times a contended item lock is attempted
    #[arg(long, default_value_t = LedgerConfig::DEFAULT_LOCK_ATTEMPTS)]
    lock_attempts: u32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = LedgerConfig {
        lock_timeout_ms: args.lock_timeout_ms,
        lock_attempts: args.lock_attempts,
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let ledger = match process_operations(BufReader::new(file), config) {
        Ok(ledger) => ledger,
        Err(e) => {
            eprintln!("Error processing operations: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_items(&ledger, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, user, role, target, value, label`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    user: u32,
    role: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    target: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    value: Option<u32>,
    #[serde(default)]
    label: Option<String>,
}

/// One replayable ledger call.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    Add { title: String, capacity: u32 },
    Claim { item: ItemId },
    Resolve { reservation: ReservationId },
    Adjust { item: ItemId, total: u32 },
    Delete { item: ItemId },
}

impl CsvRecord {
    /// Splits the record into the acting user and the operation.
    ///
    /// Returns `None` for unknown operations or missing required fields.
    fn into_operation(self) -> Option<(Requester, Operation)> {
        let requester = Requester::new(UserId(self.user), Role::from_label(&self.role));

        let operation = match self.op.to_lowercase().as_str() {
            "add" => Operation::Add {
                title: self.label?,
                // Unparseable capacity falls back to a single copy.
                capacity: self.value.unwrap_or(1),
            },
            "claim" => Operation::Claim {
                item: ItemId(self.target?),
            },
            "resolve" => Operation::Resolve {
                reservation: ReservationId(self.target?),
            },
            "adjust" => Operation::Adjust {
                item: ItemId(self.target?),
                total: self.value?,
            },
            "delete" => Operation::Delete {
                item: ItemId(self.target?),
            },
            _ => return None,
        };
        Some((requester, operation))
    }
}

fn apply(ledger: &Ledger, requester: Requester, operation: Operation) -> Result<(), LedgerError> {
    match operation {
        Operation::Add { title, capacity } => {
            ledger.add_item(NewItem::new(ItemDetails::new(title, ""), capacity), requester)?;
        }
        Operation::Claim { item } => {
            ledger.claim(requester.user_id, item)?;
        }
        Operation::Resolve { reservation } => {
            ledger.resolve(reservation, requester)?;
        }
        Operation::Adjust { item, total } => {
            ledger.adjust_capacity(item, total, requester)?;
        }
        Operation::Delete { item } => {
            ledger.delete_item(item, requester)?;
        }
    }
    Ok(())
}

/// Replays operations from a CSV reader.
///
/// Rows are streamed, so arbitrarily large files are fine. Malformed rows and
/// rejected operations are skipped and logged at debug level.
///
/// # CSV Format
///
/// Expected columns: `op, user, role, target, value, label`
/// - `op`: add, claim, resolve, adjust or delete
/// - `user`: acting user ID (u32)
/// - `role`: `admin` or anything else for a member
/// - `target`: item ID, or reservation ID for resolve
/// - `value`: capacity for add and adjust
/// - `label`: title for add
///
/// # Example
///
/// ```csv
/// op,user,role,target,value,label
/// add,1,admin,,2,Dune
/// claim,2,member,1,,
/// resolve,2,member,1,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn process_operations<R: Read>(reader: R, config: LedgerConfig) -> Result<Ledger, csv::Error> {
    let ledger = Ledger::with_config(config);

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (row, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        match result {
            Ok(record) => {
                let Some((requester, operation)) = record.into_operation() else {
                    tracing::debug!(row, "skipping invalid operation record");
                    continue;
                };
                if let Err(e) = apply(&ledger, requester, operation) {
                    tracing::debug!(row, error = %e, "skipping rejected operation");
                }
            }
            Err(e) => {
                tracing::debug!(row, error = %e, "skipping malformed row");
            }
        }
    }

    Ok(ledger)
}

/// Output row for one item.
#[derive(Debug, Serialize)]
struct ItemRow {
    item: u32,
    title: String,
    total: u32,
    available: u32,
    outstanding: u32,
}

/// Writes item states to a CSV writer, ordered by item ID.
///
/// # CSV Format
///
/// Columns: `item, title, total, available, outstanding`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_items<W: Write>(ledger: &Ledger, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for item in ledger.items() {
        wtr.serialize(ItemRow {
            item: item.id.0,
            title: item.title,
            total: item.total_capacity,
            available: item.available,
            outstanding: item.outstanding,
        })?;
    }

    wtr.flush()?;
    Ok(())
}
