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
use loyalty_ledger::telemetry::init_tracing;
use loyalty_ledger::{Ledger, LedgerConfig, LedgerError, LoyaltyCard, MemoryStore, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Loyalty Ledger - Replay stamp operations from CSV
///
/// Reads grant, adjust and redeem operations from a CSV file and writes the
/// resulting loyalty cards to stdout.
#[derive(Parser, Debug)]
#[command(name = "loyalty-ledger")]
#[command(about = "Replays loyalty-stamp operations and prints the resulting cards", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: op,customer,staff,amount
    /// Example: cargo run -- operations.csv > cards.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// YAML ledger configuration (reward threshold, retries)
    #[arg(long, value_name = "CONFIG")]
    config: Option<PathBuf>,
}

fn main() {
    init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match LedgerConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!(path = %path.display(), error = %e, "could not load config");
                process::exit(1);
            }
        },
        None => LedgerConfig::default(),
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            error!(path = %args.input.display(), error = %e, "could not open input");
            process::exit(1);
        }
    };

    let ledger = Ledger::new(Arc::new(MemoryStore::new()), config);
    if let Err(e) = process_operations(&ledger, BufReader::new(file)) {
        error!(error = %e, "could not read operations");
        process::exit(1);
    }

    if let Err(e) = write_cards(&ledger, std::io::stdout()) {
        error!(error = %e, "could not write cards");
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, customer, staff, amount`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    customer: UserId,
    staff: UserId,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Grant { amount: i64 },
    Adjust { delta: i64 },
    Redeem,
}

impl CsvRecord {
    /// Returns `None` for unknown operations or a missing amount.
    fn operation(&self) -> Option<Operation> {
        match self.op.to_lowercase().as_str() {
            "grant" => Some(Operation::Grant {
                amount: self.amount?,
            }),
            "adjust" => Some(Operation::Adjust {
                delta: self.amount?,
            }),
            "redeem" => Some(Operation::Redeem),
            _ => None,
        }
    }
}

/// Applies every valid row of `reader` to `ledger`.
///
/// Malformed rows and rejected operations are logged and skipped.
///
/// # CSV Format
///
/// ```csv
/// op,customer,staff,amount
/// grant,2f1c6b1e-8a53-4b8e-9a43-6f0d2d7c9b10,7d0e0a55-3b7e-4d3f-a1a6-0c8f0b6c1d22,2
/// adjust,2f1c6b1e-8a53-4b8e-9a43-6f0d2d7c9b10,7d0e0a55-3b7e-4d3f-a1a6-0c8f0b6c1d22,-1
/// redeem,2f1c6b1e-8a53-4b8e-9a43-6f0d2d7c9b10,7d0e0a55-3b7e-4d3f-a1a6-0c8f0b6c1d22,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn process_operations<R: Read>(ledger: &Ledger, reader: R) -> Result<usize, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut applied = 0;
    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(line, error = %e, "skipping malformed row");
                continue;
            }
        };

        let Some(operation) = record.operation() else {
            warn!(line, op = %record.op, "skipping invalid operation");
            continue;
        };

        match apply(ledger, &record, operation) {
            Ok(_) => applied += 1,
            Err(e) => warn!(line, customer = %record.customer, error = %e, "skipping rejected operation"),
        }
    }

    info!(applied, "operations replayed");
    Ok(applied)
}

fn apply(
    ledger: &Ledger,
    record: &CsvRecord,
    operation: Operation,
) -> Result<LoyaltyCard, LedgerError> {
    match operation {
        Operation::Grant { amount } => {
            ledger.record_stamp_grant(record.customer, record.staff, amount)
        }
        Operation::Adjust { delta } => ledger.adjust_visits(record.customer, record.staff, delta),
        Operation::Redeem => ledger.redeem_reward(record.customer, record.staff),
    }
}

/// One output row per card.
#[derive(Debug, Serialize)]
struct CardRow {
    user_id: UserId,
    current_stamps: u32,
    total_stamps: u32,
    total_visits: u32,
    filled_slots: u32,
    remaining: u32,
    progress_percent: Decimal,
}

/// Writes every card with its reward progress.
///
/// # CSV Format
///
/// Columns: `user_id, current_stamps, total_stamps, total_visits, filled_slots, remaining, progress_percent`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_cards<W: Write>(ledger: &Ledger, writer: W) -> Result<(), Box<dyn std::error::Error>> {
    let mut wtr = Writer::from_writer(writer);

    let mut cards = ledger.cards()?;
    cards.sort_by_key(|card| card.id);

    for card in cards {
        let progress = ledger.reward(&card);
        wtr.serialize(CardRow {
            user_id: card.user_id,
            current_stamps: card.current_stamps(),
            total_stamps: card.total_stamps(),
            total_visits: card.total_visits(),
            filled_slots: progress.filled_slots,
            remaining: progress.remaining,
            progress_percent: progress.progress_percent,
        })?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const ANA: &str = "2f1c6b1e-8a53-4b8e-9a43-6f0d2d7c9b10";
    const LUIS: &str = "9a7b1c2d-3e4f-4a5b-8c6d-7e8f9a0b1c2d";
    const STAFF: &str = "7d0e0a55-3b7e-4d3f-a1a6-0c8f0b6c1d22";

    fn replay(csv: &str) -> Ledger {
        let ledger = Ledger::in_memory();
        process_operations(&ledger, Cursor::new(csv.to_string())).unwrap();
        ledger
    }

    fn card(ledger: &Ledger, id: &str) -> LoyaltyCard {
        ledger.poll_card(id.parse().unwrap()).unwrap()
    }

    #[test]
    fn parse_simple_grant() {
        let ledger = replay(&format!("op,customer,staff,amount\ngrant,{ANA},{STAFF},2\n"));
        let card = card(&ledger, ANA);
        assert_eq!(card.current_stamps(), 2);
        assert_eq!(card.total_visits(), 1);
    }

    #[test]
    fn parse_adjust_and_redeem() {
        let ledger = replay(&format!(
            "op,customer,staff,amount\n\
             grant,{ANA},{STAFF},11\n\
             adjust,{ANA},{STAFF},-5\n\
             redeem,{ANA},{STAFF},\n"
        ));
        let card = card(&ledger, ANA);
        assert_eq!(card.current_stamps(), 1);
        assert_eq!(card.total_stamps(), 11);
        assert_eq!(card.total_visits(), 0);
    }

    #[test]
    fn parse_with_whitespace() {
        let ledger = replay(&format!(
            "op,customer,staff,amount\n grant , {ANA} , {STAFF} , 3 \n"
        ));
        assert_eq!(card(&ledger, ANA).current_stamps(), 3);
    }

    #[test]
    fn skip_malformed_and_rejected_rows() {
        let ledger = Ledger::in_memory();
        let csv = format!(
            "op,customer,staff,amount\n\
             grant,{ANA},{STAFF},1\n\
             grant,not-a-uuid,{STAFF},1\n\
             grant,{LUIS},{STAFF},0\n\
             stamp,{LUIS},{STAFF},1\n\
             grant,{LUIS},{STAFF},\n\
             redeem,{ANA},{STAFF},\n\
             grant,{LUIS},{STAFF},4\n"
        );
        let applied = process_operations(&ledger, Cursor::new(csv)).unwrap();

        assert_eq!(applied, 2);
        assert_eq!(card(&ledger, ANA).current_stamps(), 1);
        assert_eq!(card(&ledger, LUIS).current_stamps(), 4);
    }

    #[test]
    fn write_cards_to_csv() {
        let ledger = replay(&format!(
            "op,customer,staff,amount\n\
             grant,{ANA},{STAFF},7\n\
             grant,{LUIS},{STAFF},12\n"
        ));

        let mut output = Vec::new();
        write_cards(&ledger, &mut output).unwrap();
        let output = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(
            lines[0],
            "user_id,current_stamps,total_stamps,total_visits,filled_slots,remaining,progress_percent"
        );
        assert_eq!(lines[1], format!("{ANA},7,7,1,7,3,70"));
        assert_eq!(lines[2], format!("{LUIS},12,12,1,10,0,100"));
    }
}
