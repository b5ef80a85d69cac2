use chrono::NaiveDate;
use thiserror::Error;

use crate::models::Claim;

pub const CSV_HEADER: &str = "Claim ID,Patient,Facility,Status,Amount";

/// How field values are written into the CSV export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CsvDialect {
    /// Fields are joined verbatim; embedded commas are not escaped.
    #[default]
    Legacy,
    /// RFC 4180 quoting for fields containing a comma, quote, CR or LF.
    Rfc4180,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown CSV dialect: {0}")]
pub struct UnknownCsvDialect(pub String);

impl std::str::FromStr for CsvDialect {
    type Err = UnknownCsvDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "legacy" => Ok(CsvDialect::Legacy),
            "rfc4180" | "quoted" => Ok(CsvDialect::Rfc4180),
            _ => Err(UnknownCsvDialect(s.trim().to_string())),
        }
    }
}

pub fn export_csv(rows: &[Claim]) -> String {
    export_csv_with(rows, CsvDialect::Legacy)
}

pub fn export_csv_with(rows: &[Claim], dialect: CsvDialect) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(CSV_HEADER.to_string());
    for claim in rows {
        let amount = claim.amount.to_string();
        let fields = [
            claim.id.as_str(),
            claim.patient.as_str(),
            claim.facility.as_str(),
            claim.status.as_str(),
            amount.as_str(),
        ];
        let line = fields
            .iter()
            .map(|field| write_field(field, dialect))
            .collect::<Vec<String>>()
            .join(",");
        lines.push(line);
    }
    lines.join("\n")
}

/// `claims-queue-2026-10-18.csv`
pub fn export_file_name(date: NaiveDate) -> String {
    format!("claims-queue-{}.csv", date.format("%Y-%m-%d"))
}

fn write_field(field: &str, dialect: CsvDialect) -> String {
    match dialect {
        CsvDialect::Legacy => field.to_string(),
        CsvDialect::Rfc4180 if field.contains([',', '"', '\r', '\n']) => {
            format!("\"{}\"", field.replace('"', "\"\""))
        }
        CsvDialect::Rfc4180 => field.to_string(),
    }
}
