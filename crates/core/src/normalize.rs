use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::config::MIN_YEAR;
use crate::error::IngestError;
use crate::models::{FailureStage, RowFailure, TransactionRecord};
use crate::tabular::TableData;

/// A strictly validated row plus the identifier the upload may have already
/// assigned to it (carried through so later lookups by id keep working).
#[derive(Debug, Clone)]
pub struct NormalizedRow {
    /// Index of the row in the uploaded table, for failure reporting.
    pub source_row: usize,
    pub record: TransactionRecord,
    pub preassigned_id: Option<String>,
}

/// Outcome of a whole-table normalization pass. Invalid rows are dropped
/// and reported; they never abort the batch.
#[derive(Debug, Default)]
pub struct NormalizedTable {
    pub rows: Vec<NormalizedRow>,
    pub dropped: Vec<RowFailure>,
}

/// Strips, lowercases, and underscores a raw header, then renames known
/// variants to the canonical field name.
pub fn canonical_header(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase().replace([' ', '-'], "_");
    let canonical = match lowered.as_str() {
        "transactionid" | "purchaseid" | "purchase_id" => "transaction_id",
        "facilityid" => "facility_id",
        "facilitytype" => "facility_type",
        "bedsize" => "bed_size",
        "loaddate" => "load_date",
        "vendorname" | "vendor_name" => "vendor",
        "vendorid" => "vendor_id",
        "manufacturerid" | "manufacturer_id" => "manufacturer_id",
        "catalognumber" | "catalog_no" | "catalogno" => "catalog_number",
        "itemdesc" | "itemdescription" | "item_description" => "item_desc",
        "qty" => "quantity",
        "pricepaid" => "price_paid",
        "totalspend" => "total_spend",
        other => other,
    };
    canonical.to_string()
}

/// `total_spend / quantity`, undefined when quantity is zero.
pub fn derive_unit_cost(total_spend: f64, quantity: i64) -> Option<f64> {
    if quantity == 0 {
        None
    } else {
        Some(total_spend / quantity as f64)
    }
}

/// Validates and casts every row of a parsed table into the canonical
/// schema. Rows missing a required field, carrying an unparseable date, or
/// with non-positive quantity/price are dropped and reported.
pub fn normalize_table(table: &TableData) -> Result<NormalizedTable, IngestError> {
    let columns = column_index(&table.headers);
    if !columns.contains_key("transaction_id") {
        return Err(IngestError::MalformedTable(
            "no transaction id column present".to_string(),
        ));
    }

    let mut normalized = NormalizedTable::default();

    for (row_index, row) in table.rows.iter().enumerate() {
        match normalize_row(row_index, row, &columns) {
            Ok(entry) => normalized.rows.push(entry),
            Err(reason) => normalized.dropped.push(RowFailure {
                row_index,
                stage: FailureStage::Validation,
                reason,
            }),
        }
    }

    Ok(normalized)
}

fn normalize_row(
    row_index: usize,
    row: &[Value],
    columns: &HashMap<String, usize>,
) -> Result<NormalizedRow, String> {
    let cell = |name: &str| columns.get(name).and_then(|index| row.get(*index));

    let required_text = |name: &str| {
        cell(name)
            .and_then(as_text)
            .ok_or_else(|| format!("row {row_index}: missing required field {name}"))
    };
    let required_int = |name: &str| {
        cell(name)
            .and_then(as_int)
            .ok_or_else(|| format!("row {row_index}: missing or non-numeric field {name}"))
    };
    let required_float = |name: &str| {
        cell(name)
            .and_then(as_float)
            .ok_or_else(|| format!("row {row_index}: missing or non-numeric field {name}"))
    };

    let transaction_id = required_text("transaction_id")?;
    let facility_id = required_text("facility_id")?;
    let load_date = cell("load_date")
        .and_then(as_date)
        .ok_or_else(|| format!("row {row_index}: missing or unparseable load_date"))?;
    let quantity = required_int("quantity")?;
    let price_paid = required_float("price_paid")?;
    let total_spend = required_float("total_spend")?;

    if quantity <= 0 {
        return Err(format!("row {row_index}: quantity must be positive"));
    }
    if price_paid <= 0.0 {
        return Err(format!("row {row_index}: price_paid must be positive"));
    }

    let record = TransactionRecord {
        transaction_id,
        facility_id,
        facility_type: cell("facility_type")
            .and_then(as_text)
            .map(|value| value.to_uppercase()),
        region: cell("region").and_then(as_text),
        bed_size: cell("bed_size").and_then(as_text),
        month: cell("month").and_then(as_int).map(|value| value as i32),
        year: cell("year")
            .and_then(as_int)
            .map(|value| value as i32)
            .filter(|year| *year >= MIN_YEAR),
        load_date,
        vendor: cell("vendor").and_then(as_text),
        vendor_id: cell("vendor_id").and_then(as_text),
        manufacturer: cell("manufacturer").and_then(as_text),
        catalog_number: cell("catalog_number").and_then(as_text),
        item_desc: cell("item_desc").and_then(as_text),
        quantity,
        price_paid,
        total_spend,
        unit_cost: derive_unit_cost(total_spend, quantity),
    };

    Ok(NormalizedRow {
        source_row: row_index,
        record,
        preassigned_id: cell("id").and_then(as_text),
    })
}

fn column_index(headers: &[String]) -> HashMap<String, usize> {
    let mut columns = HashMap::new();
    for (index, header) in headers.iter().enumerate() {
        // first occurrence wins on duplicate headers
        columns
            .entry(canonical_header(header))
            .or_insert(index);
    }
    columns
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(text) => {
            let trimmed = text.trim();
            trimmed.parse::<i64>().ok().or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_date(value: &Value) -> Option<NaiveDate> {
    let text = as_text(value)?;
    const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(&text, format) {
            return Some(parsed);
        }
    }

    NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S")
        .map(|stamp| stamp.date())
        .ok()
}
