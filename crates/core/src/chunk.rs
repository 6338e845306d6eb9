use crate::models::{Chunk, ChunkMetadata};
use crate::normalize::NormalizedRow;

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// English month name with the lenient fallbacks the retrieval texts rely
/// on: out-of-range numbers render as `Month-N`, absent or non-numeric
/// values as `Unknown month`.
pub fn month_name(month: Option<i32>) -> String {
    match month {
        Some(value @ 1..=12) => MONTH_NAMES[(value - 1) as usize].to_string(),
        Some(other) => format!("Month-{other}"),
        None => "Unknown month".to_string(),
    }
}

fn year_name(year: Option<i32>) -> String {
    match year {
        Some(value) => value.to_string(),
        None => "Unknown year".to_string(),
    }
}

fn text_or_none(field: Option<&str>) -> &str {
    field.unwrap_or("None")
}

/// Renders one row into its fixed-template sentence and carries the full
/// canonical record (plus any upstream-assigned id) as metadata.
pub fn build_chunk(row: &NormalizedRow, batch_id: Option<&str>) -> Chunk {
    let record = &row.record;
    let text = format!(
        "In {} {}, a {} facility in the {} region purchased {} unit(s) of {} from {} for ${:.2}.",
        month_name(record.month),
        year_name(record.year),
        text_or_none(record.facility_type.as_deref()),
        text_or_none(record.region.as_deref()),
        record.quantity,
        text_or_none(record.item_desc.as_deref()),
        text_or_none(record.vendor.as_deref()),
        record.total_spend,
    );

    Chunk {
        text,
        metadata: ChunkMetadata {
            id: row.preassigned_id.clone(),
            batch_id: batch_id.map(str::to_string),
            record: record.clone(),
        },
    }
}

/// One chunk per row, input order preserved.
pub fn build_chunks(rows: &[NormalizedRow], batch_id: Option<&str>) -> Vec<Chunk> {
    rows.iter().map(|row| build_chunk(row, batch_id)).collect()
}
