use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::IngestError;

/// Uniform in-memory view of an upload, whatever format it arrived in.
/// Cells are kept as loose JSON values; casting happens in the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct TableData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TableData {
    /// Builds a table from a pre-parsed `{headers, rows}` payload. Row arity
    /// must match the header count; this surface is synchronous, so a
    /// malformed payload is fatal.
    pub fn from_parsed(headers: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, IngestError> {
        if headers.is_empty() {
            return Err(IngestError::MalformedTable(
                "payload has no headers".to_string(),
            ));
        }

        for (index, row) in rows.iter().enumerate() {
            if row.len() != headers.len() {
                return Err(IngestError::MalformedTable(format!(
                    "row {} has {} cells, expected {}",
                    index,
                    row.len(),
                    headers.len()
                )));
            }
        }

        if rows.is_empty() {
            return Err(IngestError::EmptyRecordSet(
                "payload contains no rows".to_string(),
            ));
        }

        Ok(Self { headers, rows })
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self, IngestError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|header| header.to_string())
            .collect();

        if headers.is_empty() {
            return Err(IngestError::MalformedTable(
                "csv has no header row".to_string(),
            ));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row: Vec<Value> = record
                .iter()
                .take(headers.len())
                .map(|cell| {
                    if cell.is_empty() {
                        Value::Null
                    } else {
                        Value::String(cell.to_string())
                    }
                })
                .collect();
            // ragged short rows are padded to header arity
            row.resize(headers.len(), Value::Null);
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(IngestError::EmptyRecordSet(
                "csv contains no data rows".to_string(),
            ));
        }

        Ok(Self { headers, rows })
    }

    /// Reads the first worksheet of an xlsx/xls workbook. The first row is
    /// treated as the header row.
    pub fn from_workbook_bytes(bytes: &[u8]) -> Result<Self, IngestError> {
        let cursor = Cursor::new(bytes.to_vec());
        let mut workbook = open_workbook_auto_from_rs(cursor)
            .map_err(|error| IngestError::Spreadsheet(error.to_string()))?;

        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| IngestError::Spreadsheet("workbook has no sheets".to_string()))?;

        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|error| IngestError::Spreadsheet(error.to_string()))?;

        let mut row_iter = range.rows();
        let headers: Vec<String> = row_iter
            .next()
            .ok_or_else(|| {
                IngestError::MalformedTable("worksheet has no header row".to_string())
            })?
            .iter()
            .map(cell_to_header)
            .collect();

        if headers.iter().all(String::is_empty) {
            return Err(IngestError::MalformedTable(
                "worksheet header row is empty".to_string(),
            ));
        }

        let mut rows = Vec::new();
        for cells in row_iter {
            let mut row: Vec<Value> = cells.iter().map(cell_to_value).collect();
            row.resize(headers.len(), Value::Null);
            row.truncate(headers.len());
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(IngestError::EmptyRecordSet(
                "worksheet contains no data rows".to_string(),
            ));
        }

        Ok(Self { headers, rows })
    }

    /// Dispatches on the upload's file extension.
    pub fn from_upload(filename: &str, bytes: &[u8]) -> Result<Self, IngestError> {
        let extension = filename
            .rsplit('.')
            .next()
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => Self::from_csv_bytes(bytes),
            "xlsx" | "xls" => Self::from_workbook_bytes(bytes),
            _ => Err(IngestError::UnsupportedFormat(filename.to_string())),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

fn cell_to_header(cell: &Data) -> String {
    match cell {
        Data::String(text) => text.clone(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::String(text) => Value::String(text.clone()),
        Data::Int(value) => Value::from(*value),
        Data::Float(value) => serde_json::Number::from_f64(*value)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Data::Bool(value) => Value::Bool(*value),
        Data::DateTime(stamp) => stamp
            .as_datetime()
            .map(|parsed| Value::String(parsed.date().to_string()))
            .unwrap_or(Value::Null),
        Data::DateTimeIso(text) | Data::DurationIso(text) => Value::String(text.clone()),
    }
}

/// Hex sha256 of the raw upload, stamped onto the batch report.
pub fn upload_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::{upload_checksum, TableData};
    use crate::error::IngestError;
    use serde_json::{json, Value};

    #[test]
    fn csv_rows_keep_header_arity() {
        let bytes = b"TransactionID,Vendor,Quantity\nT-1,VendorA,5\nT-2,VendorB\n";
        let table = TableData::from_csv_bytes(bytes).unwrap();

        assert_eq!(table.headers, vec!["TransactionID", "Vendor", "Quantity"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.rows[0][2], Value::String("5".to_string()));
        assert_eq!(table.rows[1][2], Value::Null);
    }

    #[test]
    fn empty_csv_is_rejected() {
        let result = TableData::from_csv_bytes(b"TransactionID,Vendor\n");
        assert!(matches!(result, Err(IngestError::EmptyRecordSet(_))));
    }

    #[test]
    fn parsed_payload_checks_arity() {
        let result = TableData::from_parsed(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![json!(1)]],
        );
        assert!(matches!(result, Err(IngestError::MalformedTable(_))));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let result = TableData::from_upload("records.parquet", b"x");
        assert!(matches!(result, Err(IngestError::UnsupportedFormat(_))));
    }

    #[test]
    fn checksum_is_reproducible() {
        assert_eq!(upload_checksum(b"abc"), upload_checksum(b"abc"));
        assert_ne!(upload_checksum(b"abc"), upload_checksum(b"abd"));
    }
}
