//! CSV decoding under a schema contract
//!
//! Shared by every backend so load semantics do not depend on where the rows
//! end up: integers must be whole numbers, floats accept fractions, empty
//! cells are null only for nullable-float columns, and strings are kept
//! verbatim. A row with any bad cell is rejected as a whole.

use crate::contract::{SchemaContract, SemanticType};

use super::{CellValue, LoadJobConfig, RowError, WarehouseError};

/// Rows decoded from a source file
#[derive(Debug, Clone, Default)]
pub struct DecodedRows {
    pub rows: Vec<Vec<CellValue>>,
    /// Rows dropped under the bad record tolerance
    pub bad_records: u64,
    pub bytes_read: u64,
}

/// Decode CSV bytes into typed rows
///
/// Fails with `WarehouseError::MalformedInput` when the number of bad rows
/// exceeds `config.max_bad_records`; no rows are returned in that case.
pub fn decode_csv(
    bytes: &[u8],
    uri: &str,
    config: &LoadJobConfig,
) -> Result<DecodedRows, WarehouseError> {
    let contract = &config.schema;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    let mut errors = Vec::new();

    for (index, record) in reader.records().enumerate() {
        if index < config.skip_leading_rows {
            continue;
        }

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                errors.push(RowError {
                    line: e.position().map(|p| p.line()).unwrap_or(0),
                    column: None,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let line = record.position().map(|p| p.line()).unwrap_or(index as u64 + 1);

        match decode_record(&record, line, contract) {
            Ok(row) => rows.push(row),
            Err(error) => errors.push(error),
        }
    }

    if errors.len() > config.max_bad_records {
        return Err(WarehouseError::MalformedInput {
            uri: uri.to_string(),
            errors,
        });
    }

    Ok(DecodedRows {
        rows,
        bad_records: errors.len() as u64,
        bytes_read: bytes.len() as u64,
    })
}

fn decode_record(
    record: &csv::StringRecord,
    line: u64,
    contract: &SchemaContract,
) -> Result<Vec<CellValue>, RowError> {
    if record.len() != contract.len() {
        return Err(RowError {
            line,
            column: None,
            reason: format!(
                "expected {} fields, found {}",
                contract.len(),
                record.len()
            ),
        });
    }

    contract
        .columns()
        .iter()
        .zip(record.iter())
        .map(|(spec, raw)| {
            decode_cell(raw, spec.semantic_type).map_err(|reason| RowError {
                line,
                column: Some(spec.name.clone()),
                reason,
            })
        })
        .collect()
}

/// Decode one cell under a semantic type
pub fn decode_cell(raw: &str, semantic_type: SemanticType) -> Result<CellValue, String> {
    let trimmed = raw.trim();
    match semantic_type {
        SemanticType::String => Ok(CellValue::Text(raw.to_string())),
        SemanticType::Integer => {
            if trimmed.is_empty() {
                return Err("missing value for integer column".to_string());
            }
            trimmed
                .parse::<i64>()
                .map(CellValue::Integer)
                .map_err(|_| format!("'{}' is not a whole number", trimmed))
        }
        SemanticType::Float => {
            if trimmed.is_empty() {
                return Err("missing value for float column".to_string());
            }
            parse_float(trimmed)
        }
        SemanticType::NullableFloat => {
            if trimmed.is_empty() {
                Ok(CellValue::Null)
            } else {
                parse_float(trimmed)
            }
        }
    }
}

fn parse_float(s: &str) -> Result<CellValue, String> {
    s.parse::<f64>()
        .map(CellValue::Float)
        .map_err(|_| format!("'{}' is not a number", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "InvoiceNo,StockCode,Description,Quantity,InvoiceDate,UnitPrice,CustomerID,Country\n";

    fn config() -> LoadJobConfig {
        LoadJobConfig::csv_append(SchemaContract::retail().clone())
    }

    #[test]
    fn test_decode_retail_row() {
        let csv = format!(
            "{HEADER}536365,71053,WHITE METAL LANTERN,6,2010-12-01 08:26,3.39,17850.0,United Kingdom\n"
        );
        let decoded = decode_csv(csv.as_bytes(), "mem://b/k", &config()).unwrap();

        assert_eq!(decoded.rows.len(), 1);
        assert_eq!(decoded.bad_records, 0);
        assert_eq!(decoded.bytes_read, csv.len() as u64);

        let row = &decoded.rows[0];
        assert_eq!(row[0], CellValue::Text("536365".to_string()));
        assert_eq!(row[1], CellValue::Text("71053".to_string()));
        assert_eq!(row[3], CellValue::Integer(6));
        assert_eq!(row[5], CellValue::Float(3.39));
        assert_eq!(row[6], CellValue::Float(17850.0));
        assert_eq!(row[7], CellValue::Text("United Kingdom".to_string()));
    }

    #[test]
    fn test_empty_nullable_float_is_null() {
        let csv = format!("{HEADER}536414,22139,,56,2010-12-01 11:52,0,,United Kingdom\n");
        let decoded = decode_csv(csv.as_bytes(), "mem://b/k", &config()).unwrap();

        let row = &decoded.rows[0];
        assert_eq!(row[2], CellValue::Text(String::new()));
        assert_eq!(row[5], CellValue::Float(0.0));
        assert_eq!(row[6], CellValue::Null);
    }

    #[test]
    fn test_quoted_fields() {
        let csv = format!(
            "{HEADER}536365,84029G,\"KNITTED UNION FLAG, HOT WATER BOTTLE\",6,2010-12-01 08:26,3.39,17850,United Kingdom\n"
        );
        let decoded = decode_csv(csv.as_bytes(), "mem://b/k", &config()).unwrap();
        assert_eq!(
            decoded.rows[0][2],
            CellValue::Text("KNITTED UNION FLAG, HOT WATER BOTTLE".to_string())
        );
        assert_eq!(decoded.rows[0][6], CellValue::Float(17850.0));
    }

    #[test]
    fn test_fractional_integer_is_malformed() {
        let csv = format!("{HEADER}536365,71053,LANTERN,6.5,2010-12-01 08:26,3.39,17850.0,UK\n");
        let err = decode_csv(csv.as_bytes(), "mem://b/k", &config()).unwrap_err();

        match err {
            WarehouseError::MalformedInput { uri, errors } => {
                assert_eq!(uri, "mem://b/k");
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].line, 2);
                assert_eq!(errors[0].column.as_deref(), Some("Quantity"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_wrong_field_count() {
        let csv = format!("{HEADER}536365,71053,LANTERN,6\n");
        let err = decode_csv(csv.as_bytes(), "mem://b/k", &config()).unwrap_err();
        assert!(err.to_string().contains("expected 8 fields, found 4"));
    }

    #[test]
    fn test_bad_records_tolerated() {
        let csv = format!(
            "{HEADER}1,A,x,1,d,1.0,,UK\n2,B,y,two,d,1.0,,UK\n3,C,z,3,d,,,UK\n4,D,w,4,d,2.5,12.0,UK\n"
        );
        let config = config().with_max_bad_records(2);
        let decoded = decode_csv(csv.as_bytes(), "mem://b/k", &config).unwrap();
        assert_eq!(decoded.rows.len(), 2);
        assert_eq!(decoded.bad_records, 2);

        let strict = self::config().with_max_bad_records(1);
        assert!(decode_csv(csv.as_bytes(), "mem://b/k", &strict).is_err());
    }

    #[test]
    fn test_header_only_file() {
        let decoded = decode_csv(HEADER.as_bytes(), "mem://b/k", &config()).unwrap();
        assert!(decoded.rows.is_empty());
    }

    #[test]
    fn test_decode_cell() {
        assert_eq!(
            decode_cell(" 12 ", SemanticType::Integer),
            Ok(CellValue::Integer(12))
        );
        assert_eq!(
            decode_cell("-3", SemanticType::Integer),
            Ok(CellValue::Integer(-3))
        );
        assert!(decode_cell("", SemanticType::Integer).is_err());
        assert!(decode_cell("", SemanticType::Float).is_err());
        assert_eq!(
            decode_cell("  ", SemanticType::NullableFloat),
            Ok(CellValue::Null)
        );
        assert_eq!(
            decode_cell(" padded ", SemanticType::String),
            Ok(CellValue::Text(" padded ".to_string()))
        );
    }
}
