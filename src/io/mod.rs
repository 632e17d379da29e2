//! I/O module
//!
//! Handles CSV parsing and output.
//!
//! # Components
//!
//! - `csv_format` - CSV format handling (record conversion, output serialization)
//! - `request_reader` - Streaming CSV reader with iterator interface

pub mod csv_format;
pub mod request_reader;

pub use csv_format::{convert_csv_record, write_balances_csv, CsvRecord, LedgerRequest, RequestRef};
pub use request_reader::RequestReader;
