//! Streaming CSV reader with iterator interface
//!
//! Yields one `Result<LedgerRequest, String>` per CSV row. Delegates format
//! concerns to the csv_format module.
//!
//! ```no_run
//! use rust_ledger_engine::io::RequestReader;
//! use std::path::Path;
//!
//! let reader = RequestReader::new(Path::new("requests.csv")).unwrap();
//! for result in reader {
//!     match result {
//!         Ok(request) => println!("Request: {:?}", request),
//!         Err(e) => eprintln!("Error: {}", e),
//!     }
//! }
//! ```
//!
//! # Error Handling
//!
//! - Failing to open the file is returned from `new()`
//! - Bad rows are yielded as `Err` with their line number; iteration goes on
//!
//! Rows are read one at a time; memory use does not grow with the file.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, Trim};

use crate::io::csv_format::{convert_csv_record, CsvRecord, LedgerRequest};

/// Streaming reader of ledger requests
#[derive(Debug)]
pub struct RequestReader<R = File> {
    reader: csv::Reader<R>,
    line_num: usize,
}

impl RequestReader<File> {
    /// Open a CSV file for streaming iteration
    ///
    /// Fields are trimmed and rows may omit trailing columns.
    pub fn new(path: &Path) -> Result<Self, String> {
        let file = File::open(path)
            .map_err(|e| format!("Failed to open file '{}': {}", path.display(), e))?;
        Ok(Self::from_reader(file))
    }
}

impl<R: Read> RequestReader<R> {
    pub fn from_reader(input: R) -> Self {
        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .buffer_capacity(8 * 1024)
            .from_reader(input);

        Self {
            reader,
            line_num: 0,
        }
    }

    /// Read up to `size` rows
    ///
    /// An empty batch means the input is exhausted.
    pub fn read_batch(&mut self, size: usize) -> Vec<Result<LedgerRequest, String>> {
        self.by_ref().take(size).collect()
    }
}

impl<R: Read> Iterator for RequestReader<R> {
    type Item = Result<LedgerRequest, String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut deserializer = self.reader.deserialize::<CsvRecord>();
        let row = deserializer.next()?;

        self.line_num += 1;
        // +1 for the header row
        let line = self.line_num + 1;

        Some(match row {
            Ok(csv_record) => {
                convert_csv_record(csv_record).map_err(|e| format!("Line {}: {}", line, e))
            }
            Err(e) => Err(format!("Line {}: CSV parse error: {}", line, e)),
        })
    }
}
