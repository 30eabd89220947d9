//! CSV implementation of [`RowReader`]/[`RowWriter`]: one row file, one
//! header row, every other row a data record keyed by that header (read
//! side) or by a fixed column order supplied at construction (write side).

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use crm_sync_core::io::{RowReader, RowWriter};
use crm_sync_core::record::{Record, ERROR_FIELD, NEW_ID_FIELD, ORIGINAL_ID_FIELD};
use tracing::debug;

fn to_io_error(e: ::csv::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Reads CSV rows keyed by the file's own header row. Used for load input
/// files: a prior extraction's output file, read back column-by-column
/// regardless of what order the columns happen to be in.
pub struct CsvRowReader {
    reader: ::csv::Reader<BufReader<File>>,
    headers: Vec<String>,
}

impl CsvRowReader {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(BufReader::new(file));
        let headers = reader
            .headers()
            .map_err(to_io_error)?
            .iter()
            .map(str::to_string)
            .collect();
        debug!(path = %path.display(), "opened csv row reader");
        Ok(Self { reader, headers })
    }
}

impl RowReader for CsvRowReader {
    fn read_row(&mut self) -> io::Result<Option<Record>> {
        let mut raw = ::csv::StringRecord::new();
        if !self.reader.read_record(&mut raw).map_err(to_io_error)? {
            return Ok(None);
        }
        let mut row = Record::new();
        for (column, value) in self.headers.iter().zip(raw.iter()) {
            row.insert(column.clone(), value.to_string());
        }
        Ok(Some(row))
    }
}

/// Writes CSV rows in a fixed column order, writing the header on the first
/// call to `write_row` (a writer that never receives a row produces an empty
/// file rather than a header-only one, matching "the engine does not open
/// files itself" - an unused output file is simply never created by the
/// caller in the first place, but a used one that happens to extract zero
/// records still shouldn't emit a header nobody will read).
pub struct CsvRowWriter {
    writer: ::csv::Writer<BufWriter<File>>,
    columns: Vec<String>,
    header_written: bool,
    closed: bool,
}

impl CsvRowWriter {
    /// `columns` fixes the field order per §6: "the field ordering per file
    /// equals the step's configured field list."
    pub fn create(path: impl AsRef<Path>, columns: Vec<String>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let writer = ::csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        debug!(path = %path.display(), columns = ?columns, "opened csv row writer");
        Ok(Self {
            writer,
            columns,
            header_written: false,
            closed: false,
        })
    }

    /// A result-file writer with the fixed `Original Id`/`New Id`/`Error`
    /// column order (§6).
    pub fn create_result(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::create(
            path,
            vec![
                ORIGINAL_ID_FIELD.to_string(),
                NEW_ID_FIELD.to_string(),
                ERROR_FIELD.to_string(),
            ],
        )
    }
}

impl RowWriter for CsvRowWriter {
    fn write_row(&mut self, row: &Record) -> io::Result<()> {
        if !self.header_written {
            self.writer.write_record(&self.columns).map_err(to_io_error)?;
            self.header_written = true;
        }
        let values: Vec<&str> = self
            .columns
            .iter()
            .map(|c| row.get(c).map(String::as_str).unwrap_or(""))
            .collect();
        self.writer.write_record(&values).map_err(to_io_error)
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.flush()
    }
}
