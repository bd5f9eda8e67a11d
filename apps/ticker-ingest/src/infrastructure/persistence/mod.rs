//! Persistence Adapters
//!
//! Durable implementations of the `TickSink` port.

mod csv;

pub use csv::{CSV_HEADER, CsvTickSink, format_row};
