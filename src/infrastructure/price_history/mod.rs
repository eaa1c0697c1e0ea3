//! Closing price providers.

mod csv;
mod mock;

pub use self::csv::CsvPriceHistory;
pub use mock::{MockPriceHistory, random_walk};
