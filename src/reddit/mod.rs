pub mod download;
pub mod error;
pub mod file;
pub mod http;
pub mod parsers;
pub mod scraper;
pub mod submission;
pub mod unit;

#[cfg(test)]
pub mod testing;
