//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlPhase`: the phases the crawl driver moves through, page by page
//! - `ItemId`: opaque key of a listing entry
//! - `FetchOutcome`: the result a worker reports for one item

mod crawl_phase;
mod outcome;

pub use crawl_phase::CrawlPhase;
pub use outcome::{FetchOutcome, ItemId, ItemReport};
