/// Crawl phase definitions for the page-by-page driver
///
/// The driver moves through these phases once per listing page, and records
/// every step through `can_transition_to` so that an out-of-order step is
/// caught instead of silently corrupting a checkpoint.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlPhase {
    /// Nothing requested yet
    Idle,

    /// Fetching one listing page
    ListingPage,

    /// Dropping item identifiers that are already processed
    FilteringNew,

    /// The fetch scheduler is working through the page's new items
    Dispatching,

    /// Marking settled items as processed and flushing the store
    Committing,

    /// Advancing the page offset and pausing before the next listing
    NextPage,

    /// The listing is exhausted; finishing up
    Draining,

    /// Terminal
    Stopped,
}

impl CrawlPhase {
    /// Returns true if the driver may move from `self` to `next`
    ///
    /// Every non-terminal phase may move to `Stopped` (cancellation).
    pub fn can_transition_to(&self, next: CrawlPhase) -> bool {
        use CrawlPhase::*;

        if *self == Stopped {
            return false;
        }
        if next == Stopped {
            return true;
        }

        matches!(
            (self, next),
            (Idle, ListingPage)
                | (ListingPage, FilteringNew)
                | (ListingPage, NextPage)
                | (ListingPage, Draining)
                | (FilteringNew, Dispatching)
                | (FilteringNew, NextPage)
                | (Dispatching, Committing)
                | (Committing, NextPage)
                | (Committing, Draining)
                | (NextPage, ListingPage)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ListingPage => "listing_page",
            Self::FilteringNew => "filtering_new",
            Self::Dispatching => "dispatching",
            Self::Committing => "committing",
            Self::NextPage => "next_page",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
