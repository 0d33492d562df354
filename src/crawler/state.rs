use std::collections::HashSet;

/// How many failed URLs the run summary lists
pub const FAILED_SAMPLE_LIMIT: usize = 10;

/// Order-preserving URL set
#[derive(Debug, Default, Clone)]
struct UrlSet {
    order: Vec<String>,
    members: HashSet<String>,
}

impl UrlSet {
    fn insert(&mut self, url: &str) -> bool {
        if self.members.insert(url.to_string()) {
            self.order.push(url.to_string());
            true
        } else {
            false
        }
    }

    fn remove(&mut self, url: &str) -> bool {
        if self.members.remove(url) {
            self.order.retain(|u| u != url);
            true
        } else {
            false
        }
    }

    fn contains(&self, url: &str) -> bool {
        self.members.contains(url)
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Per-run product outcomes. A URL is in at most one of the two sets.
#[derive(Debug, Default, Clone)]
pub struct CrawlState {
    succeeded: UrlSet,
    failed: UrlSet,
}

impl CrawlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_succeeded(&self, url: &str) -> bool {
        self.succeeded.contains(url)
    }

    pub fn is_failed(&self, url: &str) -> bool {
        self.failed.contains(url)
    }

    /// A later success clears an earlier failure of the same URL
    pub fn mark_succeeded(&mut self, url: &str) {
        self.failed.remove(url);
        self.succeeded.insert(url);
    }

    pub fn mark_failed(&mut self, url: &str) {
        if !self.succeeded.contains(url) {
            self.failed.insert(url);
        }
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn summary(&self, categories_attempted: usize, categories_failed: usize) -> RunSummary {
        RunSummary {
            categories_attempted,
            categories_failed,
            succeeded: self.succeeded_count(),
            failed: self.failed_count(),
            failed_sample: self
                .failed
                .order
                .iter()
                .take(FAILED_SAMPLE_LIMIT)
                .cloned()
                .collect(),
        }
    }
}

/// What a finished run reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub categories_attempted: usize,
    pub categories_failed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// First failed URLs in the order they failed
    pub failed_sample: Vec<String>,
}
