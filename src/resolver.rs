use crate::ledger::{FailureLedger, LedgerEntry, Stage};
use crate::track::{ResolvedTrack, Track};
use crate::Result;
use url::Url;

/// An external search that maps a free-text query to candidate media locators.
pub trait SearchSurface {
    /// Locator of the first result, or `None` when no result showed up in time.
    fn first_result(&mut self, query: &str) -> Result<Option<String>>;
}

/// Maps tracks to the first search hit. Failures are ledgered and never abort the batch.
pub struct Resolver<'a> {
    surface: &'a mut dyn SearchSurface,
    ledger: &'a FailureLedger,
}

impl<'a> Resolver<'a> {
    pub fn new(surface: &'a mut dyn SearchSurface, ledger: &'a FailureLedger) -> Self {
        Self { surface, ledger }
    }

    pub fn resolve(&mut self, track: &Track) -> ResolvedTrack {
        let query = track.query();
        let detail = match self.surface.first_result(&query) {
            Ok(Some(locator)) => match normalize_locator(&locator) {
                Some(locator) => {
                    log::debug!("resolved {} to {}", track.key(), redact_url_for_log(&locator));
                    return ResolvedTrack {
                        track: track.clone(),
                        locator: Some(locator),
                    };
                }
                None => format!("first result is not a usable URL: {locator}"),
            },
            Ok(None) => format!("no search result for query {query:?}"),
            Err(err) => format!("search for {query:?} failed: {err}"),
        };

        self.ledger
            .record(LedgerEntry::new(track.key(), Stage::Resolve, detail));
        ResolvedTrack::unresolved(track.clone())
    }
}

fn normalize_locator(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).ok()?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Some(trimmed.to_string()),
        _ => None,
    }
}

/// `scheme://host/...`, so logs do not carry full media URLs.
pub fn redact_url_for_log(value: &str) -> String {
    match Url::parse(value) {
        Ok(url) => format!(
            "{}://{}/...",
            url.scheme(),
            url.host_str().unwrap_or("unknown-host")
        ),
        Err(_) => "[invalid-url]".to_string(),
    }
}
