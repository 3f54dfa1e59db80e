//! Page adapters that drive the shared browser session: the collection page as a
//! [`ListView`] and a search results page as a [`SearchSurface`].

use crate::config::ResolverConfig;
use crate::extractor::{collection_header_or_fallback, CollectionHeader, ListView};
use crate::resolver::SearchSurface;
use crate::webdriver::{ElementId, WebDriverSession};
use crate::{EngineError, Result};
use std::thread;
use std::time::Duration;
use url::Url;

const MAIN_VIEW_SELECTOR: &str = ".main-view-container";
const VIEWPORT_SELECTOR: &str = ".os-viewport-native-scrollbars-invisible";

pub struct CollectionPage<'a> {
    session: &'a mut WebDriverSession,
    viewport: ElementId,
    url: String,
}

impl<'a> CollectionPage<'a> {
    /// Loads the collection and waits for its scrollable list. Any failure is a setup failure.
    pub fn open(
        session: &'a mut WebDriverSession,
        url: &str,
        page_wait: Duration,
        initial_settle: Duration,
    ) -> Result<Self> {
        let setup = |what: &str, err: EngineError| {
            EngineError::Setup(format!("{what} for {url}: {err}"))
        };

        session
            .navigate(url)
            .map_err(|e| setup("could not load collection page", e))?;
        session
            .wait_for_element(MAIN_VIEW_SELECTOR, page_wait)
            .map_err(|e| setup("main view lookup failed", e))?
            .ok_or_else(|| {
                EngineError::Setup(format!(
                    "collection page did not render within {}s: {url}",
                    page_wait.as_secs()
                ))
            })?;
        let viewport = session
            .find_element(VIEWPORT_SELECTOR)
            .map_err(|e| setup("list viewport lookup failed", e))?
            .ok_or_else(|| EngineError::Setup(format!("no scrollable list found on {url}")))?;

        if !initial_settle.is_zero() {
            thread::sleep(initial_settle);
        }

        Ok(Self {
            session,
            viewport,
            url: url.to_string(),
        })
    }

    /// Title and advertised size of the collection, with a URL-derived fallback.
    pub fn header(&mut self) -> Result<CollectionHeader> {
        let html = self.session.page_source()?;
        Ok(collection_header_or_fallback(&html, &self.url))
    }
}

impl ListView for CollectionPage<'_> {
    fn rendered_html(&mut self) -> Result<String> {
        self.session.page_source()
    }

    fn scroll_by(&mut self, pixels: i64) -> Result<()> {
        let script = format!("arguments[0].scrollBy(0, {pixels});");
        self.session.execute(&script, &[&self.viewport])?;
        Ok(())
    }
}

/// Runs each query through a results page and takes the first hit's link.
pub struct BrowserSearch<'a> {
    session: &'a mut WebDriverSession,
    search_url: String,
    result_selector: String,
    timeout: Duration,
}

impl<'a> BrowserSearch<'a> {
    pub fn new(session: &'a mut WebDriverSession, config: &ResolverConfig) -> Self {
        Self {
            session,
            search_url: config.search_url.clone(),
            result_selector: config.result_selector.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl SearchSurface for BrowserSearch<'_> {
    fn first_result(&mut self, query: &str) -> Result<Option<String>> {
        let page_url = search_page_url(&self.search_url, query);
        self.session.navigate(&page_url)?;

        let Some(first) = self
            .session
            .wait_for_element(&self.result_selector, self.timeout)?
        else {
            return Ok(None);
        };
        let Some(href) = self.session.element_attribute(&first, "href")? else {
            return Ok(None);
        };
        Ok(absolutize(&page_url, &href))
    }
}

pub fn search_page_url(prefix: &str, query: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
    format!("{prefix}{encoded}")
}

fn absolutize(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}
