use std::collections::HashSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::browser::Browser;
use crate::config::{ScraperConfig, SearchQuery};
use crate::delay_manager::{DelayPolicy, Sleeper, ThreadSleeper};
use crate::dom::{HtmlParser, ScraperParser};
use crate::error::{Result, ScrapeError, TransientFault};
use crate::extractor::{has_next_page, is_challenge_page, Extractor};
use crate::record::JobRecord;
use crate::result_sink::ResultSink;
use crate::search_url::page_url;
use crate::session_store::{SessionKey, SessionStore};

/// Shared stop flag. Checked between states and while sleeping.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Exhausted,
    PageLimit,
    TooManyFailures,
    AuthFailed,
    ConfigInvalid,
    /// First page stayed empty through every retry.
    NoResults,
    Interrupted,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Exhausted => "exhausted",
            StopReason::PageLimit => "page_limit",
            StopReason::TooManyFailures => "too_many_failures",
            StopReason::AuthFailed => "auth_failed",
            StopReason::ConfigInvalid => "config_invalid",
            StopReason::NoResults => "no_results",
            StopReason::Interrupted => "interrupted",
        }
    }

    /// The run ended because something went wrong, not because the search ran out.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StopReason::TooManyFailures | StopReason::AuthFailed | StopReason::ConfigInvalid
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeState {
    Init,
    LoggingIn,
    Searching,
    ExtractingPage,
    Advancing,
    Retrying(TransientFault),
    Stopped(StopReason),
}

/// Per-run bookkeeping. Never persisted; every run starts at page 1.
#[derive(Debug)]
pub struct RunProgress {
    pub page_number: u32,
    pub seen: HashSet<String>,
    pub consecutive_failures: u32,
    pub emitted: usize,
    pub attempts: u32,
    pub pages_completed: u32,
    pub duplicates: usize,
    pub with_description: usize,
    pub with_insights: usize,
    last_page_had_next: bool,
    last_error: Option<String>,
}

impl RunProgress {
    pub fn new() -> Self {
        RunProgress {
            page_number: 1,
            seen: HashSet::new(),
            consecutive_failures: 0,
            emitted: 0,
            attempts: 0,
            pages_completed: 0,
            duplicates: 0,
            with_description: 0,
            with_insights: 0,
            last_page_had_next: false,
            last_error: None,
        }
    }

    /// True the first time a job id is offered.
    pub fn admit(&mut self, record: &JobRecord) -> bool {
        if self.seen.insert(record.job_id.clone()) {
            true
        } else {
            self.duplicates += 1;
            false
        }
    }
}

impl Default for RunProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub stop_reason: StopReason,
    pub persisted: usize,
    pub pages_completed: u32,
    pub attempts: u32,
    pub duplicates_dropped: usize,
    pub with_description: usize,
    pub with_insights: usize,
    pub detail: Option<String>,
}

impl RunReport {
    /// Report for a run rejected before any navigation.
    pub fn config_invalid(err: &ScrapeError) -> Self {
        RunReport {
            run_id: Uuid::new_v4(),
            stop_reason: StopReason::ConfigInvalid,
            persisted: 0,
            pages_completed: 0,
            attempts: 0,
            duplicates_dropped: 0,
            with_description: 0,
            with_insights: 0,
            detail: Some(err.to_string()),
        }
    }

    pub fn log_summary(&self) {
        info!("SCRAPING COMPLETE (run {})", self.run_id);
        info!(
            "Stop reason: {} | Pages: {} | Attempts: {} | Records persisted: {} | Duplicates dropped: {}",
            self.stop_reason, self.pages_completed, self.attempts, self.persisted, self.duplicates_dropped
        );
        if self.persisted > 0 {
            info!(
                "With full descriptions: {} | With profile insights: {} | Detail rate: {:.1}%",
                self.with_description,
                self.with_insights,
                self.with_description as f64 / self.persisted as f64 * 100.0
            );
        }
        if let Some(detail) = &self.detail {
            warn!("Detail: {}", detail);
        }
    }
}

/// Owns the browser for one run and closes it on every way out, unwinding included.
pub struct BrowserGuard<B: Browser> {
    inner: B,
    closed: bool,
}

impl<B: Browser> BrowserGuard<B> {
    pub fn new(inner: B) -> Self {
        BrowserGuard { inner, closed: false }
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.inner.close();
            self.closed = true;
        }
    }
}

impl<B: Browser> Deref for BrowserGuard<B> {
    type Target = B;

    fn deref(&self) -> &B {
        &self.inner
    }
}

impl<B: Browser> DerefMut for BrowserGuard<B> {
    fn deref_mut(&mut self) -> &mut B {
        &mut self.inner
    }
}

impl<B: Browser> Drop for BrowserGuard<B> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pagination controller: drives one search from the first results page to
/// a stop reason, writing records to the sink as it goes.
pub struct Scraper<P: HtmlParser = ScraperParser> {
    query: SearchQuery,
    config: ScraperConfig,
    key: SessionKey,
    store: Box<dyn SessionStore>,
    delays: DelayPolicy,
    sleeper: Box<dyn Sleeper>,
    extractor: Extractor,
    parser: P,
    cancel: CancelToken,
}

impl Scraper<ScraperParser> {
    pub fn new(query: SearchQuery, config: ScraperConfig, store: Box<dyn SessionStore>) -> Result<Self> {
        config.validate()?;
        let extractor = Extractor::new(query.country)?;
        let key = SessionKey::new(query.country, config.profile.clone());
        let delays = DelayPolicy::new(config.delays.clone());

        Ok(Scraper {
            query,
            config,
            key,
            store,
            delays,
            sleeper: Box::new(ThreadSleeper::new()),
            extractor,
            parser: ScraperParser,
            cancel: CancelToken::new(),
        })
    }
}

impl<P: HtmlParser> Scraper<P> {
    pub fn with_parser<Q: HtmlParser>(self, parser: Q) -> Scraper<Q> {
        Scraper {
            query: self.query,
            config: self.config,
            key: self.key,
            store: self.store,
            delays: self.delays,
            sleeper: self.sleeper,
            extractor: self.extractor,
            parser,
            cancel: self.cancel,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_delays(mut self, delays: DelayPolicy) -> Self {
        self.delays = delays;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs the state machine to completion. Takes ownership of the browser
    /// and closes it before returning.
    pub fn run<B: Browser>(&mut self, browser: B, sink: &mut dyn ResultSink) -> RunReport {
        let run_id = Uuid::new_v4();
        info!(
            "Starting run {} for Indeed {}: '{}' in '{}' (date: {})",
            run_id,
            self.query.country.name(),
            self.query.job_title,
            self.query.location,
            self.query.date_posted.as_str()
        );

        let mut browser = BrowserGuard::new(browser);
        let mut progress = RunProgress::new();
        let mut state = ScrapeState::Init;

        loop {
            if self.cancel.is_cancelled() && !matches!(state, ScrapeState::Stopped(_)) {
                warn!("Stop requested. Saving progress and shutting down.");
                state = ScrapeState::Stopped(StopReason::Interrupted);
            }
            debug!("state={:?} page={}", state, progress.page_number);

            state = match state {
                ScrapeState::Init => self.init(&mut *browser),
                ScrapeState::LoggingIn => self.log_in(&mut *browser, &mut progress),
                ScrapeState::Searching => self.search(&mut *browser, &mut progress),
                ScrapeState::ExtractingPage => self.extract_page(&mut *browser, &mut progress, sink),
                ScrapeState::Advancing => self.advance(&mut progress),
                ScrapeState::Retrying(fault) => self.retry(fault, &mut progress),
                ScrapeState::Stopped(reason) => {
                    return self.stop(run_id, reason, &mut browser, progress, sink);
                }
            };
        }
    }

    fn init<B: Browser>(&mut self, browser: &mut B) -> ScrapeState {
        match self.store.load(&self.key) {
            Some(session) if session.is_usable(self.config.session_max_age_hours) => {
                match browser.restore_cookies(&session) {
                    Ok(()) => {
                        info!("Resumed saved session ({} cookies)", session.cookies.len());
                        ScrapeState::Searching
                    }
                    Err(e) => {
                        warn!("Could not restore saved session: {}", e);
                        ScrapeState::LoggingIn
                    }
                }
            }
            Some(_) => {
                info!("Saved session is empty or stale. Signing in again.");
                ScrapeState::LoggingIn
            }
            None => ScrapeState::LoggingIn,
        }
    }

    fn log_in<B: Browser>(&mut self, browser: &mut B, progress: &mut RunProgress) -> ScrapeState {
        let base_url = self.query.country.base_url();
        match browser.sign_in(&base_url) {
            Ok(()) => ScrapeState::Searching,
            Err(e) => {
                error!("Sign-in failed: {}", e);
                progress.last_error = Some(e.to_string());
                ScrapeState::Stopped(StopReason::AuthFailed)
            }
        }
    }

    fn search<B: Browser>(&mut self, browser: &mut B, progress: &mut RunProgress) -> ScrapeState {
        progress.attempts += 1;
        let url = page_url(&self.query, progress.page_number, self.config.results_per_page);
        info!("Processing page {} (attempt {})", progress.page_number, progress.consecutive_failures + 1);

        if let Err(e) = browser.navigate(&url) {
            return self.fault_state(e, progress);
        }

        let wait = self.delays.inter_page_delay();
        self.sleeper.sleep(wait, &self.cancel);
        ScrapeState::ExtractingPage
    }

    fn extract_page<B: Browser>(
        &mut self,
        browser: &mut B,
        progress: &mut RunProgress,
        sink: &mut dyn ResultSink,
    ) -> ScrapeState {
        let page = progress.page_number;
        let markup = match browser.current_dom() {
            Ok(m) => m,
            Err(e) => return self.fault_state(e, progress),
        };

        let (records, has_next) = {
            let doc = self.parser.parse(&markup);
            if is_challenge_page(&doc) {
                warn!("Bot challenge suspected on page {}", page);
                let url = page_url(&self.query, page, self.config.results_per_page);
                return ScrapeState::Retrying(TransientFault::ChallengeSuspected(url));
            }
            let records: Vec<JobRecord> = self.extractor.extract_listings(&doc, page).collect();
            (records, has_next_page(&doc))
        };
        progress.last_page_had_next = has_next;

        if records.is_empty() {
            if page > 1 {
                info!("No listings on page {}. Reached the end of results.", page);
                return ScrapeState::Stopped(StopReason::Exhausted);
            }
            warn!("First results page has no listings");
            return ScrapeState::Retrying(TransientFault::EmptyResults);
        }

        let found = records.len();
        let fresh: Vec<JobRecord> = records.into_iter().filter(|r| progress.admit(r)).collect();
        let new_count = fresh.len();

        for record in fresh {
            let record = if self.config.fetch_details && !self.cancel.is_cancelled() {
                self.fetch_detail(browser, record)
            } else {
                record
            };
            progress.with_description += usize::from(record.full_description.is_some());
            progress.with_insights += usize::from(record.profile_insights.is_some());
            sink.append(record);
            progress.emitted += 1;
        }

        match sink.flush() {
            Ok(total) => info!(
                "Page {}: {} listings, {} new (total persisted: {})",
                page, found, new_count, total
            ),
            Err(e) => error!("Incremental save after page {} failed: {}", page, e),
        }

        ScrapeState::Advancing
    }

    /// Best effort: any failure keeps the listing-level record as is.
    fn fetch_detail<B: Browser>(&mut self, browser: &mut B, record: JobRecord) -> JobRecord {
        let wait = self.delays.detail_delay();
        self.sleeper.sleep(wait, &self.cancel);

        if let Err(e) = browser.navigate(&record.url) {
            warn!("Detail page for {} failed: {}", record.job_id, e);
            return record;
        }
        let markup = match browser.current_dom() {
            Ok(m) => m,
            Err(e) => {
                warn!("Detail page for {} not readable: {}", record.job_id, e);
                return record;
            }
        };

        let doc = self.parser.parse(&markup);
        if is_challenge_page(&doc) {
            warn!("Bot challenge on detail page for {}", record.job_id);
            return record;
        }
        let enriched = self.extractor.enrich_detail(record, &doc);
        debug!("Enriched {} (description: {})", enriched.job_id, enriched.full_description.is_some());
        enriched
    }

    fn advance(&mut self, progress: &mut RunProgress) -> ScrapeState {
        progress.consecutive_failures = 0;
        progress.pages_completed += 1;

        let limit = self.query.max_pages.unwrap_or(self.config.page_safety_cap);
        if progress.page_number >= limit {
            info!("Reached maximum pages limit ({})", limit);
            return ScrapeState::Stopped(StopReason::PageLimit);
        }
        if self.config.stop_when_no_next_page && !progress.last_page_had_next {
            info!("No next-page link on page {}. Stopping.", progress.page_number);
            return ScrapeState::Stopped(StopReason::Exhausted);
        }

        progress.page_number += 1;
        ScrapeState::Searching
    }

    fn retry(&mut self, fault: TransientFault, progress: &mut RunProgress) -> ScrapeState {
        progress.consecutive_failures += 1;
        warn!(
            "Page {} failed ({}/{} retries): {}",
            progress.page_number, progress.consecutive_failures, self.config.max_retries, fault
        );

        if progress.consecutive_failures > self.config.max_retries {
            let reason = if fault == TransientFault::EmptyResults {
                StopReason::NoResults
            } else {
                StopReason::TooManyFailures
            };
            progress.last_error = Some(fault.to_string());
            return ScrapeState::Stopped(reason);
        }

        let wait = self.delays.retry_backoff(progress.consecutive_failures);
        self.sleeper.sleep(wait, &self.cancel);
        ScrapeState::Searching
    }

    fn fault_state(&self, err: ScrapeError, progress: &mut RunProgress) -> ScrapeState {
        match err {
            ScrapeError::Transient(fault) => ScrapeState::Retrying(fault),
            ScrapeError::Auth(msg) => {
                error!("Lost authentication: {}", msg);
                progress.last_error = Some(msg);
                ScrapeState::Stopped(StopReason::AuthFailed)
            }
            other => {
                warn!("Treating browser error as transient: {}", other);
                ScrapeState::Retrying(TransientFault::Unreachable(other.to_string()))
            }
        }
    }

    fn stop<B: Browser>(
        &mut self,
        run_id: Uuid,
        reason: StopReason,
        browser: &mut BrowserGuard<B>,
        progress: RunProgress,
        sink: &mut dyn ResultSink,
    ) -> RunReport {
        info!("Stopping: {}", reason);

        // After a failed sign-in the jar holds nothing worth keeping; leave the old session alone.
        if self.config.save_session && reason != StopReason::AuthFailed {
            let session = browser.cookies();
            if session.cookies.is_empty() {
                debug!("No cookies to save");
            } else if let Err(e) = self.store.save(&self.key, &session) {
                error!("Failed to save session: {}", e);
            }
        }

        let persisted = match sink.finish() {
            Ok(count) => count,
            Err(e) => {
                error!("Final save failed: {}", e);
                sink.persisted()
            }
        };

        browser.close();

        RunReport {
            run_id,
            stop_reason: reason,
            persisted,
            pages_completed: progress.pages_completed,
            attempts: progress.attempts,
            duplicates_dropped: progress.duplicates,
            with_description: progress.with_description,
            with_insights: progress.with_insights,
            detail: progress.last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::rc::Rc;
    use crate::config::Country;
    use crate::delay_manager::RecordingSleeper;
    use crate::result_sink::MemorySink;
    use crate::session_store::{MemorySessionStore, NoSessionStore, SessionState, StoredCookie};

    #[derive(Default)]
    struct Calls {
        visited: Vec<String>,
        sign_ins: usize,
        restored: usize,
        closed: bool,
    }

    #[derive(Default)]
    struct FakeBrowser {
        pages: HashMap<String, String>,
        broken_urls: Vec<String>,
        failures_left: u32,
        reject_sign_in: bool,
        current: Option<String>,
        calls: Rc<RefCell<Calls>>,
    }

    impl FakeBrowser {
        fn with_pages(pages: Vec<(String, String)>) -> Self {
            FakeBrowser {
                pages: pages.into_iter().collect(),
                ..Default::default()
            }
        }
    }

    impl Browser for FakeBrowser {
        fn navigate(&mut self, url: &str) -> Result<()> {
            self.calls.borrow_mut().visited.push(url.to_string());
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(TransientFault::Timeout(url.to_string()).into());
            }
            if self.broken_urls.iter().any(|u| u == url) {
                return Err(TransientFault::Unreachable(url.to_string()).into());
            }
            let markup = self
                .pages
                .get(url)
                .cloned()
                .unwrap_or_else(|| "<html><body><p>nothing here</p></body></html>".to_string());
            self.current = Some(markup);
            Ok(())
        }

        fn current_dom(&mut self) -> Result<String> {
            self.current.clone().ok_or_else(|| TransientFault::DomNotReady.into())
        }

        fn execute_script(&mut self, _script: &str) -> Result<serde_json::Value> {
            Err(ScrapeError::Unsupported("fake".to_string()))
        }

        fn cookies(&self) -> SessionState {
            SessionState::new(
                vec![StoredCookie {
                    name: "CTK".to_string(),
                    value: "fresh".to_string(),
                    domain: "in.indeed.com".to_string(),
                }],
                None,
            )
        }

        fn restore_cookies(&mut self, _state: &SessionState) -> Result<()> {
            self.calls.borrow_mut().restored += 1;
            Ok(())
        }

        fn sign_in(&mut self, _base_url: &str) -> Result<()> {
            self.calls.borrow_mut().sign_ins += 1;
            if self.reject_sign_in {
                return Err(ScrapeError::Auth("login wall".to_string()));
            }
            Ok(())
        }

        fn close(&mut self) {
            self.calls.borrow_mut().closed = true;
        }
    }

    fn card(id: &str) -> String {
        format!(
            r#"<div class="job_seen_beacon">
                 <h2 class="jobTitle"><a data-jk="{id}" href="/rc/clk?jk={id}">Engineer {id}</a></h2>
                 <span class="companyName">Acme</span>
                 <div class="companyLocation">Bengaluru</div>
               </div>"#
        )
    }

    fn listing_page(ids: &[&str], next: bool) -> String {
        let cards: Vec<String> = ids.iter().map(|id| card(id)).collect();
        let nav = if next { r##"<a aria-label="Next Page" href="#">Next</a>"## } else { "" };
        format!("<html><body>{}{}</body></html>", cards.join("\n"), nav)
    }

    fn query(max_pages: u32) -> SearchQuery {
        SearchQuery::new(Country::IN, "data engineer", "bangalore")
            .unwrap()
            .max_pages(max_pages)
            .unwrap()
    }

    fn scraper(query: SearchQuery, config: ScraperConfig, store: Box<dyn SessionStore>) -> (Scraper, RecordingSleeper) {
        let sleeper = RecordingSleeper::new();
        let scraper = Scraper::new(query, config, store)
            .unwrap()
            .with_delays(DelayPolicy::zero())
            .with_sleeper(Box::new(sleeper.clone()));
        (scraper, sleeper)
    }

    #[test]
    fn gives_up_after_max_retries() {
        let q = query(3);
        let browser = FakeBrowser {
            failures_left: u32::MAX,
            ..Default::default()
        };
        let calls = Rc::clone(&browser.calls);
        let (mut scraper, sleeper) = scraper(q, ScraperConfig::default(), Box::new(NoSessionStore));
        let mut sink = MemorySink::new();

        let report = scraper.run(browser, &mut sink);

        assert_eq!(report.stop_reason, StopReason::TooManyFailures);
        assert_eq!(report.attempts, 4);
        assert_eq!(report.persisted, 0);
        assert_eq!(sleeper.waits().len(), 3);
        assert!(calls.borrow().closed);
        assert!(report.detail.is_some());
    }

    #[test]
    fn recovers_from_a_transient_fault() {
        let q = query(1);
        let mut browser = FakeBrowser::with_pages(vec![(page_url(&q, 1, 10), listing_page(&["a1", "a2"], true))]);
        browser.failures_left = 2;
        let (mut scraper, _) = scraper(q, ScraperConfig::default(), Box::new(NoSessionStore));
        let mut sink = MemorySink::new();

        let report = scraper.run(browser, &mut sink);

        assert_eq!(report.stop_reason, StopReason::PageLimit);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.persisted, 2);
    }

    #[test]
    fn empty_first_page_is_retried_then_no_results() {
        let q = query(5);
        let browser = FakeBrowser::default();
        let config = ScraperConfig {
            max_retries: 2,
            ..Default::default()
        };
        let (mut scraper, _) = scraper(q, config, Box::new(NoSessionStore));
        let mut sink = MemorySink::new();

        let report = scraper.run(browser, &mut sink);

        assert_eq!(report.stop_reason, StopReason::NoResults);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.pages_completed, 0);
    }

    #[test]
    fn empty_later_page_means_exhausted() {
        let q = query(10);
        let browser = FakeBrowser::with_pages(vec![(page_url(&q, 1, 10), listing_page(&["a1", "a2", "a3"], true))]);
        let calls = Rc::clone(&browser.calls);
        let (mut scraper, _) = scraper(q, ScraperConfig::default(), Box::new(NoSessionStore));
        let mut sink = MemorySink::new();

        let report = scraper.run(browser, &mut sink);

        assert_eq!(report.stop_reason, StopReason::Exhausted);
        assert_eq!(report.persisted, 3);
        assert_eq!(report.pages_completed, 1);
        assert_eq!(calls.borrow().visited.len(), 2);
    }

    #[test]
    fn repeated_listings_are_dropped() {
        let q = query(2);
        let browser = FakeBrowser::with_pages(vec![
            (page_url(&q, 1, 10), listing_page(&["a1", "a2"], true)),
            (page_url(&q, 2, 10), listing_page(&["a2", "a3"], true)),
        ]);
        let (mut scraper, _) = scraper(q, ScraperConfig::default(), Box::new(NoSessionStore));
        let mut sink = MemorySink::new();

        let report = scraper.run(browser, &mut sink);

        assert_eq!(report.stop_reason, StopReason::PageLimit);
        assert_eq!(report.persisted, 3);
        assert_eq!(report.duplicates_dropped, 1);
        let ids: Vec<&str> = sink.records().iter().map(|r| r.job_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "a3"]);
        assert_eq!(sink.records()[2].page_number, 2);
        assert_eq!(sink.records()[2].position_on_page, 2);
        assert!(sink.flush_count() >= 2);
    }

    #[test]
    fn failed_sign_in_keeps_old_session_untouched() {
        let q = query(1);
        let browser = FakeBrowser {
            reject_sign_in: true,
            ..Default::default()
        };
        let calls = Rc::clone(&browser.calls);
        let store = MemorySessionStore::new();
        let (mut scraper, _) = scraper(q, ScraperConfig::default(), Box::new(store.clone()));
        let mut sink = MemorySink::new();

        let report = scraper.run(browser, &mut sink);

        assert_eq!(report.stop_reason, StopReason::AuthFailed);
        assert_eq!(report.attempts, 0);
        assert!(calls.borrow().visited.is_empty());
        assert!(calls.borrow().closed);
        assert!(store.get(&SessionKey::new(Country::IN, None)).is_none());
    }

    #[test]
    fn saved_session_skips_sign_in_and_is_refreshed() {
        let q = query(1);
        let key = SessionKey::new(Country::IN, None);
        let store = MemorySessionStore::new();
        let old = SessionState::new(
            vec![StoredCookie {
                name: "CTK".to_string(),
                value: "old".to_string(),
                domain: "in.indeed.com".to_string(),
            }],
            None,
        );
        store.save(&key, &old).unwrap();

        let browser = FakeBrowser::with_pages(vec![(page_url(&q, 1, 10), listing_page(&["a1"], false))]);
        let calls = Rc::clone(&browser.calls);
        let (mut scraper, _) = scraper(q, ScraperConfig::default(), Box::new(store.clone()));
        let mut sink = MemorySink::new();

        let report = scraper.run(browser, &mut sink);

        assert_eq!(report.stop_reason, StopReason::PageLimit);
        assert_eq!(calls.borrow().sign_ins, 0);
        assert_eq!(calls.borrow().restored, 1);
        assert_eq!(store.get(&key).unwrap().cookies[0].value, "fresh");
    }

    #[test]
    fn cancelled_run_stops_before_navigating() {
        let q = query(3);
        let browser = FakeBrowser::with_pages(vec![(page_url(&q, 1, 10), listing_page(&["a1"], true))]);
        let calls = Rc::clone(&browser.calls);
        let token = CancelToken::new();
        let (scraper, _) = scraper(q, ScraperConfig::default(), Box::new(NoSessionStore));
        let mut scraper = scraper.with_cancel_token(token.clone());
        token.cancel();
        let mut sink = MemorySink::new();

        let report = scraper.run(browser, &mut sink);

        assert_eq!(report.stop_reason, StopReason::Interrupted);
        assert!(calls.borrow().visited.is_empty());
        assert!(calls.borrow().closed);
    }

    #[test]
    fn missing_next_link_can_end_the_run() {
        let q = query(5);
        let browser = FakeBrowser::with_pages(vec![
            (page_url(&q, 1, 10), listing_page(&["a1"], false)),
            (page_url(&q, 2, 10), listing_page(&["a2"], false)),
        ]);
        let calls = Rc::clone(&browser.calls);
        let config = ScraperConfig {
            stop_when_no_next_page: true,
            ..Default::default()
        };
        let (mut scraper, _) = scraper(q, config, Box::new(NoSessionStore));
        let mut sink = MemorySink::new();

        let report = scraper.run(browser, &mut sink);

        assert_eq!(report.stop_reason, StopReason::Exhausted);
        assert_eq!(report.persisted, 1);
        assert_eq!(calls.borrow().visited.len(), 1);
    }

    fn detail_page(description: &str) -> String {
        format!(r#"<html><body><div id="jobDescriptionText">{description}</div></body></html>"#)
    }

    fn detail_url(id: &str) -> String {
        format!("https://in.indeed.com/rc/clk?jk={}", id)
    }

    fn long_description() -> String {
        "We are hiring a data engineer to build batch and streaming pipelines. ".repeat(3)
    }

    #[test]
    fn detail_pages_enrich_new_records() {
        let q = query(1);
        let browser = FakeBrowser::with_pages(vec![
            (page_url(&q, 1, 10), listing_page(&["a1", "a2"], true)),
            (detail_url("a1"), detail_page(&long_description())),
            (detail_url("a2"), detail_page(&long_description())),
        ]);
        let calls = Rc::clone(&browser.calls);
        let config = ScraperConfig {
            fetch_details: true,
            ..Default::default()
        };
        let (mut scraper, sleeper) = scraper(q, config, Box::new(NoSessionStore));
        let mut sink = MemorySink::new();

        let report = scraper.run(browser, &mut sink);

        assert_eq!(report.stop_reason, StopReason::PageLimit);
        assert_eq!(report.persisted, 2);
        assert_eq!(report.with_description, 2);
        assert!(sink.records().iter().all(|r| r.full_description.is_some()));
        assert_eq!(calls.borrow().visited.len(), 3);
        // One page wait plus one wait before each detail fetch.
        assert_eq!(sleeper.waits().len(), 3);
    }

    #[test]
    fn broken_detail_page_keeps_listing_record() {
        let q = query(1);
        let mut browser = FakeBrowser::with_pages(vec![
            (page_url(&q, 1, 10), listing_page(&["a1", "a2"], true)),
            (detail_url("a2"), detail_page(&long_description())),
        ]);
        browser.broken_urls.push(detail_url("a1"));
        let config = ScraperConfig {
            fetch_details: true,
            max_retries: 0,
            ..Default::default()
        };
        let (mut scraper, _) = scraper(q, config, Box::new(NoSessionStore));
        let mut sink = MemorySink::new();

        let report = scraper.run(browser, &mut sink);

        assert_eq!(report.stop_reason, StopReason::PageLimit);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.persisted, 2);
        assert_eq!(report.with_description, 1);
        assert_eq!(sink.records()[0].job_id, "a1");
        assert!(sink.records()[0].full_description.is_none());
        assert!(sink.records()[1].full_description.is_some());
    }

    #[test]
    fn same_page_twice_admits_nothing_new() {
        let extractor = Extractor::new(Country::IN).unwrap();
        let doc = ScraperParser.parse(&listing_page(&["a1", "a2", "a3"], true));
        let mut progress = RunProgress::new();

        let first = extractor.extract_listings(&doc, 1).filter(|r| progress.admit(r)).count();
        let second = extractor.extract_listings(&doc, 1).filter(|r| progress.admit(r)).count();

        assert_eq!(first, 3);
        assert_eq!(second, 0);
        assert_eq!(progress.duplicates, 3);
    }

    struct CountingParser(Rc<Cell<usize>>);

    impl HtmlParser for CountingParser {
        type Doc = <ScraperParser as HtmlParser>::Doc;

        fn parse(&self, markup: &str) -> Self::Doc {
            self.0.set(self.0.get() + 1);
            ScraperParser.parse(markup)
        }
    }

    #[test]
    fn custom_parser_sees_every_page() {
        let q = query(2);
        let browser = FakeBrowser::with_pages(vec![
            (page_url(&q, 1, 10), listing_page(&["a1"], true)),
            (page_url(&q, 2, 10), listing_page(&["a2"], true)),
        ]);
        let parses = Rc::new(Cell::new(0));
        let (scraper, _) = scraper(q, ScraperConfig::default(), Box::new(NoSessionStore));
        let mut scraper = scraper.with_parser(CountingParser(Rc::clone(&parses)));
        let mut sink = MemorySink::new();

        let report = scraper.run(browser, &mut sink);

        assert_eq!(report.persisted, 2);
        assert_eq!(parses.get(), 2);
    }

    #[test]
    fn stop_reasons_render_snake_case() {
        assert_eq!(StopReason::TooManyFailures.to_string(), "too_many_failures");
        assert_eq!(StopReason::NoResults.as_str(), "no_results");
        assert!(StopReason::AuthFailed.is_failure());
        assert!(!StopReason::PageLimit.is_failure());
        assert!(!StopReason::Interrupted.is_failure());
        let report = RunReport::config_invalid(&ScrapeError::Config("bad country".to_string()));
        assert_eq!(report.stop_reason, StopReason::ConfigInvalid);
        assert_eq!(report.attempts, 0);
    }
}
