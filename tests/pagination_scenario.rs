use std::collections::HashMap;
use std::fs;

use chrono::Local;
use job_scraper_lib::browser::Browser;
use job_scraper_lib::config::{AppConfig, RawSearch, ScraperConfig, SearchQuery};
use job_scraper_lib::delay_manager::{DelayPolicy, RecordingSleeper};
use job_scraper_lib::result_sink::{
    output_file_name, read_json_records, CsvFileSink, FanOutSink, JsonFileSink, MemorySink, ResultSink,
};
use job_scraper_lib::scraper::{RunReport, Scraper, StopReason};
use job_scraper_lib::search_url::page_url;
use job_scraper_lib::session_store::{FileSessionStore, MemorySessionStore, SessionKey, SessionState, SessionStore, StoredCookie};
use job_scraper_lib::{Country, Result, ScrapeError, TransientFault};
use tempfile::tempdir;

/// Serves canned result pages keyed by URL.
struct CannedSite {
    pages: HashMap<String, String>,
    current: Option<String>,
    visits: usize,
}

impl CannedSite {
    fn new(pages: Vec<(String, String)>) -> Self {
        CannedSite {
            pages: pages.into_iter().collect(),
            current: None,
            visits: 0,
        }
    }
}

impl Browser for CannedSite {
    fn navigate(&mut self, url: &str) -> Result<()> {
        self.visits += 1;
        self.current = Some(
            self.pages
                .get(url)
                .cloned()
                .unwrap_or_else(|| "<html><body></body></html>".to_string()),
        );
        Ok(())
    }

    fn current_dom(&mut self) -> Result<String> {
        self.current.clone().ok_or_else(|| TransientFault::DomNotReady.into())
    }

    fn execute_script(&mut self, _script: &str) -> Result<serde_json::Value> {
        Err(ScrapeError::Unsupported("no scripting".to_string()))
    }

    fn cookies(&self) -> SessionState {
        SessionState::new(
            vec![StoredCookie {
                name: "CTK".to_string(),
                value: "scenario".to_string(),
                domain: "in.indeed.com".to_string(),
            }],
            None,
        )
    }

    fn restore_cookies(&mut self, _state: &SessionState) -> Result<()> {
        Ok(())
    }

    fn sign_in(&mut self, _base_url: &str) -> Result<()> {
        Ok(())
    }
}

fn results_page(ids: impl Iterator<Item = u32>) -> String {
    let cards: String = ids
        .map(|id| {
            format!(
                r#"<div class="job_seen_beacon">
                     <h2 class="jobTitle"><a data-jk="job{id:04}" href="/rc/clk?jk=job{id:04}">Data Engineer {id}</a></h2>
                     <span class="companyName">Company {id}</span>
                     <div class="companyLocation">Bengaluru, Karnataka</div>
                   </div>"#
            )
        })
        .collect();
    format!(r##"<html><body>{cards}<a aria-label="Next Page" href="#">Next</a></body></html>"##)
}

fn scenario_query() -> SearchQuery {
    let raw = RawSearch {
        country: "IN".to_string(),
        job_title: "data engineer".to_string(),
        location: "bangalore".to_string(),
        date_posted: "last_7_days".to_string(),
        salary_min: None,
        job_type: None,
        max_pages: Some(2),
    };
    SearchQuery::try_from(&raw).unwrap()
}

fn scenario_site(query: &SearchQuery) -> CannedSite {
    CannedSite::new(vec![
        (page_url(query, 1, 10), results_page(1..=15)),
        (page_url(query, 2, 10), results_page((1..=5).chain(16..=20))),
    ])
}

#[test]
fn two_pages_with_overlap_persist_twenty_unique_jobs() {
    let query = scenario_query();
    let site = scenario_site(&query);
    let sleeper = RecordingSleeper::new();
    let store = MemorySessionStore::new();

    let mut scraper = Scraper::new(query, ScraperConfig::default(), Box::new(store.clone()))
        .unwrap()
        .with_delays(DelayPolicy::zero())
        .with_sleeper(Box::new(sleeper.clone()));
    let mut sink = MemorySink::new();

    let report = scraper.run(site, &mut sink);

    assert_eq!(report.stop_reason, StopReason::PageLimit);
    assert_eq!(report.persisted, 20);
    assert_eq!(report.pages_completed, 2);
    assert_eq!(report.duplicates_dropped, 5);

    let mut ids: Vec<String> = sink.records().iter().map(|r| r.job_id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 20);
    assert!(sink.records().iter().all(|r| r.country == Country::IN));
    assert_eq!(sleeper.waits().len(), 2);

    let saved = store.get(&SessionKey::new(Country::IN, None)).unwrap();
    assert_eq!(saved.cookies[0].value, "scenario");
}

#[test]
fn file_outputs_hold_the_same_records() {
    let dir = tempdir().unwrap();
    let query = scenario_query();
    let site = scenario_site(&query);

    let json_path = dir.path().join(output_file_name("indeed", &query, Local::now(), "json"));
    let csv_path = dir.path().join(output_file_name("indeed", &query, Local::now(), "csv"));
    let mut sink = FanOutSink::new(vec![
        Box::new(JsonFileSink::new(&json_path)) as Box<dyn ResultSink>,
        Box::new(CsvFileSink::new(&csv_path)),
    ]);

    let store = FileSessionStore::new(dir.path().join("sessions"));
    let mut scraper = Scraper::new(query, ScraperConfig::default(), Box::new(store))
        .unwrap()
        .with_delays(DelayPolicy::zero())
        .with_sleeper(Box::new(RecordingSleeper::new()));

    let report = scraper.run(site, &mut sink);
    assert_eq!(report.persisted, 20);

    let from_json = read_json_records(&json_path).unwrap();
    assert_eq!(from_json.len(), 20);
    assert_eq!(from_json[0].job_id, "job0001");
    assert_eq!(from_json[15].page_number, 2);

    let csv = fs::read_to_string(&csv_path).unwrap();
    assert_eq!(csv.lines().count(), 21);
    assert!(csv.starts_with("title,company,location"));

    let reloaded = FileSessionStore::new(dir.path().join("sessions"));
    assert!(reloaded.load(&SessionKey::new(Country::IN, None)).is_some());
}

#[test]
fn invalid_search_is_rejected_before_any_navigation() {
    let mut app = AppConfig::default();
    app.search.country = "ZZ".to_string();

    let err = SearchQuery::try_from(&app.search).unwrap_err();
    assert!(matches!(err, ScrapeError::Config(_)));

    let report = RunReport::config_invalid(&err);
    assert_eq!(report.stop_reason, StopReason::ConfigInvalid);
    assert_eq!(report.persisted, 0);
}
