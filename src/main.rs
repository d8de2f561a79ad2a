use job_scraper_lib::browser::HttpBrowser;
use job_scraper_lib::config::{AppConfig, SearchQuery};
use job_scraper_lib::result_sink::{output_file_name, CsvFileSink, FanOutSink, JsonFileSink, ResultSink};
use job_scraper_lib::scraper::{RunReport, Scraper};
use job_scraper_lib::session_store::{FileSessionStore, NoSessionStore, SessionStore};
use job_scraper_lib::logger;

use std::env;
use std::error::Error;
use std::fs;
use std::time::Duration;
use log::{info, warn, error, LevelFilter};
use chrono::Local;

const DEFAULT_CONFIG: &str = "scraper_config.json";

fn main() -> Result<(), Box<dyn Error>> {
    logger::init(LevelFilter::Info);
    info!("Starting Indeed Job Scraper...");

    let config_path = env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let app = match AppConfig::load(&config_path) {
        Ok(app) => app,
        Err(e) => {
            error!("Could not load {}: {}", config_path, e);
            RunReport::config_invalid(&e).log_summary();
            return Err(e.into());
        }
    };

    // Nothing touches the network or disk until the run is known to be valid.
    let query = match SearchQuery::try_from(&app.search).and_then(|q| app.scraper.validate().map(|_| q)) {
        Ok(q) => q,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            RunReport::config_invalid(&e).log_summary();
            return Err(e.into());
        }
    };

    info!("Country: {} ({})", query.country.name(), query.country.base_url());
    info!("Job title: {} | Location: {} | Date posted: {}", query.job_title, query.location, query.date_posted.as_str());
    if let Some(pages) = query.max_pages {
        info!("Max pages: {}", pages);
    }

    let store: Box<dyn SessionStore> = if app.scraper.save_session {
        Box::new(FileSessionStore::new(&app.scraper.session_dir))
    } else {
        Box::new(NoSessionStore)
    };

    let timeout = Duration::from_secs(app.scraper.request_timeout_secs);
    let browser = HttpBrowser::new(&query.country.base_url(), timeout)?;

    fs::create_dir_all(&app.scraper.output_dir)?;
    let started = Local::now();
    let json_path = app.scraper.output_dir.join(output_file_name("indeed", &query, started, "json"));
    let csv_path = app.scraper.output_dir.join(output_file_name("indeed", &query, started, "csv"));
    info!("Saving results to {:?} and {:?}", json_path, csv_path);

    let mut sink = FanOutSink::new(vec![
        Box::new(JsonFileSink::new(&json_path)) as Box<dyn ResultSink>,
        Box::new(CsvFileSink::new(&csv_path)),
    ]);

    let mut scraper = Scraper::new(query, app.scraper.clone(), store)?;
    let cancel = scraper.cancel_token();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Interrupt received. Finishing the current step...");
        cancel.cancel();
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    let report = scraper.run(browser, &mut sink);
    report.log_summary();

    if report.persisted == 0 {
        warn!("No jobs were saved. Check the log above for the stop reason.");
    }
    info!("Results: {:?} | {:?}", json_path, csv_path);

    if report.stop_reason.is_failure() {
        return Err(format!("run stopped: {}", report.stop_reason).into());
    }
    Ok(())
}
