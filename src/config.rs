use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrapeError};

/// Supported Indeed country sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Country {
    AU,
    IN,
    US,
    UK,
    CA,
    SG,
    DE,
    FR,
}

impl Country {
    pub const ALL: [Country; 8] = [
        Country::AU, Country::IN, Country::US, Country::UK,
        Country::CA, Country::SG, Country::DE, Country::FR,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Country::AU => "AU",
            Country::IN => "IN",
            Country::US => "US",
            Country::UK => "UK",
            Country::CA => "CA",
            Country::SG => "SG",
            Country::DE => "DE",
            Country::FR => "FR",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Country::AU => "Australia",
            Country::IN => "India",
            Country::US => "United States",
            Country::UK => "United Kingdom",
            Country::CA => "Canada",
            Country::SG => "Singapore",
            Country::DE => "Germany",
            Country::FR => "France",
        }
    }

    pub fn domain(&self) -> &'static str {
        match self {
            Country::AU => "au.indeed.com",
            Country::IN => "in.indeed.com",
            Country::US => "www.indeed.com",
            Country::UK => "uk.indeed.com",
            Country::CA => "ca.indeed.com",
            Country::SG => "sg.indeed.com",
            Country::DE => "de.indeed.com",
            Country::FR => "fr.indeed.com",
        }
    }

    pub fn base_url(&self) -> String {
        format!("https://{}", self.domain())
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Country {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_uppercase();
        Country::ALL
            .iter()
            .copied()
            .find(|c| c.code() == wanted)
            .ok_or_else(|| {
                let supported: Vec<&str> = Country::ALL.iter().map(|c| c.code()).collect();
                ScrapeError::Config(format!(
                    "country '{}' not supported, use one of: {}",
                    s,
                    supported.join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePosted {
    Any,
    Last24Hours,
    Last3Days,
    Last7Days,
    Last14Days,
    Last30Days,
}

impl DatePosted {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatePosted::Any => "any",
            DatePosted::Last24Hours => "last_24_hours",
            DatePosted::Last3Days => "last_3_days",
            DatePosted::Last7Days => "last_7_days",
            DatePosted::Last14Days => "last_14_days",
            DatePosted::Last30Days => "last_30_days",
        }
    }

    /// Value of the site's `fromage` parameter, `None` for no filter.
    pub fn fromage(&self) -> Option<&'static str> {
        match self {
            DatePosted::Any => None,
            DatePosted::Last24Hours => Some("1"),
            DatePosted::Last3Days => Some("3"),
            DatePosted::Last7Days => Some("7"),
            DatePosted::Last14Days => Some("14"),
            DatePosted::Last30Days => Some("30"),
        }
    }
}

impl FromStr for DatePosted {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "any" => Ok(DatePosted::Any),
            "last_24_hours" => Ok(DatePosted::Last24Hours),
            "last_3_days" => Ok(DatePosted::Last3Days),
            "last_7_days" => Ok(DatePosted::Last7Days),
            "last_14_days" => Ok(DatePosted::Last14Days),
            "last_30_days" => Ok(DatePosted::Last30Days),
            other => Err(ScrapeError::Config(format!("unknown date_posted filter '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Fulltime,
    Parttime,
    Contract,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Fulltime => "fulltime",
            JobType::Parttime => "parttime",
            JobType::Contract => "contract",
        }
    }
}

impl FromStr for JobType {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fulltime" => Ok(JobType::Fulltime),
            "parttime" => Ok(JobType::Parttime),
            "contract" => Ok(JobType::Contract),
            other => Err(ScrapeError::Config(format!("unknown job_type '{}'", other))),
        }
    }
}

/// Search parameters as they come out of a config file, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSearch {
    pub country: String,
    pub job_title: String,
    pub location: String,
    pub date_posted: String,
    pub salary_min: Option<i64>,
    pub job_type: Option<String>,
    pub max_pages: Option<i64>,
}

impl Default for RawSearch {
    fn default() -> Self {
        RawSearch {
            country: "IN".to_string(),
            job_title: "data engineer".to_string(),
            location: "india".to_string(),
            date_posted: "last_14_days".to_string(),
            salary_min: None,
            job_type: None,
            max_pages: None,
        }
    }
}

/// Validated, immutable parameters of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub country: Country,
    pub job_title: String,
    pub location: String,
    pub date_posted: DatePosted,
    pub salary_min: Option<u64>,
    pub job_type: Option<JobType>,
    pub max_pages: Option<u32>,
}

impl SearchQuery {
    pub fn new(country: Country, job_title: &str, location: &str) -> Result<Self> {
        let query = SearchQuery {
            country,
            job_title: job_title.trim().to_string(),
            location: location.trim().to_string(),
            date_posted: DatePosted::Any,
            salary_min: None,
            job_type: None,
            max_pages: None,
        };
        if query.job_title.is_empty() {
            return Err(ScrapeError::Config("job_title must not be empty".to_string()));
        }
        Ok(query)
    }

    pub fn date_posted(mut self, date_posted: DatePosted) -> Self {
        self.date_posted = date_posted;
        self
    }

    pub fn salary_min(mut self, salary_min: u64) -> Self {
        self.salary_min = Some(salary_min);
        self
    }

    pub fn job_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    pub fn max_pages(mut self, max_pages: u32) -> Result<Self> {
        if max_pages == 0 {
            return Err(ScrapeError::Config("max_pages must be at least 1".to_string()));
        }
        self.max_pages = Some(max_pages);
        Ok(self)
    }
}

impl TryFrom<&RawSearch> for SearchQuery {
    type Error = ScrapeError;

    fn try_from(raw: &RawSearch) -> Result<Self> {
        let country: Country = raw.country.parse()?;
        let mut query = SearchQuery::new(country, &raw.job_title, &raw.location)?
            .date_posted(raw.date_posted.parse()?);

        if let Some(salary) = raw.salary_min {
            let salary = u64::try_from(salary)
                .map_err(|_| ScrapeError::Config(format!("salary_min must be nonnegative, got {}", salary)))?;
            query = query.salary_min(salary);
        }

        if let Some(job_type) = raw.job_type.as_deref().filter(|s| !s.trim().is_empty()) {
            query = query.job_type(job_type.parse()?);
        }

        if let Some(pages) = raw.max_pages {
            let pages = u32::try_from(pages)
                .map_err(|_| ScrapeError::Config(format!("max_pages out of range: {}", pages)))?;
            query = query.max_pages(pages)?;
        }

        Ok(query)
    }
}

/// Seconds-based pause ranges. See `delay_manager::DelayPolicy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    pub page_min_secs: f64,
    pub page_max_secs: f64,
    pub detail_min_secs: f64,
    pub detail_max_secs: f64,
    pub backoff_base_secs: f64,
    pub backoff_max_secs: f64,
    /// Fraction in [0, 1) added on top of each backoff step.
    pub backoff_jitter: f64,
    pub seed: Option<u64>,
}

impl Default for DelayConfig {
    fn default() -> Self {
        DelayConfig {
            page_min_secs: 2.0,
            page_max_secs: 5.0,
            detail_min_secs: 1.0,
            detail_max_secs: 3.0,
            backoff_base_secs: 2.0,
            backoff_max_secs: 60.0,
            backoff_jitter: 0.25,
            seed: None,
        }
    }
}

impl DelayConfig {
    pub fn validate(&self) -> Result<()> {
        let ranges = [
            ("page", self.page_min_secs, self.page_max_secs),
            ("detail", self.detail_min_secs, self.detail_max_secs),
            ("backoff", self.backoff_base_secs, self.backoff_max_secs),
        ];
        for (name, min, max) in ranges {
            if !min.is_finite() || !max.is_finite() || min < 0.0 || min > max {
                return Err(ScrapeError::Config(format!(
                    "{} delay range [{}, {}] is invalid",
                    name, min, max
                )));
            }
        }
        if !(0.0..1.0).contains(&self.backoff_jitter) {
            return Err(ScrapeError::Config(format!(
                "backoff_jitter must be in [0, 1), got {}",
                self.backoff_jitter
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub max_retries: u32,
    pub results_per_page: u32,
    /// Upper bound on pages when the query leaves `max_pages` unset.
    pub page_safety_cap: u32,
    pub fetch_details: bool,
    pub stop_when_no_next_page: bool,
    pub save_session: bool,
    pub session_dir: PathBuf,
    pub profile: Option<String>,
    pub session_max_age_hours: i64,
    pub output_dir: PathBuf,
    pub request_timeout_secs: u64,
    pub delays: DelayConfig,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        ScraperConfig {
            max_retries: 3,
            results_per_page: 10,
            page_safety_cap: 100,
            fetch_details: false,
            stop_when_no_next_page: false,
            save_session: true,
            session_dir: PathBuf::from("sessions"),
            profile: None,
            session_max_age_hours: 72,
            output_dir: PathBuf::from("outputs"),
            request_timeout_secs: 30,
            delays: DelayConfig::default(),
        }
    }
}

/// Upper bound for `session_max_age_hours`: ten years.
pub const MAX_SESSION_AGE_HOURS: i64 = 24 * 365 * 10;

impl ScraperConfig {
    pub fn validate(&self) -> Result<()> {
        if self.results_per_page == 0 {
            return Err(ScrapeError::Config("results_per_page must be at least 1".to_string()));
        }
        if self.page_safety_cap == 0 {
            return Err(ScrapeError::Config("page_safety_cap must be at least 1".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ScrapeError::Config("request_timeout_secs must be at least 1".to_string()));
        }
        if !(0..=MAX_SESSION_AGE_HOURS).contains(&self.session_max_age_hours) {
            return Err(ScrapeError::Config(format!(
                "session_max_age_hours must be between 0 and {}, got {}",
                MAX_SESSION_AGE_HOURS, self.session_max_age_hours
            )));
        }
        self.delays.validate()
    }
}

/// Everything the binary reads from its JSON config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub search: RawSearch,
    pub scraper: ScraperConfig,
}

impl AppConfig {
    /// Missing file means defaults; a file that exists but doesn't parse is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("Config file {:?} not found. Using built-in defaults.", path);
            return Ok(AppConfig::default());
        }
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| ScrapeError::Config(format!("{:?}: {}", path, e)))?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }
}
