use std::sync::Arc;
use std::time::Duration;
use reqwest::blocking::Client;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::StatusCode;
use rand::Rng;
use log::{debug, info, warn};
use url::Url;

use crate::dom::{HtmlParser, ScraperParser};
use crate::error::{Result, ScrapeError, TransientFault};
use crate::extractor::{is_challenge_page, is_sign_in_wall};
use crate::session_store::{SessionState, StoredCookie};

/// What the controller needs from a browser-automation backend.
pub trait Browser {
    fn navigate(&mut self, url: &str) -> Result<()>;

    /// Markup of the page currently loaded.
    fn current_dom(&mut self) -> Result<String>;

    fn execute_script(&mut self, script: &str) -> Result<serde_json::Value>;

    fn cookies(&self) -> SessionState;

    fn restore_cookies(&mut self, state: &SessionState) -> Result<()>;

    /// Establish a session on the site. Fails with `ScrapeError::Auth` when
    /// the site insists on a login this backend can't complete.
    fn sign_in(&mut self, base_url: &str) -> Result<()>;

    fn close(&mut self) {}
}

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
];

/// Plain-HTTP backend: fetches server-rendered HTML with a cookie jar.
/// No JavaScript, so `execute_script` is unsupported.
pub struct HttpBrowser {
    client: Client,
    jar: Arc<Jar>,
    site: Url,
    current_url: Option<String>,
    current_markup: Option<String>,
}

impl HttpBrowser {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let site = Url::parse(base_url)
            .map_err(|e| ScrapeError::Config(format!("invalid base url '{}': {}", base_url, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );

        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .cookie_provider(Arc::clone(&jar))
            .build()?;

        Ok(HttpBrowser {
            client,
            jar,
            site,
            current_url: None,
            current_markup: None,
        })
    }

    fn random_user_agent(&self) -> &'static str {
        let mut rng = rand::thread_rng();
        USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
    }
}

fn classify_status(status: StatusCode, url: &str) -> Option<TransientFault> {
    match status.as_u16() {
        403 | 429 | 503 => Some(TransientFault::ChallengeSuspected(format!("{} ({})", url, status))),
        _ if status.is_server_error() => Some(TransientFault::Unreachable(format!("{} ({})", url, status))),
        _ => None,
    }
}

fn classify_request_error(e: reqwest::Error, url: &str) -> ScrapeError {
    if e.is_timeout() {
        TransientFault::Timeout(url.to_string()).into()
    } else if e.is_connect() || e.is_request() || e.is_body() {
        TransientFault::Unreachable(format!("{}: {}", url, e)).into()
    } else {
        ScrapeError::Http(e)
    }
}

impl Browser for HttpBrowser {
    fn navigate(&mut self, url: &str) -> Result<()> {
        info!("Visiting: {}", url);
        self.current_markup = None;

        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, self.random_user_agent())
            .send()
            .map_err(|e| classify_request_error(e, url))?;

        let status = resp.status();
        if let Some(fault) = classify_status(status, url) {
            warn!("Blocked or failing at {}: {}", url, status);
            return Err(fault.into());
        }
        if !status.is_success() {
            return Err(TransientFault::Unreachable(format!("{} ({})", url, status)).into());
        }

        let final_url = resp.url().to_string();
        let text = resp.text().map_err(|e| classify_request_error(e, url))?;
        debug!("Loaded {} bytes from {}", text.len(), final_url);

        self.current_url = Some(final_url);
        self.current_markup = Some(text);
        Ok(())
    }

    fn current_dom(&mut self) -> Result<String> {
        self.current_markup
            .clone()
            .ok_or_else(|| TransientFault::DomNotReady.into())
    }

    fn execute_script(&mut self, _script: &str) -> Result<serde_json::Value> {
        Err(ScrapeError::Unsupported("HttpBrowser cannot run JavaScript".to_string()))
    }

    fn cookies(&self) -> SessionState {
        let domain = self.site.host_str().unwrap_or_default().to_string();
        let cookies = self
            .jar
            .cookies(&self.site)
            .and_then(|header| header.to_str().ok().map(str::to_string))
            .map(|header| parse_cookie_header(&header, &domain))
            .unwrap_or_default();
        SessionState::new(cookies, self.current_url.clone())
    }

    fn restore_cookies(&mut self, state: &SessionState) -> Result<()> {
        for cookie in &state.cookies {
            let line = format!("{}={}; Domain={}; Path=/", cookie.name, cookie.value, cookie.domain);
            self.jar.add_cookie_str(&line, &self.site);
        }
        info!("Restored {} cookies", state.cookies.len());
        Ok(())
    }

    fn sign_in(&mut self, base_url: &str) -> Result<()> {
        self.navigate(base_url).map_err(|e| ScrapeError::Auth(format!("could not open {}: {}", base_url, e)))?;

        let markup = self.current_dom()?;
        let doc = ScraperParser.parse(&markup);
        if is_challenge_page(&doc) {
            return Err(ScrapeError::Auth("site answered with a bot challenge".to_string()));
        }
        if is_sign_in_wall(&doc) {
            return Err(ScrapeError::Auth("site requires an interactive sign-in".to_string()));
        }

        info!("Anonymous session established ({} cookies)", self.cookies().cookies.len());
        Ok(())
    }

    fn close(&mut self) {
        self.current_markup = None;
        debug!("HTTP browser closed");
    }
}

/// Splits a `Cookie:` header value into name/value pairs.
fn parse_cookie_header(header: &str, domain: &str) -> Vec<StoredCookie> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(StoredCookie {
                name: name.to_string(),
                value: value.trim().to_string(),
                domain: domain.to_string(),
            })
        })
        .collect()
}
