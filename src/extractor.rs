use chrono::Utc;
use log::{debug, warn};
use regex::Regex;
use url::Url;

use crate::config::Country;
use crate::dom::{Document, DomNode};
use crate::error::{Result, ScrapeError};
use crate::record::JobRecord;

// Listing containers, most specific first. The first selector with any match wins.
const LISTING_SELECTORS: &[&str] = &[
    ".job_seen_beacon",
    "div[data-jk]",
    ".jobsearch-SerpJobCard",
    ".result",
    "div[class*=\"job\"]",
    "td[id*=\"job\"]",
    "article[data-jk]",
    "li[data-jk]",
];

const TITLE_SELECTORS: &[&str] = &[
    "h2 a[data-jk]",
    "h2 a",
    "a[data-jk]",
    ".jobTitle a",
    "a[href*=\"/viewjob\"]",
    "h3 a",
    "[data-testid*=\"job-title\"] a",
    "span[title] a",
    "div[class*=\"title\"] a",
];

const COMPANY_SELECTORS: &[&str] = &[
    ".companyName a",
    ".companyName",
    "span.companyName",
    "[data-testid*=\"company\"] a",
    "[data-testid*=\"company\"]",
    ".company a",
    ".company",
    "div[class*=\"company\"]",
];

const LOCATION_SELECTORS: &[&str] = &[
    ".companyLocation",
    "[data-testid*=\"location\"]",
    ".locationsContainer",
    ".location",
    "div[class*=\"location\"]",
];

const SALARY_SELECTORS: &[&str] = &[
    ".salaryText",
    "[data-testid*=\"salary\"]",
    ".salary-snippet",
    ".salary",
    "div[class*=\"salary\"]",
];

const DESCRIPTION_SELECTORS: &[&str] = &[
    "#jobDescriptionText",
    ".jobsearch-jobDescriptionText",
    "[data-testid=\"jobsearch-JobComponent-description\"]",
    ".jobsearch-JobComponent-description",
    ".job-description",
    ".description",
    "div[class*=\"jobDescription\"]",
    "div[class*=\"description\"]",
];

const PROFILE_SELECTORS: &[&str] = &[
    ".jobsearch-CompanyInfoContainer",
    ".jobsearch-CompanyReview",
    "[data-testid=\"jobsearch-CompanyInfoContainer\"]",
    ".company-profile",
    ".company-info",
    ".employer-info",
    "div[class*=\"company\"]",
];

const NEXT_PAGE_SELECTORS: &[&str] = &[
    "a[aria-label=\"Next Page\"]",
    "a[aria-label=\"Next\"]",
    "a[data-testid=\"pagination-page-next\"]",
    "a[class*=\"next\"]",
    "button[aria-label=\"Next\"]",
];

const CHALLENGE_MARKERS: &[&str] = &[
    "checking your browser",
    "additional verification required",
    "cf-chl-widget",
    "verify you are human",
    "ray id:",
];

const SIGN_IN_MARKERS: &[&str] = &[
    "sign in to continue",
    "please sign in",
    "log in to continue",
    "create an account or sign in",
];

const BENEFIT_KEYWORDS: &[&str] = &["benefits", "health", "insurance", "vacation", "pto", "retirement"];
const REQUIREMENT_KEYWORDS: &[&str] = &["requirements", "qualifications", "skills", "experience", "education"];

const MIN_DESCRIPTION_CHARS: usize = 100;
const MIN_PROFILE_CHARS: usize = 20;
const MAX_SECTION_LINES: usize = 5;

/// Turns rendered listing/detail pages into `JobRecord`s.
pub struct Extractor {
    country: Country,
    base_url: Url,
    job_key_regex: Regex,
}

impl Extractor {
    pub fn new(country: Country) -> Result<Self> {
        let base_url = Url::parse(&country.base_url())
            .map_err(|e| ScrapeError::Config(format!("bad base url for {}: {}", country, e)))?;
        let job_key_regex = Regex::new(r"[?&](?:jk|vjk)=([A-Za-z0-9]+)")
            .map_err(|e| ScrapeError::Config(e.to_string()))?;
        Ok(Extractor {
            country,
            base_url,
            job_key_regex,
        })
    }

    /// Lazily yields one record per usable listing node, in DOM order.
    pub fn extract_listings<'d, D: Document>(
        &'d self,
        doc: &'d D,
        page_number: u32,
    ) -> Listings<'d, D::Node<'d>> {
        let nodes = self.listing_nodes(doc);
        Listings {
            extractor: self,
            nodes: nodes.into_iter().enumerate(),
            page_number,
        }
    }

    /// Number of listing containers on the page, whether or not they parse.
    pub fn count_listing_nodes<D: Document>(&self, doc: &D) -> usize {
        self.listing_nodes(doc).len()
    }

    fn listing_nodes<'d, D: Document>(&self, doc: &'d D) -> Vec<D::Node<'d>> {
        for selector in LISTING_SELECTORS {
            let nodes = doc.query(selector);
            if !nodes.is_empty() {
                debug!("Found {} listing nodes using: {}", nodes.len(), selector);
                return nodes;
            }
        }
        Vec::new()
    }

    /// `Ok(None)` for noise (no title and no link).
    fn parse_listing<N: DomNode>(&self, node: &N, page_number: u32, position: u32) -> Result<Option<JobRecord>> {
        let mut title = None;
        let mut href = None;
        let mut job_id = None;

        for selector in TITLE_SELECTORS {
            if let Some(anchor) = node.query_first(selector) {
                let text = anchor
                    .attribute("title")
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| anchor.text());
                if text.chars().count() > 2 {
                    title = Some(text);
                    href = anchor.attribute("href").filter(|h| !h.is_empty());
                    job_id = anchor.attribute("data-jk").filter(|j| !j.is_empty());
                    break;
                }
            }
        }

        if href.is_none() {
            href = node
                .query_first("a[href]")
                .and_then(|a| a.attribute("href"))
                .filter(|h| !h.is_empty());
        }

        if title.is_none() && href.is_none() {
            return Ok(None);
        }

        let job_id = job_id
            .or_else(|| node.attribute("data-jk").filter(|j| !j.is_empty()))
            .or_else(|| href.as_deref().and_then(|h| self.job_key_from_href(h)))
            .ok_or_else(|| {
                ScrapeError::Parse(format!(
                    "listing {} on page {} has no job id ({:?})",
                    position, page_number, title
                ))
            })?;

        let url = match href.as_deref() {
            Some(h) => self.absolute_url(h)?,
            None => self.viewjob_url(&job_id),
        };

        Ok(Some(JobRecord {
            title: title.unwrap_or_default(),
            company: first_text(node, COMPANY_SELECTORS, |t| t.chars().count() > 1).unwrap_or_default(),
            location: first_text(node, LOCATION_SELECTORS, |t| t.chars().count() > 1).unwrap_or_default(),
            salary: first_text(node, SALARY_SELECTORS, |t| t.chars().any(|c| c.is_ascii_digit())),
            url,
            job_id,
            full_description: None,
            profile_insights: None,
            requirements: None,
            benefits: None,
            company_size: None,
            scraped_at: Utc::now(),
            country: self.country,
            page_number,
            position_on_page: position,
        }))
    }

    fn job_key_from_href(&self, href: &str) -> Option<String> {
        self.job_key_regex
            .captures(href)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn absolute_url(&self, href: &str) -> Result<String> {
        self.base_url
            .join(href)
            .map(|u| u.to_string())
            .map_err(|e| ScrapeError::Parse(format!("bad listing href '{}': {}", href, e)))
    }

    fn viewjob_url(&self, job_id: &str) -> String {
        format!("{}/viewjob?jk={}", self.country.base_url(), job_id)
    }

    /// Fills the detail fields from a job's own page. Never overwrites a
    /// field that is already set, so applying it twice changes nothing.
    pub fn enrich_detail<D: Document>(&self, mut record: JobRecord, detail: &D) -> JobRecord {
        if record.full_description.is_none() {
            record.full_description = first_doc_text(detail, DESCRIPTION_SELECTORS, MIN_DESCRIPTION_CHARS);
        }
        if record.profile_insights.is_none() {
            record.profile_insights = first_doc_text(detail, PROFILE_SELECTORS, MIN_PROFILE_CHARS);
        }

        let lines = detail.text_lines();

        if record.company_size.is_none() {
            record.company_size = lines
                .iter()
                .find(|l| {
                    let lower = l.to_lowercase();
                    lower.contains("employee") && l.chars().any(|c| c.is_ascii_digit())
                })
                .map(|l| l.trim().to_string());
        }
        if record.benefits.is_none() {
            record.benefits = keyword_section(&lines, BENEFIT_KEYWORDS, 10);
        }
        if record.requirements.is_none() {
            record.requirements = keyword_section(&lines, REQUIREMENT_KEYWORDS, 20);
        }

        record
    }
}

/// Bot-check interstitials (Cloudflare and similar).
pub fn is_challenge_page<D: Document>(doc: &D) -> bool {
    let text = doc.lowercase_text();
    CHALLENGE_MARKERS.iter().any(|m| text.contains(m))
        || !doc.query("#challenge-form, #cf-challenge-running").is_empty()
}

pub fn is_sign_in_wall<D: Document>(doc: &D) -> bool {
    let text = doc.lowercase_text();
    SIGN_IN_MARKERS.iter().any(|m| text.contains(m))
}

pub fn has_next_page<D: Document>(doc: &D) -> bool {
    NEXT_PAGE_SELECTORS.iter().any(|s| !doc.query(s).is_empty())
}

/// Iterator returned by [`Extractor::extract_listings`].
///
/// Consumes its node list as it goes; it can't be restarted.
pub struct Listings<'d, N> {
    extractor: &'d Extractor,
    nodes: std::iter::Enumerate<std::vec::IntoIter<N>>,
    page_number: u32,
}

impl<'d, N: DomNode> Iterator for Listings<'d, N> {
    type Item = JobRecord;

    fn next(&mut self) -> Option<JobRecord> {
        for (index, node) in self.nodes.by_ref() {
            let position = index as u32 + 1;
            match self.extractor.parse_listing(&node, self.page_number, position) {
                Ok(Some(record)) => return Some(record),
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping listing {} on page {}: {}", position, self.page_number, e);
                    continue;
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.nodes.size_hint().1)
    }
}

fn first_text<N: DomNode>(node: &N, selectors: &[&str], accept: impl Fn(&str) -> bool) -> Option<String> {
    selectors
        .iter()
        .filter_map(|s| node.query_first(s))
        .map(|n| n.text())
        .find(|t| accept(t))
}

fn first_doc_text<D: Document>(doc: &D, selectors: &[&str], min_chars: usize) -> Option<String> {
    for selector in selectors {
        if let Some(node) = doc.query_first(selector) {
            let text = node.text();
            if text.chars().count() > min_chars {
                return Some(text);
            }
        }
    }
    None
}

fn keyword_section(lines: &[String], keywords: &[&str], min_chars: usize) -> Option<String> {
    let picked: Vec<&str> = lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| l.chars().count() > min_chars)
        .filter(|l| {
            let lower = l.to_lowercase();
            keywords.iter().any(|k| lower.contains(k))
        })
        .take(MAX_SECTION_LINES)
        .collect();

    if picked.is_empty() {
        None
    } else {
        Some(picked.join("; "))
    }
}
