use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Country;

/// One observed job posting.
///
/// Field order here is the column order of the CSV output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub title: String,
    pub company: String,
    pub location: String,
    pub salary: Option<String>,
    pub url: String,
    pub job_id: String,
    pub full_description: Option<String>,
    pub profile_insights: Option<String>,
    pub requirements: Option<String>,
    pub benefits: Option<String>,
    pub company_size: Option<String>,
    pub scraped_at: DateTime<Utc>,
    pub country: Country,
    pub page_number: u32,
    pub position_on_page: u32,
}

impl JobRecord {
    pub const FIELD_NAMES: [&'static str; 15] = [
        "title",
        "company",
        "location",
        "salary",
        "url",
        "job_id",
        "full_description",
        "profile_insights",
        "requirements",
        "benefits",
        "company_size",
        "scraped_at",
        "country",
        "page_number",
        "position_on_page",
    ];

    pub fn has_details(&self) -> bool {
        self.full_description.is_some()
            || self.profile_insights.is_some()
            || self.requirements.is_some()
            || self.benefits.is_some()
            || self.company_size.is_some()
    }
}
