use crate::config::SearchQuery;

/// First results page for `query`.
///
/// `{base}/jobs?q=..&l=..&from=searchOnDesktopSerp[&fromage=N][&salary=N+][&jt=..]`
pub fn build_search_url(query: &SearchQuery) -> String {
    let mut params: Vec<(&str, String)> = vec![
        ("q", query.job_title.clone()),
        ("l", query.location.clone()),
        ("from", "searchOnDesktopSerp".to_string()),
    ];

    if let Some(days) = query.date_posted.fromage() {
        params.push(("fromage", days.to_string()));
    }
    if let Some(salary) = query.salary_min.filter(|s| *s > 0) {
        params.push(("salary", format!("{}+", salary)));
    }
    if let Some(job_type) = query.job_type {
        params.push(("jt", job_type.as_str().to_string()));
    }

    let query_string = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, encode_plus(v)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}/jobs?{}", query.country.base_url(), query_string)
}

/// URL of results page `page` (1-based). The site pages by result offset.
pub fn page_url(query: &SearchQuery, page: u32, results_per_page: u32) -> String {
    let base = build_search_url(query);
    if page <= 1 {
        return base;
    }
    let start = u64::from(page - 1) * u64::from(results_per_page);
    format!("{}&start={}", base, start)
}

// Form-style encoding: spaces become '+'.
fn encode_plus(value: &str) -> String {
    urlencoding::encode(value).replace("%20", "+")
}
