//! The standard scenario list: fetch and download, by bare URL and by full
//! request, through both completion modes.

use crate::driver::Scenario;
use crate::http::{HttpRequest, OperationRequest};
use crate::runner::CompletionMode;

pub const LICENSE_PATH: &str = "/LICENSE.txt";

/// Country lookup URL with exact-name matching.
pub fn country_url(base_url: &str, country: &str) -> String {
    format!(
        "{}/rest/v1/name/{country}?fullText=true",
        base_url.trim_end_matches('/')
    )
}

pub fn license_url(base_url: &str) -> String {
    format!("{}{LICENSE_PATH}", base_url.trim_end_matches('/'))
}

fn full_request(url: String) -> OperationRequest {
    HttpRequest::get(&url).into()
}

/// Four capital lookups and four license downloads.
pub fn standard_suite(base_url: &str) -> Vec<Scenario> {
    use CompletionMode::{Callback, Delegate};

    vec![
        Scenario::fetch_field(
            "data_task_with_url",
            country_url(base_url, "Nepal"),
            Delegate,
            "capital",
            "Kathmandu",
        ),
        Scenario::fetch_field(
            "data_task_with_url_completion_handler",
            country_url(base_url, "USA"),
            Callback,
            "capital",
            "Washington D.C.",
        ),
        Scenario::fetch_field(
            "data_task_with_url_request",
            full_request(country_url(base_url, "Peru")),
            Delegate,
            "capital",
            "Lima",
        ),
        Scenario::fetch_field(
            "data_task_with_url_request_completion_handler",
            full_request(country_url(base_url, "Italy")),
            Callback,
            "capital",
            "Rome",
        ),
        Scenario::download("download_task_with_url", license_url(base_url), Delegate),
        Scenario::download(
            "download_task_with_url_request",
            full_request(license_url(base_url)),
            Delegate,
        ),
        Scenario::download(
            "download_task_with_request_and_handler",
            full_request(license_url(base_url)),
            Callback,
        ),
        Scenario::download("download_task_with_url_and_handler", license_url(base_url), Callback),
    ]
}
