use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::debug;

/// Fixed artifact served at `/LICENSE.txt`.
pub const LICENSE_TXT: &str = include_str!("../assets/LICENSE.txt");

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Country {
    pub name: String,
    pub capital: String,
    pub region: String,
    #[serde(rename = "altSpellings")]
    pub alt_spellings: Vec<String>,
}

#[derive(Deserialize)]
pub struct NameQuery {
    #[serde(rename = "fullText", default)]
    pub full_text: bool,
}

#[derive(Serialize)]
struct ErrorBody {
    status: u16,
    message: &'static str,
}

pub type Db = Arc<Vec<Country>>;

fn country(name: &str, capital: &str, region: &str, alt: &[&str]) -> Country {
    Country {
        name: name.to_string(),
        capital: capital.to_string(),
        region: region.to_string(),
        alt_spellings: alt.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn countries() -> Vec<Country> {
    vec![
        country("Nepal", "Kathmandu", "Asia", &["NP", "Federal Democratic Republic of Nepal"]),
        country(
            "United States of America",
            "Washington D.C.",
            "Americas",
            &["US", "USA", "United States"],
        ),
        country("Peru", "Lima", "Americas", &["PE", "Republic of Peru"]),
        country("Italy", "Rome", "Europe", &["IT", "Italian Republic", "Repubblica italiana"]),
        country("Papua New Guinea", "Port Moresby", "Oceania", &["PG", "PNG"]),
    ]
}

pub fn app() -> Router {
    let db: Db = Arc::new(countries());
    Router::new()
        .route("/rest/v1/name/{name}", get(find_by_name))
        .route("/LICENSE.txt", get(license))
        .route("/malformed", get(malformed))
        .route("/status/{code}", get(status))
        .route("/stall", get(stall))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Exact (case-insensitive) match on the name or an alternative spelling
/// with `fullText=true`, substring match on the name otherwise.
pub fn matches(country: &Country, query: &str, full_text: bool) -> bool {
    let query = query.to_lowercase();
    if full_text {
        country.name.to_lowercase() == query
            || country.alt_spellings.iter().any(|s| s.to_lowercase() == query)
    } else {
        country.name.to_lowercase().contains(&query)
    }
}

async fn find_by_name(
    State(db): State<Db>,
    Path(name): Path<String>,
    Query(query): Query<NameQuery>,
) -> Result<Json<Vec<Country>>, (StatusCode, Json<ErrorBody>)> {
    let found: Vec<Country> = db
        .iter()
        .filter(|c| matches(c, &name, query.full_text))
        .cloned()
        .collect();
    debug!(%name, full_text = query.full_text, hits = found.len(), "country lookup");
    if found.is_empty() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                status: 404,
                message: "Not Found",
            }),
        ));
    }
    Ok(Json(found))
}

async fn license() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_LENGTH, LICENSE_TXT.len().to_string()),
        ],
        LICENSE_TXT,
    )
}

async fn malformed() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], "[{\"name\":\"Nepal\",\"capi")
}

async fn status(Path(code): Path<u16>) -> Result<(StatusCode, String), StatusCode> {
    let status = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok((status, format!("status {code}")))
}

/// Accepts the request and never answers.
async fn stall() -> StatusCode {
    std::future::pending::<()>().await;
    StatusCode::OK
}
