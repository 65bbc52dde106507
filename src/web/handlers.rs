//! HTTP request handlers.

use super::AppState;
use crate::status::{Endpoint, EndpointStatus, Uptime};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

// Templates are filled by plain string replacement
const LAYOUT_TEMPLATE: &str = include_str!("templates/layout.html");
const DASHBOARD_TEMPLATE: &str = include_str!("templates/dashboard.html");

// ============================================================================
// Dashboard
// ============================================================================

pub async fn handle_dashboard(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.store.snapshot();

    let cards: String = snapshot
        .entries
        .iter()
        .map(|entry| render_card(entry, snapshot.taken_at))
        .collect();

    let content = DASHBOARD_TEMPLATE
        .replace("{{count}}", &snapshot.entries.len().to_string())
        .replace("{{generated}}", &snapshot.taken_at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .replace("{{cards}}", &cards);

    let page = LAYOUT_TEMPLATE
        .replace("{{title}}", "Pingwatch")
        .replace("{{content}}", &content);

    Html(page)
}

fn render_card(entry: &EndpointStatus, now: DateTime<Utc>) -> String {
    let uptime = entry.uptime();
    let (badge, uptime_text) = match uptime {
        Uptime::Unknown => ("unknown", "unknown".to_string()),
        Uptime::Percent(p) if p >= 99.0 => ("good", format!("{}%", uptime)),
        Uptime::Percent(p) if p >= 90.0 => ("warn", format!("{}%", uptime)),
        Uptime::Percent(_) => ("bad", format!("{}%", uptime)),
    };

    format!(
        r#"<div class="card">
  <div class="card-head"><h2>{name}</h2><span class="badge {badge}">{uptime}</span></div>
  <dl>
    <dt>Address</dt><dd>{address}</dd>
    <dt>Protocol</dt><dd>{protocol}</dd>
    <dt>Checks</dt><dd>{checks}</dd>
    <dt>Last status</dt><dd>{last_status}</dd>
    <dt>Last latency</dt><dd>{last_rtt}</dd>
  </dl>
</div>
"#,
        name = escape_html(&entry.endpoint.name),
        badge = badge,
        uptime = uptime_text,
        address = escape_html(&display_address(&entry.endpoint)),
        protocol = entry.endpoint.protocol,
        checks = entry.checks(),
        last_status = entry.last_status(now),
        last_rtt = entry.last_rtt(),
    )
}

// ============================================================================
// JSON views
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDump {
    pub server_status: Vec<ServerDump>,
}

#[derive(Debug, Serialize)]
pub struct ServerDump {
    pub id: usize,
    pub name: String,
    pub address: String,
    pub observations: Vec<ObservationDump>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationDump {
    pub time: DateTime<Utc>,
    pub online: bool,
    pub rtt_ms: Option<f64>,
}

/// Raw dump of every observation.
pub async fn handle_json(State(state): State<AppState>) -> Response {
    let snapshot = state.store.snapshot();

    let dump = StatusDump {
        server_status: snapshot
            .entries
            .iter()
            .map(|entry| ServerDump {
                id: entry.endpoint.id.0,
                name: entry.endpoint.name.clone(),
                address: display_address(&entry.endpoint),
                observations: entry
                    .observations
                    .iter()
                    .map(|o| ObservationDump {
                        time: o.time,
                        online: o.online,
                        rtt_ms: o.rtt.map(|rtt| rtt.as_nanos() as f64 / 1_000_000.0),
                    })
                    .collect(),
            })
            .collect(),
    };

    match serde_json::to_vec(&dump) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            tracing::error!("Failed to serialize status: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "message": "Unable to format JSON." })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub id: usize,
    pub name: String,
    pub address: String,
    pub checks: usize,
    pub uptime: Option<f64>,
    pub last_status: String,
    pub last_rtt: String,
}

/// Per-endpoint summary, the same figures the dashboard shows.
pub async fn handle_status(State(state): State<AppState>) -> Json<Vec<StatusSummary>> {
    let snapshot = state.store.snapshot();

    let summaries = snapshot
        .entries
        .iter()
        .map(|entry| StatusSummary {
            id: entry.endpoint.id.0,
            name: entry.endpoint.name.clone(),
            address: display_address(&entry.endpoint),
            checks: entry.checks(),
            uptime: entry.uptime().percent(),
            last_status: entry.last_status(snapshot.taken_at).to_string(),
            last_rtt: entry.last_rtt().to_string(),
        })
        .collect();

    Json(summaries)
}

// ============================================================================
// Static assets
// ============================================================================

pub async fn handle_favicon() -> impl IntoResponse {
    let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100">
        <circle cx="50" cy="50" r="45" fill="#2e9e5b"/>
        <path d="M15 55 L35 55 L45 30 L58 75 L68 50 L85 50" stroke="white" stroke-width="6" fill="none"/>
    </svg>"##;

    ([(header::CONTENT_TYPE, "image/svg+xml")], svg)
}

// ============================================================================
// Helpers
// ============================================================================

fn display_address(endpoint: &Endpoint) -> String {
    match endpoint.port {
        Some(port) if endpoint.address.contains(':') => format!("[{}]:{}", endpoint.address, port),
        Some(port) => format!("{}:{}", endpoint.address, port),
        None => endpoint.address.clone(),
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
