//! Subscription feed endpoint

use axum::{
    Router,
    extract::{Query, State, rejection::QueryRejection},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use subcal_core::{
    CalendarMeta, FeedOptions, FeedWriter, SubscriptionStore, User, empty_feed, normalize_all,
};
use tracing::{debug, error, info, warn};

use crate::routes::AppError;
use crate::state::AppState;

pub const FEED_PATH: &str = "/api/subscriptions/get_ical_feed";
const FEED_FILENAME: &str = "subscriptions.ics";

pub fn router() -> Router<AppState> {
    Router::new().route(FEED_PATH, get(ical_feed).fallback(method_not_allowed))
}

/// Query parameters for the feed
#[derive(Deserialize)]
pub struct FeedParams {
    #[serde(alias = "apiKey")]
    pub api_key: Option<String>,
    pub convert_currency: Option<String>,
}

/// GET /api/subscriptions/get_ical_feed - Active subscriptions as an ICS attachment
async fn ical_feed(
    State(state): State<AppState>,
    params: Result<Query<FeedParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(params) = params.map_err(|e| {
        debug!(error = %e, "Rejected feed query");
        AppError::InvalidParameters
    })?;

    let api_key = params
        .api_key
        .filter(|key| !key.trim().is_empty())
        .ok_or(AppError::MissingParameters)?;
    let options = FeedOptions {
        convert_currency: parse_flag(params.convert_currency.as_deref()),
    };

    let store = state.store.clone();
    let user = tokio::task::spawn_blocking(move || store.find_user_by_api_key(&api_key))
        .await??
        .ok_or(AppError::InvalidApiKey)?;

    // From here on the response is a calendar, whatever happens to the records
    let store = state.store.clone();
    let meta = state.meta.clone();
    let body = match tokio::task::spawn_blocking(move || {
        render_feed(store.as_ref(), &meta, &user, &options)
    })
    .await
    {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "Feed rendering task failed, serving empty feed");
            empty_feed(&state.meta)
        }
    };

    Ok(calendar_response(body))
}

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

/// Fetch, normalize and render one user's feed.
///
/// A failed fetch yields an empty feed rather than an error.
fn render_feed(
    store: &dyn SubscriptionStore,
    meta: &CalendarMeta,
    user: &User,
    options: &FeedOptions,
) -> String {
    let records = match store.active_subscriptions(user.id) {
        Ok(records) => records,
        Err(e) => {
            error!(user_id = user.id, error = %e, "Could not fetch subscriptions, serving empty feed");
            return empty_feed(meta);
        }
    };

    let conversion = if options.convert_currency {
        match store.main_currency(user.id) {
            Ok(Some(currency)) => Some(currency),
            Ok(None) => {
                debug!(user_id = user.id, "No main currency set, prices left unconverted");
                None
            }
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Could not load main currency, prices left unconverted");
                None
            }
        }
    } else {
        None
    };

    let mut writer = FeedWriter::new(meta);
    for event in normalize_all(&records, conversion.as_ref()) {
        writer.push_event(&event);
    }

    info!(
        user_id = user.id,
        events = writer.event_count(),
        skipped = records.len() - writer.event_count(),
        "Serving subscription feed"
    );
    writer.finish()
}

fn calendar_response(body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", FEED_FILENAME),
            ),
        ],
        body,
    )
        .into_response()
}

/// Lenient boolean query flag; anything unrecognized is false.
fn parse_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}
