use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use crate::models::ListeningEvent;
use crate::store::HistoryStore;
use crate::summary::{StaticPreferences, SummaryService};
use crate::{analytics, utils, CONFIG, LOG};

macro_rules! resp {
    (json => $obj:expr) => {{
        tide::Response::builder(200)
            .body(tide::Body::from_json(&$obj)?)
            .build()
    }};
    (status => $status:expr, message => $msg:expr) => {{
        tide::Response::builder($status)
            .body(serde_json::json!({ "error": $msg }))
            .build()
    }};
}

#[derive(Clone)]
pub struct Context {
    store: Arc<HistoryStore>,
}

pub async fn start(store: Arc<HistoryStore>) -> crate::Result<()> {
    let app = app(store);
    slog::info!(LOG, "running at {}", CONFIG.host());
    app.listen(CONFIG.host()).await?;
    Ok(())
}

pub fn app(store: Arc<HistoryStore>) -> tide::Server<Context> {
    let ctx = Context { store };
    let mut app = tide::with_state(ctx);
    app.at("/api/status").get(status);
    app.at("/api/stats").get(stats);
    app.at("/api/import").post(import);
    app.at("/api/history").get(history).delete(clear);
    app.at("/api/top/tracks").get(top_tracks);
    app.at("/api/top/artists").get(top_artists);
    app.at("/api/patterns").get(patterns);
    app.at("/api/skips").get(skips);
    app.at("/api/platforms").get(platforms);
    app.at("/api/yearly").get(yearly);
    app.at("/api/streaks").get(streaks);
    app.at("/api/discovery").get(discovery);
    app.at("/api/summary").get(summary);
    app.at("/api/overview").get(overview);
    app.at("/api/dashboard").post(dashboard);
    app.with(crate::logging::LogMiddleware::new());
    app
}

#[derive(serde::Serialize)]
struct Status<'a> {
    ok: &'a str,
    version: &'a str,
}

async fn status(_req: tide::Request<Context>) -> tide::Result {
    Ok(resp!(json => Status {
        ok: "ok",
        version: &CONFIG.version
    }))
}

/// Which slice of the stored history a request is about.
/// `limit` caps the rows `/api/history` returns, `top` is the size
/// of every top-N list.
#[derive(Debug, Default, serde::Deserialize, serde::Serialize)]
struct HistoryParams {
    year: Option<i32>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: Option<usize>,
    top: Option<usize>,
    today: Option<NaiveDate>,
}

impl HistoryParams {
    fn top(&self) -> usize {
        self.top.unwrap_or(50)
    }

    fn is_filtered(&self) -> bool {
        self.year.is_some() || self.start.is_some() || self.end.is_some()
    }

    fn today(&self, store: &HistoryStore) -> NaiveDate {
        self.today
            .unwrap_or_else(|| utils::today(store.utc_offset()))
    }

    async fn events(&self, store: &HistoryStore) -> crate::Result<Vec<ListeningEvent>> {
        if let Some(year) = self.year {
            return store.by_year(year).await;
        }
        if self.start.is_some() || self.end.is_some() {
            let start = self.start.unwrap_or(DateTime::<Utc>::MIN_UTC);
            let end = self.end.unwrap_or_else(Utc::now);
            return store.by_date_range(start, end).await;
        }
        store.all(None).await
    }
}

macro_rules! params_or_error {
    ($req:expr) => {{
        match $req.query::<HistoryParams>() {
            Err(e) => {
                slog::error!(LOG, "invalid history query params {:?}", e);
                return Ok(resp!(status => 400, message => "invalid query parameters"));
            }
            Ok(params) => params,
        }
    }};
}

async fn stats(req: tide::Request<Context>) -> tide::Result {
    let stats = req.state().store.stats().await?;
    Ok(resp!(json => stats))
}

#[derive(serde::Serialize)]
struct HistoryResponse {
    count: usize,
    history: Vec<ListeningEvent>,
}

async fn history(req: tide::Request<Context>) -> tide::Result {
    let params = params_or_error!(req);
    let store = &req.state().store;
    let history = if params.is_filtered() {
        let mut history = params.events(store).await?;
        if let Some(limit) = params.limit.filter(|l| *l > 0) {
            history.truncate(limit);
        }
        history
    } else {
        store.all(params.limit.map(|l| l as i64)).await?
    };
    Ok(resp!(json => HistoryResponse {
        count: history.len(),
        history,
    }))
}

async fn import(mut req: tide::Request<Context>) -> tide::Result {
    // entries are checked one by one so a bad one is only skipped
    let records: Vec<serde_json::Value> = match req.body_json().await {
        Ok(records) => records,
        Err(e) => {
            slog::error!(LOG, "invalid import body {:?}", e);
            return Ok(resp!(status => 400, message => "expected a json array of history records"));
        }
    };
    let summary = req.state().store.import_history(&records).await?;
    Ok(resp!(json => summary))
}

async fn clear(req: tide::Request<Context>) -> tide::Result {
    req.state().store.clear_history().await?;
    Ok(resp!(json => serde_json::json!({ "ok": "ok" })))
}

async fn top_tracks(req: tide::Request<Context>) -> tide::Result {
    let params = params_or_error!(req);
    let events = params.events(&req.state().store).await?;
    Ok(resp!(json => analytics::top_tracks(&events, params.top())))
}

async fn top_artists(req: tide::Request<Context>) -> tide::Result {
    let params = params_or_error!(req);
    let events = params.events(&req.state().store).await?;
    Ok(resp!(json => analytics::top_artists(&events, params.top())))
}

async fn patterns(req: tide::Request<Context>) -> tide::Result {
    let params = params_or_error!(req);
    let events = params.events(&req.state().store).await?;
    Ok(resp!(json => analytics::time_patterns(&events)))
}

async fn skips(req: tide::Request<Context>) -> tide::Result {
    let params = params_or_error!(req);
    let events = params.events(&req.state().store).await?;
    Ok(resp!(json => analytics::skip_behavior(&events)))
}

async fn platforms(req: tide::Request<Context>) -> tide::Result {
    let params = params_or_error!(req);
    let events = params.events(&req.state().store).await?;
    Ok(resp!(json => analytics::platforms(&events)))
}

async fn yearly(req: tide::Request<Context>) -> tide::Result {
    let params = params_or_error!(req);
    let events = params.events(&req.state().store).await?;
    Ok(resp!(json => analytics::yearly_stats(&events)))
}

async fn streaks(req: tide::Request<Context>) -> tide::Result {
    let params = params_or_error!(req);
    let store = &req.state().store;
    let events = params.events(store).await?;
    Ok(resp!(json => analytics::listening_streaks(&events, params.today(store))))
}

async fn discovery(req: tide::Request<Context>) -> tide::Result {
    let params = params_or_error!(req);
    let events = params.events(&req.state().store).await?;
    Ok(resp!(json => analytics::discovery(&events)))
}

async fn summary(req: tide::Request<Context>) -> tide::Result {
    let params = params_or_error!(req);
    let events = params.events(&req.state().store).await?;
    Ok(resp!(json => analytics::complete_summary(&events)))
}

async fn overview(req: tide::Request<Context>) -> tide::Result {
    let params = params_or_error!(req);
    let store = &req.state().store;
    let events = params.events(store).await?;
    slog::info!(
        LOG, "building history overview";
        "params" => serde_json::to_string(&params).ok(),
        "events" => events.len(),
    );
    Ok(resp!(json => analytics::history_overview(&events, params.top(), params.today(store))))
}

/// The caller posts the current top tracks/artists it fetched from
/// the remote api, we add the history side.
async fn dashboard(mut req: tide::Request<Context>) -> tide::Result {
    let params = params_or_error!(req);
    let preferences: StaticPreferences = match req.body_json().await {
        Ok(p) => p,
        Err(e) => {
            slog::error!(LOG, "invalid dashboard body {:?}", e);
            return Ok(resp!(status => 400, message => "expected top_tracks and top_artists"));
        }
    };
    let store = req.state().store.clone();
    let today = params.today(&store);
    let service = SummaryService::new(store, preferences).with_top_n(params.top());
    let dashboard = service.dashboard(today).await?;
    Ok(resp!(json => dashboard))
}
