use crate::LOG;

/// Logs every request through slog instead of tide's `log` backend
#[derive(Debug, Default, Clone)]
pub struct LogMiddleware {
    _priv: (),
}

impl LogMiddleware {
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

#[async_trait::async_trait]
impl<State: Clone + Send + Sync + 'static> tide::Middleware<State> for LogMiddleware {
    async fn handle(&self, req: tide::Request<State>, next: tide::Next<'_, State>) -> tide::Result {
        let path = req.url().path().to_owned();
        let method = req.method().to_string();
        let start = std::time::Instant::now();
        let response = next.run(req).await;
        let status = response.status();
        let elapsed = start.elapsed();
        if let Some(error) = response.error() {
            slog::error!(
                LOG, "request error {:?}", error;
                "method" => &method,
                "path" => &path,
                "status" => status as u16,
                "duration_ms" => elapsed.as_millis() as u64,
            );
        } else if status.is_client_error() {
            slog::warn!(
                LOG, "client error";
                "method" => &method,
                "path" => &path,
                "status" => status as u16,
                "duration_ms" => elapsed.as_millis() as u64,
            );
        } else {
            slog::info!(
                LOG, "request";
                "method" => &method,
                "path" => &path,
                "status" => status as u16,
                "duration_ms" => elapsed.as_millis() as u64,
            );
        }
        Ok(response)
    }
}
