use crate::error::{ConfigLoadError, PredictError};
use crate::predictor::Predictor;
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::io::{self, Read};
use std::sync::Arc;
use std::thread;
use tiny_http::{Header, Request, Response, Server};

pub const APP_NAME: &str = "BlockTheTweet Inference";
pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
/// Major and minor only, e.g. `v0.1`.
pub const VERSION: &str = concat!(
    "v",
    env!("CARGO_PKG_VERSION_MAJOR"),
    ".",
    env!("CARGO_PKG_VERSION_MINOR")
);

/// Largest request body accepted by `POST /`.
pub const MAX_BODY_BYTES: usize = 1 << 20;

const PREFLIGHT_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type, Authorization"),
    ("Access-Control-Max-Age", "86400"),
];

/// Transport-independent response produced by [`route`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    pub preflight: bool,
}

impl ApiResponse {
    fn json(status: u16, body: String) -> Self {
        ApiResponse {
            status,
            body,
            preflight: false,
        }
    }

    fn envelope(status: u16, message: &str, data: Option<Value>) -> Self {
        let mut envelope = json!({
            "statusCode": status,
            "message": message,
        });
        if let Some(data) = data {
            envelope["data"] = data;
        }
        Self::json(status, envelope.to_string())
    }

    fn preflight() -> Self {
        ApiResponse {
            status: 204,
            body: String::new(),
            preflight: true,
        }
    }

    fn not_found() -> Self {
        Self::envelope(404, "Not Found", None)
    }

    fn from_error(err: &PredictError) -> Self {
        match err.status_code() {
            400 => Self::envelope(400, "Bad Request", None),
            status => Self::envelope(status, "Internal Server Error", None),
        }
    }

    fn headers(&self) -> Vec<(&'static str, &'static str)> {
        let mut headers = vec![
            ("Access-Control-Allow-Origin", "*"),
            ("Content-Type", "application/json"),
        ];
        if self.preflight {
            headers.extend(PREFLIGHT_HEADERS);
        }
        headers
    }

    fn into_http(self) -> Response<io::Cursor<Vec<u8>>> {
        let headers = self.headers();
        let mut response = Response::from_string(self.body).with_status_code(self.status);
        for (name, value) in headers {
            match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                Ok(header) => response = response.with_header(header),
                Err(()) => warn!("Skipping invalid response header {}", name),
            }
        }
        response
    }
}

/// Dispatch one request. Pure so it can be exercised without a socket.
pub fn route(predictor: &Predictor, method: &str, url: &str, body: &[u8]) -> ApiResponse {
    let path = url.split_once('?').map_or(url, |(path, _)| path);

    match (method, path) {
        ("OPTIONS", _) => ApiResponse::preflight(),
        ("GET", "/") => service_info(),
        ("POST", "/") => match classify(predictor, body) {
            Ok(response) => response,
            Err(err) => {
                if err.status_code() < 500 {
                    warn!("Rejected classification request: {}", err);
                } else {
                    error!("Classification request failed: {}", err);
                }
                // Inference failures are already in the sink log.
                if !matches!(err, PredictError::Inference(_)) {
                    predictor.report_failure(&err);
                }
                ApiResponse::from_error(&err)
            }
        },
        _ => ApiResponse::not_found(),
    }
}

fn service_info() -> ApiResponse {
    let data = json!({
        "author": AUTHOR,
        "version": VERSION,
        "appName": APP_NAME,
    });
    ApiResponse::envelope(200, "success", Some(data))
}

fn classify(predictor: &Predictor, body: &[u8]) -> Result<ApiResponse, PredictError> {
    if body.len() > MAX_BODY_BYTES {
        return Err(PredictError::BadInput(format!(
            "body exceeds {} bytes",
            MAX_BODY_BYTES
        )));
    }

    let request: Value =
        serde_json::from_slice(body).map_err(|e| PredictError::BadInput(e.to_string()))?;
    let text = request
        .as_object()
        .ok_or_else(|| PredictError::BadInput("body must be a JSON object".to_string()))?
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| PredictError::BadInput("'text' must be a string".to_string()))?;

    let prediction = predictor.predict(text)?;
    let body = serde_json::to_string(&prediction)
        .map_err(|e| PredictError::Internal(format!("failed to encode prediction: {}", e)))?;

    Ok(ApiResponse::json(200, body))
}

pub fn bind(addr: &str) -> Result<Server, ConfigLoadError> {
    Server::http(addr).map_err(|e| ConfigLoadError::Bind {
        addr: addr.to_string(),
        reason: e.to_string(),
    })
}

/// Serve requests on `workers` threads until the listener shuts down.
pub fn serve(server: Server, predictor: Arc<Predictor>, workers: usize) -> io::Result<()> {
    let server = Arc::new(server);
    let workers = workers.max(1);
    info!("Serving with {} worker threads", workers);

    let handles = (0..workers)
        .map(|index| {
            let server = Arc::clone(&server);
            let predictor = Arc::clone(&predictor);
            thread::Builder::new()
                .name(format!("http-worker-{}", index))
                .spawn(move || worker_loop(&server, &predictor))
        })
        .collect::<io::Result<Vec<_>>>()?;

    for handle in handles {
        if handle.join().is_err() {
            error!("HTTP worker thread panicked");
        }
    }
    Ok(())
}

fn worker_loop(server: &Server, predictor: &Predictor) {
    loop {
        match server.recv() {
            Ok(request) => handle_request(predictor, request),
            Err(e) => {
                error!("Listener stopped accepting requests: {}", e);
                break;
            }
        }
    }
}

fn handle_request(predictor: &Predictor, mut request: Request) {
    let method = request.method().to_string();
    let url = request.url().to_string();

    let mut body = Vec::new();
    // one byte past the limit so oversize bodies are detectable
    let limit = MAX_BODY_BYTES as u64 + 1;
    let response = match Read::take(request.as_reader(), limit).read_to_end(&mut body) {
        Ok(_) => route(predictor, &method, &url, &body),
        Err(e) => {
            warn!("Failed to read body of {} {}: {}", method, url, e);
            ApiResponse::envelope(400, "Bad Request", None)
        }
    };

    debug!("{} {} -> {}", method, url, response.status);
    if let Err(e) = request.respond(response.into_http()) {
        warn!("Failed to write response for {} {}: {}", method, url, e);
    }
}
