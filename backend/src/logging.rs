//! Request, performance, security and error logging.
//!
//! Everything goes through `tracing`; the domain records are also appended
//! as newline-delimited JSON to `access.log` and `error.log`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::client_ip::ClientIp;
use crate::config::LoggingConfig;
use crate::error::{AppError, ErrorReport};
use crate::AppState;

pub const ACCESS_LOG: &str = "access.log";
pub const ERROR_LOG: &str = "error.log";

/// Body fields never written to disk.
const REDACTED_FIELDS: &[&str] = &["password", "adminCode"];

static SUSPICIOUS_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("directory traversal", r"\.\./"),
        ("script injection", r"(?i)<script"),
        ("sql injection", r"(?i)union\s+select"),
        ("javascript url", r"(?i)javascript:"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid regex")))
    .collect()
});

#[derive(Debug, thiserror::Error)]
pub enum LogSinkError {
    #[error("log I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("log record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFile {
    Access,
    Error,
}

impl LogFile {
    fn file_name(self) -> &'static str {
        match self {
            LogFile::Access => ACCESS_LOG,
            LogFile::Error => ERROR_LOG,
        }
    }
}

/// Append-only NDJSON log files with size-based rotation.
pub struct LogSink {
    dir: PathBuf,
    max_file_bytes: u64,
    // Serializes appends and renames so rotation never splits a record.
    lock: Mutex<()>,
}

impl LogSink {
    pub fn new(dir: impl Into<PathBuf>, max_file_bytes: u64) -> Result<Self, LogSinkError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_file_bytes,
            lock: Mutex::new(()),
        })
    }

    pub fn from_config(config: &LoggingConfig) -> Result<Self, LogSinkError> {
        Self::new(&config.dir, config.max_file_bytes)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file: LogFile) -> PathBuf {
        self.dir.join(file.file_name())
    }

    /// Append a record, stamping `timestamp` if it has none.
    pub async fn try_write(&self, file: LogFile, mut record: Value) -> Result<(), LogSinkError> {
        if let Value::Object(fields) = &mut record {
            fields
                .entry("timestamp")
                .or_insert_with(|| json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut handle = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(file))
            .await?;
        handle.write_all(&line).await?;
        handle.flush().await?;
        Ok(())
    }

    /// Like [`try_write`](Self::try_write), reporting failures instead of returning them.
    pub async fn write(&self, file: LogFile, record: Value) {
        if let Err(e) = self.try_write(file, record).await {
            tracing::error!("Failed to write {}: {}", file.file_name(), e);
        }
    }

    /// Rename files larger than the limit to `<file>.<YYYY-MM-DD>`.
    pub async fn rotate(&self) -> Result<Vec<PathBuf>, LogSinkError> {
        let _guard = self.lock.lock().await;
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let mut rotated = Vec::new();

        for file in [LogFile::Access, LogFile::Error] {
            let path = self.path(file);
            let size = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if size <= self.max_file_bytes {
                continue;
            }

            let target = self.free_backup_path(file, &date).await;
            tokio::fs::rename(&path, &target).await?;
            tracing::info!("Log rotated: {} -> {}", path.display(), target.display());
            rotated.push(target);
        }

        Ok(rotated)
    }

    async fn free_backup_path(&self, file: LogFile, date: &str) -> PathBuf {
        let base = self.dir.join(format!("{}.{}", file.file_name(), date));
        let mut candidate = base.clone();
        let mut n = 1;
        while tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            candidate = PathBuf::from(format!("{}.{}", base.display(), n));
            n += 1;
        }
        candidate
    }
}

/// Check the log files for rotation every `interval`.
pub fn spawn_rotation(sink: Arc<LogSink>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = sink.rotate().await {
                tracing::error!("Log rotation failed: {}", e);
            }
        }
    })
}

/// Replace sensitive field values anywhere in a JSON body.
pub fn redact(value: &mut Value) {
    match value {
        Value::Object(fields) => {
            for (key, field) in fields.iter_mut() {
                if REDACTED_FIELDS.contains(&key.as_str()) {
                    *field = json!("***");
                } else {
                    redact(field);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}

/// Name of the first suspicious pattern found in `text`.
pub fn suspicious_pattern(text: &str) -> Option<&'static str> {
    SUSPICIOUS_PATTERNS
        .iter()
        .find(|(_, regex)| regex.is_match(text))
        .map(|(name, _)| *name)
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn client_ip(request: &Request) -> String {
    request
        .extensions()
        .get::<ClientIp>()
        .map(|ip| ip.0.clone())
        .unwrap_or_else(|| ClientIp::unknown().0)
}

/// Read the whole body so it can be inspected, returning a request that still carries it.
async fn buffer_body(request: Request, limit: usize) -> Result<(Request, Bytes), AppError> {
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, limit)
        .await
        .map_err(|_| AppError::BadRequest("Request body too large".to_string()))?;
    Ok((Request::from_parts(parts, Body::from(bytes.clone())), bytes))
}

fn body_for_log(bytes: &Bytes) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(mut value) => {
            redact(&mut value);
            Some(value)
        }
        Err(_) => Some(json!(format!("<{} bytes>", bytes.len()))),
    }
}

/// Writes REQUEST, RESPONSE and PERFORMANCE records for every request.
pub async fn request_logger(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let url = request.uri().to_string();
    let ip = client_ip(&request);
    let headers = request.headers();
    let user_agent = header_str(headers, header::USER_AGENT).map(String::from);

    let mut record = json!({
        "type": "REQUEST",
        "method": method.as_str(),
        "url": url,
        "ip": ip,
        "userAgent": user_agent,
        "headers": {
            "content-type": header_str(headers, header::CONTENT_TYPE),
            "authorization": headers.contains_key(header::AUTHORIZATION).then_some("Bearer ***"),
            "content-length": header_str(headers, header::CONTENT_LENGTH),
        },
    });

    let request = if method != axum::http::Method::GET {
        match buffer_body(request, state.config.server.body_limit_bytes).await {
            Ok((request, bytes)) => {
                record["body"] = body_for_log(&bytes).unwrap_or(Value::Null);
                request
            }
            Err(e) => return e.into_response(),
        }
    } else {
        request
    };
    state.log_sink.write(LogFile::Access, record).await;

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status().as_u16();
    let millis = elapsed.as_secs_f64() * 1000.0;

    tracing::info!(
        method = %method,
        path = %url,
        status = %status,
        duration_ms = %elapsed.as_millis(),
        "HTTP request"
    );

    state
        .log_sink
        .write(
            LogFile::Access,
            json!({
                "type": "RESPONSE",
                "method": method.as_str(),
                "url": url,
                "statusCode": status,
                "duration": format!("{}ms", elapsed.as_millis()),
                "ip": ip,
            }),
        )
        .await;

    let mut performance = json!({
        "type": "PERFORMANCE",
        "method": method.as_str(),
        "url": url,
        "statusCode": status,
        "duration": format!("{:.2}ms", millis),
        "ip": ip,
    });
    if elapsed > Duration::from_millis(state.config.logging.slow_request_ms) {
        tracing::warn!("Slow request: {} {} took {:.2}ms", method, url, millis);
        performance["warning"] = json!("SLOW_REQUEST");
        state.log_sink.write(LogFile::Error, performance).await;
    } else {
        state.log_sink.write(LogFile::Access, performance).await;
    }

    response
}

/// Flags requests whose URL or body looks like an injection attempt.
/// Requests are logged, not blocked.
pub async fn security_logger(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let url = request.uri().to_string();
    let (request, bytes) = match buffer_body(request, state.config.server.body_limit_bytes).await {
        Ok(buffered) => buffered,
        Err(e) => return e.into_response(),
    };

    let body_text = String::from_utf8_lossy(&bytes);
    if let Some(pattern) = suspicious_pattern(&url).or_else(|| suspicious_pattern(&body_text)) {
        let ip = client_ip(&request);
        tracing::warn!(
            "Security warning: {} in {} {} from {}",
            pattern,
            request.method(),
            url,
            ip
        );
        state
            .log_sink
            .write(
                LogFile::Error,
                json!({
                    "type": "SECURITY_WARNING",
                    "method": request.method().as_str(),
                    "url": url,
                    "ip": ip,
                    "userAgent": header_str(request.headers(), header::USER_AGENT),
                    "pattern": pattern,
                    "body": body_for_log(&bytes),
                }),
            )
            .await;
    }

    next.run(request).await
}

/// Records every error response and, in development, adds its debug trace
/// to the body as `stack`.
pub async fn error_logger(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let url = request.uri().to_string();
    let ip = client_ip(&request);
    let user_agent = header_str(request.headers(), header::USER_AGENT).map(String::from);

    let response = next.run(request).await;

    let Some(report) = response.extensions().get::<ErrorReport>().cloned() else {
        return response;
    };

    if report.body.status_code >= 500 {
        tracing::error!("{} {} failed: {}", method, url, report.trace);
    } else {
        tracing::debug!("{} {} rejected: {}", method, url, report.body.message);
    }

    state
        .log_sink
        .write(
            LogFile::Error,
            json!({
                "type": "ERROR",
                "message": report.body.message,
                "stack": report.trace,
                "method": method.as_str(),
                "url": url,
                "ip": ip,
                "userAgent": user_agent,
                "statusCode": report.body.status_code,
            }),
        )
        .await;

    if !state.config.is_development() {
        return response;
    }

    let mut body = report.body;
    body.stack = Some(report.trace);
    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    let rebuilt = Json(body).into_response();
    let (rebuilt_parts, rebuilt_body) = rebuilt.into_parts();
    if let Some(content_type) = rebuilt_parts.headers.get(header::CONTENT_TYPE) {
        parts.headers.insert(header::CONTENT_TYPE, content_type.clone());
    }
    Response::from_parts(parts, rebuilt_body)
}

/// Read every record in a log file. Used by tests and diagnostics.
pub async fn read_records(path: &Path) -> Result<Vec<Map<String, Value>>, LogSinkError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(LogSinkError::from))
        .collect()
}
