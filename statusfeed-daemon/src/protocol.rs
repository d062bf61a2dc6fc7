use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use statusfeed_core::{Principal, StatusEntry};
use statusfeed_sync::ProgressEvent;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// Attempts for `status` while the socket is not up yet.
const STATUS_ATTEMPTS: u32 = 5;
const STATUS_RETRY_DELAY: Duration = Duration::from_millis(100);

/// JSON newline-delimited request.
///
/// `cmd` is one of `status`, `snapshot`, `feed`, `sync`, `progress`, `stop`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonRequest {
    pub cmd: String,
    /// `sync`: restrict the pass to one pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    /// `feed`: the reader to filter for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    /// `progress`: the execution update to apply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressEvent>,
}

impl DaemonRequest {
    pub fn command(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            ..Self::default()
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::command("status");

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 1..=STATUS_ATTEMPTS {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < STATUS_ATTEMPTS {
                    sleep(STATUS_RETRY_DELAY);
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status requested with zero attempts".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::command("stop"))?;
    response_into_data(response).map(|_| ())
}

pub fn request_sync(home: &Path, pipeline: Option<String>) -> Result<Value, DaemonError> {
    let response = send_request(
        home,
        &DaemonRequest {
            pipeline,
            ..DaemonRequest::command("sync")
        },
    )?;
    response_into_data(response)
}

/// Fetch the ordered feed; unfiltered when `principal` is `None`.
pub fn request_feed(
    home: &Path,
    principal: Option<Principal>,
) -> Result<Vec<StatusEntry>, DaemonError> {
    let request = match principal {
        Some(principal) => DaemonRequest {
            principal: Some(principal),
            ..DaemonRequest::command("feed")
        },
        None => DaemonRequest::command("snapshot"),
    };
    let data = response_into_data(send_request(home, &request)?)?;
    Ok(serde_json::from_value(data)?)
}

pub fn request_progress(home: &Path, event: ProgressEvent) -> Result<Value, DaemonError> {
    let response = send_request(
        home,
        &DaemonRequest {
            progress: Some(event),
            ..DaemonRequest::command("progress")
        },
    )?;
    response_into_data(response)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_unset_fields() {
        let json = serde_json::to_string(&DaemonRequest::command("status")).expect("encode");
        assert_eq!(json, r#"{"cmd":"status"}"#);
    }

    #[test]
    fn feed_request_carries_principal() {
        let request: DaemonRequest = serde_json::from_str(
            r#"{"cmd":"feed","principal":{"user":"user4","roles":["admin"]}}"#,
        )
        .expect("decode");
        let principal = request.principal.expect("principal");
        assert_eq!(principal, Principal::new("USER4").with_role("Admin"));
    }

    #[test]
    fn error_response_becomes_protocol_error() {
        let err = response_into_data(DaemonResponse::error("boom")).unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(ref msg) if msg == "boom"));
    }

    #[test]
    fn missing_socket_reports_not_running() {
        let home = tempfile::TempDir::new().expect("home");
        let err = send_request(home.path(), &DaemonRequest::command("status")).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }

    #[test]
    fn status_retries_before_reporting_not_running() {
        let home = tempfile::TempDir::new().expect("home");
        let started = std::time::Instant::now();

        let err = request_status(home.path()).unwrap_err();

        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
        assert!(started.elapsed() >= STATUS_RETRY_DELAY * (STATUS_ATTEMPTS - 1));
    }
}
