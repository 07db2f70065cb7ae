//! Telegram Bot API destination: every media item becomes one channel post.

use chrono::Utc;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use super::backend::{BackendError, RemoteBackend, TelegramConfig};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const ALREADY_DELETED: &str = "message to delete not found";

pub struct TelegramBackend {
    config: TelegramConfig,
    agent: ureq::Agent,
}

/// A failed API call: HTTP status (if the server answered) and Telegram's
/// `description`.
#[derive(Debug)]
struct ApiFailure {
    status: Option<u16>,
    description: String,
}

impl ApiFailure {
    fn into_backend_error(self, method: &str) -> BackendError {
        match self.status {
            None => BackendError::Transient(format!("{method}: {}", self.description)),
            Some(code) if code == 429 || code >= 500 => {
                BackendError::Transient(format!("{method}: HTTP {code} {}", self.description))
            }
            Some(code) => {
                BackendError::Permanent(format!("{method}: HTTP {code} {}", self.description))
            }
        }
    }
}

impl TelegramBackend {
    pub fn new(config: TelegramConfig, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { config, agent }
    }

    fn url(&self, method: &str) -> String {
        let base = self
            .config
            .api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/');
        format!("{}/bot{}/{}", base, self.config.token, method)
    }
}

impl RemoteBackend for TelegramBackend {
    fn validate(&self) -> bool {
        let reply = read_reply(self.agent.get(&self.url("getMe")).call());
        match reply {
            Ok(_) => true,
            Err(failure) => {
                tracing::warn!(status = ?failure.status, error = %failure.description, "Telegram getMe failed");
                false
            }
        }
    }

    fn upload(&self, content_type: &str, path: &Path) -> Result<String, BackendError> {
        let (method, field) = if content_type.starts_with("video/") {
            ("sendVideo", "video")
        } else if content_type.starts_with("image/") {
            ("sendPhoto", "photo")
        } else {
            return Err(BackendError::Permanent(format!(
                "unsupported content type {content_type}"
            )));
        };

        let content = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackendError::Permanent(format!("{}: {}", path.display(), e))
            } else {
                BackendError::Transient(format!("{}: {}", path.display(), e))
            }
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());

        let boundary = format!("dmedia-boundary-{}", Utc::now().timestamp_micros());
        let body = multipart_body(
            &boundary,
            &[("chat_id", self.config.channel.as_str())],
            field,
            &file_name,
            content_type,
            &content,
        );

        let reply = read_reply(
            self.agent
                .post(&self.url(method))
                .set(
                    "Content-Type",
                    &format!("multipart/form-data; boundary={boundary}"),
                )
                .send_bytes(&body),
        )
        .map_err(|failure| failure.into_backend_error(method))?;

        message_id(&reply).ok_or_else(|| {
            BackendError::Permanent(format!("{method}: reply without result.message_id"))
        })
    }

    fn delete(&self, remote_ref: &str) -> Result<(), BackendError> {
        let reply = read_reply(self.agent.post(&self.url("deleteMessage")).send_form(&[
            ("chat_id", self.config.channel.as_str()),
            ("message_id", remote_ref),
        ]));
        match reply {
            Ok(_) => Ok(()),
            Err(failure) if failure.description.contains(ALREADY_DELETED) => Ok(()),
            Err(failure) => Err(failure.into_backend_error("deleteMessage")),
        }
    }
}

/// Unwrap a Bot API reply, which always carries `ok` and, on failure,
/// `description`.
fn read_reply(result: Result<ureq::Response, ureq::Error>) -> Result<Value, ApiFailure> {
    match result {
        Ok(response) => {
            let status = response.status();
            let body: Value = response.into_json().map_err(|e| ApiFailure {
                status: Some(status),
                description: format!("unreadable reply: {e}"),
            })?;
            check_ok(Some(status), body)
        }
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_json::<Value>().unwrap_or(Value::Null);
            check_ok(Some(status), body)
        }
        Err(ureq::Error::Transport(transport)) => Err(ApiFailure {
            status: None,
            description: transport.to_string(),
        }),
    }
}

fn check_ok(status: Option<u16>, body: Value) -> Result<Value, ApiFailure> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }
    let status = body
        .get("error_code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
        .or(status);
    let description = body
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("no description")
        .to_string();
    Err(ApiFailure { status, description })
}

fn message_id(reply: &Value) -> Option<String> {
    reply
        .pointer("/result/message_id")
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
}

fn multipart_body(
    boundary: &str,
    fields: &[(&str, &str)],
    file_field: &str,
    file_name: &str,
    content_type: &str,
    content: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    let file_name = file_name.replace('"', "_");
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{file_field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend(api_base: Option<&str>) -> TelegramBackend {
        TelegramBackend::new(
            TelegramConfig {
                token: "123:abc".into(),
                channel: "@backup".into(),
                api_base: api_base.map(String::from),
            },
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_url() {
        assert_eq!(
            backend(None).url("getMe"),
            "https://api.telegram.org/bot123:abc/getMe"
        );
        assert_eq!(
            backend(Some("http://localhost:8081/")).url("sendPhoto"),
            "http://localhost:8081/bot123:abc/sendPhoto"
        );
    }

    #[test]
    fn test_multipart_body() {
        let body = multipart_body("XYZ", &[("chat_id", "@c")], "photo", "a.jpg", "image/jpeg", b"DATA");
        let text = String::from_utf8(body).unwrap();
        assert_eq!(
            text,
            "--XYZ\r\nContent-Disposition: form-data; name=\"chat_id\"\r\n\r\n@c\r\n\
             --XYZ\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"a.jpg\"\r\n\
             Content-Type: image/jpeg\r\n\r\nDATA\r\n--XYZ--\r\n"
        );
    }

    #[test]
    fn test_reply_parsing() {
        let reply = check_ok(Some(200), json!({ "ok": true, "result": { "message_id": 77 } })).unwrap();
        assert_eq!(message_id(&reply).as_deref(), Some("77"));

        let failure = check_ok(
            Some(400),
            json!({ "ok": false, "error_code": 400, "description": "Bad Request: chat not found" }),
        )
        .unwrap_err();
        assert_eq!(failure.status, Some(400));
        assert!(failure.description.contains("chat not found"));
    }

    #[test]
    fn test_failure_classification() {
        let failure = |status, description: &str| ApiFailure {
            status,
            description: description.to_string(),
        };
        assert!(matches!(
            failure(Some(429), "Too Many Requests").into_backend_error("sendPhoto"),
            BackendError::Transient(_)
        ));
        assert!(matches!(
            failure(Some(502), "Bad Gateway").into_backend_error("sendPhoto"),
            BackendError::Transient(_)
        ));
        assert!(matches!(
            failure(None, "connection refused").into_backend_error("sendPhoto"),
            BackendError::Transient(_)
        ));
        assert!(matches!(
            failure(Some(400), "Bad Request: PHOTO_INVALID_DIMENSIONS").into_backend_error("sendPhoto"),
            BackendError::Permanent(_)
        ));
    }

    #[test]
    fn test_upload_rejects_non_media_without_network() {
        let err = backend(None)
            .upload("application/pdf", Path::new("/nonexistent.pdf"))
            .unwrap_err();
        assert!(matches!(err, BackendError::Permanent(_)));

        let err = backend(None)
            .upload("image/jpeg", Path::new("/nonexistent/dir/a.jpg"))
            .unwrap_err();
        assert!(matches!(err, BackendError::Permanent(_)));
    }
}
