//! Retried HTTP download of sharing-style links

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;

use crate::error::{Error, Result};

/// HTTP statuses that are retried rather than failing immediately
pub const RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);
const DRIVE_DOWNLOAD_PREFIX: &str = "https://drive.google.com/uc?export=download&id=";

/// Bounded exponential-backoff retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub total: u32,
    /// Seconds; the n-th retry waits `backoff_factor * 2^(n-1)`
    pub backoff_factor: f64,
    pub status_forcelist: Vec<u16>,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            total: 5,
            backoff_factor: 1.0,
            status_forcelist: RETRY_STATUSES.to_vec(),
            backoff_max: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based); the first retry is immediate
    pub fn backoff_for(&self, retry: u32) -> Duration {
        if retry <= 1 {
            return Duration::ZERO;
        }
        let secs = self.backoff_factor * 2f64.powi(retry as i32 - 1);
        Duration::from_secs_f64(secs.clamp(0.0, self.backoff_max.as_secs_f64()))
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.status_forcelist.contains(&status)
    }
}

/// Result of one attempt inside [`with_retries`]
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    /// Transient failure; try again if budget remains
    Retry(String),
    Fatal(Error),
}

/// Drive `attempt` until it succeeds, fails fatally, or the retry budget runs out
///
/// `attempt` receives the 1-based attempt number. Exhaustion is always an
/// [`Error::TransientNetwork`]; nothing is swallowed.
pub fn with_retries<T>(
    policy: &RetryPolicy,
    mut sleep: impl FnMut(Duration),
    mut attempt: impl FnMut(u32) -> Attempt<T>,
) -> Result<T> {
    let max_attempts = policy.total + 1;
    let mut last_message = String::new();

    for n in 1..=max_attempts {
        if n > 1 {
            let delay = policy.backoff_for(n - 1);
            tracing::warn!(
                "Retrying ({}/{}) after {:?}: {}",
                n - 1,
                policy.total,
                delay,
                last_message
            );
            sleep(delay);
        }
        match attempt(n) {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Retry(message) => last_message = message,
        }
    }

    Err(Error::TransientNetwork {
        attempts: max_attempts,
        message: last_message,
    })
}

/// Extract the file identifier from a sharing-style URL
///
/// Understands `/file/d/<id>/...` and `?id=<id>`; anything else falls back to
/// the second-to-last path segment.
pub fn drive_file_id(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let (path, query) = match without_fragment.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (without_fragment, None),
    };

    if let Some(rest) = path.split("/file/d/").nth(1) {
        let id = rest.split('/').next().unwrap_or_default();
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }

    if let Some(id) = query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .find_map(|pair| pair.strip_prefix("id="))
        .filter(|id| !id.is_empty())
    {
        return Some(id.to_string());
    }

    let segments: Vec<&str> = path.split('/').collect();
    segments
        .len()
        .checked_sub(2)
        .map(|i| segments[i])
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .map(str::to_string)
}

/// Direct-download URL for a Drive file id
pub fn direct_download_url(file_id: &str) -> String {
    format!("{DRIVE_DOWNLOAD_PREFIX}{file_id}")
}

/// Blocking HTTP downloader with retry and atomic placement
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    policy: RetryPolicy,
}

impl Downloader {
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, policy })
    }

    /// Use a preconfigured client (proxies, TLS roots)
    pub fn with_client(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `url` into `dest`, returning the number of bytes written
    ///
    /// The body is streamed to `<dest>.part` and renamed into place only once
    /// complete. An HTML response is taken as the large-file confirmation
    /// page and the request is repeated once with `confirm=t`.
    pub fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let partial = partial_path(dest);

        let (bytes, is_html) = self.fetch_attempts(url, &partial)?;
        let bytes = if is_html {
            tracing::info!("Received confirmation page, retrying with confirm=t");
            let confirmed = confirm_url(url);
            self.fetch_attempts(&confirmed, &partial)?.0
        } else {
            bytes
        };

        fs::rename(&partial, dest)?;
        Ok(bytes)
    }

    fn fetch_attempts(&self, url: &str, partial: &Path) -> Result<(u64, bool)> {
        let result = with_retries(&self.policy, std::thread::sleep, |n| {
            tracing::debug!("GET {} (attempt {})", url, n);
            self.attempt(url, partial)
        });
        if result.is_err() {
            let _ = fs::remove_file(partial);
        }
        result
    }

    fn attempt(&self, url: &str, partial: &Path) -> Attempt<(u64, bool)> {
        let mut response = match self.client.get(url).send() {
            Ok(r) => r,
            Err(e) => return classify_transport(e),
        };

        let status = response.status();
        if self.policy.is_retryable_status(status.as_u16()) {
            return Attempt::Retry(format!("HTTP {status} from {url}"));
        }
        if !status.is_success() {
            return Attempt::Fatal(Error::Network(format!("HTTP {status} from {url}")));
        }

        let is_html = is_html(&response);
        match write_body(&mut response, partial) {
            Ok(bytes) => Attempt::Done((bytes, is_html)),
            Err(BodyError::Transport(e)) => classify_transport(e),
            Err(BodyError::Io(e)) => Attempt::Fatal(e.into()),
        }
    }
}

enum BodyError {
    Transport(reqwest::Error),
    Io(std::io::Error),
}

fn write_body(response: &mut Response, partial: &Path) -> std::result::Result<u64, BodyError> {
    let mut file = File::create(partial).map_err(BodyError::Io)?;
    let bytes = response.copy_to(&mut file).map_err(BodyError::Transport)?;
    file.flush().map_err(BodyError::Io)?;
    Ok(bytes)
}

fn classify_transport<T>(e: reqwest::Error) -> Attempt<T> {
    if e.is_timeout() {
        Attempt::Retry(format!("timed out: {e}"))
    } else if e.is_connect() || e.is_request() || e.is_body() {
        Attempt::Retry(e.to_string())
    } else {
        Attempt::Fatal(Error::Network(e.to_string()))
    }
}

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/html"))
}

fn confirm_url(url: &str) -> String {
    if url.contains('?') {
        format!("{url}&confirm=t")
    } else {
        format!("{url}?confirm=t")
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=5).map(|n| policy.backoff_for(n).as_secs()).collect();
        assert_eq!(delays, vec![0, 2, 4, 8, 16]);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(20), Duration::from_secs(120));

        // Exponents past the Duration range still land on the cap
        let policy = RetryPolicy {
            total: 2000,
            ..RetryPolicy::default()
        };
        for retry in [70, 1100, 2000] {
            assert_eq!(policy.backoff_for(retry), Duration::from_secs(120));
        }
    }

    #[test]
    fn test_status_classification() {
        let policy = RetryPolicy::default();
        for status in [429, 500, 502, 503, 504] {
            assert!(policy.is_retryable_status(status));
        }
        for status in [200, 400, 401, 403, 404, 501] {
            assert!(!policy.is_retryable_status(status));
        }
    }

    #[test]
    fn test_retries_until_success() {
        let slept = RefCell::new(Vec::new());
        let value = with_retries(
            &RetryPolicy::default(),
            |d| slept.borrow_mut().push(d),
            |n| {
                if n < 3 {
                    Attempt::Retry(format!("HTTP 503 on attempt {n}"))
                } else {
                    Attempt::Done(n)
                }
            },
        )
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(
            *slept.borrow(),
            vec![Duration::ZERO, Duration::from_secs(2)]
        );
    }

    #[test]
    fn test_exhaustion_raises_transient_error() {
        let mut calls = 0;
        let err = with_retries(
            &RetryPolicy::default(),
            |_| {},
            |_| -> Attempt<()> {
                calls += 1;
                Attempt::Retry("timed out".to_string())
            },
        )
        .unwrap_err();

        assert_eq!(calls, 6);
        assert!(matches!(
            err,
            Error::TransientNetwork { attempts: 6, ref message } if message == "timed out"
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn test_fatal_stops_immediately() {
        let mut calls = 0;
        let err = with_retries(
            &RetryPolicy::default(),
            |_| {},
            |_| -> Attempt<()> {
                calls += 1;
                Attempt::Fatal(Error::Network("HTTP 404".to_string()))
            },
        )
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, Error::Network(_)));
    }

    #[test]
    fn test_drive_file_id_forms() {
        assert_eq!(
            drive_file_id(
                "https://drive.google.com/file/d/1vlhZ5c7abUKF8xXERIw6m9Te8fW7ohw3/view?usp=sharing"
            ),
            Some("1vlhZ5c7abUKF8xXERIw6m9Te8fW7ohw3".to_string())
        );
        assert_eq!(
            drive_file_id("https://drive.google.com/open?id=abc123"),
            Some("abc123".to_string())
        );
        assert_eq!(
            drive_file_id("https://example.org/files/xyz/download"),
            Some("xyz".to_string())
        );
        assert_eq!(drive_file_id("https://example.org"), None);
    }

    #[test]
    fn test_direct_download_url() {
        assert_eq!(
            direct_download_url("abc"),
            "https://drive.google.com/uc?export=download&id=abc"
        );
        assert_eq!(
            confirm_url(&direct_download_url("abc")),
            "https://drive.google.com/uc?export=download&id=abc&confirm=t"
        );
    }

    /// Serve canned responses, one per connection, in order
    fn serve(responses: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for response in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                    line.clear();
                }
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        format!("http://{addr}/data.zip")
    }

    fn http(status: &str, content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            backoff_factor: 0.0,
            ..RetryPolicy::default()
        }
    }

    fn local_downloader(policy: RetryPolicy) -> Downloader {
        let client = Client::builder().no_proxy().build().unwrap();
        Downloader::with_client(client, policy)
    }

    #[test]
    fn test_fetch_retries_transient_status() {
        let url = serve(vec![
            http("503 Service Unavailable", "text/plain", ""),
            http("502 Bad Gateway", "text/plain", ""),
            http("200 OK", "application/zip", "PK-archive"),
        ]);
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("nested/data.zip");

        let bytes = local_downloader(fast_policy())
            .fetch_to(&url, &dest)
            .unwrap();

        assert_eq!(bytes, 10);
        assert_eq!(fs::read_to_string(&dest).unwrap(), "PK-archive");
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn test_fetch_follows_confirmation_page() {
        let url = serve(vec![
            http("200 OK", "text/html; charset=utf-8", "<html>confirm</html>"),
            http("200 OK", "application/octet-stream", "zipbytes"),
        ]);
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("data.zip");

        local_downloader(fast_policy())
            .fetch_to(&url, &dest)
            .unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "zipbytes");
    }

    #[test]
    fn test_fetch_client_error_is_fatal() {
        let url = serve(vec![http("404 Not Found", "text/plain", "")]);
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("data.zip");

        let err = local_downloader(fast_policy())
            .fetch_to(&url, &dest)
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn test_fetch_exhausts_budget() {
        let policy = RetryPolicy {
            total: 2,
            ..fast_policy()
        };
        let url = serve(vec![http("500 Internal Server Error", "text/plain", ""); 3]);
        let tmp = TempDir::new().unwrap();

        let err = local_downloader(policy)
            .fetch_to(&url, &tmp.path().join("data.zip"))
            .unwrap_err();
        assert!(matches!(err, Error::TransientNetwork { attempts: 3, .. }));
    }
}
