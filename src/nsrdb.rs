use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::debug;

use crate::config::Credentials;
use crate::domain::WorkItem;
use crate::error::{BulkError, FetchError};

pub const DEFAULT_ENDPOINT: &str =
    "https://developer.nrel.gov/api/nsrdb/v2/solar/psm3-download.csv";

const ERROR_BODY_CHARS: usize = 200;

/// Static request options shared by every work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSettings {
    pub attributes: Vec<String>,
    pub interval: u32,
    pub utc: bool,
    pub leap_day: bool,
    pub mailing_list: bool,
}

/// Query parameters for one PSM v3 time-series download.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestParameters {
    pub wkt: String,
    pub names: String,
    pub interval: String,
    pub utc: String,
    pub leap_day: String,
    pub attributes: String,
    pub email: String,
    pub full_name: String,
    pub affiliation: String,
    pub reason: String,
    pub mailing_list: String,
    pub api_key: String,
}

impl RequestParameters {
    pub fn build(item: &WorkItem, settings: &RequestSettings, credentials: &Credentials) -> Self {
        Self {
            wkt: item.point.wkt(),
            names: item.year.to_string(),
            interval: settings.interval.to_string(),
            utc: settings.utc.to_string(),
            leap_day: settings.leap_day.to_string(),
            attributes: settings.attributes.join(","),
            email: credentials.email.clone(),
            full_name: credentials.full_name.clone(),
            affiliation: credentials.affiliation.clone(),
            reason: credentials.reason.clone(),
            mailing_list: settings.mailing_list.to_string(),
            api_key: credentials.api_key.clone(),
        }
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("wkt", self.wkt.as_str()),
            ("names", self.names.as_str()),
            ("interval", self.interval.as_str()),
            ("utc", self.utc.as_str()),
            ("leap_day", self.leap_day.as_str()),
            ("attributes", self.attributes.as_str()),
            ("email", self.email.as_str()),
            ("full_name", self.full_name.as_str()),
            ("affiliation", self.affiliation.as_str()),
            ("reason", self.reason.as_str()),
            ("mailing_list", self.mailing_list.as_str()),
            ("api_key", self.api_key.as_str()),
        ]
    }
}

impl std::fmt::Debug for RequestParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestParameters")
            .field("wkt", &self.wkt)
            .field("names", &self.names)
            .field("interval", &self.interval)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

pub trait NsrdbClient: Send + Sync {
    /// Downloads one time series into `destination`, returning the bytes written.
    fn fetch(&self, params: &RequestParameters, destination: &Path) -> Result<u64, FetchError>;
}

#[derive(Clone)]
pub struct NsrdbHttpClient {
    client: Client,
    endpoint: String,
    retry_client_errors: bool,
}

impl NsrdbHttpClient {
    pub fn new(endpoint: &str, timeout: Duration, retry_client_errors: bool) -> Result<Self, BulkError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("nsrdb-bulk/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| BulkError::NsrdbHttp(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| BulkError::NsrdbHttp(err.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            retry_client_errors,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn write_response_to_file(
        &self,
        mut response: Response,
        destination: &Path,
    ) -> Result<u64, FetchError> {
        let mut file = File::create(destination).map_err(|err| {
            FetchError::Fatal(format!("create {}: {err}", destination.display()))
        })?;
        // body read failures surface here as io errors; the connection is the usual culprit
        let written = std::io::copy(&mut response, &mut file)
            .map_err(|err| FetchError::Transient(format!("download interrupted: {err}")))?;
        file.sync_all().map_err(|err| {
            FetchError::Fatal(format!("sync {}: {err}", destination.display()))
        })?;
        Ok(written)
    }
}

impl NsrdbClient for NsrdbHttpClient {
    fn fetch(&self, params: &RequestParameters, destination: &Path) -> Result<u64, FetchError> {
        debug!(wkt = %params.wkt, year = %params.names, "nsrdb.request");
        let response = self
            .client
            .get(&self.endpoint)
            .query(&params.query_pairs())
            .send()
            .map_err(|err| FetchError::Transient(format!("request failed: {err}")))?;

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().unwrap_or_default();
            return Err(classify_failure(status, &body, self.retry_client_errors));
        }

        let written = self.write_response_to_file(response, destination)?;
        debug!(status, bytes = written, "nsrdb.response");
        Ok(written)
    }
}

/// Maps an error status to a fetch outcome.
///
/// 429 and 5xx are always transient. Other 4xx are transient only while
/// `retry_client_errors` is set, giving a blanket retry on any status at or
/// above 400.
pub fn classify_failure(status: u16, body: &str, retry_client_errors: bool) -> FetchError {
    if status == 429 {
        return FetchError::Transient("Rate limited (429)".to_string());
    }
    let snippet: String = body.chars().take(ERROR_BODY_CHARS).collect();
    let message = format!("HTTP {status}: {snippet}");
    if status >= 500 || retry_client_errors {
        FetchError::Transient(message)
    } else {
        FetchError::Fatal(message)
    }
}
