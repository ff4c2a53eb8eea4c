//! Object store client seam and its HTTP implementation.
//!
//! `HttpObjectStoreClient` speaks the path-style S3 REST API: ListObjectsV2
//! for listing and plain GET for whole-object download. Requests carry an
//! optional bearer token; request signing happens in front of this client
//! (for example a signing proxy or a presigning gateway).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;

use crate::providers::error::{DownloadError, DownloadErrorKind, StorageError};

/// Connection settings shared by every request of one client.
#[derive(Debug, Clone)]
pub struct ObjectStoreSettings {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_token: Option<SecretString>,
    pub timeout: Duration,
}

impl ObjectStoreSettings {
    pub fn endpoint_url(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", self.region))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListObjectsRequest {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: u32,
    pub continuation_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListObjectsPage {
    pub objects: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
    pub next_continuation_token: Option<String>,
}

#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn list_objects(&self, request: &ListObjectsRequest) -> Result<ListObjectsPage, StorageError>;

    /// Streams one object into `local_path`, returning the bytes written.
    async fn get_object(&self, key: &str, local_path: &Path) -> Result<u64, DownloadError>;
}

pub struct HttpObjectStoreClient {
    client: reqwest::Client,
    settings: ObjectStoreSettings,
}

impl HttpObjectStoreClient {
    pub fn new(settings: ObjectStoreSettings) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| StorageError::Request(e.to_string()))?;
        Ok(Self { client, settings })
    }

    fn bucket_url(&self, key: Option<&str>) -> Result<Url, StorageError> {
        let endpoint = self.settings.endpoint_url();
        let mut url = Url::parse(&endpoint)
            .map_err(|e| StorageError::InvalidConfig(format!("endpoint '{}': {}", endpoint, e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StorageError::InvalidConfig(format!("endpoint '{}' cannot be a base", endpoint)))?;
            segments.pop_if_empty().push(&self.settings.bucket);
            if let Some(key) = key {
                for part in key.split('/') {
                    segments.push(part);
                }
            }
        }
        Ok(url)
    }

    fn request(&self, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.get(url);
        match &self.settings.access_token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }
}

#[async_trait]
impl ObjectStoreClient for HttpObjectStoreClient {
    async fn list_objects(&self, request: &ListObjectsRequest) -> Result<ListObjectsPage, StorageError> {
        let mut url = self.bucket_url(None)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("list-type", "2");
            query.append_pair("max-keys", &request.max_keys.to_string());
            if let Some(prefix) = &request.prefix {
                query.append_pair("prefix", prefix);
            }
            if let Some(delimiter) = &request.delimiter {
                query.append_pair("delimiter", delimiter);
            }
            if let Some(token) = &request.continuation_token {
                query.append_pair("continuation-token", token);
            }
        }

        let response = self
            .request(url)
            .send()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;

        if !status.is_success() {
            let (code, message) = parse_error_body(&body);
            return Err(StorageError::Http {
                status: status.as_u16(),
                message: format!("{}: {}", code.unwrap_or_default(), message.unwrap_or_default()),
            });
        }

        parse_list_response(&body)
    }

    async fn get_object(&self, key: &str, local_path: &Path) -> Result<u64, DownloadError> {
        let url = self
            .bucket_url(Some(key))
            .map_err(|e| DownloadError::new(DownloadErrorKind::Connection, key, e.to_string()))?;

        let response = self
            .request(url)
            .send()
            .await
            .map_err(|e| request_failure(key, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let (code, message) = parse_error_body(&body);
            let kind = match status {
                StatusCode::NOT_FOUND => DownloadErrorKind::NotFound,
                StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => DownloadErrorKind::PermissionDenied,
                StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => DownloadErrorKind::Timeout,
                s if s.is_server_error() => DownloadErrorKind::Connection,
                _ => DownloadErrorKind::Transfer,
            };
            let message = message.unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(DownloadError::new(kind, key, message)
                .with_native_code(code.unwrap_or_else(|| status.as_u16().to_string())));
        }

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| DownloadError::from_io(key, &e))?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| request_failure(key, &e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::from_io(key, &e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| DownloadError::from_io(key, &e))?;

        Ok(written)
    }
}

fn request_failure(key: &str, e: &reqwest::Error) -> DownloadError {
    let kind = if e.is_timeout() {
        DownloadErrorKind::Timeout
    } else if e.is_connect() {
        DownloadErrorKind::Connection
    } else {
        DownloadErrorKind::Transfer
    };
    DownloadError::new(kind, key, e.to_string())
}

#[derive(Clone, Copy, PartialEq)]
enum ListField {
    None,
    Key,
    Size,
    LastModified,
    Prefix,
    NextToken,
}

/// Parses a ListObjectsV2 response body.
///
/// Text is not trimmed: entity references split a key into several text
/// events and the whitespace around them belongs to the key.
pub fn parse_list_response(xml: &str) -> Result<ListObjectsPage, StorageError> {
    let mut reader = Reader::from_str(xml);

    let mut page = ListObjectsPage::default();
    let mut current: Option<ObjectEntry> = None;
    let mut in_common_prefixes = false;
    let mut field = ListField::None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                text.clear();
                match e.local_name().as_ref() {
                    b"Contents" => {
                        current = Some(ObjectEntry {
                            key: String::new(),
                            size: 0,
                            last_modified: None,
                        })
                    }
                    b"CommonPrefixes" => in_common_prefixes = true,
                    b"Key" => field = ListField::Key,
                    b"Size" => field = ListField::Size,
                    b"LastModified" => field = ListField::LastModified,
                    b"Prefix" if in_common_prefixes => field = ListField::Prefix,
                    b"NextContinuationToken" => field = ListField::NextToken,
                    _ => field = ListField::None,
                }
            }
            Ok(Event::Text(e)) => {
                if field != ListField::None {
                    let decoded = e
                        .decode()
                        .map_err(|err| StorageError::InvalidResponse(err.to_string()))?;
                    text.push_str(&decoded);
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if field != ListField::None {
                    let name = String::from_utf8_lossy(&e);
                    text.push_str(&resolve_entity(&name)?);
                }
            }
            Ok(Event::End(ref e)) => {
                match (field, current.as_mut()) {
                    (ListField::Key, Some(entry)) => entry.key = text.clone(),
                    (ListField::Size, Some(entry)) => {
                        entry.size = text.trim().parse().map_err(|_| {
                            StorageError::InvalidResponse(format!("invalid object size '{}'", text))
                        })?
                    }
                    (ListField::LastModified, Some(entry)) => {
                        entry.last_modified = DateTime::parse_from_rfc3339(text.trim())
                            .ok()
                            .map(|dt| dt.with_timezone(&Utc))
                    }
                    (ListField::Prefix, _) => page.common_prefixes.push(text.clone()),
                    (ListField::NextToken, _) => page.next_continuation_token = Some(text.clone()),
                    _ => {}
                }
                field = ListField::None;
                match e.local_name().as_ref() {
                    b"Contents" => {
                        if let Some(entry) = current.take() {
                            page.objects.push(entry);
                        }
                    }
                    b"CommonPrefixes" => in_common_prefixes = false,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(StorageError::InvalidResponse(format!(
                    "XML parsing error: {}",
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(page)
}

fn resolve_entity(name: &str) -> Result<String, StorageError> {
    let resolved = match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        other => other
            .strip_prefix("#x")
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .or_else(|| other.strip_prefix('#').and_then(|dec| dec.parse().ok()))
            .and_then(char::from_u32),
    };
    resolved
        .map(String::from)
        .ok_or_else(|| StorageError::InvalidResponse(format!("unknown entity '&{};'", name)))
}

/// Extracts `<Code>` and `<Message>` from an S3 error body.
fn parse_error_body(xml: &str) -> (Option<String>, Option<String>) {
    let mut reader = Reader::from_str(xml);

    let mut code: Option<String> = None;
    let mut message: Option<String> = None;
    let mut in_code = false;
    let mut in_message = false;

    let mut append = |in_code: bool, in_message: bool, piece: &str| {
        let target = if in_code {
            &mut code
        } else if in_message {
            &mut message
        } else {
            return;
        };
        target.get_or_insert_with(String::new).push_str(piece);
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"Code" => in_code = true,
                b"Message" => in_message = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                let decoded = e.decode().unwrap_or_default();
                append(in_code, in_message, &decoded);
            }
            Ok(Event::GeneralRef(e)) => {
                if let Ok(resolved) = resolve_entity(&String::from_utf8_lossy(&e)) {
                    append(in_code, in_message, &resolved);
                }
            }
            Ok(Event::End(_)) => {
                in_code = false;
                in_message = false;
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    (code, message)
}
