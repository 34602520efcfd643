//! Multi-range response assembly.
//!
//! A download is a list of byte ranges over one payload. The ranges are read
//! strictly in order through a single seekable handle and concatenated into
//! the response body, optionally passed through a content filter.

use crate::metrics;
use async_compression::tokio::bufread::{GzipEncoder, ZstdEncoder};
use axum::body::Body;
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use silo_core::ByteRange;
use silo_core::index::total_length;
use silo_storage::{ObjectReader, StorageError};
use std::io::SeekFrom;
use std::pin::Pin;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::{ReaderStream, StreamReader};

/// Read buffer size for range copies (64 KiB).
const READ_BUF_SIZE: usize = 64 * 1024;

/// Boxed body stream handed to axum.
pub type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Errors raised before the first body byte is produced.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("payload unavailable: {0}")]
    Payload(#[from] StorageError),

    #[error("failed to start filter process: {0}")]
    Spawn(String),

    #[error("filter process failed ({status}): {stderr}")]
    ProcessFailed { status: String, stderr: String },

    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// On-the-fly transform applied to the assembled body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentFilter {
    Gzip,
    Zstd,
}

impl ContentFilter {
    /// Parse a `filter` query value. Unrecognised names yield `None` and the
    /// body is sent untransformed.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Some(Self::Gzip),
            "zstd" | "zst" => Some(Self::Zstd),
            _ => None,
        }
    }

    /// Suffix appended to the download filename.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Gzip => ".gz",
            Self::Zstd => ".zst",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Gzip => "application/gzip",
            Self::Zstd => "application/zstd",
        }
    }

    /// Wrap `body` in the matching encoder.
    pub fn apply(self, body: BodyStream) -> BodyStream {
        let reader = StreamReader::new(body);
        match self {
            Self::Gzip => Box::pin(ReaderStream::new(GzipEncoder::new(reader))),
            Self::Zstd => Box::pin(ReaderStream::new(ZstdEncoder::new(reader))),
        }
    }
}

/// Streams an ordered list of ranges from one payload.
pub struct RangeStreamer {
    reader: ObjectReader,
    ranges: Vec<ByteRange>,
    filename: String,
    filter: Option<ContentFilter>,
}

impl RangeStreamer {
    pub fn new(reader: ObjectReader, ranges: Vec<ByteRange>, filename: impl Into<String>) -> Self {
        Self {
            reader,
            ranges,
            filename: filename.into(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<ContentFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Number of payload bytes the ranges cover.
    pub fn content_length(&self) -> u64 {
        total_length(&self.ranges)
    }

    /// The concatenated, unfiltered range bytes.
    ///
    /// A payload shorter than the requested ranges ends the stream with
    /// `UnexpectedEof` rather than a silently truncated body.
    pub fn into_stream(self) -> BodyStream {
        Box::pin(range_stream(self.reader, self.ranges))
    }
}

impl IntoResponse for RangeStreamer {
    fn into_response(self) -> Response {
        let filter = self.filter;
        let length = self.content_length();
        let mut filename = self.filename.clone();
        let mut body = self.into_stream();

        match filter {
            Some(filter) => {
                filename.push_str(filter.extension());
                body = filter.apply(body);
                attachment(body, &filename, filter.content_type(), None)
            }
            None => attachment(body, &filename, OCTET_STREAM, Some(length)),
        }
    }
}

fn range_stream(
    mut reader: ObjectReader,
    ranges: Vec<ByteRange>,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    async_stream::try_stream! {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        for range in ranges {
            reader.seek(SeekFrom::Start(range.offset)).await?;
            let mut remaining = range.length;
            while remaining > 0 {
                let want = remaining.min(READ_BUF_SIZE as u64) as usize;
                let n = reader.read(&mut buf[..want]).await?;
                if n == 0 {
                    tracing::error!(
                        offset = range.offset,
                        length = range.length,
                        remaining,
                        "Payload ended inside a requested range"
                    );
                    Err::<(), _>(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "payload shorter than requested range",
                    ))?;
                }
                remaining -= n as u64;
                metrics::BYTES_STREAMED.inc_by(n as u64);
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        }
    }
}

/// Default content type of payload downloads.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// A 200 attachment response around `body`. `Content-Length` is only sent
/// when the exact length is known up front.
pub fn attachment(
    body: BodyStream,
    filename: &str,
    content_type: &str,
    length: Option<u64>,
) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", sanitize_filename(filename));
    let mut response = (
        StatusCode::OK,
        [
            (CONTENT_TYPE, content_type.to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(body),
    )
        .into_response();
    if let Some(length) = length {
        response
            .headers_mut()
            .insert(CONTENT_LENGTH, axum::http::HeaderValue::from(length));
    }
    response
}

/// Keep a client-supplied filename from breaking out of the quoted header value.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect()
}
