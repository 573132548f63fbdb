//! HTTP transfer agent on reqwest streaming bodies.

use super::{StartFrom, TransferAgent, TransferEvent, TransferOutcome, TransferRequest};
use crate::config::TransferConfig;
use crate::error::{Error, Result, TransferError};
use crate::retry::with_retry;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use std::path::Path;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Result of a single request/stream pass
enum Pass {
    Finished(u64),
    Paused(u64),
}

/// [`TransferAgent`] that downloads over HTTP(S)
///
/// - `Range: bytes=N-` continuation when starting from an offset; a server that ignores
///   the range (200 instead of 206) restarts the file from zero
/// - request-level failures (connect errors, 408/429/5xx) retried with exponential backoff
/// - a stream that breaks or stalls for `idle_timeout` is continued from the bytes on
///   disk, at most `resume_attempts` times
#[derive(Clone, Debug)]
pub struct HttpTransferAgent {
    client: reqwest::Client,
    config: TransferConfig,
}

impl HttpTransferAgent {
    /// Build an agent with its own connection pool
    pub fn new(config: TransferConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                Error::Io(std::io::Error::other(format!(
                    "Failed to create HTTP client: {}",
                    e
                )))
            })?;

        Ok(Self { client, config })
    }

    /// Send the request for `offset`, retrying transient failures
    async fn send(
        &self,
        url: &str,
        offset: u64,
        events: &mpsc::UnboundedSender<TransferEvent>,
    ) -> std::result::Result<reqwest::Response, TransferError> {
        let mut calls = 0u32;
        with_retry(&self.config.retry, || {
            calls += 1;
            if calls > 1 {
                let _ = events.send(TransferEvent::Retry { attempt: calls - 1 });
            }

            let mut request = self.client.get(url);
            if offset > 0 {
                request = request.header(reqwest::header::RANGE, format!("bytes={}-", offset));
            }

            async move {
                let response = request.send().await.map_err(|e| TransferError::Request {
                    url: url.to_string(),
                    reason: e.to_string(),
                    transient: e.is_timeout() || e.is_connect(),
                })?;

                let status = response.status();
                if status.is_success() || status == StatusCode::RANGE_NOT_SATISFIABLE {
                    Ok(response)
                } else {
                    Err(TransferError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    })
                }
            }
        })
        .await
    }

    /// One request plus body stream, starting at `offset`
    async fn pass(
        &self,
        request: &TransferRequest,
        offset: u64,
        events: &mpsc::UnboundedSender<TransferEvent>,
        pause: &CancellationToken,
    ) -> std::result::Result<Pass, TransferError> {
        let response = tokio::select! {
            biased;
            _ = pause.cancelled() => return Ok(Pass::Paused(offset)),
            response = self.send(&request.url, offset, events) => response?,
        };

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
            // Nothing past our offset: the bytes on disk are the whole file
            tracing::debug!(url = %request.url, offset, "range not satisfiable, file already complete");
            let _ = events.send(TransferEvent::Skip);
            return Ok(Pass::Finished(offset));
        }
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Err(TransferError::Status {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        let resuming = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        if offset > 0 && !resuming {
            tracing::warn!(url = %request.url, "server ignored the byte range, restarting from zero");
        }

        let mut file = open_target(&request.target, resuming).await?;
        let mut received = if resuming { offset } else { 0 };
        let total = if request.expected_size > 0 {
            request.expected_size
        } else {
            response
                .content_length()
                .map(|len| len + received)
                .unwrap_or(0)
        };

        let _ = events.send(TransferEvent::Download {
            offset: received,
            total,
        });

        let mut stream = response.bytes_stream();
        let mut last_progress = Instant::now();

        loop {
            let next = tokio::select! {
                biased;
                _ = pause.cancelled() => {
                    flush(&mut file, &request.target).await?;
                    return Ok(Pass::Paused(received));
                }
                next = tokio::time::timeout(self.config.idle_timeout, stream.next()) => next,
            };

            let chunk = match next {
                Err(_) => {
                    flush(&mut file, &request.target).await?;
                    return Err(TransferError::Timeout(self.config.idle_timeout));
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    tracing::debug!(url = %request.url, received, error = %e, "body stream broke");
                    flush(&mut file, &request.target).await?;
                    return Err(TransferError::Incomplete {
                        received,
                        expected: total,
                    });
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            file.write_all(&chunk)
                .await
                .map_err(|source| TransferError::Write {
                    path: request.target.clone(),
                    source,
                })?;
            received += chunk.len() as u64;

            if last_progress.elapsed() >= self.config.progress_interval {
                last_progress = Instant::now();
                let _ = events.send(TransferEvent::Progress { received, total });
            }
        }

        flush(&mut file, &request.target).await?;

        if total > 0 && received < total {
            return Err(TransferError::Incomplete {
                received,
                expected: total,
            });
        }

        let _ = events.send(TransferEvent::Progress { received, total });
        Ok(Pass::Finished(received))
    }
}

async fn open_target(
    path: &Path,
    append: bool,
) -> std::result::Result<tokio::fs::File, TransferError> {
    let result = if append {
        tokio::fs::OpenOptions::new().append(true).open(path).await
    } else {
        tokio::fs::File::create(path).await
    };
    result.map_err(|source| TransferError::Write {
        path: path.to_path_buf(),
        source,
    })
}

async fn flush(
    file: &mut tokio::fs::File,
    path: &Path,
) -> std::result::Result<(), TransferError> {
    file.flush().await.map_err(|source| TransferError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl TransferAgent for HttpTransferAgent {
    async fn start(
        &self,
        request: TransferRequest,
        events: mpsc::UnboundedSender<TransferEvent>,
        pause: CancellationToken,
    ) -> std::result::Result<TransferOutcome, TransferError> {
        let mut offset = match request.start {
            StartFrom::Beginning => 0,
            StartFrom::Offset(n) => n,
        };
        let mut resumes = 0;

        loop {
            match self.pass(&request, offset, &events, &pause).await {
                Ok(Pass::Finished(bytes)) => {
                    let _ = events.send(TransferEvent::End { bytes });
                    return Ok(TransferOutcome::Completed { bytes });
                }
                Ok(Pass::Paused(bytes)) => {
                    tracing::debug!(url = %request.url, bytes, "transfer paused");
                    let _ = events.send(TransferEvent::Pause { received: bytes });
                    return Ok(TransferOutcome::Paused { bytes });
                }
                Err(TransferError::Incomplete { received, .. })
                    if resumes < self.config.resume_attempts =>
                {
                    resumes += 1;
                    offset = received;
                    tracing::info!(
                        url = %request.url,
                        offset,
                        attempt = resumes,
                        "continuing incomplete transfer"
                    );
                    let _ = events.send(TransferEvent::Resume {
                        offset,
                        attempt: resumes,
                    });
                }
                Err(TransferError::Timeout(idle)) if resumes < self.config.resume_attempts => {
                    resumes += 1;
                    offset = file_len(&request.target).await;
                    tracing::info!(
                        url = %request.url,
                        offset,
                        idle_ms = idle.as_millis() as u64,
                        attempt = resumes,
                        "transfer stalled, continuing"
                    );
                    let _ = events.send(TransferEvent::Resume {
                        offset,
                        attempt: resumes,
                    });
                }
                Err(e) => {
                    let _ = events.send(TransferEvent::Error {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
    }
}

async fn file_len(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .unwrap_or(0)
}
