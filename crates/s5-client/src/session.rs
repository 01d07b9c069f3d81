//! Resumable upload sessions
//!
//! A session negotiates a tus upload (resuming a previous one for the same
//! fingerprint when the portal still knows it), then streams the prepared
//! body in chunks. Each PATCH starts at the offset the portal acknowledged
//! last, so an interrupted session never resends acknowledged bytes.

use crate::{
    resume::{PreviousUpload, UrlStorage},
    tus::TusClient,
    types::{ProgressCallback, UploadProgress, UploadResult},
    upload::{PreparedUpload, UploadSource},
    ClientError, Config, Result, S5Client,
};
use chrono::Utc;
use futures::StreamExt;
use s5_crypto::EncryptionKey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Lifecycle of an upload session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    /// Looking for a resumable upload or creating a new one
    Negotiating,
    Uploading { offset: u64 },
    /// Stopped by cancellation; can be resumed by a new session
    Paused { offset: u64 },
    Completed,
    Failed { message: String },
}

impl SessionState {
    /// Bytes known to be stored by the portal
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::Uploading { offset } | Self::Paused { offset } => Some(*offset),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Paused { .. } | Self::Completed | Self::Failed { .. })
    }
}

/// Walks the configured delay schedule for consecutive failures
#[derive(Debug)]
struct RetryState {
    delays: Vec<Duration>,
    window: Duration,
    attempt: usize,
    first_failure: Option<Instant>,
}

impl RetryState {
    fn new(config: &Config) -> Self {
        Self {
            delays: config.retry_delays.clone(),
            window: config.max_retry_window,
            attempt: 0,
            first_failure: None,
        }
    }

    /// Delay before the next attempt, or `None` once retries are exhausted
    fn next_delay(&mut self) -> Option<Duration> {
        let now = Instant::now();
        let first = *self.first_failure.get_or_insert(now);
        if now.duration_since(first) > self.window {
            return None;
        }
        let delay = self.delays.get(self.attempt).copied()?;
        self.attempt += 1;
        Some(delay)
    }

    /// Called after any successful request
    fn reset(&mut self) {
        self.attempt = 0;
        self.first_failure = None;
    }
}

/// A single resumable transfer
pub(crate) struct UploadSession {
    client: S5Client,
    source: Arc<dyn UploadSource>,
    prepared: PreparedUpload,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
}

impl UploadSession {
    pub fn new(
        client: S5Client,
        source: Arc<dyn UploadSource>,
        prepared: PreparedUpload,
        progress: Option<ProgressCallback>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Created);
        Self {
            client,
            source,
            prepared,
            progress,
            cancel: CancellationToken::new(),
            state,
        }
    }

    /// Run the session on the runtime
    pub fn spawn(self) -> UploadHandle {
        let span = info_span!("tus_upload", fingerprint = %self.prepared.fingerprint());
        let handle_state = self.state.subscribe();
        let cancel = self.cancel.clone();
        let result = self.prepared.result();
        let key = self.prepared.key().cloned();

        let task = tokio::spawn(self.run().instrument(span));
        UploadHandle {
            cancel,
            state: handle_state,
            result,
            key,
            task,
        }
    }

    async fn run(self) -> Result<UploadResult> {
        let outcome = self.transfer().await;
        match &outcome {
            Ok(_) => self.set_state(SessionState::Completed),
            Err(ClientError::Cancelled { offset }) => {
                info!(offset, "Upload paused");
                self.set_state(SessionState::Paused { offset: *offset });
            }
            Err(e) => {
                warn!(error = %e, "Upload failed");
                self.set_state(SessionState::Failed {
                    message: e.to_string(),
                });
            }
        }
        outcome
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    async fn transfer(&self) -> Result<UploadResult> {
        let tus = TusClient::new(&self.client);
        let total = self.prepared.upload_size;
        let mut retry = RetryState::new(self.client.config());

        self.set_state(SessionState::Negotiating);
        let (upload_url, mut offset) = loop {
            if self.cancel.is_cancelled() {
                return Err(ClientError::Cancelled { offset: 0 });
            }
            match self.negotiate(&tus).await {
                Ok(found) => break found,
                Err(e) if e.is_retryable() => self.wait_for_retry(&mut retry, e, 0).await?,
                Err(e) => return Err(e),
            }
        };
        retry.reset();

        let mut reported = 0;
        self.advance(offset, &mut reported);

        'transfer: while offset < total {
            let mut body = self
                .prepared
                .open_body(self.source.as_ref(), offset)
                .await?;

            while offset < total {
                if self.cancel.is_cancelled() {
                    return Err(ClientError::Cancelled { offset });
                }
                let chunk = match body.next().await {
                    Some(chunk) => chunk?,
                    None => {
                        return Err(ClientError::Validation(format!(
                            "source ended at offset {offset} of {total}"
                        )))
                    }
                };
                let expected = offset + chunk.len() as u64;

                let sent = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(ClientError::Cancelled { offset }),
                    sent = tus.patch(&upload_url, offset, chunk) => sent,
                };

                match sent {
                    Ok(acknowledged) if acknowledged > offset && acknowledged <= total => {
                        retry.reset();
                        offset = acknowledged;
                        self.advance(offset, &mut reported);
                        if acknowledged != expected {
                            debug!(acknowledged, expected, "Portal offset moved, reopening body");
                            continue 'transfer;
                        }
                    }
                    Ok(acknowledged) => {
                        let e = ClientError::InvalidResponse(format!(
                            "PATCH at offset {offset} acknowledged offset {acknowledged} of {total}"
                        ));
                        offset = self.recover(&tus, &upload_url, &mut retry, e, offset).await?;
                        self.advance(offset, &mut reported);
                        continue 'transfer;
                    }
                    Err(e) if e.is_retryable() => {
                        offset = self.recover(&tus, &upload_url, &mut retry, e, offset).await?;
                        self.advance(offset, &mut reported);
                        continue 'transfer;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.client
            .url_storage()
            .remove_upload(&self.prepared.fingerprint(), &upload_url)
            .await?;
        info!(cid = %self.prepared.cid(), size = total, "Resumable upload complete");
        Ok(self.prepared.result())
    }

    /// Find a resumable upload for this fingerprint or create a new one
    async fn negotiate(&self, tus: &TusClient<'_>) -> Result<(String, u64)> {
        let fingerprint = self.prepared.fingerprint();
        let size = self.prepared.upload_size;
        let storage = self.client.url_storage();

        for previous in storage.find_uploads_by_fingerprint(&fingerprint).await? {
            if previous.size != size {
                storage.remove_upload(&fingerprint, &previous.upload_url).await?;
                continue;
            }
            match tus.head(&previous.upload_url).await {
                Ok(offset) if offset <= size => {
                    info!(upload_url = %previous.upload_url, offset, "Resuming previous upload");
                    return Ok((previous.upload_url, offset));
                }
                Ok(offset) => {
                    warn!(upload_url = %previous.upload_url, offset, size, "Previous upload overran, discarding");
                    storage.remove_upload(&fingerprint, &previous.upload_url).await?;
                }
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(upload_url = %previous.upload_url, error = %e, "Discarding stale upload record");
                    storage.remove_upload(&fingerprint, &previous.upload_url).await?;
                }
            }
        }

        let upload_url = tus.create(size, &self.prepared.tus_metadata()).await?;
        storage
            .add_upload(PreviousUpload {
                fingerprint,
                upload_url: upload_url.clone(),
                creation_time: Utc::now(),
                size,
            })
            .await?;
        Ok((upload_url, 0))
    }

    /// Wait out the retry schedule and ask the portal where to continue.
    ///
    /// Unacknowledged failures count against the schedule, including PATCH
    /// replies that do not move the offset forward.
    async fn recover(
        &self,
        tus: &TusClient<'_>,
        upload_url: &str,
        retry: &mut RetryState,
        mut error: ClientError,
        offset: u64,
    ) -> Result<u64> {
        loop {
            self.wait_for_retry(retry, error, offset).await?;
            match tus.head(upload_url).await {
                Ok(server_offset) if server_offset > self.prepared.upload_size => {
                    return Err(ClientError::InvalidResponse(format!(
                        "portal reports offset {server_offset} beyond upload length {}",
                        self.prepared.upload_size
                    )))
                }
                Ok(server_offset) => return Ok(server_offset),
                Err(e) if e.is_retryable() => error = e,
                Err(e) => return Err(e),
            }
        }
    }

    /// Sleep for the next scheduled delay; fails with `error` once the schedule is spent
    async fn wait_for_retry(&self, retry: &mut RetryState, error: ClientError, offset: u64) -> Result<()> {
        let Some(delay) = retry.next_delay() else {
            return Err(error);
        };
        warn!(error = %error, attempt = retry.attempt, ?delay, offset, "Request failed, retrying");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClientError::Cancelled { offset }),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Publish a new acknowledged offset; progress never goes backwards
    fn advance(&self, offset: u64, reported: &mut u64) {
        self.set_state(SessionState::Uploading { offset });
        if offset <= *reported {
            return;
        }
        *reported = offset;
        if let Some(progress) = &self.progress {
            progress(UploadProgress {
                bytes_uploaded: offset,
                total_bytes: self.prepared.upload_size,
            });
        }
    }
}

/// Handle to a running upload session
pub struct UploadHandle {
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
    result: UploadResult,
    key: Option<EncryptionKey>,
    task: JoinHandle<Result<UploadResult>>,
}

impl UploadHandle {
    /// Stop after the in-flight request; the session ends `Paused`
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Key the content is encrypted with, if any
    pub fn key(&self) -> Option<&EncryptionKey> {
        self.key.as_ref()
    }

    /// CID the content will have once complete
    pub fn cid(&self) -> &str {
        &self.result.cid
    }

    /// Wait for the session to finish
    pub async fn wait(self) -> Result<UploadResult> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(ClientError::Cancelled {
                offset: self.state.borrow().offset().unwrap_or(0),
            }),
        }
    }
}
