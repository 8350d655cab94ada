//! Per-item image downloads with progress, decoupled from whoever displays them.
//!
//! Worker tasks never call observers directly. They post messages to a channel
//! owned by the [`DownloadTracker`], and only the tracker's owner delivers them
//! by calling [`DownloadTracker::dispatch_pending`] or
//! [`DownloadTracker::run_until_idle`]. Each download lives in an arena slot
//! addressed by a generational [`DownloadId`]; dropping the [`DownloadHandle`]
//! aborts the worker and turns every later message for that slot into a no-op.

use crate::error::DownloadError;
use crate::media_client::MediaClient;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use image::DynamicImage;
use reqwest::{Client, Url};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Upper bound for preallocating the body buffer from an announced length.
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// An opened download: the announced length (if any) and the body chunks.
pub struct DownloadStream {
    pub expected_len: Option<u64>,
    pub chunks: BoxStream<'static, Result<Bytes, DownloadError>>,
}

pub(crate) async fn open_stream(
    client: &Client,
    url: &Url,
) -> Result<DownloadStream, DownloadError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(DownloadError::Network)?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Server(status));
    }

    let expected_len = response.content_length();
    let chunks = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(DownloadError::Network));
    Ok(DownloadStream {
        expected_len,
        chunks: Box::pin(chunks),
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    /// Fraction in `0.0..=1.0`
    Determinate(f32),
    /// The server did not announce a (non-zero) length.
    Indeterminate { bytes_written: u64 },
}

impl Progress {
    pub fn fraction(&self) -> Option<f32> {
        match self {
            Progress::Determinate(fraction) => Some(*fraction),
            Progress::Indeterminate { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadState::Completed | DownloadState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSession {
    pub url: Url,
    pub bytes_written: u64,
    pub bytes_expected: Option<u64>,
    pub state: DownloadState,
}

/// Receives the notifications of one download, always from the tracker's owner.
pub trait DownloadObserver {
    fn on_progress(&mut self, progress: Progress);

    fn on_complete(&mut self, image: DynamicImage);

    fn on_failed(&mut self, error: DownloadError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DownloadId {
    index: usize,
    generation: u64,
}

/// Owner side of a download. Dropping it cancels the download.
pub struct DownloadHandle {
    id: DownloadId,
    alive: Arc<AtomicBool>,
    abort: AbortHandle,
}

impl DownloadHandle {
    pub fn id(&self) -> DownloadId {
        self.id
    }

    /// Same as dropping the handle.
    pub fn cancel(self) {}
}

impl Drop for DownloadHandle {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        self.abort.abort();
    }
}

enum WorkerMessage {
    Started { bytes_expected: Option<u64> },
    Progress { bytes_written: u64, progress: Progress },
    Completed(DynamicImage),
    Failed(DownloadError),
}

struct Envelope {
    id: DownloadId,
    message: WorkerMessage,
}

struct Subscription {
    observer: Box<dyn DownloadObserver>,
    session: DownloadSession,
    alive: Arc<AtomicBool>,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    subscription: Option<Subscription>,
}

pub struct DownloadTracker<C> {
    client: Arc<C>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl<C: MediaClient + 'static> DownloadTracker<C> {
    pub fn new(client: Arc<C>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            client,
            slots: Vec::new(),
            free: Vec::new(),
            sender,
            receiver,
        }
    }

    /// Spawns one download task for `url`. There is no cap on concurrent downloads.
    pub fn start_download(
        &mut self,
        url: Url,
        observer: impl DownloadObserver + 'static,
    ) -> DownloadHandle {
        self.reap();

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.generation += 1;
        let id = DownloadId {
            index,
            generation: slot.generation,
        };

        let alive = Arc::new(AtomicBool::new(true));
        slot.subscription = Some(Subscription {
            observer: Box::new(observer),
            session: DownloadSession {
                url: url.clone(),
                bytes_written: 0,
                bytes_expected: None,
                state: DownloadState::Pending,
            },
            alive: Arc::clone(&alive),
        });

        tracing::debug!("Starting download of {}", url);
        let task = tokio::spawn(run_download(
            Arc::clone(&self.client),
            url,
            id,
            self.sender.clone(),
        ));

        DownloadHandle {
            id,
            alive,
            abort: task.abort_handle(),
        }
    }

    pub fn session(&self, id: DownloadId) -> Option<&DownloadSession> {
        let slot = self.slots.get(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.subscription
            .as_ref()
            .filter(|s| s.alive.load(Ordering::Acquire))
            .map(|s| &s.session)
    }

    /// Number of live downloads that have not finished yet.
    pub fn active_count(&self) -> usize {
        self.live_subscriptions()
            .filter(|s| !s.session.state.is_terminal())
            .count()
    }

    /// Delivers every notification that has already arrived, without waiting.
    /// Returns how many reached an observer.
    pub fn dispatch_pending(&mut self) -> usize {
        self.reap();
        let mut delivered = 0;
        while let Ok(envelope) = self.receiver.try_recv() {
            if self.deliver(envelope) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Waits for and delivers notifications until no live download is running.
    pub async fn run_until_idle(&mut self) {
        loop {
            self.reap();
            if self.active_count() == 0 {
                break;
            }
            match self.receiver.recv().await {
                Some(envelope) => {
                    self.deliver(envelope);
                }
                None => break,
            }
        }
    }

    fn live_subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.slots
            .iter()
            .filter_map(|slot| slot.subscription.as_ref())
            .filter(|s| s.alive.load(Ordering::Acquire))
    }

    /// Frees the slots of discarded handles.
    fn reap(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let discarded = slot
                .subscription
                .as_ref()
                .is_some_and(|s| !s.alive.load(Ordering::Acquire));
            if discarded {
                slot.subscription = None;
                self.free.push(index);
            }
        }
    }

    fn deliver(&mut self, envelope: Envelope) -> bool {
        let Some(slot) = self.slots.get_mut(envelope.id.index) else {
            return false;
        };
        if slot.generation != envelope.id.generation {
            return false;
        }
        let Some(subscription) = slot.subscription.as_mut() else {
            return false;
        };
        if !subscription.alive.load(Ordering::Acquire) || subscription.session.state.is_terminal()
        {
            return false;
        }

        let session = &mut subscription.session;
        match envelope.message {
            WorkerMessage::Started { bytes_expected } => {
                session.bytes_expected = bytes_expected;
                session.state = DownloadState::InProgress;
                false
            }
            WorkerMessage::Progress {
                bytes_written,
                progress,
            } => {
                session.bytes_written = bytes_written;
                session.state = DownloadState::InProgress;
                subscription.observer.on_progress(progress);
                true
            }
            WorkerMessage::Completed(image) => {
                session.state = DownloadState::Completed;
                subscription.observer.on_complete(image);
                true
            }
            WorkerMessage::Failed(error) => {
                session.state = DownloadState::Failed;
                subscription.observer.on_failed(error);
                true
            }
        }
    }
}

/// Turns byte counts into monotonic progress values.
struct ProgressMeter {
    bytes_expected: Option<u64>,
    bytes_written: u64,
    last_fraction: f32,
}

impl ProgressMeter {
    fn new(bytes_expected: Option<u64>) -> Self {
        Self {
            bytes_expected,
            bytes_written: 0,
            last_fraction: 0.0,
        }
    }

    fn advance(&mut self, chunk_len: u64) -> Progress {
        self.bytes_written += chunk_len;
        match self.bytes_expected {
            Some(total) if total > 0 => {
                let fraction = (self.bytes_written as f64 / total as f64).min(1.0) as f32;
                self.last_fraction = self.last_fraction.max(fraction);
                Progress::Determinate(self.last_fraction)
            }
            _ => Progress::Indeterminate {
                bytes_written: self.bytes_written,
            },
        }
    }
}

/// Worker side of the channel. If the worker goes away before reporting a
/// result (panic or abort), dropping the reporter posts `WorkerLost`.
struct Reporter {
    id: DownloadId,
    sender: mpsc::UnboundedSender<Envelope>,
    finished: bool,
}

impl Reporter {
    fn send(&self, message: WorkerMessage) {
        // A closed channel means the tracker is gone; nobody is left to notify.
        let _ = self.sender.send(Envelope {
            id: self.id,
            message,
        });
    }

    fn finish(mut self, message: WorkerMessage) {
        self.finished = true;
        self.send(message);
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if !self.finished {
            self.send(WorkerMessage::Failed(DownloadError::WorkerLost));
        }
    }
}

async fn run_download<C: MediaClient>(
    client: Arc<C>,
    url: Url,
    id: DownloadId,
    sender: mpsc::UnboundedSender<Envelope>,
) {
    let reporter = Reporter {
        id,
        sender,
        finished: false,
    };

    match fetch_image(client.as_ref(), &url, &reporter).await {
        Ok(image) => reporter.finish(WorkerMessage::Completed(image)),
        Err(e) => {
            if matches!(e, DownloadError::Decode(_)) {
                tracing::warn!("Downloaded {} but could not decode it: {}", url, e);
            } else {
                tracing::debug!("Download of {} failed: {}", url, e);
            }
            reporter.finish(WorkerMessage::Failed(e));
        }
    }
}

async fn fetch_image<C: MediaClient>(
    client: &C,
    url: &Url,
    reporter: &Reporter,
) -> Result<DynamicImage, DownloadError> {
    let DownloadStream {
        expected_len,
        mut chunks,
    } = client.open_download(url).await?;
    reporter.send(WorkerMessage::Started {
        bytes_expected: expected_len,
    });

    let mut meter = ProgressMeter::new(expected_len);
    let capacity = expected_len.unwrap_or(0).min(MAX_PREALLOCATION) as usize;
    let mut body = Vec::with_capacity(capacity);

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        body.extend_from_slice(&chunk);
        let progress = meter.advance(chunk.len() as u64);
        reporter.send(WorkerMessage::Progress {
            bytes_written: meter.bytes_written,
            progress,
        });
    }

    if let Some(expected) = expected_len
        && meter.bytes_written < expected
    {
        return Err(DownloadError::Truncated {
            expected,
            received: meter.bytes_written,
        });
    }

    Ok(image::load_from_memory(&body)?)
}
