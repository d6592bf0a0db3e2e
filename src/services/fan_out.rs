//! Fan-out of one upload stream to the original copy and its variants.
//!
//! The source is read exactly once. A broadcast stage republishes every chunk
//! into bounded queues, so the slowest consumer sets the read rate. The raw
//! copy and each verbatim copy get a queue of their own. Encoded variants of
//! one file share a single queue whose consumer buffers the file once, and only
//! while it holds an encode slot; until then its full queue holds up the reader.
//! Every destination always finishes with either a complete file on disk or
//! nothing at all.

use crate::error::UploadError;
use crate::models::{Branch, BranchError, StoredFile, UploadSpec, VariantSpec};
use crate::services::encoder::{VariantEncoder, shared_encode_slots};
use crate::utils::naming::{THUMBNAILS_DIR, generate_stored_name};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

/// What travels through a branch queue. A queue that closes without `End`
/// means the upload was abandoned.
#[derive(Debug, Clone)]
enum Frame {
    Data(Bytes),
    End,
}

/// Where and how one file is stored.
#[derive(Debug, Clone)]
pub struct FanOutTarget {
    pub dir: PathBuf,
    pub name_prefix: Option<String>,
    pub original_extension: String,
    pub variants: Vec<VariantSpec>,
    pub skip_transform: bool,
}

impl FanOutTarget {
    pub fn from_spec(spec: &UploadSpec, original_extension: String, content_type: Option<&str>) -> Self {
        Self {
            dir: spec.storage_dir.clone(),
            name_prefix: spec.name_prefix.clone(),
            original_extension,
            variants: spec.variants.clone(),
            skip_transform: spec.skips_transform(content_type),
        }
    }
}

pub struct FanOutWriter {
    encoder: Arc<dyn VariantEncoder>,
    queue_depth: usize,
    encode_slots: Arc<Semaphore>,
}

impl FanOutWriter {
    /// Uses the process-wide encode slots from [`EncoderConfig`](crate::config::EncoderConfig).
    pub fn new(encoder: Arc<dyn VariantEncoder>, queue_depth: usize) -> Self {
        Self {
            encoder,
            queue_depth: queue_depth.max(1),
            encode_slots: shared_encode_slots(),
        }
    }

    /// Gives this writer its own pool of `slots` files that may be buffered
    /// for encoding at once.
    pub fn with_encode_slots(mut self, slots: usize) -> Self {
        self.encode_slots = Arc::new(Semaphore::new(slots.max(1)));
        self
    }

    /// Stores `source` as the original plus every variant of `target`.
    ///
    /// `Err` is returned only when the source itself fails; every branch is
    /// then removed. Branch failures are reported in the outcome instead.
    pub async fn write<S>(&self, source: S, target: &FanOutTarget) -> Result<FanOutOutcome, UploadError>
    where
        S: Stream<Item = Result<Bytes, UploadError>>,
    {
        let in_flight = self.begin(target).await?.pump(source).await?;
        Ok(in_flight.finish().await)
    }

    /// Names the file and starts its consumer tasks, all waiting for data.
    pub async fn begin(&self, target: &FanOutTarget) -> Result<PendingFanOut, UploadError> {
        let thumbnails_dir = target.dir.join(THUMBNAILS_DIR);
        if !target.variants.is_empty() {
            tokio::fs::create_dir_all(&thumbnails_dir).await?;
        } else {
            tokio::fs::create_dir_all(&target.dir).await?;
        }

        let generated_name =
            generate_stored_name(target.name_prefix.as_deref(), &target.original_extension);
        let final_path = target.dir.join(&generated_name);

        let outputs: Vec<(VariantSpec, PathBuf)> = target
            .variants
            .iter()
            .map(|spec| (*spec, target.dir.join(spec.relative_path(&generated_name))))
            .collect();

        let mut senders = Vec::with_capacity(outputs.len() + 1);
        let mut tasks = Vec::with_capacity(outputs.len() + 1);

        let (tx, rx) = mpsc::channel(self.queue_depth);
        senders.push(tx);
        tasks.push(spawn_branch(
            Branch::Original,
            write_stream(rx, final_path.clone()),
        ));

        if target.skip_transform {
            for (spec, path) in outputs {
                let (tx, rx) = mpsc::channel(self.queue_depth);
                senders.push(tx);
                tasks.push(spawn_branch(Branch::Variant(spec), write_stream(rx, path)));
            }
        } else if !outputs.is_empty() {
            let (tx, rx) = mpsc::channel(self.queue_depth);
            senders.push(tx);
            let branches = outputs.iter().map(|(spec, _)| Branch::Variant(*spec)).collect();
            let handle = tokio::spawn(write_encoded(
                rx,
                outputs,
                self.encoder.clone(),
                self.encode_slots.clone(),
            ));
            tasks.push(BranchTask { branches, handle });
        }

        tracing::debug!(
            "Fan-out for {} started with {} queues",
            generated_name,
            senders.len()
        );

        Ok(PendingFanOut {
            senders,
            in_flight: InFlightFanOut {
                generated_name,
                original_extension: target.original_extension.clone(),
                final_path,
                skip_transform: target.skip_transform,
                tasks,
            },
        })
    }
}

/// Branch tasks are running and waiting for the source.
pub struct PendingFanOut {
    senders: Vec<mpsc::Sender<Frame>>,
    in_flight: InFlightFanOut,
}

impl PendingFanOut {
    pub fn generated_name(&self) -> &str {
        &self.in_flight.generated_name
    }

    /// Reads the source to its end, handing every chunk to every live branch.
    ///
    /// On a source error the queues are closed without an end marker, every
    /// branch deletes what it wrote, and the error is returned once they have.
    pub async fn pump<S>(mut self, source: S) -> Result<InFlightFanOut, UploadError>
    where
        S: Stream<Item = Result<Bytes, UploadError>>,
    {
        let mut source = std::pin::pin!(source);

        while let Some(next) = source.next().await {
            match next {
                Ok(chunk) if chunk.is_empty() => continue,
                Ok(chunk) => self.broadcast(Frame::Data(chunk)).await,
                Err(err) => {
                    tracing::warn!(
                        "Source for {} failed, aborting all branches: {}",
                        self.in_flight.generated_name,
                        err
                    );
                    self.senders.clear();
                    self.in_flight.finish().await;
                    return Err(err);
                }
            }
        }

        self.broadcast(Frame::End).await;
        Ok(self.in_flight)
    }

    /// Sends to every branch in turn; a full queue holds up the reader.
    /// Branches that already gave up are dropped from the set.
    async fn broadcast(&mut self, frame: Frame) {
        let mut live = Vec::with_capacity(self.senders.len());
        for tx in self.senders.drain(..) {
            if tx.send(frame.clone()).await.is_ok() {
                live.push(tx);
            }
        }
        self.senders = live;
    }
}

/// The source has been fully read; branches may still be encoding.
pub struct InFlightFanOut {
    generated_name: String,
    original_extension: String,
    final_path: PathBuf,
    skip_transform: bool,
    tasks: Vec<BranchTask>,
}

type BranchResult = (Branch, Result<PathBuf, UploadError>);

/// A spawned consumer and the destinations it reports for.
struct BranchTask {
    branches: Vec<Branch>,
    handle: JoinHandle<Vec<BranchResult>>,
}

impl InFlightFanOut {
    /// Waits for every branch.
    pub async fn finish(self) -> FanOutOutcome {
        let mut variant_paths = HashMap::new();
        let mut written = Vec::new();
        let mut errors = Vec::new();

        let results = futures::future::join_all(self.tasks.into_iter().map(|task| async move {
            match task.handle.await {
                Ok(results) => results,
                Err(join_err) => {
                    let message = join_err.to_string();
                    task.branches
                        .into_iter()
                        .map(|branch| {
                            tracing::error!("Fan-out branch {} task failed: {}", branch, message);
                            (branch, Err(UploadError::Io(std::io::Error::other(message.clone()))))
                        })
                        .collect()
                }
            }
        }))
        .await;

        for (branch, result) in results.into_iter().flatten() {
            match result {
                Ok(path) => {
                    if let Branch::Variant(spec) = branch
                        && !self.skip_transform
                    {
                        variant_paths.insert(spec, path.clone());
                    }
                    written.push(path);
                }
                Err(error) => errors.push(BranchError { branch, error }),
            }
        }

        // Exempt files report the raw copy as their single variant
        if self.skip_transform {
            variant_paths.insert(VariantSpec::ORIGINAL, self.final_path.clone());
        }

        FanOutOutcome {
            file: StoredFile {
                generated_name: self.generated_name,
                original_extension: self.original_extension,
                final_path: self.final_path,
                variant_paths,
            },
            written,
            errors,
        }
    }
}

#[derive(Debug)]
pub struct FanOutOutcome {
    pub file: StoredFile,
    /// Every path that was completely written, verbatim copies included.
    pub written: Vec<PathBuf>,
    /// Empty means every branch succeeded.
    pub errors: Vec<BranchError>,
}

impl FanOutOutcome {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// The original is the canonical artifact; without it the file is lost.
    pub fn original_failed(&self) -> bool {
        self.errors
            .iter()
            .any(|e| e.branch == Branch::Original)
    }

    /// Removes everything this fan-out wrote and returns the branch errors.
    pub async fn discard(self) -> Vec<BranchError> {
        for path in &self.written {
            let _ = tokio::fs::remove_file(path).await;
        }
        self.errors
    }
}

fn spawn_branch<F>(branch: Branch, task: F) -> BranchTask
where
    F: std::future::Future<Output = Result<PathBuf, UploadError>> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let result = task.await;
        if let Err(e) = &result {
            tracing::debug!("Branch {} failed: {}", branch, e);
        }
        vec![(branch, result)]
    });
    BranchTask {
        branches: vec![branch],
        handle,
    }
}

fn abandoned() -> UploadError {
    UploadError::UpstreamDisconnect("upload ended before the file was complete".to_string())
}

/// Streams the queue straight into `path`.
async fn write_stream(mut rx: mpsc::Receiver<Frame>, path: PathBuf) -> Result<PathBuf, UploadError> {
    let mut file = tokio::fs::File::create(&path).await?;

    let result: Result<(), UploadError> = async {
        loop {
            match rx.recv().await {
                Some(Frame::Data(chunk)) => file.write_all(&chunk).await?,
                Some(Frame::End) => {
                    file.flush().await?;
                    return Ok(());
                }
                None => return Err(abandoned()),
            }
        }
    }
    .await;

    drop(file);
    finish_branch(result, path).await
}

/// Waits for an encode slot, buffers the file once, then derives every
/// variant from that buffer in turn.
///
/// The queue is not read while waiting, so the reader stalls instead of
/// this task buffering files it cannot encode yet.
async fn write_encoded(
    mut rx: mpsc::Receiver<Frame>,
    outputs: Vec<(VariantSpec, PathBuf)>,
    encoder: Arc<dyn VariantEncoder>,
    slots: Arc<Semaphore>,
) -> Vec<BranchResult> {
    let _slot = match slots.acquire_owned().await {
        Ok(slot) => slot,
        Err(e) => {
            let message = e.to_string();
            return fail_all(&outputs, || UploadError::Encode(message.clone()));
        }
    };

    let mut input = BytesMut::new();
    loop {
        match rx.recv().await {
            Some(Frame::Data(chunk)) => input.extend_from_slice(&chunk),
            Some(Frame::End) => break,
            None => return fail_all(&outputs, abandoned),
        }
    }
    // Nothing more is needed from the reader
    drop(rx);
    let input = input.freeze();

    let mut results = Vec::with_capacity(outputs.len());
    for (spec, path) in outputs {
        let result = encode_to(encoder.as_ref(), input.clone(), spec, &path).await;
        let result = finish_branch(result, path).await;
        if let Err(e) = &result {
            tracing::debug!("Branch {} failed: {}", Branch::Variant(spec), e);
        }
        results.push((Branch::Variant(spec), result));
    }
    results
}

async fn encode_to(
    encoder: &dyn VariantEncoder,
    input: Bytes,
    spec: VariantSpec,
    path: &Path,
) -> Result<(), UploadError> {
    let encoded = encoder.transform(input, spec).await?;
    tokio::fs::write(path, &encoded).await?;
    Ok(())
}

fn fail_all(outputs: &[(VariantSpec, PathBuf)], error: impl Fn() -> UploadError) -> Vec<BranchResult> {
    outputs
        .iter()
        .map(|(spec, _)| (Branch::Variant(*spec), Err(error())))
        .collect()
}

async fn finish_branch(result: Result<(), UploadError>, path: PathBuf) -> Result<PathBuf, UploadError> {
    match result {
        Ok(()) => Ok(path),
        Err(e) => {
            remove_partial(&path).await;
            Err(e)
        }
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!("Failed to remove partial file {}: {}", path.display(), e);
    }
}
