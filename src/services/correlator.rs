use crate::error::UploadError;
use crate::models::{AttachmentError, BranchError, PlaceholderMap, StoredFile, UploadSpec};
use crate::services::fan_out::{FanOutOutcome, FanOutTarget, FanOutWriter, InFlightFanOut};
use crate::services::multipart::FilePart;
use crate::utils::validation::original_extension;
use std::sync::Arc;

/// Files of one request, keyed the way the client referenced them.
#[derive(Debug, Default)]
pub struct Correlation {
    pub files: Vec<StoredFile>,
    pub placeholders: PlaceholderMap,
    pub errors: Vec<AttachmentError>,
}

/// Sends each file part through the fan-out and remembers which client key
/// it was uploaded under.
pub struct AttachmentCorrelator {
    writer: Arc<FanOutWriter>,
    in_flight: Vec<(String, InFlightFanOut)>,
    errors: Vec<AttachmentError>,
}

impl AttachmentCorrelator {
    pub fn new(writer: Arc<FanOutWriter>) -> Self {
        Self {
            writer,
            in_flight: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Streams `part` to storage. Returns once its content has been read;
    /// encodes keep running until [`finish`](Self::finish).
    ///
    /// Only source failures (disconnect, size limit) are returned. Storage
    /// failures are recorded against the part's key.
    pub async fn accept(&mut self, part: FilePart<'_>, spec: &UploadSpec) -> Result<(), UploadError> {
        let key = part.field_name.clone();
        let target = FanOutTarget::from_spec(
            spec,
            original_extension(&part.file_name),
            part.content_type.as_deref(),
        );

        let pending = match self.writer.begin(&target).await {
            Ok(pending) => pending,
            Err(error) => {
                tracing::warn!("Could not prepare storage for '{}': {}", key, error);
                self.errors.push(AttachmentError {
                    key,
                    branch: None,
                    error,
                });
                part.drain().await?;
                return Ok(());
            }
        };

        tracing::debug!("Receiving '{}' as {}", key, pending.generated_name());
        match pending.pump(part.into_stream()).await {
            Ok(in_flight) => {
                self.in_flight.push((key, in_flight));
                Ok(())
            }
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                self.errors.push(AttachmentError {
                    key,
                    branch: None,
                    error,
                });
                Ok(())
            }
        }
    }

    /// Number of files whose branches have not been awaited yet.
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// Waits for every accepted file, in arrival order.
    ///
    /// A file whose original copy failed is removed entirely and never
    /// reaches the placeholder map.
    pub async fn finish(self) -> Correlation {
        let mut correlation = Correlation {
            errors: self.errors,
            ..Correlation::default()
        };

        for (key, in_flight) in self.in_flight {
            let outcome = in_flight.finish().await;

            if outcome.original_failed() {
                tracing::warn!(
                    "Original copy of '{}' failed, discarding {}",
                    key,
                    outcome.file.generated_name
                );
                let errors = outcome.discard().await;
                record(&mut correlation.errors, &key, errors);
                continue;
            }

            let FanOutOutcome { file, errors, .. } = outcome;
            for e in &errors {
                tracing::warn!("'{}' stored without {}: {}", key, e.branch, e.error);
            }
            record(&mut correlation.errors, &key, errors);

            tracing::info!("Stored '{}' as {}", key, file.generated_name);
            correlation.files.push(file.clone());
            correlation.placeholders.insert(key, file);
        }

        correlation
    }
}

fn record(into: &mut Vec<AttachmentError>, key: &str, errors: Vec<BranchError>) {
    into.extend(errors.into_iter().map(|e| AttachmentError {
        key: key.to_string(),
        branch: Some(e.branch),
        error: e.error,
    }));
}
