use crate::config::FormLimits;
use crate::error::{LimitKind, UploadError};
use bytes::Bytes;
use futures::{Stream, StreamExt};

/// One decoded part of a multipart body.
pub enum FormEvent<'r> {
    Field { name: String, value: String },
    File(FilePart<'r>),
}

/// A file part whose content has not been read yet.
///
/// The content must be consumed (or drained) before the next event is
/// requested, since it shares the request body with every later part.
pub struct FilePart<'r> {
    pub field_name: String,
    pub file_name: String,
    pub content_type: Option<String>,
    field: multer::Field<'r>,
    max_size: u64,
}

impl<'r> FilePart<'r> {
    /// Content chunks in arrival order. Fails with `LimitExceeded(fileSize)`
    /// as soon as the part grows past the configured size.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, UploadError>> + Send + 'r {
        let FilePart {
            mut field,
            max_size,
            field_name,
            ..
        } = self;

        async_stream::try_stream! {
            let mut received: u64 = 0;
            while let Some(chunk) = field.chunk().await? {
                received += chunk.len() as u64;
                if received > max_size {
                    tracing::warn!("File part '{}' exceeded {} bytes", field_name, max_size);
                    Err::<(), UploadError>(UploadError::LimitExceeded(LimitKind::FileSize))?;
                }
                yield chunk;
            }
        }
    }

    /// Reads and discards the content, still enforcing the size limit.
    pub async fn drain(self) -> Result<u64, UploadError> {
        let stream = self.into_stream();
        let mut stream = std::pin::pin!(stream);
        let mut total = 0u64;
        while let Some(chunk) = stream.next().await {
            total += chunk?.len() as u64;
        }
        Ok(total)
    }
}

/// Single-pass multipart decoder enforcing [`FormLimits`].
pub struct MultipartParser<'r> {
    inner: multer::Multipart<'r>,
    limits: FormLimits,
    fields: usize,
    files: usize,
}

impl<'r> MultipartParser<'r> {
    pub fn new<S, O, E>(content_type: &str, body: S, limits: FormLimits) -> Result<Self, UploadError>
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
    {
        let boundary = multer::parse_boundary(content_type)?;
        Ok(Self {
            inner: multer::Multipart::new(body, boundary),
            limits,
            fields: 0,
            files: 0,
        })
    }

    /// Next part of the body, or `None` at the closing boundary.
    pub async fn next_event(&mut self) -> Result<Option<FormEvent<'r>>, UploadError> {
        let Some(mut field) = self.inner.next_field().await? else {
            return Ok(None);
        };
        let name = field.name().unwrap_or_default().to_string();

        if let Some(file_name) = field.file_name().map(str::to_string) {
            self.files += 1;
            if self.files > self.limits.max_files {
                return Err(UploadError::LimitExceeded(LimitKind::Files));
            }

            let content_type = field.content_type().map(|m| m.essence_str().to_string());
            tracing::debug!("File part '{}' ({:?})", name, content_type);

            return Ok(Some(FormEvent::File(FilePart {
                field_name: name,
                file_name,
                content_type,
                field,
                max_size: self.limits.max_file_size,
            })));
        }

        self.fields += 1;
        if self.fields > self.limits.max_fields {
            return Err(UploadError::LimitExceeded(LimitKind::Fields));
        }

        let mut value = Vec::new();
        while let Some(chunk) = field.chunk().await? {
            if value.len() + chunk.len() > self.limits.max_field_size {
                return Err(UploadError::LimitExceeded(LimitKind::FieldSize));
            }
            value.extend_from_slice(&chunk);
        }

        let value = String::from_utf8(value).map_err(|_| {
            UploadError::MalformedBody(format!("field '{}' is not valid UTF-8", name))
        })?;

        Ok(Some(FormEvent::Field { name, value }))
    }
}
