use crate::error::UploadError;
use crate::models::{FieldRule, FormSchema, ParsedForm};
use crate::services::correlator::AttachmentCorrelator;
use crate::services::fan_out::FanOutWriter;
use crate::services::multipart::{FormEvent, MultipartParser};
use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Parsing,
    Finalizing,
    Completed,
    Failed,
}

/// Drives one multipart request through a [`FormSchema`].
pub struct FormSession {
    schema: FormSchema,
    writer: Arc<FanOutWriter>,
    state: SessionState,
}

impl FormSession {
    pub fn new(schema: FormSchema, writer: Arc<FanOutWriter>) -> Self {
        Self {
            schema,
            writer,
            state: SessionState::Open,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Parses `body` to its end and hands the result to `on_complete`.
    ///
    /// Every file started during parsing is awaited before returning, on
    /// success and on failure alike. On failure `on_complete` is not called.
    pub async fn run<S, O, E, F, Fut, T>(
        &mut self,
        content_type: &str,
        body: S,
        on_complete: F,
    ) -> Result<T, UploadError>
    where
        S: Stream<Item = Result<O, E>> + Send,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        F: FnOnce(ParsedForm) -> Fut,
        Fut: Future<Output = T>,
    {
        if self.state != SessionState::Open {
            return Err(UploadError::MalformedBody(
                "form session has already consumed a body".to_string(),
            ));
        }

        self.transition(SessionState::Parsing);
        let mut correlator = AttachmentCorrelator::new(self.writer.clone());
        let parsed = self.parse(content_type, body, &mut correlator).await;

        self.transition(SessionState::Finalizing);
        if correlator.pending() > 0 {
            tracing::debug!("Waiting for {} file(s) to finish", correlator.pending());
        }
        let correlation = correlator.finish().await;

        let fields = match parsed {
            Ok(fields) => fields,
            Err(e) => {
                self.transition(SessionState::Failed);
                if e.is_client_error() {
                    tracing::warn!("Form rejected: {}", e);
                } else {
                    tracing::error!("Form session failed: {}", e);
                }
                return Err(e);
            }
        };

        let form = ParsedForm {
            fields,
            files: correlation.files,
            placeholders: correlation.placeholders,
            errors: correlation.errors,
        };

        tracing::info!(
            "Form parsed: {} field(s), {} file(s), {} branch error(s)",
            form.fields.len(),
            form.files.len(),
            form.errors.len()
        );
        self.transition(SessionState::Completed);
        Ok(on_complete(form).await)
    }

    async fn parse<S, O, E>(
        &self,
        content_type: &str,
        body: S,
        correlator: &mut AttachmentCorrelator,
    ) -> Result<BTreeMap<String, Value>, UploadError>
    where
        S: Stream<Item = Result<O, E>> + Send,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let mut parser = MultipartParser::new(content_type, body, self.schema.limits())?;
        let mut fields = BTreeMap::new();

        while let Some(event) = parser.next_event().await? {
            match event {
                FormEvent::Field { name, value } => match self.schema.rule_for(&name) {
                    Some(FieldRule::Value(kind)) => {
                        let value = kind.decode(&name, value)?;
                        fields.insert(name, value);
                    }
                    _ => tracing::debug!("Skipping unexpected field '{}'", name),
                },
                FormEvent::File(part) => {
                    // Browsers send an empty part for a file input left blank
                    if part.file_name.is_empty() {
                        tracing::debug!("No file chosen for '{}'", part.field_name);
                        part.drain().await?;
                        continue;
                    }

                    match self.schema.upload_spec_for(&part.field_name) {
                        Some(spec) => correlator.accept(part, spec).await?,
                        None => {
                            tracing::debug!("Skipping unexpected file '{}'", part.field_name);
                            part.drain().await?;
                        }
                    }
                }
            }
        }

        Ok(fields)
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!("Form session {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FormLimits;
    use crate::services::encoder::VariantEncoder;
    use async_trait::async_trait;

    struct Passthrough;

    #[async_trait]
    impl VariantEncoder for Passthrough {
        async fn transform(
            &self,
            input: Bytes,
            _spec: crate::models::VariantSpec,
        ) -> Result<Bytes, UploadError> {
            Ok(input)
        }
    }

    fn session(dir: &std::path::Path) -> FormSession {
        let schema = FormSchema::new(dir, FormLimits::default())
            .text("title")
            .json("layout");
        FormSession::new(schema, Arc::new(FanOutWriter::new(Arc::new(Passthrough), 4)))
    }

    fn body(raw: &str) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        futures::stream::iter(vec![Ok(Bytes::from(raw.to_string()))])
    }

    const CT: &str = "multipart/form-data; boundary=b";

    #[tokio::test]
    async fn test_completes_and_keeps_last_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let raw = "--b\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nfirst\r\n\
                   --b\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nsecond\r\n\
                   --b\r\nContent-Disposition: form-data; name=\"layout\"\r\n\r\n[[]]\r\n\
                   --b\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nx\r\n--b--\r\n";

        let title = session
            .run(CT, body(raw), |form| async move {
                assert!(!form.fields.contains_key("other"));
                assert_eq!(form.fields["layout"], serde_json::json!([[]]));
                form.text("title").map(str::to_string)
            })
            .await
            .unwrap();

        assert_eq!(title.as_deref(), Some("second"));
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_invalid_json_fails_without_callback() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let raw = "--b\r\nContent-Disposition: form-data; name=\"layout\"\r\n\r\n{nope\r\n--b--\r\n";

        let mut called = false;
        let result = session
            .run(CT, body(raw), |_| {
                called = true;
                async {}
            })
            .await;

        assert!(matches!(result, Err(UploadError::MalformedBody(_))));
        assert!(!called);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_session_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let raw = "--b\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nt\r\n--b--\r\n";
        session.run(CT, body(raw), |_| async {}).await.unwrap();
        assert!(session.run(CT, body(raw), |_| async {}).await.is_err());
    }
}
