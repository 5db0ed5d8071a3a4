use crate::domain::StampedEnvelope;
use crate::sender::PublishResult;
use chrono::{SecondsFormat, Utc};
#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};

/// Receives every batch the publisher gives up on.
///
/// Called from a send task, so implementations must not block for long. They
/// should also stay away from `tracing`: with the bridge layer installed, an
/// event logged here would be queued for publishing again.
#[cfg_attr(test, automock)]
pub trait ErrorHandler: Send + Sync {
    fn on_failure(&self, batch: &[StampedEnvelope], result: &PublishResult);
}

impl<F> ErrorHandler for F
where
    F: Fn(&[StampedEnvelope], &PublishResult) + Send + Sync,
{
    fn on_failure(&self, batch: &[StampedEnvelope], result: &PublishResult) {
        self(batch, result);
    }
}

/// Writes one line per failed batch to a plain writer, stderr by default.
pub struct SideChannelErrorHandler {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl SideChannelErrorHandler {
    pub fn new() -> Self {
        Self::with_writer(io::stderr())
    }

    pub fn with_writer<W>(writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            sink: Mutex::new(Box::new(writer)),
        }
    }

    pub fn format_failure(envelope_count: usize, result: &PublishResult) -> String {
        let mut line = format!(
            "Failed to publish {} envelopes after {} attempts; batch {}; status {}; response: {}",
            envelope_count, result.attempt, result.batch_id, result.status_code, result.response_body
        );
        if let Some(error) = &result.error {
            line.push_str("; error: ");
            line.push_str(error);
        }
        line
    }
}

impl Default for SideChannelErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SideChannelErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideChannelErrorHandler").finish_non_exhaustive()
    }
}

impl ErrorHandler for SideChannelErrorHandler {
    fn on_failure(&self, batch: &[StampedEnvelope], result: &PublishResult) {
        let line = format!(
            "{} {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            Self::format_failure(batch.len(), result)
        );
        let mut sink = self.sink.lock();
        // Nowhere left to report a failing side channel.
        let _ = sink.write_all(line.as_bytes());
        let _ = sink.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DraftEnvelope, EventData};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn failed_result() -> PublishResult {
        let mut result = PublishResult::not_sent("batch-7", 2, "connection refused");
        result.attempt = 3;
        result
    }

    fn envelopes() -> Vec<StampedEnvelope> {
        (0..2)
            .map(|i| DraftEnvelope::new(EventData::new("e")).stamp("k", i.to_string()))
            .collect()
    }

    #[test]
    fn test_side_channel_writes_one_line() {
        let buf = SharedBuf::default();
        let handler = SideChannelErrorHandler::with_writer(buf.clone());

        handler.on_failure(&envelopes(), &failed_result());

        let written = String::from_utf8(buf.0.lock().clone()).unwrap();
        assert_eq!(written.lines().count(), 1);
        assert!(written.contains("Failed to publish 2 envelopes after 3 attempts"));
        assert!(written.contains("batch batch-7"));
        assert!(written.contains("error: connection refused"));
    }

    #[test]
    fn test_closure_is_a_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler: Arc<dyn ErrorHandler> =
            Arc::new(move |batch: &[StampedEnvelope], _: &PublishResult| {
                counter.fetch_add(batch.len(), Ordering::SeqCst);
            });

        handler.on_failure(&envelopes(), &failed_result());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_mock_handler() {
        let mut mock = MockErrorHandler::new();
        mock.expect_on_failure()
            .withf(|batch, result| batch.len() == 2 && result.attempt == 3)
            .times(1)
            .return_const(());

        mock.on_failure(&envelopes(), &failed_result());
    }
}
