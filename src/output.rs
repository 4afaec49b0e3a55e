use std::sync::{Arc, Mutex};

/// Consumer of a finished word batch. The scheduler installs one per job that
/// wraps the batch into an event for the publisher; tests install recorders.
pub trait BatchSink: Send + Sync {
    fn deliver(&self, batch: String) -> anyhow::Result<()>;
}

/// Buffers filtered words for one crawl and hands them to the sink joined
/// with single spaces, either when the threshold is reached or on an explicit
/// flush. Appends may race with the terminal flush in async mode, so both go
/// through the same lock.
pub struct OutputAggregator {
    words: Mutex<Vec<String>>,
    threshold: usize,
    sink: Arc<dyn BatchSink>,
}

impl OutputAggregator {
    pub fn new(threshold: usize, sink: Arc<dyn BatchSink>) -> Self {
        OutputAggregator {
            words: Mutex::new(Vec::with_capacity(threshold)),
            threshold: threshold.max(1),
            sink,
        }
    }

    pub fn append(&self, words: Vec<String>) {
        if words.is_empty() {
            return;
        }

        let mut buf = self.words.lock().unwrap();
        buf.extend(words);

        if buf.len() >= self.threshold {
            self.flush_locked(&mut buf);
        }
    }

    /// Flushes whatever is buffered; does nothing when the batch is empty.
    pub fn flush(&self) {
        let mut buf = self.words.lock().unwrap();
        if !buf.is_empty() {
            self.flush_locked(&mut buf);
        }
    }

    fn flush_locked(&self, buf: &mut Vec<String>) {
        let msg = buf.join(" ");
        buf.clear();

        if let Err(e) = self.sink.deliver(msg) {
            error!("could not deliver output batch: {e:#}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<String>>,
    }

    impl BatchSink for RecordingSink {
        fn deliver(&self, batch: String) -> anyhow::Result<()> {
            self.batches.lock().unwrap().push(batch);
            Ok(())
        }
    }

    fn words(w: &[&str]) -> Vec<String> {
        w.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flushes_once_threshold_is_reached() {
        let sink = Arc::new(RecordingSink::default());
        let agg = OutputAggregator::new(3, sink.clone());

        agg.append(words(&["a", "b"]));
        assert!(sink.batches.lock().unwrap().is_empty());

        agg.append(words(&["c"]));
        assert_eq!(*sink.batches.lock().unwrap(), vec!["a b c".to_string()]);

        // batch is empty right after the flush
        agg.flush();
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
    }

    #[test]
    fn explicit_flush_emits_partial_batch() {
        let sink = Arc::new(RecordingSink::default());
        let agg = OutputAggregator::new(100, sink.clone());

        agg.append(words(&["tail"]));
        agg.flush();
        assert_eq!(*sink.batches.lock().unwrap(), vec!["tail".to_string()]);
    }

    #[test]
    fn double_flush_publishes_at_most_once() {
        let sink = Arc::new(RecordingSink::default());
        let agg = OutputAggregator::new(100, sink.clone());

        agg.append(words(&["only"]));
        agg.flush();
        agg.flush();
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
    }

    #[test]
    fn empty_append_never_flushes() {
        let sink = Arc::new(RecordingSink::default());
        let agg = OutputAggregator::new(1, sink.clone());

        agg.append(vec![]);
        agg.flush();
        assert!(sink.batches.lock().unwrap().is_empty());
    }
}
