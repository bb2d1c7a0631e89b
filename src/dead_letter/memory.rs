use super::{AbandonedRequest, DeadLetterSink};
use crate::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct MemoryDeadLetterSink {
    entries: Arc<Mutex<Vec<AbandonedRequest>>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_entries(&self) -> Vec<AbandonedRequest> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn record(&self, entry: &AbandonedRequest) -> Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}
