//! Stored FIFO queues and the run queue

use super::{KernelStore, RUN_QUEUE};
use core_types::RunQueueItem;
use kernel_api::KernelError;

fn head_key(name: &str) -> String {
    format!("queue.{}.head", name)
}

fn tail_key(name: &str) -> String {
    format!("queue.{}.tail", name)
}

fn entry_key(name: &str, index: u64) -> String {
    format!("queue.{}.{}", name, index)
}

impl KernelStore {
    // Queues are addressed by head/tail counters; `head` is the next index to
    // read and `tail` the next index to write, so the queue is empty when they
    // are equal.

    pub(crate) fn queue_init(&mut self, name: &str) {
        self.kv.set(&head_key(name), "1");
        self.kv.set(&tail_key(name), "1");
    }

    pub(crate) fn queue_exists(&self, name: &str) -> bool {
        self.kv.get(&head_key(name)).is_some()
    }

    pub(crate) fn queue_push(&mut self, name: &str, value: &str) -> Result<(), KernelError> {
        let tail = self.read_number(&tail_key(name))?;
        self.kv.set(&entry_key(name, tail), value);
        self.kv.set(&tail_key(name), &(tail + 1).to_string());
        Ok(())
    }

    pub(crate) fn queue_pop(&mut self, name: &str) -> Result<Option<String>, KernelError> {
        let head = self.read_number(&head_key(name))?;
        let tail = self.read_number(&tail_key(name))?;
        if head >= tail {
            return Ok(None);
        }
        let key = entry_key(name, head);
        let value = self.kv.get_required(&key)?;
        self.kv.delete(&key);
        self.kv.set(&head_key(name), &(head + 1).to_string());
        Ok(Some(value))
    }

    pub(crate) fn queue_len(&self, name: &str) -> Result<u64, KernelError> {
        let head = self.read_number(&head_key(name))?;
        let tail = self.read_number(&tail_key(name))?;
        Ok(tail.saturating_sub(head))
    }

    pub(crate) fn queue_delete(&mut self, name: &str) -> Result<(), KernelError> {
        if !self.queue_exists(name) {
            return Ok(());
        }
        let head = self.read_number(&head_key(name))?;
        let tail = self.read_number(&tail_key(name))?;
        for index in head..tail {
            self.kv.delete(&entry_key(name, index));
        }
        self.kv.delete(&head_key(name));
        self.kv.delete(&tail_key(name));
        Ok(())
    }

    // ========================================================================
    // Run queue
    // ========================================================================

    /// Appends an item to the run queue
    pub fn enqueue_run(&mut self, item: &RunQueueItem) -> Result<(), KernelError> {
        let text = serde_json::to_string(item).map_err(|e| KernelError::corrupt(RUN_QUEUE, e))?;
        self.queue_push(RUN_QUEUE, &text)
    }

    /// Removes and returns the oldest run queue item, if any
    pub fn dequeue_run(&mut self) -> Result<Option<RunQueueItem>, KernelError> {
        self.queue_pop(RUN_QUEUE)?
            .map(|text| serde_json::from_str(&text).map_err(|e| KernelError::corrupt(RUN_QUEUE, e)))
            .transpose()
    }

    /// Returns the number of items waiting in the run queue
    pub fn run_queue_length(&self) -> Result<usize, KernelError> {
        Ok(self.queue_len(RUN_QUEUE)? as usize)
    }
}
