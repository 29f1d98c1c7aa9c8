//! Kernel promises and their pending-message queues

use super::{KernelStore, NEXT_PROMISE_ID};
use core_types::{CapData, EndpointId, KRef, KernelMessage, KernelPromise, PromiseState};
use kernel_api::KernelError;
use std::collections::BTreeSet;

pub(super) fn state_key(kpid: &KRef) -> String {
    format!("{}.state", kpid)
}

fn decider_key(kpid: &KRef) -> String {
    format!("{}.decider", kpid)
}

fn subscribers_key(kpid: &KRef) -> String {
    format!("{}.subscribers", kpid)
}

fn value_key(kpid: &KRef) -> String {
    format!("{}.value", kpid)
}

impl KernelStore {
    /// Allocates an unresolved promise with a reference count of 1
    pub fn init_kernel_promise(&mut self) -> Result<(KRef, KernelPromise), KernelError> {
        let kpid = KRef::promise(self.bump_counter(NEXT_PROMISE_ID)?);
        let promise = KernelPromise::unresolved();
        self.kv
            .set(&state_key(&kpid), promise.state.as_str());
        self.set_json(&subscribers_key(&kpid), &promise.subscribers)?;
        self.set_ref_count(&kpid, 1);
        self.queue_init(&kpid.to_string());
        Ok((kpid, promise))
    }

    pub fn get_kernel_promise(&self, kpid: &KRef) -> Result<KernelPromise, KernelError> {
        let state: PromiseState = self
            .get_parsed(&state_key(kpid))?
            .ok_or(KernelError::UnknownPromise(*kpid))?;
        Ok(KernelPromise {
            state,
            decider: self.get_parsed(&decider_key(kpid))?,
            subscribers: self.get_json(&subscribers_key(kpid))?.unwrap_or_default(),
            value: self.get_json(&value_key(kpid))?,
        })
    }

    pub fn kernel_promise_exists(&self, kpid: &KRef) -> bool {
        self.kv.get(&state_key(kpid)).is_some()
    }

    /// Removes the promise together with any queued messages.
    pub fn delete_kernel_promise(&mut self, kpid: &KRef) -> Result<(), KernelError> {
        for key in [
            state_key(kpid),
            decider_key(kpid),
            subscribers_key(kpid),
            value_key(kpid),
        ] {
            self.kv.delete(&key);
        }
        self.delete_ref_count(kpid);
        self.queue_delete(&kpid.to_string())
    }

    /// Appends a send addressed to a not-yet-resolved promise.
    pub fn enqueue_promise_message(
        &mut self,
        kpid: &KRef,
        message: &KernelMessage,
    ) -> Result<(), KernelError> {
        let name = kpid.to_string();
        if !self.queue_exists(&name) {
            return Err(KernelError::QueueNotInitialized(*kpid));
        }
        let text = serde_json::to_string(message).map_err(|e| KernelError::corrupt(&name, e))?;
        self.queue_push(&name, &text)
    }

    /// Drains the promise's pending messages in the order they were queued.
    ///
    /// A second call with no enqueue in between returns an empty list.
    pub fn get_kernel_promise_message_queue(
        &mut self,
        kpid: &KRef,
    ) -> Result<Vec<KernelMessage>, KernelError> {
        let name = kpid.to_string();
        if !self.queue_exists(&name) {
            return Err(KernelError::QueueNotInitialized(*kpid));
        }
        let mut messages = Vec::new();
        while let Some(text) = self.queue_pop(&name)? {
            let message = serde_json::from_str(&text).map_err(|e| KernelError::corrupt(&name, e))?;
            messages.push(message);
        }
        Ok(messages)
    }

    /// Records the endpoint allowed to resolve `kpid`.
    pub fn set_promise_decider(
        &mut self,
        kpid: &KRef,
        decider: EndpointId,
    ) -> Result<(), KernelError> {
        self.require_promise(kpid)?;
        self.kv.set(&decider_key(kpid), &decider.to_string());
        Ok(())
    }

    /// Adds `subscriber` to those notified when `kpid` settles. Repeats are
    /// ignored.
    pub fn add_promise_subscriber(
        &mut self,
        kpid: &KRef,
        subscriber: EndpointId,
    ) -> Result<(), KernelError> {
        self.require_promise(kpid)?;
        let key = subscribers_key(kpid);
        let mut subscribers: BTreeSet<EndpointId> = self.get_json(&key)?.unwrap_or_default();
        if subscribers.insert(subscriber) {
            self.set_json(&key, &subscribers)?;
        }
        Ok(())
    }

    /// Settles the promise.
    ///
    /// The decider and subscriber set are cleared; queued messages stay put
    /// until drained with [`KernelStore::get_kernel_promise_message_queue`].
    pub fn resolve_kernel_promise(
        &mut self,
        kpid: &KRef,
        rejected: bool,
        value: &CapData<KRef>,
    ) -> Result<(), KernelError> {
        self.require_promise(kpid)?;
        let state = if rejected {
            PromiseState::Rejected
        } else {
            PromiseState::Fulfilled
        };
        self.kv.set(&state_key(kpid), state.as_str());
        self.set_json(&value_key(kpid), value)?;
        self.kv.delete(&decider_key(kpid));
        self.set_json(&subscribers_key(kpid), &BTreeSet::<EndpointId>::new())?;
        Ok(())
    }

    /// Lists every unresolved promise decided by `endpoint`.
    pub fn promises_decided_by(&self, endpoint: EndpointId) -> Result<Vec<KRef>, KernelError> {
        let expected = endpoint.to_string();
        let mut decided = Vec::new();
        for key in self.keys_with_prefix("kp") {
            let Some(prefix) = key.strip_suffix(".decider") else {
                continue;
            };
            if self.kv.get(&key).as_deref() == Some(expected.as_str()) {
                decided.push(prefix.parse()?);
            }
        }
        Ok(decided)
    }

    fn require_promise(&self, kpid: &KRef) -> Result<(), KernelError> {
        if self.kernel_promise_exists(kpid) {
            Ok(())
        } else {
            Err(KernelError::UnknownPromise(*kpid))
        }
    }
}
