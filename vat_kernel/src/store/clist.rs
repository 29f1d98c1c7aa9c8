//! Per-endpoint c-lists
//!
//! Each entry is stored under two keys so both directions resolve in one
//! lookup. The kref-side value also carries the reachability flag:
//!
//! ```text
//! v1.c.ko4  -> "R o-2"   (reachable)
//! v1.c.o-2  -> "ko4"
//! ```

use super::{object_counter_key, promise_counter_key, KernelStore};
use core_types::{Direction, ERef, EndpointId, KRef, RefKind};
use kernel_api::KernelError;

const REACHABLE: char = 'R';
const RECOGNIZABLE: char = '_';

fn kref_key(endpoint: EndpointId, kref: &KRef) -> String {
    format!("{}.c.{}", endpoint, kref)
}

fn eref_key(endpoint: EndpointId, eref: &ERef) -> String {
    format!("{}.c.{}", endpoint, eref)
}

fn encode_entry(reachable: bool, eref: &ERef) -> String {
    let flag = if reachable { REACHABLE } else { RECOGNIZABLE };
    format!("{} {}", flag, eref)
}

fn decode_entry(key: &str, text: &str) -> Result<(bool, ERef), KernelError> {
    let (flag, eref) = text
        .split_once(' ')
        .ok_or_else(|| KernelError::corrupt(key, "c-list entry missing flag"))?;
    let reachable = match flag {
        "R" => true,
        "_" => false,
        other => {
            return Err(KernelError::corrupt(
                key,
                format!("unknown reachability flag {}", other),
            ))
        }
    };
    let eref = eref.parse().map_err(|e| KernelError::corrupt(key, e))?;
    Ok((reachable, eref))
}

impl KernelStore {
    /// Adds a reachable c-list entry mapping `kref` to `eref` for `endpoint`.
    ///
    /// Re-adding an identical entry is harmless. An entry that would map
    /// either side to something else is refused.
    pub fn add_clist_entry(
        &mut self,
        endpoint: EndpointId,
        kref: &KRef,
        eref: &ERef,
    ) -> Result<(), KernelError> {
        if let Some(existing) = self.kref_to_eref(endpoint, kref)? {
            if existing != *eref {
                return Err(KernelError::corrupt(
                    kref_key(endpoint, kref),
                    format!("already mapped to {}", existing),
                ));
            }
        }
        if let Some(existing) = self.eref_to_kref(endpoint, eref)? {
            if existing != *kref {
                return Err(KernelError::corrupt(
                    eref_key(endpoint, eref),
                    format!("already mapped to {}", existing),
                ));
            }
        }
        self.kv
            .set(&kref_key(endpoint, kref), &encode_entry(true, eref));
        self.kv.set(&eref_key(endpoint, eref), &kref.to_string());
        Ok(())
    }

    /// Looks up how `endpoint` names `kref`, if it has an entry.
    pub fn kref_to_eref(
        &self,
        endpoint: EndpointId,
        kref: &KRef,
    ) -> Result<Option<ERef>, KernelError> {
        Ok(self.read_entry(endpoint, kref)?.map(|(_, eref)| eref))
    }

    /// Looks up the kernel ref behind `eref` in `endpoint`'s c-list.
    pub fn eref_to_kref(
        &self,
        endpoint: EndpointId,
        eref: &ERef,
    ) -> Result<Option<KRef>, KernelError> {
        self.get_parsed(&eref_key(endpoint, eref))
    }

    /// Mints a fresh ERef of `kref`'s kind in `endpoint`'s namespace and
    /// records the entry.
    pub fn allocate_eref_for_kref(
        &mut self,
        endpoint: EndpointId,
        kref: &KRef,
        direction: Direction,
    ) -> Result<ERef, KernelError> {
        let counter = match kref.kind() {
            RefKind::Object => object_counter_key(endpoint),
            RefKind::Promise => promise_counter_key(endpoint),
        };
        if self.kv.get(&counter).is_none() {
            return Err(KernelError::UnknownEndpoint(endpoint));
        }
        let index = self.bump_counter(&counter)?;
        let eref = ERef::new(kref.kind(), direction, index);
        self.add_clist_entry(endpoint, kref, &eref)?;
        Ok(eref)
    }

    /// Removes the entry for `kref` in both directions. Absent entries are
    /// ignored.
    ///
    /// Returns whether an entry was removed, and with it the count it held.
    pub fn forget_kref(&mut self, endpoint: EndpointId, kref: &KRef) -> Result<bool, KernelError> {
        let Some((_, eref)) = self.read_entry(endpoint, kref)? else {
            return Ok(false);
        };
        self.kv.delete(&eref_key(endpoint, &eref));
        self.kv.delete(&kref_key(endpoint, kref));
        Ok(true)
    }

    /// Removes the entry for `eref` in both directions. Absent entries are
    /// ignored.
    pub fn forget_eref(&mut self, endpoint: EndpointId, eref: &ERef) -> Result<bool, KernelError> {
        match self.eref_to_kref(endpoint, eref)? {
            Some(kref) => self.forget_kref(endpoint, &kref),
            None => Ok(false),
        }
    }

    /// Downgrades the entry to recognizable. No-op for an absent entry.
    pub fn clear_reachable_flag(
        &mut self,
        endpoint: EndpointId,
        kref: &KRef,
    ) -> Result<(), KernelError> {
        self.write_flag(endpoint, kref, false)
    }

    /// Upgrades the entry back to reachable. No-op for an absent entry.
    pub fn set_reachable_flag(
        &mut self,
        endpoint: EndpointId,
        kref: &KRef,
    ) -> Result<(), KernelError> {
        self.write_flag(endpoint, kref, true)
    }

    /// Returns whether the entry is reachable; `false` when there is no entry.
    pub fn get_reachable_flag(&self, endpoint: EndpointId, kref: &KRef) -> Result<bool, KernelError> {
        Ok(self
            .read_entry(endpoint, kref)?
            .map_or(false, |(reachable, _)| reachable))
    }

    /// Lists every kref in `endpoint`'s c-list.
    pub fn clist_krefs(&self, endpoint: EndpointId) -> Result<Vec<KRef>, KernelError> {
        let prefix = format!("{}.c.k", endpoint);
        let strip = format!("{}.c.", endpoint);
        self.keys_with_prefix(&prefix)
            .iter()
            .map(|key| {
                key[strip.len()..]
                    .parse()
                    .map_err(|e| KernelError::corrupt(key.as_str(), e))
            })
            .collect()
    }

    fn read_entry(
        &self,
        endpoint: EndpointId,
        kref: &KRef,
    ) -> Result<Option<(bool, ERef)>, KernelError> {
        let key = kref_key(endpoint, kref);
        self.kv
            .get(&key)
            .map(|text| decode_entry(&key, &text))
            .transpose()
    }

    fn write_flag(
        &mut self,
        endpoint: EndpointId,
        kref: &KRef,
        reachable: bool,
    ) -> Result<(), KernelError> {
        if let Some((_, eref)) = self.read_entry(endpoint, kref)? {
            self.kv
                .set(&kref_key(endpoint, kref), &encode_entry(reachable, &eref));
        }
        Ok(())
    }
}
