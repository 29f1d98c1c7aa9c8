//! Syscall audit log
//!
//! Records every syscall a vat issues and how it ended. The log is queryable
//! so tests can assert on protocol behavior without scraping log output.

use core_types::VatId;

/// Events recorded for each syscall
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyscallEvent {
    /// Syscall received
    Invoked { vat: VatId, syscall: String },
    /// Syscall applied
    Completed { vat: VatId, syscall: String },
    /// Syscall refused with an error
    Rejected {
        vat: VatId,
        syscall: String,
        reason: String,
    },
    /// Syscall not supported; logged and skipped
    Ignored {
        vat: VatId,
        syscall: String,
        reason: String,
    },
}

impl SyscallEvent {
    pub fn syscall(&self) -> &str {
        match self {
            SyscallEvent::Invoked { syscall, .. }
            | SyscallEvent::Completed { syscall, .. }
            | SyscallEvent::Rejected { syscall, .. }
            | SyscallEvent::Ignored { syscall, .. } => syscall,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyscallAuditLog {
    events: Vec<SyscallEvent>,
}

impl SyscallAuditLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, event: SyscallEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[SyscallEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&SyscallEvent) -> bool,
    {
        self.events.iter().any(predicate)
    }

    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&SyscallEvent) -> bool,
    {
        self.events.iter().filter(|e| predicate(e)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_log_queries() {
        let vat = VatId::new(1);
        let mut log = SyscallAuditLog::new();
        log.record(SyscallEvent::Invoked {
            vat,
            syscall: "send".to_string(),
        });
        log.record(SyscallEvent::Completed {
            vat,
            syscall: "send".to_string(),
        });
        log.record(SyscallEvent::Ignored {
            vat,
            syscall: "vatstoreGet".to_string(),
            reason: "invalid syscall vatstoreGet".to_string(),
        });

        assert_eq!(log.events().len(), 3);
        assert!(log.has_event(|e| matches!(e, SyscallEvent::Ignored { .. })));
        assert_eq!(log.count_events(|e| e.syscall() == "send"), 2);

        log.clear();
        assert!(log.events().is_empty());
    }
}
