//! Work handed out to endpoints by the run loop

use core_types::{ERef, VatMessage, VatOneResolution};
use serde::{Deserialize, Serialize};

/// A delivery in the receiving endpoint's own reference space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VatDelivery {
    /// Invoke a method on one of the endpoint's exports
    Message { target: ERef, message: VatMessage },
    /// Promises the endpoint subscribed to have settled
    Notify { resolutions: Vec<VatOneResolution> },
    /// The kernel no longer holds these exports strongly
    DropExports { erefs: Vec<ERef> },
}
