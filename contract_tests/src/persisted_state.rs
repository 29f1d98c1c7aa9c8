//! Persisted state contract
//!
//! Run-queue items are stored as JSON and must stay readable by a restarted
//! kernel. Deliveries are what hosts forward to vats.
