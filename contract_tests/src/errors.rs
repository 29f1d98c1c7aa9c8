//! Error text contract
//!
//! Vats and ported test suites match on these strings, so each one is pinned
//! both as rendered from the error value and as produced by the kernel.
