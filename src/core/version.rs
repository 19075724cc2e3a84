use std::sync::atomic::{AtomicU64, Ordering};

use parse_display::Display;

static VERSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque change token of a signal.
///
/// A signal receives a fresh token whenever its stored value is replaced or its resolver fails.
/// Equal tokens mean the value has not changed, so dependents can skip recomputation without
/// comparing values.
#[derive(Debug, Display, Clone, Copy, Eq, PartialEq, Hash)]
#[display("v{0}")]
pub struct Version(u64);

impl Version {
    pub(crate) fn new() -> Self {
        Self(VERSION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_versions_are_distinct() {
        let a = Version::new();
        let b = Version::new();
        assert_ne!(a, b);
        assert_eq!(a, a);
        assert!(a.to_string().starts_with('v'));
    }
}
