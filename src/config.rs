//! Heap configuration.
//!
//! The only tunable today is the capacity of a [`crate::ReservedBreak`], set
//! via the `BRKALLOC_ARENA_CAPACITY` environment variable. The value is a byte
//! count with an optional `K`, `M` or `G` suffix (case-insensitive), e.g.
//! `256M`. Missing, unparsable or zero values fall back to the default.

/// Default capacity of a reserved arena: 64 MiB.
pub const DEFAULT_ARENA_CAPACITY: usize = 64 << 20;

/// Environment variable holding the arena capacity.
pub const ARENA_CAPACITY_ENV: &str = "BRKALLOC_ARENA_CAPACITY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Bytes reserved up front by [`crate::ReservedBreak::from_config`].
    pub arena_capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            arena_capacity: DEFAULT_ARENA_CAPACITY,
        }
    }
}

impl HeapConfig {
    /// Loads the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let arena_capacity = lookup(ARENA_CAPACITY_ENV)
            .as_deref()
            .and_then(parse_capacity)
            .unwrap_or(DEFAULT_ARENA_CAPACITY);

        Self { arena_capacity }
    }
}

/// Parses `"4096"`, `"64k"`, `"256M"`, `"1G"`. Zero is rejected.
pub fn parse_capacity(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    let (digits, shift) = match raw.chars().last()?.to_ascii_lowercase() {
        'k' => (&raw[..raw.len() - 1], 10),
        'm' => (&raw[..raw.len() - 1], 20),
        'g' => (&raw[..raw.len() - 1], 30),
        _ => (raw, 0),
    };

    let value: usize = digits.trim().parse().ok()?;
    if value == 0 {
        return None;
    }

    value.checked_mul(1 << shift)
}
