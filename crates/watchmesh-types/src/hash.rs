/// The classic SDBM string hash, folded to `u32`.
///
/// Used by the authority election (`watchmesh-core::authority`) to pick a
/// stable, deterministic owner for a checkable out of the sorted set of
/// endpoints that are connected and support a given feature. Every node
/// computes the same hash for the same checkable name, so no coordination
/// protocol is needed to agree on ownership.
pub fn sdbm_hash(s: &str) -> u32 {
    let mut hash: u32 = 0;
    for byte in s.as_bytes() {
        hash = (*byte as u32)
            .wrapping_add(hash.wrapping_shl(6))
            .wrapping_add(hash.wrapping_shl(16))
            .wrapping_sub(hash);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(sdbm_hash("host!http"), sdbm_hash("host!http"));
    }

    #[test]
    fn distinguishes_inputs() {
        assert_ne!(sdbm_hash("host!http"), sdbm_hash("host!https"));
    }

    #[test]
    fn empty_string_hashes_to_zero() {
        assert_eq!(sdbm_hash(""), 0);
    }
}
