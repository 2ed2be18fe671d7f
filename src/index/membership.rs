use serde::{Deserialize, Serialize};

/// Fraction of capacity at which the filter is rebuilt at a larger size.
pub const REGENERATION_THRESHOLD: f64 = 0.9;

/// Bloom filter over symbol names. No false negatives; the false positive
/// rate holds while the number of inserted names stays under `capacity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
    capacity: usize,
    false_positive_rate: f64,
    inserted: usize,
}

impl MembershipFilter {
    pub fn new(capacity: usize, false_positive_rate: f64) -> Self {
        let capacity = capacity.max(1);
        let fp = false_positive_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;

        // m = -n ln p / (ln 2)^2, k = (m / n) ln 2
        let num_bits = ((-(capacity as f64) * fp.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / capacity as f64) * ln2).round().clamp(1.0, 32.0) as u32;
        let words = num_bits.div_ceil(64) as usize;

        Self {
            bits: vec![0; words],
            num_bits,
            num_hashes,
            capacity,
            false_positive_rate: fp,
            inserted: 0,
        }
    }

    /// A filter sized for `capacity` holding every name in `names`.
    pub fn build<'a>(
        names: impl IntoIterator<Item = &'a str>,
        capacity: usize,
        false_positive_rate: f64,
    ) -> Self {
        let mut filter = Self::new(capacity, false_positive_rate);
        for name in names {
            filter.insert(name);
        }
        filter
    }

    fn hashes(&self, item: &str) -> (u64, u64) {
        let digest = blake3::hash(item.as_bytes());
        let bytes = digest.as_bytes();
        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        a.copy_from_slice(&bytes[0..8]);
        b.copy_from_slice(&bytes[8..16]);
        // Odd step so the probe sequence never collapses onto one bit.
        (u64::from_le_bytes(a), u64::from_le_bytes(b) | 1)
    }

    fn positions(&self, item: &str) -> impl Iterator<Item = u64> + '_ {
        let (h1, h2) = self.hashes(item);
        (0..self.num_hashes as u64)
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    pub fn insert(&mut self, item: &str) {
        let positions: Vec<u64> = self.positions(item).collect();
        for bit in positions {
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
        self.inserted += 1;
    }

    pub fn might_contain(&self, item: &str) -> bool {
        self.positions(item)
            .all(|bit| self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn false_positive_rate(&self) -> f64 {
        self.false_positive_rate
    }

    pub fn inserted(&self) -> usize {
        self.inserted
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// True once `entries` gets close enough to capacity that the false
    /// positive rate would start to drift.
    pub fn needs_regeneration(&self, entries: usize) -> bool {
        entries as f64 > self.capacity as f64 * REGENERATION_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let names: Vec<String> = (0..2000).map(|i| format!("symbol_{i}")).collect();
        let filter = MembershipFilter::build(names.iter().map(|s| s.as_str()), 2000, 0.01);
        for name in &names {
            assert!(filter.might_contain(name), "missing {name}");
        }
    }

    #[test]
    fn test_false_positive_rate_is_reasonable() {
        let filter = MembershipFilter::build(
            (0..1000).map(|i| format!("present_{i}")).collect::<Vec<_>>().iter().map(|s| s.as_str()),
            1000,
            0.01,
        );
        let false_positives = (0..10_000)
            .filter(|i| filter.might_contain(&format!("absent_{i}")))
            .count();
        // 1% target; allow generous slack.
        assert!(false_positives < 500, "too many false positives: {false_positives}");
    }

    #[test]
    fn test_regeneration_threshold() {
        let filter = MembershipFilter::new(100, 0.01);
        assert!(!filter.needs_regeneration(90));
        assert!(filter.needs_regeneration(91));
        assert!(filter.num_hashes() >= 1);
    }
}
