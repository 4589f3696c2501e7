//! Hash-table placement shared between generation time and lookup time.
//!
//! Slot assignment for the type-mapping table is computed once while
//! generating the container program and baked into it; the runtime probe
//! walks the same sequence of slots. Both directions go through the routines
//! in this module so placement and lookup cannot drift apart.

/// Smallest table ever emitted.
pub const MIN_TABLE_SIZE: usize = 16;

/// Upper bound on probed slots before the lookup falls back to a linear scan
/// of all mappings.
pub const PROBE_LIMIT: usize = 8;

/// Hash key of a type name. Keys are computed once per mapping at generation
/// time and once per lookup at runtime.
pub fn hash_key(type_name: &str) -> u64 {
    fxhash::hash64(&type_name)
}

/// Power-of-two table size holding `mapping_count` entries at no more than
/// 75% load.
pub fn table_size_for(mapping_count: usize) -> usize {
    (mapping_count * 4 / 3 + 1)
        .next_power_of_two()
        .max(MIN_TABLE_SIZE)
}

/// Builds the open-addressed table for the given mapping keys. Each table
/// slot holds the index of a mapping; collisions resolve by linear probing,
/// the same step the runtime probe takes.
pub fn build_table(keys: &[u64]) -> Vec<Option<u32>> {
    let size = table_size_for(keys.len());
    let mask = size - 1;

    let mut table = vec![None; size];
    for (mapping, key) in keys.iter().enumerate() {
        let mut slot = *key as usize & mask;
        while table[slot].is_some() {
            slot = (slot + 1) & mask;
        }
        table[slot] = Some(mapping as u32);
    }
    table
}

/// Outcome of a bounded probe.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Probe {
    Found(u32),
    /// An empty slot was hit: the key is definitively not in the table.
    Absent,
    /// The probe bound was exhausted without resolution; the caller must
    /// fall back to a linear scan.
    Overflow,
}

/// Probes for a mapping with the given key, walking at most [PROBE_LIMIT]
/// slots. `matches` disambiguates hash collisions.
pub fn probe(table: &[Option<u32>], key: u64, matches: impl Fn(u32) -> bool) -> Probe {
    let mask = table.len() - 1;
    let mut slot = key as usize & mask;

    for _ in 0..PROBE_LIMIT {
        match table[slot] {
            None => return Probe::Absent,
            Some(mapping) if matches(mapping) => return Probe::Found(mapping),
            Some(_) => slot = (slot + 1) & mask,
        }
    }

    Probe::Overflow
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_size_tables_to_power_of_two_with_load_headroom() {
        assert_eq!(table_size_for(0), MIN_TABLE_SIZE);
        assert_eq!(table_size_for(11), MIN_TABLE_SIZE);
        assert_eq!(table_size_for(12), 32);
        assert_eq!(table_size_for(100), 256);
    }

    #[test]
    fn should_find_every_placed_key() {
        let keys: Vec<u64> = (0..40)
            .map(|i| hash_key(&format!("com.example.Type{i}")))
            .collect();
        let table = build_table(&keys);

        for (mapping, key) in keys.iter().enumerate() {
            match probe(&table, *key, |candidate| keys[candidate as usize] == *key) {
                Probe::Found(found) => assert_eq!(keys[found as usize], *key),
                Probe::Absent => panic!("placed key reported absent"),
                // pathological clustering is legal; the fallback tier covers it
                Probe::Overflow => assert!(mapping < keys.len()),
            }
        }
    }

    #[test]
    fn should_report_absent_on_empty_slot() {
        let keys = vec![hash_key("com.example.Repo")];
        let table = build_table(&keys);

        let missing = hash_key("com.example.Missing");
        // a near-empty table cannot produce 8 consecutive occupied slots
        assert_eq!(probe(&table, missing, |_| false), Probe::Absent);
    }

    #[test]
    fn should_overflow_on_saturated_probe_window() {
        // force every key into the same slot chain
        let table: Vec<Option<u32>> = (0..MIN_TABLE_SIZE).map(|i| Some(i as u32)).collect();
        assert_eq!(probe(&table, 0, |_| false), Probe::Overflow);
    }
}
