//! Maglev Consistent Hashing
//!
//! Builds a fixed size lookup table where every node owns a near-equal share
//! of slots. Lookup is a single table index, and adding or removing a node
//! only moves roughly `1 / nodes` of the keyspace.
//!
//! See "Maglev: A Fast and Reliable Software Network Load Balancer" (2016).

use crate::error::{CacheError, Result};

/// Size of the lookup table. Must be prime.
pub const TABLE_SIZE: usize = 2053;

// == Maglev Ring ==
#[derive(Debug, Clone)]
pub struct MaglevRing {
    /// De-duplicated, sorted node names
    nodes: Vec<String>,
    /// Slot -> index into `nodes`
    lookup: Vec<u32>,
}

impl MaglevRing {
    /// Builds the lookup table for the given nodes.
    ///
    /// Fails with [`CacheError::Configuration`] when there are no nodes or
    /// more nodes than table slots.
    pub fn new<I, S>(nodes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut nodes: Vec<String> = nodes.into_iter().map(Into::into).collect();
        nodes.sort();
        nodes.dedup();

        if nodes.is_empty() {
            return Err(CacheError::Configuration("No nodes specified".to_string()));
        }
        if nodes.len() > TABLE_SIZE {
            return Err(CacheError::Configuration(format!(
                "Maximum node count is {}",
                TABLE_SIZE
            )));
        }

        let lookup = populate(&nodes);
        Ok(Self { nodes, lookup })
    }

    /// Returns the node owning `key`.
    pub fn node(&self, key: &[u8]) -> &str {
        &self.nodes[self.node_index(key)]
    }

    /// Returns the index (into [`MaglevRing::nodes`]) of the node owning `key`.
    pub fn node_index(&self, key: &[u8]) -> usize {
        let slot = crc32fast::hash(key) as usize % TABLE_SIZE;
        self.lookup[slot] as usize
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Number of table slots owned by each node, in node order.
    pub fn slot_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.nodes.len()];
        for &index in &self.lookup {
            counts[index as usize] += 1;
        }
        counts
    }
}

// == Preferences ==
/// Walks a node's permutation of preferred slots.
struct Preferences {
    offset: usize,
    skip: usize,
    rank: usize,
}

impl Preferences {
    fn for_node(node: &str) -> Self {
        let offset = md5_prefix(node, "offset") as usize % TABLE_SIZE;
        let skip = md5_prefix(node, "skip") as usize % (TABLE_SIZE - 1) + 1;
        Self {
            offset,
            skip,
            rank: 0,
        }
    }

    fn next_slot(&mut self) -> usize {
        let slot = (self.offset + self.rank * self.skip) % TABLE_SIZE;
        self.rank += 1;
        slot
    }
}

/// Round-robin over the nodes, each claiming its next preferred free slot,
/// until every slot is taken.
fn populate(nodes: &[String]) -> Vec<u32> {
    let mut preferences: Vec<Preferences> =
        nodes.iter().map(|node| Preferences::for_node(node)).collect();
    let mut lookup: Vec<Option<u32>> = vec![None; TABLE_SIZE];

    for i in 0..TABLE_SIZE {
        let node_index = i % nodes.len();
        let preference = &mut preferences[node_index];
        // skip is coprime with TABLE_SIZE, so the walk visits every slot
        loop {
            let slot = preference.next_slot();
            if lookup[slot].is_none() {
                lookup[slot] = Some(node_index as u32);
                break;
            }
        }
    }

    lookup.into_iter().map(|slot| slot.unwrap_or(0)).collect()
}

/// First four bytes of `md5(node ++ salt)` as a big-endian integer.
fn md5_prefix(node: &str, salt: &str) -> u32 {
    let digest = md5::compute(format!("{}{}", node, salt));
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn nodes_for_1_to_30(ring: &MaglevRing) -> BTreeMap<String, Vec<u32>> {
        let mut results: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for key in 1..=30u32 {
            results
                .entry(ring.node(key.to_string().as_bytes()).to_string())
                .or_default()
                .push(key);
        }
        results
    }

    fn ring_of(count: usize) -> MaglevRing {
        MaglevRing::new((1..=count).map(|i| format!("node{}", i))).unwrap()
    }

    #[test]
    fn test_two_nodes() {
        let results = nodes_for_1_to_30(&ring_of(2));

        assert_eq!(results["node1"], vec![3, 5, 8, 11, 12, 14, 18, 19, 20, 22, 27, 28, 29]);
        assert_eq!(
            results["node2"],
            vec![1, 2, 4, 6, 7, 9, 10, 13, 15, 16, 17, 21, 23, 24, 25, 26, 30]
        );
    }

    #[test]
    fn test_three_nodes() {
        let results = nodes_for_1_to_30(&ring_of(3));

        assert_eq!(results["node1"], vec![5, 18, 20, 22, 27, 28, 29]);
        assert_eq!(results["node2"], vec![1, 2, 4, 7, 9, 10, 13, 15, 21, 23, 26, 30]);
        assert_eq!(results["node3"], vec![3, 6, 8, 11, 12, 14, 16, 17, 19, 24, 25]);
    }

    #[test]
    fn test_four_nodes() {
        let results = nodes_for_1_to_30(&ring_of(4));

        assert_eq!(results["node1"], vec![5, 18, 20, 27, 29]);
        assert_eq!(results["node2"], vec![1, 2, 4, 7, 9, 10, 13, 21, 23, 26, 30]);
        assert_eq!(results["node3"], vec![6, 14, 16, 17, 19, 24, 25]);
        assert_eq!(results["node4"], vec![3, 8, 11, 12, 15, 22, 28]);
    }

    #[test]
    fn test_five_nodes() {
        let results = nodes_for_1_to_30(&ring_of(5));

        assert_eq!(results["node1"], vec![5, 18, 27, 29]);
        assert_eq!(results["node2"], vec![1, 2, 4, 9, 10, 13, 21, 23, 26, 30]);
        assert_eq!(results["node3"], vec![6, 14, 16, 17, 19, 25]);
        assert_eq!(results["node4"], vec![8, 11, 12, 15, 22, 28]);
        assert_eq!(results["node5"], vec![3, 7, 20, 24]);
    }

    #[test]
    fn test_node_count_limits() {
        assert!(matches!(
            MaglevRing::new(Vec::<String>::new()),
            Err(CacheError::Configuration(_))
        ));
        assert!(MaglevRing::new((0..TABLE_SIZE).map(|i| i.to_string())).is_ok());
        assert!(matches!(
            MaglevRing::new((0..=TABLE_SIZE).map(|i| i.to_string())),
            Err(CacheError::Configuration(_))
        ));
    }

    #[test]
    fn test_duplicate_nodes_are_collapsed() {
        let ring = MaglevRing::new(["b", "a", "b"]).unwrap();
        assert_eq!(ring.nodes(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_slots_are_evenly_shared() {
        let ring = ring_of(3);
        let counts = ring.slot_counts();

        assert_eq!(counts.iter().sum::<usize>(), TABLE_SIZE);
        for count in counts {
            assert!((684..=685).contains(&count), "uneven share: {}", count);
        }
    }

    #[test]
    fn test_removing_a_node_moves_about_one_share() {
        let before = MaglevRing::new((0..10).map(|i| format!("shard{}", i))).unwrap();
        let after = MaglevRing::new((0..9).map(|i| format!("shard{}", i))).unwrap();

        let keys: Vec<Vec<u8>> = (0..10_000).map(|i| format!("key:{}", i).into_bytes()).collect();
        let moved = keys
            .iter()
            .filter(|key| before.node(key) != after.node(key))
            .count();

        // Every key owned by the removed node has to move; little else should.
        let removed_share = keys.iter().filter(|key| before.node(key) == "shard9").count();
        assert!(moved >= removed_share);
        let fraction = moved as f64 / keys.len() as f64;
        assert!(fraction > 0.08 && fraction < 0.15, "moved {}", fraction);
    }

    #[test]
    fn test_single_node_owns_everything() {
        let ring = MaglevRing::new(["only"]).unwrap();
        assert_eq!(ring.node(b"anything"), "only");
        assert_eq!(ring.slot_counts(), vec![TABLE_SIZE]);
    }
}
