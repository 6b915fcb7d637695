//! Shard Router
//!
//! Maps keys to shards through the Maglev ring and splits batches per shard.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::cache::ring::MaglevRing;
use crate::error::{CacheError, Result};

// == Shard Layout ==
/// How a cluster's keyspace is split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardLayout {
    /// Every shard is its own ring node.
    Shards(Vec<String>),
    /// Ring node -> shard name. Pointing several nodes at one shard gives it
    /// a larger share of the keyspace.
    Nodes(Vec<(String, String)>),
}

impl ShardLayout {
    /// Parses `shard0,shard1` or `a=shard0,b=shard0,c=shard1`.
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() {
            return Err(CacheError::Configuration(format!(
                "empty shard layout '{}'",
                text
            )));
        }

        if parts.iter().any(|part| part.contains('=')) {
            let nodes = parts
                .iter()
                .map(|part| match part.split_once('=') {
                    Some((node, shard)) if !node.trim().is_empty() && !shard.trim().is_empty() => {
                        Ok((node.trim().to_string(), shard.trim().to_string()))
                    }
                    _ => Err(CacheError::Configuration(format!(
                        "invalid node mapping '{}'",
                        part
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Self::Nodes(nodes))
        } else {
            Ok(Self::Shards(parts.into_iter().map(String::from).collect()))
        }
    }
}

// == Shard Router ==
#[derive(Debug, Clone)]
pub struct ShardRouter {
    shards: Vec<String>,
    /// Absent when there is a single shard
    ring: Option<MaglevRing>,
    /// Ring node index -> shard index
    node_shards: Vec<usize>,
}

impl ShardRouter {
    pub fn new(layout: &ShardLayout) -> Result<Self> {
        let pairs: Vec<(String, String)> = match layout {
            ShardLayout::Shards(names) => {
                let mut seen = HashSet::new();
                for name in names {
                    if !seen.insert(name.as_str()) {
                        return Err(CacheError::Configuration(format!(
                            "shard '{}' listed twice",
                            name
                        )));
                    }
                }
                names.iter().map(|name| (name.clone(), name.clone())).collect()
            }
            ShardLayout::Nodes(pairs) => pairs.clone(),
        };
        if pairs.is_empty() {
            return Err(CacheError::Configuration("No shards specified".to_string()));
        }

        let mut shards: Vec<String> = Vec::new();
        for (_, shard) in &pairs {
            if !shards.contains(shard) {
                shards.push(shard.clone());
            }
        }

        if shards.len() == 1 {
            return Ok(Self {
                shards,
                ring: None,
                node_shards: Vec::new(),
            });
        }

        let mut node_to_shard: HashMap<&str, &str> = HashMap::new();
        for (node, shard) in &pairs {
            if let Some(previous) = node_to_shard.insert(node.as_str(), shard.as_str()) {
                if previous != shard.as_str() {
                    return Err(CacheError::Configuration(format!(
                        "node '{}' points at both '{}' and '{}'",
                        node, previous, shard
                    )));
                }
            }
        }

        let ring = MaglevRing::new(node_to_shard.keys().copied())?;
        let mut node_shards = Vec::with_capacity(ring.nodes().len());
        for node in ring.nodes() {
            let shard = node_to_shard
                .get(node.as_str())
                .and_then(|shard| shards.iter().position(|name| name.as_str() == *shard))
                .ok_or_else(|| CacheError::UnknownShard(node.clone()))?;
            node_shards.push(shard);
        }

        Ok(Self {
            shards,
            ring: Some(ring),
            node_shards,
        })
    }

    /// Index of the shard owning `key`.
    pub fn shard_for(&self, key: &[u8]) -> usize {
        match &self.ring {
            Some(ring) => self.node_shards[ring.node_index(key)],
            None => 0,
        }
    }

    /// Splits `items` by owning shard, preserving their relative order.
    pub fn partition<T, F>(&self, items: impl IntoIterator<Item = T>, key: F) -> BTreeMap<usize, Vec<T>>
    where
        F: Fn(&T) -> &[u8],
    {
        let mut groups: BTreeMap<usize, Vec<T>> = BTreeMap::new();
        for item in items {
            let shard = self.shard_for(key(&item));
            groups.entry(shard).or_default().push(item);
        }
        groups
    }

    pub fn shard_names(&self) -> &[String] {
        &self.shards
    }

    pub fn shard_name(&self, index: usize) -> Result<&str> {
        self.shards
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| CacheError::UnknownShard(index.to_string()))
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.shards
            .iter()
            .position(|shard| shard == name)
            .ok_or_else(|| CacheError::UnknownShard(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}
