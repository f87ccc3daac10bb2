//! String Pool: per-column deduplication of string values
//! into small integer refs, with a promotion-to-unpooled-string rule
//! when cardinality grows past a threshold.

use hashbrown::HashMap;

/// Maps distinct string bytes (already un-escaped) to a dense 1-based
/// ref. Ref `0` is reserved to mean missing and is never assigned.
#[derive(Clone, Debug, Default)]
pub struct PoolRefMap {
    refs: HashMap<Box<[u8]>, u32>,
    /// Insertion order, so the flattened refs array can be produced by a
    /// stable sort on ref.
    by_ref: Vec<Box<[u8]>>,
}

impl PoolRefMap {
    pub fn new() -> Self {
        PoolRefMap::default()
    }

    pub fn len(&self) -> usize {
        self.by_ref.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ref.is_empty()
    }

    /// Looks up `key`, assigning the next ref (starting at 1) if it is
    /// new.
    pub fn intern(&mut self, key: &[u8]) -> u32 {
        if let Some(&r) = self.refs.get(key) {
            return r;
        }
        let r = (self.by_ref.len() + 1) as u32;
        self.by_ref.push(Box::from(key));
        self.refs.insert(Box::from(key), r);
        r
    }

    pub fn get(&self, key: &[u8]) -> Option<u32> {
        self.refs.get(key).copied()
    }

    /// Flattens the map into a dense `Vec<Box<str>>` indexed by `ref -
    /// 1`, consuming the map. Refs are assigned densely starting at 1 in
    /// insertion order, so this is just `by_ref` as-is, decoded to UTF-8
    /// lossily (pooled columns are always STRING-typed).
    pub fn into_sorted_refs(self) -> Vec<Box<str>> {
        self.by_ref
            .into_iter()
            .map(|bytes| {
                String::from_utf8_lossy(&bytes).into_owned().into_boxed_str()
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], u32)> {
        self.by_ref
            .iter()
            .enumerate()
            .map(|(i, k)| (k.as_ref(), (i + 1) as u32))
    }
}

/// True once a column's distinct-value cardinality exceeds
/// `pool_threshold * row_estimate`, at which point the inference engine
/// promotes the column from POOL to plain STRING.
pub fn should_promote_to_string(pool: &PoolRefMap, threshold: f64, row_estimate: usize) -> bool {
    (pool.len() as f64) > threshold * (row_estimate.max(1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable_and_dense() {
        let mut pool = PoolRefMap::new();
        assert_eq!(pool.intern(b"a"), 1);
        assert_eq!(pool.intern(b"b"), 2);
        assert_eq!(pool.intern(b"a"), 1);
        assert_eq!(pool.len(), 2);
        let refs = pool.into_sorted_refs();
        assert_eq!(&*refs[0], "a");
        assert_eq!(&*refs[1], "b");
    }

    #[test]
    fn promotion_threshold() {
        let mut pool = PoolRefMap::new();
        for i in 0..60 {
            pool.intern(format!("v{i}").as_bytes());
        }
        assert!(should_promote_to_string(&pool, 0.5, 100));
        assert!(!should_promote_to_string(&pool, 0.7, 100));
    }
}
