// # Static Hash Table
//
// Offline-built exact-match hash. The builder picks the smallest bucket
// count for which every bucket's packed record bytes stay inside the
// configured bucket size, then lays records out in insertion order. Built
// tables are immutable and queried lock-free from any number of readers.

use log::error;

use crate::error::{CoreError, Result};
use crate::memory::align_up;

pub(crate) const PTR_SIZE: usize = std::mem::size_of::<usize>();
const CACHE_LINE: usize = 64;

/// One key scheduled for insertion: the key bytes, the precomputed hash
/// and the value to store.
#[derive(Debug, Clone)]
pub struct HashKey<V> {
    pub key: Vec<u8>,
    pub key_hash: usize,
    pub value: V,
}

impl<V> HashKey<V> {
    pub fn new(key: Vec<u8>, value: V) -> HashKey<V> {
        let key_hash = hash_key(&key);
        HashKey {
            key,
            key_hash,
            value,
        }
    }
}

/// Build parameters. `bucket_size` must leave room for at least one record
/// plus the terminator; `max_size` bounds the bucket-count search.
#[derive(Debug, Clone)]
pub struct HashInit {
    pub name: String,
    pub max_size: usize,
    pub bucket_size: usize,
}

impl Default for HashInit {
    fn default() -> Self {
        HashInit {
            name: "hash".into(),
            max_size: 512,
            bucket_size: 64,
        }
    }
}

#[derive(Debug)]
struct HashElt<V> {
    name: Box<[u8]>,
    value: V,
}

/// Immutable bucket-array hash. Empty buckets are `None`; records within a
/// bucket keep insertion order.
#[derive(Debug)]
pub struct StaticHash<V> {
    buckets: Box<[Option<Box<[HashElt<V>]>>]>,
}

impl<V> StaticHash<V> {
    /// Looks up `name` under its precomputed `key` hash.
    pub fn find(&self, key: usize, name: &[u8]) -> Option<&V> {
        let bucket = self.buckets[key % self.buckets.len()].as_ref()?;
        for elt in bucket.iter() {
            if elt.name.len() == name.len() && elt.name[..] == *name {
                return Some(&elt.value);
            }
        }
        None
    }

    /// The chosen bucket count.
    pub fn size(&self) -> usize {
        self.buckets.len()
    }
}

impl<V> StaticHash<V> {
    /// Builds the table, consuming the staged keys. Fails with `TooSmall`
    /// when a single record cannot fit a bucket and with `NoFit` when no
    /// bucket count below `max_size` keeps every bucket within budget.
    pub fn build(init: &HashInit, names: Vec<HashKey<V>>) -> Result<StaticHash<V>> {
        // The smallest bucket holds one zero-length record plus the
        // terminator.
        if init.bucket_size < 3 * PTR_SIZE {
            return Err(CoreError::TooSmall(format!(
                "could not build {}: bucket_size {} below minimum",
                init.name, init.bucket_size
            )));
        }
        for n in &names {
            if n.key.len() > u16::MAX as usize {
                return Err(CoreError::Malformed(format!(
                    "{}: key of {} bytes exceeds the record length field",
                    init.name,
                    n.key.len()
                )));
            }
            if init.bucket_size < elt_size(n.key.len()) + PTR_SIZE {
                error!(
                    "could not build the {}, you should increase {}_bucket_size: {}",
                    init.name, init.name, init.bucket_size
                );
                return Err(CoreError::TooSmall(format!(
                    "could not build {}: increase bucket_size {}",
                    init.name, init.bucket_size
                )));
            }
        }

        // Net bucket budget: every bucket ends with a null-value terminator.
        let bucket_size = init.bucket_size - PTR_SIZE;

        // Lower bound on the bucket count implied by the minimum record
        // size, with a heuristic boost for very large sparse tables.
        let mut start = names.len() / (bucket_size / (2 * PTR_SIZE));
        if start == 0 {
            start = 1;
        }
        if init.max_size > 10000 && !names.is_empty() && init.max_size / names.len() < 100 {
            start = init.max_size - 1000;
        }

        let mut test = vec![0usize; init.max_size.max(1)];
        let mut found = None;
        'sizes: for size in start..init.max_size {
            test[..size].fill(0);
            for n in &names {
                let key = n.key_hash % size;
                test[key] += elt_size(n.key.len());
                if test[key] > bucket_size {
                    continue 'sizes;
                }
            }
            found = Some(size);
            break;
        }

        let Some(size) = found else {
            error!(
                "could not build the {}, you should increase either {}_max_size: {} or {}_bucket_size: {}",
                init.name, init.name, init.max_size, init.name, init.bucket_size
            );
            return Err(CoreError::NoFit(format!(
                "could not build {}: increase max_size {} or bucket_size {}",
                init.name, init.max_size, init.bucket_size
            )));
        };

        let mut buckets: Vec<Vec<HashElt<V>>> = (0..size).map(|_| Vec::new()).collect();
        for n in names {
            let key = n.key_hash % size;
            let name: Box<[u8]> = n.key.iter().map(|c| c.to_ascii_lowercase()).collect();
            buckets[key].push(HashElt {
                name,
                value: n.value,
            });
        }

        let buckets = buckets
            .into_iter()
            .map(|b| {
                if b.is_empty() {
                    None
                } else {
                    Some(b.into_boxed_slice())
                }
            })
            .collect();

        Ok(StaticHash { buckets })
    }
}

/// Packed byte cost of one record: the value pointer, then the length
/// prefix and name rounded up so the next record is pointer-aligned.
pub(crate) fn elt_size(name_len: usize) -> usize {
    PTR_SIZE + align_up(name_len + 2, PTR_SIZE)
}

/// Rounds an accepted bucket's byte total to the cache line, the unit the
/// packed layout is sized in.
#[allow(dead_code)]
pub(crate) fn bucket_bytes(total: usize) -> usize {
    align_up(total, CACHE_LINE)
}

#[inline]
fn hash_char(key: usize, c: u8) -> usize {
    key.wrapping_mul(31).wrapping_add(c as usize)
}

/// Incremental string hash: `h = h*31 + c`.
pub fn hash_key(data: &[u8]) -> usize {
    data.iter().fold(0, |k, &c| hash_char(k, c))
}

/// As `hash_key`, lowercasing each byte first.
pub fn hash_key_lc(data: &[u8]) -> usize {
    data.iter()
        .fold(0, |k, &c| hash_char(k, c.to_ascii_lowercase()))
}

/// Lowercases `src` into `dst` and returns the hash of the result.
pub fn hash_strlow(dst: &mut [u8], src: &[u8]) -> usize {
    let mut key = 0;
    for (d, &s) in dst.iter_mut().zip(src.iter()) {
        *d = s.to_ascii_lowercase();
        key = hash_char(key, *d);
    }
    key
}
