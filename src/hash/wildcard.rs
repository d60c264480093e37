// # Wildcard Hash
//
// Multi-level hash for domain patterns. A wildcard hash is an exact hash
// whose stored values are tagged: a value is either terminal data or a
// link to a child hash for the next segment, and either form may be
// restricted to wildcard matches only. Head-wildcard keys are staged
// dot-reversed ("*.example.com" as "com.example."), so every level hashes
// one segment and recursion walks the name right to left; tail-wildcard
// lookups walk left to right.
//
// Build is offline and single-threaded; lookup never mutates and may run
// concurrently from any number of readers.

use crate::common::list::AppendList;
use crate::common::queue::Queue;
use crate::error::Result;
use crate::hash::keys::KeyStage;
use crate::hash::table::{hash_key, HashInit, HashKey, StaticHash};

/// A value stored in a wildcard level. The four variants correspond to
/// the two tag bits of the packed representation: terminal or child hash,
/// unrestricted or wildcard-form only.
#[derive(Debug)]
pub enum WildcardValue<V> {
    /// Terminal data, valid for the exact and the wildcard form.
    Data(V),
    /// Terminal data, valid for the wildcard form only.
    WildcardData(V),
    /// Child hash; the exact form is also accepted here.
    SubHash(Box<WildcardHash<V>>),
    /// Child hash; only the wildcard form is accepted.
    SubHashWildcardOnly(Box<WildcardHash<V>>),
}

/// One level of the wildcard structure: an exact hash over segment names
/// plus the fallback value used when the lookup key is fully consumed.
#[derive(Debug)]
pub struct WildcardHash<V> {
    hash: StaticHash<WildcardValue<V>>,
    value: Option<V>,
}

impl<V: Clone> WildcardHash<V> {
    /// Builds a wildcard hash from pre-processed keys (dot-reversed for
    /// head wildcards, star-stripped for tail wildcards).
    pub fn build(init: &HashInit, names: &[HashKey<V>]) -> Result<WildcardHash<V>> {
        let mut sorted = names.to_vec();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));
        build_sorted(init, &sorted)
    }
}

/// Recursive build over keys sorted bytewise: maximal runs sharing the
/// first segment collapse into one entry whose tail residuals feed the
/// child level.
fn build_sorted<V: Clone>(init: &HashInit, names: &[HashKey<V>]) -> Result<WildcardHash<V>> {
    let mut curr: Vec<HashKey<WildcardValue<V>>> = Vec::new();

    let mut n = 0;
    while n < names.len() {
        let key = &names[n].key;
        let dot_pos = key.iter().position(|&c| c == b'.');
        let dot = dot_pos.is_some();
        let len = dot_pos.unwrap_or(key.len());
        let dot_len = len + 1;
        let skip = if dot { len + 1 } else { len };

        let mut next: Vec<HashKey<V>> = Vec::new();
        if key.len() != skip {
            next.push(HashKey {
                key: key[skip..].to_vec(),
                key_hash: 0,
                value: names[n].value.clone(),
            });
        }

        let mut i = n + 1;
        while i < names.len() {
            let other = &names[i].key;
            if other.len() < skip || other[..skip] != key[..skip] {
                break;
            }
            if !dot && other.len() > len && other[len] != b'.' {
                break;
            }
            next.push(HashKey {
                key: other[dot_len..].to_vec(),
                key_hash: 0,
                value: names[i].value.clone(),
            });
            i += 1;
        }

        let entry = if !next.is_empty() {
            let mut child = build_sorted(init, &next)?;
            if key.len() == skip {
                // This key terminates at the current level; its value
                // becomes the child's fallback.
                child.value = Some(names[n].value.clone());
            }
            if dot {
                WildcardValue::SubHashWildcardOnly(Box::new(child))
            } else {
                WildcardValue::SubHash(Box::new(child))
            }
        } else if dot {
            WildcardValue::WildcardData(names[n].value.clone())
        } else {
            WildcardValue::Data(names[n].value.clone())
        };

        curr.push(HashKey {
            key: key[..len].to_vec(),
            key_hash: hash_key(&key[..len]),
            value: entry,
        });
        n = i;
    }

    let hash = StaticHash::build(init, curr)?;
    Ok(WildcardHash { hash, value: None })
}

impl<V> WildcardHash<V> {
    /// Head-wildcard lookup ("*.example.com" patterns): hash the last
    /// segment, then recurse on the remainder.
    pub fn find_head(&self, name: &[u8]) -> Option<&V> {
        let mut n = name.len();
        while n > 0 {
            if name[n - 1] == b'.' {
                break;
            }
            n -= 1;
        }

        let segment = &name[n..];
        match self.hash.find(hash_key(segment), segment) {
            Some(WildcardValue::SubHash(child)) => {
                if n == 0 {
                    // Key fully consumed: the exact form is accepted.
                    return child.value.as_ref();
                }
                child.find_head(&name[..n - 1]).or(child.value.as_ref())
            }
            Some(WildcardValue::SubHashWildcardOnly(child)) => {
                if n == 0 {
                    return None;
                }
                child.find_head(&name[..n - 1]).or(child.value.as_ref())
            }
            Some(WildcardValue::WildcardData(v)) => {
                if n == 0 {
                    None
                } else {
                    Some(v)
                }
            }
            Some(WildcardValue::Data(v)) => Some(v),
            None => self.value.as_ref(),
        }
    }

    /// Tail-wildcard lookup ("www.example.*" patterns): hash the first
    /// segment, then recurse past it. A name without a dot cannot match.
    pub fn find_tail(&self, name: &[u8]) -> Option<&V> {
        let i = name.iter().position(|&c| c == b'.')?;

        let segment = &name[..i];
        match self.hash.find(hash_key(segment), segment) {
            Some(WildcardValue::SubHash(child)) | Some(WildcardValue::SubHashWildcardOnly(child)) => {
                child.find_tail(&name[i + 1..]).or(child.value.as_ref())
            }
            Some(WildcardValue::Data(v)) | Some(WildcardValue::WildcardData(v)) => Some(v),
            None => self.value.as_ref(),
        }
    }
}

/// Dispatcher over the three hash forms with fixed precedence:
/// exact, then head wildcard, then tail wildcard.
#[derive(Debug)]
pub struct CombinedHash<V> {
    pub exact: Option<StaticHash<V>>,
    pub wc_head: Option<WildcardHash<V>>,
    pub wc_tail: Option<WildcardHash<V>>,
}

impl<V> CombinedHash<V> {
    pub fn find(&self, key: usize, name: &[u8]) -> Option<&V> {
        if let Some(hash) = &self.exact {
            if let Some(v) = hash.find(key, name) {
                return Some(v);
            }
        }
        if name.is_empty() {
            return None;
        }
        if let Some(hash) = &self.wc_head {
            if let Some(v) = hash.find_head(name) {
                return Some(v);
            }
        }
        if let Some(hash) = &self.wc_tail {
            if let Some(v) = hash.find_tail(name) {
                return Some(v);
            }
        }
        None
    }

    /// Convenience form hashing `name` on the way in. The caller is
    /// expected to pass a lowercased name.
    pub fn lookup(&self, name: &[u8]) -> Option<&V> {
        self.find(hash_key(name), name)
    }
}

impl<V: Clone> CombinedHash<V> {
    /// Builds all three hashes from a staged key set. The wildcard arrays
    /// are sorted before the recursive build.
    pub fn build(init: &HashInit, stage: &KeyStage<V>) -> Result<CombinedHash<V>> {
        let exact_keys: Vec<HashKey<V>> = stage.keys().iter().cloned().collect();
        let exact = if exact_keys.is_empty() {
            None
        } else {
            Some(StaticHash::build(init, exact_keys)?)
        };

        let head_keys = sorted_keys(stage.wc_head_keys());
        let wc_head = if head_keys.is_empty() {
            None
        } else {
            Some(build_sorted(init, &head_keys)?)
        };

        let tail_keys = sorted_keys(stage.wc_tail_keys());
        let wc_tail = if tail_keys.is_empty() {
            None
        } else {
            Some(build_sorted(init, &tail_keys)?)
        };

        Ok(CombinedHash {
            exact,
            wc_head,
            wc_tail,
        })
    }
}

/// Drains a staged key list through the queue's stable sort.
fn sorted_keys<V: Clone>(list: &AppendList<HashKey<V>>) -> Vec<HashKey<V>> {
    let mut queue = Queue::new();
    for key in list.iter() {
        queue.insert_tail(key.clone());
    }
    queue.sort(|a: &HashKey<V>, b: &HashKey<V>| a.key.cmp(&b.key));

    let mut out = Vec::with_capacity(queue.len());
    while let Some(id) = queue.head() {
        out.push(queue.remove(id));
    }
    out
}
