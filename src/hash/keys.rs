// # Key Staging
//
// Collects keys for a combined hash build, validating wildcard shape and
// rejecting duplicates before anything is built. Keys are partitioned into
// three output arrays - exact, head-wildcard and tail-wildcard - and head
// wildcards are stored in their dot-reversed build form.

use bitflags::bitflags;

use crate::common::list::AppendList;
use crate::error::{CoreError, Result};
use crate::hash::table::{hash_key, HashKey};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AddKeyFlags: u32 {
        /// The key may carry a leading or trailing wildcard.
        const WILDCARD = 1 << 0;
        /// Do not lowercase the key in place.
        const READONLY = 1 << 1;
    }
}

/// Sizing of the deduplication index tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageSize {
    Small,
    Large,
}

const SMALL_HSIZE: usize = 107;
const LARGE_HSIZE: usize = 10007;

const SMALL_ASIZE: usize = 4;
const LARGE_ASIZE: usize = 16384;

/// Staging structure for one combined hash build.
pub struct KeyStage<V> {
    hsize: usize,
    keys: AppendList<HashKey<V>>,
    dns_wc_head: AppendList<HashKey<V>>,
    dns_wc_tail: AppendList<HashKey<V>>,
    keys_hash: Vec<Vec<Vec<u8>>>,
    dns_wc_head_hash: Vec<Vec<Vec<u8>>>,
    dns_wc_tail_hash: Vec<Vec<Vec<u8>>>,
}

impl<V> KeyStage<V> {
    pub fn new(size: StageSize) -> KeyStage<V> {
        let (asize, hsize) = match size {
            StageSize::Small => (SMALL_ASIZE, SMALL_HSIZE),
            StageSize::Large => (LARGE_ASIZE, LARGE_HSIZE),
        };
        KeyStage {
            hsize,
            keys: AppendList::new(asize),
            dns_wc_head: AppendList::new(asize),
            dns_wc_tail: AppendList::new(asize),
            keys_hash: vec![Vec::new(); hsize],
            dns_wc_head_hash: vec![Vec::new(); hsize],
            dns_wc_tail_hash: vec![Vec::new(); hsize],
        }
    }

    /// Stages one key. Wildcard shapes accepted: `*.example.com`,
    /// `.example.com` and `www.example.*`; anything else carrying a star
    /// is `Malformed`, and a repeated key is `AlreadyPresent`.
    pub fn add(&mut self, key: &[u8], value: V, flags: AddKeyFlags) -> Result<()> {
        let mut last = key.len();
        let mut skip = 0usize;
        let mut wildcard = false;

        if flags.contains(AddKeyFlags::WILDCARD) {
            let mut stars = 0;
            for (i, &c) in key.iter().enumerate() {
                if c == b'*' {
                    stars += 1;
                    if stars > 1 {
                        return Err(CoreError::Malformed(display(key)));
                    }
                }
                if c == b'.' && key.get(i + 1) == Some(&b'.') {
                    return Err(CoreError::Malformed(display(key)));
                }
            }

            if key.len() > 1 && key[0] == b'.' {
                skip = 1;
                wildcard = true;
            } else if key.len() > 2 && key[0] == b'*' && key[1] == b'.' {
                skip = 2;
                wildcard = true;
            } else if key.len() > 2 && key[last - 2] == b'.' && key[last - 1] == b'*' {
                skip = 0;
                last -= 2;
                wildcard = true;
            } else if stars > 0 {
                return Err(CoreError::Malformed(display(key)));
            }
        }

        if !wildcard {
            let mut stored = key[..last].to_vec();
            if !flags.contains(AddKeyFlags::READONLY) {
                stored.make_ascii_lowercase();
            }
            let hash = hash_key(&stored);
            let k = hash % self.hsize;

            if self.keys_hash[k].iter().any(|name| *name == stored) {
                return Err(CoreError::AlreadyPresent(display(key)));
            }
            self.keys_hash[k].push(stored.clone());
            self.keys.push(HashKey {
                key: stored,
                key_hash: hash,
                value,
            });
            return Ok(());
        }

        // Wildcard keys are always lowercased; the hash form is
        // case-insensitive by construction.
        let mut low = key[skip..last].to_vec();
        low.make_ascii_lowercase();
        let k = hash_key(&low) % self.hsize;

        if skip == 1 {
            // The dot form also answers for the bare name, so it conflicts
            // with an identical exact key.
            if self.keys_hash[k].iter().any(|name| *name == low) {
                return Err(CoreError::AlreadyPresent(display(key)));
            }
            self.keys_hash[k].push(low.clone());
        }

        let processed = if skip > 0 {
            reverse_dots(&low, skip == 2)
        } else {
            low.clone()
        };

        let (list, table) = if skip > 0 {
            (&mut self.dns_wc_head, &mut self.dns_wc_head_hash)
        } else {
            (&mut self.dns_wc_tail, &mut self.dns_wc_tail_hash)
        };

        if table[k].iter().any(|name| *name == low) {
            return Err(CoreError::AlreadyPresent(display(key)));
        }
        table[k].push(low);
        list.push(HashKey {
            key: processed,
            key_hash: 0,
            value,
        });
        Ok(())
    }

    pub fn keys(&self) -> &AppendList<HashKey<V>> {
        &self.keys
    }

    pub fn wc_head_keys(&self) -> &AppendList<HashKey<V>> {
        &self.dns_wc_head
    }

    pub fn wc_tail_keys(&self) -> &AppendList<HashKey<V>> {
        &self.dns_wc_tail
    }
}

fn display(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

/// Rewrites "example.com" as "com.example", with a trailing dot for the
/// star form: a dot-terminated build key only matches when the lookup name
/// still has segments left in front of it.
fn reverse_dots(src: &[u8], trailing_dot: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() + 1);
    for segment in src.split(|&c| c == b'.').rev() {
        out.extend_from_slice(segment);
        out.push(b'.');
    }
    if !trailing_dot {
        out.pop();
    }
    out
}
