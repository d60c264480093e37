// # Hash Module
//
// Static hashing for the server's name lookups:
// - exact-match hash built offline into packed buckets
// - wildcard hash for head (`*.example.com`) and tail (`www.example.*`)
//   domain patterns
// - combined dispatcher with exact > head > tail precedence
// - key staging with validation and duplicate detection
//
// Built tables are immutable; lookups are lock-free.

pub mod keys;
pub mod table;
pub mod wildcard;

pub use keys::{AddKeyFlags, KeyStage, StageSize};
pub use table::{hash_key, hash_key_lc, hash_strlow, HashInit, HashKey, StaticHash};
pub use wildcard::{CombinedHash, WildcardHash, WildcardValue};
