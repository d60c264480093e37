// Combined Hash Integration Test
//
// Stages a realistic server-name set through the key staging structure,
// builds the combined hash, and checks the lookup semantics of the three
// forms and their precedence.

use rusty_http_core::error::{CoreError, Status};
use rusty_http_core::hash::{hash_key, AddKeyFlags, CombinedHash, HashInit, KeyStage, StageSize};

fn build(keys: &[(&str, usize)]) -> CombinedHash<usize> {
    let mut stage = KeyStage::new(StageSize::Small);
    for (key, value) in keys {
        stage
            .add(key.as_bytes(), *value, AddKeyFlags::WILDCARD)
            .unwrap();
    }
    CombinedHash::build(&HashInit::default(), &stage).unwrap()
}

#[test]
fn precedence_exact_over_head_over_tail() {
    let combined = build(&[
        ("example.com", 10),
        ("*.example.com", 20),
        ("www.example.*", 30),
    ]);

    assert_eq!(combined.lookup(b"example.com"), Some(&10));
    assert_eq!(combined.lookup(b"mail.example.com"), Some(&20));
    // The head wildcard wins over the tail form for a name both cover.
    assert_eq!(combined.lookup(b"www.example.com"), Some(&20));
    assert_eq!(combined.lookup(b"www.example.org"), Some(&30));
    assert_eq!(combined.lookup(b"www.example"), None);
    assert_eq!(combined.lookup(b"other.net"), None);
    assert_eq!(combined.lookup(b""), None);
}

#[test]
fn leading_star_does_not_match_bare_name() {
    let combined = build(&[("*.example.com", 1)]);
    assert_eq!(combined.lookup(b"example.com"), None);
    assert_eq!(combined.lookup(b"deep.sub.example.com"), Some(&1));
}

#[test]
fn dot_form_matches_bare_name() {
    let combined = build(&[(".example.com", 1)]);
    assert_eq!(combined.lookup(b"example.com"), Some(&1));
    assert_eq!(combined.lookup(b"mail.example.com"), Some(&1));
}

#[test]
fn tail_wildcard_requires_continuation() {
    let combined = build(&[("api.internal.*", 7)]);
    assert_eq!(combined.lookup(b"api.internal.lan"), Some(&7));
    assert_eq!(combined.lookup(b"api.internal.svc.cluster"), Some(&7));
    assert_eq!(combined.lookup(b"api.internal"), None);
}

#[test]
fn nested_wildcards_prefer_the_longest_pattern() {
    let combined = build(&[
        (".example.com", 1),
        ("*.mail.example.com", 2),
        ("mx.mail.example.com", 3),
    ]);

    assert_eq!(combined.lookup(b"mx.mail.example.com"), Some(&3));
    assert_eq!(combined.lookup(b"imap.mail.example.com"), Some(&2));
    assert_eq!(combined.lookup(b"mail.example.com"), Some(&1));
    assert_eq!(combined.lookup(b"example.com"), Some(&1));
}

#[test]
fn staging_rejections_surface_as_status_codes() {
    let mut stage: KeyStage<usize> = KeyStage::new(StageSize::Small);
    stage
        .add(b"example.com", 1, AddKeyFlags::WILDCARD)
        .unwrap();

    let dup = stage
        .add(b"example.com", 2, AddKeyFlags::WILDCARD)
        .unwrap_err();
    assert_eq!(dup.status(), Status::Busy);
    assert!(matches!(dup, CoreError::AlreadyPresent(_)));

    let bad = stage.add(b"a.*.b", 3, AddKeyFlags::WILDCARD).unwrap_err();
    assert_eq!(bad.status(), Status::Declined);
    assert!(matches!(bad, CoreError::Malformed(_)));
}

#[test]
fn precomputed_hash_find_matches_lookup() {
    let combined = build(&[("example.com", 1), ("api.example.com", 2)]);
    let name = b"api.example.com";
    assert_eq!(combined.find(hash_key(name), name), Some(&2));
    assert_eq!(combined.find(hash_key(name), name), combined.lookup(name));
}

#[test]
fn many_names_build_and_resolve() {
    let mut keys: Vec<(String, usize)> = Vec::new();
    for i in 0..200 {
        keys.push((format!("host-{}.example.com", i), i));
    }
    let mut stage = KeyStage::new(StageSize::Large);
    for (key, value) in &keys {
        stage
            .add(key.as_bytes(), *value, AddKeyFlags::WILDCARD)
            .unwrap();
    }
    let init = HashInit {
        name: "server names".into(),
        max_size: 2048,
        bucket_size: 128,
    };
    let combined = CombinedHash::build(&init, &stage).unwrap();

    for (key, value) in &keys {
        assert_eq!(combined.lookup(key.as_bytes()), Some(value));
    }
    assert_eq!(combined.lookup(b"host-200.example.com"), None);
}
