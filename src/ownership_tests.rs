// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use super::*;

fn marker() -> OwnershipMarker {
    OwnershipMarker::new("default/my-dns", "CloudflareDNS", "default", "my-dns")
}

#[test]
fn format_produces_canonical_marker() {
    assert_eq!(
        marker().format(),
        "heritage=cfgate,cfgate/owner=default/my-dns,cfgate/resource=CloudflareDNS/default/my-dns"
    );
}

#[test]
fn parse_roundtrips_format() {
    let original = marker();
    let parsed = OwnershipMarker::parse(&original.format()).unwrap();
    assert_eq!(parsed, original);
}

#[test]
fn parse_ignores_unknown_keys() {
    let parsed = OwnershipMarker::parse(
        "heritage=cfgate,cfgate/owner=a/b,cfgate/resource=CloudflareDNS/a/b,extra=ignored",
    )
    .unwrap();
    assert_eq!(parsed.owner_id, "a/b");
}

#[test]
fn parse_rejects_wrong_heritage() {
    assert!(OwnershipMarker::parse("heritage=external-dns,cfgate/owner=a/b").is_none());
    assert!(OwnershipMarker::parse("cfgate/owner=a/b").is_none());
}

#[test]
fn parse_rejects_missing_owner() {
    assert!(OwnershipMarker::parse("heritage=cfgate").is_none());
}

#[test]
fn parse_rejects_free_text() {
    assert!(OwnershipMarker::parse("some human-written comment").is_none());
    assert!(OwnershipMarker::parse("").is_none());
}

#[test]
fn owns_requires_full_identity_match() {
    let mine = marker();
    assert!(mine.owns(&marker()));

    let same_owner_other_resource =
        OwnershipMarker::new("default/my-dns", "CloudflareDNS", "default", "other");
    assert!(!same_owner_other_resource.owns(&mine));

    let other_owner = OwnershipMarker::new("prod/my-dns", "CloudflareDNS", "default", "my-dns");
    assert!(!other_owner.owns(&mine));
}

#[test]
fn classify_owned() {
    let mine = marker();
    let comment = mine.format();
    assert_eq!(classify(Some(comment.as_str()), &mine), Ownership::Owned);
}

#[test]
fn classify_foreign_reports_other_owner() {
    let mine = marker();
    let theirs = OwnershipMarker::new("prod/theirs", "CloudflareDNS", "prod", "theirs");
    let comment = theirs.format();
    assert_eq!(
        classify(Some(comment.as_str()), &mine),
        Ownership::Foreign {
            owner_id: "prod/theirs".to_string()
        }
    );
}

#[test]
fn classify_unmarked_for_absent_or_garbage() {
    let mine = marker();
    assert_eq!(classify(None, &mine), Ownership::Unmarked);
    assert_eq!(classify(Some("migrated 2019"), &mine), Ownership::Unmarked);
}

#[test]
fn txt_companion_name_prefixes_hostname() {
    assert_eq!(
        txt_companion_name("app.example.com", None),
        "_cfgate.app.example.com"
    );
    assert_eq!(
        txt_companion_name("app.example.com", Some("_owner")),
        "_owner.app.example.com"
    );
}

#[test]
fn txt_companion_target_inverts_naming() {
    assert_eq!(
        txt_companion_target("_cfgate.app.example.com", None),
        Some("app.example.com")
    );
    assert_eq!(txt_companion_target("app.example.com", None), None);
    assert_eq!(txt_companion_target("_cfgate.", None), None);
}
