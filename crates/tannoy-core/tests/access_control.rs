//! Directory-level access control scenarios: multi-parent mounts, links as
//! grants, and overlay teardown as revocation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use tannoy_core::{Directory, FnHandler, Node, Request, RequestKind};

fn counter(directory: &Directory, path: &str, name: &str, catch_all: bool) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let captured = count.clone();
    let handler = Arc::new(FnHandler::with_catch_all(name, catch_all, move |_| {
        captured.fetch_add(1, Ordering::SeqCst);
    }));
    assert!(directory.add_handler(path, handler));
    count
}

fn publish(directory: &Directory, base: &str, path: &str) -> usize {
    let mut request = Request::new(path, RequestKind::Publish);
    request.add_argument(json!("data"));
    directory.handle(base, &mut request)
}

#[test]
fn shared_subtree_is_reachable_under_every_parent() {
    let directory = Directory::new();
    assert!(directory.create_path("/teams/alpha"));
    assert!(directory.create_path("/teams/beta"));
    assert!(directory.create_path("/shared/docs"));

    // Graft the shared subtree under both team homes.
    assert!(directory.link("/teams/alpha", "/shared"));
    assert!(directory.link("/teams/beta", "/shared"));

    let count = counter(&directory, "/shared/docs", "audit", false);
    assert_eq!(publish(&directory, "/teams/alpha", "/shared/docs"), 1);
    assert_eq!(publish(&directory, "/teams/beta", "/shared/docs"), 1);
    assert_eq!(publish(&directory, "/", "/shared/docs"), 1);
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn link_is_per_grantee_and_revocation_is_local() {
    let directory = Directory::new();
    assert!(directory.create_path("/home/alice"));
    assert!(directory.create_path("/home/bob"));
    assert!(directory.create_path("/root/feed"));

    assert!(directory.link("/home/alice", "/root/feed"));
    assert!(directory.link("/home/bob", "/root/feed"));

    // Each grantee listens through their own link.
    let alice = counter(&directory, "/home/alice/feed", "alice", false);
    let bob = counter(&directory, "/home/bob/feed", "bob", false);

    // A publish through either home reaches both overlays: both overlay
    // handlers sit on the one real node.
    assert_eq!(publish(&directory, "/home/alice", "/feed"), 2);
    assert_eq!(alice.load(Ordering::SeqCst), 1);
    assert_eq!(bob.load(Ordering::SeqCst), 1);

    // Revoking Alice's grant silences only Alice.
    assert!(directory.unlink("/home/alice", "/root/feed"));
    assert_eq!(publish(&directory, "/home/bob", "/feed"), 1);
    assert_eq!(alice.load(Ordering::SeqCst), 1);
    assert_eq!(bob.load(Ordering::SeqCst), 2);

    // Alice can no longer reach the feed at all.
    assert_eq!(publish(&directory, "/home/alice", "/feed"), 0);
}

#[test]
fn overlay_teardown_reaches_lazily_created_grandchildren() {
    let directory = Directory::new();
    assert!(directory.create_path("/root/tree/branch/leaf"));
    assert!(directory.create_path("/home/user"));
    assert!(directory.link("/home/user", "/root/tree"));

    // Touch the deep path through the link so the virtual wrappers for
    // branch and leaf are materialised, then hang a handler off the leaf.
    let count = counter(&directory, "/home/user/tree/branch/leaf", "deep", false);
    assert_eq!(publish(&directory, "/home/user", "/tree/branch/leaf"), 1);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    assert!(directory.unlink("/home/user", "/root/tree"));

    // The real subtree no longer carries any trace of the link.
    assert_eq!(publish(&directory, "/root", "/tree/branch/leaf"), 0);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn same_target_can_be_linked_under_distinct_paths() {
    let directory = Directory::new();
    assert!(directory.create_path("/a"));
    assert!(directory.create_path("/b"));
    assert!(directory.create_path("/root/topic"));

    assert!(directory.link("/a", "/root/topic"));
    let _count = counter(&directory, "/a/topic", "listener", false);

    // The overlay names include the grantee path, so a second grantee
    // links the same target even while the first overlay is installed.
    assert!(directory.link("/b", "/root/topic"));
    // Re-linking the same grantee is refused while its overlay stands.
    assert!(!directory.link("/a", "/root/topic"));
}

#[test]
fn catch_alls_fire_through_links() {
    let directory = Directory::new();
    assert!(directory.create_path("/root/topics/news"));
    assert!(directory.create_path("/home/user"));
    assert!(directory.link("/home/user", "/root/topics"));

    // A wildcard listener at the linked node and a plain listener on the
    // real leaf.
    let wildcard = counter(&directory, "/home/user/topics", "all", true);
    let leaf = counter(&directory, "/root/topics/news", "news", false);

    // Publishing to a leaf that exists fires both.
    assert_eq!(publish(&directory, "/home/user", "/topics/news"), 2);
    assert_eq!(wildcard.load(Ordering::SeqCst), 1);
    assert_eq!(leaf.load(Ordering::SeqCst), 1);

    // Publishing to a missing leaf still reaches the wildcard along the
    // covered prefix.
    assert_eq!(publish(&directory, "/home/user", "/topics/gossip"), 1);
    assert_eq!(wildcard.load(Ordering::SeqCst), 2);
    assert_eq!(leaf.load(Ordering::SeqCst), 1);
}

#[test]
fn remove_path_keeps_other_parents_alive() {
    let directory = Directory::new();
    assert!(directory.create_path("/x"));
    assert!(directory.create_path("/y"));
    assert!(directory.create_path("/x/shared/data"));
    let shared = directory.node("/x/shared").unwrap();
    let y = directory.node("/y").unwrap();
    assert!(y.mount(shared).is_ok());

    assert!(directory.remove_path("/x/shared"));
    assert!(!directory.path_exists("/x/shared"));
    assert!(directory.path_exists("/y/shared/data"));
}

#[test]
fn handler_counts_include_every_overlay_invocation() {
    let directory = Directory::new();
    assert!(directory.create_path("/root/t"));
    assert!(directory.create_path("/u1"));
    assert!(directory.create_path("/u2"));
    assert!(directory.link("/u1", "/root/t"));
    assert!(directory.link("/u2", "/root/t"));
    let _h1 = counter(&directory, "/u1/t", "h1", false);
    let _h2 = counter(&directory, "/u2/t", "h2", false);
    let _real = counter(&directory, "/root/t", "real", false);

    // Three handlers run at the real node: its own plus one overlay per
    // link.
    assert_eq!(publish(&directory, "/root", "/t"), 3);
}
