//! End-to-end protocol scenarios over an in-process mesh.

use atlas::directory::EntryState;
use atlas::distribution::{Mesh, Transport};
use atlas::{Config, DirectoryMessage, GcError, Node, NodeId, ObjectId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Builds a mesh of `n` nodes with a flush threshold high enough that
/// returns only move on explicit `flush_returns` calls.
fn mesh_of(n: u32) -> (Mesh, Vec<Node>) {
    let mesh = Mesh::new();
    let nodes = (1..=n)
        .map(|i| mesh.add_node(Config::new(NodeId::new(i)).flush_threshold(1000)))
        .collect();
    (mesh, nodes)
}

/// Polls until the owner has collected `object` or the deadline passes.
async fn wait_collected(owner: &Node, object: ObjectId) -> bool {
    for _ in 0..200 {
        if owner.directory().state_of(object) == Some(EntryState::Collected) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn end_to_end_split_and_release_in_any_order() {
    // create(4) -> ref0{4}; duplicate(ref0) -> ref0{2}, ref1{2};
    // duplicate(ref1) -> ref1{1}, ref2{1}. Releasing all three, in any
    // order, collects exactly once.
    for order in [[0, 1, 2], [2, 1, 0], [1, 2, 0], [0, 2, 1]] {
        let (_mesh, nodes) = mesh_of(1);
        let node = &nodes[0];

        let finalized = Arc::new(AtomicUsize::new(0));
        let counter = finalized.clone();
        let mut ref0 = node
            .create_managed(4, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let object = ref0.object();

        let mut ref1 = node.duplicate(&mut ref0).await.unwrap();
        assert_eq!(ref0.credit(), 2);
        assert_eq!(ref1.credit(), 2);

        let ref2 = node.duplicate(&mut ref1).await.unwrap();
        assert_eq!(ref1.credit(), 1);
        assert_eq!(ref2.credit(), 1);

        // No replenishment happened: only the initial quota was issued.
        assert_eq!(node.directory().books_of(object), Some((4, 0)));

        let mut refs = [Some(ref0), Some(ref1), Some(ref2)];
        for i in order {
            assert_eq!(finalized.load(Ordering::SeqCst), 0);
            node.release(refs[i].take().unwrap());
        }

        assert_eq!(finalized.load(Ordering::SeqCst), 1);
        assert_eq!(node.directory().books_of(object), Some((4, 4)));
        assert_eq!(node.directory().state_of(object), Some(EntryState::Collected));
    }
}

#[tokio::test]
async fn exhaustion_triggers_one_replenishment_round_trip() {
    // create(initial_quota=1) at the owner, held remotely. Duplication
    // must perform one RequestCredit round trip with Q=8: the holder ends
    // up with two references summing to 1 + 8 = 9 and total_issued = 9.
    let (_mesh, nodes) = mesh_of(2);
    let (owner, holder) = (&nodes[0], &nodes[1]);

    let mut r0 = holder.create_on(owner.id(), 1).await.unwrap();
    assert_eq!(r0.owner(), owner.id());
    assert_eq!(r0.credit(), 1);
    let object = r0.object();

    let r1 = holder.duplicate(&mut r0).await.unwrap();
    assert_eq!(r0.credit() + r1.credit(), 9);
    assert_eq!(r0.credit(), 5);
    assert_eq!(r1.credit(), 4);
    assert_eq!(owner.directory().books_of(object), Some((9, 0)));

    holder.release(r0);
    holder.release(r1);
    // Both returns coalesce into one message for the same object.
    assert_eq!(holder.pending_returns(), 1);
    holder.flush_returns().await;

    assert!(wait_collected(owner, object).await);
    assert_eq!(owner.directory().books_of(object), Some((9, 9)));
}

#[tokio::test]
async fn copies_scattered_across_nodes_still_balance() {
    let (_mesh, nodes) = mesh_of(3);
    let owner = &nodes[0];

    let finalized = Arc::new(AtomicUsize::new(0));
    let counter = finalized.clone();
    let mut root = owner
        .create_managed(16, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    let object = root.object();

    // Owner hands copies to the other two nodes.
    let for_b = owner.duplicate(&mut root).await.unwrap();
    let for_c = owner.duplicate(&mut root).await.unwrap();

    // Remote holders split further before releasing.
    let mut held_b = for_b;
    let held_b2 = nodes[1].duplicate(&mut held_b).await.unwrap();
    nodes[1].release(held_b);
    nodes[1].release(held_b2);
    nodes[2].release(for_c);

    nodes[1].flush_returns().await;
    nodes[2].flush_returns().await;
    assert_eq!(finalized.load(Ordering::SeqCst), 0);

    // The owner still holds the root: the object must be live.
    assert_eq!(owner.directory().state_of(object), Some(EntryState::Live));

    owner.release(root);
    assert!(wait_collected(owner, object).await);
    assert_eq!(finalized.load(Ordering::SeqCst), 1);

    let (issued, returned) = owner.directory().books_of(object).unwrap();
    assert_eq!(issued, returned);
}

#[tokio::test]
async fn late_return_after_collection_is_ignored() {
    let (mesh, nodes) = mesh_of(1);
    let owner = &nodes[0];

    let finalized = Arc::new(AtomicUsize::new(0));
    let counter = finalized.clone();
    let mut r0 = owner
        .create_managed(2, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    let object = r0.object();

    let r1 = owner.duplicate(&mut r0).await.unwrap();
    owner.release(r0);
    owner.release(r1);
    assert!(wait_collected(owner, object).await);
    assert_eq!(finalized.load(Ordering::SeqCst), 1);

    // A stray return arriving after collection must not error, must not
    // re-finalize, and must not corrupt the tombstone.
    mesh.cast(
        owner.id(),
        DirectoryMessage::ReturnCredit { object, amount: 1 },
    )
    .await
    .unwrap();

    assert_eq!(finalized.load(Ordering::SeqCst), 1);
    assert_eq!(owner.directory().books_of(object), Some((2, 2)));
}

#[tokio::test]
async fn delayed_returns_arrive_late_but_are_never_lost() {
    let (mesh, nodes) = mesh_of(2);
    let (owner, holder) = (&nodes[0], &nodes[1]);

    let mut r0 = owner.create(2).unwrap();
    let object = r0.object();
    let r1 = owner.duplicate(&mut r0).await.unwrap();
    owner.release(r0);

    mesh.set_cast_delay(Some(Duration::from_millis(50)));
    holder.release(r1);
    holder.flush_returns().await;

    // The return is in flight: not yet applied, but already owned by the
    // transport.
    assert_eq!(owner.directory().state_of(object), Some(EntryState::Live));
    assert_eq!(holder.pending_returns(), 0);

    assert!(wait_collected(owner, object).await);
    assert_eq!(owner.directory().books_of(object), Some((2, 2)));
}

#[tokio::test]
async fn unreachable_owner_fails_duplication_and_keeps_the_ref() {
    let (mesh, nodes) = mesh_of(2);
    let (owner, holder) = (&nodes[0], &nodes[1]);

    let mut r = holder.create_on(owner.id(), 1).await.unwrap();
    let object = r.object();

    mesh.partition(owner.id());
    let err = holder.duplicate(&mut r).await.unwrap_err();
    assert!(matches!(err, GcError::Transport(_)));
    // The reference is unchanged and still usable once the owner is back.
    assert_eq!(r.credit(), 1);

    // Parked returns survive the partition too: they are re-queued until
    // the owner is reachable again.
    mesh.heal(owner.id());
    let r2 = holder.duplicate(&mut r).await.unwrap();

    mesh.partition(owner.id());
    holder.release(r);
    holder.release(r2);
    holder.flush_returns().await;
    assert_eq!(holder.pending_returns(), 1);

    mesh.heal(owner.id());
    holder.flush_returns().await;
    assert_eq!(holder.pending_returns(), 0);
    assert!(wait_collected(owner, object).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_remote_releases_collect_exactly_once() {
    let (_mesh, nodes) = mesh_of(3);
    let owner = &nodes[0];

    let finalized = Arc::new(AtomicUsize::new(0));
    let counter = finalized.clone();
    let mut root = owner
        .create_managed(64, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    let object = root.object();

    // Fan out sixteen references split between the two remote holders.
    let mut handed = Vec::new();
    for _ in 0..16 {
        handed.push(owner.duplicate(&mut root).await.unwrap());
    }
    owner.release(root);

    let mut tasks = Vec::new();
    for (i, gref) in handed.into_iter().enumerate() {
        let holder = nodes[1 + (i % 2)].clone();
        tasks.push(tokio::spawn(async move {
            holder.release(gref);
            holder.flush_returns().await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(wait_collected(owner, object).await);
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
    let (issued, returned) = owner.directory().books_of(object).unwrap();
    assert_eq!(issued, returned);
}

#[tokio::test]
async fn default_threshold_flushes_in_the_background() {
    // With the default flush threshold every remote release is shipped by
    // a spawned flush; no explicit flush call is needed.
    let mesh = Mesh::new();
    let owner = mesh.add_node(Config::new(NodeId::new(1)));
    let holder = mesh.add_node(Config::new(NodeId::new(2)));

    let r = holder.create_on(owner.id(), 3).await.unwrap();
    let object = r.object();

    holder.release(r);
    assert!(wait_collected(&owner, object).await);
}

#[tokio::test]
async fn shutdown_flushes_and_sweeps() {
    let (_mesh, nodes) = mesh_of(2);
    let (owner, holder) = (&nodes[0], &nodes[1]);

    let r = holder.create_on(owner.id(), 1).await.unwrap();
    let object = r.object();
    holder.release(r);
    assert_eq!(holder.pending_returns(), 1);

    holder.shutdown().await;
    assert_eq!(holder.pending_returns(), 0);
    assert!(wait_collected(owner, object).await);

    assert_eq!(owner.directory().len(), 1);
    owner.shutdown().await;
    assert_eq!(owner.directory().len(), 0);
    assert_eq!(owner.directory().state_of(object), None);
}
