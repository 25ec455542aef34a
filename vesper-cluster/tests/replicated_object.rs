//! Replicated objects over the in-memory cluster.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use vesper_cluster::{
    object::{factory::{self, SerdeFactory}, merger},
    test_utils::{settle, MockCluster, MockTransport},
    ClusterTransport, Error, NodeId, ObjectConfig, Part, PartListener, ReplicatedObject,
};

const A: &str = "http://a:8080/cometd";
const B: &str = "http://b:8080/cometd";
const C: &str = "http://c:8080/cometd";

/// Records (node, old version, new version) for updates and the node of
/// every removal.
#[derive(Clone, Default)]
struct Recorder {
    updated: Arc<Mutex<Vec<(String, Option<u64>, u64)>>>,
    removed: Arc<Mutex<Vec<String>>>,
}

impl<T> PartListener<T> for Recorder {
    fn updated(&self, old: Option<&Part<T>>, new: &Part<T>) {
        self.updated.lock().push((new.node().to_string(), old.map(Part::version), new.version()));
    }

    fn removed(&self, part: &Part<T>) {
        self.removed.lock().push(part.node().to_string());
    }
}

impl Recorder {
    fn updates_from(&self, node: &str) -> Vec<(Option<u64>, u64)> {
        self.updated
            .lock()
            .iter()
            .filter(|(n, _, _)| n == node)
            .map(|(_, old, new)| (*old, *new))
            .collect()
    }
}

struct Panicking;

impl PartListener<i64> for Panicking {
    fn updated(&self, _: Option<&Part<i64>>, _: &Part<i64>) {
        panic!("listener failure");
    }
}

/// Flags overlapping notifications and records the versions seen per node.
#[derive(Clone, Default)]
struct Sequential {
    in_flight: Arc<AtomicBool>,
    overlapped: Arc<AtomicBool>,
    versions: Arc<Mutex<HashMap<String, Vec<u64>>>>,
}

impl PartListener<i64> for Sequential {
    fn updated(&self, _: Option<&Part<i64>>, new: &Part<i64>) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        std::thread::yield_now();
        self.versions.lock().entry(new.node().to_string()).or_default().push(new.version());
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

impl Sequential {
    fn versions_from(&self, node: &str) -> Vec<u64> {
        self.versions.lock().get(node).cloned().unwrap_or_default()
    }
}

fn joined_nodes(cluster: &MockCluster, urls: &[&str]) -> Vec<Arc<MockTransport>> {
    urls.iter()
        .map(|url| {
            let node = cluster.node(url);
            cluster.join(node.local_node_id());
            node
        })
        .collect()
}

async fn counters(cluster: &MockCluster, urls: &[&str]) -> Vec<ReplicatedObject<i64>> {
    vesper_core::telemetry::try_init_for_tests();
    let config = ObjectConfig::default();
    let mut objects = Vec::new();
    for node in joined_nodes(cluster, urls) {
        objects.push(ReplicatedObject::start("users", node, factory::long(), &config).await.unwrap());
    }
    settle_all(&objects).await;
    objects
}

async fn settle_all<T>(objects: &[ReplicatedObject<T>])
where
    T: Clone + serde::Serialize + Send + Sync + 'static,
{
    let refs: Vec<_> = objects.iter().collect();
    settle(&refs).await.unwrap();
}

fn record(version: u64, node: &str, name: &str, value: Value) -> Value {
    json!({"version": version, "nodeId": node, "name": name, "value": value})
}

#[tokio::test]
async fn test_shared_value_reaches_peer_once() {
    let cluster = MockCluster::new();
    let objects = counters(&cluster, &[A, B]).await;
    let recorder = Recorder::default();
    objects[1].add_listener(recorder.clone());

    let previous = objects[0].set_and_share(17).await.unwrap();
    assert_eq!(previous, 0);
    settle_all(&objects).await;

    let part = objects[1].part(&NodeId::from(A)).unwrap();
    assert_eq!(*part.value(), 17);
    assert_eq!(part.version(), 1);
    assert!(!part.is_local());
    assert_eq!(recorder.updates_from(A), [(Some(0), 1)]);

    // A duplicating network delivers the same update again.
    let update = cluster
        .delivery_log()
        .into_iter()
        .find(|e| e.channel == *objects[0].broadcast_channel() && e.data["version"] == json!(1))
        .unwrap();
    cluster.redeliver(&update);
    settle_all(&objects).await;

    assert_eq!(recorder.updates_from(A), [(Some(0), 1)]);
    assert_eq!(objects[1].part(&NodeId::from(A)).unwrap().version(), 1);
    assert_eq!(objects[1].merge(merger::long_sum), 17);
}

#[tokio::test]
async fn test_local_updates_notify_listeners() {
    let cluster = MockCluster::new();
    let objects = counters(&cluster, &[A]).await;
    let recorder = Recorder::default();
    let id = objects[0].add_listener(recorder.clone());

    objects[0].set_and_share(3).await.unwrap();
    assert_eq!(objects[0].set_and_share(4).await.unwrap(), 3);
    assert_eq!(recorder.updates_from(A), [(Some(0), 1), (Some(1), 2)]);
    assert_eq!(objects[0].value(), Some(4));
    assert!(objects[0].local_part().unwrap().is_local());

    assert!(objects[0].remove_listener(id));
    assert!(!objects[0].remove_listener(id));
    objects[0].set_and_share(5).await.unwrap();
    assert_eq!(recorder.updated.lock().len(), 2);
}

#[tokio::test]
async fn test_merge_over_three_nodes() {
    vesper_core::telemetry::try_init_for_tests();
    let cluster = MockCluster::new();
    let config = ObjectConfig::default();
    let mut objects = Vec::new();
    for node in joined_nodes(&cluster, &[A, B, C]) {
        objects.push(ReplicatedObject::start("rooms", node, factory::list(), &config).await.unwrap());
    }

    objects[0].set_and_share(vec![json!("lobby"), json!("games")]).await.unwrap();
    objects[1].set_and_share(vec![json!("games"), json!("music")]).await.unwrap();
    objects[2].set_and_share(vec![json!("news")]).await.unwrap();
    settle_all(&objects).await;

    for object in &objects {
        assert_eq!(object.parts().len(), 3);
        assert_eq!(
            object.merge(merger::list_union),
            [json!("lobby"), json!("games"), json!("music"), json!("news")]
        );
        assert_eq!(object.merge(merger::concat).len(), 5);
    }
    let owner = objects[2].part_by_value(&vec![json!("news")]).unwrap();
    assert_eq!(owner.node().as_str(), C);
}

#[tokio::test]
async fn test_late_joiner_receives_parts_without_rebroadcast() {
    let cluster = MockCluster::new();
    let mut objects = counters(&cluster, &[A, B]).await;
    objects[0].set_and_share(7).await.unwrap();
    objects[1].set_and_share(11).await.unwrap();
    settle_all(&objects).await;

    // C starts detached, then joins.
    let late = cluster.node(C);
    let object = ReplicatedObject::start("users", late.clone(), factory::long(), &ObjectConfig::default())
        .await
        .unwrap();
    let seen = cluster.delivery_log().len();
    cluster.join(late.local_node_id());
    objects.push(object);
    settle_all(&objects).await;

    let joiner = &objects[2];
    assert_eq!(*joiner.part(&NodeId::from(A)).unwrap().value(), 7);
    assert_eq!(*joiner.part(&NodeId::from(B)).unwrap().value(), 11);
    assert_eq!(joiner.merge(merger::long_sum), 18);
    assert!(objects[0].part(&NodeId::from(C)).is_some());

    let after_join = &cluster.delivery_log()[seen..];
    assert!(!after_join.is_empty());
    assert!(after_join.iter().all(|e| e.channel == *joiner.service_channel()));
}

#[tokio::test]
async fn test_node_left_removes_part() {
    let cluster = MockCluster::new();
    let objects = counters(&cluster, &[A, B]).await;
    let recorder = Recorder::default();
    objects[0].add_listener(recorder.clone());
    objects[1].set_and_share(2).await.unwrap();
    settle_all(&objects).await;
    assert_eq!(objects[0].merge(merger::long_max), Some(2));

    cluster.leave(&NodeId::from(B));
    settle_all(&objects).await;

    assert!(objects[0].part(&NodeId::from(B)).is_none());
    assert_eq!(*recorder.removed.lock(), [B]);
    assert_eq!(objects[0].merge(merger::long_max), Some(0));
}

#[tokio::test]
async fn test_pull_recovers_lost_update() {
    let cluster = MockCluster::new();
    let objects = counters(&cluster, &[A, B]).await;
    settle_all(&objects).await;

    cluster.hold();
    objects[0].set_and_share(9).await.unwrap();
    assert_eq!(cluster.drop_pending(), 1);
    cluster.release();
    settle_all(&objects).await;
    assert_eq!(*objects[1].part(&NodeId::from(A)).unwrap().value(), 0);

    objects[1].pull_from(&NodeId::from(A)).await.unwrap();
    settle_all(&objects).await;

    let part = objects[1].part(&NodeId::from(A)).unwrap();
    assert_eq!((part.version(), *part.value()), (1, 9));
}

#[tokio::test]
async fn test_panicking_listener_does_not_stop_others() {
    let cluster = MockCluster::new();
    let objects = counters(&cluster, &[A, B]).await;
    let recorder = Recorder::default();
    objects[1].add_listener(Panicking);
    objects[1].add_listener(recorder.clone());

    objects[0].set_and_share(1).await.unwrap();
    objects[0].set_and_share(2).await.unwrap();
    settle_all(&objects).await;

    assert!(objects[1].is_running());
    assert_eq!(recorder.updates_from(A), [(Some(0), 1), (Some(1), 2)]);
    assert_eq!(objects[1].merge(merger::long_sum), 2);
}

#[tokio::test]
async fn test_null_value_is_rejected() {
    vesper_core::telemetry::try_init_for_tests();
    let cluster = MockCluster::new();
    let node = joined_nodes(&cluster, &[A]).remove(0);
    let object: ReplicatedObject<Option<i64>> =
        ReplicatedObject::start("scores", node, SerdeFactory::<Option<i64>>::new(), &ObjectConfig::default())
            .await
            .unwrap();

    let err = object.set_and_share(None).await.unwrap_err();
    assert!(matches!(err, Error::Core(vesper_core::Error::NullValue { ref name }) if name == "scores"));
    assert_eq!(object.set_and_share(Some(3)).await.unwrap(), None);
    assert_eq!(object.value(), Some(Some(3)));
}

#[tokio::test]
async fn test_stop_clears_state() {
    let cluster = MockCluster::new();
    let objects = counters(&cluster, &[A, B]).await;
    settle_all(&objects).await;
    assert_eq!(objects[0].parts().len(), 2);

    objects[0].stop().await.unwrap();
    assert!(!objects[0].is_running());
    assert!(objects[0].parts().is_empty());
    assert!(matches!(objects[0].set_and_share(1).await, Err(Error::Stopped { .. })));
    assert!(matches!(objects[0].flush().await, Err(Error::Stopped { .. })));
    assert!(objects[0].stop().await.is_ok());

    // The stopped object no longer listens; B's updates go nowhere.
    objects[1].set_and_share(5).await.unwrap();
    assert!(objects[0].part(&NodeId::from(B)).is_none());
}

#[tokio::test]
async fn test_records_for_other_objects_are_ignored() {
    let cluster = MockCluster::new();
    let nodes = joined_nodes(&cluster, &[A, B]);
    let object = ReplicatedObject::start("users", nodes[1].clone(), factory::long(), &ObjectConfig::default())
        .await
        .unwrap();

    nodes[0]
        .send(&NodeId::from(B), object.service_channel(), record(4, A, "rooms", json!(4)))
        .await
        .unwrap();
    object.flush().await.unwrap();

    assert_eq!(object.parts().len(), 1);
    assert!(object.part(&NodeId::from(A)).is_none());
}

#[tokio::test]
async fn test_out_of_order_records_never_regress() {
    let cluster = MockCluster::new();
    let nodes = joined_nodes(&cluster, &[A, B]);
    let object = ReplicatedObject::start("users", nodes[1].clone(), factory::long(), &ObjectConfig::default())
        .await
        .unwrap();
    let recorder = Recorder::default();
    object.add_listener(recorder.clone());

    let channel = object.broadcast_channel().clone();
    nodes[0].broadcast(&channel, record(2, A, "users", json!(20))).await.unwrap();
    nodes[0].broadcast(&channel, record(1, A, "users", json!(10))).await.unwrap();
    nodes[0].broadcast(&channel, record(2, A, "users", json!(99))).await.unwrap();
    object.flush().await.unwrap();

    let part = object.part(&NodeId::from(A)).unwrap();
    assert_eq!((part.version(), *part.value()), (2, 20));
    assert_eq!(recorder.updates_from(A), [(None, 2)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_shares_are_applied_one_at_a_time() {
    const TASKS: i64 = 8;
    const SHARES: i64 = 50;
    let total = (TASKS * SHARES) as u64;

    let cluster = MockCluster::new();
    let objects: Vec<Arc<ReplicatedObject<i64>>> =
        counters(&cluster, &[A, B]).await.into_iter().map(Arc::new).collect();
    let listeners = [Sequential::default(), Sequential::default()];
    for (object, listener) in objects.iter().zip(&listeners) {
        object.add_listener(listener.clone());
    }

    let mut handles = Vec::new();
    for object in &objects {
        for task in 0..TASKS {
            let object = Arc::clone(object);
            handles.push(tokio::spawn(async move {
                for share in 0..SHARES {
                    object.set_and_share(task * SHARES + share).await.unwrap();
                }
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }
    let refs: Vec<_> = objects.iter().map(Arc::as_ref).collect();
    settle(&refs).await.unwrap();

    for listener in &listeners {
        assert!(!listener.overlapped.load(Ordering::SeqCst));
        for node in [A, B] {
            let versions = listener.versions_from(node);
            assert!(versions.windows(2).all(|pair| pair[0] < pair[1]), "{node}: {versions:?}");
            assert_eq!(versions.last(), Some(&total));
        }
    }
    assert_eq!(listeners[0].versions_from(A), (1..=total).collect::<Vec<_>>());
    assert_eq!(listeners[1].versions_from(B), (1..=total).collect::<Vec<_>>());
    for object in &objects {
        for node in [A, B] {
            assert_eq!(object.part(&NodeId::from(node)).unwrap().version(), total);
        }
    }
}
