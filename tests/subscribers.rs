mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{MockHost, config, settle};
use forkvisor::{Cluster, Event, EventKind, Subscribe};
use parking_lot::Mutex;

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(EventKind, Option<u32>)>>,
}

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, event: &Event) {
        self.seen.lock().push((event.kind, event.pid));
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

#[tokio::test]
async fn subscribers_see_cluster_events() {
    let host = MockHost::new();
    let rec = Arc::new(Recorder::default());
    let cl = Cluster::builder(config())
        .with_forker(host.clone())
        .with_signaller(host.clone())
        .with_subscribers(vec![rec.clone() as Arc<dyn Subscribe>])
        .build();
    assert!(format!("{cl:?}").contains("subscribers: 1"));

    let worker = cl.fork_child().expect("fork").started().await.expect("started");
    settle().await;

    let seen = rec.seen.lock().clone();
    let pid = Some(worker.pid());
    assert!(seen.contains(&(EventKind::WorkerForked, pid)));
    assert!(seen.contains(&(EventKind::WorkerStarted, pid)));
}
