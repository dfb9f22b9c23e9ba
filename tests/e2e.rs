//! Real child processes driven through `sh`.

use std::sync::Arc;
use std::time::Duration;

use forkvisor::{Cluster, ClusterConfig, ClusterError, CommandForker, EventKind, WorkerExit};
use nix::sys::signal::Signal;
use tokio::sync::broadcast;

/// Speaks the handshake: `ready` on boot, `started` on start, `stopped` then exit on stop.
const POLITE: &str = r#"
printf '{"v":"qc-1","pid":%d,"n":"ready","m":null}\n' $$
while IFS= read -r line; do
  case "$line" in
    *'"n":"start"'*) printf '{"v":"qc-1","pid":%d,"n":"started","m":null}\n' $$ ;;
    *'"n":"stop"'*) printf '{"v":"qc-1","pid":%d,"n":"stopped","m":null}\n' $$; exit 0 ;;
  esac
done
"#;

/// Never says anything.
const MUTE: &str = "exec sleep 5";

/// Says `ready`, then ignores everything.
const DEAF: &str = r#"printf '{"v":"qc-1","pid":%d,"n":"ready","m":null}\n' $$; exec sleep 5"#;

fn sh(script: &str, cfg: ClusterConfig) -> Arc<Cluster> {
    Cluster::builder(cfg)
        .with_forker(CommandForker::new("sh").arg("-c").arg(script))
        .build()
}

fn config() -> ClusterConfig {
    ClusterConfig {
        start_timeout: Duration::from_secs(5),
        stop_timeout: Duration::from_secs(5),
        handle_signals: false,
        ..ClusterConfig::default()
    }
}

async fn exited(rx: &mut broadcast::Receiver<forkvisor::Event>, pid: u32) {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(ev) if ev.kind == EventKind::WorkerExited && ev.pid == Some(pid) => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => panic!("bus closed: {e}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("worker did not exit");
}

#[tokio::test]
async fn launch_starts_real_workers() {
    let cl = sh(
        POLITE,
        ClusterConfig {
            cluster_size: 2,
            ..config()
        },
    );
    let mut bus = cl.subscribe();
    cl.launch().await.expect("launch");
    assert_eq!(cl.len(), 2);

    for w in cl.workers() {
        assert!(w.is_ready());
        assert!(cl.exists_process(w.pid()));
    }
    let started = async {
        let mut n = 0;
        while n < 2 {
            match bus.recv().await {
                Ok(ev)
                    if ev.kind == EventKind::WorkerMessage
                        && ev.lifecycle == Some(forkvisor::LifecycleEvent::Started) =>
                {
                    n += 1;
                }
                _ => {}
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), started)
        .await
        .expect("both workers answered start");

    for w in cl.workers() {
        cl.stop_child(&w).await.expect("stop");
    }
}

#[tokio::test]
async fn silent_worker_is_killed_on_start_timeout() {
    let cl = sh(
        MUTE,
        ClusterConfig {
            start_timeout: Duration::from_millis(200),
            ..config()
        },
    );
    let mut bus = cl.subscribe();
    let pending = cl.fork_child().expect("fork");
    let pid = pending.pid();

    let err = pending.started().await.expect_err("must time out");
    assert!(matches!(err, ClusterError::StartTimeout { pid: p, .. } if p == pid));

    exited(&mut bus, pid).await;
    assert!(!cl.exists_process(pid));
    assert!(cl.find_pid(pid).is_none());
}

#[tokio::test]
async fn deaf_worker_is_left_running_on_stop_timeout() {
    let cl = sh(
        DEAF,
        ClusterConfig {
            stop_timeout: Duration::from_millis(200),
            ..config()
        },
    );
    let mut bus = cl.subscribe();
    let worker = cl.fork_child().expect("fork").started().await.expect("ready");

    let err = cl.stop_child(&worker).await.expect_err("must time out");
    assert!(matches!(err, ClusterError::StopTimeout { .. }));
    assert!(cl.exists_process(worker.pid()));

    cl.kill_child(&worker, Signal::SIGKILL);
    exited(&mut bus, worker.pid()).await;
    assert_eq!(
        worker.exit_status(),
        Some(WorkerExit::signaled(Signal::SIGKILL))
    );
}

#[tokio::test]
async fn replace_swaps_real_workers() {
    let cl = sh(POLITE, config());
    let mut bus = cl.subscribe();
    let old = cl.fork_child().expect("fork").started().await.expect("ready");

    let new = cl.replace_child(&old).await.expect("replace");
    assert_ne!(new.pid(), old.pid());
    assert!(new.is_started(false));
    assert!(old.is_stopped());

    exited(&mut bus, old.pid()).await;
    assert_eq!(old.exit_status(), Some(WorkerExit::code(0)));
    let pids: Vec<u32> = cl.workers().iter().map(|w| w.pid()).collect();
    assert_eq!(pids, vec![new.pid()]);

    cl.stop_child(&new).await.expect("stop");
}
