//! # Example: startup
//!
//! Brings up a small service graph, then keeps it running until Ctrl-C.
//!
//! Shows how to:
//! - Declare services with required and optional dependencies.
//! - Mark a service non-critical so its failure only degrades the system.
//! - Wrap a flaky remote call in a circuit breaker.
//! - Keep a stream connected across endpoint failures.
//! - Defer background tasks until startup finished, and probe health periodically.
//!
//! ## Service graph
//! ```text
//! config ◄── db ◄── prices (stream, reconnecting)
//!              ▲
//!              └─── search (non-critical, fails) ◄┄┄ reports (optional dep)
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info,bootvisor=debug cargo run --example startup
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use bootvisor::{
    BoxError, CheckFn, Config, ConnectionError, Connector, Dependencies, Link, LogWriter,
    OrchestratorBuilder, RoundRobinEndpoints, ServiceSpec, Subscribe, TaskError, TaskFn,
};

/// In-memory transport that echoes frames and drops the link after a few of them.
struct EchoConnector;

#[async_trait]
impl Connector for EchoConnector {
    async fn connect(&self, endpoint: &str) -> Result<Link, ConnectionError> {
        if endpoint.ends_with(":0") {
            return Err(ConnectionError::Handshake {
                endpoint: endpoint.to_string(),
                error: "connection refused".into(),
            });
        }

        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(16);
        let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(16);
        tokio::spawn(async move {
            for _ in 0..3 {
                let Some(frame) = out_rx.recv().await else { break };
                if in_tx.send(frame).await.is_err() {
                    break;
                }
            }
        });
        Ok(Link::new(out_tx, in_rx))
    }
}

struct Settings {
    dsn: String,
}

struct Database {
    dsn: String,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut cfg = Config::default();
    cfg.grace = Duration::from_secs(5);
    cfg.health.interval = Duration::from_secs(2);
    cfg.reconnect.base = Duration::from_millis(200);
    cfg.reconnect.cap = Duration::from_secs(2);

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let orch = OrchestratorBuilder::new(cfg).with_subscribers(subs).build();

    // --- services ---
    orch.registry().register(ServiceSpec::from_fn("config", |_deps: Dependencies| async {
        Ok::<_, BoxError>(Settings {
            dsn: "postgres://localhost/app".into(),
        })
    }))?;

    orch.registry().register(
        ServiceSpec::from_fn("db", |deps: Dependencies| async move {
            let settings = deps.require::<Settings>("config")?;
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, BoxError>(Database {
                dsn: settings.dsn.clone(),
            })
        })
        .with_dependency("config"),
    )?;

    let prices = orch.connection(
        "prices",
        Arc::new(EchoConnector),
        Arc::new(RoundRobinEndpoints::new(["feed-a:9000", "feed-b:0", "feed-c:9001"])),
    );
    let stream = prices.clone();
    orch.registry().register(
        ServiceSpec::from_fn("prices", move |_deps: Dependencies| {
            let stream = stream.clone();
            async move {
                stream.connect().await?;
                Ok::<_, BoxError>(stream)
            }
        })
        .with_dependency("db")
        .with_critical(false),
    )?;

    orch.registry().register(
        ServiceSpec::from_fn("search", |_deps: Dependencies| async {
            Err::<String, BoxError>("index not built yet".into())
        })
        .with_dependency("db")
        .with_critical(false),
    )?;

    orch.registry().register(
        ServiceSpec::from_fn("reports", |deps: Dependencies| async move {
            let search = deps.get::<String>("search");
            println!("[reports] search available: {}", search.is_some());
            Ok::<_, BoxError>(())
        })
        .with_optional_dependency("search"),
    )?;

    // --- background tasks ---
    let billing = Arc::new(orch.breaker("billing"));
    let calls = Arc::new(AtomicU32::new(0));
    let breaker = billing.clone();
    orch.coordinator().register(
        TaskFn::arc("invoice-sync", move |_ctx: CancellationToken| {
            let breaker = breaker.clone();
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                breaker
                    .execute(|| async move {
                        if n % 4 == 3 {
                            Ok(())
                        } else {
                            Err("billing returned 503")
                        }
                    })
                    .await
                    .map_err(TaskError::fail)
            }
        }),
        Duration::from_millis(500),
        true,
    )?;

    let stream = prices.clone();
    orch.coordinator().register(
        TaskFn::arc("price-ping", move |_ctx: CancellationToken| {
            let stream = stream.clone();
            async move {
                stream
                    .send(b"ping".to_vec())
                    .await
                    .map_err(TaskError::fail)
            }
        }),
        Duration::from_secs(1),
        false,
    )?;

    // --- health ---
    let stream = prices.clone();
    orch.health().register_check(
        "prices",
        CheckFn::arc(move || {
            let status = stream.status();
            async move {
                match status.state {
                    bootvisor::ConnectionState::Connected => Ok(()),
                    other => Err(format!("stream is {other:?}")),
                }
            }
        }),
    );

    orch.start(&["db", "prices", "reports"]).await?;
    let db = orch.registry().get_as::<Database>("db").await?;
    println!("[main] started with db={} (Ctrl-C to stop)", db.dsn);

    bootvisor::wait_for_shutdown_signal().await?;
    orch.shutdown().await?;

    println!("[main] breaker stats: {:?}", billing.stats());
    Ok(())
}
