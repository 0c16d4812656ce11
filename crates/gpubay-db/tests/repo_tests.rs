//! Postgres integration tests for the repositories.
//!
//! Ignored by default: they need a reachable database. Run with
//! `DATABASE_URL=postgres://… cargo test -p gpubay-db -- --ignored`.

use std::time::Duration;

use gpubay_core::{GpuClass, GpuInfo, NewJob, NewNode};
use gpubay_db::transitions::reason;
use gpubay_db::{DbError, JobRepo, NodeRepo, PgJobRepo, PgNodeRepo};

async fn test_pool() -> sqlx::PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
    let pool = gpubay_db::create_pool(&url).await.expect("connect");
    gpubay_db::run_migrations(&pool).await.expect("migrate");
    pool
}

// Tests share a database and jobs are never deleted, so every test works
// under addresses nobody else uses.
fn unique_address(prefix: &str) -> String {
    format!("0x{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

fn sample_job(buyer: &str) -> NewJob {
    NewJob {
        buyer_address: buyer.to_string(),
        script: "print('hello')".to_string(),
        requirements: Some("numpy==1.26.0".to_string()),
        max_price_per_hour: 2.0,
        timeout_seconds: 600,
        required_gpu_class: Some(GpuClass::Cuda),
        min_vram_gb: Some(8.0),
        required_gpu_count: 1,
    }
}

fn sample_node(seller: &str, gpu_class: GpuClass, price: f64) -> NewNode {
    NewNode {
        seller_address: seller.to_string(),
        gpu_info: GpuInfo {
            gpu_class,
            device_name: "RTX 4090".to_string(),
            vram_gb: Some(24.0),
            gpu_count: 1,
            compute_capability: Some("8.9".to_string()),
        },
        price_per_hour: price,
    }
}

#[tokio::test]
#[ignore]
async fn submit_then_get_round_trip() {
    let pool = test_pool().await;
    let repo = PgJobRepo::new(pool);
    let buyer = unique_address("buyer");

    let submitted = repo.submit(&sample_job(&buyer)).await.unwrap();
    assert_eq!(submitted.status, "PENDING");
    assert_eq!(submitted.buyer_address, buyer);
    assert!(submitted.node_id.is_none());
    assert!(submitted.locked_price_per_hour.is_none());

    let fetched = repo.get(submitted.job_id.into()).await.unwrap();
    assert_eq!(fetched.job_id, submitted.job_id);
    assert_eq!(fetched.script, "print('hello')");
    assert_eq!(fetched.requirements.as_deref(), Some("numpy==1.26.0"));
    assert_eq!(fetched.required_gpu_class.as_deref(), Some("cuda"));
}

#[tokio::test]
#[ignore]
async fn submission_writes_transition_row() {
    let pool = test_pool().await;
    let repo = PgJobRepo::new(pool);
    let buyer = unique_address("buyer");

    let job = repo.submit(&sample_job(&buyer)).await.unwrap();
    let log = repo.transitions(job.job_id.into()).await.unwrap();

    assert_eq!(log.len(), 1);
    assert_eq!(log[0].from_status, None);
    assert_eq!(log[0].to_status, "PENDING");
    assert_eq!(log[0].reason, reason::SUBMITTED);
}

#[tokio::test]
#[ignore]
async fn cancel_pending_job() {
    let pool = test_pool().await;
    let repo = PgJobRepo::new(pool);
    let buyer = unique_address("buyer");

    let job = repo.submit(&sample_job(&buyer)).await.unwrap();
    let cancelled = repo.cancel(job.job_id.into(), &buyer).await.unwrap();

    assert_eq!(cancelled.status, "CANCELLED");
    assert!(cancelled.completed_at.is_some());
    assert!(cancelled.node_id.is_none());

    let log = repo.transitions(job.job_id.into()).await.unwrap();
    assert_eq!(log.last().unwrap().to_status, "CANCELLED");
    assert_eq!(log.last().unwrap().reason, reason::CANCELLED_BY_BUYER);
}

#[tokio::test]
#[ignore]
async fn cancel_requires_owner() {
    let pool = test_pool().await;
    let repo = PgJobRepo::new(pool);
    let buyer = unique_address("buyer");

    let job = repo.submit(&sample_job(&buyer)).await.unwrap();
    let err = repo
        .cancel(job.job_id.into(), "0xsomebody_else")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotOwner(_)), "got {err:?}");

    // The failed attempt must not have touched the row.
    let unchanged = repo.get(job.job_id.into()).await.unwrap();
    assert_eq!(unchanged.status, "PENDING");
}

#[tokio::test]
#[ignore]
async fn cancel_twice_is_rejected() {
    let pool = test_pool().await;
    let repo = PgJobRepo::new(pool);
    let buyer = unique_address("buyer");

    let job = repo.submit(&sample_job(&buyer)).await.unwrap();
    repo.cancel(job.job_id.into(), &buyer).await.unwrap();

    let err = repo.cancel(job.job_id.into(), &buyer).await.unwrap_err();
    assert!(
        matches!(err, DbError::InvalidState { ref status, .. } if status == "CANCELLED"),
        "got {err:?}"
    );
}

#[tokio::test]
#[ignore]
async fn begin_execution_requires_claimed() {
    let pool = test_pool().await;
    let repo = PgJobRepo::new(pool);
    let buyer = unique_address("buyer");

    let job = repo.submit(&sample_job(&buyer)).await.unwrap();
    let err = repo
        .begin_execution(job.job_id.into(), "node_000000000000")
        .await
        .unwrap_err();
    assert!(
        matches!(err, DbError::InvalidState { ref status, .. } if status == "PENDING"),
        "got {err:?}"
    );
}

#[tokio::test]
#[ignore]
async fn heartbeat_is_idempotent() {
    let pool = test_pool().await;
    let repo = PgNodeRepo::new(pool);
    let seller = unique_address("seller");

    let node = repo
        .register(&sample_node(&seller, GpuClass::Cuda, 1.5))
        .await
        .unwrap();

    let first = repo.heartbeat(&node.node_id, true).await.unwrap();
    let second = repo.heartbeat(&node.node_id, true).await.unwrap();
    let third = repo.heartbeat(&node.node_id, true).await.unwrap();

    assert_eq!(first.node_id, node.node_id);
    assert!(second.last_heartbeat >= first.last_heartbeat);
    assert!(third.last_heartbeat >= second.last_heartbeat);
    assert!(third.is_available);
}

#[tokio::test]
#[ignore]
async fn heartbeat_unknown_node_is_not_found() {
    let pool = test_pool().await;
    let repo = PgNodeRepo::new(pool);

    let err = repo.heartbeat("node_nonexistent0", true).await.unwrap_err();
    assert!(matches!(err, DbError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
#[ignore]
async fn list_live_filters_class_price_and_availability() {
    let pool = test_pool().await;
    let repo = PgNodeRepo::new(pool);
    let seller = unique_address("seller");
    let window = Duration::from_secs(300);

    let cheap_cuda = repo
        .register(&sample_node(&seller, GpuClass::Cuda, 0.8))
        .await
        .unwrap();
    let pricey_cuda = repo
        .register(&sample_node(&seller, GpuClass::Cuda, 3.0))
        .await
        .unwrap();
    let mps = repo
        .register(&sample_node(&seller, GpuClass::Mps, 0.5))
        .await
        .unwrap();
    let parked = repo
        .register(&sample_node(&seller, GpuClass::Cuda, 0.9))
        .await
        .unwrap();
    repo.mark_unavailable(&parked.node_id).await.unwrap();

    // Other tests register nodes too; only look at this seller's.
    let mine = |records: Vec<gpubay_db::NodeRecord>| -> Vec<String> {
        records
            .into_iter()
            .filter(|n| n.seller_address == seller)
            .map(|n| n.node_id)
            .collect()
    };

    let cuda_under_two = mine(
        repo.list_live(Some("cuda"), Some(2.0), window)
            .await
            .unwrap(),
    );
    assert_eq!(cuda_under_two, vec![cheap_cuda.node_id.clone()]);

    let all_cuda = mine(repo.list_live(Some("cuda"), None, window).await.unwrap());
    assert_eq!(
        all_cuda,
        vec![cheap_cuda.node_id.clone(), pricey_cuda.node_id.clone()],
        "cheapest first, parked node excluded"
    );

    let everything = mine(repo.list_live(None, None, window).await.unwrap());
    assert_eq!(
        everything,
        vec![mps.node_id, cheap_cuda.node_id, pricey_cuda.node_id]
    );
}
