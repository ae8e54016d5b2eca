mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{connector, count, service, settle};
use docpool::error::PoolError;
use docpool::{ErrorKind, PoolConfig, RetryPolicy, RetryScope, ServiceOptions};

#[tokio::test]
async fn logon_is_retried_once_by_default() {
    let connector = connector(&[("p", &["A"])]);
    let svc = service(connector.clone(), ServiceOptions::new(), PoolConfig::new(), &["p"]).await;
    let tenant = connector.tenant("p").unwrap();
    tenant.fail_next_logons(1);

    assert_eq!(svc.list_folders("p").await.unwrap(), vec!["A"]);
    assert_eq!(count(&tenant.stats.logon_failures), 1);
    assert_eq!(count(&tenant.stats.logons), 1);
}

#[tokio::test]
async fn logon_failure_without_retry_fails_the_operation() {
    let connector = connector(&[("p", &["A"])]);
    let options = ServiceOptions::new().retry(RetryPolicy::none());
    let svc = service(connector.clone(), options, PoolConfig::new(), &["p"]).await;
    connector.tenant("p").unwrap().fail_next_logons(1);

    let err = svc.list_folders("p").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationFailed);
    assert!(err.to_string().contains("1 attempt(s)"));

    let status = svc.registry().lookup("p").unwrap().status();
    assert_eq!(status.borrows, 0);
    assert_eq!(status.returns, 0);
    // capacity was not consumed by the failed logon
    assert_eq!(svc.list_folders("p").await.unwrap(), vec!["A"]);
}

#[tokio::test]
async fn lost_session_is_retried_with_operation_scope() {
    let connector = connector(&[("p", &["A", "B"])]);
    let options = ServiceOptions::new().retry(RetryPolicy::retries(1, RetryScope::Operation));
    let svc = service(connector.clone(), options, PoolConfig::new(), &["p"]).await;
    connector.tenant("p").unwrap().lose_next_calls(1);

    assert_eq!(svc.list_folders("p").await.unwrap(), vec!["A", "B"]);

    let status = svc.registry().lookup("p").unwrap().status();
    assert_eq!(status.created, 2);
    assert_eq!(status.invalidated, 1);
    assert_eq!(status.borrows, 2);
    assert_eq!(status.returns, 2);
    assert_eq!(status.idle, 1);
}

#[tokio::test]
async fn lost_session_is_not_retried_with_borrow_scope() {
    let connector = connector(&[("p", &["A"])]);
    let options = ServiceOptions::new().retry(RetryPolicy::retries(3, RetryScope::Borrow));
    let svc = service(connector.clone(), options, PoolConfig::new(), &["p"]).await;
    connector.tenant("p").unwrap().lose_next_calls(1);

    let err = svc.list_folders("p").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationFailed);
    assert!(err.to_string().contains("Session lost"));

    let status = svc.registry().lookup("p").unwrap().status();
    assert_eq!(status.invalidated, 1);
    assert_eq!(status.idle, 0);
    assert_eq!(status.borrows, status.returns);
}

#[tokio::test]
async fn slow_native_call_times_out_and_invalidates_handle() {
    let connector = connector(&[("p", &["A"])]);
    let options = ServiceOptions::new().call_timeout(Duration::from_millis(50));
    let svc = service(connector.clone(), options, PoolConfig::new(), &["p"]).await;
    let tenant = connector.tenant("p").unwrap();
    svc.list_folders("p").await.unwrap();
    tenant.set_latency(Some(Duration::from_millis(300)));

    let err = svc.list_folders("p").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimedOut);

    let status = svc.registry().lookup("p").unwrap().status();
    assert_eq!(status.invalidated, 1);
    assert_eq!(status.idle, 0);
    assert_eq!(status.borrows, status.returns);
}

#[tokio::test]
async fn cancelled_operation_discards_its_connection() {
    let connector = connector(&[("p", &["A"])]);
    let svc = service(connector.clone(), ServiceOptions::new(), PoolConfig::new(), &["p"]).await;
    let svc = Arc::new(svc);
    let pool = svc.registry().lookup("p").unwrap();
    svc.list_folders("p").await.unwrap();
    connector.tenant("p").unwrap().set_latency(Some(Duration::from_millis(500)));

    let task = {
        let svc = svc.clone();
        tokio::spawn(async move { svc.list_folders("p").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.status().checked_out, 1);
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    settle(&pool).await;
    let status = pool.status();
    assert_eq!(status.borrows, 2);
    assert_eq!(status.returns, 2);
    // the session was mid-call, its state is unknown
    assert_eq!(status.idle, 0);
    assert_eq!(status.invalidated, 1);
    assert_eq!(count(&connector.tenant("p").unwrap().stats.logoffs), 1);

    connector.tenant("p").unwrap().set_latency(None);
    assert_eq!(svc.list_folders("p").await.unwrap(), vec!["A"]);
    assert_eq!(pool.status().created, 2);
}

#[tokio::test]
async fn dropped_guard_returns_handle() {
    let connector = connector(&[("p", &["A"])]);
    let pool_config = PoolConfig::new().max_size(1);
    let svc = service(connector, ServiceOptions::new(), pool_config, &["p"]).await;
    let pool = svc.registry().lookup("p").unwrap();

    {
        let _conn = pool.borrow().await.unwrap();
    }
    settle(&pool).await;
    assert_eq!(pool.status().returns, 1);
    assert_eq!(svc.list_folders("p").await.unwrap(), vec!["A"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tenants_are_served_independently() {
    let connector = connector(&[("portal1", &["Folder1"]), ("portal2", &["Folder2"])]);
    for name in ["portal1", "portal2"] {
        connector
            .tenant(name)
            .unwrap()
            .set_latency(Some(Duration::from_millis(30)));
    }
    let svc = Arc::new(
        service(
            connector.clone(),
            ServiceOptions::new(),
            PoolConfig::new(),
            &["portal1", "portal2"],
        )
        .await,
    );

    let a = {
        let svc = svc.clone();
        tokio::spawn(async move { svc.list_folders("portal1").await })
    };
    let b = {
        let svc = svc.clone();
        tokio::spawn(async move { svc.list_folders("portal2").await })
    };
    assert_eq!(a.await.unwrap().unwrap(), vec!["Folder1"]);
    assert_eq!(b.await.unwrap().unwrap(), vec!["Folder2"]);

    for name in ["portal1", "portal2"] {
        let status = svc.registry().lookup(name).unwrap().status();
        assert_eq!(status.borrows, 1, "{}", name);
        assert_eq!(status.returns, 1, "{}", name);
        assert_eq!(status.created, 1, "{}", name);
        assert_eq!(count(&connector.tenant(name).unwrap().stats.logons), 1);
    }
}

#[tokio::test]
async fn concurrent_borrows_never_share_a_handle() {
    let connector = connector(&[("p", &["A"])]);
    connector
        .tenant("p")
        .unwrap()
        .set_latency(Some(Duration::from_millis(20)));
    let pool_config = PoolConfig::new().max_size(3);
    let svc = Arc::new(service(connector, ServiceOptions::new(), pool_config, &["p"]).await);

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let svc = svc.clone();
            tokio::spawn(async move { svc.list_folders("p").await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), vec!["A"]);
    }

    let status = svc.registry().lookup("p").unwrap().status();
    assert!(status.created <= 3);
    assert_eq!(status.borrows, 6);
    assert_eq!(status.returns, 6);
    assert_eq!(status.checked_out, 0);
}

#[tokio::test]
async fn closed_pool_refuses_borrow_and_logs_off_late_returns() {
    let connector = connector(&[("p", &["A"])]);
    let svc = service(connector.clone(), ServiceOptions::new(), PoolConfig::new(), &["p"]).await;
    let pool = svc.registry().lookup("p").unwrap();

    let conn = pool.borrow().await.unwrap();
    svc.close_tenant("p").await;
    assert!(matches!(pool.borrow().await, Err(PoolError::Closed(_))));

    conn.release().await;
    let status = pool.status();
    assert!(status.closed);
    assert_eq!(status.idle, 0);
    assert_eq!(status.invalidated, 1);
    assert_eq!(count(&connector.tenant("p").unwrap().stats.logoffs), 1);
}

#[tokio::test]
async fn idle_sessions_past_timeout_are_replaced() {
    let connector = connector(&[("p", &["A"])]);
    let pool_config = PoolConfig::new().idle_timeout(Some(Duration::from_millis(20)));
    let svc = service(connector, ServiceOptions::new(), pool_config, &["p"]).await;

    svc.list_folders("p").await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    svc.list_folders("p").await.unwrap();

    let status = svc.registry().lookup("p").unwrap().status();
    assert_eq!(status.created, 2);
    assert_eq!(status.invalidated, 1);
}
