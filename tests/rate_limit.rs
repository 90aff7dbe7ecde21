use windowquota::{
    GrantedQuota, InMemoryUsageStore, Quota, RequestedQuota, SlidingWindowRateLimiter,
};

const TIMESTAMP_OFFSET: u64 = 100;

fn limiter() -> SlidingWindowRateLimiter<InMemoryUsageStore> {
    SlidingWindowRateLimiter::new(InMemoryUsageStore::new())
}

fn request(prefix: &str, requested: u64, quotas: &[Quota]) -> RequestedQuota {
    RequestedQuota::new(prefix, requested, quotas.to_vec()).expect("valid request")
}

#[tokio::test]
async fn empty_quota() {
    let limiter = limiter();
    let quotas = [Quota::new(10, 1, 0).unwrap()];

    let resp = limiter
        .check_and_use_quotas_at(&[request("foo", 1, &quotas)], TIMESTAMP_OFFSET)
        .await
        .unwrap();
    assert_eq!(resp, vec![GrantedQuota::new("foo", 0, quotas.to_vec())]);
}

#[tokio::test]
async fn basic() {
    let limiter = limiter();
    let quotas = [Quota::new(10, 1, 10).unwrap()];

    for timestamp in 0..10 {
        let resp = limiter
            .check_and_use_quotas_at(&[request("foo", 1, &quotas)], TIMESTAMP_OFFSET + timestamp)
            .await
            .unwrap();
        assert_eq!(resp, vec![GrantedQuota::new("foo", 1, vec![])], "t={}", timestamp);
    }

    let resp = limiter
        .check_and_use_quotas_at(&[request("foo", 1, &quotas)], TIMESTAMP_OFFSET + 9)
        .await
        .unwrap();
    assert_eq!(resp, vec![GrantedQuota::new("foo", 0, quotas.to_vec())]);

    // Steady state: one unit drops out of the window every second.
    for timestamp in 10..20 {
        let resp = limiter
            .check_and_use_quotas_at(&[request("foo", 1, &quotas)], TIMESTAMP_OFFSET + timestamp)
            .await
            .unwrap();
        assert_eq!(resp, vec![GrantedQuota::new("foo", 1, vec![])], "t={}", timestamp);

        let resp = limiter
            .check_and_use_quotas_at(&[request("foo", 1, &quotas)], TIMESTAMP_OFFSET + timestamp)
            .await
            .unwrap();
        assert_eq!(resp, vec![GrantedQuota::new("foo", 0, quotas.to_vec())], "t={}", timestamp);
    }
}

#[tokio::test]
async fn multiple_windows() {
    let limiter = limiter();
    let quotas = [Quota::new(10, 1, 10).unwrap(), Quota::new(5, 1, 5).unwrap()];

    let resp = limiter
        .check_and_use_quotas_at(&[request("foo", 6, &quotas)], TIMESTAMP_OFFSET)
        .await
        .unwrap();
    assert_eq!(resp, vec![GrantedQuota::new("foo", 5, quotas[1..].to_vec())]);

    let resp = limiter
        .check_and_use_quotas_at(&[request("foo", 6, &quotas)], TIMESTAMP_OFFSET)
        .await
        .unwrap();
    assert_eq!(resp, vec![GrantedQuota::new("foo", 0, quotas.to_vec())]);

    let resp = limiter
        .check_and_use_quotas_at(&[request("foo", 6, &quotas)], TIMESTAMP_OFFSET + 2)
        .await
        .unwrap();
    assert_eq!(resp, vec![GrantedQuota::new("foo", 0, quotas.to_vec())]);

    // The 5s window has let go of the first grant, the 10s window has not.
    let resp = limiter
        .check_and_use_quotas_at(&[request("foo", 6, &quotas)], TIMESTAMP_OFFSET + 6)
        .await
        .unwrap();
    assert_eq!(resp, vec![GrantedQuota::new("foo", 5, quotas[..1].to_vec())]);
}

#[tokio::test]
async fn conflicting_quotas() {
    let limiter = limiter();
    let quotas = [Quota::new(10, 1, 10).unwrap().with_prefix_override("hello")];

    let resp = limiter
        .check_and_use_quotas_at(
            &[request("foo", 6, &quotas), request("bar", 6, &quotas)],
            TIMESTAMP_OFFSET,
        )
        .await
        .unwrap();

    assert_eq!(
        resp,
        vec![GrantedQuota::new("foo", 6, vec![]), GrantedQuota::new("bar", 4, quotas.to_vec())]
    );
}

#[tokio::test]
async fn batch_order_decides_who_is_cut() {
    let limiter = limiter();
    let quotas = [Quota::new(10, 1, 10).unwrap().with_prefix_override("hello")];

    let resp = limiter
        .check_and_use_quotas_at(
            &[request("bar", 6, &quotas), request("foo", 6, &quotas)],
            TIMESTAMP_OFFSET,
        )
        .await
        .unwrap();

    assert_eq!(resp[0], GrantedQuota::new("bar", 6, vec![]));
    assert_eq!(resp[1], GrantedQuota::new("foo", 4, quotas.to_vec()));
}

#[tokio::test]
async fn prefixes_without_override_are_independent() {
    let limiter = limiter();
    let quotas = [Quota::new(10, 1, 5).unwrap()];

    let resp = limiter
        .check_and_use_quotas_at(
            &[request("foo", 5, &quotas), request("bar", 5, &quotas)],
            TIMESTAMP_OFFSET,
        )
        .await
        .unwrap();

    assert_eq!(resp[0].granted(), 5);
    assert_eq!(resp[1].granted(), 5);
}

#[tokio::test]
async fn same_counter_key_is_shared_across_requests_with_different_limits() {
    let limiter = limiter();
    let loose = [Quota::new(10, 1, 100).unwrap()];
    let tight = [Quota::new(10, 1, 8).unwrap()];

    // Same prefix, window and granularity: one usage history.
    limiter.check_and_use_quotas_at(&[request("foo", 6, &loose)], TIMESTAMP_OFFSET).await.unwrap();
    let resp = limiter
        .check_and_use_quotas_at(&[request("foo", 6, &tight)], TIMESTAMP_OFFSET)
        .await
        .unwrap();
    assert_eq!(resp, vec![GrantedQuota::new("foo", 2, tight.to_vec())]);
}

#[tokio::test]
async fn grant_is_credited_to_every_quota() {
    let limiter = limiter();
    let quotas = [Quota::new(10, 1, 100).unwrap(), Quota::new(5, 1, 3).unwrap()];

    let resp = limiter
        .check_and_use_quotas_at(&[request("foo", 7, &quotas)], TIMESTAMP_OFFSET)
        .await
        .unwrap();
    assert_eq!(resp[0].granted(), 3);

    // The loose quota is charged the reduced amount, not the request.
    assert_eq!(limiter.usage("foo", &quotas[0], TIMESTAMP_OFFSET).await.unwrap(), 3);
    assert_eq!(limiter.usage("foo", &quotas[1], TIMESTAMP_OFFSET).await.unwrap(), 3);
}

#[tokio::test]
async fn grant_counts_for_exactly_one_window() {
    let limiter = limiter();
    let quota = Quota::new(10, 1, 100).unwrap();

    let before = limiter.usage("foo", &quota, TIMESTAMP_OFFSET).await.unwrap();
    limiter
        .check_and_use_quotas_at(&[request("foo", 4, &[quota.clone()])], TIMESTAMP_OFFSET)
        .await
        .unwrap();

    for t in TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 10 {
        assert_eq!(limiter.usage("foo", &quota, t).await.unwrap(), before + 4, "t={}", t);
    }
    for t in TIMESTAMP_OFFSET + 10..TIMESTAMP_OFFSET + 25 {
        assert_eq!(limiter.usage("foo", &quota, t).await.unwrap(), before, "t={}", t);
    }
}

#[tokio::test]
async fn coarse_buckets_round_window_up() {
    let limiter = limiter();
    // 10s window over 3s buckets: four buckets, so 12s of coverage.
    let quotas = [Quota::new(10, 3, 5).unwrap()];

    limiter.check_and_use_quotas_at(&[request("foo", 5, &quotas)], 99).await.unwrap();

    // Bucket 99 is still one of the four buckets ending at bucket 108.
    let resp = limiter.check_and_use_quotas_at(&[request("foo", 1, &quotas)], 110).await.unwrap();
    assert_eq!(resp[0].granted(), 0);

    let resp = limiter.check_and_use_quotas_at(&[request("foo", 1, &quotas)], 111).await.unwrap();
    assert_eq!(resp[0].granted(), 1);
}

#[tokio::test]
async fn day_long_window_at_wall_clock_timestamps() {
    let limiter = limiter().with_store_timeout(std::time::Duration::from_millis(500));
    let quotas = [Quota::new(86_400, 1, 10).unwrap()];
    let now = 1_700_000_000;

    let resp = limiter.check_and_use_quotas_at(&[request("foo", 1, &quotas)], now).await.unwrap();
    assert_eq!(resp[0].granted(), 1);

    let resp = limiter
        .check_and_use_quotas_at(&[request("foo", 20, &quotas)], now + 86_399)
        .await
        .unwrap();
    assert_eq!(resp, vec![GrantedQuota::new("foo", 9, quotas.to_vec())]);

    let resp = limiter.check_and_use_quotas_at(&[request("foo", 5, &quotas)], now + 86_400).await.unwrap();
    assert_eq!(resp, vec![GrantedQuota::new("foo", 1, quotas.to_vec())]);
}

#[test]
fn windows_past_the_bucket_ceiling_are_rejected() {
    let err = Quota::new(u64::MAX, 1, 10).unwrap_err();
    assert!(err.is_invalid());
    assert!(Quota::new(windowquota::MAX_BUCKETS * 60, 60, 10).is_ok());
}
