use keyshift_store::{FieldMap, KeyType, Store, StoreError, Ttl};

fn fields(pairs: &[(&str, &[u8])]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_vec()))
        .collect()
}

pub async fn test_dump_restore(store: &Store) -> anyhow::Result<()> {
    let key = "dump_restore:customer:a@b.com:object";
    let original = fields(&[
        ("custid", b"a@b.com"),
        ("passphrase", &[0x24, 0x32, 0x61, 0xff, 0x00, 0x9c]),
    ]);
    store.hset(key, &original).await?;

    let payload = store.dump(key).await?.expect("dump of existing key");
    let target = "dump_restore:customer:0195:object";
    store.restore(target, Ttl::Persistent, &payload, false).await?;

    assert_eq!(store.hgetall(target).await?, original);
    assert_eq!(store.key_type(target).await?, KeyType::Hash);
    assert_eq!(store.pttl(target).await?, Some(Ttl::Persistent));
    assert_eq!(store.dump("dump_restore:missing").await?, None);

    Ok(())
}

pub async fn test_restore_busy_key(store: &Store) -> anyhow::Result<()> {
    let key = "busy:customer:object";
    store.hset(key, &fields(&[("a", b"1")])).await?;
    let payload = store.dump(key).await?.expect("dump of existing key");

    let res = store.restore(key, Ttl::Persistent, &payload, false).await;
    assert!(matches!(res, Err(StoreError::BusyKey(_))));

    store.restore(key, Ttl::Persistent, &payload, true).await?;
    assert_eq!(store.hgetall(key).await?, fields(&[("a", b"1")]));

    Ok(())
}

pub async fn test_restore_corrupt(store: &Store) -> anyhow::Result<()> {
    let res = store
        .restore("corrupt:key", Ttl::Persistent, b"not a dump payload", true)
        .await;

    assert!(res.unwrap_err().is_payload_error());
    assert!(!store.exists("corrupt:key").await?);

    Ok(())
}

pub async fn test_restore_with_ttl(store: &Store) -> anyhow::Result<()> {
    let key = "ttl:secret:object";
    store.hset(key, &fields(&[("value", b"x")])).await?;
    let payload = store.dump(key).await?.expect("dump of existing key");

    store
        .restore("ttl:restored", Ttl::Millis(60_000), &payload, true)
        .await?;

    match store.pttl("ttl:restored").await? {
        Some(Ttl::Millis(ms)) => assert!(ms > 0 && ms <= 60_000),
        other => panic!("unexpected ttl {other:?}"),
    }

    Ok(())
}

pub async fn test_sorted_sets(store: &Store) -> anyhow::Result<()> {
    let key = "zset:customer:instances";
    assert!(store.zadd(key, 20.0, "b").await?);
    assert!(store.zadd(key, 10.0, "a").await?);
    assert!(!store.zadd(key, 30.0, "a").await?);

    assert_eq!(store.zscore(key, "a").await?, Some(30.0));
    assert_eq!(
        store.zrange_withscores(key).await?,
        vec![("b".to_owned(), 20.0), ("a".to_owned(), 30.0)]
    );

    Ok(())
}

pub async fn test_sets_and_counters(store: &Store) -> anyhow::Result<()> {
    assert!(store.sadd("set:applied", "x").await?);
    assert!(!store.sadd("set:applied", "x").await?);
    assert_eq!(store.smembers("set:applied").await?, vec!["x".to_owned()]);

    assert_eq!(store.incrby("counter:domains", 2).await?, 2);
    assert_eq!(store.incrby("counter:domains", 3).await?, 5);

    assert!(store.hget("counter:domains", "x").await.is_err());

    Ok(())
}

pub async fn test_scan_and_delete(store: &Store) -> anyhow::Result<()> {
    for i in 0..25 {
        store
            .hset(&format!("_tmp:run1:{i}"), &fields(&[("f", b"v")]))
            .await?;
    }
    store.hset("kept:key", &fields(&[("f", b"v")])).await?;

    let keys = store.scan_all_with("_tmp:run1:*", 7).await?;
    assert_eq!(keys.len(), 25);

    assert_eq!(store.scan_and_delete("_tmp:run1:*").await?, 25);
    assert!(store.scan_all("_tmp:run1:*").await?.is_empty());
    assert!(store.exists("kept:key").await?);

    Ok(())
}

pub async fn test_select(store: &Store) -> anyhow::Result<()> {
    let other = store.select(store.db() + 1).await?;
    other.hset("select:key", &fields(&[("f", b"v")])).await?;

    assert!(other.exists("select:key").await?);
    assert!(!store.exists("select:key").await?);

    Ok(())
}
