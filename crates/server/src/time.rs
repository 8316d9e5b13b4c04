use chrono::Utc;

pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn expires_at_ms(now_ms: i64, ttl_seconds: u64) -> i64 {
    let ttl_ms = i64::try_from(ttl_seconds)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000);
    now_ms.saturating_add(ttl_ms)
}
