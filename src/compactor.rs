use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::engine::{Engine, EngineError};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact once `threshold` appends have piled up since the last compaction.
/// Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if threshold == 0 || appends < threshold {
        return Ok(false);
    }
    debug!("{appends} appends since last compaction, compacting");
    engine.compact_wal().await?;
    Ok(true)
}

/// Background task that keeps the WAL short.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&engine, threshold).await {
            error!("WAL compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("meftahi_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();

        let id = Ulid::new();
        engine
            .create_listing(
                id,
                NewListing {
                    title: "Duplex Bizerte".into(),
                    purpose: ListingPurpose::Location,
                    kind: PropertyKind::Appartement,
                    price: 1000,
                    currency: None,
                    city: None,
                    area_m2: None,
                    bedrooms: None,
                    status: None,
                    description: None,
                    address: None,
                    bathrooms: None,
                    year_built: None,
                },
            )
            .await
            .unwrap();
        assert!(!compact_if_due(&engine, 3).await.unwrap());

        engine.set_listing_status(id, ListingStatus::Publie).await.unwrap();
        engine.set_listing_status(id, ListingStatus::Retire).await.unwrap();
        assert!(compact_if_due(&engine, 3).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert!(!compact_if_due(&engine, 3).await.unwrap());
    }

    #[tokio::test]
    async fn zero_threshold_disables() {
        let path = test_wal_path("disabled.wal");
        let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
        assert!(!compact_if_due(&engine, 0).await.unwrap());
    }
}
