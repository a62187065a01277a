mod common;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{Journal, Publisher, config, drain_events, next_loaded, recorded, touch};
use tessera_loader::{
    AdapterCatalog, AdapterLoader, AdapterType, LoaderError, LoaderResult, LoaderState,
    StaticCatalog,
};

fn catalog(journal: &Journal) -> StaticCatalog<dyn Publisher> {
    StaticCatalog::<dyn Publisher>::new()
        .with_type("early.so", "Early", recorded("early", journal))
        .with_type("late.so", "Late", recorded("late", journal))
        .with_type("paused.so", "Paused", recorded("paused", journal))
        .with_type("resumed.so", "Resumed", recorded("resumed", journal))
        .with_type("after.so", "After", recorded("after", journal))
}

#[tokio::test]
async fn new_binary_is_registered_at_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    touch(dir.path(), "early.so");

    let mut loader: AdapterLoader<dyn Publisher> =
        AdapterLoader::new(config(dir.path(), true), Arc::new(catalog(&journal)));
    let mut rx = loader.subscribe();
    loader.initialize().await.unwrap();
    assert_eq!(next_loaded(&mut rx).await.as_deref(), Some("Early"));

    let early = loader.adapters().await;
    assert_eq!(early.len(), 1);

    touch(dir.path(), "late.so");
    assert_eq!(next_loaded(&mut rx).await.as_deref(), Some("Late"));

    let adapters = loader.adapters().await;
    assert_eq!(adapters.len(), 2);
    assert_eq!(adapters[0], early[0]);
    assert_eq!(journal.count("init early"), 1);
    assert_eq!(journal.count("dispose early"), 0);

    loader.dispose().await.unwrap();
}

#[tokio::test]
async fn disabled_loader_ignores_new_binaries() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();

    let mut loader: AdapterLoader<dyn Publisher> =
        AdapterLoader::new(config(dir.path(), true), Arc::new(catalog(&journal)));
    let mut rx = loader.subscribe();

    loader.set_enabled(true).await.unwrap();
    assert_eq!(loader.state(), LoaderState::Enabled);

    loader.set_enabled(false).await.unwrap();
    assert!(!loader.is_enabled());
    assert_eq!(loader.state(), LoaderState::Disabled);

    touch(dir.path(), "paused.so");
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(loader.adapter_count().await, 0);
    assert!(drain_events(&mut rx).is_empty());

    loader.set_enabled(true).await.unwrap();
    assert!(loader.is_enabled());

    touch(dir.path(), "resumed.so");
    assert_eq!(next_loaded(&mut rx).await.as_deref(), Some("Resumed"));
    assert_eq!(loader.adapter_count().await, 1);

    loader.dispose().await.unwrap();
}

#[tokio::test]
async fn disposed_loader_stops_watching() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();

    let mut loader: AdapterLoader<dyn Publisher> =
        AdapterLoader::new(config(dir.path(), true), Arc::new(catalog(&journal)));
    let mut rx = loader.subscribe();
    loader.initialize().await.unwrap();
    loader.dispose().await.unwrap();

    touch(dir.path(), "after.so");
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(drain_events(&mut rx).is_empty());
    assert_eq!(journal.count("init after"), 0);
    assert_eq!(loader.adapter_count().await, 0);
}

/// Refuses binaries whose contents do not end in `END`, like a loader
/// refusing a truncated library
struct SealedCatalog(StaticCatalog<dyn Publisher>);

impl AdapterCatalog<dyn Publisher> for SealedCatalog {
    fn inspect(&self, binary: &Path) -> LoaderResult<Vec<AdapterType<dyn Publisher>>> {
        let contents = std::fs::read(binary).map_err(|e| LoaderError::Discovery {
            binary: binary.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !contents.ends_with(b"END") {
            return Err(LoaderError::Discovery {
                binary: binary.to_path_buf(),
                reason: format!("truncated after {} bytes", contents.len()),
            });
        }
        self.0.inspect(binary)
    }
}

#[tokio::test]
async fn binary_written_in_two_chunks_is_loaded_once_complete() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let catalog = SealedCatalog(
        StaticCatalog::<dyn Publisher>::new().with_type("sealed.so", "Sealed", recorded("sealed", &journal)),
    );

    let mut loader: AdapterLoader<dyn Publisher> =
        AdapterLoader::new(config(dir.path(), true), Arc::new(catalog));
    let mut rx = loader.subscribe();
    loader.initialize().await.unwrap();

    let path = dir.path().join("sealed.so");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"HEAD").unwrap();
    file.flush().unwrap();

    // Long enough for the first chunk to look settled and be rejected
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(loader.adapter_count().await, 0);

    file.write_all(b"END").unwrap();
    file.flush().unwrap();
    drop(file);

    assert_eq!(next_loaded(&mut rx).await.as_deref(), Some("Sealed"));
    assert_eq!(loader.adapter_count().await, 1);
    assert_eq!(journal.count("init sealed"), 1);

    loader.dispose().await.unwrap();
}

#[tokio::test]
async fn binary_removed_before_pickup_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();

    let config = config(dir.path(), true).with_settle_delay(Duration::from_millis(200));
    let mut loader: AdapterLoader<dyn Publisher> =
        AdapterLoader::new(config, Arc::new(catalog(&journal)));
    let mut rx = loader.subscribe();
    loader.initialize().await.unwrap();

    touch(dir.path(), "late.so");
    std::fs::remove_file(dir.path().join("late.so")).unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(loader.adapter_count().await, 0);
    assert!(drain_events(&mut rx).is_empty());

    touch(dir.path(), "early.so");
    assert_eq!(next_loaded(&mut rx).await.as_deref(), Some("Early"));

    loader.dispose().await.unwrap();
}
