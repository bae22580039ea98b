use bg_store::{load_readings_csv, MemoryStore, SnapshotStore};

#[tokio::test]
async fn csv_file_loads_in_series_order() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("series.csv");

    // File order is not series order; one row has an empty leg.
    let csv = "\
id,timestamp,onchain_a,onchain_b,onsite_a,onsite_b,captured_by
s3,2024-03-01T12:02:00Z,10,1,0,0,relay-eu
s1,2024-03-01T12:00:00Z,10,1,0,0,relay-eu
s2,2024-03-01 12:01:00,10,,0,0,
";
    std::fs::write(&path, csv)?;

    let readings = load_readings_csv(&path)?;
    assert_eq!(readings.len(), 3);

    let store = MemoryStore::from_readings(readings);
    assert_eq!(store.count().await?, 3);

    let page = store.page(0, 10).await?;
    let ids: Vec<&str> = page.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["s1", "s2", "s3"]);
    assert!(page[1].is_malformed());
    assert_eq!(page[0].captured_by.as_deref(), Some("relay-eu"));
    assert!(page[1].captured_by.is_none());

    Ok(())
}

#[test]
fn missing_file_names_the_path() {
    let err = load_readings_csv(std::path::Path::new("nope/series.csv")).unwrap_err();
    assert!(format!("{err:#}").contains("nope/series.csv"));
}
