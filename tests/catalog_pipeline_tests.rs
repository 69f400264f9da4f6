//! Listing output flowing through the reducer into the catalog store.

use mdnx_autodl::catalog::{CatalogStore, EpisodeRef, blacklist};
use mdnx_autodl::domain::ServiceKind;
use mdnx_autodl::models::EpisodeFlag;
use mdnx_autodl::parser::reduce;
use std::path::PathBuf;

const LISTING: &str = "\
[INFO] Fetching series
[Z:GRDV0019R] Spy x Family (Seasons: 2, EPs: 6)
  [S:GR2PCVQ7Y] Spy x Family (Season: 1)
    - Subtitles: en-US, es-419
    [E1] [2022-04-09] Spy x Family - Season 1 - Operation Strix [Japanese, English]
    [E2] [2022-04-16] Spy x Family - Season 1 - Secure a Wife [Japanese, English]
    [E3] [2022-04-23] Spy x Family - Season 1 - Prepare for the Interview [Japanese]
    [E4] [2022-04-30] Spy x Family - Season 1 - The Prestigious School's Interview [Japanese]
    [E5] [2022-05-07] Spy x Family - Season 1 - Will They Pass or Fail [Japanese]
    [E6] [2022-05-14] Spy x Family - Season 1 - The Friendship Scheme [Japanese]
  [S:GYE5K3GQR] Spy x Family Season 2 (Season: 2)
";

fn temp_catalog() -> PathBuf {
    std::env::temp_dir()
        .join(format!("mdnx-autodl-pipeline-{}", uuid::Uuid::new_v4()))
        .join("queue.json")
}

#[tokio::test]
async fn test_listing_to_catalog_keeps_local_state_across_refreshes() {
    let path = temp_catalog();
    let store = CatalogStore::open(&path).await.unwrap();

    store
        .merge(ServiceKind::Crunchyroll, reduce(ServiceKind::Crunchyroll, LISTING))
        .await
        .unwrap();

    let series = store.read(ServiceKind::Crunchyroll).await.unwrap();
    let season = &series["GRDV0019R"].seasons["S1"];
    assert_eq!(season.episodes.len(), 6);
    assert_eq!(season.episodes["E1"].available_dubs, vec!["jpn", "eng"]);
    assert!(!series["GRDV0019R"].seasons.contains_key("S2"));

    let updated = store
        .update_episode_flag(
            EpisodeRef {
                service: ServiceKind::Crunchyroll,
                series_id: "GRDV0019R",
                season_key: "S1",
                episode_key: "E1",
            },
            EpisodeFlag::Downloaded,
            true,
        )
        .await
        .unwrap();
    assert!(updated);

    store
        .merge(ServiceKind::Crunchyroll, reduce(ServiceKind::Crunchyroll, LISTING))
        .await
        .unwrap();

    let reopened = CatalogStore::open(&path).await.unwrap();
    let series = reopened.read(ServiceKind::Crunchyroll).await.unwrap();
    assert!(series["GRDV0019R"].seasons["S1"].episodes["E1"].downloaded);
    assert!(reopened.read(ServiceKind::Hidive).await.is_none());

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[tokio::test]
async fn test_episode_range_rule_skips_and_resets() {
    let path = temp_catalog();
    let store = CatalogStore::open(&path).await.unwrap();
    store
        .merge(ServiceKind::Crunchyroll, reduce(ServiceKind::Crunchyroll, LISTING))
        .await
        .unwrap();

    let rules = blacklist::parse_rules(&["S:GR2PCVQ7Y:E:3-5"]).unwrap();
    store
        .apply_rules(ServiceKind::Crunchyroll, "GRDV0019R", &rules)
        .await
        .unwrap();

    let series = store.read(ServiceKind::Crunchyroll).await.unwrap();
    let skipped: Vec<u32> = series["GRDV0019R"].seasons["S1"]
        .ordered_episodes()
        .into_iter()
        .filter(|(_, e)| e.skip)
        .map(|(_, e)| e.number)
        .collect();
    assert_eq!(skipped, vec![3, 4, 5]);

    store
        .apply_rules(ServiceKind::Crunchyroll, "GRDV0019R", &[])
        .await
        .unwrap();
    let series = store.read(ServiceKind::Crunchyroll).await.unwrap();
    assert!(series["GRDV0019R"].seasons["S1"].episodes.values().all(|e| !e.skip));

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[tokio::test]
async fn test_remove_unmonitored_series() {
    let path = temp_catalog();
    let store = CatalogStore::open(&path).await.unwrap();
    store
        .merge(ServiceKind::Crunchyroll, reduce(ServiceKind::Crunchyroll, LISTING))
        .await
        .unwrap();

    assert!(store.remove(ServiceKind::Crunchyroll, "GRDV0019R").await.unwrap());
    assert!(!store.remove(ServiceKind::Crunchyroll, "GRDV0019R").await.unwrap());
    assert!(store.series_ids(ServiceKind::Crunchyroll).await.is_empty());

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[test]
fn test_invalid_rules_are_rejected() {
    assert!(blacklist::parse_rule("E:3").is_err());
    assert!(blacklist::parse_rule("S:S1:E:5-3").is_err());
    assert!(blacklist::parse_rule("S:S1:bogus:1").is_err());
}
