//! Database initialization tests

use tempfile::TempDir;
use tracker_common::db::init_database;

#[tokio::test]
async fn test_foreign_keys_are_enforced() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("tracker.db"), 2).await.unwrap();

    let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(enabled, 1);
}

#[tokio::test]
async fn test_reopen_keeps_existing_data() {
    // Given: a database with one row
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("tracker.db");
    let pool = init_database(&db_path, 2).await.unwrap();
    sqlx::query("CREATE TABLE marker (uid TEXT PRIMARY KEY)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO marker (uid) VALUES ('IpHINAT79UW')")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    // When
    let pool = init_database(&db_path, 2).await.unwrap();

    // Then
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM marker")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}
