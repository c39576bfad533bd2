mod helpers;

use lensmatch::config::LensmatchConfig;
use lensmatch::db;
use lensmatch::db::migrations::{get_embedding_model, get_schema_version, run_migrations, CURRENT_SCHEMA_VERSION};
use lensmatch::matching::WeightingPolicy;
use tempfile::TempDir;

#[test]
fn fresh_db_migrates_to_current_version() {
    let conn = helpers::test_db();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    assert_eq!(get_embedding_model(&conn).unwrap().as_deref(), Some("all-MiniLM-L6-v2"));
}

#[test]
fn migrations_are_idempotent() {
    let mut conn = helpers::test_db();
    run_migrations(&mut conn).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn open_creates_new_db_at_nonexistent_path() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("subdir").join("lensmatch.db");
    assert!(!db_path.exists());

    let conn = db::open_database(&db_path).unwrap();
    assert!(db_path.exists());

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM content_units", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn reopening_keeps_data_and_schema() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("lensmatch.db");
    {
        let conn = db::open_database(&db_path).unwrap();
        helpers::question(
            &conn,
            "q1",
            lensmatch::catalog::types::Dimension::Companion,
            lensmatch::catalog::types::QuestionType::SingleChoice,
        );
    }

    let conn = db::open_database(&db_path).unwrap();
    let report = db::check_database_health(&conn).unwrap();
    assert!(report.integrity_ok);
    assert_eq!(report.schema_version, CURRENT_SCHEMA_VERSION);
    assert_eq!(report.question_count, 1);
}

#[test]
fn config_file_overrides_defaults() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[server]
port = 9000

[pipeline]
batch_size = 8

[matching]
missing_dimension_policy = "renormalize"
"#,
    )
    .unwrap();

    let config = LensmatchConfig::load_from(&path).unwrap();
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.pipeline.batch_size, 8);
    assert_eq!(config.pipeline.max_concurrency, 4);
    assert_eq!(config.matching.missing_dimension_policy, WeightingPolicy::Renormalize);
    assert_eq!(config.embedding.image_provider, "none");
}

#[test]
fn zero_batch_size_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[pipeline]\nbatch_size = 0\n").unwrap();
    assert!(LensmatchConfig::load_from(&path).is_err());
}

#[test]
fn missing_config_file_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let config = LensmatchConfig::load_from(tmp.path().join("absent.toml")).unwrap();
    assert_eq!(config.matching.missing_dimension_policy, WeightingPolicy::Skip);
    assert!(!config.embedding.provider.is_empty());
}
