use reverie::db;
use reverie::db::migrations::{get_schema_version, CURRENT_SCHEMA_VERSION};

/// A database file written before scene descriptions and avatars existed.
fn write_v1_database(path: &std::path::Path) {
    db::load_sqlite_vec();
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE personas (
             id TEXT PRIMARY KEY,
             name TEXT NOT NULL,
             label TEXT NOT NULL DEFAULT '',
             nsfw INTEGER NOT NULL DEFAULT 0,
             tags TEXT NOT NULL DEFAULT '[]',
             introduction TEXT NOT NULL
         );
         CREATE TABLE schema_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
         INSERT INTO schema_meta (key, value) VALUES ('schema_version', '1');
         INSERT INTO personas (id, name, introduction) VALUES ('mei', 'Mei', 'Hi.');",
    )
    .unwrap();
}

#[test]
fn v1_database_upgrades_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.db");
    write_v1_database(&path);

    let conn = db::open_database(&path).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);

    let persona = reverie::store::personas::get_persona(&conn, "mei")
        .unwrap()
        .unwrap();
    assert_eq!(persona.name, "Mei");
    assert_eq!(persona.environment, None);
    assert_eq!(persona.image, None);
}

#[test]
fn reopening_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reverie.db");

    drop(db::open_database(&path).unwrap());
    let conn = db::open_database(&path).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}
