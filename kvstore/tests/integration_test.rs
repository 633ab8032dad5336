use kvstore::{KVDb, KVStoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct Sensor {
    name: String,
    sensor_id: u64,
    tags: Vec<String>,
}

#[test]
fn write_and_read_object() -> Result<(), KVStoreError> {
    let _ = env_logger::builder().is_test(true).try_init();
    let tempdir = tempfile::tempdir()?;
    let sqlite_db = tempdir.path().join("kvs-db/kvstore.db");

    let db = KVDb::new(&sqlite_db)?;

    let thermo = Sensor {
        name: String::from("thermo"),
        sensor_id: 1,
        tags: vec![String::from("indoor"), String::from("celsius")],
    };

    db.set("thermo", &thermo)?;
    let thermo2: Sensor = db.get("thermo")?.unwrap();
    assert_eq!(thermo2, thermo);

    // A second connection sees what the first one wrote
    let db2 = KVDb::new(&sqlite_db)?;
    let thermo3: Sensor = db2.get("thermo")?.unwrap();
    assert_eq!(thermo3, thermo);
    Ok(())
}

#[test]
fn overwrite_replaces_whole_document() -> Result<(), KVStoreError> {
    let tempdir = tempfile::tempdir()?;
    let db = KVDb::new(tempdir.path().join("kvstore.db"))?;

    let mut doc = HashMap::from([("a".to_string(), 1), ("b".to_string(), 2)]);
    db.set("doc", &doc)?;

    doc.remove("a");
    db.set("doc", &doc)?;

    let stored: HashMap<String, i32> = db.get("doc")?.unwrap();
    assert_eq!(stored, HashMap::from([("b".to_string(), 2)]));
    Ok(())
}
