use std::path::PathBuf;

use crate::helpers::base_path;

const SQLITE_REL_PATH: &str = "kvs-db/kvstore.db";

pub fn sqlite_store() -> PathBuf {
    base_path::data_dir().join(SQLITE_REL_PATH)
}
