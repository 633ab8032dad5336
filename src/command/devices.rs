use anyhow::Result;

use crate::interfaces::kvpath;
use crate::knot::{KvPersister, Persister};

/// Print the stored device registry as JSON
pub fn devices() -> Result<()> {
    let store = KvPersister::open(kvpath::sqlite_store())?;
    let devices = store.load()?;
    println!("{}", serde_json::to_string_pretty(&devices)?);
    Ok(())
}
