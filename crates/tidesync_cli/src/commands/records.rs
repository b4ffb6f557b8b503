//! Record editing commands.

use serde_json::Value;
use tidesync_core::{Fields, Record, RecordId, RecordStore};

/// Parses a JSON object of fields.
pub fn parse_fields(json: &str) -> Result<Fields, Box<dyn std::error::Error>> {
    match serde_json::from_str(json)? {
        Value::Object(fields) => Ok(fields),
        other => Err(format!("Expected a JSON object, got {other}").into()),
    }
}

/// Creates or updates a record. Returns the written record.
pub fn upsert(
    store: &RecordStore,
    collection: &str,
    json: &str,
    id: Option<&str>,
) -> Result<Record, Box<dyn std::error::Error>> {
    let fields = parse_fields(json)?;
    let record = match id.map(RecordId::from) {
        Some(id) => match store.get(collection, &id)? {
            Some(_) => store.update(collection, &id, fields)?,
            None => store.create_with_id(collection, id, fields)?,
        },
        None => store.create(collection, fields)?,
    };
    Ok(record)
}

/// Runs the put command.
pub fn put(
    store: &RecordStore,
    collection: &str,
    json: &str,
    id: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let record = upsert(store, collection, json, id)?;
    println!("{} {}/{}", status_label(&record), collection, record.id);
    Ok(())
}

/// Runs the delete command.
pub fn delete(store: &RecordStore, collection: &str, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let record = store.mark_deleted(collection, &RecordId::from(id))?;
    println!("deleted {}/{}", collection, record.id);
    Ok(())
}

/// Runs the list command.
pub fn list(store: &RecordStore, collection: &str, all: bool) -> Result<(), Box<dyn std::error::Error>> {
    let records = if all {
        store.list_all(collection)?
    } else {
        store.list(collection)?
    };
    for record in &records {
        println!(
            "{:<8} {}",
            status_label(record),
            serde_json::to_string(&record.to_raw())?
        );
    }
    println!("{} record(s)", records.len());
    Ok(())
}

fn status_label(record: &Record) -> &'static str {
    if record.deleted {
        "deleted"
    } else if record.is_pending() {
        "pending"
    } else {
        "synced"
    }
}
