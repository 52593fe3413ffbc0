/// SQL for the key-value table backing the durable store
pub struct Queries;

impl Queries {
    pub const LOAD_VALUE: &'static str = "SELECT value FROM kv_store WHERE key = ?1";

    pub const UPSERT_VALUE: &'static str = r#"
        INSERT INTO kv_store (key, value, updated_at)
        VALUES (?1, ?2, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
    "#;
}
