//! SQLite storage: the spool inventory and the scale's settings.

use std::str::FromStr;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use spoolscale_firmware::{SettingsStore, SpoolDatabase};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteQueryResult};
use uuid::Uuid;

const CALIBRATION_KEY: &str = "calibration";
const AUTO_TARE_KEY: &str = "auto_tare";

pub async fn connect(url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS spools (
            id TEXT PRIMARY KEY,
            tag_uid TEXT,
            brand TEXT,
            name TEXT,
            material TEXT,
            color_hex TEXT,
            weight_current INTEGER,
            location TEXT,
            data TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Spool {
    pub id: String,
    pub tag_uid: Option<String>,
    pub brand: Option<String>,
    pub name: Option<String>,
    pub material: Option<String>,
    pub color_hex: Option<String>,
    pub weight_current: Option<i64>,
    pub location: Option<String>,
    /// Raw tag JSON for spools registered from a brand tag.
    pub data: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Spool {
    /// JSON written to a spool tag, `sm_id` first.
    pub fn tag_payload(&self) -> String {
        let mut map = Map::new();
        map.insert("sm_id".into(), Value::String(self.id.clone()));
        let fields = [
            ("brand", &self.brand),
            ("name", &self.name),
            ("type", &self.material),
            ("color_hex", &self.color_hex),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                map.insert(key.into(), Value::String(value.clone()));
            }
        }
        Value::Object(map).to_string()
    }
}

#[derive(Debug, Deserialize)]
pub struct SpoolInput {
    pub brand: Option<String>,
    pub name: Option<String>,
    pub material: Option<String>,
    pub color_hex: Option<String>,
    pub weight_current: Option<i64>,
    pub location: Option<String>,
}

/// Inventory filters; every present field narrows the list.
#[derive(Debug, Default, Deserialize)]
pub struct SpoolFilter {
    pub material: Option<String>,
    pub brand: Option<String>,
    pub location: Option<String>,
    /// Substring of name, brand or material.
    pub search: Option<String>,
}

pub async fn list_spools(pool: &SqlitePool, filter: &SpoolFilter) -> sqlx::Result<Vec<Spool>> {
    let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM spools WHERE 1=1");
    let exact = [
        ("material", &filter.material),
        ("brand", &filter.brand),
        ("location", &filter.location),
    ];
    for (column, value) in exact {
        if let Some(value) = value {
            query.push(format!(" AND {column} = ")).push_bind(value.clone());
        }
    }
    if let Some(search) = &filter.search {
        let pattern = format!("%{search}%");
        query
            .push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR brand LIKE ")
            .push_bind(pattern.clone())
            .push(" OR material LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    // most recently weighed or moved first
    query.push(" ORDER BY updated_at DESC, id");
    query.build_query_as::<Spool>().fetch_all(pool).await
}

pub async fn fetch_spool(pool: &SqlitePool, id: &str) -> sqlx::Result<Option<Spool>> {
    sqlx::query_as::<_, Spool>("SELECT * FROM spools WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn insert_spool(
    pool: &SqlitePool,
    input: &SpoolInput,
    tag_uid: Option<&str>,
    data: Option<&str>,
) -> sqlx::Result<Spool> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO spools (
            id, tag_uid, brand, name, material, color_hex,
            weight_current, location, data, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(tag_uid)
    .bind(&input.brand)
    .bind(&input.name)
    .bind(&input.material)
    .bind(&input.color_hex)
    .bind(input.weight_current)
    .bind(&input.location)
    .bind(data)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, Spool>("SELECT * FROM spools WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await
}

/// [`SpoolDatabase`] over the `spools` table.
pub struct SqliteSpoolDatabase {
    pool: SqlitePool,
}

impl SqliteSpoolDatabase {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn updated(result: sqlx::Result<SqliteQueryResult>, spool_id: &str, column: &str) -> bool {
    match result {
        Ok(result) if result.rows_affected() > 0 => true,
        Ok(_) => {
            tracing::warn!(spool_id, column, "unknown spool");
            false
        }
        Err(e) => {
            tracing::error!(spool_id, column, error = %e, "spool update failed");
            false
        }
    }
}

impl SpoolDatabase for SqliteSpoolDatabase {
    fn update_weight<'a>(&'a self, spool_id: &'a str, grams: i16) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let result =
                sqlx::query("UPDATE spools SET weight_current = ?, updated_at = ? WHERE id = ?")
                    .bind(i64::from(grams))
                    .bind(chrono::Utc::now().timestamp())
                    .bind(spool_id)
                    .execute(&self.pool)
                    .await;
            updated(result, spool_id, "weight_current")
        })
    }

    fn update_location<'a>(&'a self, spool_id: &'a str, location: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE spools SET location = ?, updated_at = ? WHERE id = ?")
                .bind(location)
                .bind(chrono::Utc::now().timestamp())
                .bind(spool_id)
                .execute(&self.pool)
                .await;
            updated(result, spool_id, "location")
        })
    }

    fn create_brand_record<'a>(&'a self, json: &'a str, uid: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let value: Value = match serde_json::from_str(json) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(error = %e, "brand tag is not JSON");
                    return false;
                }
            };
            let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_owned);
            let input = SpoolInput {
                brand: text("brand"),
                name: text("name"),
                material: text("type"),
                color_hex: text("color_hex"),
                weight_current: None,
                location: None,
            };
            match insert_spool(&self.pool, &input, Some(uid), Some(json)).await {
                Ok(spool) => {
                    tracing::info!(id = %spool.id, uid, "brand spool registered");
                    true
                }
                Err(e) => {
                    tracing::error!(uid, error = %e, "brand spool insert failed");
                    false
                }
            }
        })
    }
}

/// [`SettingsStore`] over the `settings` key/value table.
pub struct SqliteSettings {
    pool: SqlitePool,
}

impl SqliteSettings {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load(&self, key: &str) -> anyhow::Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn save(&self, key: &str, value: String) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl SettingsStore for SqliteSettings {
    fn load_calibration(&self) -> BoxFuture<'_, anyhow::Result<Option<f32>>> {
        Box::pin(async move {
            match self.load(CALIBRATION_KEY).await? {
                Some(raw) => Ok(Some(raw.parse()?)),
                None => Ok(None),
            }
        })
    }

    fn save_calibration(&self, factor: f32) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move { self.save(CALIBRATION_KEY, factor.to_string()).await })
    }

    fn load_auto_tare(&self) -> BoxFuture<'_, anyhow::Result<Option<bool>>> {
        Box::pin(async move {
            match self.load(AUTO_TARE_KEY).await? {
                Some(raw) => Ok(Some(raw.parse()?)),
                None => Ok(None),
            }
        })
    }

    fn save_auto_tare(&self, enabled: bool) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move { self.save(AUTO_TARE_KEY, enabled.to_string()).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> SqlitePool {
        // every in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        pool
    }

    fn input(name: &str) -> SpoolInput {
        SpoolInput {
            brand: Some("Acme".into()),
            name: Some(name.into()),
            material: Some("PLA".into()),
            color_hex: None,
            weight_current: None,
            location: None,
        }
    }

    #[tokio::test]
    async fn weight_and_location_updates() {
        let pool = pool().await;
        let spool = insert_spool(&pool, &input("Red"), None, None).await.unwrap();
        let db = SqliteSpoolDatabase::new(pool.clone());

        assert!(db.update_weight(&spool.id, 812).await);
        assert!(db.update_location(&spool.id, "Shelf A").await);
        assert!(!db.update_weight("missing", 1).await);

        let stored = fetch_spool(&pool, &spool.id).await.unwrap().unwrap();
        assert_eq!(stored.weight_current, Some(812));
        assert_eq!(stored.location.as_deref(), Some("Shelf A"));
    }

    #[tokio::test]
    async fn brand_tag_creates_spool() {
        let pool = pool().await;
        let db = SqliteSpoolDatabase::new(pool.clone());
        let json = r#"{"brand":"Acme","name":"PLA Red","type":"PLA"}"#;
        assert!(db.create_brand_record(json, "04:5a:21:6c:3b:70:80").await);
        assert!(!db.create_brand_record("not json", "04").await);

        let spools = sqlx::query_as::<_, Spool>("SELECT * FROM spools")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(spools.len(), 1);
        assert_eq!(spools[0].material.as_deref(), Some("PLA"));
        assert_eq!(spools[0].data.as_deref(), Some(json));
    }

    #[tokio::test]
    async fn list_filters_combine() {
        let pool = pool().await;
        let red = insert_spool(&pool, &input("Galaxy Red"), None, None).await.unwrap();
        let mut petg = input("Clear");
        petg.material = Some("PETG".into());
        petg.location = Some("Dryer".into());
        insert_spool(&pool, &petg, None, None).await.unwrap();

        let all = list_spools(&pool, &SpoolFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let pla = SpoolFilter {
            material: Some("PLA".into()),
            ..SpoolFilter::default()
        };
        let found = list_spools(&pool, &pla).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, red.id);

        let search = SpoolFilter {
            brand: Some("Acme".into()),
            search: Some("galaxy".into()),
            ..SpoolFilter::default()
        };
        assert_eq!(list_spools(&pool, &search).await.unwrap()[0].id, red.id);

        let dryer = SpoolFilter {
            location: Some("Dryer".into()),
            material: Some("PLA".into()),
            ..SpoolFilter::default()
        };
        assert!(list_spools(&pool, &dryer).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let settings = SqliteSettings::new(pool().await);
        assert_eq!(settings.load_calibration().await.unwrap(), None);
        settings.save_calibration(431.25).await.unwrap();
        settings.save_calibration(430.5).await.unwrap();
        assert_eq!(settings.load_calibration().await.unwrap(), Some(430.5));

        settings.save_auto_tare(false).await.unwrap();
        assert_eq!(settings.load_auto_tare().await.unwrap(), Some(false));
    }

    #[test]
    fn tag_payload_leads_with_spool_id() {
        let spool = Spool {
            id: "abc".into(),
            tag_uid: None,
            brand: Some("Acme".into()),
            name: None,
            material: Some("PETG".into()),
            color_hex: None,
            weight_current: None,
            location: None,
            data: None,
            created_at: 0,
            updated_at: 0,
        };
        assert_eq!(
            spool.tag_payload(),
            r#"{"sm_id":"abc","brand":"Acme","type":"PETG"}"#
        );
    }
}
