use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::device::{DeviceClass, DeviceRecord};

/// Read-only view of the device registry used by the controller.
pub trait DeviceDirectory: Send + Sync {
    fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>>;
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

pub struct SqliteDeviceDirectory {
    conn: Mutex<Connection>,
}

impl SqliteDeviceDirectory {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)
            .with_context(|| format!("open device database {}", db_path))?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace a device row. Used by the admin tooling only.
    pub fn upsert_device(&self, record: &DeviceRecord) -> Result<()> {
        let meta_json = record
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO streaming_devices(device_id, device_type, ip, port, username, password, meta_data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(device_id) DO UPDATE SET
              device_type = excluded.device_type,
              ip = excluded.ip,
              port = excluded.port,
              username = excluded.username,
              password = excluded.password,
              meta_data = excluded.meta_data
            "#,
            params![
                record.device_id,
                record.device_class.as_str(),
                record.host,
                record.port,
                record.username,
                record.password,
                meta_json
            ],
        )?;
        Ok(())
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT device_id, device_type, ip, port, username, password, meta_data \
             FROM streaming_devices ORDER BY device_id",
        )?;
        let raw = stmt
            .query_map([], RawDeviceRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(RawDeviceRow::into_record).collect()
    }

    /// Returns whether a row was removed.
    pub fn remove_device(&self, device_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM streaming_devices WHERE device_id = ?1",
            params![device_id],
        )?;
        Ok(removed > 0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("device directory lock poisoned"))
    }
}

impl DeviceDirectory for SqliteDeviceDirectory {
    fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT device_id, device_type, ip, port, username, password, meta_data \
                 FROM streaming_devices WHERE device_id = ?1",
                params![device_id],
                RawDeviceRow::from_row,
            )
            .optional()?;
        raw.map(RawDeviceRow::into_record).transpose()
    }
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS streaming_devices (
          device_id TEXT PRIMARY KEY,
          device_type TEXT NOT NULL CHECK (device_type IN ('camera', 'nvr')),
          ip TEXT,
          port INTEGER,
          username TEXT,
          password TEXT,
          meta_data TEXT
        );
        "#,
    )?;
    Ok(())
}

struct RawDeviceRow {
    device_id: String,
    device_type: String,
    ip: Option<String>,
    port: Option<i64>,
    username: Option<String>,
    password: Option<String>,
    meta_data: Option<String>,
}

impl RawDeviceRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            device_id: row.get(0)?,
            device_type: row.get(1)?,
            ip: row.get(2)?,
            port: row.get(3)?,
            username: row.get(4)?,
            password: row.get(5)?,
            meta_data: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<DeviceRecord> {
        let device_class: DeviceClass = self
            .device_type
            .parse()
            .with_context(|| format!("corrupt device row {}", self.device_id))?;
        let port = self
            .port
            .map(|port| {
                u16::try_from(port)
                    .map_err(|_| anyhow!("corrupt device row {}: port {}", self.device_id, port))
            })
            .transpose()?;
        let metadata: Option<serde_json::Value> = self
            .meta_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .with_context(|| format!("corrupt meta_data for device {}", self.device_id))?;
        Ok(DeviceRecord {
            device_id: self.device_id,
            device_class,
            host: self.ip,
            port,
            username: self.username,
            password: self.password,
            metadata,
        })
    }
}

/// Directory backed by a fixed set of records.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDeviceDirectory {
    devices: HashMap<String, DeviceRecord>,
}

impl InMemoryDeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, record: DeviceRecord) -> Self {
        self.insert(record);
        self
    }

    pub fn insert(&mut self, record: DeviceRecord) {
        self.devices.insert(record.device_id.clone(), record);
    }
}

impl DeviceDirectory for InMemoryDeviceDirectory {
    fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>> {
        Ok(self.devices.get(device_id).cloned())
    }
}
