//! Relational store access + raw extract archiving for the DB Desk importer.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dbdesk_core::{
    generate_id, NewClient, NewTicket, NewUser, PersistedClient, PersistedTicket, User, UserRole,
};
use sha2::{Digest, Sha256};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{entity} with {field} `{value}` already exists")]
    UniqueViolation {
        entity: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("{entity} references missing {target} `{id}`")]
    MissingReference {
        entity: &'static str,
        target: &'static str,
        id: String,
    },
    #[error("unrecognized user role `{0}`")]
    UnknownRole(String),
}

/// Operations the importer needs from the backing relational store.
///
/// Every create accepts an optional explicit identifier and generates one
/// when it is absent.
#[async_trait]
pub trait Store: Send + Sync {
    async fn delete_all_tickets(&self) -> Result<u64, StoreError>;
    async fn delete_all_clients(&self) -> Result<u64, StoreError>;
    async fn create_client(&self, client: NewClient) -> Result<PersistedClient, StoreError>;
    /// All clients in insertion order.
    async fn find_all_clients(&self) -> Result<Vec<PersistedClient>, StoreError>;
    async fn create_ticket(&self, ticket: NewTicket) -> Result<PersistedTicket, StoreError>;
    async fn find_first_admin(&self) -> Result<Option<User>, StoreError>;
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;
    /// Release the underlying connection(s). Further calls are not expected.
    async fn close(&self);
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn delete_all_tickets(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM tickets").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete_all_clients(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM clients").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn create_client(&self, client: NewClient) -> Result<PersistedClient, StoreError> {
        let id = client.id.unwrap_or_else(generate_id);
        let row = sqlx::query(
            r#"
            INSERT INTO clients (id, name, email, phone, address, chain)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING created_at
            "#,
        )
        .bind(&id)
        .bind(&client.name)
        .bind(&client.email)
        .bind(&client.phone)
        .bind(&client.address)
        .bind(&client.chain)
        .fetch_one(&self.pool)
        .await?;

        Ok(PersistedClient {
            id,
            name: client.name,
            email: client.email,
            phone: client.phone,
            address: client.address,
            chain: client.chain,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn find_all_clients(&self) -> Result<Vec<PersistedClient>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, email, phone, address, chain, created_at
              FROM clients
             ORDER BY seq
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(PersistedClient {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                email: row.try_get("email")?,
                phone: row.try_get("phone")?,
                address: row.try_get("address")?,
                chain: row.try_get("chain")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(out)
    }

    async fn create_ticket(&self, ticket: NewTicket) -> Result<PersistedTicket, StoreError> {
        let id = ticket.id.unwrap_or_else(generate_id);
        let row = sqlx::query(
            r#"
            INSERT INTO tickets
                (id, title, description, status, priority, client_id, assigned_to_id, created_by_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING created_at
            "#,
        )
        .bind(&id)
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(ticket.status.as_str())
        .bind(ticket.priority.as_str())
        .bind(&ticket.client_id)
        .bind(&ticket.assigned_to_id)
        .bind(&ticket.created_by_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(PersistedTicket {
            id,
            title: ticket.title,
            description: ticket.description,
            status: ticket.status,
            priority: ticket.priority,
            client_id: ticket.client_id,
            assigned_to_id: ticket.assigned_to_id,
            created_by_id: ticket.created_by_id,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn find_first_admin(&self) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, email, name, role
              FROM users
             WHERE role = 'ADMIN'
             ORDER BY created_at
             LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let role: String = row.try_get("role")?;
        Ok(Some(User {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            role: UserRole::parse(&role).ok_or(StoreError::UnknownRole(role))?,
        }))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let id = generate_id();
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password, name, role)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(user.role.as_str())
        .execute(&self.pool)
        .await?;

        Ok(User {
            id,
            email: user.email,
            name: user.name,
            role: user.role,
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    users: Vec<(User, String)>,
    clients: Vec<PersistedClient>,
    tickets: Vec<PersistedTicket>,
}

/// In-process store with the same key and reference constraints as the SQL schema.
///
/// Backs `import --dry-run` and the pipeline tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn clients(&self) -> Vec<PersistedClient> {
        self.state.lock().await.clients.clone()
    }

    pub async fn tickets(&self) -> Vec<PersistedTicket> {
        self.state.lock().await.tickets.clone()
    }

    pub async fn users(&self) -> Vec<User> {
        self.state
            .lock()
            .await
            .users
            .iter()
            .map(|(user, _)| user.clone())
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn delete_all_tickets(&self) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let count = state.tickets.len() as u64;
        state.tickets.clear();
        Ok(count)
    }

    async fn delete_all_clients(&self) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(ticket) = state.tickets.first() {
            return Err(StoreError::MissingReference {
                entity: "ticket",
                target: "client",
                id: ticket.client_id.clone(),
            });
        }
        let count = state.clients.len() as u64;
        state.clients.clear();
        Ok(count)
    }

    async fn create_client(&self, client: NewClient) -> Result<PersistedClient, StoreError> {
        let mut state = self.state.lock().await;
        let id = client.id.unwrap_or_else(generate_id);
        if state.clients.iter().any(|c| c.id == id) {
            return Err(StoreError::UniqueViolation {
                entity: "client",
                field: "id",
                value: id,
            });
        }
        if state.clients.iter().any(|c| c.email == client.email) {
            return Err(StoreError::UniqueViolation {
                entity: "client",
                field: "email",
                value: client.email,
            });
        }
        let persisted = PersistedClient {
            id,
            name: client.name,
            email: client.email,
            phone: client.phone,
            address: client.address,
            chain: client.chain,
            created_at: Utc::now(),
        };
        state.clients.push(persisted.clone());
        Ok(persisted)
    }

    async fn find_all_clients(&self) -> Result<Vec<PersistedClient>, StoreError> {
        Ok(self.state.lock().await.clients.clone())
    }

    async fn create_ticket(&self, ticket: NewTicket) -> Result<PersistedTicket, StoreError> {
        let mut state = self.state.lock().await;
        let id = ticket.id.unwrap_or_else(generate_id);
        if state.tickets.iter().any(|t| t.id == id) {
            return Err(StoreError::UniqueViolation {
                entity: "ticket",
                field: "id",
                value: id,
            });
        }
        if !state.clients.iter().any(|c| c.id == ticket.client_id) {
            return Err(StoreError::MissingReference {
                entity: "ticket",
                target: "client",
                id: ticket.client_id,
            });
        }
        for user_id in [&ticket.assigned_to_id, &ticket.created_by_id] {
            if !state.users.iter().any(|(u, _)| &u.id == user_id) {
                return Err(StoreError::MissingReference {
                    entity: "ticket",
                    target: "user",
                    id: user_id.clone(),
                });
            }
        }
        let persisted = PersistedTicket {
            id,
            title: ticket.title,
            description: ticket.description,
            status: ticket.status,
            priority: ticket.priority,
            client_id: ticket.client_id,
            assigned_to_id: ticket.assigned_to_id,
            created_by_id: ticket.created_by_id,
            created_at: Utc::now(),
        };
        state.tickets.push(persisted.clone());
        Ok(persisted)
    }

    async fn find_first_admin(&self) -> Result<Option<User>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .users
            .iter()
            .find(|(u, _)| u.role == UserRole::Admin)
            .map(|(u, _)| u.clone()))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut state = self.state.lock().await;
        if state.users.iter().any(|(u, _)| u.email == user.email) {
            return Err(StoreError::UniqueViolation {
                entity: "user",
                field: "email",
                value: user.email,
            });
        }
        let created = User {
            id: generate_id(),
            email: user.email,
            name: user.name,
            role: user.role,
        };
        state.users.push((created.clone(), user.password_hash));
        Ok(created)
    }

    async fn close(&self) {}
}

#[derive(Debug, Clone)]
pub struct ArchivedExtract {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Write-once archive of the raw extracts an import consumed.
#[derive(Debug, Clone)]
pub struct ExtractArchive {
    root: PathBuf,
}

impl ExtractArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn relative_path_for(
        &self,
        archived_at: DateTime<Utc>,
        kind: &str,
        content_hash: &str,
    ) -> PathBuf {
        let stamp = archived_at.format("%Y%m%d_%H%M%S").to_string();
        PathBuf::from(stamp)
            .join(kind)
            .join(format!("{content_hash}.csv"))
    }

    /// Archive one extract under `<stamp>/<kind>/<sha256>.csv`. Identical content
    /// already archived under the same stamp is not rewritten.
    pub async fn archive_bytes(
        &self,
        archived_at: DateTime<Utc>,
        kind: &str,
        bytes: &[u8],
    ) -> anyhow::Result<ArchivedExtract> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.relative_path_for(archived_at, kind, &content_hash);
        let absolute_path = self.root.join(&relative_path);

        let deduplicated = write_once(&absolute_path, bytes).await?;
        debug!(kind, hash = %content_hash, deduplicated, "archived extract");

        Ok(ArchivedExtract {
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            deduplicated,
        })
    }
}

/// Write `bytes` to `path` through a staging file in the same directory.
/// Returns `true` when `path` already existed and nothing was written.
async fn write_once(path: &Path, bytes: &[u8]) -> anyhow::Result<bool> {
    let dir = path
        .parent()
        .with_context(|| format!("archive path {} has no parent", path.display()))?;
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating archive directory {}", dir.display()))?;

    if fs::try_exists(path)
        .await
        .with_context(|| format!("checking archive path {}", path.display()))?
    {
        return Ok(true);
    }

    let staging = dir.join(format!(".{}.partial", Uuid::new_v4()));
    fs::write(&staging, bytes)
        .await
        .with_context(|| format!("writing staging file {}", staging.display()))?;
    if let Err(err) = fs::rename(&staging, path).await {
        let _ = fs::remove_file(&staging).await;
        return Err(err).with_context(|| format!("moving extract into {}", path.display()));
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbdesk_core::{TicketPriority, TicketStatus};
    use tempfile::tempdir;

    fn new_client(id: Option<&str>, name: &str) -> NewClient {
        NewClient {
            id: id.map(str::to_string),
            name: name.to_string(),
            email: format!("{}@placeholder.com", name.to_lowercase().replace(' ', "_")),
            phone: String::new(),
            address: String::new(),
            chain: None,
        }
    }

    async fn admin(store: &MemoryStore) -> User {
        store
            .create_user(NewUser {
                email: "admin@dbdesk.com".into(),
                password_hash: "hash".into(),
                name: "Admin".into(),
                role: UserRole::Admin,
            })
            .await
            .expect("admin")
    }

    fn new_ticket(id: Option<&str>, client_id: &str, user_id: &str) -> NewTicket {
        NewTicket {
            id: id.map(str::to_string),
            title: "Printer jammed".into(),
            description: String::new(),
            status: TicketStatus::Open,
            priority: TicketPriority::Medium,
            client_id: client_id.into(),
            assigned_to_id: user_id.into(),
            created_by_id: user_id.into(),
        }
    }

    #[test]
    fn extract_hashing_is_stable() {
        let hash = ExtractArchive::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn identical_extracts_are_archived_once() {
        let dir = tempdir().expect("tempdir");
        let archive = ExtractArchive::new(dir.path());
        let archived_at = DateTime::parse_from_rfc3339("2026-04-28T08:00:00Z")
            .expect("ts")
            .with_timezone(&Utc);

        let first = archive
            .archive_bytes(archived_at, "clients", b"CLIENTI Id,Last Name\n1,Acme\n")
            .await
            .expect("first archive");
        let second = archive
            .archive_bytes(archived_at, "clients", b"CLIENTI Id,Last Name\n1,Acme\n")
            .await
            .expect("second archive");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first.relative_path.starts_with("20260428_080000/clients"));
        assert!(first.absolute_path.exists());
    }

    #[tokio::test]
    async fn distinct_extracts_leave_no_staging_files() {
        let dir = tempdir().expect("tempdir");
        let archive = ExtractArchive::new(dir.path());
        let archived_at = Utc::now();

        let clients = archive
            .archive_bytes(archived_at, "clients", b"CLIENTI Id\n1\n")
            .await
            .expect("clients archive");
        let tickets = archive
            .archive_bytes(archived_at, "tickets", b"TICKET Id\nt-1\n")
            .await
            .expect("tickets archive");

        assert_ne!(clients.content_hash, tickets.content_hash);
        assert_eq!(
            std::fs::read(&tickets.absolute_path).expect("read back"),
            b"TICKET Id\nt-1\n".to_vec()
        );
        let parent = clients.absolute_path.parent().expect("parent");
        let names: Vec<String> = std::fs::read_dir(parent)
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{}.csv", clients.content_hash)]);
    }

    #[tokio::test]
    async fn memory_store_generates_ids_and_keeps_insertion_order() {
        let store = MemoryStore::new();
        let a = store.create_client(new_client(Some("c-1"), "Acme")).await.unwrap();
        let b = store.create_client(new_client(None, "Beta")).await.unwrap();

        assert_eq!(a.id, "c-1");
        assert!(!b.id.is_empty());
        let all = store.find_all_clients().await.unwrap();
        assert_eq!(
            all.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["Acme", "Beta"]
        );
    }

    #[tokio::test]
    async fn memory_store_rejects_duplicate_client_keys() {
        let store = MemoryStore::new();
        store.create_client(new_client(Some("c-1"), "Acme")).await.unwrap();

        let dup_id = store.create_client(new_client(Some("c-1"), "Other")).await;
        assert!(matches!(
            dup_id,
            Err(StoreError::UniqueViolation { field: "id", .. })
        ));
        let dup_email = store.create_client(new_client(Some("c-2"), "Acme")).await;
        assert!(matches!(
            dup_email,
            Err(StoreError::UniqueViolation { field: "email", .. })
        ));
    }

    #[tokio::test]
    async fn memory_store_enforces_ticket_references() {
        let store = MemoryStore::new();
        let user = admin(&store).await;
        let missing = store.create_ticket(new_ticket(None, "nope", &user.id)).await;
        assert!(matches!(
            missing,
            Err(StoreError::MissingReference { target: "client", .. })
        ));

        store.create_client(new_client(Some("c-1"), "Acme")).await.unwrap();
        store
            .create_ticket(new_ticket(Some("t-1"), "c-1", &user.id))
            .await
            .unwrap();
        assert!(store.delete_all_clients().await.is_err());
        assert_eq!(store.delete_all_tickets().await.unwrap(), 1);
        assert_eq!(store.delete_all_clients().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn first_admin_is_found_after_creation() {
        let store = MemoryStore::new();
        assert!(store.find_first_admin().await.unwrap().is_none());
        let created = admin(&store).await;
        assert_eq!(store.find_first_admin().await.unwrap(), Some(created));
    }
}
