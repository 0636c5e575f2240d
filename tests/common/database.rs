//! Disposable catalog database for tests against a real Postgres
//!
//! Points at the server named by `DATABASE_URL` and recreates the `content`
//! schema on open. Tests holding a [`TestDatabase`] are serialized, since
//! they all share that schema.

use super::constants::*;
use super::fixtures::{at, fast_backoff, uuid};
use catalog_search_sync::source::{PgCatalogSource, PgSettings};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio_postgres::config::Host;
use tokio_postgres::{Client, Config, NoTls};
use uuid::Uuid;

static DATABASE_LOCK: Mutex<()> = Mutex::const_new(());

const CONTENT_SCHEMA: &str = "
    DROP SCHEMA IF EXISTS content CASCADE;
    CREATE SCHEMA content;
    CREATE TABLE content.film_work (
        id uuid PRIMARY KEY,
        title text NOT NULL,
        description text,
        rating float8,
        modified timestamptz NOT NULL
    );
    CREATE TABLE content.genre (
        id uuid PRIMARY KEY,
        name text NOT NULL,
        modified timestamptz NOT NULL
    );
    CREATE TABLE content.person (
        id uuid PRIMARY KEY,
        full_name text NOT NULL,
        modified timestamptz NOT NULL
    );
    CREATE TABLE content.genre_film_work (
        id uuid PRIMARY KEY,
        film_work_id uuid NOT NULL REFERENCES content.film_work (id),
        genre_id uuid NOT NULL REFERENCES content.genre (id)
    );
    CREATE TABLE content.person_film_work (
        id uuid PRIMARY KEY,
        film_work_id uuid NOT NULL REFERENCES content.film_work (id),
        person_id uuid NOT NULL REFERENCES content.person (id),
        role text NOT NULL
    );";

pub struct TestDatabase {
    admin: Client,
    settings: PgSettings,
    _lock: MutexGuard<'static, ()>,
}

impl TestDatabase {
    /// Opens the database with an empty `content` schema, or returns `None`
    /// when `DATABASE_URL` is not set.
    pub async fn open() -> Option<Self> {
        let Ok(url) = std::env::var(DATABASE_URL_ENV) else {
            eprintln!("{} not set, skipping Postgres test", DATABASE_URL_ENV);
            return None;
        };
        let lock = DATABASE_LOCK.lock().await;

        let (admin, connection) = tokio_postgres::connect(&url, NoTls)
            .await
            .expect("Failed to connect to the test database");
        tokio::spawn(async move {
            let _ = connection.await;
        });
        admin
            .batch_execute(CONTENT_SCHEMA)
            .await
            .expect("Failed to create the content schema");

        Some(Self {
            admin,
            settings: settings_from_url(&url),
            _lock: lock,
        })
    }

    /// A catalog source connected with the crate's own settings
    pub async fn source(&self) -> PgCatalogSource {
        PgCatalogSource::connect(self.settings.clone(), fast_backoff())
            .await
            .expect("Failed to connect the catalog source")
    }

    pub async fn add_film(&self, id: &str, title: &str, modified: &str) {
        self.admin
            .execute(
                "INSERT INTO content.film_work (id, title, description, rating, modified)
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &uuid(id),
                    &title,
                    &format!("{} description", title),
                    &8.5_f64,
                    &at(modified),
                ],
            )
            .await
            .expect("Failed to insert film");
    }

    pub async fn add_person(&self, id: &str, full_name: &str, modified: &str) {
        self.admin
            .execute(
                "INSERT INTO content.person (id, full_name, modified) VALUES ($1, $2, $3)",
                &[&uuid(id), &full_name, &at(modified)],
            )
            .await
            .expect("Failed to insert person");
    }

    pub async fn add_genre(&self, id: &str, name: &str, modified: &str) {
        self.admin
            .execute(
                "INSERT INTO content.genre (id, name, modified) VALUES ($1, $2, $3)",
                &[&uuid(id), &name, &at(modified)],
            )
            .await
            .expect("Failed to insert genre");
    }

    pub async fn credit(&self, film_id: &str, person_id: &str, role: &str) {
        self.admin
            .execute(
                "INSERT INTO content.person_film_work (id, film_work_id, person_id, role)
                 VALUES ($1, $2, $3, $4)",
                &[&Uuid::new_v4(), &uuid(film_id), &uuid(person_id), &role],
            )
            .await
            .expect("Failed to insert credit");
    }

    pub async fn tag(&self, film_id: &str, genre_id: &str) {
        self.admin
            .execute(
                "INSERT INTO content.genre_film_work (id, film_work_id, genre_id)
                 VALUES ($1, $2, $3)",
                &[&Uuid::new_v4(), &uuid(film_id), &uuid(genre_id)],
            )
            .await
            .expect("Failed to insert genre link");
    }

    /// Kills every backend opened by the catalog source and waits until they
    /// are gone.
    pub async fn terminate_sync_connections(&self) {
        let terminated = self
            .admin
            .query(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity
                  WHERE application_name = $1",
                &[&SYNC_APPLICATION_NAME],
            )
            .await
            .expect("Failed to terminate backends");
        assert!(!terminated.is_empty(), "No catalog source connection to terminate");

        for _ in 0..100 {
            let remaining = self
                .admin
                .query(
                    "SELECT 1 FROM pg_stat_activity WHERE application_name = $1",
                    &[&SYNC_APPLICATION_NAME],
                )
                .await
                .expect("Failed to list backends");
            if remaining.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("Catalog source backends survived pg_terminate_backend");
    }
}

fn settings_from_url(url: &str) -> PgSettings {
    let config: Config = url
        .parse()
        .expect("DATABASE_URL is not a valid connection string");
    let host = match config.get_hosts().first() {
        Some(Host::Tcp(host)) => host.clone(),
        _ => "localhost".to_string(),
    };

    PgSettings {
        host,
        port: config.get_ports().first().copied().unwrap_or(5432),
        dbname: config
            .get_dbname()
            .expect("DATABASE_URL names no database")
            .to_string(),
        user: config
            .get_user()
            .expect("DATABASE_URL names no user")
            .to_string(),
        password: config
            .get_password()
            .map(|p| String::from_utf8_lossy(p).into_owned()),
        connect_timeout: Duration::from_secs(5),
    }
}
