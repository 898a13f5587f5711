//! Subscription storage.
//!
//! The feed only reads from the store. [`SubscriptionStore`] is the
//! capability handed to the server; [`SqliteStore`] implements it over a
//! SQLite file, opening a connection per call and closing it on return.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::SubcalResult;
use crate::subscription::{MainCurrency, SubscriptionRecord, User};

/// Read access to users and their subscriptions.
pub trait SubscriptionStore: Send + Sync {
    /// Resolve an API key to its user, `None` if no user has this key.
    fn find_user_by_api_key(&self, api_key: &str) -> SubcalResult<Option<User>>;

    /// Active subscriptions of one user, ordered by next payment date.
    fn active_subscriptions(&self, user_id: i64) -> SubcalResult<Vec<SubscriptionRecord>>;

    /// The user's main currency, if it is set and exists.
    fn main_currency(&self, user_id: i64) -> SubcalResult<Option<MainCurrency>>;
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS user(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL,
        api_key TEXT UNIQUE,
        main_currency INTEGER
    );

    CREATE TABLE IF NOT EXISTS currencies(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        symbol TEXT NOT NULL,
        code TEXT NOT NULL,
        rate REAL NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS categories(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS household(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS payment_methods(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS subscriptions(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        name TEXT,
        price REAL,
        currency_id INTEGER,
        next_payment TEXT,
        notes TEXT,
        url TEXT,
        payment_method_id INTEGER,
        payer_user_id INTEGER,
        category_id INTEGER,
        notify_days_before INTEGER,
        inactive INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_subscriptions_user_next_payment
        ON subscriptions(user_id, next_payment);
"#;

// Numeric columns are read back as text so prices keep their exact
// decimal form instead of passing through f64.
const ACTIVE_SUBSCRIPTIONS_SQL: &str = r#"
    SELECT s.id, s.name, CAST(s.price AS TEXT), s.currency_id, c.symbol,
           CAST(c.rate AS TEXT), cat.name, pm.name, h.name, s.notes, s.url,
           CAST(s.next_payment AS TEXT), s.notify_days_before, s.inactive
    FROM subscriptions s
    JOIN currencies c ON s.currency_id = c.id AND s.user_id = c.user_id
    JOIN categories cat ON s.category_id = cat.id AND s.user_id = cat.user_id
    JOIN household h ON s.payer_user_id = h.id AND s.user_id = h.user_id
    JOIN payment_methods pm ON s.payment_method_id = pm.id AND s.user_id = pm.user_id
    WHERE s.user_id = ?1 AND s.inactive = 0
    ORDER BY s.next_payment ASC, s.id ASC
"#;

/// SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SqliteStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the database file and any missing tables.
    pub fn init_schema(&self) -> SubcalResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&self.path)?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %self.path.display(), "Database schema ready");
        Ok(())
    }

    fn connect(&self) -> SubcalResult<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }
}

impl SubscriptionStore for SqliteStore {
    fn find_user_by_api_key(&self, api_key: &str) -> SubcalResult<Option<User>> {
        let conn = self.connect()?;
        let user = conn
            .query_row(
                "SELECT id, main_currency FROM user WHERE api_key = ?1",
                params![api_key],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        main_currency: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    fn active_subscriptions(&self, user_id: i64) -> SubcalResult<Vec<SubscriptionRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(ACTIVE_SUBSCRIPTIONS_SQL)?;
        let records = stmt
            .query_map(params![user_id], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn main_currency(&self, user_id: i64) -> SubcalResult<Option<MainCurrency>> {
        let conn = self.connect()?;
        let currency = conn
            .query_row(
                "SELECT c.id, c.symbol FROM user u
                 JOIN currencies c ON c.id = u.main_currency AND c.user_id = u.id
                 WHERE u.id = ?1",
                params![user_id],
                |row| {
                    Ok(MainCurrency {
                        id: row.get(0)?,
                        symbol: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(currency)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SubscriptionRecord> {
    let id: Option<i64> = row.get(0)?;
    Ok(SubscriptionRecord {
        id,
        name: row.get(1)?,
        price: parse_decimal(id, "price", row.get(2)?),
        currency_id: row.get(3)?,
        currency_symbol: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        currency_rate: parse_decimal(id, "rate", row.get(5)?),
        category_name: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        payment_method_name: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        payer_name: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        notes: row.get(9)?,
        url: row.get(10)?,
        next_payment: row.get(11)?,
        notify_days_before: row.get(12)?,
        inactive: row.get::<_, i64>(13)? != 0,
    })
}

fn parse_decimal(id: Option<i64>, column: &str, raw: Option<String>) -> Option<Decimal> {
    let raw = raw?;
    // SQLite renders large or tiny reals in exponent form
    match Decimal::from_str(&raw).or_else(|_| Decimal::from_scientific(&raw)) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(subscription_id = ?id, column, value = %raw, error = %e, "Unreadable number");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ics::{CalendarMeta, empty_feed, generate_feed};
    use crate::normalize::{FeedEvent, normalize_all};
    use icalendar::parser::{read_calendar, unfold};
    use tempfile::TempDir;

    fn make_test_store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("subcal.db"));
        store.init_schema().unwrap();

        let conn = Connection::open(store.path()).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO user(id, username, api_key, main_currency) VALUES (1, 'alex', 'key-alex', 1);
            INSERT INTO user(id, username, api_key, main_currency) VALUES (2, 'sam', 'key-sam', NULL);
            INSERT INTO currencies(id, user_id, name, symbol, code, rate) VALUES (1, 1, 'US Dollar', '$', 'USD', 1);
            INSERT INTO currencies(id, user_id, name, symbol, code, rate) VALUES (2, 1, 'Euro', '€', 'EUR', 0.5);
            INSERT INTO categories(id, user_id, name) VALUES (1, 1, 'Entertainment');
            INSERT INTO household(id, user_id, name) VALUES (1, 1, 'Alex');
            INSERT INTO payment_methods(id, user_id, name) VALUES (1, 1, 'Visa');

            INSERT INTO subscriptions(id, user_id, name, price, currency_id, next_payment, notes, url,
                                      payment_method_id, payer_user_id, category_id, notify_days_before, inactive)
            VALUES (10, 1, 'Spotify', 9.99, 1, '2025-05-01', NULL, NULL, 1, 1, 1, 3, 0),
                   (11, 1, 'Netflix', 12.5, 2, '2025-04-01', 'Family', 'https://netflix.com', 1, 1, 1, NULL, 0),
                   (12, 1, 'Old gym', 30, 1, '2025-01-01', NULL, NULL, 1, 1, 1, NULL, 1),
                   (13, 2, 'Not mine', 5, 1, '2025-01-01', NULL, NULL, 1, 1, 1, NULL, 0);
            "#,
        )
        .unwrap();

        (dir, store)
    }

    #[test]
    fn test_find_user_by_api_key() {
        let (_dir, store) = make_test_store();

        let user = store.find_user_by_api_key("key-alex").unwrap();
        assert_eq!(
            user,
            Some(User {
                id: 1,
                main_currency: Some(1)
            })
        );
        assert_eq!(store.find_user_by_api_key("nope").unwrap(), None);
    }

    #[test]
    fn test_active_subscriptions_are_ordered_and_filtered() {
        let (_dir, store) = make_test_store();

        let records = store.active_subscriptions(1).unwrap();
        let names: Vec<_> = records.iter().map(|r| r.name.as_deref().unwrap()).collect();
        assert_eq!(names, ["Netflix", "Spotify"]);
        assert!(records.iter().all(|r| !r.inactive));
    }

    #[test]
    fn test_active_subscriptions_join_display_fields() {
        let (_dir, store) = make_test_store();

        let records = store.active_subscriptions(1).unwrap();
        let netflix = &records[0];
        assert_eq!(netflix.id, Some(11));
        assert_eq!(netflix.price, Some(Decimal::new(125, 1)));
        assert_eq!(netflix.currency_symbol, "€");
        assert_eq!(netflix.currency_rate, Some(Decimal::new(5, 1)));
        assert_eq!(netflix.category_name, "Entertainment");
        assert_eq!(netflix.payment_method_name, "Visa");
        assert_eq!(netflix.payer_name, "Alex");
        assert_eq!(netflix.notes.as_deref(), Some("Family"));
        assert_eq!(netflix.url.as_deref(), Some("https://netflix.com"));
        assert_eq!(netflix.next_payment.as_deref(), Some("2025-04-01"));
        assert_eq!(netflix.notify_days_before, None);

        let spotify = &records[1];
        assert_eq!(spotify.price, Some(Decimal::new(999, 2)));
        assert_eq!(spotify.notify_days_before, Some(3));
        assert_eq!(spotify.notes, None);
    }

    #[test]
    fn test_main_currency() {
        let (_dir, store) = make_test_store();

        assert_eq!(
            store.main_currency(1).unwrap(),
            Some(MainCurrency {
                id: 1,
                symbol: "$".to_string()
            })
        );
        assert_eq!(store.main_currency(2).unwrap(), None);
    }

    #[test]
    fn test_missing_database_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("missing.db"));

        assert!(store.active_subscriptions(1).is_err());
        assert!(!store.path().exists());
    }

    fn make_feed_store(subscriptions_sql: &str) -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("data").join("subcal.db"));
        store.init_schema().unwrap();

        let conn = Connection::open(store.path()).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO user(id, username, api_key, main_currency) VALUES (1, 'alex', 'key-alex', 1);
            INSERT INTO currencies(id, user_id, name, symbol, code, rate) VALUES (1, 1, 'US Dollar', '$', 'USD', 1);
            INSERT INTO categories(id, user_id, name) VALUES (1, 1, 'Health, Fitness');
            INSERT INTO household(id, user_id, name) VALUES (1, 1, 'Alex');
            INSERT INTO payment_methods(id, user_id, name) VALUES (1, 1, 'Visa');
            "#,
        )
        .unwrap();
        conn.execute_batch(subscriptions_sql).unwrap();

        (dir, store)
    }

    fn feed_for(store: &SqliteStore, api_key: &str) -> String {
        let user = store.find_user_by_api_key(api_key).unwrap().unwrap();
        let records = store.active_subscriptions(user.id).unwrap();
        let events: Vec<FeedEvent> = normalize_all(&records, None).collect();
        generate_feed(&CalendarMeta::default(), &events)
    }

    fn mask_uids(ics: &str) -> String {
        ics.lines()
            .map(|l| if l.starts_with("UID:") { "UID:<masked>" } else { l })
            .collect::<Vec<_>>()
            .join("\n")
    }

    const TWO_SUBSCRIPTIONS: &str = r#"
        INSERT INTO subscriptions(id, user_id, name, price, currency_id, next_payment, notes, url,
                                  payment_method_id, payer_user_id, category_id, notify_days_before, inactive)
        VALUES (1, 1, 'Gym, Inc; Premium', 9, 1, '2025-06-15', 'Cancel before summer', 'https://gym.example.com',
                1, 1, 1, 5, 0),
               (2, 1, 'Cloud storage', 12.5, 1, '2025-06-01', NULL, NULL, 1, 1, 1, 0, 0);
    "#;

    #[test]
    fn test_feed_from_store_end_to_end() {
        let (_dir, store) = make_feed_store(TWO_SUBSCRIPTIONS);
        let ics = feed_for(&store, "key-alex");
        let unfolded = unfold(&ics);

        assert_eq!(ics.matches("BEGIN:VEVENT").count(), 2);

        // Sorted by next payment: Cloud storage (June 1st) comes first
        let cloud = unfolded.find("SUMMARY:Subcal: Cloud storage").unwrap();
        let gym = unfolded.find("SUMMARY:Subcal: Gym\\, Inc\\; Premium").unwrap();
        assert!(cloud < gym);

        assert!(unfolded.contains(
            "DESCRIPTION:Price: $12.50\\nCategory: Health\\, Fitness\\nPayment Method: Visa\\nPayer: Alex\\nNotes: \r\n"
        ));
        assert!(unfolded.contains(
            "DESCRIPTION:Price: $9.00\\nCategory: Health\\, Fitness\\nPayment Method: Visa\\nPayer: Alex\\nNotes: Cancel before summer\r\n"
        ));
        assert!(unfolded.contains("DTSTART;VALUE=DATE:20250601\r\n"));
        assert!(unfolded.contains("DTEND;VALUE=DATE:20250601\r\n"));
        assert!(unfolded.contains("LOCATION:https://gym.example.com\r\n"));

        let triggers: Vec<&str> = unfolded
            .lines()
            .filter_map(|l| l.strip_prefix("TRIGGER:"))
            .collect();
        assert_eq!(triggers, ["-P1D", "-P5D"]);
    }

    #[test]
    fn test_feed_from_store_parses() {
        let (_dir, store) = make_feed_store(
            r#"
            INSERT INTO subscriptions(id, user_id, name, price, currency_id, next_payment, notes, url,
                                      payment_method_id, payer_user_id, category_id, notify_days_before, inactive)
            VALUES (1, 1, 'Gym, Inc; Premium', 9, 1, '2025-06-15', 'Line one
line two', 'https://gym.example.com', 1, 1, 1, 5, 0),
                   (2, 1, 'Cloud storage', 12.5, 1, '2025-06-01', 'Annual plan', 'https://cloud.example.com',
                    1, 1, 1, NULL, 0);
            "#,
        );
        let ics = feed_for(&store, "key-alex");

        let unfolded = unfold(&ics);
        let calendar = read_calendar(&unfolded).expect("generated feed should parse");
        let vevents = calendar
            .components
            .iter()
            .filter(|c| c.name == "VEVENT")
            .count();
        assert_eq!(vevents, 2);
    }

    #[test]
    fn test_feed_from_store_is_stable_apart_from_uids() {
        let (_dir, store) = make_feed_store(TWO_SUBSCRIPTIONS);

        let first = feed_for(&store, "key-alex");
        let second = feed_for(&store, "key-alex");

        assert_ne!(first, second);
        assert_eq!(mask_uids(&first), mask_uids(&second));
    }

    #[test]
    fn test_feed_from_store_skips_damaged_rows() {
        let (_dir, store) = make_feed_store(
            r#"
            INSERT INTO subscriptions(id, user_id, name, price, currency_id, next_payment,
                                      payment_method_id, payer_user_id, category_id, inactive)
            VALUES (1, 1, 'Fine', 5, 1, '2025-06-01', 1, 1, 1, 0),
                   (2, 1, NULL, 5, 1, '2025-06-02', 1, 1, 1, 0),
                   (3, 1, 'No price', NULL, 1, '2025-06-03', 1, 1, 1, 0),
                   (4, 1, 'Bad date', 5, 1, 'someday', 1, 1, 1, 0),
                   (5, 1, 'No date', 5, 1, NULL, 1, 1, 1, 0);
            "#,
        );

        let ics = feed_for(&store, "key-alex");
        assert_eq!(ics.matches("BEGIN:VEVENT").count(), 1);
        assert!(ics.contains("SUMMARY:Subcal: Fine\r\n"));
    }

    #[test]
    fn test_feed_for_user_without_subscriptions_is_empty() {
        let (_dir, store) = make_feed_store("");
        let ics = feed_for(&store, "key-alex");

        assert_eq!(ics, empty_feed(&CalendarMeta::default()));
    }
}
