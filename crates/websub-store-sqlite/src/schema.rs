//! SQL schema for the SQLite subscription store.
//!
//! Executed once at connection startup; idempotent thanks to
//! `CREATE … IF NOT EXISTS`.

/// Full schema DDL.
///
/// `subscriptions` is the only mutable state. `UNIQUE (topic_url, hub_url)
/// ON CONFLICT REPLACE` implements the replace-on-conflict policy: a new
/// callback for an already-claimed pair erases the previous row. The two
/// views derive activity from the wall clock — strictly `now <
/// lease_expiration` for active, the complement (including NULL leases and
/// never-subscribed offers) for inactive.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS offered_subscriptions (
    topic_url TEXT NOT NULL,
    hub_url   TEXT NOT NULL,

    PRIMARY KEY (topic_url, hub_url)
);

CREATE TABLE IF NOT EXISTS subscriptions (
    topic_url        TEXT NOT NULL,
    hub_url          TEXT NOT NULL,
    callback_url     TEXT NOT NULL,
    lease_initiated  TEXT DEFAULT NULL,   -- RFC 3339 UTC; stamped on first extend
    lease_expiration TEXT DEFAULT NULL,
    inactive_reason  TEXT DEFAULT NULL,

    CHECK (
        lease_expiration IS NULL
        OR datetime(lease_expiration) > datetime(lease_initiated)
    ),
    UNIQUE (topic_url, hub_url) ON CONFLICT REPLACE,
    FOREIGN KEY (topic_url, hub_url) REFERENCES offered_subscriptions (topic_url, hub_url),
    PRIMARY KEY (callback_url)
);

CREATE VIEW IF NOT EXISTS active_subscriptions (
    topic_url, hub_url, callback_url, lease_initiated, lease_expiration, inactive_reason
) AS
SELECT topic_url, hub_url, callback_url, lease_initiated, lease_expiration, inactive_reason
FROM subscriptions
WHERE (
    lease_expiration IS NOT NULL
    AND datetime('now') < datetime(lease_expiration))
ORDER BY topic_url, hub_url;

CREATE VIEW IF NOT EXISTS inactive_subscriptions (
    topic_url, hub_url, callback_url, inactive_reason
) AS
SELECT topic_url, hub_url, callback_url, inactive_reason
FROM offered_subscriptions
LEFT OUTER JOIN subscriptions
USING (topic_url, hub_url)
WHERE (
    lease_expiration IS NULL
    OR datetime(lease_expiration) <= datetime('now'))
ORDER BY topic_url, hub_url;
";
