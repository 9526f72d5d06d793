//! SQL schema for the Tend SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! schema revision for future migrations.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS care_groups (
    group_id    TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    kind        TEXT NOT NULL,   -- 'personal' | 'standard' | 'institutional'
    owner_id    TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    settings    TEXT NOT NULL DEFAULT '{}',
    disabled_at TEXT             -- soft disable; groups are never deleted
);

CREATE TABLE IF NOT EXISTS dependents (
    dependent_id TEXT PRIMARY KEY,
    group_id     TEXT NOT NULL REFERENCES care_groups(group_id),
    profile      TEXT NOT NULL,  -- JSON DependentProfile
    created_at   TEXT NOT NULL,
    created_by   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS grants (
    group_id       TEXT NOT NULL REFERENCES care_groups(group_id),
    dependent_id   TEXT NOT NULL REFERENCES dependents(dependent_id),
    access_level   TEXT NOT NULL,
    relevant_scope TEXT,         -- JSON RelevantScope or NULL
    granted_by     TEXT NOT NULL,
    granted_at     TEXT NOT NULL,
    PRIMARY KEY (group_id, dependent_id)
);

CREATE TABLE IF NOT EXISTS memberships (
    membership_id     TEXT PRIMARY KEY,
    user_id           TEXT NOT NULL,
    group_id          TEXT NOT NULL REFERENCES care_groups(group_id),
    role              TEXT NOT NULL,
    status            TEXT NOT NULL,
    access_expires_at TEXT,
    invited_by        TEXT,
    joined_at         TEXT NOT NULL,
    updated_at        TEXT NOT NULL,
    UNIQUE (user_id, group_id)
);

CREATE TABLE IF NOT EXISTS invitations (
    invitation_id TEXT PRIMARY KEY,
    token_hash    TEXT NOT NULL UNIQUE,
    group_id      TEXT NOT NULL REFERENCES care_groups(group_id),
    email         TEXT NOT NULL,
    role          TEXT NOT NULL,
    invited_by    TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    expires_at    TEXT NOT NULL,
    status        TEXT NOT NULL,
    restrictions  TEXT NOT NULL DEFAULT '{}',
    accepted_by   TEXT,
    accepted_at   TEXT
);

-- Events are append-only apart from the conflict column, which only the
-- conflict resolver writes. `seq` is the insertion order.
CREATE TABLE IF NOT EXISTS activities (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    activity_id  TEXT NOT NULL UNIQUE,
    dependent_id TEXT NOT NULL REFERENCES dependents(dependent_id),
    group_id     TEXT NOT NULL REFERENCES care_groups(group_id),
    kind         TEXT NOT NULL,
    logged_at    TEXT NOT NULL,
    logged_by    TEXT NOT NULL,
    details      TEXT NOT NULL DEFAULT 'null',
    conflict     TEXT,           -- JSON ConflictMeta or NULL
    recorded_at  TEXT NOT NULL
);

-- Soft deletes and absorptions. Exactly one of removed_by / absorbed_into
-- is set.
CREATE TABLE IF NOT EXISTS activity_removals (
    removal_id    TEXT PRIMARY KEY,
    activity_id   TEXT NOT NULL REFERENCES activities(activity_id),
    removed_by    TEXT,
    reason        TEXT,
    absorbed_into TEXT REFERENCES activities(activity_id),
    recorded_at   TEXT NOT NULL,
    UNIQUE (activity_id),
    CHECK  ((removed_by IS NULL) != (absorbed_into IS NULL))
);

CREATE TABLE IF NOT EXISTS activity_annotations (
    annotation_id TEXT PRIMARY KEY,
    activity_id   TEXT NOT NULL REFERENCES activities(activity_id),
    author_id     TEXT NOT NULL,
    note          TEXT NOT NULL,
    recorded_at   TEXT NOT NULL
);

-- Append-only; rows leave only through retention pruning.
CREATE TABLE IF NOT EXISTS audit_log (
    entry_id    TEXT PRIMARY KEY,
    group_id    TEXT NOT NULL,
    actor_id    TEXT NOT NULL,
    action      TEXT NOT NULL,
    subject_id  TEXT,
    details     TEXT NOT NULL DEFAULT 'null',
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS memberships_group_idx    ON memberships(group_id);
CREATE INDEX IF NOT EXISTS grants_dependent_idx     ON grants(dependent_id);
CREATE INDEX IF NOT EXISTS invitations_group_idx    ON invitations(group_id);
CREATE INDEX IF NOT EXISTS activities_dependent_idx ON activities(dependent_id, logged_at);
CREATE INDEX IF NOT EXISTS annotations_activity_idx ON activity_annotations(activity_id);
CREATE INDEX IF NOT EXISTS audit_group_idx          ON audit_log(group_id, recorded_at);

PRAGMA user_version = 1;
";
