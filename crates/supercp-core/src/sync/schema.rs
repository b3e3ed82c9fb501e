// Column sets follow the stock PowerDNS gsqlite3, Postfix/Dovecot virtual
// mailbox and Pure-FTPd SQL layouts.
pub(super) const PROTOCOL_TABLES: &str = "
CREATE TABLE IF NOT EXISTS domains (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    master TEXT DEFAULT NULL,
    last_check INTEGER DEFAULT NULL,
    type TEXT NOT NULL,
    notified_serial INTEGER DEFAULT NULL,
    account TEXT DEFAULT NULL
);

CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain_id INTEGER DEFAULT NULL,
    name TEXT DEFAULT NULL,
    type TEXT DEFAULT NULL,
    content TEXT DEFAULT NULL,
    ttl INTEGER DEFAULT NULL,
    prio INTEGER DEFAULT NULL,
    disabled INTEGER DEFAULT 0,
    ordername TEXT,
    auth INTEGER DEFAULT 1
);

CREATE INDEX IF NOT EXISTS records_domain_id ON records(domain_id);
CREATE INDEX IF NOT EXISTS records_name_type ON records(name, type);

CREATE TABLE IF NOT EXISTS virtual_domains (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS virtual_users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain_id INTEGER NOT NULL,
    password TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS ftp_users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user TEXT NOT NULL UNIQUE,
    password TEXT NOT NULL,
    uid INTEGER NOT NULL,
    gid INTEGER NOT NULL,
    dir TEXT NOT NULL,
    quota_files INTEGER NOT NULL DEFAULT 0,
    quota_size INTEGER NOT NULL DEFAULT 0,
    ul_bandwidth INTEGER NOT NULL DEFAULT 0,
    dl_bandwidth INTEGER NOT NULL DEFAULT 0,
    ip_access TEXT NOT NULL DEFAULT '*',
    active INTEGER NOT NULL DEFAULT 1
);
";
