//! Table definitions. Timestamps are Unix milliseconds; calendar dates are
//! `YYYY-MM-DD` text; string lists are comma-separated.

pub(crate) const DOMAINS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS domains (
    name TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'New',
    confidence TEXT NOT NULL DEFAULT 'Candidate',
    ownership TEXT NOT NULL DEFAULT 'Unknown',
    registrar TEXT,
    registrar_iana_id INTEGER,
    registrant_org TEXT,
    nameservers TEXT NOT NULL DEFAULT '',
    mail_servers TEXT NOT NULL DEFAULT '',
    whois_servers TEXT NOT NULL DEFAULT '',
    soa_nameservers TEXT NOT NULL DEFAULT '',
    soa_email TEXT,
    domain_statuses TEXT NOT NULL DEFAULT '',
    date_expiry TEXT,
    date_first_registered TEXT,
    last_scanned_at INTEGER,
    unreachable_passes INTEGER NOT NULL DEFAULT 0,
    notes TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_domains_last_scanned ON domains(last_scanned_at);
CREATE INDEX IF NOT EXISTS idx_domains_status ON domains(status);
";

pub(crate) const CERTIFICATES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS certificates (
    hash_sha1 TEXT PRIMARY KEY,
    hash_sha256 TEXT,
    subject_dn TEXT NOT NULL,
    subject_cn TEXT,
    subject_org TEXT,
    san TEXT NOT NULL DEFAULT '[]',
    issuer_dn TEXT NOT NULL,
    issuer_cn TEXT,
    issuer_org TEXT,
    date_issued INTEGER,
    date_expiration INTEGER NOT NULL,
    signing_algorithm TEXT,
    key_type TEXT,
    key_bitlength INTEGER,
    is_wildcard INTEGER NOT NULL DEFAULT 0,
    is_self_signed INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_certificates_expiration ON certificates(date_expiration);
";

pub(crate) const FQDNS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS fqdns (
    name TEXT PRIMARY KEY,
    domain TEXT REFERENCES domains(name) ON DELETE SET NULL,
    status TEXT NOT NULL DEFAULT 'New',
    ops_status TEXT NOT NULL DEFAULT '0-Unknown-Test',
    website_status TEXT NOT NULL DEFAULT '0-Unknown-Test',
    redirect_health TEXT NOT NULL DEFAULT 'Unknown',
    confidence TEXT NOT NULL DEFAULT 'Candidate',
    hosting_arch TEXT NOT NULL DEFAULT 'NA',
    hosting_env TEXT NOT NULL DEFAULT 'NA',
    public_ip TEXT,
    a_record_ips TEXT NOT NULL DEFAULT '',
    cnames TEXT NOT NULL DEFAULT '',
    certificate_hash TEXT REFERENCES certificates(hash_sha1) ON DELETE RESTRICT,
    tls_version TEXT,
    response_code INTEGER,
    redirect_url TEXT,
    is_insecure INTEGER NOT NULL DEFAULT 0,
    is_risky INTEGER NOT NULL DEFAULT 0,
    is_compliance_required INTEGER NOT NULL DEFAULT 0,
    unreachable_passes INTEGER NOT NULL DEFAULT 0,
    last_recon_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_fqdns_domain ON fqdns(domain);
CREATE INDEX IF NOT EXISTS idx_fqdns_certificate ON fqdns(certificate_hash);
CREATE INDEX IF NOT EXISTS idx_fqdns_last_recon ON fqdns(last_recon_at);

CREATE TABLE IF NOT EXISTS fqdn_software (
    fqdn TEXT NOT NULL REFERENCES fqdns(name) ON DELETE CASCADE,
    software TEXT NOT NULL,
    PRIMARY KEY (fqdn, software)
);
";

pub(crate) const HISTORY_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS reconcile_runs (
    run_id TEXT PRIMARY KEY,
    started_at INTEGER NOT NULL,
    finished_at INTEGER NOT NULL,
    since INTEGER,
    candidates INTEGER NOT NULL,
    succeeded INTEGER NOT NULL,
    failed INTEGER NOT NULL,
    skipped INTEGER NOT NULL,
    cancelled INTEGER NOT NULL DEFAULT 0,
    report_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reconcile_runs_started ON reconcile_runs(started_at);

CREATE TABLE IF NOT EXISTS reclaimed_certificates (
    hash_sha1 TEXT NOT NULL,
    subject_cn TEXT,
    date_expiration INTEGER NOT NULL,
    cutoff INTEGER NOT NULL,
    reclaimed_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reclaimed_at ON reclaimed_certificates(reclaimed_at);
";
