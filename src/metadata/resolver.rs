//! Device-IP to link/site metadata resolution
//!
//! The resolver owns the only cross-round shared state in the service: an
//! in-memory map from device IP to `LinkMetadata`. Each round it looks up
//! a whole batch of IPs with at most one relational query (an `IN` list
//! over the identifiers not yet cached), so the query count stays bounded
//! regardless of how many readings an hour produced.
//!
//! Cache entries are never invalidated. Link and site rows are reference
//! data that changes on the timescale of network builds, and the accepted
//! trade-off is that a site reassignment is picked up on the next service
//! restart, not mid-run.

use super::{LinkMetadata, Side};
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Per-batch resolution counters, logged once per round.
#[derive(Debug, Default, Clone)]
pub struct ResolutionStats {
    pub rows_in: usize,
    pub unique_devices: usize,
    pub cache_hits: usize,
    pub fetched: usize,
    pub unresolved: usize,
    pub elapsed_ms: u128,
}

pub struct MetadataResolver {
    conn: Arc<Mutex<Connection>>,
    cache: HashMap<String, LinkMetadata>,
    queries_issued: u64,
}

impl MetadataResolver {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            cache: HashMap::new(),
            queries_issued: 0,
        }
    }

    /// Open the metadata store at `db_path`.
    pub fn open(db_path: &str) -> Result<Self, rusqlite::Error> {
        Ok(Self::new(Connection::open(db_path)?))
    }

    /// Number of relational queries issued since startup.
    pub fn queries_issued(&self) -> u64 {
        self.queries_issued
    }

    /// Resolve a batch of device identifiers.
    ///
    /// Returns one entry per input identifier, in input order: the link
    /// metadata, or `None` when the identifier is empty or unknown. The
    /// caller drops unresolved rows; they are never defaulted.
    ///
    /// A failed metadata query degrades to "everything not already cached
    /// is unresolved" for this batch: logged, not fatal.
    pub fn resolve(&mut self, devices: &[String]) -> (Vec<Option<LinkMetadata>>, ResolutionStats) {
        let t0 = Instant::now();

        let trimmed: Vec<&str> = devices.iter().map(|d| d.trim()).collect();

        let mut unique: Vec<&str> = trimmed.iter().copied().filter(|ip| !ip.is_empty()).collect();
        unique.sort_unstable();
        unique.dedup();

        log::debug!(
            "resolve: {} rows, {} unique devices",
            devices.len(),
            unique.len()
        );

        let cache_hits = unique.iter().filter(|ip| self.cache.contains_key(**ip)).count();
        let missing: Vec<&str> = unique
            .iter()
            .copied()
            .filter(|ip| !self.cache.contains_key(*ip))
            .collect();

        let mut fetched = 0usize;
        if !missing.is_empty() {
            match self.fetch_missing(&missing) {
                Ok(records) => {
                    fetched = records.len();
                    for rec in records {
                        self.cache.insert(rec.ip.clone(), rec);
                    }
                }
                Err(e) => {
                    // Degrade: this round's missing IPs stay unresolved,
                    // anything already cached keeps working.
                    log::error!("Error during bulk metadata fetch: {}", e);
                }
            }
        }

        let mut resolved = Vec::with_capacity(devices.len());
        let mut unresolved = 0usize;
        let mut unresolved_sample: Vec<String> = Vec::new();

        for ip in &trimmed {
            if ip.is_empty() {
                log::warn!("No link metadata for device: <empty>");
                unresolved += 1;
                resolved.push(None);
                continue;
            }
            match self.cache.get(*ip) {
                Some(meta) => resolved.push(Some(meta.clone())),
                None => {
                    unresolved += 1;
                    if unresolved_sample.len() < 5 {
                        unresolved_sample.push((*ip).to_string());
                    }
                    resolved.push(None);
                }
            }
        }

        if unresolved > 0 {
            log::warn!(
                "{} readings without link metadata (sample: {:?})",
                unresolved,
                unresolved_sample
            );
        }

        let stats = ResolutionStats {
            rows_in: devices.len(),
            unique_devices: unique.len(),
            cache_hits,
            fetched,
            unresolved,
            elapsed_ms: t0.elapsed().as_millis(),
        };

        log::info!(
            "Resolved metadata for {} devices",
            devices.len() - unresolved
        );
        log::debug!(
            "resolve: cache_hit={}, fetched={}, elapsed={}ms",
            stats.cache_hits,
            stats.fetched,
            stats.elapsed_ms
        );

        (resolved, stats)
    }

    /// One batched lookup for every not-yet-cached IP.
    ///
    /// The links table stores both ends in one row; the per-side UNION
    /// flattens it so each device IP resolves to its own (side, site,
    /// azimuth) triple before joining site coordinates.
    fn fetch_missing(&mut self, missing: &[&str]) -> Result<Vec<LinkMetadata>, rusqlite::Error> {
        let placeholders = vec!["?"; missing.len()].join(",");
        let sql = format!(
            "SELECT
                 l.id           AS link_id,
                 l.technology   AS technology,
                 x.ip           AS ip,
                 x.side         AS side,
                 x.site_id      AS site_id,
                 x.azimuth      AS azimuth,
                 s.x_coordinate AS lon,
                 s.y_coordinate AS lat
             FROM links l
             JOIN (
                 SELECT id, ip_address_a AS ip, 'A' AS side, site_a AS site_id, azimuth_a AS azimuth FROM links
                 UNION ALL
                 SELECT id, ip_address_b AS ip, 'B' AS side, site_b AS site_id, azimuth_b AS azimuth FROM links
             ) x ON x.id = l.id
             JOIN sites s ON s.id = x.site_id
             WHERE x.ip IN ({})",
            placeholders
        );

        self.queries_issued += 1;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;

        let rows = stmt.query_map(rusqlite::params_from_iter(missing.iter().copied()), |row| {
            Ok((
                row.get::<_, i64>("link_id")?,
                row.get::<_, i64>("technology")?,
                row.get::<_, String>("ip")?,
                row.get::<_, String>("side")?,
                row.get::<_, i64>("site_id")?,
                row.get::<_, f64>("azimuth")?,
                row.get::<_, f64>("lon")?,
                row.get::<_, f64>("lat")?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (link_id, technology, ip, side_raw, site_id, azimuth, lon, lat) = row?;
            match Side::from_str(&side_raw) {
                Some(side) => records.push(LinkMetadata {
                    link_id,
                    technology,
                    ip,
                    side,
                    site_id,
                    azimuth,
                    longitude: lon,
                    latitude: lat,
                }),
                None => log::warn!("Skipping metadata row with unknown side {:?}", side_raw),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory metadata store with two links (four device IPs).
    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE links (
                id            INTEGER PRIMARY KEY,
                technology    INTEGER NOT NULL,
                ip_address_a  TEXT NOT NULL,
                ip_address_b  TEXT NOT NULL,
                site_a        INTEGER NOT NULL,
                site_b        INTEGER NOT NULL,
                azimuth_a     REAL NOT NULL,
                azimuth_b     REAL NOT NULL
            );
            CREATE TABLE sites (
                id            INTEGER PRIMARY KEY,
                x_coordinate  REAL NOT NULL,
                y_coordinate  REAL NOT NULL
            );
            INSERT INTO sites VALUES (1, 14.42, 50.08), (2, 14.50, 50.10),
                                     (3, 16.60, 49.19), (4, 16.70, 49.25);
            INSERT INTO links VALUES (100, 7, '10.0.0.5', '10.0.0.6', 1, 2, 93.5, 273.5);
            INSERT INTO links VALUES (200, 3, '10.0.1.1', '10.0.1.2', 3, 4, 45.0, 225.0);
            "#,
        )
        .unwrap();
        conn
    }

    fn ips(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolves_both_sides() {
        let mut resolver = MetadataResolver::new(create_test_db());

        let (resolved, stats) = resolver.resolve(&ips(&["10.0.0.5", "10.0.0.6"]));

        let a = resolved[0].as_ref().unwrap();
        assert_eq!(a.link_id, 100);
        assert_eq!(a.side, Side::A);
        assert_eq!(a.site_id, 1);
        assert_eq!(a.azimuth, 93.5);
        assert_eq!(a.longitude, 14.42);
        assert_eq!(a.latitude, 50.08);

        let b = resolved[1].as_ref().unwrap();
        assert_eq!(b.link_id, 100);
        assert_eq!(b.side, Side::B);
        assert_eq!(b.site_id, 2);

        assert_eq!(stats.unresolved, 0);
        assert_eq!(stats.fetched, 2);
    }

    #[test]
    fn test_one_query_per_batch_with_new_ids() {
        let mut resolver = MetadataResolver::new(create_test_db());

        // First batch: one query for the two missing IPs.
        resolver.resolve(&ips(&["10.0.0.5", "10.0.0.5", "10.0.0.6"]));
        assert_eq!(resolver.queries_issued(), 1);

        // Same IPs again: fully cached, no query.
        let (_, stats) = resolver.resolve(&ips(&["10.0.0.6", "10.0.0.5"]));
        assert_eq!(resolver.queries_issued(), 1);
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.fetched, 0);

        // Mixed batch: exactly one more query, only for the new IP.
        let (_, stats) = resolver.resolve(&ips(&["10.0.0.5", "10.0.1.1"]));
        assert_eq!(resolver.queries_issued(), 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.fetched, 1);
    }

    #[test]
    fn test_unknown_and_empty_devices_unresolved() {
        let mut resolver = MetadataResolver::new(create_test_db());

        let (resolved, stats) = resolver.resolve(&ips(&["", "  ", "192.168.9.9", "10.0.0.5"]));

        assert!(resolved[0].is_none());
        assert!(resolved[1].is_none());
        assert!(resolved[2].is_none());
        assert!(resolved[3].is_some());
        assert_eq!(stats.unresolved, 3);
        // Empty identifiers never reach the store.
        assert_eq!(stats.unique_devices, 2);
    }

    #[test]
    fn test_whitespace_normalized() {
        let mut resolver = MetadataResolver::new(create_test_db());

        let (resolved, _) = resolver.resolve(&ips(&[" 10.0.0.5 "]));
        assert_eq!(resolved[0].as_ref().unwrap().ip, "10.0.0.5");

        // The trimmed form is what got cached.
        let (_, stats) = resolver.resolve(&ips(&["10.0.0.5"]));
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(resolver.queries_issued(), 1);
    }

    #[test]
    fn test_query_failure_degrades_to_unresolved() {
        let conn = Connection::open_in_memory().unwrap();
        // No schema at all: the batched fetch fails.
        let mut resolver = MetadataResolver::new(conn);

        let (resolved, stats) = resolver.resolve(&ips(&["10.0.0.5"]));
        assert!(resolved[0].is_none());
        assert_eq!(stats.unresolved, 1);
        assert_eq!(stats.fetched, 0);
    }

    #[test]
    fn test_duplicates_resolved_in_input_order() {
        let mut resolver = MetadataResolver::new(create_test_db());

        let batch = ips(&["10.0.0.6", "10.0.0.5", "10.0.0.6"]);
        let (resolved, stats) = resolver.resolve(&batch);

        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[0].as_ref().unwrap().side, Side::B);
        assert_eq!(resolved[1].as_ref().unwrap().side, Side::A);
        assert_eq!(resolved[2].as_ref().unwrap().side, Side::B);
        assert_eq!(stats.unique_devices, 2);
    }
}
