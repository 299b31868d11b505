//! RocksDB store
//!
//! # Column Families
//!
//! - `invoice_record` - Records (key: record_id)
//! - `series_index` - Series membership (key: series || record_id)
//! - `series_meta` - Tip, length, block and last verification (key: series)
//! - `pending_index` - Pending records (key: tenant || record_id)
//! - `remision_batch` - Batches (key: batch_id)
//! - `audit_event` - Audit log (key: tenant || created_at || event_id)
//! - `meta` - ID counters
//!
//! Reads go straight to the database. Every read-modify-write runs under one
//! writer mutex and commits as a single `WriteBatch`.

use super::{apply_submission, check_batch_member, check_batch_swap};
use super::{AuditStore, BatchStore, RecordStore};
use crate::error::{Error, Result};
use crate::types::{
    AuditCursor, AuditEvent, AuditFilter, BatchStatus, InvoiceRecord, NewAuditEvent, NewBatch,
    RecordDraft, RemisionBatch, SeriesBlock, SeriesId, SubmissionStatus, SubmissionUpdate,
    TenantId, VerificationSummary,
};
use crate::Config;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Column family names
const CF_RECORDS: &str = "invoice_record";
const CF_SERIES_INDEX: &str = "series_index";
const CF_SERIES_META: &str = "series_meta";
const CF_PENDING: &str = "pending_index";
const CF_BATCHES: &str = "remision_batch";
const CF_AUDIT: &str = "audit_event";
const CF_META: &str = "meta";

const KEY_LAST_RECORD_ID: &[u8] = b"last_record_id";
const KEY_LAST_BATCH_ID: &[u8] = b"last_batch_id";
const KEY_LAST_AUDIT_ID: &[u8] = b"last_audit_id";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SeriesMeta {
    tip_id: Option<u64>,
    count: u64,
    block: Option<SeriesBlock>,
    last_verification: Option<VerificationSummary>,
}

#[derive(Debug, Default)]
struct Counters {
    last_record_id: u64,
    last_batch_id: u64,
    last_audit_id: u64,
}

/// RocksDB implementation of all three stores
pub struct RocksStore {
    db: Arc<DB>,
    writer: Mutex<Counters>,
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_RECORDS, Self::cf_options_zstd()),
            ColumnFamilyDescriptor::new(CF_SERIES_INDEX, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_SERIES_META, Self::cf_options_lz4()),
            ColumnFamilyDescriptor::new(CF_PENDING, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_BATCHES, Self::cf_options_lz4()),
            ColumnFamilyDescriptor::new(CF_AUDIT, Self::cf_options_zstd()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        let store = Self {
            db: Arc::new(db),
            writer: Mutex::new(Counters::default()),
        };

        let counters = Counters {
            last_record_id: store.read_counter(KEY_LAST_RECORD_ID)?,
            last_batch_id: store.read_counter(KEY_LAST_BATCH_ID)?,
            last_audit_id: store.read_counter(KEY_LAST_AUDIT_ID)?,
        };
        tracing::info!(
            path = ?path,
            last_record_id = counters.last_record_id,
            last_batch_id = counters.last_batch_id,
            "Opened RocksDB store"
        );
        *store.writer.lock() = counters;

        Ok(store)
    }

    // Column family options

    fn cf_options_zstd() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_lz4() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn read_counter(&self, key: &[u8]) -> Result<u64> {
        let cf = self.cf(CF_META)?;
        match self.db.get_cf(&cf, key)? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    fn load_meta(&self, series: &SeriesId) -> Result<SeriesMeta> {
        let cf = self.cf(CF_SERIES_META)?;
        match self.db.get_cf(&cf, series_key(series))? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(SeriesMeta::default()),
        }
    }

    fn put_meta(&self, series: &SeriesId, meta: &SeriesMeta) -> Result<()> {
        let cf = self.cf(CF_SERIES_META)?;
        self.db
            .put_cf(&cf, series_key(series), bincode::serialize(meta)?)?;
        Ok(())
    }

    fn load_batch(&self, id: u64) -> Result<Option<RemisionBatch>> {
        let cf = self.cf(CF_BATCHES)?;
        match self.db.get_cf(&cf, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Overwrite a stored record, bypassing every ledger check.
    ///
    /// Simulates out-of-band tampering of the backing table.
    #[doc(hidden)]
    pub fn tamper_record(&self, record: &InvoiceRecord) -> Result<()> {
        let cf = self.cf(CF_RECORDS)?;
        self.db
            .put_cf(&cf, record.id.to_be_bytes(), bincode::serialize(record)?)?;
        Ok(())
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

impl RecordStore for RocksStore {
    fn append_record(&self, draft: RecordDraft, expected_tip: Option<u64>) -> Result<InvoiceRecord> {
        let mut counters = self.writer.lock();

        let mut meta = self.load_meta(&draft.series)?;
        if meta.tip_id != expected_tip {
            return Err(Error::ConcurrencyConflict {
                series: draft.series,
                expected_tip,
                actual_tip: meta.tip_id,
            });
        }

        let id = counters.last_record_id + 1;
        let series = draft.series.clone();
        let record = draft.into_record(id);
        meta.tip_id = Some(id);
        meta.count += 1;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &self.cf(CF_RECORDS)?,
            id.to_be_bytes(),
            bincode::serialize(&record)?,
        );
        batch.put_cf(&self.cf(CF_SERIES_INDEX)?, series_member_key(&series, id), b"");
        batch.put_cf(
            &self.cf(CF_SERIES_META)?,
            series_key(&series),
            bincode::serialize(&meta)?,
        );
        batch.put_cf(
            &self.cf(CF_PENDING)?,
            tenant_member_key(&record.tenant_id, id),
            b"",
        );
        batch.put_cf(&self.cf(CF_META)?, KEY_LAST_RECORD_ID, id.to_be_bytes());
        self.db.write(batch)?;

        counters.last_record_id = id;

        tracing::debug!(record_id = id, series = %series, "Record persisted");

        Ok(record)
    }

    fn get_record(&self, id: u64) -> Result<Option<InvoiceRecord>> {
        let cf = self.cf(CF_RECORDS)?;
        match self.db.get_cf(&cf, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn tip(&self, series: &SeriesId) -> Result<Option<InvoiceRecord>> {
        match self.load_meta(series)?.tip_id {
            Some(id) => self.get_record(id),
            None => Ok(None),
        }
    }

    fn scan_series(
        &self,
        series: &SeriesId,
        after_id: Option<u64>,
        upto_id: u64,
        limit: usize,
    ) -> Result<Vec<InvoiceRecord>> {
        let cf = self.cf(CF_SERIES_INDEX)?;
        let prefix = series_key(series);
        let start = series_member_key(series, after_id.map_or(0, |id| id.saturating_add(1)));

        let mut records = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward));
        for item in iter {
            if records.len() >= limit {
                break;
            }
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let id = decode_u64(&key[prefix.len()..])?;
            if id > upto_id {
                break;
            }
            let record = self.get_record(id)?.ok_or(Error::RecordNotFound(id))?;
            records.push(record);
        }

        Ok(records)
    }

    fn series_len(&self, series: &SeriesId) -> Result<u64> {
        Ok(self.load_meta(series)?.count)
    }

    fn update_submission(&self, id: u64, update: SubmissionUpdate) -> Result<InvoiceRecord> {
        let _guard = self.writer.lock();

        let mut record = self.get_record(id)?.ok_or(Error::RecordNotFound(id))?;
        let was_pending = record.submission_status == SubmissionStatus::Pending;
        apply_submission(&mut record, update)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &self.cf(CF_RECORDS)?,
            id.to_be_bytes(),
            bincode::serialize(&record)?,
        );
        if was_pending {
            batch.delete_cf(
                &self.cf(CF_PENDING)?,
                tenant_member_key(&record.tenant_id, id),
            );
        }
        self.db.write(batch)?;

        Ok(record)
    }

    fn unbatched_pending(&self, tenant: &TenantId, limit: usize) -> Result<Vec<InvoiceRecord>> {
        let cf = self.cf(CF_PENDING)?;
        let prefix = tenant_key(tenant);

        let mut records = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            if records.len() >= limit {
                break;
            }
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let id = decode_u64(&key[prefix.len()..])?;
            let record = self.get_record(id)?.ok_or(Error::RecordNotFound(id))?;
            if record.remision_batch_id.is_none() {
                records.push(record);
            }
        }

        Ok(records)
    }

    fn tenants_with_unbatched(&self) -> Result<Vec<TenantId>> {
        let cf = self.cf(CF_PENDING)?;
        let mut tenants = BTreeSet::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            let (tenant, rest) = split_tenant(&key)?;
            if tenants.contains(&tenant) {
                continue;
            }
            let id = decode_u64(rest)?;
            if let Some(record) = self.get_record(id)? {
                if record.remision_batch_id.is_none() {
                    tenants.insert(tenant);
                }
            }
        }

        Ok(tenants.into_iter().collect())
    }

    fn pending_count(&self, tenant: &TenantId) -> Result<u64> {
        let cf = self.cf(CF_PENDING)?;
        let prefix = tenant_key(tenant);

        let mut count = 0;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    fn series_block(&self, series: &SeriesId) -> Result<Option<SeriesBlock>> {
        Ok(self.load_meta(series)?.block)
    }

    fn set_series_block(&self, series: &SeriesId, block: Option<SeriesBlock>) -> Result<()> {
        let _guard = self.writer.lock();
        let mut meta = self.load_meta(series)?;
        meta.block = block;
        self.put_meta(series, &meta)
    }

    fn record_verification(&self, series: &SeriesId, summary: VerificationSummary) -> Result<()> {
        let _guard = self.writer.lock();
        let mut meta = self.load_meta(series)?;
        meta.last_verification = Some(summary);
        self.put_meta(series, &meta)
    }

    fn last_verification(&self, series: &SeriesId) -> Result<Option<VerificationSummary>> {
        Ok(self.load_meta(series)?.last_verification)
    }
}

impl BatchStore for RocksStore {
    fn create_batch(&self, new: NewBatch) -> Result<RemisionBatch> {
        let mut counters = self.writer.lock();

        if new.record_ids.is_empty() {
            return Err(Error::Validation("Batch must contain records".to_string()));
        }
        let mut members = Vec::with_capacity(new.record_ids.len());
        for id in &new.record_ids {
            let record = self.get_record(*id)?;
            check_batch_member(record.as_ref(), *id, &new.tenant_id)?;
            if let Some(record) = record {
                members.push(record);
            }
        }

        let batch_id = counters.last_batch_id + 1;
        let batch = RemisionBatch {
            id: batch_id,
            tenant_id: new.tenant_id,
            environment: new.environment,
            status: BatchStatus::Queued,
            total_records: new.record_ids.len() as u32,
            record_ids: new.record_ids,
            accepted_records: 0,
            rejected_records: 0,
            attempts: 0,
            next_attempt_at: None,
            last_error: None,
            created_at: new.created_at,
            updated_at: new.created_at,
        };

        let cf_records = self.cf(CF_RECORDS)?;
        let mut write = WriteBatch::default();
        for mut record in members {
            record.remision_batch_id = Some(batch_id);
            write.put_cf(
                &cf_records,
                record.id.to_be_bytes(),
                bincode::serialize(&record)?,
            );
        }
        write.put_cf(
            &self.cf(CF_BATCHES)?,
            batch_id.to_be_bytes(),
            bincode::serialize(&batch)?,
        );
        write.put_cf(&self.cf(CF_META)?, KEY_LAST_BATCH_ID, batch_id.to_be_bytes());
        self.db.write(write)?;

        counters.last_batch_id = batch_id;
        Ok(batch)
    }

    fn get_batch(&self, id: u64) -> Result<Option<RemisionBatch>> {
        self.load_batch(id)
    }

    fn compare_and_swap_batch(&self, expected: BatchStatus, next: &RemisionBatch) -> Result<bool> {
        let _guard = self.writer.lock();

        let current = self
            .load_batch(next.id)?
            .ok_or(Error::BatchNotFound(next.id))?;
        if !check_batch_swap(&current, expected, next)? {
            return Ok(false);
        }

        let cf = self.cf(CF_BATCHES)?;
        self.db
            .put_cf(&cf, next.id.to_be_bytes(), bincode::serialize(next)?)?;
        Ok(true)
    }

    fn list_batches(
        &self,
        tenant: Option<&TenantId>,
        status: Option<BatchStatus>,
    ) -> Result<Vec<RemisionBatch>> {
        let cf = self.cf(CF_BATCHES)?;
        let mut batches = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            let batch: RemisionBatch = bincode::deserialize(&value)?;
            if tenant.map_or(true, |t| &batch.tenant_id == t)
                && status.map_or(true, |s| batch.status == s)
            {
                batches.push(batch);
            }
        }

        Ok(batches)
    }

    fn release_records(&self, batch_id: u64) -> Result<u32> {
        let _guard = self.writer.lock();

        let batch = self
            .load_batch(batch_id)?
            .ok_or(Error::BatchNotFound(batch_id))?;
        let cf_records = self.cf(CF_RECORDS)?;

        let mut write = WriteBatch::default();
        let mut released = 0;
        for id in &batch.record_ids {
            if let Some(mut record) = self.get_record(*id)? {
                if record.remision_batch_id == Some(batch_id)
                    && record.submission_status == SubmissionStatus::Pending
                {
                    record.remision_batch_id = None;
                    write.put_cf(&cf_records, id.to_be_bytes(), bincode::serialize(&record)?);
                    released += 1;
                }
            }
        }
        self.db.write(write)?;

        Ok(released)
    }
}

impl AuditStore for RocksStore {
    fn append_event(&self, event: NewAuditEvent, created_at: DateTime<Utc>) -> Result<AuditEvent> {
        let mut counters = self.writer.lock();

        let id = counters.last_audit_id + 1;
        let event = AuditEvent {
            id,
            tenant_id: event.tenant_id,
            event_type: event.event_type,
            severity: event.severity,
            message: event.message,
            details: event.details,
            created_at,
        };

        // JSON: the free-form details payload is not bincode-decodable
        let mut write = WriteBatch::default();
        write.put_cf(
            &self.cf(CF_AUDIT)?,
            audit_key(&event.tenant_id, AuditCursor::of(&event)),
            serde_json::to_vec(&event)?,
        );
        write.put_cf(&self.cf(CF_META)?, KEY_LAST_AUDIT_ID, id.to_be_bytes());
        self.db.write(write)?;

        counters.last_audit_id = id;
        Ok(event)
    }

    fn page_events(
        &self,
        tenant: &TenantId,
        filter: &AuditFilter,
        after: Option<AuditCursor>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>> {
        let cf = self.cf(CF_AUDIT)?;
        let prefix = tenant_key(tenant);
        let start = match after {
            Some(cursor) => audit_key(tenant, cursor),
            None => prefix.clone(),
        };

        let mut events = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward));
        for item in iter {
            if events.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if after.is_some() && key.as_ref() == start.as_slice() {
                continue;
            }
            let event: AuditEvent = serde_json::from_slice(&value)?;
            if filter.matches(&event) {
                events.push(event);
            }
        }

        Ok(events)
    }
}

// Key helpers

/// Width of the length prefix in front of every string key segment
const LEN_PREFIX: usize = 8;

fn push_str(key: &mut Vec<u8>, value: &str) {
    // usize -> u64 is lossless on every supported target
    key.extend_from_slice(&(value.len() as u64).to_be_bytes());
    key.extend_from_slice(value.as_bytes());
}

fn tenant_key(tenant: &TenantId) -> Vec<u8> {
    let mut key = Vec::with_capacity(LEN_PREFIX + tenant.as_str().len());
    push_str(&mut key, tenant.as_str());
    key
}

fn series_key(series: &SeriesId) -> Vec<u8> {
    let mut key = tenant_key(&series.tenant_id);
    push_str(&mut key, series.series_key.as_str());
    key
}

fn series_member_key(series: &SeriesId, id: u64) -> Vec<u8> {
    let mut key = series_key(series);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn tenant_member_key(tenant: &TenantId, id: u64) -> Vec<u8> {
    let mut key = tenant_key(tenant);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn audit_key(tenant: &TenantId, cursor: AuditCursor) -> Vec<u8> {
    let mut key = tenant_key(tenant);
    // Flip the sign bit so negative timestamps sort before positive ones
    let nanos = (cursor.created_at_nanos as u64) ^ (1 << 63);
    key.extend_from_slice(&nanos.to_be_bytes());
    key.extend_from_slice(&cursor.id.to_be_bytes());
    key
}

fn split_tenant(key: &[u8]) -> Result<(TenantId, &[u8])> {
    let truncated = || Error::Storage("Truncated tenant key".to_string());
    let prefix = key.get(..LEN_PREFIX).ok_or_else(truncated)?;
    let len = decode_u64(prefix)?;
    let len = usize::try_from(len).map_err(|_| truncated())?;
    let end = LEN_PREFIX.checked_add(len).ok_or_else(truncated)?;
    let tenant = key.get(LEN_PREFIX..end).ok_or_else(truncated)?;
    let tenant = std::str::from_utf8(tenant)
        .map_err(|e| Error::Storage(format!("Invalid tenant key: {}", e)))?;
    Ok((TenantId::new(tenant), &key[end..]))
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Storage(format!("Expected 8-byte id, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AuditEventType, AuditSeverity, Environment, HashVersion, InvoiceFields, InvoiceKind,
        RecordType, SeriesKey,
    };
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (config, temp_dir)
    }

    fn series(tenant: &str) -> SeriesId {
        SeriesId::new(TenantId::new(tenant), SeriesKey::new("B12345678"))
    }

    fn draft(series: &SeriesId, number: u64) -> RecordDraft {
        RecordDraft {
            series: series.clone(),
            fields: InvoiceFields {
                record_type: RecordType::Issuance,
                invoice_number: format!("VF-2026-{}", number),
                issue_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
                invoice_kind: InvoiceKind::F1,
                taxable_base: Decimal::new(10000, 2),
                tax_rate: Decimal::new(2100, 2),
                tax_amount: Decimal::new(2100, 2),
                total_amount: Decimal::new(12100, 2),
            },
            hash_version: HashVersion::V1,
            hash_self: format!("hash-{}", number),
            hash_previous: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();
        assert!(store.db.cf_handle(CF_RECORDS).is_some());
        assert!(store.db.cf_handle(CF_AUDIT).is_some());
    }

    #[test]
    fn test_append_and_scan() {
        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();
        let s = series("t1");

        let mut tip = None;
        for n in 1..=4 {
            tip = Some(store.append_record(draft(&s, n), tip).unwrap().id);
        }
        // A second tenant interleaves without touching the first series
        store.append_record(draft(&series("t2"), 1), None).unwrap();

        let err = store.append_record(draft(&s, 9), Some(2)).unwrap_err();
        assert!(err.is_retriable());

        let records = store.scan_series(&s, Some(1), u64::MAX, 2).unwrap();
        let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(store.series_len(&s).unwrap(), 4);
        assert_eq!(store.tip(&s).unwrap().unwrap().fields.invoice_number, "VF-2026-4");
    }

    #[test]
    fn test_long_tenant_ids_keep_distinct_keys() {
        // Lengths differing by exactly 2^16 used to share a key prefix
        let short = TenantId::new("t".repeat(3));
        let long = TenantId::new("t".repeat(3 + 65_536));
        assert_ne!(tenant_key(&short)[..LEN_PREFIX], tenant_key(&long)[..LEN_PREFIX]);

        let key = tenant_member_key(&long, 7);
        let (tenant, rest) = split_tenant(&key).unwrap();
        assert_eq!(tenant, long);
        assert_eq!(decode_u64(rest).unwrap(), 7);

        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();
        let s = SeriesId::new(long.clone(), SeriesKey::new("B12345678"));
        store.append_record(draft(&s, 1), None).unwrap();
        store
            .append_record(draft(&SeriesId::new(short.clone(), SeriesKey::new("B12345678")), 1), None)
            .unwrap();

        assert_eq!(store.series_len(&s).unwrap(), 1);
        assert_eq!(store.unbatched_pending(&long, 10).unwrap().len(), 1);
        let mut tenants = store.tenants_with_unbatched().unwrap();
        tenants.sort_by_key(|t| t.as_str().len());
        assert_eq!(tenants, vec![short, long]);
    }

    #[test]
    fn test_counters_survive_reopen() {
        let (config, _temp) = test_config();
        let s = series("t1");
        {
            let store = RocksStore::open(&config).unwrap();
            let first = store.append_record(draft(&s, 1), None).unwrap();
            store.append_record(draft(&s, 2), Some(first.id)).unwrap();
            store.close().unwrap();
        }

        let store = RocksStore::open(&config).unwrap();
        let third = store.append_record(draft(&s, 3), Some(2)).unwrap();
        assert_eq!(third.id, 3);
    }

    #[test]
    fn test_pending_index_and_batches() {
        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();
        let s = series("t1");

        let a = store.append_record(draft(&s, 1), None).unwrap();
        let b = store.append_record(draft(&s, 2), Some(a.id)).unwrap();
        assert_eq!(store.tenants_with_unbatched().unwrap(), vec![s.tenant_id.clone()]);

        let batch = store
            .create_batch(NewBatch {
                tenant_id: s.tenant_id.clone(),
                environment: Environment::Staging,
                record_ids: vec![a.id, b.id],
                created_at: Utc::now(),
            })
            .unwrap();
        assert!(store.unbatched_pending(&s.tenant_id, 10).unwrap().is_empty());
        assert!(store.tenants_with_unbatched().unwrap().is_empty());

        store
            .update_submission(a.id, SubmissionUpdate::status(SubmissionStatus::Submitted))
            .unwrap();
        assert_eq!(store.pending_count(&s.tenant_id).unwrap(), 1);

        let mut cancelled = batch.clone();
        cancelled.status = BatchStatus::Cancelled;
        assert!(store
            .compare_and_swap_batch(BatchStatus::Queued, &cancelled)
            .unwrap());
        assert_eq!(store.release_records(batch.id).unwrap(), 1);
        assert_eq!(
            store
                .list_batches(Some(&s.tenant_id), Some(BatchStatus::Cancelled))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_audit_roundtrip_with_details() {
        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();
        let tenant = TenantId::new("t1");

        let event = NewAuditEvent::new(
            tenant.clone(),
            AuditEventType::ChainBreakDetected,
            AuditSeverity::Critical,
            "break",
        )
        .with_details(serde_json::json!({ "position": 3 }));
        let stored = store.append_event(event, Utc::now()).unwrap();

        let page = store
            .page_events(&tenant, &AuditFilter::default(), None, 10)
            .unwrap();
        assert_eq!(page, vec![stored.clone()]);
        assert_eq!(page[0].details["position"], 3);

        let after = store
            .page_events(&tenant, &AuditFilter::default(), Some(AuditCursor::of(&stored)), 10)
            .unwrap();
        assert!(after.is_empty());
    }
}
