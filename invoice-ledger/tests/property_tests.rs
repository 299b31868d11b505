//! Property-based tests for chain invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Chain link: every record points at its predecessor's hash
//! - Hash determinism: stored hashes recompute from stored fields
//! - Tamper detection: any single-field mutation is found at its position
//! - Monotonic IDs: later appends get larger IDs

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use invoice_ledger::{
    config::{AuditConfig, LedgerConfig},
    verifier::check_chain,
    AuditLog, ChainVerifier, Clock, Config, InvoiceFields, InvoiceKind, InvoiceRecord, Ledger,
    ManualClock, MemoryStore, RecordType, RocksStore, SeriesId, SeriesKey, TenantId,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Strategy for generating invoice kinds
fn kind_strategy() -> impl Strategy<Value = InvoiceKind> {
    prop_oneof![
        Just(InvoiceKind::F1),
        Just(InvoiceKind::F2),
        Just(InvoiceKind::F3),
        Just(InvoiceKind::R1),
        Just(InvoiceKind::R4),
        Just(InvoiceKind::R5),
    ]
}

/// Strategy for generating Spanish VAT rates
fn rate_strategy() -> impl Strategy<Value = Decimal> {
    prop_oneof![
        Just(Decimal::ZERO),
        Just(Decimal::new(4, 0)),
        Just(Decimal::new(10, 0)),
        Just(Decimal::new(21, 0)),
    ]
}

/// Strategy for generating valid invoice fields
fn fields_strategy() -> impl Strategy<Value = InvoiceFields> {
    (
        "[A-Z]{2}-2026-[0-9]{1,6}",
        0i64..365,
        kind_strategy(),
        1i64..10_000_000,
        rate_strategy(),
    )
        .prop_map(|(invoice_number, day, invoice_kind, base_cents, tax_rate)| {
            let taxable_base = Decimal::new(base_cents, 2);
            let tax_amount = (taxable_base * tax_rate / Decimal::ONE_HUNDRED).round_dp(2);
            InvoiceFields {
                record_type: RecordType::Issuance,
                invoice_number,
                issue_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap() + Duration::days(day),
                invoice_kind,
                taxable_base,
                tax_rate,
                tax_amount,
                total_amount: taxable_base + tax_amount,
            }
        })
}

fn series() -> SeriesId {
    SeriesId::new(TenantId::new("acme"), SeriesKey::new("B12345678"))
}

fn clock() -> Arc<dyn Clock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 12, 31, 23, 0, 0).unwrap(),
    ))
}

/// Create test ledger over an in-memory store
fn create_test_ledger() -> (Arc<Ledger>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let clock = clock();
    let audit = AuditLog::new(store.clone(), clock.clone(), &AuditConfig::default());
    let config = LedgerConfig {
        scan_page_size: 7,
        ..LedgerConfig::default()
    };
    (
        Arc::new(Ledger::new(store.clone(), audit, clock, config)),
        store,
    )
}

fn append_all(ledger: &Ledger, fields: &[InvoiceFields]) -> Vec<InvoiceRecord> {
    fields
        .iter()
        .map(|f| ledger.append(&series(), f.clone()).unwrap())
        .collect()
}

/// Single-field edit applied to a stored record
#[derive(Debug, Clone)]
enum Mutation {
    /// Add a nonzero delta of any scale to one amount
    Amount { field: u8, delta: Decimal },
    /// Pad the invoice number with whitespace
    Whitespace { pad: String, leading: bool },
    Suffix,
    NextDay,
    SwapKind,
}

fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    let delta = (1i64..1_000_000, 0u32..6, any::<bool>()).prop_map(|(mantissa, scale, negative)| {
        let delta = Decimal::new(mantissa, scale);
        if negative {
            -delta
        } else {
            delta
        }
    });
    prop_oneof![
        (0u8..4, delta).prop_map(|(field, delta)| Mutation::Amount { field, delta }),
        ("[ \t]{1,3}", any::<bool>())
            .prop_map(|(pad, leading)| Mutation::Whitespace { pad, leading }),
        Just(Mutation::Suffix),
        Just(Mutation::NextDay),
        Just(Mutation::SwapKind),
    ]
}

fn mutate(record: &mut InvoiceRecord, mutation: &Mutation) {
    let fields = &mut record.fields;
    match mutation {
        Mutation::Amount { field, delta } => {
            let amount = match field {
                0 => &mut fields.taxable_base,
                1 => &mut fields.tax_rate,
                2 => &mut fields.tax_amount,
                _ => &mut fields.total_amount,
            };
            *amount += *delta;
        }
        Mutation::Whitespace { pad, leading } => {
            if *leading {
                fields.invoice_number.insert_str(0, pad);
            } else {
                fields.invoice_number.push_str(pad);
            }
        }
        Mutation::Suffix => fields.invoice_number.push('X'),
        Mutation::NextDay => fields.issue_date = fields.issue_date + Duration::days(1),
        Mutation::SwapKind => {
            fields.invoice_kind = if fields.invoice_kind == InvoiceKind::F2 {
                InvoiceKind::F1
            } else {
                InvoiceKind::F2
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: genesis has an empty link, every other record links to its predecessor
    #[test]
    fn prop_chain_link_invariant(fields in prop::collection::vec(fields_strategy(), 1..30)) {
        let (ledger, _store) = create_test_ledger();
        append_all(&ledger, &fields);

        let chain: Vec<InvoiceRecord> = ledger
            .read_chain(&series())
            .unwrap()
            .collect::<invoice_ledger::Result<_>>()
            .unwrap();

        prop_assert_eq!(chain.len(), fields.len());
        prop_assert_eq!(chain[0].hash_previous.as_str(), "");
        for pair in chain.windows(2) {
            prop_assert_eq!(&pair[1].hash_previous, &pair[0].hash_self);
        }
    }

    /// Property: stored hashes recompute from stored fields
    #[test]
    fn prop_hash_determinism(fields in prop::collection::vec(fields_strategy(), 1..20)) {
        let (ledger, _store) = create_test_ledger();
        let records = append_all(&ledger, &fields);

        for record in &records {
            prop_assert_eq!(record.recompute_hash(), record.hash_self.clone());
        }
        prop_assert!(check_chain(&records).is_empty());
    }

    /// Property: mutating one business field of one record is detected at that position
    #[test]
    fn prop_tamper_detection(
        fields in prop::collection::vec(fields_strategy(), 3..15),
        index in any::<prop::sample::Index>(),
        mutation in mutation_strategy(),
    ) {
        let (ledger, store) = create_test_ledger();
        let records = append_all(&ledger, &fields);
        let position = index.index(records.len());

        let mut tampered = records[position].clone();
        mutate(&mut tampered, &mutation);
        store.tamper_record(tampered);

        let report = ChainVerifier::new(ledger.clone()).verify(&series()).unwrap();
        prop_assert!(report.breaks_found() >= 1);
        prop_assert!(report.breaks.iter().any(|b| b.position == position as u64));
        prop_assert!(report.breaks.iter().all(|b| b.record_id == records[position].id));
    }

    /// Property: IDs grow with append order
    #[test]
    fn prop_monotonic_ids(fields in prop::collection::vec(fields_strategy(), 2..30)) {
        let (ledger, _store) = create_test_ledger();
        let records = append_all(&ledger, &fields);

        for pair in records.windows(2) {
            prop_assert!(pair[0].id < pair[1].id);
        }
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use invoice_ledger::Error;
    use std::collections::HashSet;
    use std::thread;

    fn sample_fields(n: u64) -> InvoiceFields {
        InvoiceFields {
            record_type: RecordType::Issuance,
            invoice_number: format!("VF-2026-{}", n),
            issue_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            invoice_kind: InvoiceKind::F1,
            taxable_base: Decimal::new(10000, 2),
            tax_rate: Decimal::new(2100, 2),
            tax_amount: Decimal::new(2100, 2),
            total_amount: Decimal::new(12100, 2),
        }
    }

    #[test]
    fn test_append_serialization_under_contention() {
        const WRITERS: u64 = 8;
        const PER_WRITER: u64 = 25;

        let store = Arc::new(MemoryStore::new());
        let clock = clock();
        let audit = AuditLog::new(store.clone(), clock.clone(), &AuditConfig::default());

        // Separate ledgers share only the store, so contention reaches the tip CAS
        let handles: Vec<_> = (0..WRITERS)
            .map(|w| {
                let ledger = Ledger::new(
                    store.clone(),
                    audit.clone(),
                    clock.clone(),
                    LedgerConfig {
                        max_conflict_retries: 1,
                        ..LedgerConfig::default()
                    },
                );
                thread::spawn(move || {
                    let mut ids = Vec::new();
                    for i in 0..PER_WRITER {
                        let fields = sample_fields(w * 1000 + i);
                        loop {
                            match ledger.append(&series(), fields.clone()) {
                                Ok(record) => {
                                    ids.push(record.id);
                                    break;
                                }
                                Err(e) if e.is_retriable() => continue,
                                Err(e) => panic!("unexpected error: {}", e),
                            }
                        }
                    }
                    ids
                })
            })
            .collect();

        let ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let unique: HashSet<u64> = ids.iter().copied().collect();
        assert_eq!(unique.len(), (WRITERS * PER_WRITER) as usize);

        let reader = Ledger::new(store.clone(), audit, clock, LedgerConfig::default());
        let chain: Vec<InvoiceRecord> = reader
            .read_chain(&series())
            .unwrap()
            .collect::<invoice_ledger::Result<_>>()
            .unwrap();
        assert_eq!(chain.len() as u64, WRITERS * PER_WRITER);
        assert!(check_chain(&chain).is_empty());
        assert_eq!(
            chain.iter().filter(|r| r.hash_previous.is_empty()).count(),
            1
        );
    }

    #[test]
    fn test_rocksdb_backed_chain() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let store = Arc::new(RocksStore::open(&config).unwrap());
        let clock = clock();
        let audit = AuditLog::new(store.clone(), clock.clone(), &config.audit);
        let ledger = Arc::new(Ledger::new(store.clone(), audit, clock, config.ledger.clone()));

        let records: Vec<InvoiceRecord> = (1..=5)
            .map(|n| ledger.append(&series(), sample_fields(n)).unwrap())
            .collect();

        let verifier = ChainVerifier::new(ledger.clone());
        assert!(verifier.verify(&series()).unwrap().is_intact());

        let mut tampered = records[2].clone();
        tampered.fields.tax_amount += Decimal::new(1, 2);
        store.tamper_record(&tampered).unwrap();

        let report = verifier.verify(&series()).unwrap();
        assert_eq!(report.breaks_found(), 1);
        assert_eq!(report.breaks[0].position, 2);

        let err = ledger.append(&series(), sample_fields(6)).unwrap_err();
        assert!(matches!(err, Error::ChainIntegrity { .. }));
        assert_eq!(ledger.chain_status(&series()).unwrap().total_records, 5);
    }
}
