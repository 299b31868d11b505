//! Canonical encoding and hashing of invoice records
//!
//! # Format v1
//!
//! ```text
//! v1|tenant_id=<..>|series_key=<..>|record_type=<..>|invoice_number=<..>|
//!   issue_date=YYYY-MM-DD|invoice_kind=<..>|taxable_base=0.00|tax_rate=0.00|
//!   tax_amount=0.00|total_amount=0.00|hash_previous=<hex or empty>
//! ```
//!
//! (one line). Amounts with up to two decimals are printed with exactly two;
//! any finer amount is printed with its full scale, so every distinct stored
//! value has a distinct encoding. The invoice number is hashed as stored.
//! The digest is SHA-256, lowercase hex.
//!
//! Field order is frozen per version. A new field means a new version; the
//! verifier dispatches on the version stored with each record, so existing
//! hashes never change.

use crate::types::{HashVersion, InvoiceFields, SeriesKey, TenantId};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Canonical string for a record under the given version
pub fn canonical_encoding(
    version: HashVersion,
    tenant_id: &TenantId,
    series_key: &SeriesKey,
    fields: &InvoiceFields,
    hash_previous: &str,
) -> String {
    match version {
        HashVersion::V1 => {
            let parts = [
                ("tenant_id", tenant_id.as_str().to_string()),
                ("series_key", series_key.as_str().to_string()),
                ("record_type", fields.record_type.code().to_string()),
                ("invoice_number", fields.invoice_number.clone()),
                ("issue_date", fields.issue_date.format("%Y-%m-%d").to_string()),
                ("invoice_kind", fields.invoice_kind.code().to_string()),
                ("taxable_base", exact_amount(fields.taxable_base)),
                ("tax_rate", exact_amount(fields.tax_rate)),
                ("tax_amount", exact_amount(fields.tax_amount)),
                ("total_amount", exact_amount(fields.total_amount)),
                ("hash_previous", hash_previous.to_string()),
            ];

            let mut out = String::from("v1");
            for (key, value) in parts.iter() {
                out.push('|');
                out.push_str(key);
                out.push('=');
                out.push_str(value);
            }
            out
        }
    }
}

/// `hash_self` of a record
pub fn record_hash(
    version: HashVersion,
    tenant_id: &TenantId,
    series_key: &SeriesKey,
    fields: &InvoiceFields,
    hash_previous: &str,
) -> String {
    let canonical = canonical_encoding(version, tenant_id, series_key, fields, hash_previous);
    hex::encode(hash_bytes(canonical.as_bytes()))
}

/// Two decimals for cent amounts, full scale otherwise. Never rounds.
fn exact_amount(value: Decimal) -> String {
    if value.scale() <= 2 {
        let mut cents = value;
        cents.rescale(2);
        cents.to_string()
    } else {
        value.to_string()
    }
}
