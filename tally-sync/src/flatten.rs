//! Record flattener
//!
//! Turns nested ledger records into one row per line item. A record or
//! item without a parseable identifier is skipped and counted, never
//! fatal: partial upstream data must not abort a batch. Numeric noise
//! coerces to zero, which downstream aggregation treats as a neutral
//! identity. Input batch order and record-internal item order are
//! preserved; callers that need date ordering sort downstream.

use crate::models::{coerce_f64, coerce_i64, PartyRef, RawBill, RawInvoice};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

/// Sentinel for an absent client, supplier, or payment method.
pub const UNSPECIFIED: &str = "unspecified";
/// Sentinel for an invoice with no seller attached.
pub const NO_SELLER: &str = "no seller registered";
/// Sentinel for a line item with no display name.
pub const UNNAMED: &str = "unnamed";

/// One persisted sales line (invoice × line item).
#[derive(Debug, Clone, Serialize)]
pub struct SaleLine {
    pub invoice_id: i64,
    pub item_id: i64,
    pub sold_on: NaiveDate,
    pub sold_at: String,
    pub item_name: String,
    pub unit_price: f64,
    pub quantity: i64,
    pub line_total: f64,
    pub client: String,
    pub invoice_total: f64,
    pub payment_method: String,
    pub seller: String,
}

/// One persisted vendor-bill line (bill × line item).
#[derive(Debug, Clone, Serialize)]
pub struct BillLine {
    pub bill_id: i64,
    pub item_id: i64,
    pub billed_on: NaiveDate,
    pub item_name: String,
    pub unit_price: f64,
    /// Vendor quantities can be fractional (weights, meters).
    pub quantity: f64,
    pub line_total: f64,
    pub bill_total: f64,
    pub supplier: String,
}

/// Counters describing one flatten pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlattenStats {
    pub records_in: usize,
    pub rows_out: usize,
    pub skipped_records: usize,
    pub skipped_items: usize,
    /// Records whose identifier fell outside the planned window.
    pub out_of_window: usize,
}

/// Flatten one batch of raw invoice payloads.
///
/// `id_window` bounds the parent identifiers allowed through as
/// `(low, high]`: offset pages can straddle the planned range, and rows
/// outside the window would either duplicate already-persisted invoices
/// or run ahead of the confirmed end.
pub fn flatten_invoices(
    records: &[Value],
    id_window: Option<(i64, i64)>,
) -> (Vec<SaleLine>, FlattenStats) {
    let mut stats = FlattenStats {
        records_in: records.len(),
        ..Default::default()
    };
    let mut rows = Vec::new();

    for raw in records {
        let Ok(invoice) = serde_json::from_value::<RawInvoice>(raw.clone()) else {
            stats.skipped_records += 1;
            continue;
        };
        let Some(invoice_id) = coerce_i64(invoice.id.as_ref()) else {
            stats.skipped_records += 1;
            continue;
        };
        if let Some((low, high)) = id_window {
            if invoice_id <= low || invoice_id > high {
                stats.out_of_window += 1;
                continue;
            }
        }
        let Some(sold_on) = invoice.date.as_deref().and_then(parse_date) else {
            stats.skipped_records += 1;
            continue;
        };

        let client = party_name(invoice.client.as_ref(), UNSPECIFIED);
        let seller = party_name(invoice.seller.as_ref(), NO_SELLER);
        let payment_method = invoice
            .payment_method
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| UNSPECIFIED.to_string());
        let sold_at = invoice
            .datetime
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("{sold_on} 00:00:00"));
        let invoice_total = coerce_f64(invoice.total_paid.as_ref()).unwrap_or(0.0);

        for item in &invoice.items {
            let Some(item_id) = coerce_i64(item.id.as_ref()) else {
                stats.skipped_items += 1;
                continue;
            };
            rows.push(SaleLine {
                invoice_id,
                item_id,
                sold_on,
                sold_at: sold_at.clone(),
                item_name: item_name(item.name.as_deref()),
                unit_price: coerce_f64(item.price.as_ref()).unwrap_or(0.0),
                quantity: coerce_i64(item.quantity.as_ref()).unwrap_or(0),
                line_total: coerce_f64(item.total.as_ref()).unwrap_or(0.0),
                client: client.clone(),
                invoice_total,
                payment_method: payment_method.clone(),
                seller: seller.clone(),
            });
            stats.rows_out += 1;
        }
    }

    (rows, stats)
}

/// Flatten one batch of raw vendor-bill payloads.
///
/// `page_date` is the day the page was fetched for; it backstops bills
/// whose own date field is missing or unparseable.
pub fn flatten_bills(records: &[Value], page_date: NaiveDate) -> (Vec<BillLine>, FlattenStats) {
    let mut stats = FlattenStats {
        records_in: records.len(),
        ..Default::default()
    };
    let mut rows = Vec::new();

    for raw in records {
        let Ok(bill) = serde_json::from_value::<RawBill>(raw.clone()) else {
            stats.skipped_records += 1;
            continue;
        };
        let Some(bill_id) = coerce_i64(bill.id.as_ref()) else {
            stats.skipped_records += 1;
            continue;
        };

        let billed_on = bill
            .date
            .as_deref()
            .and_then(parse_date)
            .unwrap_or(page_date);
        let supplier = party_name(bill.provider.as_ref(), UNSPECIFIED);
        let bill_total = coerce_f64(bill.total.as_ref()).unwrap_or(0.0);
        let items = bill.purchases.as_ref().map(|p| p.items.as_slice()).unwrap_or(&[]);

        for item in items {
            let Some(item_id) = coerce_i64(item.id.as_ref()) else {
                stats.skipped_items += 1;
                continue;
            };
            rows.push(BillLine {
                bill_id,
                item_id,
                billed_on,
                item_name: item_name(item.name.as_deref()),
                unit_price: coerce_f64(item.price.as_ref()).unwrap_or(0.0),
                quantity: coerce_f64(item.quantity.as_ref()).unwrap_or(0.0),
                line_total: coerce_f64(item.total.as_ref()).unwrap_or(0.0),
                bill_total,
                supplier: supplier.clone(),
            });
            stats.rows_out += 1;
        }
    }

    (rows, stats)
}

fn party_name(party: Option<&PartyRef>, fallback: &str) -> String {
    party
        .and_then(|p| p.name.as_deref())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

fn item_name(name: Option<&str>) -> String {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNNAMED.to_string())
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn malformed_price_defaults_to_zero_without_dropping_the_row() {
        let records = vec![json!({
            "id": 1081,
            "date": "2024-05-10",
            "items": [
                {"id": 1, "name": "Sensor", "price": 10.0, "quantity": 2, "total": 20.0},
                {"id": 2, "name": "Cable", "price": "not-a-number", "quantity": 1, "total": 5.0},
                {"id": 3, "name": "Bracket", "price": 2.5, "quantity": 4, "total": 10.0}
            ]
        })];

        let (rows, stats) = flatten_invoices(&records, None);

        assert_eq!(rows.len(), 3);
        assert_eq!(stats.rows_out, 3);
        assert_eq!(rows[1].unit_price, 0.0);
        assert_eq!(rows[1].line_total, 5.0);
    }

    #[test]
    fn record_without_parseable_id_is_skipped() {
        let records = vec![
            json!({"id": "???", "date": "2024-05-10", "items": [{"id": 1}]}),
            json!({"id": 7, "date": "2024-05-10", "items": [{"id": 1}]}),
        ];

        let (rows, stats) = flatten_invoices(&records, None);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].invoice_id, 7);
        assert_eq!(stats.skipped_records, 1);
    }

    #[test]
    fn item_without_parseable_id_is_skipped_alone() {
        let records = vec![json!({
            "id": 7,
            "date": "2024-05-10",
            "items": [
                {"id": 1, "name": "kept"},
                {"name": "no id"},
                {"id": 2, "name": "also kept"}
            ]
        })];

        let (rows, stats) = flatten_invoices(&records, None);

        assert_eq!(rows.len(), 2);
        assert_eq!(stats.skipped_items, 1);
        assert_eq!(rows[0].item_name, "kept");
        assert_eq!(rows[1].item_name, "also kept");
    }

    #[test]
    fn absent_parties_get_sentinels_never_empty() {
        let records = vec![json!({
            "id": 7,
            "date": "2024-05-10",
            "client": null,
            "seller": {},
            "items": [{"id": 1}]
        })];

        let (rows, _) = flatten_invoices(&records, None);

        assert_eq!(rows[0].client, UNSPECIFIED);
        assert_eq!(rows[0].seller, NO_SELLER);
        assert_eq!(rows[0].payment_method, UNSPECIFIED);
        assert_eq!(rows[0].item_name, UNNAMED);
        assert_eq!(rows[0].sold_at, "2024-05-10 00:00:00");
    }

    #[test]
    fn id_window_drops_overlap_from_straddling_pages() {
        let records = vec![
            json!({"id": 5, "date": "2024-05-10", "items": [{"id": 1}]}),
            json!({"id": 10, "date": "2024-05-10", "items": [{"id": 1}]}),
            json!({"id": 15, "date": "2024-05-10", "items": [{"id": 1}]}),
        ];

        let (rows, stats) = flatten_invoices(&records, Some((5, 10)));

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].invoice_id, 10);
        assert_eq!(stats.out_of_window, 2);
        assert_eq!(stats.skipped_records, 0);
    }

    #[test]
    fn input_order_is_preserved() {
        let records = vec![
            json!({"id": 9, "date": "2024-05-11", "items": [{"id": 91}, {"id": 92}]}),
            json!({"id": 3, "date": "2024-05-10", "items": [{"id": 31}]}),
        ];

        let (rows, _) = flatten_invoices(&records, None);

        let keys: Vec<(i64, i64)> = rows.iter().map(|r| (r.invoice_id, r.item_id)).collect();
        assert_eq!(keys, vec![(9, 91), (9, 92), (3, 31)]);
    }

    #[test]
    fn bill_items_flatten_with_fractional_quantities() {
        let records = vec![json!({
            "id": 55,
            "date": "2024-05-10",
            "total": "120.50",
            "provider": {"name": "  Acme Supply  "},
            "purchases": {"items": [
                {"id": 1, "name": "Wire", "price": 2.5, "quantity": 12.4, "total": 31.0}
            ]}
        })];

        let (rows, stats) = flatten_bills(&records, day(2024, 5, 10));

        assert_eq!(stats.rows_out, 1);
        assert_eq!(rows[0].bill_id, 55);
        assert_eq!(rows[0].quantity, 12.4);
        assert_eq!(rows[0].bill_total, 120.5);
        assert_eq!(rows[0].supplier, "Acme Supply");
    }

    #[test]
    fn bill_without_purchases_yields_no_rows() {
        let records = vec![json!({"id": 55, "date": "2024-05-10", "total": 10.0})];

        let (rows, stats) = flatten_bills(&records, day(2024, 5, 10));

        assert!(rows.is_empty());
        assert_eq!(stats.skipped_records, 0);
    }

    #[test]
    fn bill_with_unparseable_date_falls_back_to_page_date() {
        let records = vec![json!({
            "id": 55,
            "date": "n/a",
            "purchases": {"items": [{"id": 1}]}
        })];

        let (rows, _) = flatten_bills(&records, day(2024, 5, 10));

        assert_eq!(rows[0].billed_on, day(2024, 5, 10));
    }
}
