//! Raw API payload shapes
//!
//! The ledger API returns loosely-typed JSON: identifiers and prices
//! arrive as numbers or strings depending on the record's age, and nested
//! objects may be null, absent, or empty. Everything uncertain is parsed
//! into a typed absence here, once, at the boundary; downstream code never
//! walks raw JSON maps.

use serde::Deserialize;
use serde_json::Value;

/// Embedded party reference (client, seller, or provider).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartyRef {
    pub name: Option<String>,
}

/// One line item embedded in an invoice or bill.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLineItem {
    pub id: Option<Value>,
    pub name: Option<String>,
    pub price: Option<Value>,
    pub quantity: Option<Value>,
    pub total: Option<Value>,
}

/// One sales invoice as returned by the API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInvoice {
    pub id: Option<Value>,
    pub date: Option<String>,
    pub datetime: Option<String>,
    pub client: Option<PartyRef>,
    pub seller: Option<PartyRef>,
    #[serde(rename = "totalPaid")]
    pub total_paid: Option<Value>,
    #[serde(rename = "paymentMethod")]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub items: Vec<RawLineItem>,
}

/// Purchases wrapper nested inside a vendor bill.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPurchases {
    #[serde(default)]
    pub items: Vec<RawLineItem>,
}

/// One vendor bill as returned by the API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBill {
    pub id: Option<Value>,
    pub date: Option<String>,
    pub total: Option<Value>,
    pub provider: Option<PartyRef>,
    pub purchases: Option<RawPurchases>,
}

/// Coerce a JSON value to i64: numbers pass through, numeric strings parse.
pub fn coerce_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Coerce a JSON value to f64; same numeric-string tolerance as [`coerce_i64`].
pub fn coerce_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerces_numeric_strings() {
        assert_eq!(coerce_i64(Some(&json!("42"))), Some(42));
        assert_eq!(coerce_f64(Some(&json!(" 19.95 "))), Some(19.95));
    }

    #[test]
    fn rejects_non_numeric_values() {
        assert_eq!(coerce_i64(Some(&json!("abc"))), None);
        assert_eq!(coerce_i64(Some(&json!(null))), None);
        assert_eq!(coerce_f64(None), None);
    }

    #[test]
    fn parses_invoice_with_missing_nested_objects() {
        let invoice: RawInvoice = serde_json::from_value(json!({
            "id": "1081",
            "date": "2024-05-10",
            "client": null,
            "items": [{"id": 7, "name": "Relay module", "price": "12.50"}]
        }))
        .unwrap();

        assert_eq!(coerce_i64(invoice.id.as_ref()), Some(1081));
        assert!(invoice.client.is_none());
        assert!(invoice.seller.is_none());
        assert_eq!(invoice.items.len(), 1);
    }

    #[test]
    fn parses_bill_without_purchases() {
        let bill: RawBill = serde_json::from_value(json!({
            "id": 55,
            "date": "2024-05-10",
            "total": 120.0
        }))
        .unwrap();

        assert_eq!(coerce_i64(bill.id.as_ref()), Some(55));
        assert!(bill.purchases.is_none());
    }
}
