use regex::Regex;
use serde_json::{Map, Value, json};

/// Keyword-anchored regex extraction into a loosely-typed object.
pub fn extract(text: &str) -> Value {
    let document_type = detect_document_type(text);

    let mut fields = Map::new();
    fields.insert("document_type".into(), json!(document_type));
    let mut put = |name: &str, found: Option<String>| {
        fields.insert(name.to_string(), found.map_or(Value::Null, Value::String));
    };

    match document_type {
        "Invoice" => {
            put("invoice_number", extract_invoice_no(text));
            put("total_amount", extract_total_amount(text));
            put("currency", extract_currency(text));
            put("issue_date", extract_labelled_date(text, r"(?:Invoice\s+)?Date"));
            put("supplier_name", extract_supplier(text));
        }
        "Bill" => {
            put("bill_number", extract_bill_no(text));
            put("etd", extract_labelled_date(text, r"(?:ETD|Shipped\s+on\s+Board|On\s+Board\s+Date)"));
            put("eta", extract_labelled_date(text, r"ETA"));
            put("vessel_name", extract_labelled_line(text, r"(?:Ocean\s+)?Vessel(?:\s*/\s*Voy(?:age)?\.?)?(?:\s+Name)?"));
            put("port_of_loading", extract_labelled_line(text, r"Port\s+of\s+Loading"));
            put("port_of_discharge", extract_labelled_line(text, r"Port\s+of\s+Discharge"));
        }
        "CO" => {
            put("form_type", extract_form_type(text));
            put("issue_date", extract_labelled_date(text, r"(?:Date\s+of\s+Issue|Issued?\s+(?:on|date))"));
            put("exporter_name", extract_labelled_line(text, r"Exporter(?:'s)?(?:\s+name)?"));
            put("importer_name", extract_labelled_line(text, r"(?:Importer|Consignee)(?:'s)?(?:\s+name)?"));
            put("country_of_origin", extract_labelled_line(text, r"Country\s+of\s+Origin"));
        }
        _ => {}
    }

    Value::Object(fields)
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

fn detect_document_type(text: &str) -> &'static str {
    let upper = text.to_uppercase();
    if upper.contains("CERTIFICATE OF ORIGIN") {
        "CO"
    } else if upper.contains("BILL OF LADING") || upper.contains("B/L NO") {
        "Bill"
    } else if upper.contains("INVOICE") {
        "Invoice"
    } else {
        ""
    }
}

// ---------------------------------------------------------------------------
// Field extractors
// ---------------------------------------------------------------------------

fn extract_invoice_no(text: &str) -> Option<String> {
    let re = Regex::new(r"(?i)Invoice\s+(?:No\.?|Number|#)\s*:?\s*([A-Za-z0-9\-/]+)").ok()?;
    re.captures(text).map(|c| c[1].trim().to_string())
}

fn extract_bill_no(text: &str) -> Option<String> {
    let re = Regex::new(r"(?i)(?:B/L|Bill\s+of\s+Lading)\s+(?:No\.?|Number)\s*:?\s*([A-Za-z0-9\-/]+)").ok()?;
    re.captures(text).map(|c| c[1].trim().to_string())
}

fn extract_currency(text: &str) -> Option<String> {
    let re = Regex::new(r"(?i)(US\$|\bUSD\b|\bEUR\b|\bVND\b|\bSGD\b|\bGBP\b|\bJPY\b|\bCNY\b|\bTHB\b)").ok()?;
    let cap = re.captures(text)?;
    let raw = cap[1].to_uppercase();
    // Normalise "US$" → "USD"
    Some(if raw == "US$" { "USD".to_string() } else { raw })
}

fn extract_total_amount(text: &str) -> Option<String> {
    // Last "TOTAL ... <number>" wins: sub-totals come first on most invoices.
    let re = Regex::new(r"(?i)\bTOTAL(?:\s+AMOUNT)?\b[^\d\n]{0,20}(\d[\d,]*(?:\.\d+)?)").ok()?;
    re.captures_iter(text).last().map(|c| c[1].to_string())
}

fn extract_supplier(text: &str) -> Option<String> {
    if let Some(labelled) = extract_labelled_line(text, r"(?:Supplier|Seller|Shipper|Exporter)") {
        return Some(labelled);
    }
    extract_company_names(text).into_iter().next()
}

fn extract_form_type(text: &str) -> Option<String> {
    let re = Regex::new(r"(?i)\bFORM\s+([A-Z]{1,4})\b").ok()?;
    re.captures(text)
        .map(|c| format!("Form {}", c[1].to_uppercase()))
}

/// Date following `label`, in any of the shapes coercion understands plus a
/// few it does not (those are dropped later).
fn extract_labelled_date(text: &str, label: &str) -> Option<String> {
    let re = Regex::new(&format!(
        r"(?i)\b{label}\s*[:.]?\s*(\d{{4}}[-/.]\d{{1,2}}[-/.]\d{{1,2}}|\d{{1,2}}[-/]\d{{1,2}}[-/]\d{{4}})"
    ))
    .ok()?;
    re.captures(text).map(|c| c[1].to_string())
}

/// Rest of the line after `label:`, or the next non-empty line when the
/// label stands alone.
fn extract_labelled_line(text: &str, label: &str) -> Option<String> {
    let re = Regex::new(&format!(r"(?im)^[^\S\n]*{label}[^\S\n]*:?[^\S\n]*(.*)$")).ok()?;
    for cap in re.captures_iter(text) {
        let same_line = cap[1].trim();
        if !same_line.is_empty() {
            return Some(same_line.to_string());
        }
        let end = cap.get(0)?.end();
        if let Some(next) = text[end..].lines().map(str::trim).find(|l| !l.is_empty()) {
            return Some(next.to_string());
        }
    }
    None
}

/// Find company-like names (X PTE LTD, X CO. LTD, X JSC, etc.)
fn extract_company_names(text: &str) -> Vec<String> {
    let Ok(re) = Regex::new(
        r"([A-Z][A-Z.& ]+(?:PTE\.?\s*LTD\.?|CO\.?,?\s*LTD\.?|CORPORATION|CORP\.?|INC\.?|JSC|LLC))",
    ) else {
        return Vec::new();
    };
    re.captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentType, LogisticsDocumentResult, coerce};

    const INVOICE: &str = "COMMERCIAL INVOICE\n\
        SAIGON TEXTILE CO., LTD\n\
        Invoice No.: INV-2024/0311\n\
        Invoice Date: 2024/03/11\n\
        Sub total 1,000.00\n\
        TOTAL AMOUNT: US$ 1,250.50\n";

    const BILL: &str = "BILL OF LADING\n\
        B/L No: HLCU123456\n\
        Vessel / Voy: EVER GIVEN 052E\n\
        Port of Loading: Cat Lai, Ho Chi Minh\n\
        Port of Discharge:\n\
        \n\
        Rotterdam\n\
        ETD: 05/20/2024\n\
        ETA: 2024-06-30\n";

    const CERTIFICATE: &str = "CERTIFICATE OF ORIGIN\n\
        FORM E\n\
        Exporter: Viet Agro JSC\n\
        Consignee: Shanghai Foods Ltd\n\
        Country of Origin: Vietnam\n\
        Date of issue: 12/03/2024\n";

    fn coerced(text: &str) -> LogisticsDocumentResult {
        coerce(Some(&extract(text)))
    }

    #[test]
    fn test_invoice() {
        let record = coerced(INVOICE);
        assert_eq!(record.document_type, DocumentType::Invoice);
        assert_eq!(record.invoice_number.as_deref(), Some("INV-2024/0311"));
        assert_eq!(record.issue_date.as_deref(), Some("2024-03-11"));
        assert_eq!(record.currency.as_deref(), Some("USD"));
        assert_eq!(record.total_amount, Some(1250.50));
        assert_eq!(record.supplier_name.as_deref(), Some("SAIGON TEXTILE CO., LTD"));
    }

    #[test]
    fn test_bill_of_lading() {
        let record = coerced(BILL);
        assert_eq!(record.document_type, DocumentType::Bill);
        assert_eq!(record.bill_number.as_deref(), Some("HLCU123456"));
        assert_eq!(record.vessel_name.as_deref(), Some("EVER GIVEN 052E"));
        assert_eq!(record.port_of_loading.as_deref(), Some("Cat Lai, Ho Chi Minh"));
        assert_eq!(record.port_of_discharge.as_deref(), Some("Rotterdam"));
        assert_eq!(record.etd.as_deref(), Some("2024-05-20"));
        assert_eq!(record.eta.as_deref(), Some("2024-06-30"));
        assert_eq!(record.invoice_number, None);
    }

    #[test]
    fn test_certificate_of_origin() {
        let record = coerced(CERTIFICATE);
        assert_eq!(record.document_type, DocumentType::CertificateOfOrigin);
        assert_eq!(record.form_type.as_deref(), Some("Form E"));
        assert_eq!(record.exporter_name.as_deref(), Some("Viet Agro JSC"));
        assert_eq!(record.importer_name.as_deref(), Some("Shanghai Foods Ltd"));
        assert_eq!(record.country_of_origin.as_deref(), Some("Vietnam"));
        // 12/03 could be either order.
        assert_eq!(record.issue_date, None);
    }

    #[test]
    fn test_unrecognised_text() {
        assert_eq!(coerced("lorem ipsum"), LogisticsDocumentResult::empty());
    }
}
