use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::{DocumentType, LogisticsDocumentResult};

type Apply = fn(&mut LogisticsDocumentResult, Option<&Value>);

/// Field name to normalizer, in column order. Each rule sees only its own key.
const FIELD_RULES: [(&str, Apply); 16] = [
    ("document_type", |r, v| r.document_type = normalize_document_type(v)),
    ("invoice_number", |r, v| r.invoice_number = normalize_text(v)),
    ("total_amount", |r, v| r.total_amount = normalize_amount(v)),
    ("currency", |r, v| r.currency = normalize_currency(v)),
    ("issue_date", |r, v| r.issue_date = normalize_date(v)),
    ("supplier_name", |r, v| r.supplier_name = normalize_text(v)),
    ("bill_number", |r, v| r.bill_number = normalize_text(v)),
    ("etd", |r, v| r.etd = normalize_date(v)),
    ("eta", |r, v| r.eta = normalize_date(v)),
    ("vessel_name", |r, v| r.vessel_name = normalize_text(v)),
    ("port_of_loading", |r, v| r.port_of_loading = normalize_text(v)),
    ("port_of_discharge", |r, v| r.port_of_discharge = normalize_text(v)),
    ("form_type", |r, v| r.form_type = normalize_text(v)),
    ("exporter_name", |r, v| r.exporter_name = normalize_text(v)),
    ("importer_name", |r, v| r.importer_name = normalize_text(v)),
    ("country_of_origin", |r, v| r.country_of_origin = normalize_text(v)),
];

const YEAR_RANGE: std::ops::RangeInclusive<u32> = 1900..=2100;

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").expect("static regex"));
static YEAR_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{4})[/.]([0-9]{1,2})[/.]([0-9]{1,2})$").expect("static regex")
});
static YEAR_LAST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{1,2})[/-]([0-9]{1,2})[/-]([0-9]{4})$").expect("static regex")
});

/// Map any decoded value onto the record. Anything but a JSON object gives
/// the empty record; unknown keys are ignored.
pub fn coerce(value: Option<&Value>) -> LogisticsDocumentResult {
    let mut record = LogisticsDocumentResult::empty();
    let Some(Value::Object(fields)) = value else {
        return record;
    };
    for (name, apply) in FIELD_RULES {
        apply(&mut record, fields.get(name));
    }
    record
}

/// Unicode whitespace plus the BOM.
fn trim_blank(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}')
}

pub fn normalize_document_type(value: Option<&Value>) -> DocumentType {
    value
        .and_then(Value::as_str)
        .map(|s| DocumentType::from_literal(trim_blank(s)))
        .unwrap_or_default()
}

pub fn normalize_text(value: Option<&Value>) -> Option<String> {
    let trimmed = trim_blank(value?.as_str()?);
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn normalize_currency(value: Option<&Value>) -> Option<String> {
    let code = trim_blank(value?.as_str()?).to_uppercase();
    (code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())).then_some(code)
}

pub fn normalize_amount(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => parse_amount(s),
        _ => None,
    }
}

/// Keep digits, `.` and `-`, then parse. "1,234.50 USD" -> 1234.5.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let trimmed = trim_blank(raw);
    if trimmed.is_empty() {
        return None;
    }
    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if matches!(cleaned.as_str(), "" | "-" | "." | "-.") {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
}

pub fn normalize_date(value: Option<&Value>) -> Option<String> {
    parse_date(value?.as_str()?)
}

/// Accepts ISO dates verbatim, year-first dates with `/` or `.`, and
/// year-last dates with `/` or `-`. Year-last dates where both leading parts
/// could be a month are ambiguous and give `None`.
pub fn parse_date(raw: &str) -> Option<String> {
    let v = trim_blank(raw);
    if ISO_DATE.is_match(v) {
        return Some(v.to_string());
    }

    if let Some(caps) = YEAR_FIRST.captures(v) {
        let year = caps[1].parse::<u32>().ok()?;
        let month = caps[2].parse::<u32>().ok()?;
        let day = caps[3].parse::<u32>().ok()?;
        if !YEAR_RANGE.contains(&year) {
            return None;
        }
        return iso_date(year, month, day);
    }

    let caps = YEAR_LAST.captures(v)?;
    let a = caps[1].parse::<u32>().ok()?;
    let b = caps[2].parse::<u32>().ok()?;
    let year = caps[3].parse::<u32>().ok()?;
    if !YEAR_RANGE.contains(&year) {
        return None;
    }
    let (month, day) = match (a <= 12, b <= 12) {
        (true, true) => return None,
        (true, false) => (a, b),
        (false, _) => (b, a),
    };
    iso_date(year, month, day)
}

fn iso_date(year: u32, month: u32, day: u32) -> Option<String> {
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(format!("{year:04}-{month:02}-{day:02}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{COLUMNS, recover_json};
    use serde_json::json;

    fn run(raw: &str) -> LogisticsDocumentResult {
        coerce(recover_json(raw).as_ref())
    }

    fn is_iso(s: &str) -> bool {
        ISO_DATE.is_match(s)
    }

    fn assert_closed(record: &LogisticsDocumentResult) {
        for date in [&record.issue_date, &record.etd, &record.eta]
            .into_iter()
            .flatten()
        {
            assert!(is_iso(date), "bad date {date}");
        }
        if let Some(code) = &record.currency {
            assert!(code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()));
        }
        if let Some(amount) = record.total_amount {
            assert!(amount.is_finite());
        }
        let json = serde_json::to_value(record).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 16);
    }

    #[test]
    fn test_rule_table_matches_columns() {
        let names: Vec<&str> = FIELD_RULES.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, COLUMNS);
    }

    #[test]
    fn test_invoice_with_loose_formats() {
        let record = run(
            r#"{"document_type":"Invoice","total_amount":"1,234.50","currency":"usd","issue_date":"2024/03/07"}"#,
        );
        assert_eq!(
            record,
            LogisticsDocumentResult {
                document_type: DocumentType::Invoice,
                total_amount: Some(1234.50),
                currency: Some("USD".into()),
                issue_date: Some("2024-03-07".into()),
                ..LogisticsDocumentResult::empty()
            }
        );
    }

    #[test]
    fn test_bill_embedded_in_prose() {
        let record = run(
            "Sure, here is the result:\n{\"document_type\":\"Bill\",\"bill_number\":\"BL123\"}\nLet me know if you need anything else.",
        );
        assert_eq!(
            record,
            LogisticsDocumentResult {
                document_type: DocumentType::Bill,
                bill_number: Some("BL123".into()),
                ..LogisticsDocumentResult::empty()
            }
        );
    }

    #[test]
    fn test_not_json_is_empty() {
        assert_eq!(run("not json at all"), LogisticsDocumentResult::empty());
    }

    #[test]
    fn test_month_first_when_second_part_is_a_day() {
        assert_eq!(run(r#"{"etd":"05/20/2024"}"#).etd.as_deref(), Some("2024-05-20"));
    }

    #[test]
    fn test_ambiguous_date_is_null() {
        assert_eq!(run(r#"{"etd":"05/07/2024"}"#).etd, None);
    }

    #[test]
    fn test_unknown_type_and_non_numeric_amount() {
        let record = run(r#"{"document_type":"Quote","total_amount":"N/A"}"#);
        assert_eq!(record.document_type, DocumentType::Unknown);
        assert_eq!(record.total_amount, None);
    }

    #[test]
    fn test_non_objects_are_empty() {
        for value in [
            json!(null),
            json!([{"document_type": "Invoice"}]),
            json!("Invoice"),
            json!(3),
            json!(true),
        ] {
            assert_eq!(coerce(Some(&value)), LogisticsDocumentResult::empty());
        }
        assert_eq!(coerce(None), LogisticsDocumentResult::empty());
    }

    #[test]
    fn test_fields_are_independent() {
        let record = coerce(Some(&json!({
            "document_type": " CO ",
            "issue_date": "31/31/2024",
            "form_type": "  Form E ",
            "exporter_name": 17,
            "importer_name": "   ",
            "country_of_origin": "Vietnam",
            "unexpected": {"nested": [1, 2, 3]}
        })));
        assert_eq!(record.document_type, DocumentType::CertificateOfOrigin);
        assert_eq!(record.issue_date, None);
        assert_eq!(record.form_type.as_deref(), Some("Form E"));
        assert_eq!(record.exporter_name, None);
        assert_eq!(record.importer_name, None);
        assert_eq!(record.country_of_origin.as_deref(), Some("Vietnam"));
    }

    #[test]
    fn test_document_type_closure() {
        for raw in [json!("invoice"), json!("BILL"), json!(1), json!(null), json!(["CO"])] {
            let record = coerce(Some(&json!({ "document_type": raw })));
            assert_eq!(record.document_type, DocumentType::Unknown);
        }
        let record = coerce(Some(&json!({ "document_type": "\tBill\n" })));
        assert_eq!(record.document_type, DocumentType::Bill);
    }

    #[test]
    fn test_dates() {
        let cases = [
            ("2024-03-07", Some("2024-03-07")),
            (" 2024-13-45 ", Some("2024-13-45")),
            ("2024.3.7", Some("2024-03-07")),
            ("2024/12/31", Some("2024-12-31")),
            ("1899/01/01", None),
            ("2101/01/01", None),
            ("2024/13/01", None),
            ("2024/02/30", Some("2024-02-30")),
            ("2024/00/10", None),
            ("20/05/2024", Some("2024-05-20")),
            ("5-20-2024", Some("2024-05-20")),
            ("12/12/2024", None),
            ("31/13/2024", None),
            ("05/20/1800", None),
            ("2024-3-7", None),
            ("March 7, 2024", None),
            ("", None),
        ];
        for (raw, expected) in cases {
            assert_eq!(parse_date(raw).as_deref(), expected, "input {raw:?}");
        }
        assert_eq!(normalize_date(Some(&json!(20240307))), None);
        assert_eq!(normalize_date(None), None);
    }

    #[test]
    fn test_currency() {
        assert_eq!(normalize_currency(Some(&json!(" vnd "))).as_deref(), Some("VND"));
        assert_eq!(normalize_currency(Some(&json!("US$"))), None);
        assert_eq!(normalize_currency(Some(&json!("USDT"))), None);
        assert_eq!(normalize_currency(Some(&json!("€"))), None);
        assert_eq!(normalize_currency(Some(&json!(840))), None);
    }

    #[test]
    fn test_amounts() {
        assert_eq!(normalize_amount(Some(&json!(99))), Some(99.0));
        assert_eq!(normalize_amount(Some(&json!(-0.5))), Some(-0.5));
        assert_eq!(parse_amount("USD 12,000.75"), Some(12000.75));
        assert_eq!(parse_amount("-15"), Some(-15.0));
        assert_eq!(parse_amount(".5"), Some(0.5));
        assert_eq!(parse_amount("1.2.3"), None);
        assert_eq!(parse_amount("1-2"), None);
        assert_eq!(parse_amount("-"), None);
        assert_eq!(parse_amount("."), None);
        assert_eq!(parse_amount("-."), None);
        assert_eq!(parse_amount("   "), None);
        assert_eq!(parse_amount(&"9".repeat(400)), None);
        assert_eq!(normalize_amount(Some(&json!(true))), None);
        assert_eq!(normalize_amount(Some(&json!(null))), None);
    }

    #[test]
    fn test_coercion_is_a_fixed_point() {
        let inputs = [
            r#"{"document_type":"Invoice","total_amount":"1,234.50","currency":"usd","issue_date":"2024/03/07","supplier_name":"  ACME  "}"#,
            r#"{"document_type":"Bill","etd":"20-05-2024","eta":"2024.6.1","vessel_name":"EVER GIVEN"}"#,
            "garbage",
        ];
        for raw in inputs {
            let once = run(raw);
            let twice = coerce(Some(&serde_json::to_value(&once).unwrap()));
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_totality_on_hostile_input() {
        let deep = format!("{}{}", "[".repeat(500), "]".repeat(500));
        let deep_object = format!("{}1{}", "{\"a\":".repeat(300), "}".repeat(300));
        let inputs = [
            String::new(),
            "{".into(),
            "}{".into(),
            "{{{{}}}}".into(),
            "{\"document_type\": }".into(),
            "\u{feff}{\"currency\":\"eur\"}".into(),
            deep,
            deep_object,
            r#"{"total_amount": 1e308, "etd": ["2024-01-01"], "eta": {"d": 1}}"#.into(),
        ];
        for raw in &inputs {
            assert_closed(&run(raw));
        }
    }

    #[test]
    fn test_overflowing_amount_only_nulls_that_field() {
        let record = run(r#"{"document_type":"Invoice","invoice_number":"INV-1","total_amount":1e400}"#);
        assert_eq!(record.document_type, DocumentType::Invoice);
        assert_eq!(record.invoice_number.as_deref(), Some("INV-1"));
        assert_eq!(record.total_amount, None);

        let digits = "9".repeat(400);
        let record = run(&format!(r#"{{"currency":"usd","total_amount":{digits}}}"#));
        assert_eq!(record.currency.as_deref(), Some("USD"));
        assert_eq!(record.total_amount, None);
    }

    #[test]
    fn test_deep_extra_key_is_ignored() {
        let deep = format!("{}{}", "[".repeat(200), "]".repeat(200));
        let record = run(&format!(r#"{{"document_type":"Bill","bill_number":"BL1","extra":{deep}}}"#));
        assert_eq!(record.document_type, DocumentType::Bill);
        assert_eq!(record.bill_number.as_deref(), Some("BL1"));
    }

    #[test]
    fn test_lone_surrogate_keeps_other_fields() {
        let record = run(r#"{"document_type":"CO","exporter_name":"A\ud800B","form_type":"Form E"}"#);
        assert_eq!(record.document_type, DocumentType::CertificateOfOrigin);
        assert_eq!(record.exporter_name.as_deref(), Some("A\u{fffd}B"));
        assert_eq!(record.form_type.as_deref(), Some("Form E"));
    }
}
