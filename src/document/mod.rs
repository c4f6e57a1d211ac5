// src/document/mod.rs

mod coerce;
mod recover;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use coerce::coerce;
pub use recover::recover_json;

/// The three document kinds the generator is asked to detect, plus the
/// undetermined marker which serializes as `""`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DocumentType {
    Invoice,
    Bill,
    #[serde(rename = "CO")]
    CertificateOfOrigin,
    #[default]
    #[serde(rename = "")]
    Unknown,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Invoice => "Invoice",
            DocumentType::Bill => "Bill",
            DocumentType::CertificateOfOrigin => "CO",
            DocumentType::Unknown => "",
        }
    }

    /// Exact, case-sensitive match on the literal; no trimming here.
    pub fn from_literal(raw: &str) -> Self {
        match raw {
            "Invoice" => DocumentType::Invoice,
            "Bill" => DocumentType::Bill,
            "CO" => DocumentType::CertificateOfOrigin,
            _ => DocumentType::Unknown,
        }
    }
}

/// Sink column order for the 16 record fields.
pub const COLUMNS: [&str; 16] = [
    "document_type",
    "invoice_number",
    "total_amount",
    "currency",
    "issue_date",
    "supplier_name",
    "bill_number",
    "etd",
    "eta",
    "vessel_name",
    "port_of_loading",
    "port_of_discharge",
    "form_type",
    "exporter_name",
    "importer_name",
    "country_of_origin",
];

/// One extracted logistics document. Every field is always serialized,
/// `None` as `null`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LogisticsDocumentResult {
    pub document_type: DocumentType,
    pub invoice_number: Option<String>,
    pub total_amount: Option<f64>,
    pub currency: Option<String>,
    pub issue_date: Option<String>,
    pub supplier_name: Option<String>,
    pub bill_number: Option<String>,
    pub etd: Option<String>,
    pub eta: Option<String>,
    pub vessel_name: Option<String>,
    pub port_of_loading: Option<String>,
    pub port_of_discharge: Option<String>,
    pub form_type: Option<String>,
    pub exporter_name: Option<String>,
    pub importer_name: Option<String>,
    pub country_of_origin: Option<String>,
}

impl LogisticsDocumentResult {
    /// The all-null template: coercion base and universal fallback.
    pub const fn empty() -> Self {
        Self {
            document_type: DocumentType::Unknown,
            invoice_number: None,
            total_amount: None,
            currency: None,
            issue_date: None,
            supplier_name: None,
            bill_number: None,
            etd: None,
            eta: None,
            vessel_name: None,
            port_of_loading: None,
            port_of_discharge: None,
            form_type: None,
            exporter_name: None,
            importer_name: None,
            country_of_origin: None,
        }
    }

    /// Raw model output to record: recovery, then coercion.
    pub fn from_model_output(raw: &str) -> Self {
        coerce(recover_json(raw).as_ref())
    }

    /// How many of the 16 fields carry a value.
    pub fn coverage(&self) -> (usize, usize) {
        let filled = self
            .to_row()
            .iter()
            .filter(|cell| match cell {
                Value::String(s) => !s.is_empty(),
                Value::Null => false,
                _ => true,
            })
            .count();
        (filled, COLUMNS.len())
    }

    /// Cells in `COLUMNS` order. Null becomes an empty string, the amount
    /// stays numeric.
    pub fn to_row(&self) -> Vec<Value> {
        let Ok(Value::Object(fields)) = serde_json::to_value(self) else {
            return vec![Value::String(String::new()); COLUMNS.len()];
        };
        COLUMNS
            .iter()
            .map(|name| match fields.get(*name) {
                None | Some(Value::Null) => Value::String(String::new()),
                Some(cell) => cell.clone(),
            })
            .collect()
    }
}
