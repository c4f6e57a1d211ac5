// src/analyzer.rs

use std::path::Path;
use std::sync::Arc;

use tracing::{Instrument, error, info, info_span, warn};

use crate::document::LogisticsDocumentResult;
use crate::llm_extract::TextGenerator;
use crate::ocr::{TesseractOcr, is_image_extension};
use crate::pdf_extract::{PdfContent, extract_text_from_pdf};
use crate::sink::Persistence;

/// Turns document text, PDFs and images into records, and hands every
/// produced record to the configured sinks.
pub struct DocumentAnalyzer {
    generator: Arc<dyn TextGenerator>,
    ocr: Option<TesseractOcr>,
    persistence: Persistence,
}

impl DocumentAnalyzer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        ocr: Option<TesseractOcr>,
        persistence: Persistence,
    ) -> Self {
        Self {
            generator,
            ocr,
            persistence,
        }
    }

    pub fn generator(&self) -> &dyn TextGenerator {
        self.generator.as_ref()
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    /// Never fails: blank input and generator errors give the empty record.
    /// Only records built from a generator reply are persisted.
    pub async fn analyze_text(&self, text: &str, file_name: Option<&str>) -> LogisticsDocumentResult {
        let span = info_span!("document", file = file_name.unwrap_or("-"));
        self.run(text, file_name).instrument(span).await
    }

    async fn run(&self, text: &str, file_name: Option<&str>) -> LogisticsDocumentResult {
        if text.trim().is_empty() {
            info!("No text to analyze");
            return LogisticsDocumentResult::empty();
        }

        let raw = match self.generator.generate(text).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(generator = %self.generator.describe(), error = %e, "Generation failed");
                return LogisticsDocumentResult::empty();
            }
        };

        let record = LogisticsDocumentResult::from_model_output(&raw);
        let (filled, total) = record.coverage();
        info!(
            document_type = record.document_type.as_str(),
            filled,
            total,
            "Document analyzed"
        );

        self.persistence
            .launch(record.clone(), file_name.map(str::to_string));
        record
    }

    pub async fn analyze_pdf(&self, pdf: Vec<u8>, file_name: Option<&str>) -> LogisticsDocumentResult {
        let text = self.pdf_text(pdf).await;
        self.analyze_text(&text, file_name).await
    }

    pub async fn analyze_image(
        &self,
        image: Vec<u8>,
        extension: &str,
        file_name: Option<&str>,
    ) -> LogisticsDocumentResult {
        let text = self.image_text(image, extension.to_string()).await;
        self.analyze_text(&text, file_name).await
    }

    /// Dispatch on the file extension. `file_name` defaults to the path's
    /// own file name.
    pub async fn analyze_file(
        &self,
        path: &Path,
        file_name: Option<&str>,
    ) -> std::io::Result<LogisticsDocumentResult> {
        let bytes = tokio::fs::read(path).await?;
        let default_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        let file_name = file_name.or(default_name.as_deref());
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let record = if extension == "pdf" {
            self.analyze_pdf(bytes, file_name).await
        } else if is_image_extension(&extension) {
            self.analyze_image(bytes, &extension, file_name).await
        } else {
            self.analyze_text(&String::from_utf8_lossy(&bytes), file_name)
                .await
        };
        Ok(record)
    }

    /// Text layer of a PDF, OCR for scanned ones. Empty when nothing usable
    /// comes out.
    async fn pdf_text(&self, pdf: Vec<u8>) -> String {
        let ocr = self.ocr.clone();
        let extracted = tokio::task::spawn_blocking(move || match extract_text_from_pdf(&pdf) {
            PdfContent::Text(text) => text,
            PdfContent::ScannedImage => match ocr {
                Some(ocr) => ocr.pdf_to_text(&pdf).unwrap_or_else(|e| {
                    warn!(error = %e, "OCR of scanned PDF failed");
                    String::new()
                }),
                None => {
                    warn!("Scanned PDF and OCR is disabled");
                    String::new()
                }
            },
            PdfContent::Error(e) => {
                warn!(error = %e, "Unreadable PDF");
                String::new()
            }
        })
        .await;

        extracted.unwrap_or_else(|e| {
            error!(error = %e, "PDF extraction task failed");
            String::new()
        })
    }

    async fn image_text(&self, image: Vec<u8>, extension: String) -> String {
        let Some(ocr) = self.ocr.clone() else {
            warn!("Image upload and OCR is disabled");
            return String::new();
        };
        let extracted =
            tokio::task::spawn_blocking(move || ocr.image_to_text(&image, &extension)).await;
        match extracted {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, "OCR failed");
                String::new()
            }
            Err(e) => {
                error!(error = %e, "OCR task failed");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentType;
    use crate::heuristics::HeuristicGenerator;
    use crate::llm_extract::LlmError;
    use crate::sink::DocumentSink;
    use crate::sink::testing::{FailingSink, MemorySink};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies with a fixed string, or fails when `reply` is `None`.
    struct StubGenerator {
        reply: Option<String>,
        calls: AtomicUsize,
    }

    impl StubGenerator {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for StubGenerator {
        async fn generate(&self, _document_text: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .clone()
                .ok_or_else(|| LlmError::Connection("refused".into()))
        }

        fn describe(&self) -> String {
            "stub".to_string()
        }
    }

    fn analyzer_with(
        generator: Arc<StubGenerator>,
        sinks: Vec<Arc<dyn DocumentSink>>,
    ) -> DocumentAnalyzer {
        DocumentAnalyzer::new(generator, None, Persistence::new(sinks))
    }

    const BILL_REPLY: &str = r#"Sure! {"document_type": "Bill", "bill_number": "BL123", "etd": "20/05/2024"}"#;

    #[tokio::test]
    async fn test_blank_text_skips_generator_and_sinks() {
        let generator = StubGenerator::replying(BILL_REPLY);
        let memory = Arc::new(MemorySink::default());
        let analyzer = analyzer_with(generator.clone(), vec![memory.clone() as Arc<dyn DocumentSink>]);

        let record = analyzer.analyze_text("  \n\t ", Some("blank.txt")).await;
        analyzer.persistence().drain().await;

        assert_eq!(record, LogisticsDocumentResult::empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert!(memory.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generator_failure_gives_empty_record() {
        let generator = StubGenerator::failing();
        let memory = Arc::new(MemorySink::default());
        let analyzer = analyzer_with(generator.clone(), vec![memory.clone() as Arc<dyn DocumentSink>]);

        let record = analyzer.analyze_text("INVOICE 42", None).await;
        analyzer.persistence().drain().await;

        assert_eq!(record, LogisticsDocumentResult::empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert!(memory.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_success_persists_once_per_sink() {
        let generator = StubGenerator::replying(BILL_REPLY);
        let memory = Arc::new(MemorySink::default());
        let sinks: Vec<Arc<dyn DocumentSink>> = vec![
            Arc::new(FailingSink) as Arc<dyn DocumentSink>,
            memory.clone() as Arc<dyn DocumentSink>,
        ];
        let analyzer = analyzer_with(generator, sinks);

        let record = analyzer.analyze_text("BILL OF LADING", Some("bl.pdf")).await;
        analyzer.persistence().drain().await;

        assert_eq!(record.document_type, DocumentType::Bill);
        assert_eq!(record.bill_number.as_deref(), Some("BL123"));
        assert_eq!(record.etd.as_deref(), Some("2024-05-20"));

        let rows = memory.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record, record);
        assert_eq!(rows[0].file_name.as_deref(), Some("bl.pdf"));
    }

    #[tokio::test]
    async fn test_unreadable_pdf_gives_empty_record() {
        let generator = StubGenerator::replying(BILL_REPLY);
        let analyzer = analyzer_with(generator.clone(), Vec::new());

        let record = analyzer
            .analyze_pdf(b"definitely not a pdf".to_vec(), Some("x.pdf"))
            .await;

        assert_eq!(record, LogisticsDocumentResult::empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_image_without_ocr_gives_empty_record() {
        let generator = StubGenerator::replying(BILL_REPLY);
        let analyzer = analyzer_with(generator.clone(), Vec::new());

        let record = analyzer.analyze_image(vec![0u8; 16], "png", None).await;

        assert_eq!(record, LogisticsDocumentResult::empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_analyze_text_file_with_heuristics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bl.txt");
        std::fs::write(
            &path,
            "BILL OF LADING\nB/L NO: MAEU123456\nVESSEL: EVER GIVEN\n\
             PORT OF LOADING: SHANGHAI\nPORT OF DISCHARGE: ROTTERDAM\n",
        )
        .unwrap();

        let memory = Arc::new(MemorySink::default());
        let analyzer = DocumentAnalyzer::new(
            Arc::new(HeuristicGenerator),
            None,
            Persistence::new(vec![memory.clone() as Arc<dyn DocumentSink>]),
        );

        let record = analyzer.analyze_file(&path, None).await.unwrap();
        analyzer.persistence().drain().await;

        assert_eq!(record.document_type, DocumentType::Bill);
        assert_eq!(record.vessel_name.as_deref(), Some("EVER GIVEN"));
        assert_eq!(record.port_of_loading.as_deref(), Some("SHANGHAI"));
        assert_eq!(record.port_of_discharge.as_deref(), Some("ROTTERDAM"));
        assert_eq!(memory.rows.lock().unwrap()[0].file_name.as_deref(), Some("bl.txt"));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let analyzer = analyzer_with(StubGenerator::replying("{}"), Vec::new());
        assert!(
            analyzer
                .analyze_file(Path::new("/nonexistent/doc.txt"), None)
                .await
                .is_err()
        );
    }
}
