//! End-to-end integration tests for ocr-rename.
//!
//! The review → rename → undo flow runs on temporary directories and needs
//! no network. Tests that call a live VLM are gated behind `E2E_ENABLED` and
//! read scans from `./test_cases/`.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture
//!
//! Live tests:
//!   E2E_ENABLED=1 ANTHROPIC_API_KEY=... cargo test --test e2e -- --nocapture

use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LLMResponse};
use ocr_rename::review::{self, Approval, ReviewEntry};
use ocr_rename::{analyze_directory, rename, AnalysisProgressCallback, AnalyzeConfig, RenameStatus};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// Skip this test unless E2E_ENABLED is set and `path` exists.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP — test path not found: {}", p.display());
            return;
        }
        p
    }};
}

fn fake_pdf(dir: &Path, name: &str) {
    fs::write(dir.join(name), b"%PDF-1.4\n%%EOF\n").unwrap();
}

fn row(original: &str, title: &str, author: &str, confidence: f64) -> ReviewEntry {
    let meta = ocr_rename::BookMetadata {
        title: title.into(),
        author: author.into(),
        language: "English".into(),
        confidence,
        edition: String::new(),
        notes: String::new(),
    };
    review::make_entry(original, &meta, 0.8)
}

/// A blank one-page PDF with a correct xref table.
fn one_page_pdf(dir: &Path, name: &str) {
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>",
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 300] >>",
    ];
    let mut pdf = String::from("%PDF-1.4\n");
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, body));
    }
    let xref = pdf.len();
    pdf.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1));
    for off in offsets {
        pdf.push_str(&format!("{off:010} 00000 n \n"));
    }
    pdf.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n",
        objects.len() + 1
    ));
    fs::write(dir.join(name), pdf).unwrap();
}

/// Offline vision model: always answers `reply`, reports fixed usage and
/// records how many calls overlapped.
struct StubProvider {
    reply: String,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubProvider {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LLMProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn model(&self) -> &str {
        "stub-vision"
    }

    fn max_context_length(&self) -> usize {
        200_000
    }

    async fn complete(&self, _prompt: &str) -> edgequake_llm::Result<LLMResponse> {
        self.chat(&[], None).await
    }

    async fn complete_with_options(
        &self,
        _prompt: &str,
        _options: &CompletionOptions,
    ) -> edgequake_llm::Result<LLMResponse> {
        self.chat(&[], None).await
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _options: Option<&CompletionOptions>,
    ) -> edgequake_llm::Result<LLMResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(LLMResponse::new(self.reply.clone(), "stub-vision").with_usage(100, 20))
    }
}

#[derive(Default)]
struct CountingCallback {
    started: AtomicUsize,
    completed: AtomicUsize,
    errors: AtomicUsize,
}

impl AnalysisProgressCallback for CountingCallback {
    fn on_file_start(&self, _file: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_file_complete(&self, _file: &str, _title: &str, _confidence: f64) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_file_error(&self, _file: &str, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

fn names_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ── Offline workflow tests ───────────────────────────────────────────────────

#[test]
fn test_review_rename_undo_round_trip() {
    let scans = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    fake_pdf(scans.path(), "scan_001.pdf");
    fake_pdf(scans.path(), "scan_002.pdf");
    fake_pdf(scans.path(), "scan_003.pdf");

    let entries = vec![
        row("scan_001.pdf", "Dune", "Frank Herbert", 0.95),
        row("scan_002.pdf", "مقدمة ابن خلدون", "ابن خلدون", 0.9),
        row("scan_003.pdf", "Blurry", "Unknown", 0.3),
    ];
    let csv = review::write_review_csv(&entries, out.path()).unwrap();
    assert!(csv
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("review_"));

    let read_back = review::read_review_csv(&csv).unwrap();
    assert_eq!(read_back, entries);

    let report = rename::rename_files(scans.path(), &read_back, false, out.path()).unwrap();
    assert_eq!(report.renamed, 2);
    assert_eq!(report.errors, 0);
    assert_eq!(
        names_in(scans.path()),
        vec![
            "Dune - Frank Herbert.pdf".to_string(),
            "scan_003.pdf".to_string(),
            "مقدمة ابن خلدون - ابن خلدون.pdf".to_string(),
        ]
    );

    let log_path = report.log_path.expect("log must be written");
    let log_text = fs::read_to_string(&log_path).unwrap();
    assert!(log_text.contains("ابن خلدون"), "log keeps non-ASCII text");

    let log = rename::read_log(&log_path).unwrap();
    assert!(log.iter().all(|e| e.status == RenameStatus::Renamed));

    let undo = rename::apply_undo(&log, scans.path()).unwrap();
    assert_eq!(undo.reversed.len(), 2);
    assert!(undo.errors.is_empty());
    assert_eq!(
        names_in(scans.path()),
        vec!["scan_001.pdf", "scan_002.pdf", "scan_003.pdf"]
    );
}

/// A reviewer's spreadsheet: BOM, a decimal comma, a padded "YES" and a
/// name fixed by hand without an extension.
#[test]
fn test_hand_edited_csv_is_accepted() {
    let scans = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    fake_pdf(scans.path(), "a.pdf");
    fake_pdf(scans.path(), "b.pdf");

    let csv = out.path().join("edited.csv");
    let mut body = b"\xEF\xBB\xBF".to_vec();
    body.extend_from_slice(
        "original_filename,suggested_title,suggested_author,new_filename,confidence,approve,language,edition,notes\n\
         a.pdf,Emma,Jane Austen,Emma - Jane Austen,\"0,92\", YES ,English,,\n\
         b.pdf,Persuasion,Jane Austen,Persuasion.pdf,0.4,review,English,,\n"
            .as_bytes(),
    );
    fs::write(&csv, body).unwrap();

    let entries = review::read_review_csv(&csv).unwrap();
    assert_eq!(entries[0].approve, Approval::Yes);
    assert!((entries[0].confidence - 0.92).abs() < 1e-9);
    assert_eq!(entries[1].approve, Approval::Review);

    let report = rename::rename_files(scans.path(), &entries, false, out.path()).unwrap();
    assert_eq!(report.renamed, 1);
    assert!(scans.path().join("Emma - Jane Austen.pdf").exists());
    assert!(scans.path().join("b.pdf").exists());
}

#[test]
fn test_duplicate_titles_get_suffixes() {
    let scans = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    fake_pdf(scans.path(), "Dune - Frank Herbert.pdf");
    fake_pdf(scans.path(), "copy1.pdf");
    fake_pdf(scans.path(), "copy2.pdf");

    let entries = vec![
        row("copy1.pdf", "Dune", "Frank Herbert", 0.9),
        row("copy2.pdf", "DUNE", "FRANK HERBERT", 0.9),
    ];
    let report = rename::rename_files(scans.path(), &entries, false, out.path()).unwrap();
    assert_eq!(report.renamed, 2);

    let news: Vec<&str> = report.log.iter().map(|e| e.new.as_str()).collect();
    assert_eq!(news, vec!["Dune - Frank Herbert (2).pdf", "DUNE - FRANK HERBERT (3).pdf"]);
    assert!(scans.path().join("Dune - Frank Herbert.pdf").exists());
}

#[test]
fn test_dry_run_then_real_run() {
    let scans = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    fake_pdf(scans.path(), "x.pdf");
    let entries = vec![row("x.pdf", "Walden", "Henry David Thoreau", 0.99)];

    let dry = rename::rename_files(scans.path(), &entries, true, out.path()).unwrap();
    assert_eq!(dry.log[0].status, RenameStatus::DryRun);
    assert_eq!(names_in(scans.path()), vec!["x.pdf"]);
    assert!(names_in(out.path()).is_empty(), "dry run writes no log");

    let real = rename::rename_files(scans.path(), &entries, false, out.path()).unwrap();
    assert_eq!(real.renamed, 1);
    assert_eq!(names_in(scans.path()), vec!["Walden - Henry David Thoreau.pdf"]);
    assert_eq!(names_in(out.path()).len(), 1);
}

#[test]
fn test_sentinel_rows_are_never_renamed() {
    let scans = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    fake_pdf(scans.path(), "broken.pdf");

    let entries = vec![ocr_rename::analyze::failed_entry(
        "broken.pdf",
        review::ERROR_TITLE,
        "Render failed",
    )];
    assert_eq!(entries[0].approve, Approval::Review);

    let report = rename::rename_files(scans.path(), &entries, false, out.path()).unwrap();
    assert!(report.log.is_empty());
    assert_eq!(names_in(scans.path()), vec!["broken.pdf"]);
}

/// A title with dots and a question mark survives sanitising and renaming.
#[test]
fn test_title_with_ellipsis_is_renamed() {
    let scans = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    fake_pdf(scans.path(), "scan.pdf");

    let entries = vec![row("scan.pdf", "Wait... What?", "Ann Smith", 0.95)];
    assert_eq!(entries[0].new_filename, "Wait... What - Ann Smith.pdf");

    let report = rename::rename_files(scans.path(), &entries, false, out.path()).unwrap();
    assert_eq!(report.renamed, 1);
    assert!(report.skipped.is_empty());
    assert_eq!(names_in(scans.path()), vec!["Wait... What - Ann Smith.pdf"]);
}

/// Arabic letters take two bytes each; the name must still fit in 255 bytes,
/// suffix included.
#[test]
fn test_long_arabic_titles_fit_the_filesystem() {
    let scans = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    fake_pdf(scans.path(), "a.pdf");
    fake_pdf(scans.path(), "b.pdf");

    let title = "الجامع الصحيح المسند من حديث رسول الله وسننه وأيامه ".repeat(6);
    let entries = vec![
        row("a.pdf", &title, "محمد بن إسماعيل البخاري", 0.95),
        row("b.pdf", &title, "محمد بن إسماعيل البخاري", 0.95),
    ];
    let report = rename::rename_files(scans.path(), &entries, false, out.path()).unwrap();
    assert_eq!(report.renamed, 2, "{report:?}");
    assert_eq!(report.errors, 0);
    for name in names_in(scans.path()) {
        assert!(name.len() <= 255, "{} bytes: {name}", name.len());
    }
    assert!(report.log[1].new.ends_with(" (2).pdf"));
}

/// Two rename runs in the same second keep both logs, so both are undoable.
#[test]
fn test_back_to_back_renames_keep_both_logs() {
    let scans = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    fake_pdf(scans.path(), "one.pdf");
    fake_pdf(scans.path(), "two.pdf");

    let first = rename::rename_files(
        scans.path(),
        &[row("one.pdf", "Emma", "Jane Austen", 0.9)],
        false,
        out.path(),
    )
    .unwrap();
    let second = rename::rename_files(
        scans.path(),
        &[row("two.pdf", "Persuasion", "Jane Austen", 0.9)],
        false,
        out.path(),
    )
    .unwrap();
    assert_ne!(first.log_path, second.log_path);
    assert_eq!(names_in(out.path()).len(), 2);

    let log = rename::read_log(first.log_path.as_ref().unwrap()).unwrap();
    let undo = rename::apply_undo(&log, scans.path()).unwrap();
    assert_eq!(undo.reversed.len(), 1);
    assert!(scans.path().join("one.pdf").exists());
}

/// With every file covered by an earlier CSV, resume returns before any
/// provider is resolved.
#[tokio::test]
async fn test_resume_skips_processed_files() {
    let scans = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    fake_pdf(scans.path(), "one.pdf");
    fake_pdf(scans.path(), "two.pdf");

    review::write_review_csv(
        &[
            row("one.pdf", "One", "A", 0.9),
            row("two.pdf", "Two", "B", 0.5),
        ],
        out.path(),
    )
    .unwrap();

    let config = AnalyzeConfig::builder()
        .output_dir(out.path())
        .resume(true)
        .build()
        .unwrap();
    let output = analyze_directory(scans.path(), &config).await.unwrap();

    assert!(output.entries.is_empty());
    assert_eq!(output.stats.total_files, 2);
    assert_eq!(output.stats.skipped_files, 2);
}

#[tokio::test]
async fn test_analyze_missing_directory() {
    let config = AnalyzeConfig::default();
    let err = analyze_directory(Path::new("/definitely/not/here"), &config)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ocr_rename::OcrRenameError::DirectoryNotFound { .. }
    ));
}

#[tokio::test]
async fn test_analyze_empty_directory() {
    let scans = tempfile::tempdir().unwrap();
    fs::write(scans.path().join("notes.txt"), "not a pdf").unwrap();
    let err = analyze_directory(scans.path(), &AnalyzeConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ocr_rename::OcrRenameError::NoPdfFiles { .. }));
}

/// Broken files fan out concurrently and each becomes an ERROR row without
/// reaching the model or aborting the run.
#[tokio::test]
async fn test_analyze_with_stub_provider_turns_failures_into_rows() {
    let scans = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    for name in ["d.pdf", "b.pdf", "a.pdf", "c.pdf"] {
        fs::write(scans.path().join(name), b"not a pdf at all").unwrap();
    }

    let stub = StubProvider::new(r#"{"title": "Dune"}"#);
    let callback = Arc::new(CountingCallback::default());
    let config = AnalyzeConfig::builder()
        .provider(stub.clone())
        .concurrency(3)
        .output_dir(out.path())
        .progress_callback(callback.clone())
        .build()
        .unwrap();

    let output = analyze_directory(scans.path(), &config).await.unwrap();

    let names: Vec<&str> = output
        .entries
        .iter()
        .map(|e| e.original_filename.as_str())
        .collect();
    assert_eq!(names, vec!["a.pdf", "b.pdf", "c.pdf", "d.pdf"]);
    for e in &output.entries {
        assert_eq!(e.suggested_title, review::ERROR_TITLE);
        assert_eq!(e.approve, Approval::Review);
    }
    assert_eq!(output.stats.total_files, 4);
    assert_eq!(output.stats.failed_files, 4);
    assert_eq!(output.stats.analyzed_files, 0);
    assert_eq!(output.stats.total_input_tokens, 0);
    assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    assert_eq!(callback.started.load(Ordering::SeqCst), 4);
    assert_eq!(callback.errors.load(Ordering::SeqCst), 4);
}

/// Full real-time path against the stub: render, encode, call, parse, then
/// rename. Needs a pdfium library on this machine.
#[tokio::test]
async fn test_analyze_with_stub_provider_end_to_end() {
    if ocr_rename::pipeline::render::bind_pdfium().is_err() {
        println!("SKIP — no pdfium library available");
        return;
    }
    let scans = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    for name in ["p1.pdf", "p2.pdf", "p3.pdf", "p4.pdf", "p5.pdf"] {
        one_page_pdf(scans.path(), name);
    }
    fs::write(scans.path().join("broken.pdf"), b"garbage").unwrap();

    let stub = StubProvider::new(
        "```json\n{\"title\": \"Dune\", \"author\": \"Frank Herbert\", \"confidence\": 0.95, \"edition\": 2}\n```",
    );
    let config = AnalyzeConfig::builder()
        .provider(stub.clone())
        .model("claude-haiku-4-5-20251001")
        .concurrency(3)
        .max_pages(1)
        .requests_per_minute(6000)
        .output_dir(out.path())
        .build()
        .unwrap();

    let output = analyze_directory(scans.path(), &config).await.unwrap();

    assert_eq!(stub.calls.load(Ordering::SeqCst), 5);
    assert!(stub.max_in_flight.load(Ordering::SeqCst) <= 3);
    assert_eq!(output.stats.analyzed_files, 5);
    assert_eq!(output.stats.failed_files, 1);
    assert_eq!(output.stats.total_input_tokens, 500);
    assert_eq!(output.stats.total_output_tokens, 100);
    assert_eq!(output.stats.total_retries, 0);
    assert!(output.stats.estimated_cost_usd.is_some());

    assert_eq!(output.entries[0].original_filename, "broken.pdf");
    assert_eq!(output.entries[0].suggested_title, review::ERROR_TITLE);
    for e in &output.entries[1..] {
        assert_eq!(e.new_filename, "Dune - Frank Herbert.pdf");
        assert_eq!(e.edition, "2");
        assert_eq!(e.approve, Approval::Yes);
    }

    let report = rename::rename_files(scans.path(), &output.entries, false, out.path()).unwrap();
    assert_eq!(report.renamed, 5);
    assert!(scans.path().join("Dune - Frank Herbert (5).pdf").exists());
    assert!(scans.path().join("broken.pdf").exists());
}

#[test]
fn test_noop_callback_is_send_sync() {
    use ocr_rename::NoopProgressCallback;

    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<NoopProgressCallback>();

    let cb: Arc<dyn AnalysisProgressCallback> = Arc::new(NoopProgressCallback);
    cb.on_file_error("x.pdf", "an error");
}

// ── Live VLM tests (need API key) ────────────────────────────────────────────

/// Identify the scans in `test_cases/books/` and check every row is usable.
#[tokio::test]
async fn test_live_analyze_books() {
    let dir = e2e_skip_unless_ready!(test_cases_dir().join("books"));
    let out = tempfile::tempdir().unwrap();

    let config = AnalyzeConfig::builder()
        .max_pages(2)
        .concurrency(2)
        .output_dir(out.path())
        .build()
        .unwrap();
    let output = analyze_directory(&dir, &config)
        .await
        .expect("analysis should succeed");

    assert_eq!(output.entries.len(), output.stats.total_files);
    for e in &output.entries {
        assert!(e.new_filename.ends_with(".pdf"), "{e:?}");
        assert!((0.0..=1.0).contains(&e.confidence), "{e:?}");
    }
    assert!(output.stats.total_input_tokens > 0);

    let csv = review::write_review_csv(&output.entries, out.path()).unwrap();
    println!("Review CSV: {}", csv.display());
    for e in &output.entries {
        println!("{} → {} ({:.2})", e.original_filename, e.new_filename, e.confidence);
    }
}

/// Batch status against the live API for an id given in `E2E_BATCH_ID`.
#[tokio::test]
async fn test_live_batch_status() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
        return;
    }
    let Ok(id) = std::env::var("E2E_BATCH_ID") else {
        println!("SKIP — E2E_BATCH_ID not set");
        return;
    };
    let client = ocr_rename::BatchClient::from_env().expect("ANTHROPIC_API_KEY must be set");
    let batch = client.retrieve(&id).await.expect("status should succeed");
    assert_eq!(batch.id, id);
    println!("{batch:?}");
}
