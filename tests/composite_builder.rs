use std::path::{Path, PathBuf};

use finalcopy::compose::{CompositeBuilder, CompositeEntry, CompositeStrategy, Package};
use finalcopy::extract::docx::docx_text;
use finalcopy::ItemStatus;

const PAGE_BREAK: &str = r#"w:type="page""#;

fn document_xml(path: &Path) -> String {
    Package::open(path)
        .unwrap()
        .part_str("word/document.xml")
        .unwrap()
}

fn source_docx(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let entries = [CompositeEntry::reference(body, "unused")];
    CompositeBuilder::new()
        .build(&entries, &path, CompositeStrategy::ReferenceOnly)
        .unwrap();
    path
}

#[test]
fn given_three_documents_when_referenced_then_labels_in_order_with_breaks_between() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("composite.docx");
    let entries: Vec<CompositeEntry> = ["Doc1", "Doc2", "Doc3"]
        .iter()
        .map(|label| CompositeEntry::reference(*label, format!("https://cdn.example.com/{}.docx", label)))
        .collect();

    let outcome = CompositeBuilder::new()
        .build(&entries, &output, CompositeStrategy::ReferenceOnly)
        .unwrap();

    let text = docx_text(&outcome.output).unwrap();
    let positions: Vec<usize> = ["Doc1", "Doc2", "Doc3"]
        .iter()
        .map(|label| text.find(label).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    assert!(text.contains("URL: https://cdn.example.com/Doc2.docx"));

    let xml = document_xml(&output);
    assert_eq!(xml.matches(PAGE_BREAK).count(), 2);
    let last_break = xml.rfind(PAGE_BREAK).unwrap();
    assert!(last_break < xml.rfind("Doc3").unwrap());
}

#[test]
fn given_native_separators_when_spliced_then_content_follows_each_label() {
    let dir = tempfile::tempdir().unwrap();
    let first = source_docx(dir.path(), "affidavit.docx", "Sworn statement body");
    let second = source_docx(dir.path(), "cover-letter.docx", "Dear officer");
    let entries = vec![
        CompositeEntry::new("Affidavit", "affidavit.docx", Some(first)),
        CompositeEntry::new("Cover letter", "cover-letter.docx", Some(second)),
    ];

    let output = dir.path().join("composite.docx");
    let outcome = CompositeBuilder::new()
        .build(&entries, &output, CompositeStrategy::NativeSeparators)
        .unwrap();

    assert!(outcome.items.iter().all(|i| i.status == ItemStatus::Included));
    let text = docx_text(&output).unwrap();
    let order = ["Affidavit", "Sworn statement body", "Cover letter", "Dear officer"];
    let positions: Vec<usize> = order.iter().map(|s| text.find(s).unwrap()).collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn given_native_covers_when_entry_is_not_docx_then_it_is_skipped_and_build_completes() {
    let dir = tempfile::tempdir().unwrap();
    let letter = source_docx(dir.path(), "letter.docx", "Letter body");
    let scan = dir.path().join("scan.pdf");
    std::fs::write(&scan, b"%PDF-1.4").unwrap();
    let entries = vec![
        CompositeEntry::new("Scan", "scan.pdf", Some(scan)),
        CompositeEntry::new("Letter", "letter.docx", Some(letter)),
        CompositeEntry::new("Missing", "https://cdn.example.com/missing.docx", None),
    ];

    let output = dir.path().join("composite.docx");
    let outcome = CompositeBuilder::new()
        .build(&entries, &output, CompositeStrategy::NativeCovers)
        .unwrap();

    assert!(matches!(outcome.items[0].status, ItemStatus::Skipped { .. }));
    assert_eq!(outcome.items[1].status, ItemStatus::Included);
    assert!(matches!(outcome.items[2].status, ItemStatus::Skipped { .. }));

    let text = docx_text(&output).unwrap();
    assert!(text.contains("Letter body"));
    assert!(!text.contains("Scan"));
}

#[test]
fn given_text_extraction_when_format_unknown_then_marker_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let notes = dir.path().join("notes.txt");
    std::fs::write(&notes, "Entered the US on 2019-05-04").unwrap();
    let archive = dir.path().join("bundle.zip");
    std::fs::write(&archive, b"PK\x03\x04").unwrap();
    let entries = vec![
        CompositeEntry::new("Travel notes", "notes.txt", Some(notes)),
        CompositeEntry::new("Bundle", "bundle.zip", Some(archive)),
    ];

    let output = dir.path().join("composite.docx");
    CompositeBuilder::new()
        .build(&entries, &output, CompositeStrategy::TextExtraction)
        .unwrap();

    let text = docx_text(&output).unwrap();
    assert!(text.contains("Entered the US on 2019-05-04"));
    assert!(text.contains("[unsupported file type]"));
}
