use lopdf::Document as LoDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningCode {
    LoadFailed,
    NoPages,
    Encrypted,
    MissingMediaBox,
    UnexpectedVersion,
}

impl WarningCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::LoadFailed => "LOAD_FAILED",
            WarningCode::NoPages => "NO_PAGES",
            WarningCode::Encrypted => "ENCRYPTED",
            WarningCode::MissingMediaBox => "MISSING_MEDIABOX",
            WarningCode::UnexpectedVersion => "UNEXPECTED_VERSION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionWarning {
    pub code: WarningCode,
    pub message: String,
}

impl std::fmt::Display for InspectionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectionReport {
    pub pdf_version: String,
    pub page_count: usize,
    pub encrypted: bool,
    pub file_size_bytes: usize,
    pub warnings: Vec<InspectionWarning>,
}

impl InspectionReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

// Validation pass over generated bytes. Never fails: anything lopdf rejects
// or any structural surprise lands in `warnings` with a machine-readable
// code, and callers archiving documents decide what to do with it.
pub fn inspect_pdf_bytes(bytes: &[u8]) -> InspectionReport {
    let mut report = InspectionReport {
        file_size_bytes: bytes.len(),
        ..Default::default()
    };

    let pdf = match LoDocument::load_mem(bytes) {
        Ok(pdf) => pdf,
        Err(err) => {
            report.warnings.push(InspectionWarning {
                code: WarningCode::LoadFailed,
                message: err.to_string(),
            });
            return report;
        }
    };

    report.pdf_version = pdf.version.clone();
    report.page_count = pdf.get_pages().len();
    report.encrypted = pdf.is_encrypted();

    if report.pdf_version != "1.4" {
        report.warnings.push(InspectionWarning {
            code: WarningCode::UnexpectedVersion,
            message: format!("expected version 1.4, found {}", report.pdf_version),
        });
    }
    if report.encrypted {
        report.warnings.push(InspectionWarning {
            code: WarningCode::Encrypted,
            message: "document is encrypted".to_string(),
        });
    }
    if report.page_count == 0 {
        report.warnings.push(InspectionWarning {
            code: WarningCode::NoPages,
            message: "document has no pages".to_string(),
        });
    }

    for (page_number, page_id) in pdf.get_pages() {
        if !has_media_box(&pdf, page_id) {
            report.warnings.push(InspectionWarning {
                code: WarningCode::MissingMediaBox,
                message: format!("page {} has no MediaBox", page_number),
            });
        }
    }

    report
}

// MediaBox may be inherited from the page tree; walk Parent links with a
// bounded depth so a cyclic tree cannot hang the inspection.
fn has_media_box(pdf: &LoDocument, page_id: lopdf::ObjectId) -> bool {
    let mut current = Some(page_id);
    for _ in 0..8 {
        let Some(id) = current else {
            return false;
        };
        let Ok(dict) = pdf.get_object(id).and_then(|obj| obj.as_dict()) else {
            return false;
        };
        if dict.get(b"MediaBox").is_ok() {
            return true;
        }
        current = dict
            .get(b"Parent")
            .and_then(|obj| obj.as_reference())
            .ok();
    }
    false
}
