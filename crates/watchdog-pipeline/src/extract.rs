//! PDF text extraction with OCR fallback (spec.md §4.D "Extract").

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Multi-page PDFs extracting fewer than this many characters are
/// considered text-layer failures and queued for OCR (spec.md §8 boundary
/// behavior #10: 23 chars from a 6-page PDF triggers the fallback).
pub const OCR_TRIGGER_MIN_CHARS: usize = 100;

/// Extract text from PDF bytes with `pdf-extract`.
///
/// `pdf-extract` has been observed to panic on malformed PDFs from
/// small-municipality document management systems; since one bad cached
/// file must never take a worker down, panics are caught and turned into an
/// `Err` the same way the teacher's PDF path contains them.
pub fn pdf_to_text(bytes: &[u8]) -> Result<String, String> {
    use std::cell::Cell;
    use std::sync::OnceLock;

    thread_local! {
        static SUPPRESS_PANIC_HOOK: Cell<bool> = const { Cell::new(false) };
    }
    static HOOK_INSTALLED: OnceLock<()> = OnceLock::new();
    HOOK_INSTALLED.get_or_init(|| {
        let prev = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let suppressed = SUPPRESS_PANIC_HOOK.with(|c| c.get());
            if !suppressed {
                prev(info);
            }
        }));
    });

    struct SuppressGuard;
    impl Drop for SuppressGuard {
        fn drop(&mut self) {
            SUPPRESS_PANIC_HOOK.with(|c| c.set(false));
        }
    }

    let result = std::panic::catch_unwind(|| {
        SUPPRESS_PANIC_HOOK.with(|c| c.set(true));
        let _guard = SuppressGuard;

        #[cfg(test)]
        {
            if bytes.starts_with(b"WATCHDOG_TEST_PDF_EXTRACT_PANIC") {
                panic!("simulated pdf-extract panic");
            }
        }
        pdf_extract::extract_text_from_mem(bytes)
    });

    match result {
        Ok(inner) => inner.map_err(|e| e.to_string()),
        Err(_) => Err("pdf_extract_panicked".to_string()),
    }
}

/// Whether a page count/char count pair should fall back to OCR. A
/// single-page PDF extracting little text is plausibly just a short notice;
/// the spec's trigger is specifically about multi-page documents.
pub fn needs_ocr(page_count: u32, extracted_chars: usize) -> bool {
    page_count > 1 && extracted_chars < OCR_TRIGGER_MIN_CHARS
}

/// Rough page count from a PDF's `/Type /Page` object occurrences. Good
/// enough for the OCR-trigger heuristic; an exact page count would require
/// a full object-graph walk this pipeline doesn't otherwise need.
pub fn estimate_page_count(bytes: &[u8]) -> u32 {
    let needle = b"/Type/Page";
    let needle_spaced = b"/Type /Page";
    let mut count = 0u32;
    let mut i = 0usize;
    while i + needle.len() <= bytes.len() {
        if &bytes[i..i + needle.len()] == needle || (i + needle_spaced.len() <= bytes.len() && &bytes[i..i + needle_spaced.len()] == needle_spaced) {
            count += 1;
        }
        i += 1;
    }
    count.max(1)
}

fn run_stdout_bounded(mut cmd: Command, timeout: Duration, max_stdout_bytes: usize) -> Result<Vec<u8>, &'static str> {
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::null());

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            "tesseract_not_found"
        } else {
            "tesseract_spawn_failed"
        }
    })?;

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().map_err(|_| "tesseract_wait_failed")? {
            if !status.success() {
                return Err("tesseract_nonzero_exit");
            }
            break;
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err("tesseract_timeout");
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    let mut stdout = child.stdout.take().ok_or("tesseract_no_stdout")?;
    let mut buf = Vec::new();
    std::io::Read::read_to_end(&mut stdout, &mut buf).map_err(|_| "tesseract_read_failed")?;
    buf.truncate(max_stdout_bytes);
    Ok(buf)
}

/// Run the file (a rendered image, or a PDF `tesseract` can rasterize
/// itself) through Tesseract with the Finnish language pack. Bounded by a
/// timeout (spec.md §5: 300s per file) and an output cap.
pub fn tesseract_ocr(bytes: &[u8], timeout: Duration, max_chars: usize) -> Result<String, &'static str> {
    if which::find("tesseract").is_none() {
        return Err("tesseract_not_found");
    }

    let mut tmp = tempfile::Builder::new()
        .prefix("watchdog-ocr-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|_| "tesseract_tempfile_failed")?;
    tmp.write_all(bytes).map_err(|_| "tesseract_tempfile_write_failed")?;
    let in_path = tmp.path().to_string_lossy().to_string();

    let max_stdout_bytes = max_chars.saturating_mul(4).clamp(1_000, 4_000_000);
    let mut cmd = Command::new("tesseract");
    cmd.arg(&in_path).arg("stdout").arg("-l").arg("fin");
    let out = run_stdout_bounded(cmd, timeout, max_stdout_bytes)?;
    let text = String::from_utf8_lossy(&out).to_string();
    let clipped: String = text.chars().take(max_chars).collect();
    if clipped.chars().any(|c| !c.is_whitespace()) {
        Ok(clipped)
    } else {
        Err("tesseract_empty_output")
    }
}

/// Minimal `PATH` lookup; avoids a dependency purely for an existence check.
mod which {
    use std::path::PathBuf;

    pub fn find(bin: &str) -> Option<PathBuf> {
        let path = std::env::var_os("PATH")?;
        for dir in std::env::split_paths(&path) {
            let candidate = dir.join(bin);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }
}
