//! Stamping code images into a copy of the document
//!
//! The export runs on the caller's thread. Once per page it hands control to
//! an [`ExportHost`], which is where a UI repaints its progress indicator and
//! reports whether the user asked to cancel. Nothing is written to the
//! destination until every page has been stamped, and the final write goes
//! through a temporary file so the destination is either fully replaced or
//! left untouched.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use tempfile::NamedTempFile;

use crate::cancel::CancelToken;
use crate::codegen::{CodeImage, stamp_count};
use crate::document::{DocumentError, DocumentSource, OutputDocument, PdfPages};
use crate::geometry::NormalizedRect;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("nothing to export: no code images or no pages")]
    NothingToExport,

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("cannot write {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How an export ended when it did not fail
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExportOutcome {
    /// `pages` pages were stamped and the result written to `path`
    Completed { pages: usize, path: PathBuf },
    /// Stopped before page `completed`; nothing was written
    Cancelled { completed: usize },
}

/// Cooperative yield point of a running export
pub trait ExportHost {
    /// Called before each page. Returning `true` abandons the export.
    fn should_cancel(&mut self) -> bool;

    /// Called after each page
    fn progress(&mut self, _completed: usize, _total: usize) {}
}

impl ExportHost for CancelToken {
    fn should_cancel(&mut self) -> bool {
        self.is_cancelled()
    }
}

/// Host that reports progress through a closure and cancels via a token
pub struct ProgressHost<F> {
    cancel: CancelToken,
    on_progress: F,
}

impl<F: FnMut(usize, usize)> ProgressHost<F> {
    pub fn new(cancel: CancelToken, on_progress: F) -> Self {
        Self {
            cancel,
            on_progress,
        }
    }
}

impl<F: FnMut(usize, usize)> ExportHost for ProgressHost<F> {
    fn should_cancel(&mut self) -> bool {
        self.cancel.is_cancelled()
    }

    fn progress(&mut self, completed: usize, total: usize) {
        (self.on_progress)(completed, total);
    }
}

/// Build the accumulator an export writes into, never the opened document
/// itself.
///
/// A file-backed source is reopened fresh. In-memory sources, failed
/// reopens and reopens that disagree on the page count fall back to copying
/// every page of `original` into a new document.
pub fn prepare_output(
    source: &DocumentSource,
    original: &PdfPages,
) -> Result<PdfPages, DocumentError> {
    if source.is_reopenable() {
        match PdfPages::open(source) {
            Ok(fresh) if fresh.page_count() == original.page_count() => {
                debug!("Export output reopened from {}", source.describe());
                return Ok(fresh);
            }
            Ok(fresh) => warn!(
                "{} now has {} pages instead of {}, copying the opened document",
                source.describe(),
                fresh.page_count(),
                original.page_count()
            ),
            Err(e) => warn!("Reopening for export failed, copying the opened document: {e}"),
        }
    }
    original.copy_of()
}

/// Stamp `codes[i]` onto page `i` of `output` for the first
/// `min(codes, pages)` pages, then persist to `dest`.
pub fn run<O: OutputDocument>(
    mut output: O,
    selection: NormalizedRect,
    codes: &[CodeImage],
    dest: &Path,
    host: &mut impl ExportHost,
) -> Result<ExportOutcome, ExportError> {
    let count = stamp_count(codes.len(), output.page_count());
    if count == 0 {
        return Err(ExportError::NothingToExport);
    }
    info!("Exporting {count} pages to {}", dest.display());

    for (index, code) in codes[..count].iter().enumerate() {
        if host.should_cancel() {
            info!("Export cancelled before page {index} of {count}");
            return Ok(ExportOutcome::Cancelled { completed: index });
        }

        stamp_page(&mut output, index, &selection, code).inspect_err(|e| {
            error!("Export aborted on page {index}: {e}");
        })?;
        host.progress(index + 1, count);
    }

    persist(&mut output, dest).inspect_err(|e| error!("Export aborted: {e}"))?;
    info!("Export finished: {count} pages written to {}", dest.display());

    Ok(ExportOutcome::Completed {
        pages: count,
        path: dest.to_path_buf(),
    })
}

fn stamp_page<O: OutputDocument>(
    output: &mut O,
    index: usize,
    selection: &NormalizedRect,
    code: &CodeImage,
) -> Result<(), DocumentError> {
    let page = output.page_rect(index)?;
    let rect = selection.placement_on(&page);
    debug!("Page {index}: {} at {rect:?}", code.link);
    output.insert_image(index, rect, &code.image)
}

/// Write `output` next to `dest` and atomically move it into place
pub fn persist<O: OutputDocument + ?Sized>(output: &mut O, dest: &Path) -> Result<(), ExportError> {
    let persist_err = |source: std::io::Error| ExportError::Persist {
        path: dest.to_path_buf(),
        source,
    };

    let dir = dest
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(persist_err)?;

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        output.write_to(&mut writer)?;
        writer.flush().map_err(persist_err)?;
    }
    tmp.as_file().sync_all().map_err(persist_err)?;

    tmp.persist(dest).map_err(|e| persist_err(e.error))?;
    Ok(())
}
