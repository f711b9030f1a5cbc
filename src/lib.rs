pub mod cancel;
pub mod codegen;
pub mod document;
pub mod export;
pub mod geometry;
pub mod notification;
pub mod panic_handler;
pub mod selection;
pub mod session;
pub mod settings;
pub mod thumbnail;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cancel::CancelToken;
pub use codegen::{CodeImage, EncodingError, QrCodeGenerator};
pub use document::{DocumentError, DocumentSource, OutputDocument, PageSource, PdfPages};
pub use export::{ExportError, ExportHost, ExportOutcome};
pub use geometry::{NormalizedRect, PageRect, PixelPoint};
pub use selection::{PointerEvent, SelectionModel};
pub use session::{Session, SessionError, SessionEvent, ThumbnailPlan, ViewCommand};
pub use settings::Settings;
pub use thumbnail::{ThumbnailEvent, ThumbnailPipeline};
