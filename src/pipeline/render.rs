//! PDF page counting and single-page rasterisation via pdfium.
//!
//! pdfium keeps thread-local state and blocks, so every call hops onto the
//! blocking pool with `spawn_blocking`. Each call binds pdfium afresh; the
//! bind is cheap next to a network round trip and keeps workers independent.

use crate::error::AttemptError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

fn bind(lib_dir: Option<&Path>) -> Result<Pdfium, PdfiumError> {
    let bindings = match lib_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }?;
    Ok(Pdfium::new(bindings))
}

/// Page count of the PDF at `path`, or `None` if pdfium cannot open it.
pub async fn page_count(path: &Path, lib_dir: Option<&Path>) -> Option<usize> {
    let path = path.to_path_buf();
    let lib_dir = lib_dir.map(Path::to_path_buf);

    let counted = tokio::task::spawn_blocking(move || -> Result<usize, String> {
        let pdfium = bind(lib_dir.as_deref()).map_err(|e| format!("{e:?}"))?;
        let document = pdfium
            .load_pdf_from_file(&path, None)
            .map_err(|e| format!("{e:?}"))?;
        Ok(document.pages().len() as usize)
    })
    .await;

    match counted {
        Ok(Ok(n)) => Some(n),
        Ok(Err(detail)) => {
            debug!("Page-count lookup failed: {}", detail);
            None
        }
        Err(e) => {
            debug!("Page-count lookup panicked: {}", e);
            None
        }
    }
}

/// Rasterise page `page` (1-based), capping the longest edge at `max_pixels`.
pub async fn render_page(
    path: &Path,
    page: usize,
    max_pixels: u32,
    lib_dir: Option<&Path>,
) -> Result<DynamicImage, AttemptError> {
    let path = path.to_path_buf();
    let lib_dir = lib_dir.map(Path::to_path_buf);

    tokio::task::spawn_blocking(move || render_page_blocking(&path, page, max_pixels, lib_dir))
        .await
        .map_err(|e| AttemptError::Render {
            page,
            detail: format!("render task panicked: {e}"),
        })?
}

fn render_page_blocking(
    path: &Path,
    page: usize,
    max_pixels: u32,
    lib_dir: Option<PathBuf>,
) -> Result<DynamicImage, AttemptError> {
    let fail = |detail: String| AttemptError::Render { page, detail };

    let pdfium = bind(lib_dir.as_deref()).map_err(|e| fail(format!("pdfium bind: {e:?}")))?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| fail(format!("{e:?}")))?;

    let pages = document.pages();
    let total = pages.len() as usize;
    if page == 0 || page > total {
        return Err(fail(format!("page out of range (document has {total} pages)")));
    }

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let pdf_page = pages
        .get((page - 1) as u16)
        .map_err(|e| fail(format!("{e:?}")))?;
    let bitmap = pdf_page
        .render_with_config(&render_config)
        .map_err(|e| fail(format!("{e:?}")))?;

    let image = bitmap.as_image();
    debug!(
        "Rendered {} page {} → {}x{} px",
        path.display(),
        page,
        image.width(),
        image.height()
    );
    Ok(image)
}
