// Counts and sizes filled in during one generation call, returned by the
// *_with_metrics variants and logged when the debug logger is enabled.
#[derive(Debug, Clone, Default)]
pub struct DocumentMetrics {
    pub png_width: u32,
    pub png_height: u32,
    pub image_bytes_deflated: usize,
    pub content_stream_bytes: usize,
    pub object_count: usize,
    pub pdf_bytes: usize,
    pub wrap_lines: usize,
    pub deflate_chunks: usize,
    pub asset_sha256: Option<String>,
}
