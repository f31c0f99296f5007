pub mod docx_reader;
pub mod pdf_raster;
pub mod table_detector;

pub use docx_reader::word_to_text;
pub use pdf_raster::PdfRasterizer;
pub use table_detector::{detect_table, DetectedTable, Record};
