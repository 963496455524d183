pub mod annotate;
pub mod color;
pub mod locator;
pub mod ocr;
