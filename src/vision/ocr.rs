use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use image::{imageops, GrayImage, RgbaImage};

use crate::geometry::{MatchedText, Region};

/// Engine configuration strings are opaque to callers; these are the two the
/// extractor uses.
pub const DEFAULT_ENGINE_CONFIG: &str = "--oem 3 --psm 6";
pub const DIGITS_ENGINE_CONFIG: &str = "--oem 3 --psm 6 digits";

const BINARIZE_THRESHOLD: u8 = 150;

/// Turns an image region into recognized text tokens.
///
/// Tokens come back one per recognized unit, in recognition order, with
/// bounding boxes in full-frame coordinates. Blank or whitespace-only tokens
/// are returned as-is; callers decide what a blank token means.
pub trait TextRecognizer: Send {
    fn recognize(
        &self,
        frame: &RgbaImage,
        search: Option<Region>,
        engine_config: &str,
    ) -> Result<Vec<MatchedText>>;
}

/// Luminance, fixed-threshold binarization, inverted polarity: the engine
/// expects dark glyphs on a light background, the conferencing chrome renders
/// the opposite.
pub fn prepare_for_recognition(frame: &RgbaImage, search: Option<Region>) -> GrayImage {
    let bounds = search.map(|r| r.clamped_to(frame.width(), frame.height()));
    let gray = match bounds {
        Some(b) => imageops::grayscale(&imageops::crop_imm(frame, b.x, b.y, b.w, b.h).to_image()),
        None => imageops::grayscale(frame),
    };
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0];
        image::Luma([if v > BINARIZE_THRESHOLD { 0 } else { 255 }])
    })
}

/// Recognizer backed by the tesseract binary.
pub struct TesseractRecognizer {
    lang: String,
}

impl TesseractRecognizer {
    pub fn new(lang: impl Into<String>) -> Self {
        Self { lang: lang.into() }
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(
        &self,
        frame: &RgbaImage,
        search: Option<Region>,
        engine_config: &str,
    ) -> Result<Vec<MatchedText>> {
        let prepared = prepare_for_recognition(frame, search);
        if prepared.width() == 0 || prepared.height() == 0 {
            return Ok(Vec::new());
        }

        // rusty-tesseract wants a file on disk, which also sidesteps any
        // image-crate version skew between us and it.
        let file = tempfile::Builder::new()
            .prefix("autoleave-ocr-")
            .suffix(".png")
            .tempfile()
            .context("create temp image for ocr")?;
        prepared
            .save_with_format(file.path(), image::ImageFormat::Png)
            .context("write ocr input image")?;

        let args = parse_engine_config(&self.lang, engine_config);
        let input = rusty_tesseract::Image::from_path(file.path())
            .map_err(|e| anyhow!("load ocr input: {e}"))?;
        let output = rusty_tesseract::image_to_data(&input, &args)
            .map_err(|e| anyhow!("tesseract failed: {e}"))?;

        let (off_x, off_y) = search.map(|r| (r.x as f64, r.y as f64)).unwrap_or((0.0, 0.0));
        Ok(output
            .data
            .into_iter()
            .map(|d| MatchedText {
                region: Region::from_f64(
                    d.left as f64 + off_x,
                    d.top as f64 + off_y,
                    d.width as f64,
                    d.height as f64,
                ),
                text: d.text,
            })
            .collect())
    }
}

/// Translate the free-form engine configuration into tesseract arguments.
/// Only `--psm N`, `--oem N` and the `digits` shorthand are meaningful;
/// anything else is ignored.
fn parse_engine_config(lang: &str, config: &str) -> rusty_tesseract::Args {
    let mut psm = None;
    let mut oem = None;
    let mut config_variables = HashMap::new();
    let mut tokens = config.split_whitespace();
    while let Some(token) = tokens.next() {
        match token {
            "--psm" => psm = tokens.next().and_then(|v| v.parse().ok()),
            "--oem" => oem = tokens.next().and_then(|v| v.parse().ok()),
            "digits" => {
                config_variables.insert(
                    "tessedit_char_whitelist".to_string(),
                    "0123456789".to_string(),
                );
            }
            _ => {}
        }
    }
    rusty_tesseract::Args {
        lang: lang.to_string(),
        config_variables,
        dpi: None,
        psm,
        oem,
    }
}

/// Replays pre-scripted token lists, one list per `recognize` call, in order.
/// Returns an empty list once the script runs out. Used by replay runs and
/// tests so cycles stay deterministic.
#[derive(Default)]
pub struct ScriptedRecognizer {
    responses: Mutex<VecDeque<Vec<MatchedText>>>,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, tokens: Vec<MatchedText>) {
        self.responses.lock().unwrap().push_back(tokens);
    }

    /// Convenience for scripts that only care about token text.
    pub fn enqueue_texts(&self, texts: &[&str]) {
        self.enqueue(
            texts
                .iter()
                .map(|t| MatchedText {
                    region: Region::new(0, 0, 0, 0),
                    text: (*t).to_string(),
                })
                .collect(),
        );
    }
}

impl TextRecognizer for ScriptedRecognizer {
    fn recognize(
        &self,
        _frame: &RgbaImage,
        _search: Option<Region>,
        _engine_config: &str,
    ) -> Result<Vec<MatchedText>> {
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}
