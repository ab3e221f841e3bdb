#![allow(dead_code)]

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use caption_engine::{EngineEvent, ImageFormat, ProgressSink};
use image::{DynamicImage, Rgb, RgbImage};

pub fn png_bytes() -> Vec<u8> {
    encoded(ImageFormat::Png)
}

pub fn jpeg_bytes() -> Vec<u8> {
    encoded(ImageFormat::Jpeg)
}

fn encoded(format: ImageFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([200, 40, 40])));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    out.into_inner()
}

#[derive(Default, Clone)]
pub struct TestSink {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl TestSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().drain(..).collect()
    }
}

impl ProgressSink for TestSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}
