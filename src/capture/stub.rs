//! Synthetic `stub://` streams.
//!
//! `stub://<name>[?warmup=N&width=W&height=H]` produces a gradient frame on
//! every read after `warmup` empty reads. `stub://offline` refuses to open.

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::{CaptureBackend, Frame, VideoStream};

const DEFAULT_WIDTH: u32 = 64;
const DEFAULT_HEIGHT: u32 = 48;
const MAX_DIMENSION: u32 = 4096;

#[derive(Clone, Copy, Debug, Default)]
pub struct StubBackend;

impl CaptureBackend for StubBackend {
    fn open(&self, uri: &str) -> Result<Box<dyn VideoStream>> {
        let url = Url::parse(uri).context("parse stub url")?;
        if url.scheme() != "stub" {
            return Err(anyhow!("not a stub:// url"));
        }
        let name = url.host_str().unwrap_or_default().to_string();
        if name == "offline" {
            return Err(anyhow!("stub stream '{}' refused connection", name));
        }

        let mut stream = StubStream {
            name,
            warmup: 0,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            frame_count: 0,
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "warmup" => stream.warmup = value.parse().context("stub warmup")?,
                "width" => stream.width = parse_dimension(&value)?,
                "height" => stream.height = parse_dimension(&value)?,
                _ => {}
            }
        }
        log::debug!("stub stream '{}' opened", stream.name);
        Ok(Box::new(stream))
    }
}

fn parse_dimension(value: &str) -> Result<u32> {
    let parsed: u32 = value.parse().context("stub dimension")?;
    if parsed == 0 || parsed > MAX_DIMENSION {
        return Err(anyhow!("stub dimension {} out of range", parsed));
    }
    Ok(parsed)
}

struct StubStream {
    name: String,
    warmup: u32,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl VideoStream for StubStream {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.warmup > 0 {
            self.warmup -= 1;
            return Ok(None);
        }
        self.frame_count += 1;

        let mut pixels = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.push(((x * 255) / self.width) as u8);
                pixels.push(((y * 255) / self.height) as u8);
                pixels.push((self.frame_count % 256) as u8);
            }
        }
        Ok(Some(Frame {
            pixels,
            width: self.width,
            height: self.height,
        }))
    }

    fn release(&mut self) {
        log::debug!(
            "stub stream '{}' released after {} frames",
            self.name,
            self.frame_count
        );
    }
}
