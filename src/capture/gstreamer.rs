//! Live RTSP capture through a GStreamer pipeline:
//! `rtspsrc ! decodebin ! videoconvert ! RGB appsink`.

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use std::time::Duration;

use super::{Frame, VideoStream};
use crate::resolve::redact_uri;

/// Time allowed for the session to reach PLAYING before the open fails.
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

pub(super) fn open(uri: &str, read_timeout: Duration) -> Result<Box<dyn VideoStream>> {
    gstreamer::init().context("initialize gstreamer")?;

    let pipeline_description = format!(
        "rtspsrc location=\"{}\" latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
         appsink name=appsink sync=false max-buffers=1 drop=true",
        uri
    );
    let pipeline = gstreamer::parse::launch(&pipeline_description)
        .context("build RTSP pipeline")?
        .downcast::<gstreamer::Pipeline>()
        .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

    let appsink = pipeline
        .by_name("appsink")
        .context("appsink element missing from pipeline")?
        .downcast::<gstreamer_app::AppSink>()
        .map_err(|_| anyhow!("appsink element has unexpected type"))?;

    let caps = gstreamer::Caps::builder("video/x-raw")
        .field("format", "RGB")
        .build();
    appsink.set_caps(Some(&caps));

    let mut stream = GstreamerStream {
        redacted: redact_uri(uri),
        pipeline,
        appsink,
        read_timeout,
        released: false,
    };
    // A failed start still has to tear the pipeline down.
    if let Err(err) = stream.start() {
        stream.release();
        return Err(err);
    }
    log::info!("rtsp stream {} playing", stream.redacted);
    Ok(Box::new(stream))
}

struct GstreamerStream {
    redacted: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    read_timeout: Duration,
    released: bool,
}

impl GstreamerStream {
    fn start(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        let (result, _, _) = self
            .pipeline
            .state(gstreamer::ClockTime::from_mseconds(OPEN_TIMEOUT.as_millis() as u64));
        ensure_started(result)?;
        self.check_bus()
    }

    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(anyhow!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => return Err(anyhow!("gstreamer reached EOS")),
                _ => {}
            }
        }
        Ok(())
    }
}

impl VideoStream for GstreamerStream {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.check_bus()?;
        let timeout = gstreamer::ClockTime::from_mseconds(self.read_timeout.as_millis() as u64);
        match self.appsink.try_pull_sample(timeout) {
            Some(sample) => sample_to_frame(&sample).map(Some),
            None => Ok(None),
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("failed to stop rtsp pipeline for {}: {}", self.redacted, err);
        }
    }
}

/// A state change still `Async` after the wait means the session never reached PLAYING.
fn ensure_started(
    result: Result<gstreamer::StateChangeSuccess, gstreamer::StateChangeError>,
) -> Result<()> {
    match result {
        Ok(gstreamer::StateChangeSuccess::Async) => Err(anyhow!(
            "RTSP pipeline did not reach PLAYING within {:?}",
            OPEN_TIMEOUT
        )),
        Ok(_) => Ok(()),
        Err(err) => Err(anyhow!("RTSP pipeline did not start: {}", err)),
    }
}

fn sample_to_frame(sample: &gstreamer::Sample) -> Result<Frame> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("RTSP buffer shorter than frame")?
            .to_vec();
        return Ok(Frame {
            pixels,
            width,
            height,
        });
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok(Frame {
        pixels,
        width,
        height,
    })
}
