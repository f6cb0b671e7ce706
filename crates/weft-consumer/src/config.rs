//! Consumer settings.
//!
//! Every field maps to a property of the same name on the consumer, so the
//! configuration can be set by name as well as through this struct. The
//! consumer reads it once per `start`.

use serde::{Deserialize, Serialize};
use weft_core::audio::{DEFAULT_CHANNELS, DEFAULT_FREQUENCY};
use weft_core::{defaults, ImageFormat, Properties};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// 0 presents on the pump thread; anything else adds a presentation
    /// thread fed through the frame queue.
    pub real_time: i32,
    /// Sleep until each frame is due. Off renders as fast as possible.
    pub paced: bool,
    /// Depth of the frame queue between pump and presentation.
    pub buffer: usize,
    /// Stop instead of waiting for a refresh when the producer pauses.
    pub terminate_on_pause: bool,
    /// Requested image size; 0 uses the profile size.
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub frequency: u32,
    pub channels: u16,
    /// Skip image evaluation.
    pub video_off: bool,
    /// Skip audio evaluation.
    pub audio_off: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            real_time: 1,
            paced: true,
            buffer: defaults::QUEUE_DEPTH,
            terminate_on_pause: false,
            width: 0,
            height: 0,
            format: ImageFormat::Rgba8,
            frequency: DEFAULT_FREQUENCY,
            channels: DEFAULT_CHANNELS,
            video_off: false,
            audio_off: false,
        }
    }
}

fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Rgba8 => "rgba",
        ImageFormat::Rgb8 => "rgb",
        ImageFormat::Gray8 => "gray",
    }
}

fn parse_format(name: &str) -> Option<ImageFormat> {
    match name.to_ascii_lowercase().as_str() {
        "rgba" | "rgba8" => Some(ImageFormat::Rgba8),
        "rgb" | "rgb8" | "rgb24" => Some(ImageFormat::Rgb8),
        "gray" | "gray8" | "grey" => Some(ImageFormat::Gray8),
        _ => None,
    }
}

impl ConsumerConfig {
    /// Read the configuration from consumer properties. Missing or
    /// unparseable keys keep their default.
    pub fn from_properties(props: &Properties) -> Self {
        let mut config = Self::default();
        if props.has("real_time") {
            config.real_time = props.get_int("real_time") as i32;
        }
        if props.has("paced") {
            config.paced = props.get_bool("paced");
        }
        if props.has("buffer") {
            config.buffer = props.get_int("buffer").max(1) as usize;
        }
        config.terminate_on_pause = props.get_bool("terminate_on_pause");
        config.width = props.get_int("width").max(0) as u32;
        config.height = props.get_int("height").max(0) as u32;
        if let Some(format) = props.get_string("format").as_deref().and_then(parse_format) {
            config.format = format;
        }
        if props.get_int("frequency") > 0 {
            config.frequency = props.get_int("frequency") as u32;
        }
        if props.get_int("channels") > 0 {
            config.channels = props.get_int("channels") as u16;
        }
        config.video_off = props.get_bool("video_off");
        config.audio_off = props.get_bool("audio_off");
        config
    }

    /// Write every field to `props`.
    pub fn apply(&self, props: &Properties) {
        let _guard = props.lock();
        props.set_int("real_time", i64::from(self.real_time));
        props.set_int("paced", i64::from(self.paced));
        props.set_int("buffer", self.buffer as i64);
        props.set_int("terminate_on_pause", i64::from(self.terminate_on_pause));
        props.set_int("width", i64::from(self.width));
        props.set_int("height", i64::from(self.height));
        props.set_string("format", format_name(self.format));
        props.set_int("frequency", i64::from(self.frequency));
        props.set_int("channels", i64::from(self.channels));
        props.set_int("video_off", i64::from(self.video_off));
        props.set_int("audio_off", i64::from(self.audio_off));
    }
}
