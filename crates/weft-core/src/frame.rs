//! Frames: deferred image and audio computation.
//!
//! A [`Frame`] carries two LIFO stacks of pending work. A producer pushes the
//! first entry; every filter that wraps the frame pushes another on top.
//! Nothing runs until a consumer calls [`Frame::get_image`] or
//! [`Frame::get_audio`], which pops the top entry. Each entry pulls the
//! result of the entry below it through [`Frame::pull_image`] /
//! [`Frame::pull_audio`] and then applies its own effect, so the entry
//! nearest the bottom transforms first. A service lowers each filter's
//! entries beneath those of the filters attached before it, which makes the
//! last attached filter transform the rawest image.

use smallvec::SmallVec;
use std::fmt;
use tracing::{trace, warn};

use crate::audio::{Audio, AudioRequest, SharedAudio};
use crate::error::{Result, WeftError};
use crate::image::{Image, ImageRequest, SharedImage};
use crate::properties::Properties;
use crate::time::Position;

// ── Callback capabilities ───────────────────────────────────────

/// A pending image computation on a frame's stack.
pub trait GetImage: Send {
    fn get_image(self: Box<Self>, frame: &mut Frame, request: &ImageRequest) -> Result<Image>;
}

impl<F> GetImage for F
where
    F: FnOnce(&mut Frame, &ImageRequest) -> Result<Image> + Send,
{
    fn get_image(self: Box<Self>, frame: &mut Frame, request: &ImageRequest) -> Result<Image> {
        (*self)(frame, request)
    }
}

/// A pending audio computation on a frame's stack.
pub trait GetAudio: Send {
    fn get_audio(self: Box<Self>, frame: &mut Frame, request: &AudioRequest) -> Result<Audio>;
}

impl<F> GetAudio for F
where
    F: FnOnce(&mut Frame, &AudioRequest) -> Result<Audio> + Send,
{
    fn get_audio(self: Box<Self>, frame: &mut Frame, request: &AudioRequest) -> Result<Audio> {
        (*self)(frame, request)
    }
}

// ── Frame ───────────────────────────────────────────────────────

/// Property names with meaning to the frame itself.
pub mod keys {
    /// Produce black when no image source remains.
    pub const TEST_IMAGE: &str = "test_image";
    /// Produce silence when no audio source remains.
    pub const TEST_AUDIO: &str = "test_audio";
    /// Bit flags: 1 hides video, 2 hides audio.
    pub const HIDE: &str = "hide";
    /// Fallback size for black test images.
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    /// Fallback sample count for silent test audio.
    pub const AUDIO_SAMPLES: &str = "audio_samples";
}

/// The result of one `get_frame` call.
pub struct Frame {
    position: Position,
    properties: Properties,
    image_stack: SmallVec<[Box<dyn GetImage>; 4]>,
    audio_stack: SmallVec<[Box<dyn GetAudio>; 4]>,
    image: Option<SharedImage>,
    audio: Option<SharedAudio>,
}

impl Frame {
    /// A frame with no pending work.
    pub fn new(position: Position) -> Self {
        Self {
            position,
            properties: Properties::new(),
            image_stack: SmallVec::new(),
            audio_stack: SmallVec::new(),
            image: None,
            audio: None,
        }
    }

    /// A placeholder that evaluates to black and silence.
    pub fn blank(position: Position) -> Self {
        let frame = Self::new(position);
        frame.set_test_image(true);
        frame.set_test_audio(true);
        frame
    }

    #[inline]
    pub fn position(&self) -> Position {
        self.position
    }

    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    #[inline]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    // ── Flags ──

    pub fn set_test_image(&self, on: bool) {
        self.properties.set_int(keys::TEST_IMAGE, on as i64);
    }

    pub fn is_test_image(&self) -> bool {
        self.properties.get_bool(keys::TEST_IMAGE)
    }

    pub fn set_test_audio(&self, on: bool) {
        self.properties.set_int(keys::TEST_AUDIO, on as i64);
    }

    pub fn is_test_audio(&self) -> bool {
        self.properties.get_bool(keys::TEST_AUDIO)
    }

    /// Whether a source of real pixels is pending or cached.
    pub fn has_image(&self) -> bool {
        !self.image_stack.is_empty() || self.image.is_some()
    }

    /// Whether a source of real samples is pending or cached.
    pub fn has_audio(&self) -> bool {
        !self.audio_stack.is_empty() || self.audio.is_some()
    }

    /// Number of pending image callbacks.
    pub fn image_depth(&self) -> usize {
        self.image_stack.len()
    }

    /// Number of pending audio callbacks.
    pub fn audio_depth(&self) -> usize {
        self.audio_stack.len()
    }

    /// Whether `get_image` has already produced a buffer.
    pub fn is_image_evaluated(&self) -> bool {
        self.image.is_some()
    }

    // ── Stacks ──

    pub fn push_image_callback<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut Frame, &ImageRequest) -> Result<Image> + Send + 'static,
    {
        self.image_stack.push(Box::new(callback));
    }

    pub fn push_boxed_image_callback(&mut self, callback: Box<dyn GetImage>) {
        self.image_stack.push(callback);
    }

    pub fn pop_image_callback(&mut self) -> Option<Box<dyn GetImage>> {
        self.image_stack.pop()
    }

    pub fn push_audio_callback<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut Frame, &AudioRequest) -> Result<Audio> + Send + 'static,
    {
        self.audio_stack.push(Box::new(callback));
    }

    pub fn push_boxed_audio_callback(&mut self, callback: Box<dyn GetAudio>) {
        self.audio_stack.push(callback);
    }

    pub fn pop_audio_callback(&mut self) -> Option<Box<dyn GetAudio>> {
        self.audio_stack.pop()
    }

    /// Move the image entries pushed since the stack was `depth` deep down to
    /// `base`, beneath the entries in between. Out of range bounds are ignored.
    pub fn lower_image_callbacks(&mut self, base: usize, depth: usize) {
        lower(&mut self.image_stack, base, depth);
    }

    /// Audio counterpart of [`lower_image_callbacks`](Self::lower_image_callbacks).
    pub fn lower_audio_callbacks(&mut self, base: usize, depth: usize) {
        lower(&mut self.audio_stack, base, depth);
    }

    /// Replace the image source with a ready buffer.
    pub fn set_image(&mut self, image: Image) {
        self.image_stack.clear();
        self.image = Some(image.shared());
    }

    /// Replace the audio source with a ready block.
    pub fn set_audio(&mut self, audio: Audio) {
        self.audio_stack.clear();
        self.audio = Some(audio.shared());
    }

    // ── Evaluation ──

    /// Evaluate the next entry down the image stack.
    ///
    /// Called from inside image callbacks. When the stack is exhausted this
    /// yields the cached buffer, black for a test frame, or `NoImage`.
    pub fn pull_image(&mut self, request: &ImageRequest) -> Result<Image> {
        if let Some(callback) = self.image_stack.pop() {
            return callback.get_image(self, request);
        }
        if let Some(image) = &self.image {
            return Ok(image.conform(request));
        }
        if self.is_test_image() {
            let width = non_zero(request.width, self.properties.get_int(keys::WIDTH));
            let height = non_zero(request.height, self.properties.get_int(keys::HEIGHT));
            return Ok(Image::black(request.format, width, height));
        }
        Err(WeftError::NoImage)
    }

    /// Evaluate the image stack, caching the result.
    ///
    /// A second call returns the cached buffer without re-running anything.
    /// On failure nothing is cached and the error is returned.
    pub fn get_image(&mut self, request: &ImageRequest) -> Result<SharedImage> {
        if let Some(image) = &self.image {
            if image.format == request.format
                && (request.width == 0 || request.width == image.width)
                && (request.height == 0 || request.height == image.height)
            {
                return Ok(image.clone());
            }
            return Ok(image.conform(request).shared());
        }
        trace!(position = self.position, depth = self.image_stack.len(), "Evaluating image");
        match self.pull_image(request) {
            Ok(image) => {
                let image = image.shared();
                self.image = Some(image.clone());
                Ok(image)
            }
            Err(e) => {
                warn!(position = self.position, error = %e, "Image evaluation failed");
                Err(e)
            }
        }
    }

    /// Evaluate the next entry down the audio stack.
    pub fn pull_audio(&mut self, request: &AudioRequest) -> Result<Audio> {
        if let Some(callback) = self.audio_stack.pop() {
            return callback.get_audio(self, request);
        }
        if let Some(audio) = &self.audio {
            return Ok(Audio::clone(audio));
        }
        if self.is_test_audio() {
            let fallback = self.properties.get_int(keys::AUDIO_SAMPLES).max(0) as usize;
            return Ok(Audio::silence_for(&request.resolved(fallback)));
        }
        Err(WeftError::NoAudio)
    }

    /// Evaluate the audio stack, caching the result.
    pub fn get_audio(&mut self, request: &AudioRequest) -> Result<SharedAudio> {
        if let Some(audio) = &self.audio {
            return Ok(audio.clone());
        }
        trace!(position = self.position, depth = self.audio_stack.len(), "Evaluating audio");
        match self.pull_audio(request) {
            Ok(audio) => {
                let audio = audio.shared();
                self.audio = Some(audio.clone());
                Ok(audio)
            }
            Err(e) => {
                warn!(position = self.position, error = %e, "Audio evaluation failed");
                Err(e)
            }
        }
    }
}

fn lower<T>(stack: &mut [T], base: usize, depth: usize) {
    if base <= depth && depth <= stack.len() {
        let pushed = stack.len() - depth;
        stack[base..].rotate_right(pushed);
    }
}

fn non_zero(requested: u32, fallback: i64) -> u32 {
    if requested > 0 {
        requested
    } else {
        fallback.clamp(0, u32::MAX as i64) as u32
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("position", &self.position)
            .field("image_depth", &self.image_stack.len())
            .field("audio_depth", &self.audio_stack.len())
            .field("image_evaluated", &self.image.is_some())
            .field("audio_evaluated", &self.audio.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageFormat;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn counted_source(
        calls: Arc<AtomicUsize>,
    ) -> impl FnOnce(&mut Frame, &ImageRequest) -> Result<Image> + Send + 'static {
        move |_: &mut Frame, req: &ImageRequest| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Image::black(req.format, req.width, req.height))
        }
    }

    #[test]
    fn test_discarded_frame_does_no_work() {
        let calls = Arc::new(AtomicUsize::new(0));
        for p in 0..10 {
            let mut frame = Frame::new(p);
            frame.push_image_callback(counted_source(calls.clone()));
            drop(frame);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_evaluation_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut frame = Frame::new(0);
        frame.push_image_callback(counted_source(calls.clone()));
        let req = ImageRequest::rgba(4, 4);
        let a = frame.get_image(&req).unwrap();
        let b = frame.get_image(&req).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(frame.is_image_evaluated());
    }

    #[test]
    fn test_lifo_entry_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut frame = Frame::new(0);
        frame.push_image_callback(|_: &mut Frame, req: &ImageRequest| {
            Ok(Image::black(req.format, req.width, req.height))
        });
        for name in ["f1", "f2"] {
            let log = log.clone();
            frame.push_image_callback(move |f: &mut Frame, req: &ImageRequest| {
                log.lock().unwrap().push(format!("enter {name}"));
                let image = f.pull_image(req)?;
                log.lock().unwrap().push(format!("apply {name}"));
                Ok(image)
            });
        }
        frame.get_image(&ImageRequest::rgba(1, 1)).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["enter f2", "enter f1", "apply f1", "apply f2"]
        );
    }

    #[test]
    fn test_lowered_entries_transform_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut frame = Frame::new(0);
        frame.push_image_callback(|_: &mut Frame, req: &ImageRequest| {
            Ok(Image::black(req.format, req.width, req.height))
        });
        let base = frame.image_depth();
        for name in ["f1", "f2"] {
            let depth = frame.image_depth();
            let log = log.clone();
            frame.push_image_callback(move |f: &mut Frame, req: &ImageRequest| {
                let image = f.pull_image(req)?;
                log.lock().unwrap().push(name);
                Ok(image)
            });
            frame.lower_image_callbacks(base, depth);
        }
        // Bounds past the stack leave it alone.
        frame.lower_image_callbacks(5, 9);
        assert_eq!(frame.image_depth(), 3);
        frame.get_image(&ImageRequest::rgba(1, 1)).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["f2", "f1"]);
    }

    #[test]
    fn test_failure_is_not_cached() {
        let mut frame = Frame::new(3);
        frame.push_image_callback(|_: &mut Frame, _: &ImageRequest| -> Result<Image> {
            Err(WeftError::Decode("corrupt".into()))
        });
        assert!(frame.get_image(&ImageRequest::rgba(2, 2)).is_err());
        assert!(!frame.is_image_evaluated());
        // Stack is spent; a plain frame has nothing left to offer
        assert!(matches!(
            frame.get_image(&ImageRequest::rgba(2, 2)),
            Err(WeftError::NoImage)
        ));
    }

    #[test]
    fn test_blank_frame_is_black_and_silent() {
        let mut frame = Frame::blank(0);
        let image = frame.get_image(&ImageRequest::rgba(2, 2)).unwrap();
        assert_eq!(image.pixel(1, 1), Some([0, 0, 0, 255]));
        let audio = frame.get_audio(&AudioRequest::new(48_000, 2, 1920)).unwrap();
        assert_eq!(audio.samples, 1920);
        assert_eq!(audio.peak(), 0.0);
    }

    #[test]
    fn test_cached_image_conformed_on_other_request() {
        let mut frame = Frame::new(0);
        frame.set_image(Image::test_pattern(8, 8));
        let gray = frame
            .get_image(&ImageRequest::new(ImageFormat::Gray8, 4, 4))
            .unwrap();
        assert_eq!(gray.format, ImageFormat::Gray8);
        assert_eq!(gray.data.len(), 16);
    }

    #[test]
    fn test_dropping_frame_drops_companions() {
        let companion = Arc::new(());
        let mut frame = Frame::new(0);
        let held = companion.clone();
        frame.push_image_callback(move |_: &mut Frame, req: &ImageRequest| {
            let _keep = &held;
            Ok(Image::black(req.format, req.width, req.height))
        });
        assert_eq!(Arc::strong_count(&companion), 2);
        drop(frame);
        assert_eq!(Arc::strong_count(&companion), 1);
    }
}
