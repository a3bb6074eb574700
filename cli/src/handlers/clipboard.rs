// Clipboard handler — shares text and images copied on one machine
//
// The OS clipboard is owned by a dedicated thread; the async side talks to
// it over a command channel. Packets carry `text` (UTF-8 bytes) or
// `image:<width>x<height>` (a PNG) as metadata. The size in the metadata is
// informational; receivers take the dimensions from the PNG itself.

use super::cooldown::{self, ContentDigest, Cooldown};
use crate::config::ClipboardConfig;
use async_trait::async_trait;
use relayshare_core::{human_size, Handler, HandlerContext, HandlerError, Packet};
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::borrow::Cow;
use std::io::Cursor;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub const HANDLER_NAME: &str = "clipboard";

const TEXT_FORMAT: &str = "text";
const IMAGE_PREFIX: &str = "image:";

/// One clipboard value. Images are held as RGBA pixels, the form the OS
/// clipboard reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipContent {
    Text(String),
    Image {
        width: usize,
        height: usize,
        rgba: Vec<u8>,
    },
}

impl ClipContent {
    pub fn metadata(&self) -> String {
        match self {
            ClipContent::Text(_) => TEXT_FORMAT.to_string(),
            ClipContent::Image { width, height, .. } => {
                format!("{}{}x{}", IMAGE_PREFIX, width, height)
            }
        }
    }

    /// Raw content: UTF-8 text or RGBA pixels.
    pub fn data(&self) -> &[u8] {
        match self {
            ClipContent::Text(text) => text.as_bytes(),
            ClipContent::Image { rgba, .. } => rgba,
        }
    }

    fn format_name(&self) -> &'static str {
        match self {
            ClipContent::Text(_) => "text",
            ClipContent::Image { .. } => "image",
        }
    }

    pub fn digest(&self) -> ContentDigest {
        cooldown::digest(&[self.metadata().as_bytes(), self.data()])
    }

    /// Build the outbound packet, compressing images to PNG.
    pub fn to_packet(&self) -> Result<Packet, HandlerError> {
        match self {
            ClipContent::Text(text) => Ok(Packet::new(self.metadata(), text.as_bytes())),
            ClipContent::Image { width, height, rgba } => {
                Ok(Packet::new(self.metadata(), encode_png(*width, *height, rgba)?))
            }
        }
    }

    /// Parse an inbound packet, rejecting empty or malformed content.
    pub fn from_packet(packet: &Packet) -> Result<Self, HandlerError> {
        if packet.data.is_empty() {
            return Err(HandlerError::EmptyData);
        }

        let metadata = packet.metadata_lossy();
        if metadata == TEXT_FORMAT {
            let text = String::from_utf8(packet.data.clone())
                .map_err(|_| HandlerError::UnsupportedFormat("text is not valid UTF-8".into()))?;
            return Ok(ClipContent::Text(text));
        }

        if let Some(hint) = metadata.strip_prefix(IMAGE_PREFIX) {
            let content = decode_png(&packet.data)?;
            if let ClipContent::Image { width, height, .. } = &content {
                if hint != format!("{}x{}", width, height) {
                    debug!("image metadata {:?} differs from decoded {}x{}", hint, width, height);
                }
            }
            return Ok(content);
        }

        Err(HandlerError::UnsupportedFormat(format!(
            "unknown clipboard format {:?}",
            metadata
        )))
    }

    /// History entry name and message for received content. `wire_len` is
    /// the size the content arrived with.
    fn history_entry(&self, wire_len: usize) -> (&'static str, String) {
        match self {
            ClipContent::Text(text) => ("clipboard-text", text.clone()),
            ClipContent::Image { width, height, .. } => (
                "clipboard-image",
                format!("{} size of image ({}x{})", human_size(wire_len), width, height),
            ),
        }
    }
}

fn encode_png(width: usize, height: usize, rgba: &[u8]) -> Result<Vec<u8>, HandlerError> {
    let invalid = || {
        HandlerError::UnsupportedFormat(format!(
            "{}x{} image with {} of pixels",
            width,
            height,
            human_size(rgba.len())
        ))
    };
    let width = u32::try_from(width).map_err(|_| invalid())?;
    let height = u32::try_from(height).map_err(|_| invalid())?;
    let pixels = RgbaImage::from_raw(width, height, rgba.to_vec()).ok_or_else(invalid)?;

    let mut png = Vec::new();
    DynamicImage::ImageRgba8(pixels)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| HandlerError::Other(format!("failed to encode PNG: {}", e)))?;
    Ok(png)
}

fn decode_png(data: &[u8]) -> Result<ClipContent, HandlerError> {
    let pixels = image::load_from_memory_with_format(data, ImageFormat::Png)
        .map_err(|e| HandlerError::UnsupportedFormat(format!("invalid PNG: {}", e)))?
        .to_rgba8();
    Ok(ClipContent::Image {
        width: pixels.width() as usize,
        height: pixels.height() as usize,
        rgba: pixels.into_raw(),
    })
}

/// Access to a clipboard, used from the clipboard thread only.
pub trait ClipboardBackend {
    /// Current content, or `None` when empty or unreadable.
    fn read(&mut self) -> Option<ClipContent>;

    fn write(&mut self, content: &ClipContent) -> Result<(), String>;
}

/// The OS clipboard.
pub struct SystemClipboard(arboard::Clipboard);

impl SystemClipboard {
    pub fn open() -> Result<Self, HandlerError> {
        arboard::Clipboard::new()
            .map(SystemClipboard)
            .map_err(|e| HandlerError::Unavailable(e.to_string()))
    }
}

impl ClipboardBackend for SystemClipboard {
    fn read(&mut self) -> Option<ClipContent> {
        if let Ok(text) = self.0.get_text() {
            if !text.is_empty() {
                return Some(ClipContent::Text(text));
            }
        }
        let image = self.0.get_image().ok()?;
        Some(ClipContent::Image {
            width: image.width,
            height: image.height,
            rgba: image.bytes.into_owned(),
        })
    }

    fn write(&mut self, content: &ClipContent) -> Result<(), String> {
        let result = match content {
            ClipContent::Text(text) => self.0.set_text(text.as_str()),
            ClipContent::Image { width, height, rgba } => self.0.set_image(arboard::ImageData {
                width: *width,
                height: *height,
                bytes: Cow::Borrowed(rgba.as_slice()),
            }),
        };
        result.map_err(|e| e.to_string())
    }
}

enum Command {
    Read(oneshot::Sender<Option<ClipContent>>),
    Write(ClipContent),
}

/// Start the clipboard thread. The backend is built on that thread and its
/// construction error, if any, is returned here.
fn spawn_clipboard_thread<B, F>(make: F) -> Result<mpsc::UnboundedSender<Command>, HandlerError>
where
    B: ClipboardBackend,
    F: FnOnce() -> Result<B, HandlerError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();

    std::thread::Builder::new()
        .name("clipboard".to_string())
        .spawn(move || {
            let mut backend = match make() {
                Ok(backend) => {
                    let _ = ready_tx.send(Ok(()));
                    backend
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            while let Some(command) = rx.blocking_recv() {
                match command {
                    Command::Read(reply) => {
                        let _ = reply.send(backend.read());
                    }
                    Command::Write(content) => {
                        if let Err(e) = backend.write(&content) {
                            error!("failed to write clipboard: {}", e);
                        }
                    }
                }
            }
        })?;

    ready_rx
        .recv()
        .map_err(|_| HandlerError::Unavailable("clipboard thread exited".into()))??;
    Ok(tx)
}

pub struct ClipboardHandler {
    commands: mpsc::UnboundedSender<Command>,
    cooldown: Cooldown,
    readonly: bool,
    poll_interval: Duration,
}

impl ClipboardHandler {
    /// Handler backed by the OS clipboard.
    pub fn new(config: &ClipboardConfig) -> Result<Self, HandlerError> {
        Self::with_backend(config, SystemClipboard::open)
    }

    pub fn with_backend<B, F>(config: &ClipboardConfig, make: F) -> Result<Self, HandlerError>
    where
        B: ClipboardBackend,
        F: FnOnce() -> Result<B, HandlerError> + Send + 'static,
    {
        Ok(Self {
            commands: spawn_clipboard_thread(make)?,
            cooldown: Cooldown::default(),
            readonly: config.readonly,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        })
    }

    async fn snapshot(&self) -> Option<ClipContent> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Read(reply)).ok()?;
        rx.await.ok().flatten()
    }
}

#[async_trait]
impl Handler for ClipboardHandler {
    async fn produce(&self, sink: mpsc::Sender<Packet>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Whatever is on the clipboard at startup is not a change.
        let mut last = self.snapshot().await.map(|content| content.digest());

        loop {
            ticker.tick().await;
            self.cooldown.purge_expired();

            let Some(content) = self.snapshot().await else {
                continue;
            };
            let key = content.digest();
            if last == Some(key) {
                continue;
            }
            last = Some(key);

            if self.cooldown.contains(&key) {
                debug!("clipboard holds content received from the relay, not sending it back");
                continue;
            }
            let packet = match content.to_packet() {
                Ok(packet) => packet,
                Err(e) => {
                    error!("failed to pack clipboard {}: {}", content.format_name(), e);
                    continue;
                }
            };
            if sink.send(packet).await.is_err() {
                warn!("clipboard packet sink closed");
                return;
            }
        }
    }

    fn consume(&self, ctx: &HandlerContext<'_>) -> Result<(), HandlerError> {
        let content = ClipContent::from_packet(ctx.packet)?;

        let (entry, message) = content.history_entry(ctx.packet.data.len());
        ctx.history.write(entry, message);
        self.cooldown.insert(content.digest());

        if self.readonly {
            return Ok(());
        }

        let size = human_size(content.data().len());
        let format = content.format_name();
        self.commands
            .send(Command::Write(content))
            .map_err(|_| HandlerError::Unavailable("clipboard thread exited".into()))?;
        info!("write {} {} data to clipboard", size, format);
        Ok(())
    }
}
