use std::collections::HashMap;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result};

use crate::config::TextureSourceConfig;
use crate::space;

/// Faces per panorama cube.
pub const FACE_COUNT: u8 = 6;

/// Panorama faces ship at two sizes. The small tier paints the cube
/// immediately; the full tier replaces visible faces afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTier {
    Preview,
    Full,
}

impl TextureTier {
    pub fn label(&self) -> &'static str {
        match self {
            TextureTier::Preview => "1024",
            TextureTier::Full => "4096",
        }
    }
}

/// Decoded RGBA8 pixels straight out of the loader.
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Sampling state the render host should apply to every face texture.
#[derive(Debug, Clone, Copy)]
pub struct SamplerSettings {
    pub trilinear_mips: bool,
    pub srgb: bool,
    pub anisotropy: u8,
}

pub struct Texture {
    pub image: TextureImage,
    pub sampler: SamplerSettings,
}

pub type TextureHandle = Rc<Texture>;

/// Builds the published URL for one cube face. Full-size faces live at the
/// bare name, the preview tier carries a `_1024` suffix, and spaces with a
/// content version tag it between the face index and the size suffix.
pub fn texture_url(
    base: &str,
    uuid: &str,
    face: u8,
    tier: TextureTier,
    version: Option<&str>,
) -> String {
    let version_part = match version {
        Some(v) if !v.is_empty() => format!("_{v}"),
        _ => String::new(),
    };
    match tier {
        TextureTier::Full => format!("{base}/spaceshare/{uuid}_face{face}{version_part}.jpg"),
        TextureTier::Preview => {
            format!("{base}/spaceshare/{uuid}_face{face}{version_part}_1024.jpg")
        }
    }
}

pub trait TextureFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Serves face images from a local mirror directory, keyed by the final
/// path segment of the published URL.
pub struct DirectoryFetcher {
    root: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TextureFetcher for DirectoryFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let name = url.rsplit('/').next().unwrap_or(url);
        let path = self.root.join(name);
        fs::read(&path).with_context(|| format!("read texture file {}", path.display()))
    }
}

pub struct TextureLoadJob {
    pub url: String,
    pub uuid: String,
    pub face: u8,
    pub tier: TextureTier,
}

pub struct TextureLoadResult {
    pub job: TextureLoadJob,
    pub data: Result<TextureImage>,
}

/// Seam between the cache and whatever performs fetch + decode. The viewer
/// runs the threaded loader; the CLI and tests run the blocking one.
pub trait TextureLoader {
    fn submit(&mut self, job: TextureLoadJob) -> std::result::Result<(), TextureLoadJob>;
    fn drain(&mut self) -> Vec<TextureLoadResult>;
}

fn decode_texture_bytes(bytes: &[u8]) -> Result<TextureImage> {
    let decoded = image::load_from_memory(bytes)?;
    let rgba = decoded.to_rgba8();
    Ok(TextureImage {
        width: rgba.width(),
        height: rgba.height(),
        pixels: rgba.into_raw(),
    })
}

fn run_texture_load_job(fetcher: &dyn TextureFetcher, job: TextureLoadJob) -> TextureLoadResult {
    let data = fetcher
        .fetch(&job.url)
        .and_then(|bytes| decode_texture_bytes(&bytes))
        .with_context(|| format!("load texture {}", job.url));
    TextureLoadResult { job, data }
}

pub struct ThreadedTextureLoader {
    tx: mpsc::Sender<TextureLoadJob>,
    rx: mpsc::Receiver<TextureLoadResult>,
}

impl ThreadedTextureLoader {
    pub fn spawn(fetcher: Box<dyn TextureFetcher + Send>) -> Option<Self> {
        let (tx, rx) = mpsc::channel::<TextureLoadJob>();
        let (result_tx, result_rx) = mpsc::channel();
        let builder = thread::Builder::new().name("texture-load".to_string());
        match builder.spawn(move || {
            while let Ok(job) = rx.recv() {
                let result = run_texture_load_job(fetcher.as_ref(), job);
                if result_tx.send(result).is_err() {
                    break;
                }
            }
        }) {
            Ok(_) => Some(Self { tx, rx: result_rx }),
            Err(err) => {
                eprintln!("[textures] failed to spawn loader thread: {err:?}");
                None
            }
        }
    }
}

impl TextureLoader for ThreadedTextureLoader {
    fn submit(&mut self, job: TextureLoadJob) -> std::result::Result<(), TextureLoadJob> {
        self.tx.send(job).map_err(|err| err.0)
    }

    fn drain(&mut self) -> Vec<TextureLoadResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.rx.try_recv() {
            results.push(result);
        }
        results
    }
}

/// Fetches and decodes during `submit`, holding results until the next
/// `drain`. Keeps load completion deterministic where no frame loop runs.
pub struct BlockingTextureLoader {
    fetcher: Box<dyn TextureFetcher>,
    results: VecDeque<TextureLoadResult>,
}

impl BlockingTextureLoader {
    pub fn new(fetcher: Box<dyn TextureFetcher>) -> Self {
        Self {
            fetcher,
            results: VecDeque::new(),
        }
    }
}

impl TextureLoader for BlockingTextureLoader {
    fn submit(&mut self, job: TextureLoadJob) -> std::result::Result<(), TextureLoadJob> {
        let result = run_texture_load_job(self.fetcher.as_ref(), job);
        self.results.push_back(result);
        Ok(())
    }

    fn drain(&mut self) -> Vec<TextureLoadResult> {
        self.results.drain(..).collect()
    }
}

#[derive(Clone)]
pub enum TextureOutcome {
    Ready(TextureHandle),
    /// Load or decode failed. Carries the shared placeholder so the face
    /// still gets painted.
    Failed(TextureHandle),
}

#[derive(Clone)]
pub struct TextureEvent {
    pub uuid: String,
    pub face: u8,
    pub tier: TextureTier,
    pub outcome: TextureOutcome,
}

enum EntryState {
    Loading,
    Ready(TextureHandle),
    Failed(TextureHandle),
}

/// URL-keyed store of every face texture the viewer has asked for.
///
/// Requests are idempotent: a URL already loading or loaded is never
/// fetched twice. Entries are kept for the lifetime of the space; the
/// whole tour tops out at a few hundred faces, so nothing is evicted.
pub struct TextureCache {
    entries: HashMap<String, EntryState>,
    loader: Box<dyn TextureLoader>,
    base: String,
    version: Option<String>,
    sampler: SamplerSettings,
    placeholder: Option<TextureHandle>,
    pending_events: VecDeque<TextureEvent>,
}

impl TextureCache {
    pub fn new(config: &TextureSourceConfig, loader: Box<dyn TextureLoader>) -> Self {
        Self {
            entries: HashMap::new(),
            loader,
            base: config.static_base.clone(),
            version: None,
            sampler: SamplerSettings {
                trilinear_mips: true,
                srgb: true,
                anisotropy: config.anisotropy,
            },
            placeholder: None,
            pending_events: VecDeque::new(),
        }
    }

    /// Content version of the loaded space, folded into every URL.
    pub fn set_version(&mut self, version: Option<String>) {
        self.version = version;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn url_for(&self, uuid: &str, face: u8, tier: TextureTier) -> String {
        texture_url(&self.base, uuid, face, tier, self.version.as_deref())
    }

    /// Starts a load unless the face is already cached or loading.
    /// Waypoint entries have no imagery and are skipped outright.
    pub fn request(&mut self, uuid: &str, face: u8, tier: TextureTier) {
        if space::is_waypoint(uuid) {
            return;
        }
        let url = self.url_for(uuid, face, tier);
        if self.entries.contains_key(&url) {
            return;
        }
        self.entries.insert(url.clone(), EntryState::Loading);
        let job = TextureLoadJob {
            url,
            uuid: uuid.to_string(),
            face,
            tier,
        };
        if let Err(job) = self.loader.submit(job) {
            eprintln!("[textures] loader rejected {}", job.url);
            let placeholder = self.placeholder();
            self.entries
                .insert(job.url, EntryState::Failed(placeholder.clone()));
            self.pending_events.push_back(TextureEvent {
                uuid: job.uuid,
                face: job.face,
                tier: job.tier,
                outcome: TextureOutcome::Failed(placeholder),
            });
        }
    }

    pub fn request_node_faces(&mut self, uuid: &str, tier: TextureTier) {
        for face in 0..FACE_COUNT {
            self.request(uuid, face, tier);
        }
    }

    /// Handle for a face, if its load has finished. Failed loads resolve
    /// to the placeholder rather than nothing.
    pub fn get(&self, uuid: &str, face: u8, tier: TextureTier) -> Option<TextureHandle> {
        if space::is_waypoint(uuid) {
            return None;
        }
        let url = self.url_for(uuid, face, tier);
        match self.entries.get(&url) {
            Some(EntryState::Ready(handle)) | Some(EntryState::Failed(handle)) => {
                Some(handle.clone())
            }
            _ => None,
        }
    }

    pub fn is_ready(&self, uuid: &str, face: u8, tier: TextureTier) -> bool {
        let url = self.url_for(uuid, face, tier);
        matches!(self.entries.get(&url), Some(EntryState::Ready(_)))
    }

    /// Finished one way or the other. Failures count so a navigation
    /// waiting on this face proceeds with the placeholder instead of
    /// hanging until the timeout.
    pub fn is_resolved(&self, uuid: &str, face: u8, tier: TextureTier) -> bool {
        let url = self.url_for(uuid, face, tier);
        matches!(
            self.entries.get(&url),
            Some(EntryState::Ready(_)) | Some(EntryState::Failed(_))
        )
    }

    /// True once all six faces of a node are resolved at the given tier.
    /// Waypoints have nothing to load and always count as resolved.
    pub fn node_resolved(&self, uuid: &str, tier: TextureTier) -> bool {
        if space::is_waypoint(uuid) {
            return true;
        }
        (0..FACE_COUNT).all(|face| self.is_resolved(uuid, face, tier))
    }

    /// Folds finished loads into the cache and reports them. Call once per
    /// frame from the driving thread.
    pub fn pump(&mut self) -> Vec<TextureEvent> {
        let mut events: Vec<TextureEvent> = self.pending_events.drain(..).collect();
        for result in self.loader.drain() {
            let TextureLoadResult { job, data } = result;
            let outcome = match data {
                Ok(image) => {
                    let handle = Rc::new(Texture {
                        image,
                        sampler: self.sampler,
                    });
                    self.entries
                        .insert(job.url, EntryState::Ready(handle.clone()));
                    TextureOutcome::Ready(handle)
                }
                Err(err) => {
                    eprintln!("[textures] {err:#}");
                    let placeholder = self.placeholder();
                    self.entries
                        .insert(job.url, EntryState::Failed(placeholder.clone()));
                    TextureOutcome::Failed(placeholder)
                }
            };
            events.push(TextureEvent {
                uuid: job.uuid,
                face: job.face,
                tier: job.tier,
                outcome,
            });
        }
        events
    }

    /// Flat gray stand-in applied wherever a load failed.
    pub fn placeholder(&mut self) -> TextureHandle {
        if let Some(handle) = &self.placeholder {
            return handle.clone();
        }
        let handle = Rc::new(Texture {
            image: TextureImage {
                width: 1,
                height: 1,
                pixels: vec![128, 128, 128, 255],
            },
            sampler: self.sampler,
        });
        self.placeholder = Some(handle.clone());
        handle
    }
}
