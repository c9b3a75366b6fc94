//! Frame filters and the per-kind filter registry.
//!
//! Every enabled filter sees every frame at every [`FilterStage`] and picks
//! the stages it cares about. Filters run in the order they were added and
//! each sees the changes made by the ones before it. Filters talk to the
//! rest of the pipeline through frame attributes: setting `SKIPPED` drops a
//! frame at the next stage boundary, setting `IS_CLONED` asks for one more
//! copy of it.

use crate::error::PipelineError;
use crate::Result;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};
use transcode_core::frame::{FrameAttributes, PoolFrame, VideoFrame};
use transcode_core::metrics::timed;
use transcode_core::range::{FrameRanges, DEFAULT_FPS};
use transcode_core::sample::AudioFrame;

/// Point in the pipeline a filter is called from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStage {
    /// Import thread, right after the frame was read.
    PreSync,
    /// Filter worker (or export, without workers), before internal processing.
    PreMulti,
    /// Filter worker (or export, without workers), after internal processing.
    PostMulti,
    /// Export thread, once per frame before encoding.
    PostSync,
    /// Export thread, after every other stage.
    Preview,
}

impl FilterStage {
    /// Short name, also used as a metrics label.
    pub fn name(self) -> &'static str {
        match self {
            FilterStage::PreSync => "pre_sync",
            FilterStage::PreMulti => "pre_multi",
            FilterStage::PostMulti => "post_multi",
            FilterStage::PostSync => "post_sync",
            FilterStage::Preview => "preview",
        }
    }

    /// Stages that may run on several threads at once.
    pub fn is_multi(self) -> bool {
        matches!(self, FilterStage::PreMulti | FilterStage::PostMulti)
    }
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A frame filter.
///
/// `process` takes `&self` because worker threads call it concurrently;
/// filters needing state across frames keep it behind their own lock.
pub trait FrameFilter<F>: Send + Sync {
    /// Filter name.
    fn name(&self) -> &str;

    /// Apply an option string. Called before the first frame and on reconfigure.
    fn configure(&mut self, options: &str) -> Result<()> {
        let _ = options;
        Ok(())
    }

    /// Current value of an option, if the filter has it.
    fn get_config(&self, key: &str) -> Option<String> {
        let _ = key;
        None
    }

    /// Process one frame at `stage`.
    fn process(&self, stage: FilterStage, frame: &mut F) -> Result<()>;

    /// Release resources before the filter is dropped.
    fn stop(&mut self) {}
}

/// Handle to a filter instance in a [`FilterRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FilterId(u32);

impl FilterId {
    /// Numeric id.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Description of a loaded filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterInfo {
    pub id: FilterId,
    pub name: String,
    pub options: String,
    pub enabled: bool,
}

/// Constructor for a named filter.
pub type FilterCtor<F> = fn() -> Box<dyn FrameFilter<F>>;

/// Named filter constructors a registry can instantiate from.
pub struct FilterCatalog<F> {
    constructors: BTreeMap<&'static str, FilterCtor<F>>,
}

impl<F> Default for FilterCatalog<F> {
    fn default() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }
}

impl<F: PoolFrame> FilterCatalog<F> {
    /// Catalog with the filters that work on any frame kind.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::default();
        catalog.insert("null", || -> Box<dyn FrameFilter<F>> { Box::new(NullFilter) });
        catalog.insert("skip", || -> Box<dyn FrameFilter<F>> { Box::new(SkipFilter::default()) });
        catalog.insert("clone", || -> Box<dyn FrameFilter<F>> { Box::new(CloneFilter::default()) });
        catalog
    }

    /// Register a constructor under `name`, replacing any previous one.
    pub fn insert(&mut self, name: &'static str, ctor: FilterCtor<F>) {
        self.constructors.insert(name, ctor);
    }

    /// Instantiate a filter by name.
    pub fn create(&self, name: &str) -> Option<Box<dyn FrameFilter<F>>> {
        self.constructors.get(name).map(|ctor| ctor())
    }

    /// Known filter names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }
}

impl FilterCatalog<VideoFrame> {
    /// Built-in video filters.
    pub fn video() -> Self {
        let mut catalog = Self::with_builtins();
        catalog.insert("invert", || -> Box<dyn FrameFilter<VideoFrame>> {
            Box::new(InvertFilter::default())
        });
        catalog
    }
}

impl FilterCatalog<AudioFrame> {
    /// Built-in audio filters.
    pub fn audio() -> Self {
        Self::with_builtins()
    }
}

struct FilterEntry<F> {
    id: FilterId,
    options: String,
    enabled: bool,
    filter: Box<dyn FrameFilter<F>>,
}

/// Ordered table of loaded filters for one media kind.
pub struct FilterRegistry<F> {
    catalog: FilterCatalog<F>,
    entries: RwLock<Vec<FilterEntry<F>>>,
    next_id: AtomicU32,
}

impl<F: PoolFrame> FilterRegistry<F> {
    /// Create an empty registry backed by `catalog`.
    pub fn new(catalog: FilterCatalog<F>) -> Self {
        Self {
            catalog,
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU32::new(0),
        }
    }

    /// Configure and append a filter instance.
    pub fn add(&self, mut filter: Box<dyn FrameFilter<F>>, options: &str) -> Result<FilterId> {
        filter.configure(options)?;
        let id = FilterId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(filter = filter.name(), %id, options, "{} filter loaded", F::KIND);
        self.entries.write().push(FilterEntry {
            id,
            options: options.to_string(),
            enabled: true,
            filter,
        });
        Ok(id)
    }

    /// Instantiate a catalog filter by name and append it.
    pub fn add_named(&self, name: &str, options: &str) -> Result<FilterId> {
        let filter = self
            .catalog
            .create(name)
            .ok_or_else(|| PipelineError::UnknownFilter(name.to_string()))?;
        self.add(filter, options)
    }

    /// First loaded instance of the filter called `name`.
    pub fn find(&self, name: &str) -> Option<FilterId> {
        self.entries
            .read()
            .iter()
            .find(|e| e.filter.name() == name)
            .map(|e| e.id)
    }

    /// Stop and unload a filter.
    pub fn remove(&self, id: FilterId) -> Result<()> {
        let mut entry = {
            let mut entries = self.entries.write();
            let pos = entries
                .iter()
                .position(|e| e.id == id)
                .ok_or(PipelineError::FilterNotFound(id.0))?;
            entries.remove(pos)
        };
        entry.filter.stop();
        debug!(filter = entry.filter.name(), %id, "filter unloaded");
        Ok(())
    }

    /// Let a filter see frames again.
    pub fn enable(&self, id: FilterId) -> Result<()> {
        self.set_enabled(id, true)
    }

    /// Keep a filter loaded but skip it.
    pub fn disable(&self, id: FilterId) -> Result<()> {
        self.set_enabled(id, false)
    }

    fn set_enabled(&self, id: FilterId, enabled: bool) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(PipelineError::FilterNotFound(id.0))?;
        entry.enabled = enabled;
        Ok(())
    }

    /// Reconfigure a loaded filter.
    pub fn configure(&self, id: FilterId, options: &str) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(PipelineError::FilterNotFound(id.0))?;
        entry.filter.configure(options)?;
        entry.options = options.to_string();
        Ok(())
    }

    /// Read one option back from a loaded filter.
    pub fn get_config(&self, id: FilterId, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read();
        let entry = entries
            .iter()
            .find(|e| e.id == id)
            .ok_or(PipelineError::FilterNotFound(id.0))?;
        Ok(entry.filter.get_config(key))
    }

    /// Loaded filters in processing order.
    pub fn list(&self) -> Vec<FilterInfo> {
        self.entries
            .read()
            .iter()
            .map(|e| FilterInfo {
                id: e.id,
                name: e.filter.name().to_string(),
                options: e.options.clone(),
                enabled: e.enabled,
            })
            .collect()
    }

    /// Number of loaded filters.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no filter is loaded.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Run every enabled filter on `frame` for `stage`.
    ///
    /// A failing filter marks the frame `BROKEN`; the chain carries on.
    pub fn process(&self, stage: FilterStage, frame: &mut F) {
        let entries = self.entries.read();
        if entries.is_empty() {
            return;
        }
        timed("pipeline.filter.duration_ns", stage.name(), || {
            for entry in entries.iter().filter(|e| e.enabled) {
                if let Err(e) = entry.filter.process(stage, frame) {
                    warn!(
                        filter = entry.filter.name(),
                        id = frame.id(),
                        %stage,
                        "filter failed: {}",
                        e
                    );
                    frame.attributes_mut().insert(FrameAttributes::BROKEN);
                }
            }
        });
    }

    /// Stop every filter, in loading order.
    pub fn stop_all(&self) {
        for entry in self.entries.write().iter_mut() {
            entry.filter.stop();
        }
    }
}

/// Split `name=options` into its parts.
pub fn split_filter_spec(spec: &str) -> (&str, &str) {
    match spec.split_once('=') {
        Some((name, options)) => (name.trim(), options.trim()),
        None => (spec.trim(), ""),
    }
}

/// Value of `key` in a `key=value:key=value` option string.
pub fn option_value<'a>(options: &'a str, key: &str) -> Option<&'a str> {
    options.split(':').find_map(|pair| match pair.split_once('=') {
        Some((k, v)) if k.trim() == key => Some(v.trim()),
        None if pair.trim() == key => Some(""),
        _ => None,
    })
}

/// Does nothing.
#[derive(Debug, Default)]
pub struct NullFilter;

impl<F: PoolFrame> FrameFilter<F> for NullFilter {
    fn name(&self) -> &str {
        "null"
    }

    fn process(&self, _stage: FilterStage, _frame: &mut F) -> Result<()> {
        Ok(())
    }
}

/// Marks the listed frames `SKIPPED` as soon as they are read.
#[derive(Debug, Default)]
pub struct SkipFilter {
    ranges: FrameRanges,
}

impl<F: PoolFrame> FrameFilter<F> for SkipFilter {
    fn name(&self) -> &str {
        "skip"
    }

    fn configure(&mut self, options: &str) -> Result<()> {
        self.ranges = FrameRanges::parse(options, DEFAULT_FPS)?;
        Ok(())
    }

    fn get_config(&self, key: &str) -> Option<String> {
        (key == "ranges").then(|| self.ranges.to_string())
    }

    fn process(&self, stage: FilterStage, frame: &mut F) -> Result<()> {
        if stage == FilterStage::PreSync && self.ranges.selects(frame.id()) {
            frame.attributes_mut().insert(FrameAttributes::SKIPPED);
        }
        Ok(())
    }
}

/// Asks for one extra copy of each listed frame.
#[derive(Debug, Default)]
pub struct CloneFilter {
    ranges: FrameRanges,
}

impl<F: PoolFrame> FrameFilter<F> for CloneFilter {
    fn name(&self) -> &str {
        "clone"
    }

    fn configure(&mut self, options: &str) -> Result<()> {
        self.ranges = FrameRanges::parse(options, DEFAULT_FPS)?;
        Ok(())
    }

    fn get_config(&self, key: &str) -> Option<String> {
        (key == "ranges").then(|| self.ranges.to_string())
    }

    fn process(&self, stage: FilterStage, frame: &mut F) -> Result<()> {
        let attrs = frame.attributes();
        // a clone must not ask to be cloned again
        if stage == FilterStage::PreMulti
            && !attrs.contains(FrameAttributes::WAS_CLONED)
            && self.ranges.selects(frame.id())
        {
            frame.attributes_mut().insert(FrameAttributes::IS_CLONED);
        }
        Ok(())
    }
}

/// Inverts every byte of the picture.
///
/// Options: `range=<ranges>` limits the filter to some frames.
#[derive(Debug, Default)]
pub struct InvertFilter {
    ranges: Option<FrameRanges>,
}

impl FrameFilter<VideoFrame> for InvertFilter {
    fn name(&self) -> &str {
        "invert"
    }

    fn configure(&mut self, options: &str) -> Result<()> {
        self.ranges = match option_value(options, "range") {
            Some(range) => Some(FrameRanges::parse(range, DEFAULT_FPS)?),
            None => None,
        };
        Ok(())
    }

    fn get_config(&self, key: &str) -> Option<String> {
        match key {
            "range" => Some(
                self.ranges
                    .as_ref()
                    .map_or_else(|| "all".to_string(), ToString::to_string),
            ),
            _ => None,
        }
    }

    fn process(&self, stage: FilterStage, frame: &mut VideoFrame) -> Result<()> {
        if stage != FilterStage::PostMulti {
            return Ok(());
        }
        if let Some(ranges) = &self.ranges {
            if !ranges.selects(frame.id()) {
                return Ok(());
            }
        }
        {
            let (src, dst) = frame.split_for_transform();
            for (d, s) in dst.iter_mut().zip(src) {
                *d = !s;
            }
        }
        frame.swap_buffers();
        Ok(())
    }
}
