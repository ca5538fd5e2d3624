use crate::core::{Result, StoreError};
use log::debug;
use lru::LruCache;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::rc::Rc;

/// Number of projected slices kept by [`CachedVolume`] by default.
pub const DEFAULT_SLICE_CACHE: usize = 15;

/// A 2D intensity plane, indexed `[x, y]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSlice {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl ImageSlice {
    /// `data` is laid out with x as the major axis: `data[x * height + y]`.
    pub fn new(width: usize, height: usize, data: Vec<f64>) -> Result<Self> {
        if width == 0 || height == 0 || data.len() != width * height {
            return Err(StoreError::Image(format!(
                "slice of {}x{} cannot hold {} values",
                width,
                height,
                data.len()
            )));
        }
        Ok(Self { width, height, data })
    }

    pub fn filled(width: usize, height: usize, value: f64) -> Result<Self> {
        Self::new(width, height, vec![value; width * height])
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f64) -> Result<Self> {
        let mut data = Vec::with_capacity(width * height);
        for x in 0..width {
            for y in 0..height {
                data.push(f(x, y));
            }
        }
        Self::new(width, height, data)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Intensity at `(x, y)`; coordinates outside the slice are clamped to its edge.
    pub fn get(&self, x: i64, y: i64) -> f64 {
        let cx = x.clamp(0, self.width as i64 - 1) as usize;
        let cy = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[cx * self.height + cy]
    }

    fn max_with(&mut self, other: &ImageSlice) -> Result<()> {
        if self.width != other.width || self.height != other.height {
            return Err(StoreError::Image("cannot project slices of different sizes".into()));
        }
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a = a.max(*b);
        }
        Ok(())
    }
}

/// The image-volume collaborator the computed columns read from.
pub trait ImageVolume {
    fn channel_count(&self) -> usize;

    /// Intensity plane for `channel` at time `t`, max-projected over the
    /// half-open z range `[z_start, z_end)`. The range is clamped to the
    /// stack; a range that clamps to nothing is an error.
    fn fetch_intensity(&self, t: i64, channel: usize, z_range: (i64, i64)) -> Result<Rc<ImageSlice>>;
}

/// Volume held entirely in memory: one z stack per `(t, channel)`.
#[derive(Debug, Default)]
pub struct MemoryVolume {
    channels: usize,
    stacks: BTreeMap<(i64, usize), Vec<ImageSlice>>,
}

impl MemoryVolume {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            stacks: BTreeMap::new(),
        }
    }

    pub fn with_stack(mut self, t: i64, channel: usize, stack: Vec<ImageSlice>) -> Result<Self> {
        self.insert_stack(t, channel, stack)?;
        Ok(self)
    }

    pub fn insert_stack(&mut self, t: i64, channel: usize, stack: Vec<ImageSlice>) -> Result<()> {
        if channel >= self.channels {
            return Err(StoreError::Image(format!(
                "channel {} out of range, volume has {}",
                channel, self.channels
            )));
        }
        self.stacks.insert((t, channel), stack);
        Ok(())
    }
}

impl ImageVolume for MemoryVolume {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn fetch_intensity(&self, t: i64, channel: usize, z_range: (i64, i64)) -> Result<Rc<ImageSlice>> {
        let stack = self
            .stacks
            .get(&(t, channel))
            .ok_or_else(|| StoreError::Image(format!("no stack for t={} channel={}", t, channel)))?;

        let start = z_range.0.max(0) as usize;
        let end = (z_range.1.max(0) as usize).min(stack.len());
        let mut slices = stack.get(start..end).unwrap_or_default().iter();

        let mut projected = slices
            .next()
            .cloned()
            .ok_or_else(|| StoreError::Image(format!("empty z range {:?} at t={}", z_range, t)))?;
        for slice in slices {
            projected.max_with(slice)?;
        }
        Ok(Rc::new(projected))
    }
}

/// Keeps recently projected slices of another volume.
pub struct CachedVolume<V> {
    inner: V,
    cache: RefCell<LruCache<(i64, usize, i64, i64), Rc<ImageSlice>>>,
}

impl<V: ImageVolume> CachedVolume<V> {
    pub fn new(inner: V) -> Self {
        Self::with_capacity(inner, DEFAULT_SLICE_CACHE)
    }

    pub fn with_capacity(inner: V, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: RefCell::new(LruCache::new(capacity)),
        }
    }

    pub fn inner(&self) -> &V {
        &self.inner
    }

    pub fn cached_slices(&self) -> usize {
        self.cache.borrow().len()
    }
}

impl<V: ImageVolume> ImageVolume for CachedVolume<V> {
    fn channel_count(&self) -> usize {
        self.inner.channel_count()
    }

    fn fetch_intensity(&self, t: i64, channel: usize, z_range: (i64, i64)) -> Result<Rc<ImageSlice>> {
        let key = (t, channel, z_range.0, z_range.1);
        if let Some(slice) = self.cache.borrow_mut().get(&key) {
            return Ok(Rc::clone(slice));
        }

        debug!("slice cache miss t={} channel={} z={:?}", t, channel, z_range);
        let slice = self.inner.fetch_intensity(t, channel, z_range)?;
        self.cache.borrow_mut().put(key, Rc::clone(&slice));
        Ok(slice)
    }
}
