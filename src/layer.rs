//! Layer and document model. Layers are non-destructive recipes; the only
//! rasterized state a layer owns is its optional paint bitmap.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::adjustments::AdjustmentStack;
use crate::buffer::PixelBuffer;
use crate::error::{EngineError, Result};
use crate::geom::Vec2;
use crate::mask::{ColorKeyRule, Mask, MaskRefineSettings};
use crate::selection::Selection;

/// Stable layer identity, never reused within a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub u64);

/// How a layer's output combines with the stack beneath it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
}

/// Affine placement of a layer's source on the canvas. Applied as
/// scale, then rotation, then translation, around the source center.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerTransform {
    pub scale: f32,
    pub rotation_deg: f32,
    pub offset: Vec2,
}

impl Default for LayerTransform {
    fn default() -> Self {
        Self {
            scale: 1.0,
            rotation_deg: 0.0,
            offset: Vec2::new(0.0, 0.0),
        }
    }
}

impl LayerTransform {
    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.rotation_deg == 0.0 && self.offset == Vec2::new(0.0, 0.0)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(EngineError::Validation(format!(
                "transform scale {} must be finite and positive",
                self.scale
            )));
        }
        if !self.rotation_deg.is_finite()
            || !self.offset.x.is_finite()
            || !self.offset.y.is_finite()
        {
            return Err(EngineError::Validation(
                "transform rotation/offset must be finite".into(),
            ));
        }
        Ok(())
    }
}

/// Quality used when resampling a transformed source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResampleQuality {
    #[default]
    Bilinear,
    Nearest,
}

/// One compositing layer.
///
/// `source` is a decoded cache of `source_path` and is rebuilt on load,
/// so it never serializes. The paint bitmap lives in canvas space; the
/// mask lives in source space and rides through the layer transform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub transform: LayerTransform,
    pub resample: ResampleQuality,
    pub source_path: Option<String>,
    #[serde(skip)]
    pub source: Option<Arc<PixelBuffer>>,
    pub mask: Option<Mask>,
    pub paint: Option<PixelBuffer>,
    pub color_key: Option<ColorKeyRule>,
    pub mask_refine: MaskRefineSettings,
    pub adjustments: AdjustmentStack,
}

impl Layer {
    pub fn new(id: LayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            transform: LayerTransform::default(),
            resample: ResampleQuality::default(),
            source_path: None,
            source: None,
            mask: None,
            paint: None,
            color_key: None,
            mask_refine: MaskRefineSettings::default(),
            adjustments: AdjustmentStack::new(),
        }
    }

    /// Dimensions of the decoded source, if one is attached.
    pub fn source_size(&self) -> Option<(u32, u32)> {
        self.source.as_ref().map(|s| s.size())
    }

    /// The canvas-space paint bitmap, created on first use.
    pub fn paint_mut(&mut self, canvas_w: u32, canvas_h: u32) -> &mut PixelBuffer {
        self.paint
            .get_or_insert_with(|| PixelBuffer::new(canvas_w, canvas_h))
    }

    pub fn validate(&self, canvas_w: u32, canvas_h: u32) -> Result<()> {
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(EngineError::Validation(format!(
                "layer `{}` opacity {} outside 0..1",
                self.name, self.opacity
            )));
        }
        self.transform.validate()?;
        if let Some(rule) = &self.color_key {
            rule.validate()?;
        }
        for node in self.adjustments.nodes() {
            node.params.validate()?;
        }
        if let (Some(mask), Some((sw, sh))) = (&self.mask, self.source_size()) {
            if mask.size() != (sw, sh) {
                return Err(EngineError::dimensions((sw, sh), mask.size()));
            }
        }
        if let Some(paint) = &self.paint {
            if paint.size() != (canvas_w, canvas_h) {
                return Err(EngineError::dimensions((canvas_w, canvas_h), paint.size()));
            }
        }
        Ok(())
    }

    /// Approximate heap footprint of the mutable layer state.
    pub fn byte_size(&self) -> usize {
        self.mask.as_ref().map_or(0, Mask::byte_size)
            + self.paint.as_ref().map_or(0, PixelBuffer::byte_size)
    }
}

/// The whole edit state: canvas geometry plus the ordered layer stack,
/// bottom first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub width: u32,
    pub height: u32,
    layers: Vec<Layer>,
    pub active_layer: Option<LayerId>,
    /// Shared workspace selection gating color keying and adjustments.
    #[serde(default)]
    pub selection: Selection,
    next_id: u64,
}

impl Document {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(EngineError::Validation(format!(
                "canvas {width}x{height} must be non-empty"
            )));
        }
        Ok(Self {
            width,
            height,
            layers: Vec::new(),
            active_layer: None,
            selection: Selection::default(),
            next_id: 1,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Allocate the next layer id. Ids are monotonic and never reused.
    pub fn alloc_id(&mut self) -> LayerId {
        let id = LayerId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    /// Append on top of the stack.
    pub fn push_layer(&mut self, layer: Layer) -> Result<()> {
        self.insert_layer(self.layers.len(), layer)
    }

    pub fn insert_layer(&mut self, index: usize, layer: Layer) -> Result<()> {
        if index > self.layers.len() {
            return Err(EngineError::Validation(format!(
                "insert index {index} out of range for {} layers",
                self.layers.len()
            )));
        }
        if self.index_of(layer.id).is_some() {
            return Err(EngineError::State(format!(
                "duplicate layer id {}",
                layer.id.0
            )));
        }
        layer.validate(self.width, self.height)?;
        self.next_id = self.next_id.max(layer.id.0 + 1);
        if self.active_layer.is_none() {
            self.active_layer = Some(layer.id);
        }
        self.layers.insert(index, layer);
        Ok(())
    }

    /// Remove a layer, returning it with its former stack index.
    pub fn remove_layer(&mut self, id: LayerId) -> Result<(usize, Layer)> {
        let index = self
            .index_of(id)
            .ok_or_else(|| EngineError::State(format!("no layer with id {}", id.0)))?;
        let layer = self.layers.remove(index);
        if self.active_layer == Some(id) {
            self.active_layer = self.layers.last().map(|l| l.id);
        }
        Ok((index, layer))
    }

    /// Move a layer to a new stack position.
    pub fn move_layer(&mut self, id: LayerId, to: usize) -> Result<usize> {
        let from = self
            .index_of(id)
            .ok_or_else(|| EngineError::State(format!("no layer with id {}", id.0)))?;
        if to >= self.layers.len() {
            return Err(EngineError::Validation(format!(
                "move target {to} out of range for {} layers",
                self.layers.len()
            )));
        }
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);
        Ok(from)
    }

    /// Check every document invariant; run after deserializing.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(EngineError::Validation("canvas must be non-empty".into()));
        }
        for (i, layer) in self.layers.iter().enumerate() {
            layer.validate(self.width, self.height)?;
            for other in &self.layers[i + 1..] {
                if other.id == layer.id {
                    return Err(EngineError::State(format!(
                        "duplicate layer id {}",
                        layer.id.0
                    )));
                }
            }
        }
        if let Some(active) = self.active_layer {
            if self.index_of(active).is_none() {
                return Err(EngineError::State(format!(
                    "active layer {} does not exist",
                    active.0
                )));
            }
        }
        Ok(())
    }
}
