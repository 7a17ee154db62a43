//! Typed edit commands and the linear undo/redo history.
//!
//! Every command knows how to apply and revert itself against a document.
//! Commands that reference a layer deleted by a later edit become no-ops
//! instead of errors, so replaying history never fails on a tombstone.

use std::collections::VecDeque;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::adjustments::AdjustmentNode;
use crate::brush_engine::{PaintMap, StrokeDelta};
use crate::error::Result;
use crate::layer::{BlendMode, Document, Layer, LayerId, LayerTransform, ResampleQuality};

/// Which of a layer's maps a stroke edited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrokeTarget {
    Paint,
    Mask,
}

/// Snapshot of a layer's scalar properties, for property-edit commands.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerProps {
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub transform: LayerTransform,
    pub resample: ResampleQuality,
}

impl LayerProps {
    pub fn capture(layer: &Layer) -> Self {
        Self {
            name: layer.name.clone(),
            visible: layer.visible,
            opacity: layer.opacity,
            blend_mode: layer.blend_mode,
            transform: layer.transform,
            resample: layer.resample,
        }
    }

    fn restore(&self, layer: &mut Layer) {
        layer.name = self.name.clone();
        layer.visible = self.visible;
        layer.opacity = self.opacity;
        layer.blend_mode = self.blend_mode;
        layer.transform = self.transform;
        layer.resample = self.resample;
    }
}

/// One undoable edit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EditCommand {
    Stroke {
        layer: LayerId,
        target: StrokeTarget,
        delta: StrokeDelta,
    },
    SetLayerProps {
        layer: LayerId,
        before: LayerProps,
        after: LayerProps,
    },
    Reorder {
        layer: LayerId,
        from: usize,
        to: usize,
    },
    AddLayer {
        layer: Box<Layer>,
        index: usize,
    },
    RemoveLayer {
        layer: Box<Layer>,
        index: usize,
    },
    SetAdjustments {
        layer: LayerId,
        before: Vec<AdjustmentNode>,
        after: Vec<AdjustmentNode>,
    },
}

impl EditCommand {
    pub fn apply(&self, doc: &mut Document) -> Result<()> {
        match self {
            EditCommand::Stroke { layer, target, delta } => {
                apply_stroke(doc, *layer, *target, delta, false)
            }
            EditCommand::SetLayerProps { layer, after, .. } => {
                with_layer(doc, *layer, |l| after.restore(l))
            }
            EditCommand::Reorder { layer, to, .. } => {
                if doc.index_of(*layer).is_some() {
                    doc.move_layer(*layer, *to)?;
                } else {
                    debug!("reorder skipped, layer {} is gone", layer.0);
                }
                Ok(())
            }
            EditCommand::AddLayer { layer, index } => {
                doc.insert_layer((*index).min(doc.len()), (**layer).clone())
            }
            EditCommand::RemoveLayer { layer, .. } => {
                if doc.index_of(layer.id).is_some() {
                    doc.remove_layer(layer.id)?;
                } else {
                    debug!("remove skipped, layer {} is gone", layer.id.0);
                }
                Ok(())
            }
            EditCommand::SetAdjustments { layer, after, .. } => with_layer(doc, *layer, |l| {
                l.adjustments.set_nodes(after.clone());
            }),
        }
    }

    pub fn revert(&self, doc: &mut Document) -> Result<()> {
        match self {
            EditCommand::Stroke { layer, target, delta } => {
                apply_stroke(doc, *layer, *target, delta, true)
            }
            EditCommand::SetLayerProps { layer, before, .. } => {
                with_layer(doc, *layer, |l| before.restore(l))
            }
            EditCommand::Reorder { layer, from, .. } => {
                if doc.index_of(*layer).is_some() {
                    doc.move_layer(*layer, *from)?;
                } else {
                    debug!("reorder revert skipped, layer {} is gone", layer.0);
                }
                Ok(())
            }
            EditCommand::AddLayer { layer, .. } => {
                if doc.index_of(layer.id).is_some() {
                    doc.remove_layer(layer.id)?;
                } else {
                    debug!("add revert skipped, layer {} is gone", layer.id.0);
                }
                Ok(())
            }
            EditCommand::RemoveLayer { layer, index } => {
                doc.insert_layer((*index).min(doc.len()), (**layer).clone())
            }
            EditCommand::SetAdjustments { layer, before, .. } => with_layer(doc, *layer, |l| {
                l.adjustments.set_nodes(before.clone());
            }),
        }
    }

    /// Approximate heap footprint, for the history byte budget.
    pub fn byte_size(&self) -> usize {
        match self {
            EditCommand::Stroke { delta, .. } => delta.byte_size(),
            EditCommand::AddLayer { layer, .. } | EditCommand::RemoveLayer { layer, .. } => {
                layer.byte_size() + 256
            }
            _ => 256,
        }
    }
}

fn with_layer(doc: &mut Document, id: LayerId, f: impl FnOnce(&mut Layer)) -> Result<()> {
    match doc.layer_mut(id) {
        Some(layer) => {
            f(layer);
            Ok(())
        }
        None => {
            debug!("edit skipped, layer {} is gone", id.0);
            Ok(())
        }
    }
}

fn apply_stroke(
    doc: &mut Document,
    id: LayerId,
    target: StrokeTarget,
    delta: &StrokeDelta,
    revert: bool,
) -> Result<()> {
    let (cw, ch) = doc.size();
    let Some(layer) = doc.layer_mut(id) else {
        debug!("stroke skipped, layer {} is gone", id.0);
        return Ok(());
    };
    match target {
        StrokeTarget::Paint => {
            let paint = layer.paint_mut(cw, ch).clone();
            let mut map = PaintMap::Rgba(paint);
            if revert {
                delta.revert(&mut map)?;
            } else {
                delta.apply(&mut map)?;
            }
            let PaintMap::Rgba(paint) = map else { unreachable!() };
            layer.paint = Some(paint);
        }
        StrokeTarget::Mask => {
            let Some(mask) = layer.mask.take() else {
                debug!("mask stroke skipped, layer {} has no mask", id.0);
                return Ok(());
            };
            let mut map = PaintMap::Alpha(mask);
            let result = if revert {
                delta.revert(&mut map)
            } else {
                delta.apply(&mut map)
            };
            let PaintMap::Alpha(mask) = map else { unreachable!() };
            layer.mask = Some(mask);
            result?;
        }
    }
    Ok(())
}

/// Linear undo/redo stacks with a command-count and byte cap. When either
/// cap is exceeded the oldest undo entries are evicted; a new edit clears
/// the redo stack.
pub struct CommandHistory {
    undo: VecDeque<EditCommand>,
    redo: Vec<EditCommand>,
    undo_bytes: usize,
    max_commands: usize,
    max_bytes: usize,
}

impl CommandHistory {
    pub fn new(max_commands: usize, max_bytes: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            undo_bytes: 0,
            max_commands: max_commands.max(1),
            max_bytes,
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    /// Record an already-applied command.
    pub fn push(&mut self, command: EditCommand) {
        self.redo.clear();
        self.undo_bytes += command.byte_size();
        self.undo.push_back(command);
        while self.undo.len() > self.max_commands || self.undo_bytes > self.max_bytes {
            if self.undo.len() <= 1 {
                break;
            }
            let evicted = self.undo.pop_front().unwrap();
            self.undo_bytes -= evicted.byte_size();
            debug!("history evicted a command, {} left", self.undo.len());
        }
    }

    /// Revert the newest command. Returns false when there is nothing to
    /// undo.
    pub fn undo(&mut self, doc: &mut Document) -> Result<bool> {
        let Some(command) = self.undo.pop_back() else {
            return Ok(false);
        };
        self.undo_bytes -= command.byte_size();
        command.revert(doc)?;
        self.redo.push(command);
        Ok(true)
    }

    /// Re-apply the most recently undone command.
    pub fn redo(&mut self, doc: &mut Document) -> Result<bool> {
        let Some(command) = self.redo.pop() else {
            return Ok(false);
        };
        command.apply(doc)?;
        self.undo_bytes += command.byte_size();
        self.undo.push_back(command);
        Ok(true)
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.undo_bytes = 0;
    }
}
