pub mod adjustments;
pub mod brush_engine;
pub mod buffer;
pub mod compositor;
pub mod error;
pub mod geom;
pub mod history;
pub mod input;
pub mod layer;
pub mod mask;
pub mod pixel;
pub mod project;
pub mod selection;

pub use brush_engine::{BrushEngine, BrushPreset, PaintMap, StrokeDelta, ToolMode};
pub use buffer::PixelBuffer;
pub use compositor::{composite, composite_region, CompositeScheduler, SourceCache};
pub use error::{EngineError, Result};
pub use history::{CommandHistory, EditCommand};
pub use layer::{BlendMode, Document, Layer, LayerId};
pub use pixel::Color;
