//! KiCad on-disk format handling.
//!
//! Only what the automation layer needs locally: an S-expression parser that
//! round-trips untouched values, a board view (stack-up, title block, layer
//! table, footprints, outline, variant patching) and a schematic view
//! (references, sub-sheets, DNP marking). Everything else — plotting,
//! geometry, DRC — is delegated to KiCad through the external tools.

pub mod board;
pub mod sch;
pub mod sexpr;

pub use board::{Board, Footprint, LayerDef, Pad, Stackup, StackupLayer, TitleBlock};
pub use sch::Schematic;
pub use sexpr::{Sexpr, SexprError};
