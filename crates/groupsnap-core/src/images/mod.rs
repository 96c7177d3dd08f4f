//! Image primitives: inline encoding, decode/encode helpers and compositing.

pub mod compositor;
pub mod decode;
pub mod inline;
pub mod path_mime;

pub use compositor::{Composite, CompositeError, CompositeLayout, Placement, composite, plan_layout};
pub use inline::{DEFAULT_IMAGE_MIME, InlineImage};
