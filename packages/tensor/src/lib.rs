//! Tensor wire codec for the generation server.
//!
//! Images travel to and from the server as a 68-byte header followed by
//! half-precision pixel data in NHWC order:
//! - [`encode`] / [`encode_image`] turn a raster image into a 3 or 4 channel tensor
//! - [`decode`] turns a 3 channel RGB tensor, or a 4/16 channel latent preview,
//!   back into an 8-bit RGB image
//!
//! Everything here is a pure function. No state, no I/O.

mod calibration;
mod decode;
mod encode;
mod error;
mod header;

pub use calibration::{LatentCalibration, ModelFamily};
pub use decode::{decode, decode_to_png};
pub use encode::{encode, encode_image, encode_png, reencode_png};
pub use error::{CodecError, CodecResult};
pub use header::{
    COMPRESSED_MAGIC, ELEMENT_TYPE_F16, HEADER_FIELDS, HEADER_LEN, LAYOUT_NHWC, MEMORY_CPU,
    TensorHeader,
};
