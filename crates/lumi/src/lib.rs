#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use lumi_image as image;

#[doc(inline)]
pub use lumi_vlm as vlm;
