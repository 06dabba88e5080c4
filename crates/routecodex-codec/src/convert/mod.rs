//! Pure dialect conversions. Each function is total over its typed input;
//! codecs wrap these with payload decode/encode.

pub mod anthropic;
pub mod responses;
