pub mod correlator;
pub mod encoder;
pub mod fan_out;
pub mod forms;
pub mod multipart;
pub mod session;
